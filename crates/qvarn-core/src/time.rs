//! Timestamps for notifications and access log entries.

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// The current UTC time as an RFC 3339 string.
///
/// Timestamps are stored as ordinary string fields and compared
/// lexicographically, which RFC 3339 rendering of UTC times supports.
pub fn current_timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}
