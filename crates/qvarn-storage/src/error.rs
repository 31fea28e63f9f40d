//! Store error kinds.

use crate::keys::ObjectKeys;

/// Errors raised by object store operations.
///
/// Everything except `NoSuchObject` indicates a caller bug or an
/// infrastructure failure; `NoSuchObject` is an ordinary outcome that maps
/// to a 404 at the boundary.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store was not declared with this key.
    #[error("object store is not prepared for key {key}")]
    UnknownKey { key: String },

    /// Store keys must be strings.
    #[error("object store keys must have string type, {key} does not")]
    WrongKeyType { key: String },

    /// An operation that addresses a single row was given a partial key.
    #[error("operation requires a value for key {key}")]
    MissingKey { key: String },

    /// An object with the same keys already exists.
    #[error("cannot add object with same keys: {keys}")]
    KeyCollision { keys: String },

    /// A blob with the same keys already exists.
    #[error("cannot add blob with same keys: {keys}")]
    BlobKeyCollision { keys: String },

    /// No object or blob with the given keys.
    #[error("no object or blob with keys {keys}")]
    NoSuchObject { keys: String },

    /// `get_matches` was called without a condition and without keys.
    #[error("get_matches needs a condition or at least one key")]
    NoMatchCriteria,

    /// A transaction could not be started, committed or rolled back, or
    /// was used after completion.
    #[error("transaction error: {message}")]
    Transaction { message: String },

    /// The backend could not be reached.
    #[error("connection error: {message}")]
    Connection { message: String },

    /// Any other backend failure.
    #[error("backend error: {message}")]
    Backend { message: String },
}

impl StoreError {
    #[must_use]
    pub fn unknown_key(key: impl Into<String>) -> Self {
        Self::UnknownKey { key: key.into() }
    }

    #[must_use]
    pub fn wrong_key_type(key: impl Into<String>) -> Self {
        Self::WrongKeyType { key: key.into() }
    }

    #[must_use]
    pub fn missing_key(key: impl Into<String>) -> Self {
        Self::MissingKey { key: key.into() }
    }

    #[must_use]
    pub fn key_collision(keys: &ObjectKeys) -> Self {
        Self::KeyCollision {
            keys: format_keys(keys),
        }
    }

    #[must_use]
    pub fn blob_key_collision(keys: &ObjectKeys) -> Self {
        Self::BlobKeyCollision {
            keys: format_keys(keys),
        }
    }

    #[must_use]
    pub fn no_such_object(keys: &ObjectKeys) -> Self {
        Self::NoSuchObject {
            keys: format_keys(keys),
        }
    }

    #[must_use]
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Returns `true` if this is the missing-object outcome.
    #[must_use]
    pub fn is_no_such_object(&self) -> bool {
        matches!(self, Self::NoSuchObject { .. })
    }
}

/// Renders a key tuple for error messages, in key order.
pub fn format_keys(keys: &ObjectKeys) -> String {
    keys.iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(", ")
}
