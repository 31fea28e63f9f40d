//! Decoded bearer token claims.

use serde::{Deserialize, Serialize};

const TRUSTED_CLIENT_SCOPE: &str = "uapi_trusted_client";
const SET_META_FIELDS_SCOPE: &str = "uapi_set_meta_fields";

/// The claims of a verified bearer token, as handed over by the HTTP
/// boundary. `scope` is the space-separated scope list of the token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub sub: String,
    #[serde(default)]
    pub aud: String,
    #[serde(default)]
    pub scope: String,
}

impl Claims {
    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.scope.split_whitespace()
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes().any(|s| s == scope)
    }

    /// Trusted clients act on behalf of other users; the effective user id
    /// is taken from the `Qvarn-Access-By` header instead of `sub`.
    pub fn is_trusted_client(&self) -> bool {
        self.has_scope(TRUSTED_CLIENT_SCOPE)
    }

    /// The `set_meta_fields` capability: client-supplied `id` and
    /// `revision` are accepted, and file writes skip the revision bump.
    pub fn may_set_meta_fields(&self) -> bool {
        self.has_scope(SET_META_FIELDS_SCOPE)
    }
}
