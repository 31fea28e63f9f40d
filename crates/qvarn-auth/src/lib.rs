//! Claims, scopes and fine-grained access control rules.
//!
//! The HTTP boundary verifies bearer tokens and hands the decoded claims to
//! this crate. Everything here is pure data and predicates: which scopes a
//! token carries, and whether any allow rule permits a request to touch a
//! candidate object.

pub mod claims;
pub mod rules;

pub use claims::Claims;
pub use rules::{AccessParams, AllowRule, WILDCARD, access_is_allowed, rule_allows};
