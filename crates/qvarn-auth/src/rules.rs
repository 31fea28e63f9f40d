//! Allow rules and their matching predicate.
//!
//! A rule describes one permitted `(method, client, user, target)`
//! combination. Rules are unordered; a request is allowed as soon as any
//! rule matches. The string fields accept the wildcard `*`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Matches any value in a rule field.
pub const WILDCARD: &str = "*";

/// One fine-grained access control rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowRule {
    pub method: String,
    pub client_id: String,
    pub user_id: String,
    pub subpath: String,
    pub resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_value: Option<String>,
}

/// The request-side parameters rules are matched against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessParams {
    pub method: String,
    pub client_id: String,
    pub user_id: String,
    pub resource_type: String,
}

/// Whether a single rule permits the request described by `params` to touch
/// the candidate object stored under `(obj_id, subpath)`.
pub fn rule_allows(
    rule: &AllowRule,
    params: &AccessParams,
    obj: &Value,
    obj_id: &str,
    subpath: &str,
) -> bool {
    rule.method == params.method
        && matches_or_wild(&rule.client_id, &params.client_id)
        && matches_or_wild(&rule.user_id, &params.user_id)
        && matches_or_wild(&rule.resource_id, obj_id)
        && matches_or_wild(&rule.subpath, subpath)
        && type_matches(rule, obj)
        && attribute_matches(rule, obj)
}

/// Whether any of the rules permits the request. This is the precise form
/// of the check; the SQL fragment over the allow table is an over-match
/// that this predicate refines.
pub fn access_is_allowed(
    rules: &[AllowRule],
    params: &AccessParams,
    obj: &Value,
    obj_id: &str,
    subpath: &str,
) -> bool {
    rules
        .iter()
        .any(|rule| rule_allows(rule, params, obj, obj_id, subpath))
}

fn matches_or_wild(rule_value: &str, actual: &str) -> bool {
    rule_value == WILDCARD || rule_value == actual
}

fn type_matches(rule: &AllowRule, obj: &Value) -> bool {
    match obj.get("type").and_then(Value::as_str) {
        None => true,
        Some(actual) => match &rule.resource_type {
            None => true,
            Some(wanted) => wanted == actual,
        },
    }
}

fn attribute_matches(rule: &AllowRule, obj: &Value) -> bool {
    let Some(field) = &rule.resource_field else {
        return true;
    };
    let Some(value) = obj.get(field) else {
        return false;
    };
    match &rule.resource_value {
        None => true,
        Some(wanted) if wanted == WILDCARD => true,
        Some(wanted) => value.as_str() == Some(wanted.as_str()),
    }
}
