//! The condition algebra.
//!
//! Conditions form a closed sum type. Every variant knows how to evaluate
//! itself against a JSON object in memory (`matches`) and how to compile
//! itself into a SQL fragment (see [`crate::sql`]). Comparison leaves are
//! case-insensitive for string values and compare integers and booleans by
//! their natural order; `ResourceTypeIs` is an always case-sensitive
//! equality on the `type` field.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde_json::Value;

use qvarn_auth::{AccessParams, AllowRule, access_is_allowed};
use qvarn_core::flatten_object;

/// Comparison operator of a leaf condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    Contains,
    Startswith,
}

/// A search condition tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// N-ary conjunction.
    All(Vec<Condition>),
    /// A comparison of a flattened field against a pattern.
    Cmp {
        op: CmpOp,
        field: String,
        pattern: String,
    },
    /// Case-sensitive equality on the `type` field.
    ResourceTypeIs(String),
    /// Always true.
    Yes,
    /// Always false.
    No,
    /// True when any allow rule permits the request to touch the object.
    AccessIsAllowed {
        params: AccessParams,
        rules: Vec<AllowRule>,
    },
}

impl Condition {
    pub fn cmp(op: CmpOp, field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::Cmp {
            op,
            field: field.into(),
            pattern: pattern.into(),
        }
    }

    pub fn equal(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::cmp(CmpOp::Equal, field, pattern)
    }

    pub fn all(conds: Vec<Condition>) -> Self {
        Self::All(conds)
    }

    /// Evaluates the condition against an object and its store keys.
    ///
    /// Comparison leaves walk the flattened pairs of the object and are
    /// true when any pair with the leaf's field name satisfies the
    /// comparison.
    pub fn matches(&self, obj: &Value, keys: &BTreeMap<String, String>) -> bool {
        match self {
            Self::All(conds) => conds.iter().all(|c| c.matches(obj, keys)),
            Self::Cmp { op, field, pattern } => flatten_object(obj)
                .iter()
                .any(|(name, value)| name == field && compare_value(*op, value, pattern)),
            Self::ResourceTypeIs(type_name) => {
                obj.get("type").and_then(Value::as_str) == Some(type_name)
            }
            Self::Yes => true,
            Self::No => false,
            Self::AccessIsAllowed { params, rules } => {
                let obj_id = keys.get("obj_id").map(String::as_str).unwrap_or("");
                let subpath = keys.get("subpath").map(String::as_str).unwrap_or("");
                access_is_allowed(rules, params, obj, obj_id, subpath)
            }
        }
    }

    /// The leaf conditions of the tree, in order.
    pub fn leaves(&self) -> Vec<&Condition> {
        match self {
            Self::All(conds) => conds.iter().flat_map(|c| c.leaves()).collect(),
            leaf => vec![leaf],
        }
    }

    /// The field names the condition compares, for search field
    /// validation. `ResourceTypeIs` counts as comparing `type`.
    pub fn fields(&self) -> Vec<&str> {
        self.leaves()
            .into_iter()
            .filter_map(|leaf| match leaf {
                Self::Cmp { field, .. } => Some(field.as_str()),
                Self::ResourceTypeIs(_) => Some("type"),
                _ => None,
            })
            .collect()
    }
}

fn compare_value(op: CmpOp, actual: &Value, pattern: &str) -> bool {
    match actual {
        Value::String(s) => compare_str(op, &s.to_lowercase(), &pattern.to_lowercase()),
        Value::Number(n) => match (n.as_i64(), pattern.parse::<i64>()) {
            (Some(a), Ok(p)) => compare_ordering(op, a.cmp(&p)),
            _ => false,
        },
        Value::Bool(b) => match pattern.parse::<bool>() {
            Ok(p) => match op {
                CmpOp::Equal => *b == p,
                CmpOp::NotEqual => *b != p,
                _ => false,
            },
            Err(_) => false,
        },
        _ => false,
    }
}

fn compare_str(op: CmpOp, a: &str, b: &str) -> bool {
    match op {
        CmpOp::Equal => a == b,
        CmpOp::NotEqual => a != b,
        CmpOp::GreaterThan => a > b,
        CmpOp::GreaterOrEqual => a >= b,
        CmpOp::LessThan => a < b,
        CmpOp::LessOrEqual => a <= b,
        CmpOp::Contains => a.contains(b),
        CmpOp::Startswith => a.starts_with(b),
    }
}

fn compare_ordering(op: CmpOp, ord: Ordering) -> bool {
    match op {
        CmpOp::Equal => ord.is_eq(),
        CmpOp::NotEqual => ord.is_ne(),
        CmpOp::GreaterThan => ord.is_gt(),
        CmpOp::GreaterOrEqual => ord.is_ge(),
        CmpOp::LessThan => ord.is_lt(),
        CmpOp::LessOrEqual => ord.is_le(),
        CmpOp::Contains | CmpOp::Startswith => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn no_keys() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    #[test]
    fn test_equal_is_case_insensitive() {
        let cond = Condition::equal("full_name", "james");
        assert!(cond.matches(&json!({"full_name": "JAMES"}), &no_keys()));
        assert!(!cond.matches(&json!({"full_name": "Alfred"}), &no_keys()));
    }

    #[test]
    fn test_equal_matches_nested_fields() {
        let cond = Condition::equal("full_name", "James");
        let obj = json!({"names": [{"full_name": "James"}]});
        assert!(cond.matches(&obj, &no_keys()));
    }

    #[test]
    fn test_integer_comparisons_use_natural_order() {
        let obj = json!({"count": 9});
        assert!(Condition::cmp(CmpOp::LessThan, "count", "10").matches(&obj, &no_keys()));
        assert!(!Condition::cmp(CmpOp::GreaterThan, "count", "10").matches(&obj, &no_keys()));
        assert!(Condition::cmp(CmpOp::Equal, "count", "9").matches(&obj, &no_keys()));
    }

    #[test]
    fn test_boolean_comparisons() {
        let obj = json!({"enabled": true});
        assert!(Condition::equal("enabled", "true").matches(&obj, &no_keys()));
        assert!(!Condition::equal("enabled", "false").matches(&obj, &no_keys()));
        assert!(Condition::cmp(CmpOp::NotEqual, "enabled", "false").matches(&obj, &no_keys()));
    }

    #[test]
    fn test_contains_and_startswith() {
        let obj = json!({"full_name": "James Bond"});
        assert!(Condition::cmp(CmpOp::Contains, "full_name", "es b").matches(&obj, &no_keys()));
        assert!(Condition::cmp(CmpOp::Startswith, "full_name", "JAM").matches(&obj, &no_keys()));
        assert!(!Condition::cmp(CmpOp::Startswith, "full_name", "ond").matches(&obj, &no_keys()));
    }

    #[test]
    fn test_all_requires_every_subcondition() {
        let cond = Condition::all(vec![
            Condition::equal("a", "1"),
            Condition::equal("b", "2"),
        ]);
        assert!(cond.matches(&json!({"a": "1", "b": "2"}), &no_keys()));
        assert!(!cond.matches(&json!({"a": "1", "b": "3"}), &no_keys()));
    }

    #[test]
    fn test_resource_type_is_case_sensitive() {
        let cond = Condition::ResourceTypeIs("subject".to_string());
        assert!(cond.matches(&json!({"type": "subject"}), &no_keys()));
        assert!(!cond.matches(&json!({"type": "SUBJECT"}), &no_keys()));
    }

    #[test]
    fn test_yes_and_no() {
        assert!(Condition::Yes.matches(&json!({}), &no_keys()));
        assert!(!Condition::No.matches(&json!({}), &no_keys()));
    }

    #[test]
    fn test_leaves_flattens_nested_all() {
        let cond = Condition::all(vec![
            Condition::equal("a", "1"),
            Condition::all(vec![Condition::equal("b", "2"), Condition::Yes]),
        ]);
        assert_eq!(cond.leaves().len(), 3);
    }

    #[test]
    fn test_fields_reports_compared_names() {
        let cond = Condition::all(vec![
            Condition::equal("a", "1"),
            Condition::ResourceTypeIs("subject".to_string()),
            Condition::Yes,
        ]);
        assert_eq!(cond.fields(), vec!["a", "type"]);
    }

    #[test]
    fn test_access_is_allowed_checks_rules() {
        let params = AccessParams {
            method: "GET".to_string(),
            client_id: "client".to_string(),
            user_id: "user".to_string(),
            resource_type: "subject".to_string(),
        };
        let rule = AllowRule {
            method: "GET".to_string(),
            client_id: "*".to_string(),
            user_id: "user".to_string(),
            subpath: "".to_string(),
            resource_id: "*".to_string(),
            resource_type: None,
            resource_field: None,
            resource_value: None,
        };
        let cond = Condition::AccessIsAllowed {
            params,
            rules: vec![rule],
        };

        let mut keys = BTreeMap::new();
        keys.insert("obj_id".to_string(), "id-1".to_string());
        keys.insert("subpath".to_string(), "".to_string());

        assert!(cond.matches(&json!({"type": "subject"}), &keys));

        let empty = Condition::AccessIsAllowed {
            params: AccessParams::default(),
            rules: vec![],
        };
        assert!(!empty.matches(&json!({}), &keys));
    }
}
