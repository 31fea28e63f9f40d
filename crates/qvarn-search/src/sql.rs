//! Compilation of conditions to SQL over the store's tables.
//!
//! Searches run against the `_aux` table of flattened `(name, value)`
//! rows. Conjunction across aux rows is simulated with a count threshold:
//! the per-leaf checks are OR-ed together, matching rows are counted per
//! object, and an object qualifies when its hit count reaches the number
//! of leaves. That over-matches when two leaves hit the same row family,
//! so callers re-filter candidates in memory with the precise condition.

use std::collections::BTreeMap;

use qvarn_auth::AccessParams;

use crate::cond::{CmpOp, Condition};

/// A bind parameter of a compiled query.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Int(i64),
}

/// A compiled query: SQL text with `$N` placeholders and the parameters to
/// bind, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub text: String,
    pub params: Vec<SqlParam>,
}

/// Accumulates bind parameters and mints `$N` placeholders.
#[derive(Debug, Default)]
struct SqlBuilder {
    params: Vec<SqlParam>,
}

impl SqlBuilder {
    fn push_text(&mut self, value: impl Into<String>) -> usize {
        self.params.push(SqlParam::Text(value.into()));
        self.params.len()
    }

    fn push_int(&mut self, value: i64) -> usize {
        self.params.push(SqlParam::Int(value));
        self.params.len()
    }
}

/// Compiles a full search query: candidates from the aux count threshold,
/// joined back to `_objects`, restricted by the key filter and the allow
/// check.
pub fn compile_search(
    cond: &Condition,
    allow: Option<&Condition>,
    key_filter: &BTreeMap<String, String>,
    key_columns: &[String],
) -> SqlQuery {
    let mut builder = SqlBuilder::default();

    let leaves = cond.leaves();
    let count = builder.push_int(leaves.len() as i64);
    let parts: Vec<String> = leaves
        .iter()
        .map(|leaf| compile_aux_leaf(leaf, &mut builder))
        .collect();
    let keys_check = compile_keys_check(key_filter, &mut builder);
    let (allow_table, allow_check) = compile_allow_check(allow, &mut builder);

    let columns = select_columns(key_columns);
    let text = format!(
        "SELECT DISTINCT {columns} \
         FROM _objects{allow_table}, \
         (SELECT obj_id, count(obj_id) AS hits FROM _aux WHERE {parts} GROUP BY obj_id) AS matched \
         WHERE matched.hits >= ${count} \
         AND matched.obj_id = _objects.obj_id \
         AND {keys_check} AND {allow_check}",
        parts = parts.join(" OR "),
    );

    SqlQuery {
        text,
        params: builder.params,
    }
}

/// Compiles a plain key lookup against `_objects`, with the allow check but
/// without touching the aux table. Used when there is no condition to
/// search by.
pub fn compile_lookup(
    key_filter: &BTreeMap<String, String>,
    allow: Option<&Condition>,
    key_columns: &[String],
) -> SqlQuery {
    let mut builder = SqlBuilder::default();

    let keys_check = compile_keys_check(key_filter, &mut builder);
    let (allow_table, allow_check) = compile_allow_check(allow, &mut builder);

    let columns = select_columns(key_columns);
    let text = format!(
        "SELECT DISTINCT {columns} FROM _objects{allow_table} \
         WHERE {keys_check} AND {allow_check}",
    );

    SqlQuery {
        text,
        params: builder.params,
    }
}

fn select_columns(key_columns: &[String]) -> String {
    let mut columns: Vec<String> = key_columns
        .iter()
        .map(|key| format!("_objects.{key}"))
        .collect();
    columns.push("_objects.body".to_string());
    columns.join(", ")
}

fn compile_keys_check(key_filter: &BTreeMap<String, String>, builder: &mut SqlBuilder) -> String {
    if key_filter.is_empty() {
        return "TRUE".to_string();
    }
    key_filter
        .iter()
        .map(|(key, value)| {
            let placeholder = builder.push_text(value);
            format!("_objects.{key} = ${placeholder}")
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn compile_allow_check(
    allow: Option<&Condition>,
    builder: &mut SqlBuilder,
) -> (&'static str, String) {
    match allow {
        Some(Condition::AccessIsAllowed { params, .. }) => {
            (", _allow", compile_allow_fragment(params, builder))
        }
        Some(Condition::No) => ("", "FALSE".to_string()),
        Some(_) | None => ("", "TRUE".to_string()),
    }
}

/// The allow-table fragment. It checks method, subpath, client, user and
/// resource id, each with its wildcard form. The per-rule attribute
/// constraints (`resource_type`, `resource_field`, `resource_value`) are
/// not expressible here; like the aux count trick this fragment
/// over-matches, and callers must narrow the rows down again with the
/// precise rule predicate.
fn compile_allow_fragment(params: &AccessParams, builder: &mut SqlBuilder) -> String {
    let method = builder.push_text(&params.method);
    let client_id = builder.push_text(&params.client_id);
    let user_id = builder.push_text(&params.user_id);
    [
        format!("_allow.method = ${method}"),
        "(_allow.subpath = '*' OR _allow.subpath = _objects.subpath)".to_string(),
        format!("(_allow.client_id = '*' OR _allow.client_id = ${client_id})"),
        format!("(_allow.user_id = '*' OR _allow.user_id = ${user_id})"),
        "(_allow.resource_id = '*' OR _allow.resource_id = _objects.obj_id)".to_string(),
    ]
    .join(" AND ")
}

fn compile_aux_leaf(leaf: &Condition, builder: &mut SqlBuilder) -> String {
    match leaf {
        Condition::Cmp { op, field, pattern } => {
            let name = builder.push_text(field);
            let value_check = compile_value_check(*op, pattern, builder);
            format!("(_aux.field->>'name' = ${name} AND {value_check})")
        }
        Condition::ResourceTypeIs(type_name) => {
            let name = builder.push_text("type");
            let value = builder.push_text(type_name);
            format!("(_aux.field->>'name' = ${name} AND _aux.field->>'value' = ${value})")
        }
        Condition::Yes => "TRUE".to_string(),
        Condition::No => "FALSE".to_string(),
        Condition::AccessIsAllowed { params, .. } => compile_allow_fragment(params, builder),
        Condition::All(_) => {
            // leaves() never yields a conjunction
            "TRUE".to_string()
        }
    }
}

fn compile_value_check(op: CmpOp, pattern: &str, builder: &mut SqlBuilder) -> String {
    let placeholder = builder.push_text(pattern);
    let value = "lower(_aux.field->>'value')";
    match op {
        CmpOp::Equal => format!("{value} = lower(${placeholder})"),
        CmpOp::NotEqual => format!("{value} != lower(${placeholder})"),
        CmpOp::GreaterThan => format!("{value} > lower(${placeholder})"),
        CmpOp::GreaterOrEqual => format!("{value} >= lower(${placeholder})"),
        CmpOp::LessThan => format!("{value} < lower(${placeholder})"),
        CmpOp::LessOrEqual => format!("{value} <= lower(${placeholder})"),
        CmpOp::Contains => format!("{value} LIKE '%' || lower(${placeholder}) || '%'"),
        CmpOp::Startswith => format!("{value} LIKE lower(${placeholder}) || '%'"),
    }
}
