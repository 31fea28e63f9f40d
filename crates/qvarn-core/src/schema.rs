//! Schema extraction for prototypes and resources.
//!
//! A schema is the flat list of `(path, leaf kind)` pairs obtained by walking
//! a JSON tree. The same walk is applied to a prototype (to learn which
//! fields are allowed) and to a resource (to learn which fields it actually
//! carries), and validation compares the two lists.

use serde_json::Value;

/// Kind of a list element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElemKind {
    Str,
    Int,
    Bool,
    Map,
    Null,
}

/// Kind of a leaf field. Lists record the kind of their first element;
/// an empty list records `List(None)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafKind {
    Str,
    Int,
    Bool,
    Null,
    List(Option<ElemKind>),
}

/// One entry of a schema: the path of a leaf and its kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaEntry {
    pub path: Vec<String>,
    pub kind: LeafKind,
}

/// Computes the schema of a JSON value.
///
/// Mappings contribute their fields recursively; a list contributes one
/// entry for the list itself and, when its elements are mappings, the
/// entries of the first element under the same path.
pub fn schema(value: &Value) -> Vec<SchemaEntry> {
    let mut out = Vec::new();
    let mut path = Vec::new();
    walk(&mut path, value, &mut out);
    out.sort_by(|a, b| a.path.cmp(&b.path));
    out
}

fn walk(path: &mut Vec<String>, value: &Value, out: &mut Vec<SchemaEntry>) {
    match value {
        Value::Object(map) => {
            for (key, field) in map {
                path.push(key.clone());
                walk(path, field, out);
                path.pop();
            }
        }
        Value::Array(items) => {
            out.push(SchemaEntry {
                path: path.clone(),
                kind: LeafKind::List(items.first().map(elem_kind)),
            });
            if let Some(first) = items.first() {
                if first.is_object() {
                    walk(path, first, out);
                }
            }
        }
        leaf => {
            out.push(SchemaEntry {
                path: path.clone(),
                kind: leaf_kind(leaf),
            });
        }
    }
}

fn elem_kind(value: &Value) -> ElemKind {
    match value {
        Value::String(_) => ElemKind::Str,
        Value::Number(_) => ElemKind::Int,
        Value::Bool(_) => ElemKind::Bool,
        Value::Object(_) => ElemKind::Map,
        _ => ElemKind::Null,
    }
}

fn leaf_kind(value: &Value) -> LeafKind {
    match value {
        Value::String(_) => LeafKind::Str,
        Value::Number(_) => LeafKind::Int,
        Value::Bool(_) => LeafKind::Bool,
        _ => LeafKind::Null,
    }
}

/// Whether an actual leaf kind is acceptable where the prototype declares
/// `wanted`. A `null` leaf and an empty list fit any declaration of the
/// matching shape.
pub fn compatible(actual: LeafKind, wanted: LeafKind) -> bool {
    match (actual, wanted) {
        (LeafKind::Null, _) => true,
        (LeafKind::List(None), LeafKind::List(_)) => true,
        (LeafKind::List(Some(_)), LeafKind::List(None)) => true,
        (LeafKind::List(Some(a)), LeafKind::List(Some(w))) => a == w || a == ElemKind::Null,
        (a, w) => a == w,
    }
}
