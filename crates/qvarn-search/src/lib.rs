//! Search support for Qvarn.
//!
//! Three pieces live here: the condition algebra (a closed sum type that
//! can be evaluated against a JSON object in memory or compiled to a SQL
//! query over the auxiliary field index), the parser for the
//! slash-delimited search mini-language, and the synthesis of the aux-table
//! query with its count-threshold conjunction trick.

pub mod cond;
pub mod parser;
pub mod sql;

pub use cond::{CmpOp, Condition};
pub use parser::{SearchError, SearchParameters, parse};
pub use sql::{SqlParam, SqlQuery, compile_lookup, compile_search};
