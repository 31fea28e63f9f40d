//! Parser for the slash-delimited search mini-language.
//!
//! A search URL segment like `exact/full_name/James%20Bond/sort/age` is a
//! sequence of operator words, each consuming a fixed number of argument
//! words. Comparison operators accumulate into one conjunction; the other
//! operators configure projection, sorting and paging.

use std::collections::VecDeque;

use percent_encoding::percent_decode_str;
use thiserror::Error;

use crate::cond::{CmpOp, Condition};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SearchError {
    #[error("no search condition given")]
    NoCondition,

    #[error("unknown search operator {0}")]
    UnknownOperator(String),

    #[error("not enough arguments for /{0}")]
    NotEnoughArguments(String),

    #[error("/{op} takes an integer, got {value}")]
    BadInteger { op: &'static str, value: String },

    #[error("/offset may only be used once")]
    OffsetAgain,

    #[error("/limit may only be used once")]
    LimitAgain,

    #[error("/show_all and /show conflict")]
    ShowConflict,

    #[error("/offset and /limit are only valid together with /sort")]
    NeedSort,
}

impl SearchError {
    /// `NeedSort` gets its own error code at the HTTP boundary; every other
    /// variant is a generic bad-search-condition.
    pub fn is_need_sort(&self) -> bool {
        matches!(self, Self::NeedSort)
    }
}

/// The outcome of parsing a search: condition, projection, sorting and
/// paging.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchParameters {
    pub cond: Option<Condition>,
    pub show_all: bool,
    pub show_fields: Vec<String>,
    pub sort_keys: Vec<String>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl SearchParameters {
    fn add_cond(&mut self, cond: Condition) {
        self.cond = Some(match self.cond.take() {
            None => cond,
            Some(Condition::All(mut conds)) => {
                conds.push(cond);
                Condition::All(conds)
            }
            Some(existing) => Condition::All(vec![existing, cond]),
        });
    }

    fn add_show_field(&mut self, field: String) -> Result<(), SearchError> {
        if self.show_all {
            return Err(SearchError::ShowConflict);
        }
        self.show_fields.push(field);
        Ok(())
    }

    fn set_show_all(&mut self) -> Result<(), SearchError> {
        if !self.show_fields.is_empty() {
            return Err(SearchError::ShowConflict);
        }
        self.show_all = true;
        Ok(())
    }

    fn set_offset(&mut self, offset: usize) -> Result<(), SearchError> {
        if self.offset.is_some() {
            return Err(SearchError::OffsetAgain);
        }
        self.offset = Some(offset);
        Ok(())
    }

    fn set_limit(&mut self, limit: usize) -> Result<(), SearchError> {
        if self.limit.is_some() {
            return Err(SearchError::LimitAgain);
        }
        self.limit = Some(limit);
        Ok(())
    }
}

/// Parses raw (still percent-encoded) search criteria.
pub fn parse(criteria: &str) -> Result<SearchParameters, SearchError> {
    if criteria.is_empty() {
        return Err(SearchError::NoCondition);
    }

    let mut words: VecDeque<String> = criteria.split('/').map(unquote).collect();
    let mut sp = SearchParameters::default();

    while let Some(operator) = words.pop_front() {
        match operator.as_str() {
            "show_all" => sp.set_show_all()?,
            "show" => {
                let mut args = take_args(&mut words, &operator, 1)?;
                sp.add_show_field(args.remove(0))?;
            }
            "sort" => {
                let mut args = take_args(&mut words, &operator, 1)?;
                sp.sort_keys.push(args.remove(0));
            }
            "offset" => {
                let args = take_args(&mut words, &operator, 1)?;
                sp.set_offset(parse_integer("offset", &args[0])?)?;
            }
            "limit" => {
                let args = take_args(&mut words, &operator, 1)?;
                sp.set_limit(parse_integer("limit", &args[0])?)?;
            }
            op => {
                let cmp_op = comparison_operator(op)
                    .ok_or_else(|| SearchError::UnknownOperator(op.to_string()))?;
                let mut args = take_args(&mut words, &operator, 2)?;
                let pattern = args.remove(1);
                let field = args.remove(0);
                sp.add_cond(Condition::cmp(cmp_op, field, pattern));
            }
        }
    }

    let has_sort = !sp.sort_keys.is_empty();
    if (sp.offset.is_some() || sp.limit.is_some()) && !has_sort {
        return Err(SearchError::NeedSort);
    }

    Ok(sp)
}

fn comparison_operator(word: &str) -> Option<CmpOp> {
    match word {
        "exact" => Some(CmpOp::Equal),
        "ne" => Some(CmpOp::NotEqual),
        "gt" => Some(CmpOp::GreaterThan),
        "ge" => Some(CmpOp::GreaterOrEqual),
        "lt" => Some(CmpOp::LessThan),
        "le" => Some(CmpOp::LessOrEqual),
        "contains" => Some(CmpOp::Contains),
        "startswith" => Some(CmpOp::Startswith),
        _ => None,
    }
}

fn take_args(
    words: &mut VecDeque<String>,
    operator: &str,
    count: usize,
) -> Result<Vec<String>, SearchError> {
    if words.len() < count {
        return Err(SearchError::NotEnoughArguments(operator.to_string()));
    }
    Ok(words.drain(..count).collect())
}

fn parse_integer(op: &'static str, word: &str) -> Result<usize, SearchError> {
    word.parse().map_err(|_| SearchError::BadInteger {
        op,
        value: word.to_string(),
    })
}

fn unquote(word: &str) -> String {
    percent_decode_str(word).decode_utf8_lossy().into_owned()
}
