//! Filters compiled for evaluation against in-memory rows.

use batchmap_core::error::{QueryError, QueryErrorKind};
use batchmap_core::{Error, Key, Result, Row, Value};
use batchmap_query::{Filter, Operator};
use regex::Regex;
use std::cmp::Ordering;

#[derive(Debug)]
pub(crate) enum Predicate {
    Compare {
        field: String,
        op: Operator,
        value: Value,
    },
    Like {
        field: String,
        pattern: Regex,
    },
    All(Vec<Predicate>),
}

impl Predicate {
    /// Compile a filter. Raw fragments have no in-memory meaning.
    #[allow(clippy::result_large_err)]
    pub(crate) fn compile(filter: &Filter, entity: &str) -> Result<Self> {
        match filter {
            Filter::Condition {
                field,
                op: Operator::Like,
                value,
            } => {
                let Value::Text(pattern) = value else {
                    return Err(unsupported(entity, format!("LIKE needs a text pattern, got {value}")));
                };
                let pattern = Regex::new(&like_to_regex(pattern))
                    .map_err(|e| unsupported(entity, e.to_string()))?;
                Ok(Predicate::Like {
                    field: field.clone(),
                    pattern,
                })
            }
            Filter::Condition { field, op, value } => Ok(Predicate::Compare {
                field: field.clone(),
                op: *op,
                value: value.clone(),
            }),
            Filter::And(parts) => parts
                .iter()
                .map(|part| Self::compile(part, entity))
                .collect::<Result<Vec<_>>>()
                .map(Predicate::All),
            Filter::Raw(text) => Err(unsupported(
                entity,
                format!("raw filter {text:?} can not be evaluated in memory"),
            )),
        }
    }

    pub(crate) fn matches(&self, row: &Row) -> bool {
        match self {
            Predicate::All(parts) => parts.iter().all(|part| part.matches(row)),
            Predicate::Like { field, pattern } => row
                .get_by_name(field)
                .and_then(Value::as_str)
                .is_some_and(|text| pattern.is_match(text)),
            Predicate::Compare { field, op, value } => {
                let actual = row.get_by_name(field).unwrap_or(&Value::Null);
                compare(actual, *op, value)
            }
        }
    }
}

/// SQL comparison semantics: anything compared with NULL is false.
fn compare(actual: &Value, op: Operator, expected: &Value) -> bool {
    match op {
        Operator::IsNull => actual.is_null(),
        Operator::IsNotNull => !actual.is_null(),
        _ if actual.is_null() => false,
        Operator::In => expected
            .as_array()
            .is_some_and(|items| Key::single(actual.clone()).contained_in(items)),
        _ if expected.is_null() => false,
        op => {
            let ordering = Key::single(actual.clone()).cmp(&Key::single(expected.clone()));
            match op {
                Operator::Eq => ordering == Ordering::Equal,
                Operator::Ne => ordering != Ordering::Equal,
                Operator::Lt => ordering == Ordering::Less,
                Operator::Le => ordering != Ordering::Greater,
                Operator::Gt => ordering == Ordering::Greater,
                Operator::Ge => ordering != Ordering::Less,
                _ => false,
            }
        }
    }
}

fn like_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push_str("(?s)^");
    for c in pattern.chars() {
        match c {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out.push('$');
    out
}

fn unsupported(entity: &str, message: String) -> Error {
    Error::Query(QueryError {
        kind: QueryErrorKind::UnsupportedFilter,
        entity: entity.to_string(),
        message,
        source: None,
    })
}
