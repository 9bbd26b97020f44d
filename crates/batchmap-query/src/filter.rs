//! Filter expressions.
//!
//! A [`Filter`] is either a structured condition over one field, a
//! conjunction of filters, or a raw fragment that only a specific backend
//! understands. The identity map never inspects filters beyond combining
//! them with scope conditions.

use batchmap_core::Value;
use std::fmt;

/// Comparison operators for structured conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// Equal (=)
    Eq,
    /// Not equal (<>)
    Ne,
    /// Less than (<)
    Lt,
    /// Less than or equal (<=)
    Le,
    /// Greater than (>)
    Gt,
    /// Greater than or equal (>=)
    Ge,
    /// Membership in an array value (IN)
    In,
    /// Pattern match with `%` and `_` wildcards (LIKE)
    Like,
    /// IS NULL
    IsNull,
    /// IS NOT NULL
    IsNotNull,
}

impl Operator {
    /// Get the SQL-style representation of this operator.
    pub const fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "<>",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::In => "IN",
            Operator::Like => "LIKE",
            Operator::IsNull => "IS NULL",
            Operator::IsNotNull => "IS NOT NULL",
        }
    }

    /// Whether the operator takes no operand.
    pub const fn is_unary(self) -> bool {
        matches!(self, Operator::IsNull | Operator::IsNotNull)
    }
}

/// A filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `field <op> value`
    Condition {
        field: String,
        op: Operator,
        value: Value,
    },
    /// All of the contained filters must hold.
    And(Vec<Filter>),
    /// Backend-specific text passed through untouched.
    Raw(String),
}

impl Filter {
    /// Build a condition.
    pub fn condition(field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        Filter::Condition {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// `field = value`
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::condition(field, Operator::Eq, value)
    }

    /// `field <> value`
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::condition(field, Operator::Ne, value)
    }

    /// `field < value`
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::condition(field, Operator::Lt, value)
    }

    /// `field <= value`
    pub fn le(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::condition(field, Operator::Le, value)
    }

    /// `field > value`
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::condition(field, Operator::Gt, value)
    }

    /// `field >= value`
    pub fn ge(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::condition(field, Operator::Ge, value)
    }

    /// `field IN (values...)`
    pub fn in_list<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::condition(
            field,
            Operator::In,
            Value::Array(values.into_iter().map(Into::into).collect()),
        )
    }

    /// `field LIKE pattern`
    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::condition(field, Operator::Like, Value::Text(pattern.into()))
    }

    /// `field IS NULL`
    pub fn is_null(field: impl Into<String>) -> Self {
        Self::condition(field, Operator::IsNull, Value::Null)
    }

    /// `field IS NOT NULL`
    pub fn is_not_null(field: impl Into<String>) -> Self {
        Self::condition(field, Operator::IsNotNull, Value::Null)
    }

    /// Backend-specific text.
    pub fn raw(text: impl Into<String>) -> Self {
        Filter::Raw(text.into())
    }

    /// Equality when `value` is a scalar, membership when it is an array.
    pub fn matching(field: impl Into<String>, value: Value) -> Self {
        match value {
            Value::Array(_) => Self::condition(field, Operator::In, value),
            Value::Null => Self::is_null(field),
            other => Self::eq(field, other),
        }
    }

    /// Combine with another filter, flattening nested conjunctions.
    #[must_use]
    pub fn and(self, other: Filter) -> Self {
        let mut parts = match self {
            Filter::And(parts) => parts,
            single => vec![single],
        };
        match other {
            Filter::And(more) => parts.extend(more),
            single => parts.push(single),
        }
        Filter::And(parts)
    }

    /// Whether a raw fragment appears anywhere in the filter.
    pub fn contains_raw(&self) -> bool {
        match self {
            Filter::Raw(_) => true,
            Filter::And(parts) => parts.iter().any(Filter::contains_raw),
            Filter::Condition { .. } => false,
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Condition { field, op, value } => match op {
                op if op.is_unary() => write!(f, "{field} {}", op.as_str()),
                Operator::In => {
                    let items = value
                        .as_array()
                        .map(|items| {
                            items
                                .iter()
                                .map(ToString::to_string)
                                .collect::<Vec<_>>()
                                .join(", ")
                        })
                        .unwrap_or_else(|| value.to_string());
                    write!(f, "{field} IN ({items})")
                }
                op => write!(f, "{field} {} {value}", op.as_str()),
            },
            Filter::And(parts) if parts.is_empty() => write!(f, "TRUE"),
            Filter::And(parts) => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, " AND ")?;
                    }
                    match part {
                        Filter::And(_) => write!(f, "({part})")?,
                        _ => write!(f, "{part}")?,
                    }
                }
                Ok(())
            }
            Filter::Raw(text) => write!(f, "{text}"),
        }
    }
}

/// What a query's filter slot holds.
#[derive(Debug, Clone, PartialEq)]
pub enum Where {
    /// Resolve from the identity map's staged keys instead of filtering.
    Staged,
    /// A filter expression.
    Filter(Filter),
}

impl From<Filter> for Where {
    fn from(filter: Filter) -> Self {
        Where::Filter(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn and_flattens() {
        let filter = Filter::eq("a", 1)
            .and(Filter::gt("b", 2))
            .and(Filter::eq("c", 3).and(Filter::is_null("d")));
        match &filter {
            Filter::And(parts) => assert_eq!(parts.len(), 4),
            other => panic!("expected AND, got {other:?}"),
        }
        assert_eq!(filter.to_string(), "a = 1 AND b > 2 AND c = 3 AND d IS NULL");
    }

    #[test]
    fn matching_picks_operator_from_value() {
        assert_eq!(
            Filter::matching("account_id", Value::from(vec![1i64, 2])).to_string(),
            "account_id IN (1, 2)"
        );
        assert_eq!(
            Filter::matching("account_id", Value::BigInt(7)),
            Filter::eq("account_id", 7)
        );
        assert_eq!(
            Filter::matching("deleted_at", Value::Null),
            Filter::is_null("deleted_at")
        );
    }

    #[test]
    fn raw_is_detected_inside_conjunctions() {
        assert!(!Filter::like("email", "%@example.com").contains_raw());
        assert!(Filter::eq("a", 1).and(Filter::raw("b = lower(c)")).contains_raw());
    }
}
