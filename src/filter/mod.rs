//! Structured metadata filters
//!
//! A filter is a tree of comparisons (`{field, operator, value}`) joined by
//! logical nodes (`{operator: AND|OR, conditions: [...]}`). Trees are parsed
//! from JSON and compiled into parameterized SQL predicates by [`compile`].

use std::fmt;

use serde_json::{Map, Value, json};
use thiserror::Error;

mod compile;

pub use compile::{CompiledFilter, SqlParam, compile, compile_from};

/// Caller error in a filter tree. Never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("filter must be a JSON object, got {0}")]
    NotAnObject(String),

    #[error("missing '{key}' key in {node} filter")]
    MissingKey {
        key: &'static str,
        node: &'static str,
    },

    #[error("unknown operator '{0}'")]
    UnknownOperator(String),

    #[error("'conditions' of '{operator}' filter must be a list")]
    ConditionsNotList { operator: String },

    #[error("'field' must be a string, got {0}")]
    FieldNotString(String),

    #[error("unknown field '{0}' (expected id, content, blob_mime_type or meta.<key>)")]
    UnknownField(String),

    #[error("invalid metadata key '{key}' in field '{field}'")]
    InvalidMetadataKey { field: String, key: String },

    #[error("operator '{operator}' on field '{field}' {reason}")]
    TypeMismatch {
        field: String,
        operator: String,
        reason: String,
    },

    #[error(
        "operator '{operator}' on field '{field}' compares strings only as ISO-8601 dates, got '{value}'"
    )]
    InvalidDate {
        field: String,
        operator: String,
        value: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Like,
    NotLike,
}

impl ComparisonOperator {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::In => "in",
            Self::NotIn => "not in",
            Self::Like => "like",
            Self::NotLike => "not like",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let op = match raw {
            "==" => Self::Eq,
            "!=" => Self::Ne,
            ">" => Self::Gt,
            ">=" => Self::Gte,
            "<" => Self::Lt,
            "<=" => Self::Lte,
            "in" => Self::In,
            "not in" => Self::NotIn,
            "like" => Self::Like,
            "not like" => Self::NotLike,
            _ => return None,
        };
        Some(op)
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalOperator {
    And,
    Or,
}

impl LogicalOperator {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        if raw.eq_ignore_ascii_case("and") {
            Some(Self::And)
        } else if raw.eq_ignore_ascii_case("or") {
            Some(Self::Or)
        } else {
            None
        }
    }
}

/// A single `{field, operator, value}` test.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub field: String,
    pub operator: ComparisonOperator,
    pub value: Value,
}

/// An AND/OR node over nested filters.
#[derive(Debug, Clone, PartialEq)]
pub struct Logical {
    pub operator: LogicalOperator,
    pub conditions: Vec<Filter>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Comparison(Comparison),
    Logical(Logical),
}

impl Filter {
    pub fn comparison(
        field: impl Into<String>,
        operator: ComparisonOperator,
        value: impl Into<Value>,
    ) -> Self {
        Self::Comparison(Comparison {
            field: field.into(),
            operator,
            value: value.into(),
        })
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::comparison(field, ComparisonOperator::Eq, value)
    }

    pub fn and(conditions: Vec<Self>) -> Self {
        Self::Logical(Logical {
            operator: LogicalOperator::And,
            conditions,
        })
    }

    pub fn or(conditions: Vec<Self>) -> Self {
        Self::Logical(Logical {
            operator: LogicalOperator::Or,
            conditions,
        })
    }

    /// Parse the structured wire form.
    pub fn from_json(value: &Value) -> Result<Self, FilterError> {
        let Value::Object(node) = value else {
            return Err(FilterError::NotAnObject(type_name(value).to_string()));
        };

        let operator = node.get("operator");
        let is_comparison = node.contains_key("field")
            || operator
                .and_then(Value::as_str)
                .and_then(ComparisonOperator::parse)
                .is_some();

        if is_comparison {
            parse_comparison(node)
        } else {
            parse_logical(node)
        }
    }

    /// Parse a filter as sent by the front-end.
    ///
    /// Accepts the structured form or a flat `{"key": value}` map, which
    /// becomes an AND of `meta.<key> == value`, or `meta.<key> in value` when
    /// the value is a list. `null` and `{}` mean no filter.
    pub fn parse_request(value: &Value) -> Result<Option<Self>, FilterError> {
        match value {
            Value::Null => Ok(None),
            Value::Object(map) if map.is_empty() => Ok(None),
            Value::Object(map)
                if !["operator", "conditions", "field"]
                    .iter()
                    .any(|key| map.contains_key(*key)) =>
            {
                let conditions = map
                    .iter()
                    .map(|(key, value)| {
                        let field = if key.starts_with("meta.") {
                            key.clone()
                        } else {
                            format!("meta.{key}")
                        };
                        match value {
                            Value::Array(_) => {
                                Self::comparison(field, ComparisonOperator::In, value.clone())
                            }
                            _ => Self::eq(field, value.clone()),
                        }
                    })
                    .collect();
                Ok(Some(Self::and(conditions)))
            }
            other => Self::from_json(other).map(Some),
        }
    }

    /// Render back to the structured wire form.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Comparison(c) => json!({
                "field": c.field,
                "operator": c.operator.as_str(),
                "value": c.value,
            }),
            Self::Logical(l) => json!({
                "operator": l.operator.as_str(),
                "conditions": l.conditions.iter().map(Self::to_json).collect::<Vec<_>>(),
            }),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

fn parse_comparison(node: &Map<String, Value>) -> Result<Filter, FilterError> {
    let field = match node.get("field") {
        Some(Value::String(field)) => field.clone(),
        Some(other) => return Err(FilterError::FieldNotString(type_name(other).to_string())),
        None => {
            return Err(FilterError::MissingKey {
                key: "field",
                node: "comparison",
            });
        }
    };
    let raw_operator = node
        .get("operator")
        .ok_or(FilterError::MissingKey {
            key: "operator",
            node: "comparison",
        })?;
    let operator = raw_operator
        .as_str()
        .and_then(ComparisonOperator::parse)
        .ok_or_else(|| FilterError::UnknownOperator(operator_text(raw_operator)))?;
    let value = node
        .get("value")
        .cloned()
        .ok_or(FilterError::MissingKey {
            key: "value",
            node: "comparison",
        })?;

    Ok(Filter::Comparison(Comparison {
        field,
        operator,
        value,
    }))
}

fn parse_logical(node: &Map<String, Value>) -> Result<Filter, FilterError> {
    let raw_operator = node.get("operator").ok_or(FilterError::MissingKey {
        key: "operator",
        node: "logical",
    })?;
    let operator = raw_operator
        .as_str()
        .and_then(LogicalOperator::parse)
        .ok_or_else(|| FilterError::UnknownOperator(operator_text(raw_operator)))?;
    let conditions = match node.get("conditions") {
        Some(Value::Array(items)) => items
            .iter()
            .map(Filter::from_json)
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => {
            return Err(FilterError::ConditionsNotList {
                operator: operator.as_str().to_string(),
            });
        }
        None => {
            return Err(FilterError::MissingKey {
                key: "conditions",
                node: "logical",
            });
        }
    };

    Ok(Filter::Logical(Logical {
        operator,
        conditions,
    }))
}

fn operator_text(value: &Value) -> String {
    value
        .as_str()
        .map_or_else(|| value.to_string(), ToString::to_string)
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}
