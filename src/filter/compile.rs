//! Filter tree → parameterized SQL predicate
//!
//! Values always travel in the parameter list; only validated field
//! accessors and fixed keywords are written into the predicate text.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;

use super::{Comparison, ComparisonOperator, Filter, FilterError, Logical, LogicalOperator};

/// A value bound positionally at execute time.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    TextArray(Vec<String>),
    IntArray(Vec<i64>),
    FloatArray(Vec<f64>),
    BoolArray(Vec<bool>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFilter {
    /// Boolean SQL expression using `$n` placeholders.
    pub predicate: String,
    pub params: Vec<SqlParam>,
}

impl CompiledFilter {
    /// Predicate that matches every row, with no parameters.
    pub fn match_all() -> Self {
        Self {
            predicate: "TRUE".to_string(),
            params: Vec::new(),
        }
    }

    /// Number of placeholders this predicate consumes.
    pub fn param_count(&self) -> usize {
        self.params.len()
    }
}

/// Compile with placeholders starting at `$1`.
pub fn compile(filter: &Filter) -> Result<CompiledFilter, FilterError> {
    compile_from(filter, 1)
}

/// Compile with placeholders starting at `$first`.
pub fn compile_from(filter: &Filter, first: usize) -> Result<CompiledFilter, FilterError> {
    let mut compiler = Compiler {
        first,
        params: Vec::new(),
    };
    let predicate = compiler.node(filter)?;
    Ok(CompiledFilter {
        predicate,
        params: compiler.params,
    })
}

struct Compiler {
    first: usize,
    params: Vec<SqlParam>,
}

impl Compiler {
    fn bind(&mut self, param: SqlParam) -> String {
        let index = self.first + self.params.len();
        self.params.push(param);
        format!("${index}")
    }

    fn node(&mut self, filter: &Filter) -> Result<String, FilterError> {
        match filter {
            Filter::Comparison(comparison) => self.comparison(comparison),
            Filter::Logical(logical) => self.logical(logical),
        }
    }

    fn logical(&mut self, logical: &Logical) -> Result<String, FilterError> {
        if logical.conditions.is_empty() {
            return Ok(match logical.operator {
                LogicalOperator::And => "TRUE".to_string(),
                LogicalOperator::Or => "FALSE".to_string(),
            });
        }
        let joiner = match logical.operator {
            LogicalOperator::And => " AND ",
            LogicalOperator::Or => " OR ",
        };
        let parts = logical
            .conditions
            .iter()
            .map(|condition| self.node(condition))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(format!("({})", parts.join(joiner)))
    }

    fn comparison(&mut self, comparison: &Comparison) -> Result<String, FilterError> {
        let field = FieldRef::resolve(&comparison.field)?;
        let op = comparison.operator;
        let mismatch = |reason: &str| FilterError::TypeMismatch {
            field: comparison.field.clone(),
            operator: op.as_str().to_string(),
            reason: reason.to_string(),
        };

        match op {
            ComparisonOperator::Eq | ComparisonOperator::Ne => {
                if comparison.value.is_null() {
                    let test = if op == ComparisonOperator::Eq {
                        "IS NULL"
                    } else {
                        "IS NOT NULL"
                    };
                    return Ok(format!("{} {test}", field.text()));
                }
                let scalar = Scalar::from_value(&comparison.value)
                    .ok_or_else(|| mismatch("expects a scalar value"))?;
                let accessor = field.typed(scalar.kind()).map_err(|reason| mismatch(reason))?;
                let placeholder = self.bind(scalar.into_param());
                let sql_op = if op == ComparisonOperator::Eq {
                    "="
                } else {
                    "IS DISTINCT FROM"
                };
                Ok(format!("{accessor} {sql_op} {placeholder}"))
            }
            ComparisonOperator::Gt
            | ComparisonOperator::Gte
            | ComparisonOperator::Lt
            | ComparisonOperator::Lte => {
                let sql_op = match op {
                    ComparisonOperator::Gt => ">",
                    ComparisonOperator::Gte => ">=",
                    ComparisonOperator::Lt => "<",
                    _ => "<=",
                };
                let scalar = match &comparison.value {
                    Value::Array(_) => return Err(mismatch("does not accept lists")),
                    Value::Null => return Err(mismatch("does not accept null")),
                    other => {
                        Scalar::from_value(other).ok_or_else(|| mismatch("expects a scalar value"))?
                    }
                };
                if let Scalar::Text(text) = scalar {
                    if !is_iso8601(&text) {
                        return Err(FilterError::InvalidDate {
                            field: comparison.field.clone(),
                            operator: op.as_str().to_string(),
                            value: text,
                        });
                    }
                    let placeholder = self.bind(SqlParam::Text(text));
                    return Ok(format!(
                        "({})::timestamptz {sql_op} {placeholder}::timestamptz",
                        field.text()
                    ));
                }
                let accessor = field.typed(scalar.kind()).map_err(|reason| mismatch(reason))?;
                let placeholder = self.bind(scalar.into_param());
                Ok(format!("{accessor} {sql_op} {placeholder}"))
            }
            ComparisonOperator::In | ComparisonOperator::NotIn => {
                let Value::Array(items) = &comparison.value else {
                    return Err(mismatch("expects a list value"));
                };
                let negated = op == ComparisonOperator::NotIn;
                if items.is_empty() {
                    return Ok(if negated { "TRUE" } else { "FALSE" }.to_string());
                }
                let list = ScalarList::from_items(items).map_err(|reason| mismatch(reason))?;
                let accessor = field.typed(list.kind()).map_err(|reason| mismatch(reason))?;
                let placeholder = self.bind(list.into_param());
                if negated {
                    Ok(format!(
                        "({} IS NULL OR {accessor} <> ALL({placeholder}))",
                        field.text()
                    ))
                } else {
                    Ok(format!("{accessor} = ANY({placeholder})"))
                }
            }
            ComparisonOperator::Like | ComparisonOperator::NotLike => {
                let Value::String(pattern) = &comparison.value else {
                    return Err(mismatch("expects a string pattern"));
                };
                let placeholder = self.bind(SqlParam::Text(pattern.clone()));
                if op == ComparisonOperator::Like {
                    Ok(format!("{} LIKE {placeholder}", field.text()))
                } else {
                    Ok(format!(
                        "({text} IS NULL OR {text} NOT LIKE {placeholder})",
                        text = field.text()
                    ))
                }
            }
        }
    }
}

/// Column the comparison targets.
enum FieldRef {
    Column(&'static str),
    Meta(Vec<String>),
}

const COLUMNS: [&str; 3] = ["id", "content", "blob_mime_type"];

impl FieldRef {
    fn resolve(field: &str) -> Result<Self, FilterError> {
        if let Some(column) = COLUMNS.iter().find(|column| **column == field) {
            return Ok(Self::Column(column));
        }
        let Some(path) = field.strip_prefix("meta.") else {
            return Err(FilterError::UnknownField(field.to_string()));
        };
        let keys: Vec<String> = path.split('.').map(str::to_string).collect();
        for key in &keys {
            if !is_metadata_key(key) {
                return Err(FilterError::InvalidMetadataKey {
                    field: field.to_string(),
                    key: key.clone(),
                });
            }
        }
        Ok(Self::Meta(keys))
    }

    /// Accessor yielding the value as text.
    fn text(&self) -> String {
        match self {
            Self::Column(column) => (*column).to_string(),
            Self::Meta(keys) if keys.len() == 1 => format!("meta->>'{}'", keys[0]),
            Self::Meta(keys) => format!("meta#>>'{{{}}}'", keys.join(",")),
        }
    }

    /// Accessor cast to the comparison value's type.
    fn typed(&self, kind: ScalarKind) -> Result<String, &'static str> {
        match (self, kind.cast()) {
            (_, None) => Ok(self.text()),
            (Self::Column(_), Some(_)) => Err("expects a string value for a text column"),
            (Self::Meta(_), Some(cast)) => Ok(format!("({})::{cast}", self.text())),
        }
    }
}

fn is_metadata_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScalarKind {
    Text,
    Int,
    Float,
    Bool,
}

impl ScalarKind {
    const fn cast(self) -> Option<&'static str> {
        match self {
            Self::Text => None,
            Self::Int => Some("bigint"),
            Self::Float => Some("double precision"),
            Self::Bool => Some("boolean"),
        }
    }
}

enum Scalar {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Scalar {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float)),
            _ => None,
        }
    }

    const fn kind(&self) -> ScalarKind {
        match self {
            Self::Text(_) => ScalarKind::Text,
            Self::Int(_) => ScalarKind::Int,
            Self::Float(_) => ScalarKind::Float,
            Self::Bool(_) => ScalarKind::Bool,
        }
    }

    fn into_param(self) -> SqlParam {
        match self {
            Self::Text(v) => SqlParam::Text(v),
            Self::Int(v) => SqlParam::Int(v),
            Self::Float(v) => SqlParam::Float(v),
            Self::Bool(v) => SqlParam::Bool(v),
        }
    }
}

/// Homogeneous list; element type comes from the first item.
enum ScalarList {
    Text(Vec<String>),
    Int(Vec<i64>),
    Float(Vec<f64>),
    Bool(Vec<bool>),
}

impl ScalarList {
    fn from_items(items: &[Value]) -> Result<Self, &'static str> {
        const MIXED: &str = "expects list elements of the same type as the first element";
        let first = items
            .first()
            .and_then(Scalar::from_value)
            .ok_or("expects a list of strings, numbers or booleans")?;
        match first.kind() {
            ScalarKind::Text => items
                .iter()
                .map(|v| v.as_str().map(str::to_string).ok_or(MIXED))
                .collect::<Result<_, _>>()
                .map(Self::Text),
            ScalarKind::Int => items
                .iter()
                .map(|v| v.as_i64().ok_or(MIXED))
                .collect::<Result<_, _>>()
                .map(Self::Int),
            ScalarKind::Float => items
                .iter()
                .map(|v| v.as_f64().ok_or(MIXED))
                .collect::<Result<_, _>>()
                .map(Self::Float),
            ScalarKind::Bool => items
                .iter()
                .map(|v| v.as_bool().ok_or(MIXED))
                .collect::<Result<_, _>>()
                .map(Self::Bool),
        }
    }

    const fn kind(&self) -> ScalarKind {
        match self {
            Self::Text(_) => ScalarKind::Text,
            Self::Int(_) => ScalarKind::Int,
            Self::Float(_) => ScalarKind::Float,
            Self::Bool(_) => ScalarKind::Bool,
        }
    }

    fn into_param(self) -> SqlParam {
        match self {
            Self::Text(v) => SqlParam::TextArray(v),
            Self::Int(v) => SqlParam::IntArray(v),
            Self::Float(v) => SqlParam::FloatArray(v),
            Self::Bool(v) => SqlParam::BoolArray(v),
        }
    }
}

fn is_iso8601(value: &str) -> bool {
    DateTime::parse_from_rfc3339(value).is_ok()
        || NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f").is_ok()
        || NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_snapshot;
    use serde_json::json;

    fn compiled(raw: Value) -> CompiledFilter {
        compile(&Filter::from_json(&raw).unwrap()).unwrap()
    }

    fn error(raw: Value) -> FilterError {
        compile(&Filter::from_json(&raw).unwrap()).unwrap_err()
    }

    #[test]
    fn metadata_equality_binds_one_parameter() {
        let out = compiled(json!({"field": "meta.author", "operator": "==", "value": "Ann"}));
        assert_eq!(out.predicate, "meta->>'author' = $1");
        assert_eq!(out.params, vec![SqlParam::Text("Ann".into())]);
    }

    #[test]
    fn conjunction_concatenates_parameters_in_order() {
        let out = compiled(json!({
            "operator": "AND",
            "conditions": [
                {"field": "meta.author", "operator": "==", "value": "Ann"},
                {"field": "meta.page", "operator": ">=", "value": 2},
                {"operator": "OR", "conditions": [
                    {"field": "meta.draft", "operator": "==", "value": false},
                    {"field": "meta.score", "operator": "<", "value": 0.5}
                ]}
            ]
        }));
        assert_snapshot!(
            out.predicate,
            @"(meta->>'author' = $1 AND (meta->>'page')::bigint >= $2 AND ((meta->>'draft')::boolean = $3 OR (meta->>'score')::double precision < $4))"
        );
        assert_eq!(
            out.params,
            vec![
                SqlParam::Text("Ann".into()),
                SqlParam::Int(2),
                SqlParam::Bool(false),
                SqlParam::Float(0.5),
            ]
        );
    }

    #[test]
    fn numbering_can_start_after_caller_parameters() {
        let filter = Filter::and(vec![
            Filter::eq("meta.a", "x"),
            Filter::eq("meta.b", "y"),
        ]);
        let out = compile_from(&filter, 4).unwrap();
        assert_eq!(out.predicate, "(meta->>'a' = $4 AND meta->>'b' = $5)");
        assert_eq!(out.param_count(), 2);
    }

    #[test]
    fn null_equality_uses_is_null() {
        let out = compiled(json!({"field": "meta.owner", "operator": "==", "value": null}));
        assert_eq!(out.predicate, "meta->>'owner' IS NULL");
        assert!(out.params.is_empty());

        let out = compiled(json!({"field": "content", "operator": "!=", "value": null}));
        assert_eq!(out.predicate, "content IS NOT NULL");
    }

    #[test]
    fn inequality_is_null_safe() {
        let out = compiled(json!({"field": "meta.lang", "operator": "!=", "value": "en"}));
        assert_eq!(out.predicate, "meta->>'lang' IS DISTINCT FROM $1");
    }

    #[test]
    fn membership_infers_element_type_from_first_item() {
        let out = compiled(json!({"field": "meta.page", "operator": "in", "value": [1, 2, 3]}));
        assert_eq!(out.predicate, "(meta->>'page')::bigint = ANY($1)");
        assert_eq!(out.params, vec![SqlParam::IntArray(vec![1, 2, 3])]);

        let out = compiled(json!({"field": "meta.tag", "operator": "not in", "value": ["a"]}));
        assert_eq!(
            out.predicate,
            "(meta->>'tag' IS NULL OR meta->>'tag' <> ALL($1))"
        );
        assert_eq!(out.params, vec![SqlParam::TextArray(vec!["a".into()])]);
    }

    #[test]
    fn empty_membership_lists_are_constant() {
        let out = compiled(json!({"field": "meta.tag", "operator": "in", "value": []}));
        assert_eq!(out.predicate, "FALSE");
        let out = compiled(json!({"field": "meta.tag", "operator": "not in", "value": []}));
        assert_eq!(out.predicate, "TRUE");
    }

    #[test]
    fn mixed_lists_are_rejected() {
        let err = error(json!({"field": "meta.tag", "operator": "in", "value": ["a", 1]}));
        assert!(matches!(err, FilterError::TypeMismatch { ref operator, .. } if operator == "in"));
    }

    #[test]
    fn membership_requires_a_list() {
        let err = error(json!({"field": "meta.tag", "operator": "in", "value": "a"}));
        assert!(err.to_string().contains("expects a list"));
    }

    #[test]
    fn ordering_rejects_lists_and_null() {
        let err = error(json!({"field": "meta.page", "operator": ">", "value": [1]}));
        assert!(err.to_string().contains("does not accept lists"));
        let err = error(json!({"field": "meta.page", "operator": "<=", "value": null}));
        assert!(err.to_string().contains("does not accept null"));
    }

    #[test]
    fn ordering_on_strings_requires_iso_dates() {
        let out = compiled(json!({"field": "meta.created", "operator": ">", "value": "2024-01-31"}));
        assert_eq!(
            out.predicate,
            "(meta->>'created')::timestamptz > $1::timestamptz"
        );

        let err = error(json!({"field": "meta.created", "operator": "<", "value": "yesterday"}));
        assert_eq!(
            err,
            FilterError::InvalidDate {
                field: "meta.created".into(),
                operator: "<".into(),
                value: "yesterday".into(),
            }
        );
    }

    #[test]
    fn accepts_common_iso8601_shapes() {
        for value in [
            "2024-05-01",
            "2024-05-01T10:00:00",
            "2024-05-01T10:00:00.123",
            "2024-05-01 10:00:00",
            "2024-05-01T10:00:00Z",
            "2024-05-01T10:00:00+02:00",
        ] {
            assert!(is_iso8601(value), "{value}");
        }
        assert!(!is_iso8601("01/05/2024"));
    }

    #[test]
    fn like_patterns_pass_through_unescaped() {
        let out = compiled(json!({"field": "meta.file", "operator": "like", "value": "%_v2.pdf"}));
        assert_eq!(out.predicate, "meta->>'file' LIKE $1");
        assert_eq!(out.params, vec![SqlParam::Text("%_v2.pdf".into())]);

        let err = error(json!({"field": "meta.file", "operator": "not like", "value": 3}));
        assert!(err.to_string().contains("not like"));
    }

    #[test]
    fn nested_metadata_paths_use_path_access() {
        let out = compiled(json!({"field": "meta.source.kind", "operator": "==", "value": "web"}));
        assert_eq!(out.predicate, "meta#>>'{source,kind}' = $1");
    }

    #[test]
    fn unsafe_metadata_keys_are_rejected() {
        let err = error(json!({"field": "meta.a'; DROP TABLE x; --", "operator": "==", "value": 1}));
        assert!(matches!(err, FilterError::InvalidMetadataKey { .. }));
        let err = error(json!({"field": "meta.", "operator": "==", "value": 1}));
        assert!(matches!(err, FilterError::InvalidMetadataKey { .. }));
    }

    #[test]
    fn unknown_columns_are_rejected() {
        let err = error(json!({"field": "embedding", "operator": "==", "value": 1}));
        assert_eq!(err, FilterError::UnknownField("embedding".into()));
    }

    #[test]
    fn text_columns_reject_numeric_values() {
        let err = error(json!({"field": "id", "operator": "==", "value": 5}));
        assert!(matches!(err, FilterError::TypeMismatch { ref field, .. } if field == "id"));
    }

    #[test]
    fn values_never_appear_in_predicate_text() {
        let out = compiled(json!({
            "operator": "OR",
            "conditions": [
                {"field": "meta.a", "operator": "==", "value": "'; DELETE FROM docs; --"},
                {"field": "content", "operator": "like", "value": "%secret%"}
            ]
        }));
        assert!(!out.predicate.contains("DELETE"));
        assert!(!out.predicate.contains("secret"));
    }

    #[test]
    fn empty_logical_nodes_are_identities() {
        assert_eq!(compile(&Filter::and(vec![])).unwrap().predicate, "TRUE");
        assert_eq!(compile(&Filter::or(vec![])).unwrap().predicate, "FALSE");
    }
}
