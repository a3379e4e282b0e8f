//! Boolean payload filters.
//!
//! The JSON shape mirrors the common vector-store filter DSL:
//!
//! ```json
//! {
//!   "must":     [{"key": "kind", "match": {"value": "entity"}}],
//!   "must_not": [{"key": "eid",  "match": {"value": "asthma"}}]
//! }
//! ```
//!
//! A condition is either a leaf `{key, match}` or a nested filter.
//! Backends evaluate filters in memory ([`Filter::matches`]) or compile
//! them to SQL ([`Filter::to_sql`]).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{GraphError, GraphResult};
use crate::models::{Category, NodeKind, Payload};

/// Deepest nesting accepted by [`Filter::validate`].
pub const MAX_FILTER_DEPTH: usize = 8;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Filter {
    /// Every condition must hold.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must: Vec<Condition>,
    /// No condition may hold.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must_not: Vec<Condition>,
    /// At least one condition must hold (ignored when empty).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub should: Vec<Condition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Condition {
    Field(FieldCondition),
    Nested(Filter),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldCondition {
    pub key: String,
    #[serde(rename = "match")]
    pub matcher: Match,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Match {
    pub value: MatchValue,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MatchValue {
    Bool(bool),
    Integer(i64),
    Keyword(String),
}

impl From<&str> for MatchValue {
    fn from(value: &str) -> Self {
        MatchValue::Keyword(value.to_string())
    }
}

impl From<String> for MatchValue {
    fn from(value: String) -> Self {
        MatchValue::Keyword(value)
    }
}

impl From<i64> for MatchValue {
    fn from(value: i64) -> Self {
        MatchValue::Integer(value)
    }
}

impl From<bool> for MatchValue {
    fn from(value: bool) -> Self {
        MatchValue::Bool(value)
    }
}

impl MatchValue {
    fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (MatchValue::Keyword(expected), Value::String(actual)) => expected == actual,
            (MatchValue::Integer(expected), Value::Number(actual)) => {
                actual.as_i64() == Some(*expected)
            }
            (MatchValue::Bool(expected), Value::Bool(actual)) => expected == actual,
            _ => false,
        }
    }
}

impl Condition {
    /// Leaf equality predicate on a payload key.
    pub fn matches(key: impl Into<String>, value: impl Into<MatchValue>) -> Self {
        Condition::Field(FieldCondition {
            key: key.into(),
            matcher: Match {
                value: value.into(),
            },
        })
    }

    fn eval(&self, payload: &Payload) -> bool {
        match self {
            Condition::Field(field) => payload
                .get(&field.key)
                .is_some_and(|value| field.matcher.value.matches(value)),
            Condition::Nested(filter) => filter.matches(payload),
        }
    }
}

impl From<Filter> for Condition {
    fn from(value: Filter) -> Self {
        Condition::Nested(value)
    }
}

impl Filter {
    /// Filter with the given `must` conditions.
    pub fn must(conditions: impl IntoIterator<Item = Condition>) -> Self {
        Self {
            must: conditions.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Filter with the given `should` conditions.
    pub fn should(conditions: impl IntoIterator<Item = Condition>) -> Self {
        Self {
            should: conditions.into_iter().collect(),
            ..Default::default()
        }
    }

    /// `kind = <kind>`
    pub fn kind(kind: NodeKind) -> Self {
        Self::must([Condition::matches("kind", kind.as_str())])
    }

    /// `kind = entity AND category = <category>`
    pub fn entities_in(category: Category) -> Self {
        Self::kind(NodeKind::Entity).and(Condition::matches("category", category.as_str()))
    }

    pub fn and(mut self, condition: Condition) -> Self {
        self.must.push(condition);
        self
    }

    pub fn and_not(mut self, condition: Condition) -> Self {
        self.must_not.push(condition);
        self
    }

    pub fn or(mut self, condition: Condition) -> Self {
        self.should.push(condition);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.must.is_empty() && self.must_not.is_empty() && self.should.is_empty()
    }

    /// Evaluate the filter against a payload.
    ///
    /// A missing key never matches, so `must_not` on a missing key passes.
    pub fn matches(&self, payload: &Payload) -> bool {
        self.must.iter().all(|c| c.eval(payload))
            && !self.must_not.iter().any(|c| c.eval(payload))
            && (self.should.is_empty() || self.should.iter().any(|c| c.eval(payload)))
    }

    /// Reject malformed predicates before they reach a backend.
    pub fn validate(&self) -> GraphResult<()> {
        self.validate_at(1)
    }

    fn validate_at(&self, depth: usize) -> GraphResult<()> {
        if depth > MAX_FILTER_DEPTH {
            return Err(GraphError::InvalidFilter(format!(
                "filter nesting exceeds {MAX_FILTER_DEPTH} levels"
            )));
        }
        for condition in self.conditions() {
            match condition {
                Condition::Field(field) => validate_key(&field.key)?,
                Condition::Nested(filter) => filter.validate_at(depth + 1)?,
            }
        }
        Ok(())
    }

    fn conditions(&self) -> impl Iterator<Item = &Condition> {
        self.must
            .iter()
            .chain(self.must_not.iter())
            .chain(self.should.iter())
    }

    /// Compile into a SQL boolean expression over a JSON `payload` column.
    ///
    /// Each leaf becomes `json_extract(payload, ?) IS ?`; the returned
    /// binds hold the JSON path and value for every placeholder, in order.
    /// `IS` keeps missing keys false rather than NULL, which matches
    /// [`Filter::matches`] under `NOT`.
    pub fn to_sql(&self) -> GraphResult<(String, Vec<SqlBind>)> {
        self.validate()?;
        let mut binds = Vec::new();
        let sql = self.compile(&mut binds);
        Ok((sql, binds))
    }

    fn compile(&self, binds: &mut Vec<SqlBind>) -> String {
        let mut clauses = Vec::new();

        for condition in &self.must {
            clauses.push(compile_condition(condition, binds));
        }
        for condition in &self.must_not {
            clauses.push(format!("NOT ({})", compile_condition(condition, binds)));
        }
        if !self.should.is_empty() {
            let any = self
                .should
                .iter()
                .map(|condition| compile_condition(condition, binds))
                .collect::<Vec<_>>()
                .join(" OR ");
            clauses.push(format!("({any})"));
        }

        if clauses.is_empty() {
            "1".to_string()
        } else {
            clauses.join(" AND ")
        }
    }
}

/// A value bound to a placeholder produced by [`Filter::to_sql`].
#[derive(Debug, Clone, PartialEq)]
pub enum SqlBind {
    Text(String),
    Integer(i64),
}

fn compile_condition(condition: &Condition, binds: &mut Vec<SqlBind>) -> String {
    match condition {
        Condition::Field(field) => {
            let path = format!("$.{}", field.key);
            match &field.matcher.value {
                MatchValue::Keyword(value) => {
                    binds.push(SqlBind::Text(path));
                    binds.push(SqlBind::Text(value.clone()));
                    "json_extract(payload, ?) IS ?".to_string()
                }
                // json_extract yields 1/0 for JSON booleans, so check the type too.
                MatchValue::Integer(value) => {
                    binds.push(SqlBind::Text(path.clone()));
                    binds.push(SqlBind::Text(path));
                    binds.push(SqlBind::Integer(*value));
                    "(json_type(payload, ?) IS 'integer' AND json_extract(payload, ?) IS ?)"
                        .to_string()
                }
                MatchValue::Bool(value) => {
                    binds.push(SqlBind::Text(path));
                    binds.push(SqlBind::Text(value.to_string()));
                    "json_type(payload, ?) IS ?".to_string()
                }
            }
        }
        Condition::Nested(filter) => format!("({})", filter.compile(binds)),
    }
}

fn validate_key(key: &str) -> GraphResult<()> {
    let mut chars = key.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(GraphError::InvalidFilter(format!(
            "invalid payload key: {key:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn deserializes_dsl_shape() {
        let filter: Filter = serde_json::from_value(json!({
            "must": [
                {"key": "kind", "match": {"value": "relation"}},
                {"should": [
                    {"key": "source_eid", "match": {"value": "asthma"}},
                    {"key": "dest_eid", "match": {"value": "asthma"}}
                ]}
            ],
            "must_not": [{"key": "weight", "match": {"value": 3}}]
        }))
        .unwrap();

        assert_eq!(filter.must.len(), 2);
        assert!(matches!(filter.must[1], Condition::Nested(_)));
        assert_eq!(
            filter.must_not[0],
            Condition::matches("weight", MatchValue::Integer(3))
        );
    }

    #[test]
    fn misspelled_leaf_is_an_error() {
        let result: Result<Filter, _> = serde_json::from_value(json!({
            "must": [{"key": "kind", "mach": {"value": "entity"}}]
        }));
        assert!(result.is_err());
    }

    #[test]
    fn serializes_without_empty_clauses() {
        let filter = Filter::kind(NodeKind::Entity);
        assert_eq!(
            serde_json::to_value(&filter).unwrap(),
            json!({"must": [{"key": "kind", "match": {"value": "entity"}}]})
        );
    }

    #[test]
    fn evaluates_must_and_must_not() {
        let filter = Filter::kind(NodeKind::Entity).and_not(Condition::matches("eid", "asthma"));

        assert!(filter.matches(&payload(json!({"kind": "entity", "eid": "copd"}))));
        assert!(!filter.matches(&payload(json!({"kind": "entity", "eid": "asthma"}))));
        assert!(!filter.matches(&payload(json!({"kind": "relation", "eid": "copd"}))));
        // must_not on a missing key passes
        assert!(filter.matches(&payload(json!({"kind": "entity"}))));
    }

    #[test]
    fn evaluates_should_and_typed_values() {
        let filter = Filter::should([
            Condition::matches("active", true),
            Condition::matches("rank", 2i64),
        ]);
        assert!(filter.matches(&payload(json!({"active": true}))));
        assert!(filter.matches(&payload(json!({"rank": 2}))));
        assert!(!filter.matches(&payload(json!({"active": "true", "rank": 3}))));
        assert!(Filter::default().matches(&payload(json!({}))));
    }

    #[test]
    fn rejects_invalid_keys() {
        for key in ["", "a.b", "1abc", "eid'); --", "with space"] {
            let filter = Filter::must([Condition::matches(key, "x")]);
            assert!(
                matches!(filter.validate(), Err(GraphError::InvalidFilter(_))),
                "key {key:?} should be rejected"
            );
        }
        assert!(Filter::must([Condition::matches("source_eid", "x")])
            .validate()
            .is_ok());
    }

    #[test]
    fn rejects_excessive_nesting() {
        let mut filter = Filter::kind(NodeKind::Entity);
        for _ in 0..MAX_FILTER_DEPTH {
            filter = Filter::must([Condition::Nested(filter)]);
        }
        assert!(matches!(
            filter.validate(),
            Err(GraphError::InvalidFilter(_))
        ));
    }

    #[test]
    fn compiles_to_sql_with_binds() {
        let filter = Filter::kind(NodeKind::Entity)
            .and_not(Condition::matches("eid", "asthma"))
            .or(Condition::matches("category", "condition"))
            .or(Condition::matches("flag", true));
        let (sql, binds) = filter.to_sql().unwrap();

        assert_eq!(
            sql,
            "json_extract(payload, ?) IS ? AND NOT (json_extract(payload, ?) IS ?) AND \
             (json_extract(payload, ?) IS ? OR json_type(payload, ?) IS ?)"
        );
        assert_eq!(binds.len(), 8);
        assert_eq!(binds[0], SqlBind::Text("$.kind".to_string()));
        assert_eq!(binds[3], SqlBind::Text("asthma".to_string()));
        assert_eq!(binds[6], SqlBind::Text("$.flag".to_string()));
        assert_eq!(binds[7], SqlBind::Text("true".to_string()));
    }

    #[test]
    fn empty_filter_compiles_to_true() {
        let (sql, binds) = Filter::default().to_sql().unwrap();
        assert_eq!(sql, "1");
        assert!(binds.is_empty());
    }
}
