use crate::core::{DbError, Result, Value};
use serde_json::Value as JsonValue;
use std::fmt;

/// Comparison applied to a scalar field.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `Eq(Value::Null)` matches NULL.
    Eq(Value),
    /// `Ne(Value::Null)` matches anything but NULL.
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
}

impl Condition {
    pub fn operator(&self) -> &'static str {
        match self {
            Self::Eq(v) if v.is_null() => "is",
            Self::Ne(v) if v.is_null() => "is not",
            Self::Eq(_) => "=",
            Self::Ne(_) => "!=",
            Self::Gt(_) => ">",
            Self::Gte(_) => ">=",
            Self::Lt(_) => "<",
            Self::Lte(_) => "<=",
            Self::In(_) => "in",
            Self::Nin(_) => "not in",
        }
    }
}

/// How a collection filter quantifies over related rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionOperator {
    /// At least one related row matches.
    Some,
    /// No related row matches.
    None,
    /// Every related row matches (vacuously true for an empty collection).
    Every,
}

impl CollectionOperator {
    fn from_key(key: &str) -> Option<Self> {
        match key {
            "$some" => Some(Self::Some),
            "$none" => Some(Self::None),
            "$every" => Some(Self::Every),
            _ => None,
        }
    }
}

impl fmt::Display for CollectionOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Some => write!(f, "$some"),
            Self::None => write!(f, "$none"),
            Self::Every => write!(f, "$every"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterNode {
    Field {
        field: String,
        condition: Condition,
    },
    Relation {
        relation: String,
        operator: CollectionOperator,
        filter: Filter,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

/// Conjunction of filter nodes. An empty filter matches every row.
///
/// Built either fluently:
///
/// ```
/// use memorm::query::Filter;
///
/// let filter = Filter::new().some("labels", Filter::new().eq("id", 1));
/// assert!(!filter.is_empty());
/// ```
///
/// or from the JSON operator syntax with [`Filter::from_json`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    nodes: Vec<FilterNode>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> &[FilterNode] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(mut self, node: FilterNode) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn condition(self, field: impl Into<String>, condition: Condition) -> Self {
        self.node(FilterNode::Field {
            field: field.into(),
            condition,
        })
    }

    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.condition(field, Condition::Eq(value.into()))
    }

    pub fn ne(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.condition(field, Condition::Ne(value.into()))
    }

    pub fn gt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.condition(field, Condition::Gt(value.into()))
    }

    pub fn gte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.condition(field, Condition::Gte(value.into()))
    }

    pub fn lt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.condition(field, Condition::Lt(value.into()))
    }

    pub fn lte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.condition(field, Condition::Lte(value.into()))
    }

    pub fn is_in<I, V>(self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.condition(field, Condition::In(values.into_iter().map(Into::into).collect()))
    }

    pub fn not_in<I, V>(self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.condition(field, Condition::Nin(values.into_iter().map(Into::into).collect()))
    }

    pub fn collection(self, relation: impl Into<String>, operator: CollectionOperator, filter: Filter) -> Self {
        self.node(FilterNode::Relation {
            relation: relation.into(),
            operator,
            filter,
        })
    }

    pub fn some(self, relation: impl Into<String>, filter: Filter) -> Self {
        self.collection(relation, CollectionOperator::Some, filter)
    }

    pub fn none(self, relation: impl Into<String>, filter: Filter) -> Self {
        self.collection(relation, CollectionOperator::None, filter)
    }

    pub fn every(self, relation: impl Into<String>, filter: Filter) -> Self {
        self.collection(relation, CollectionOperator::Every, filter)
    }

    pub fn and(self, filters: Vec<Filter>) -> Self {
        self.node(FilterNode::And(filters))
    }

    pub fn or(self, filters: Vec<Filter>) -> Self {
        self.node(FilterNode::Or(filters))
    }

    /// Parse the JSON operator syntax.
    ///
    /// `{"name": "x"}` is equality, `{"age": {"$gte": 18}}` applies an
    /// operator, `{"labels": {"$some": {"id": 1}}}` filters a collection,
    /// and a plain object on a collection (`{"labels": {"id": 1}}`) is
    /// shorthand for `$some`. `$and`/`$or` take arrays of filters.
    pub fn from_json(json: &JsonValue) -> Result<Self> {
        let map = json.as_object().ok_or_else(|| {
            DbError::ValidationError(format!("Filter must be a JSON object, got {}", json))
        })?;

        let mut filter = Filter::new();
        for (key, value) in map {
            filter = match key.as_str() {
                "$and" => filter.and(Self::parse_list(key, value)?),
                "$or" => filter.or(Self::parse_list(key, value)?),
                op if op.starts_with('$') => {
                    return Err(DbError::ValidationError(format!(
                        "Unknown top-level operator '{}'",
                        op
                    )));
                }
                field => Self::parse_field(filter, field, value)?,
            };
        }
        Ok(filter)
    }

    fn parse_list(key: &str, value: &JsonValue) -> Result<Vec<Filter>> {
        value
            .as_array()
            .ok_or_else(|| DbError::ValidationError(format!("'{}' expects an array", key)))?
            .iter()
            .map(Self::from_json)
            .collect()
    }

    fn parse_field(mut filter: Filter, field: &str, value: &JsonValue) -> Result<Filter> {
        let operators = match value {
            JsonValue::Object(map) if map.keys().any(|k| k.starts_with('$')) => map,
            JsonValue::Object(_) => return Ok(filter.some(field, Self::from_json(value)?)),
            JsonValue::Array(items) => {
                return Ok(filter.condition(field, Condition::In(items.iter().map(Value::from_json).collect())));
            }
            scalar => return Ok(filter.eq(field, Value::from_json(scalar))),
        };

        for (op, operand) in operators {
            if let Some(operator) = CollectionOperator::from_key(op) {
                filter = filter.collection(field, operator, Self::from_json(operand)?);
                continue;
            }
            let condition = match op.as_str() {
                "$eq" => Condition::Eq(Value::from_json(operand)),
                "$ne" => Condition::Ne(Value::from_json(operand)),
                "$gt" => Condition::Gt(Value::from_json(operand)),
                "$gte" => Condition::Gte(Value::from_json(operand)),
                "$lt" => Condition::Lt(Value::from_json(operand)),
                "$lte" => Condition::Lte(Value::from_json(operand)),
                "$in" | "$nin" => {
                    let items = operand.as_array().ok_or_else(|| {
                        DbError::ValidationError(format!("'{}' on '{}' expects an array", op, field))
                    })?;
                    let values = items.iter().map(Value::from_json).collect();
                    if op == "$in" {
                        Condition::In(values)
                    } else {
                        Condition::Nin(values)
                    }
                }
                other => {
                    return Err(DbError::ValidationError(format!(
                        "Unknown operator '{}' on '{}'",
                        other, field
                    )));
                }
            };
            filter = filter.condition(field, condition);
        }
        Ok(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_some_matches_builder() {
        let parsed = Filter::from_json(&json!({ "labels": { "$some": { "id": 1 } } })).unwrap();
        let built = Filter::new().some("labels", Filter::new().eq("id", 1));
        assert_eq!(parsed, built);

        let shorthand = Filter::from_json(&json!({ "labels": { "id": 1 } })).unwrap();
        assert_eq!(shorthand, built);
    }

    #[test]
    fn test_json_operators() {
        let parsed = Filter::from_json(&json!({
            "age": { "$gte": 18, "$lt": 65 },
            "name": { "$in": ["a", "b"] },
            "$or": [{ "id": 1 }, { "id": 2 }]
        }))
        .unwrap();
        assert_eq!(parsed.nodes().len(), 4);
        assert!(parsed.nodes().iter().any(|n| matches!(n, FilterNode::Or(fs) if fs.len() == 2)));
    }

    #[test]
    fn test_json_rejects_unknown_operators() {
        assert!(Filter::from_json(&json!({ "age": { "$between": [1, 2] } })).is_err());
        assert!(Filter::from_json(&json!({ "$nor": [] })).is_err());
        assert!(Filter::from_json(&json!([1])).is_err());
        assert!(Filter::from_json(&json!({ "id": { "$in": 3 } })).is_err());
    }
}
