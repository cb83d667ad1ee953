use crate::core::{DataType, DbError, Result, Value};
use std::fmt;

/// Primary key of an entity: integer or text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKey {
    Integer(i64),
    Text(String),
}

impl EntityKey {
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Integer(i) => Ok(Self::Integer(*i)),
            Value::Text(s) => Ok(Self::Text(s.clone())),
            other => Err(DbError::ValidationError(format!(
                "{} cannot be used as a primary key",
                other.type_name()
            ))),
        }
    }

    /// Parse a key from its JSON form: a number, a string, or an object
    /// carrying the key under `pk_field`.
    pub fn from_json(json: &serde_json::Value, pk_field: &str) -> Result<Self> {
        match json {
            serde_json::Value::Number(n) => n.as_i64().map(Self::Integer).ok_or_else(|| {
                DbError::ValidationError(format!("{} is not a valid primary key", n))
            }),
            serde_json::Value::String(s) => Ok(Self::Text(s.clone())),
            serde_json::Value::Object(map) => match map.get(pk_field) {
                Some(inner) if !inner.is_object() => Self::from_json(inner, pk_field),
                _ => Err(DbError::ValidationError(format!(
                    "Reference {} has no '{}'",
                    json, pk_field
                ))),
            },
            other => Err(DbError::ValidationError(format!(
                "{} is not a valid primary key",
                other
            ))),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Integer(i) => Value::Integer(*i),
            Self::Text(s) => Value::Text(s.clone()),
        }
    }

    pub fn matches_type(&self, data_type: &DataType) -> bool {
        matches!(
            (self, data_type),
            (Self::Integer(_), DataType::Integer) | (Self::Text(_), DataType::Text)
        )
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(i) => write!(f, "{}", i),
            Self::Text(s) => write!(f, "'{}'", s),
        }
    }
}

impl From<i64> for EntityKey {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for EntityKey {
    fn from(v: i32) -> Self {
        Self::Integer(v as i64)
    }
}

impl From<&str> for EntityKey {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for EntityKey {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_from_json_forms() {
        assert_eq!(EntityKey::from_json(&json!(3), "id").unwrap(), EntityKey::Integer(3));
        assert_eq!(EntityKey::from_json(&json!("a"), "id").unwrap(), EntityKey::from("a"));
        assert_eq!(EntityKey::from_json(&json!({ "id": 7 }), "id").unwrap(), EntityKey::from(7));
        assert!(EntityKey::from_json(&json!(1.5), "id").is_err());
        assert!(EntityKey::from_json(&json!({ "name": "x" }), "id").is_err());
    }

    #[test]
    fn test_key_value_conversion() {
        assert_eq!(EntityKey::from(5).to_value(), Value::Integer(5));
        assert!(EntityKey::from_value(&Value::Boolean(true)).is_err());
        assert!(EntityKey::from("x").matches_type(&DataType::Text));
        assert!(!EntityKey::from("x").matches_type(&DataType::Integer));
    }
}
