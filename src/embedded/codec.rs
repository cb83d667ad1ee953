//! JSON codec for embedded objects.
//!
//! Embedded arrays and nested objects are stored as JSON. Encoding writes
//! dates as `YYYY-MM-DD` and timestamps as RFC 3339 with full fractional
//! precision; decoding parses them back into typed values according to the
//! declared shape.

use super::value::{EmbeddedField, EmbeddedObject};
use crate::core::{DataType, DbError, Result, Value, DATE_FORMAT};
use crate::metadata::{EmbeddableShape, EmbeddedFieldKind, EmbeddedFieldMetadata};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map as JsonMap, Value as JsonValue};

/// Converts JSON scalars into typed values
pub struct JsonToValueConverter;

impl JsonToValueConverter {
    pub fn convert(json_value: &JsonValue, expected_type: &DataType) -> std::result::Result<Value, String> {
        match (json_value, expected_type) {
            (JsonValue::Null, _) => Ok(Value::Null),

            (JsonValue::Bool(b), DataType::Boolean) => Ok(Value::Boolean(*b)),

            (JsonValue::Number(n), DataType::Integer) => n
                .as_i64()
                .map(Value::Integer)
                .ok_or_else(|| format!("Cannot convert {} to INTEGER", n)),

            (JsonValue::Number(n), DataType::Float) => n
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| format!("Cannot convert {} to FLOAT", n)),

            (JsonValue::String(s), DataType::Text) => Ok(Value::Text(s.clone())),

            (JsonValue::String(s), DataType::Timestamp) => DateTime::parse_from_rfc3339(s)
                .map(|dt| Value::Timestamp(dt.with_timezone(&Utc)))
                .map_err(|e| format!("Invalid TIMESTAMP '{}': {}", s, e)),

            (JsonValue::String(s), DataType::Date) => NaiveDate::parse_from_str(s, DATE_FORMAT)
                .map(Value::Date)
                .map_err(|e| format!("Invalid DATE '{}': {}", s, e)),

            (v, DataType::Json) => Ok(Value::Json(v.clone())),

            _ => Err(format!(
                "Cannot convert JSON {} to {}",
                json_value, expected_type
            )),
        }
    }
}

// ============================================================================
// Encoding (write path): shape violations are validation errors
// ============================================================================

/// Check a scalar against its declaration and normalise it (integers
/// widen to floats). Absent or NULL values of nullable fields become NULL.
pub fn encode_scalar(
    field: &EmbeddedFieldMetadata,
    data_type: &DataType,
    value: Option<&EmbeddedField>,
    path: &str,
) -> Result<Value> {
    match value {
        None | Some(EmbeddedField::Value(Value::Null)) => {
            if field.nullable {
                Ok(Value::Null)
            } else {
                Err(DbError::ValidationError(format!(
                    "Embedded field '{}' is required",
                    path
                )))
            }
        }
        Some(EmbeddedField::Value(v)) => data_type.coerce(v.clone()).map_err(|_| {
            DbError::ValidationError(format!(
                "Embedded field '{}' expects {}, got {}",
                path,
                data_type,
                v.type_name()
            ))
        }),
        Some(_) => Err(DbError::ValidationError(format!(
            "Embedded field '{}' expects a scalar {}",
            path, data_type
        ))),
    }
}

/// Encode an object/array field into JSON. Returns `JsonValue::Null` for
/// an absent nullable field.
pub fn encode_nested(
    field: &EmbeddedFieldMetadata,
    value: Option<&EmbeddedField>,
    path: &str,
) -> Result<JsonValue> {
    match (&field.kind, value) {
        (_, None) | (_, Some(EmbeddedField::Value(Value::Null))) => {
            if field.nullable {
                Ok(JsonValue::Null)
            } else {
                Err(DbError::ValidationError(format!(
                    "Embedded field '{}' is required",
                    path
                )))
            }
        }
        (EmbeddedFieldKind::Object(shape), Some(EmbeddedField::Object(object))) => {
            encode_object(shape, object, path)
        }
        (EmbeddedFieldKind::Array(shape), Some(EmbeddedField::Array(items))) => {
            let mut encoded = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                encoded.push(encode_object(shape, item, &format!("{}[{}]", path, i))?);
            }
            Ok(JsonValue::Array(encoded))
        }
        (EmbeddedFieldKind::Scalar(data_type), Some(v)) => {
            encode_scalar(field, data_type, Some(v), path).map(|v| v.to_json())
        }
        (EmbeddedFieldKind::Object(_), Some(_)) => Err(DbError::ValidationError(format!(
            "Embedded field '{}' expects an object",
            path
        ))),
        (EmbeddedFieldKind::Array(_), Some(_)) => Err(DbError::ValidationError(format!(
            "Embedded field '{}' expects an array",
            path
        ))),
    }
}

pub fn encode_object(shape: &EmbeddableShape, object: &EmbeddedObject, path: &str) -> Result<JsonValue> {
    reject_undeclared(shape, object, path)?;

    let mut map = JsonMap::new();
    for field in shape.fields() {
        let field_path = format!("{}.{}", path, field.name);
        let encoded = encode_nested(field, object.get(&field.name), &field_path)?;
        map.insert(field.name.clone(), encoded);
    }
    Ok(JsonValue::Object(map))
}

pub fn reject_undeclared(shape: &EmbeddableShape, object: &EmbeddedObject, path: &str) -> Result<()> {
    for (name, _) in object.fields() {
        if shape.get_field(name).is_none() {
            return Err(DbError::ValidationError(format!(
                "'{}' is not declared by embeddable '{}' (at '{}')",
                name,
                shape.name(),
                path
            )));
        }
    }
    Ok(())
}

// ============================================================================
// Decoding (read path): shape violations are malformed data
// ============================================================================

pub fn decode_nested(field: &EmbeddedFieldMetadata, json: &JsonValue, path: &str) -> Result<Option<EmbeddedField>> {
    if json.is_null() {
        if field.nullable {
            return Ok(None);
        }
        return Err(DbError::malformed(path, "required value is null"));
    }

    match &field.kind {
        EmbeddedFieldKind::Scalar(data_type) => JsonToValueConverter::convert(json, data_type)
            .map(|v| Some(EmbeddedField::Value(v)))
            .map_err(|reason| DbError::malformed(path, reason)),
        EmbeddedFieldKind::Object(shape) => {
            decode_object(shape, json, path).map(|o| Some(EmbeddedField::Object(o)))
        }
        EmbeddedFieldKind::Array(shape) => {
            let items = json
                .as_array()
                .ok_or_else(|| DbError::malformed(path, format!("expected a JSON array, got {}", json)))?;
            let mut decoded = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                decoded.push(decode_object(shape, item, &format!("{}[{}]", path, i))?);
            }
            Ok(Some(EmbeddedField::Array(decoded)))
        }
    }
}

/// Unknown keys are ignored; missing required keys are malformed.
pub fn decode_object(shape: &EmbeddableShape, json: &JsonValue, path: &str) -> Result<EmbeddedObject> {
    let map = json
        .as_object()
        .ok_or_else(|| DbError::malformed(path, format!("expected a JSON object, got {}", json)))?;

    let mut object = EmbeddedObject::new();
    for field in shape.fields() {
        let field_path = format!("{}.{}", path, field.name);
        let raw = map.get(&field.name).unwrap_or(&JsonValue::Null);
        if let Some(decoded) = decode_nested(field, raw, &field_path)? {
            object.set(field.name.clone(), decoded);
        }
    }
    Ok(object)
}

/// JSON columns may come back as parsed JSON or as JSON text.
pub fn column_json(value: &Value, path: &str) -> Result<JsonValue> {
    match value {
        Value::Null => Ok(JsonValue::Null),
        Value::Json(v) => Ok(v.clone()),
        Value::Text(s) => serde_json::from_str(s)
            .map_err(|e| DbError::malformed(path, format!("invalid JSON text: {}", e))),
        other => Err(DbError::malformed(
            path,
            format!("expected a JSON column value, got {}", other.type_name()),
        )),
    }
}
