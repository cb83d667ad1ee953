use super::codec::{column_json, decode_nested, encode_nested, encode_scalar, reject_undeclared};
use super::value::{EmbeddedField, EmbeddedObject, PolymorphicValue};
use crate::core::{Column, DataType, DbError, Result, Value};
use crate::metadata::naming;
use crate::metadata::{EmbeddableShape, EmbeddedFieldKind, EmbeddedPropertyMetadata, PolymorphicEmbeddable};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Column values of one embedded property, keyed by column name.
pub type RowFragment = BTreeMap<String, Value>;

/// Variant field values keyed by field name (not column name).
type FieldValues = BTreeMap<String, Value>;

type DynamicEncode = Arc<dyn Fn(&EmbeddedObject, &str) -> Result<FieldValues> + Send + Sync>;
type DynamicDecode = Arc<dyn Fn(&FieldValues, &str) -> Result<EmbeddedObject> + Send + Sync>;

#[derive(Clone)]
struct VariantRegistration {
    shape: Arc<EmbeddableShape>,
    encode: DynamicEncode,
    decode: DynamicDecode,
}

impl VariantRegistration {
    fn for_shape(shape: EmbeddableShape) -> Self {
        let shape = Arc::new(shape);

        let encode_shape = Arc::clone(&shape);
        let encode: DynamicEncode = Arc::new(move |object, path| {
            reject_undeclared(&encode_shape, object, path)?;
            let mut values = FieldValues::new();
            for field in encode_shape.fields() {
                let field_path = format!("{}.{}", path, field.name);
                let value = match &field.kind {
                    EmbeddedFieldKind::Scalar(data_type) => {
                        encode_scalar(field, data_type, object.get(&field.name), &field_path)?
                    }
                    EmbeddedFieldKind::Object(_) | EmbeddedFieldKind::Array(_) => {
                        match encode_nested(field, object.get(&field.name), &field_path)? {
                            JsonValue::Null => Value::Null,
                            json => Value::Json(json),
                        }
                    }
                };
                values.insert(field.name.clone(), value);
            }
            Ok(values)
        });

        let decode_shape = Arc::clone(&shape);
        let decode: DynamicDecode = Arc::new(move |values, path| {
            let mut object = EmbeddedObject::new();
            for field in decode_shape.fields() {
                let field_path = format!("{}.{}", path, field.name);
                let raw = values.get(&field.name).unwrap_or(&Value::Null);
                let decoded = match &field.kind {
                    EmbeddedFieldKind::Scalar(data_type) => decode_scalar_column(
                        data_type,
                        raw,
                        field.nullable,
                        &field_path,
                    )?
                    .map(EmbeddedField::Value),
                    EmbeddedFieldKind::Object(_) | EmbeddedFieldKind::Array(_) => {
                        let json = column_json(raw, &field_path)?;
                        decode_nested(field, &json, &field_path)?
                    }
                };
                if let Some(decoded) = decoded {
                    object.set(field.name.clone(), decoded);
                }
            }
            Ok(object)
        });

        Self { shape, encode, decode }
    }
}

fn decode_scalar_column(
    data_type: &DataType,
    raw: &Value,
    nullable: bool,
    path: &str,
) -> Result<Option<Value>> {
    if raw.is_null() {
        if nullable {
            return Ok(None);
        }
        return Err(DbError::malformed(path, "required value is null"));
    }
    data_type
        .coerce(raw.clone())
        .map(Some)
        .map_err(|e| DbError::malformed(path, e.to_string()))
}

#[derive(Debug, Clone)]
struct EmbeddedColumn {
    field: String,
    column: String,
    data_type: DataType,
}

/// Maps a polymorphic embedded property onto columns of its owner's row.
///
/// The discriminator is stored in `{property}_{discriminator}` and every
/// field declared by any variant gets its own `{property}_{field}` column.
/// Array and object fields are stored as JSON. Variants are dispatched
/// through a registration table keyed by tag.
#[derive(Clone)]
pub struct DiscriminatedEmbeddedMapper {
    property: String,
    nullable: bool,
    embeddable: Arc<PolymorphicEmbeddable>,
    discriminator_column: String,
    columns: Vec<EmbeddedColumn>,
    registrations: HashMap<String, VariantRegistration>,
}

impl std::fmt::Debug for DiscriminatedEmbeddedMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscriminatedEmbeddedMapper")
            .field("property", &self.property)
            .field("embeddable", &self.embeddable.name())
            .field("discriminator_column", &self.discriminator_column)
            .field("variants", &self.variant_tags())
            .finish()
    }
}

impl DiscriminatedEmbeddedMapper {
    pub fn new(property: &EmbeddedPropertyMetadata) -> Result<Self> {
        let embeddable = Arc::clone(&property.embeddable);
        let discriminator = embeddable.discriminator_field();
        naming::validate_identifier("discriminator", discriminator)?;

        if embeddable.variants().is_empty() {
            return Err(DbError::ValidationError(format!(
                "Embeddable '{}' declares no variants",
                embeddable.name()
            )));
        }

        let mut columns: Vec<EmbeddedColumn> = Vec::new();
        let mut registrations = HashMap::new();

        for (tag, shape) in embeddable.variants() {
            if registrations.contains_key(tag) {
                return Err(DbError::ValidationError(format!(
                    "Embeddable '{}' registers tag '{}' twice",
                    embeddable.name(),
                    tag
                )));
            }

            for field in shape.fields() {
                naming::validate_identifier("embedded field", &field.name)?;
                if field.name == discriminator {
                    return Err(DbError::ValidationError(format!(
                        "Variant '{}' of '{}' declares a field named like its discriminator '{}'",
                        tag,
                        embeddable.name(),
                        discriminator
                    )));
                }

                let data_type = field.column_type();
                match columns.iter().find(|c| c.field == field.name) {
                    Some(existing) if existing.data_type != data_type => {
                        return Err(DbError::ValidationError(format!(
                            "Field '{}' of '{}' is declared as both {} and {}",
                            field.name,
                            embeddable.name(),
                            existing.data_type,
                            data_type
                        )));
                    }
                    Some(_) => {}
                    None => columns.push(EmbeddedColumn {
                        field: field.name.clone(),
                        column: naming::embedded_column_name(&property.name, &field.name),
                        data_type,
                    }),
                }
            }

            registrations.insert(tag.clone(), VariantRegistration::for_shape(shape.clone()));
        }

        Ok(Self {
            property: property.name.clone(),
            nullable: property.nullable,
            discriminator_column: naming::embedded_column_name(&property.name, discriminator),
            embeddable,
            columns,
            registrations,
        })
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn discriminator_column(&self) -> &str {
        &self.discriminator_column
    }

    pub fn variant_tags(&self) -> Vec<String> {
        let mut tags = self.registrations.keys().cloned().collect::<Vec<_>>();
        tags.sort();
        tags
    }

    pub fn variant_shape(&self, tag: &str) -> Option<&EmbeddableShape> {
        self.registrations.get(tag).map(|r| r.shape.as_ref())
    }

    /// Columns this property contributes to the owner's table, all nullable.
    pub fn columns(&self) -> Vec<Column> {
        std::iter::once(Column::new(self.discriminator_column.clone(), DataType::Text))
            .chain(
                self.columns
                    .iter()
                    .map(|c| Column::new(c.column.clone(), c.data_type.clone())),
            )
            .collect()
    }

    fn null_fragment(&self) -> RowFragment {
        std::iter::once(self.discriminator_column.clone())
            .chain(self.columns.iter().map(|c| c.column.clone()))
            .map(|column| (column, Value::Null))
            .collect()
    }

    fn registration(&self, tag: &str) -> Result<&VariantRegistration> {
        self.registrations
            .get(tag)
            .ok_or_else(|| DbError::UnknownVariant {
                embeddable: self.embeddable.name().to_string(),
                tag: tag.to_string(),
            })
    }

    /// Encode a value into its column fragment. Columns belonging to other
    /// variants are written as NULL.
    pub fn write(&self, value: Option<&PolymorphicValue>) -> Result<RowFragment> {
        let mut fragment = self.null_fragment();
        let Some(value) = value else {
            if self.nullable {
                return Ok(fragment);
            }
            return Err(DbError::ValidationError(format!(
                "Embedded property '{}' is required",
                self.property
            )));
        };

        let registration = self.registration(value.tag())?;
        let values = (registration.encode)(value.object(), &self.property)?;

        fragment.insert(
            self.discriminator_column.clone(),
            Value::Text(value.tag().to_string()),
        );
        for column in &self.columns {
            if let Some(v) = values.get(&column.field) {
                fragment.insert(column.column.clone(), v.clone());
            }
        }
        Ok(fragment)
    }

    /// Rebuild a value from its column fragment.
    pub fn read(&self, fragment: &RowFragment) -> Result<Option<PolymorphicValue>> {
        tracing::trace!(property = %self.property, stage = "raw_row", "hydrating embedded value");

        let discriminator = fragment
            .get(&self.discriminator_column)
            .unwrap_or(&Value::Null);

        let tag = match discriminator {
            Value::Null => {
                let orphan = self
                    .columns
                    .iter()
                    .find(|c| fragment.get(&c.column).is_some_and(|v| !v.is_null()));
                if let Some(column) = orphan {
                    return Err(DbError::malformed(
                        format!("{}.{}", self.property, column.field),
                        "value present without a discriminator",
                    ));
                }
                if !self.nullable {
                    return Err(DbError::malformed(
                        self.property.clone(),
                        "required embedded value is null",
                    ));
                }
                return Ok(None);
            }
            Value::Text(tag) => tag.clone(),
            other => {
                return Err(DbError::UnknownVariant {
                    embeddable: self.embeddable.name().to_string(),
                    tag: other.to_string(),
                });
            }
        };

        let registration = self.registration(&tag)?;
        tracing::trace!(property = %self.property, tag = %tag, stage = "discriminator_resolved", "hydrating embedded value");

        let values: FieldValues = self
            .columns
            .iter()
            .filter_map(|c| fragment.get(&c.column).map(|v| (c.field.clone(), v.clone())))
            .collect();
        let object = (registration.decode)(&values, &self.property)?;
        tracing::trace!(property = %self.property, tag = %tag, stage = "hydrated", "hydrating embedded value");

        Ok(Some(PolymorphicValue::new(tag, object)))
    }

    /// Parse the JSON input form: an object carrying the discriminator key
    /// next to the variant's fields, or `null`.
    pub fn from_json(&self, json: &JsonValue) -> Result<Option<PolymorphicValue>> {
        if json.is_null() {
            return Ok(None);
        }
        let map = json.as_object().ok_or_else(|| {
            DbError::ValidationError(format!(
                "Embedded property '{}' expects a JSON object, got {}",
                self.property, json
            ))
        })?;

        let discriminator = self.embeddable.discriminator_field();
        let tag = match map.get(discriminator) {
            Some(JsonValue::String(tag)) => tag.clone(),
            Some(other) => {
                return Err(DbError::UnknownVariant {
                    embeddable: self.embeddable.name().to_string(),
                    tag: other.to_string(),
                });
            }
            None => {
                return Err(DbError::ValidationError(format!(
                    "Embedded property '{}' is missing its '{}' discriminator",
                    self.property, discriminator
                )));
            }
        };
        let shape = &self.registration(&tag)?.shape;

        let mut object = EmbeddedObject::new();
        for (key, raw) in map {
            if key == discriminator {
                continue;
            }
            let path = format!("{}.{}", self.property, key);
            let field = shape.get_field(key).ok_or_else(|| {
                DbError::ValidationError(format!(
                    "'{}' is not declared by variant '{}' of '{}'",
                    key,
                    tag,
                    self.embeddable.name()
                ))
            })?;
            let decoded = decode_nested(&field.clone().nullable(), raw, &path).map_err(|e| match e {
                DbError::MalformedEmbeddedData { field, reason } => {
                    DbError::ValidationError(format!("Invalid value for '{}': {}", field, reason))
                }
                other => other,
            })?;
            if let Some(decoded) = decoded {
                object.set(key.clone(), decoded);
            }
        }

        let value = PolymorphicValue::new(tag, object);
        // run the write-side checks so required fields surface now
        (self.registration(value.tag())?.encode)(value.object(), &self.property)?;
        Ok(Some(value))
    }

    /// Canonical JSON form, the inverse of `from_json`.
    pub fn to_json(&self, value: Option<&PolymorphicValue>) -> Result<JsonValue> {
        let Some(value) = value else {
            return Ok(JsonValue::Null);
        };
        let registration = self.registration(value.tag())?;

        let mut map = JsonMap::new();
        map.insert(
            self.embeddable.discriminator_field().to_string(),
            JsonValue::from(value.tag()),
        );
        for field in registration.shape.fields() {
            let path = format!("{}.{}", self.property, field.name);
            let json = encode_nested(field, value.object().get(&field.name), &path)?;
            if !json.is_null() {
                map.insert(field.name.clone(), json);
            }
        }
        Ok(JsonValue::Object(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::EmbeddedFieldMetadata;
    use chrono::NaiveDate;
    use serde_json::json;

    fn schedule() -> EmbeddedPropertyMetadata {
        let slot = EmbeddableShape::new("Slot").property("day", DataType::Date);
        EmbeddedPropertyMetadata {
            name: "schedule".to_string(),
            nullable: true,
            embeddable: Arc::new(
                PolymorphicEmbeddable::new("Schedule")
                    .variant(
                        "weekly",
                        EmbeddableShape::new("Weekly")
                            .property("weekday", DataType::Integer)
                            .array("slots", slot.clone()),
                    )
                    .variant(
                        "once",
                        EmbeddableShape::new("Once")
                            .array("slots", slot)
                            .field(EmbeddedFieldMetadata::scalar("note", DataType::Text).nullable()),
                    ),
            ),
        }
    }

    fn day(d: u32) -> EmbeddedObject {
        EmbeddedObject::new().with("day", NaiveDate::from_ymd_opt(2024, 1, d).unwrap())
    }

    #[test]
    fn test_column_layout_is_union_of_variant_fields() {
        let mapper = DiscriminatedEmbeddedMapper::new(&schedule()).unwrap();
        let names: Vec<String> = mapper.columns().into_iter().map(|c| c.name).collect();
        assert_eq!(
            names,
            vec!["schedule_type", "schedule_weekday", "schedule_slots", "schedule_note"]
        );
        assert!(mapper.columns().iter().all(|c| c.nullable));
    }

    #[test]
    fn test_write_then_read_keeps_order_and_dates() {
        let mapper = DiscriminatedEmbeddedMapper::new(&schedule()).unwrap();
        let value = PolymorphicValue::new(
            "weekly",
            EmbeddedObject::new()
                .with("weekday", 3)
                .with_array("slots", vec![day(9), day(2)]),
        );

        let fragment = mapper.write(Some(&value)).unwrap();
        assert_eq!(fragment["schedule_type"], Value::Text("weekly".into()));
        assert_eq!(fragment["schedule_note"], Value::Null);
        assert_eq!(
            fragment["schedule_slots"],
            Value::Json(json!([{ "day": "2024-01-09" }, { "day": "2024-01-02" }]))
        );

        let restored = mapper.read(&fragment).unwrap().unwrap();
        assert_eq!(restored, value);
        assert!(matches!(
            restored.array("slots").unwrap()[0].value("day"),
            Some(Value::Date(_))
        ));
    }

    #[test]
    fn test_absent_and_empty_array_are_distinct() {
        let mapper = DiscriminatedEmbeddedMapper::new(&schedule()).unwrap();
        let empty = PolymorphicValue::new("once", EmbeddedObject::new().with_array("slots", vec![]));

        let absent = mapper.write(None).unwrap();
        assert!(absent.values().all(Value::is_null));
        assert_eq!(mapper.read(&absent).unwrap(), None);

        let fragment = mapper.write(Some(&empty)).unwrap();
        assert_eq!(fragment["schedule_slots"], Value::Json(json!([])));
        assert_eq!(mapper.read(&fragment).unwrap(), Some(empty));
    }

    #[test]
    fn test_unknown_tag_is_rejected_both_ways() {
        let mapper = DiscriminatedEmbeddedMapper::new(&schedule()).unwrap();
        let bogus = PolymorphicValue::new("monthly", EmbeddedObject::new());
        assert!(matches!(
            mapper.write(Some(&bogus)),
            Err(DbError::UnknownVariant { .. })
        ));

        let mut fragment = mapper.write(None).unwrap();
        fragment.insert("schedule_type".into(), Value::Text("monthly".into()));
        match mapper.read(&fragment) {
            Err(DbError::UnknownVariant { embeddable, tag }) => {
                assert_eq!(embeddable, "Schedule");
                assert_eq!(tag, "monthly");
            }
            other => panic!("expected unknown variant, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_json_column() {
        let mapper = DiscriminatedEmbeddedMapper::new(&schedule()).unwrap();
        let mut fragment = mapper.write(None).unwrap();
        fragment.insert("schedule_type".into(), Value::Text("once".into()));
        fragment.insert("schedule_slots".into(), Value::Json(json!([{ "day": "not a date" }])));

        match mapper.read(&fragment) {
            Err(DbError::MalformedEmbeddedData { field, .. }) => {
                assert_eq!(field, "schedule.slots[0].day")
            }
            other => panic!("expected malformed data, got {:?}", other),
        }
    }

    #[test]
    fn test_write_validates_shape() {
        let mapper = DiscriminatedEmbeddedMapper::new(&schedule()).unwrap();
        let missing = PolymorphicValue::new("weekly", EmbeddedObject::new().with("weekday", 1));
        assert!(matches!(
            mapper.write(Some(&missing)),
            Err(DbError::ValidationError(_))
        ));

        let foreign = PolymorphicValue::new(
            "once",
            EmbeddedObject::new().with_array("slots", vec![]).with("weekday", 1),
        );
        assert!(matches!(
            mapper.write(Some(&foreign)),
            Err(DbError::ValidationError(_))
        ));
    }

    #[test]
    fn test_conflicting_field_types_rejected() {
        let property = EmbeddedPropertyMetadata {
            name: "p".to_string(),
            nullable: true,
            embeddable: Arc::new(
                PolymorphicEmbeddable::new("P")
                    .variant("a", EmbeddableShape::new("A").property("x", DataType::Integer))
                    .variant("b", EmbeddableShape::new("B").property("x", DataType::Text)),
            ),
        };
        assert!(matches!(
            DiscriminatedEmbeddedMapper::new(&property),
            Err(DbError::ValidationError(_))
        ));
    }

    #[test]
    fn test_json_form() {
        let mapper = DiscriminatedEmbeddedMapper::new(&schedule()).unwrap();
        let input = json!({ "type": "once", "slots": [{ "day": "2024-01-05" }], "note": "x" });
        let value = mapper.from_json(&input).unwrap().unwrap();
        assert_eq!(value.tag(), "once");
        assert_eq!(mapper.to_json(Some(&value)).unwrap(), input);

        assert!(matches!(
            mapper.from_json(&json!({ "type": "once", "slots": [{ "day": 5 }] })),
            Err(DbError::ValidationError(_))
        ));
        assert!(matches!(
            mapper.from_json(&json!({ "type": "yearly" })),
            Err(DbError::UnknownVariant { .. })
        ));
    }
}
