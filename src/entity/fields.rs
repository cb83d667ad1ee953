use super::{EntityData, EntityKey};
use crate::core::{DbError, Result, Value};
use crate::embedded::PolymorphicValue;
use crate::metadata::{EntityMapping, FieldRef, MetadataRegistry};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
enum FieldInput {
    Value(Value),
    Embedded(Option<PolymorphicValue>),
    Related(Vec<EntityKey>),
    Json(JsonValue),
}

/// Input for `create`/`build`: property values, embedded values and initial
/// collection members.
///
/// ```
/// use memorm::EntityFields;
///
/// let fields = EntityFields::new().set("id", 1).set("name", "Ann").relate("labels", [1, 2]);
/// assert_eq!(fields.len(), 3);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityFields {
    fields: BTreeMap<String, FieldInput>,
}

/// Fields resolved against an entity's metadata.
#[derive(Debug)]
pub(crate) struct ResolvedFields {
    pub data: EntityData,
    pub relations: Vec<(String, Vec<EntityKey>)>,
}

impl EntityFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(property.into(), FieldInput::Value(value.into()));
        self
    }

    pub fn embedded(mut self, property: impl Into<String>, value: Option<PolymorphicValue>) -> Self {
        self.fields.insert(property.into(), FieldInput::Embedded(value));
        self
    }

    pub fn relate<I, K>(mut self, relation: impl Into<String>, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<EntityKey>,
    {
        let keys = keys.into_iter().map(Into::into).collect();
        self.fields.insert(relation.into(), FieldInput::Related(keys));
        self
    }

    /// Fields from a JSON object. Values are interpreted against the
    /// entity's metadata when the fields are used.
    pub fn from_json(json: &JsonValue) -> Result<Self> {
        let map = json.as_object().ok_or_else(|| {
            DbError::ValidationError(format!("Entity data must be a JSON object, got {}", json))
        })?;
        Ok(Self {
            fields: map
                .iter()
                .map(|(k, v)| (k.clone(), FieldInput::Json(v.clone())))
                .collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub(crate) fn resolve(
        self,
        registry: &MetadataRegistry,
        mapping: &EntityMapping,
    ) -> Result<ResolvedFields> {
        let metadata = mapping.metadata();
        let mut data = EntityData::default();
        let mut relations = Vec::new();

        for (name, input) in self.fields {
            let field = metadata.field(&name).ok_or_else(|| {
                DbError::ValidationError(format!("'{}' has no field '{}'", metadata.name(), name))
            })?;

            match (field, input) {
                (FieldRef::PrimaryKey(_) | FieldRef::Property(_), FieldInput::Value(value)) => {
                    let value = mapping.coerce_property(&name, value)?;
                    data.set_value(name, value);
                }
                (FieldRef::PrimaryKey(_) | FieldRef::Property(_), FieldInput::Json(json)) => {
                    let value = mapping.coerce_property(&name, Value::from_json(&json))?;
                    data.set_value(name, value);
                }
                (FieldRef::Embedded(_), FieldInput::Embedded(value)) => {
                    data.set_embedded(name, value);
                }
                (FieldRef::Embedded(_), FieldInput::Json(json)) => {
                    let mapper = mapping.mapper(&name).ok_or_else(|| {
                        DbError::ValidationError(format!("No mapper for '{}.{}'", metadata.name(), name))
                    })?;
                    let value = mapper.from_json(&json)?;
                    data.set_embedded(name, value);
                }
                (FieldRef::Relation(_), FieldInput::Related(keys)) => relations.push((name, keys)),
                (FieldRef::Relation(relation), FieldInput::Json(json)) => {
                    let items = json.as_array().ok_or_else(|| {
                        DbError::ValidationError(format!(
                            "Collection '{}.{}' expects an array, got {}",
                            metadata.name(),
                            name,
                            json
                        ))
                    })?;
                    let target = registry.entity(&relation.target)?;
                    let pk_field = &target.metadata().primary_key_property().name;
                    let keys = items
                        .iter()
                        .map(|item| EntityKey::from_json(item, pk_field))
                        .collect::<Result<Vec<_>>>()?;
                    relations.push((name, keys));
                }
                (_, _) => {
                    return Err(DbError::ValidationError(format!(
                        "Value given for '{}.{}' does not fit its kind",
                        metadata.name(),
                        name
                    )));
                }
            }
        }

        let pk = &metadata.primary_key_property().name;
        if data.value(pk).is_none_or(Value::is_null) {
            return Err(DbError::ValidationError(format!(
                "'{}' requires a value for primary key '{}'",
                metadata.name(),
                pk
            )));
        }
        for embedded in metadata.embeddeds() {
            if data.embedded(&embedded.name).is_none() {
                data.set_embedded(embedded.name.clone(), None);
            }
        }

        Ok(ResolvedFields { data, relations })
    }
}
