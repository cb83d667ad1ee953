use super::{EntityData, EntityKey, EntityState};
use crate::core::{DbError, Result, Value};
use crate::embedded::PolymorphicValue;
use crate::metadata::{EntityMapping, FieldRef};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

struct EntityInner {
    mapping: Arc<EntityMapping>,
    state: EntityState,
    data: EntityData,
    /// Initialized collections, by relation name.
    collections: HashMap<String, BTreeSet<EntityKey>>,
    dirty: bool,
}

/// Shared handle to one entity instance.
///
/// Clones point at the same instance; the identity map hands out one handle
/// per key. Once the owning manager is cleared, every accessor fails with
/// `DbError::DetachedEntity`.
#[derive(Clone)]
pub struct EntityRef {
    inner: Arc<RwLock<EntityInner>>,
}

impl EntityRef {
    pub(crate) fn new(mapping: Arc<EntityMapping>, data: EntityData, state: EntityState) -> Self {
        let collections = if state == EntityState::Persisted {
            HashMap::new()
        } else {
            // nothing stored yet, so every collection is known to be empty
            mapping
                .metadata()
                .relations()
                .iter()
                .map(|r| (r.name.clone(), BTreeSet::new()))
                .collect()
        };
        Self {
            inner: Arc::new(RwLock::new(EntityInner {
                mapping,
                state,
                data,
                collections,
                dirty: false,
            })),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, EntityInner>> {
        let inner = self.inner.read()?;
        if inner.state == EntityState::Detached {
            return Err(DbError::DetachedEntity(inner.mapping.name().to_string()));
        }
        Ok(inner)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, EntityInner>> {
        let inner = self.inner.write()?;
        if inner.state == EntityState::Detached {
            return Err(DbError::DetachedEntity(inner.mapping.name().to_string()));
        }
        Ok(inner)
    }

    pub fn entity_name(&self) -> Result<String> {
        Ok(self.inner.read()?.mapping.name().to_string())
    }

    /// Lifecycle state. Works on detached handles too.
    pub fn state(&self) -> Result<EntityState> {
        Ok(self.inner.read()?.state)
    }

    pub fn key(&self) -> Result<EntityKey> {
        let inner = self.read()?;
        let pk = &inner.mapping.metadata().primary_key_property().name;
        EntityKey::from_value(inner.data.value(pk).unwrap_or(&Value::Null))
    }

    /// Value of a scalar property or the primary key.
    pub fn get(&self, property: &str) -> Result<Value> {
        let inner = self.read()?;
        match inner.mapping.metadata().field(property) {
            Some(FieldRef::PrimaryKey(_)) | Some(FieldRef::Property(_)) => {
                Ok(inner.data.value(property).cloned().unwrap_or(Value::Null))
            }
            _ => Err(DbError::ValidationError(format!(
                "'{}' has no property '{}'",
                inner.mapping.name(),
                property
            ))),
        }
    }

    pub fn set(&self, property: &str, value: impl Into<Value>) -> Result<()> {
        let mut inner = self.write()?;
        let value = inner.mapping.coerce_property(property, value.into())?;

        let pk = &inner.mapping.metadata().primary_key_property().name;
        if pk == property && inner.state != EntityState::New {
            if inner.data.value(property) == Some(&value) {
                return Ok(());
            }
            return Err(DbError::ValidationError(format!(
                "Primary key of managed '{}' cannot change",
                inner.mapping.name()
            )));
        }

        inner.data.set_value(property, value);
        inner.dirty = true;
        Ok(())
    }

    pub fn embedded(&self, property: &str) -> Result<Option<PolymorphicValue>> {
        let inner = self.read()?;
        if inner.mapping.mapper(property).is_none() {
            return Err(DbError::ValidationError(format!(
                "'{}' has no embedded property '{}'",
                inner.mapping.name(),
                property
            )));
        }
        Ok(inner.data.embedded(property).cloned())
    }

    /// Replace an embedded value. The value is checked against its variant
    /// before it is accepted.
    pub fn set_embedded(&self, property: &str, value: Option<PolymorphicValue>) -> Result<()> {
        let mut inner = self.write()?;
        let mapper = inner.mapping.mapper(property).ok_or_else(|| {
            DbError::ValidationError(format!(
                "'{}' has no embedded property '{}'",
                inner.mapping.name(),
                property
            ))
        })?;
        mapper.write(value.as_ref())?;

        inner.data.set_embedded(property, value);
        inner.dirty = true;
        Ok(())
    }

    /// Keys currently in an initialized collection.
    pub fn collection_keys(&self, relation: &str) -> Result<Vec<EntityKey>> {
        let inner = self.read()?;
        match inner.collections.get(relation) {
            Some(keys) => Ok(keys.iter().cloned().collect()),
            None => Err(collection_error(&inner, relation)),
        }
    }

    pub fn is_collection_initialized(&self, relation: &str) -> Result<bool> {
        Ok(self.read()?.collections.contains_key(relation))
    }

    /// JSON form: properties, embedded values and initialized collections
    /// as key arrays.
    pub fn to_json(&self) -> Result<JsonValue> {
        let inner = self.read()?;
        let metadata = inner.mapping.metadata();
        let mut map = JsonMap::new();

        let pk = metadata.primary_key_property();
        for prop in std::iter::once(pk).chain(metadata.properties()) {
            let value = inner.data.value(&prop.name).unwrap_or(&Value::Null);
            map.insert(prop.name.clone(), value.to_json());
        }
        for mapper in inner.mapping.mappers() {
            let json = mapper.to_json(inner.data.embedded(mapper.property()))?;
            map.insert(mapper.property().to_string(), json);
        }
        for relation in metadata.relations() {
            if let Some(keys) = inner.collections.get(&relation.name) {
                let keys = keys.iter().map(|k| k.to_value().to_json()).collect();
                map.insert(relation.name.clone(), JsonValue::Array(keys));
            }
        }
        Ok(JsonValue::Object(map))
    }

    pub fn same_entity(&self, other: &EntityRef) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn mapping(&self) -> Result<Arc<EntityMapping>> {
        Ok(Arc::clone(&self.inner.read()?.mapping))
    }

    pub(crate) fn data(&self) -> Result<EntityData> {
        Ok(self.read()?.data.clone())
    }

    pub(crate) fn set_state(&self, state: EntityState) -> Result<()> {
        self.inner.write()?.state = state;
        Ok(())
    }

    pub(crate) fn is_dirty(&self) -> Result<bool> {
        Ok(self.inner.read()?.dirty)
    }

    pub(crate) fn mark_clean(&self) -> Result<()> {
        self.inner.write()?.dirty = false;
        Ok(())
    }

    pub(crate) fn init_collection(&self, relation: &str, keys: BTreeSet<EntityKey>) -> Result<()> {
        self.write()?.collections.insert(relation.to_string(), keys);
        Ok(())
    }

    pub(crate) fn initialized_collections(&self) -> Result<Vec<(String, Vec<EntityKey>)>> {
        Ok(self
            .read()?
            .collections
            .iter()
            .map(|(name, keys)| (name.clone(), keys.iter().cloned().collect()))
            .collect())
    }

    /// Update an initialized collection. Uninitialized ones are left alone;
    /// the change still reaches storage through the unit of work.
    pub(crate) fn track_collection(&self, relation: &str, key: &EntityKey, present: bool) -> Result<()> {
        let mut inner = self.write()?;
        if let Some(keys) = inner.collections.get_mut(relation) {
            if present {
                keys.insert(key.clone());
            } else {
                keys.remove(key);
            }
        }
        Ok(())
    }
}

fn collection_error(inner: &EntityInner, relation: &str) -> DbError {
    if inner.mapping.metadata().get_relation(relation).is_some() {
        DbError::ValidationError(format!(
            "Collection '{}.{}' is not initialized",
            inner.mapping.name(),
            relation
        ))
    } else {
        DbError::ValidationError(format!(
            "'{}' has no many-to-many relation '{}'",
            inner.mapping.name(),
            relation
        ))
    }
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.read() {
            Ok(inner) => f
                .debug_struct("EntityRef")
                .field("entity", &inner.mapping.name())
                .field("state", &inner.state)
                .field("data", &inner.data)
                .finish(),
            Err(_) => f.write_str("EntityRef(<poisoned>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;
    use crate::metadata::{EntityMetadata, MetadataRegistry};

    fn user(state: EntityState) -> EntityRef {
        let registry = MetadataRegistry::build(vec![
            EntityMetadata::new("User")
                .property("name", DataType::Text)
                .nullable_property("age", DataType::Integer),
        ])
        .unwrap();
        let mut data = EntityData::default();
        data.set_value("id", Value::Integer(1));
        data.set_value("name", Value::from("ann"));
        EntityRef::new(registry.entity("User").unwrap(), data, state)
    }

    #[test]
    fn test_get_and_set() {
        let entity = user(EntityState::Managed);
        assert_eq!(entity.get("name").unwrap(), Value::from("ann"));
        entity.set("age", 30).unwrap();
        assert_eq!(entity.get("age").unwrap(), Value::Integer(30));
        assert!(entity.set("age", "thirty").is_err());
        assert!(entity.get("email").is_err());
        assert_eq!(entity.key().unwrap(), EntityKey::Integer(1));
    }

    #[test]
    fn test_primary_key_is_immutable_once_tracked() {
        let entity = user(EntityState::Persisted);
        assert!(matches!(entity.set("id", 2), Err(DbError::ValidationError(_))));
        entity.set("id", 1).unwrap();
    }

    #[test]
    fn test_detached_handle_fails() {
        let entity = user(EntityState::Persisted);
        entity.set_state(EntityState::Detached).unwrap();
        assert!(matches!(entity.get("name"), Err(DbError::DetachedEntity(_))));
        assert!(matches!(entity.to_json(), Err(DbError::DetachedEntity(_))));
        assert_eq!(entity.state().unwrap(), EntityState::Detached);
    }

    #[test]
    fn test_collections_of_loaded_entities_start_uninitialized() {
        let entity = user(EntityState::Persisted);
        assert!(entity.collection_keys("labels").is_err());
        assert!(!entity.is_collection_initialized("labels").unwrap());
    }
}
