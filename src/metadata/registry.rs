use super::entity::{EntityMetadata, FieldRef, ManyToManyMetadata};
use super::naming;
use crate::core::{Column, DataType, DbError, Result, Row, Schema, Value};
use crate::embedded::DiscriminatedEmbeddedMapper;
use crate::entity::EntityData;
use crate::storage::TableSchema;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Resolved storage layout of one entity.
#[derive(Debug)]
pub struct EntityMapping {
    metadata: EntityMetadata,
    schema: TableSchema,
    /// property name -> column index
    property_columns: HashMap<String, usize>,
    mappers: Vec<DiscriminatedEmbeddedMapper>,
}

impl EntityMapping {
    fn build(metadata: EntityMetadata) -> Result<Self> {
        let pk = metadata.primary_key_property();
        if !matches!(pk.data_type, DataType::Integer | DataType::Text) {
            return Err(DbError::ValidationError(format!(
                "Primary key '{}' of '{}' must be INTEGER or TEXT, got {}",
                pk.name,
                metadata.name(),
                pk.data_type
            )));
        }

        let mut columns = vec![Column::new(pk.column(), pk.data_type.clone()).primary_key()];
        let mut property_columns = HashMap::new();
        property_columns.insert(pk.name.clone(), 0);

        for prop in metadata.properties() {
            let mut column = Column::new(prop.column(), prop.data_type.clone());
            if !prop.nullable {
                column = column.not_null();
            }
            property_columns.insert(prop.name.clone(), columns.len());
            columns.push(column);
        }

        let mut mappers = Vec::with_capacity(metadata.embeddeds().len());
        for embedded in metadata.embeddeds() {
            let mapper = DiscriminatedEmbeddedMapper::new(embedded)?;
            columns.extend(mapper.columns());
            mappers.push(mapper);
        }

        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(DbError::ValidationError(format!(
                    "Column '{}' is mapped twice on '{}'",
                    column.name,
                    metadata.name()
                )));
            }
        }

        Ok(Self {
            schema: TableSchema::new(metadata.table_name(), columns),
            metadata,
            property_columns,
            mappers,
        })
    }

    pub fn metadata(&self) -> &EntityMetadata {
        &self.metadata
    }

    pub fn name(&self) -> &str {
        self.metadata.name()
    }

    pub fn table_name(&self) -> &str {
        self.metadata.table_name()
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Column index of a scalar property or the primary key.
    pub fn column_index(&self, property: &str) -> Option<usize> {
        self.property_columns.get(property).copied()
    }

    pub fn property_type(&self, property: &str) -> Option<&DataType> {
        match self.metadata.field(property)? {
            FieldRef::PrimaryKey(p) | FieldRef::Property(p) => Some(&p.data_type),
            _ => None,
        }
    }

    pub fn mapper(&self, property: &str) -> Option<&DiscriminatedEmbeddedMapper> {
        self.mappers.iter().find(|m| m.property() == property)
    }

    pub fn mappers(&self) -> &[DiscriminatedEmbeddedMapper] {
        &self.mappers
    }

    /// Coerce a value assigned to a scalar property.
    pub fn coerce_property(&self, property: &str, value: Value) -> Result<Value> {
        let Some(field) = self.metadata.field(property) else {
            return Err(DbError::ValidationError(format!(
                "'{}' has no property '{}'",
                self.name(),
                property
            )));
        };
        let prop = match field {
            FieldRef::PrimaryKey(p) | FieldRef::Property(p) => p,
            _ => {
                return Err(DbError::ValidationError(format!(
                    "'{}.{}' is not a scalar property",
                    self.name(),
                    property
                )));
            }
        };

        if value.is_null() {
            if prop.nullable {
                return Ok(Value::Null);
            }
            return Err(DbError::ValidationError(format!(
                "'{}.{}' cannot be null",
                self.name(),
                property
            )));
        }

        prop.data_type.coerce(value).map_err(|e| {
            DbError::ValidationError(format!("'{}.{}': {}", self.name(), property, e))
        })
    }

    pub fn key_of_row(&self, row: &Row) -> Value {
        row[0].clone()
    }

    /// Build the owner row, embedded fragments included.
    pub fn row_from_data(&self, data: &EntityData) -> Result<Row> {
        let mut row = vec![Value::Null; self.schema.schema().column_count()];

        let pk = self.metadata.primary_key_property();
        row[0] = self.coerce_property(&pk.name, data.value(&pk.name).cloned().unwrap_or(Value::Null))?;

        for prop in self.metadata.properties() {
            let value = data.value(&prop.name).cloned().unwrap_or(Value::Null);
            row[self.property_columns[&prop.name]] = self.coerce_property(&prop.name, value)?;
        }

        for mapper in &self.mappers {
            let fragment = mapper.write(data.embedded(mapper.property()))?;
            for (column, value) in fragment {
                let idx = self
                    .schema
                    .schema()
                    .find_column_index(&column)
                    .ok_or_else(|| DbError::ColumnNotFound(column.clone(), self.table_name().to_string()))?;
                row[idx] = value;
            }
        }
        Ok(row)
    }

    /// Hydrate a stored row. Embedded values go through their mappers and
    /// fail the whole row on an unknown tag or malformed content.
    pub fn data_from_row(&self, row: &Row) -> Result<EntityData> {
        let mut data = EntityData::default();
        let pk = self.metadata.primary_key_property();
        data.set_value(pk.name.clone(), row[0].clone());
        for prop in self.metadata.properties() {
            data.set_value(prop.name.clone(), row[self.property_columns[&prop.name]].clone());
        }

        let columns = self.schema.schema().columns();
        for mapper in &self.mappers {
            let fragment = mapper
                .columns()
                .into_iter()
                .filter_map(|c| {
                    columns
                        .iter()
                        .position(|col| col.name == c.name)
                        .map(|idx| (c.name, row[idx].clone()))
                })
                .collect();
            data.set_embedded(mapper.property().to_string(), mapper.read(&fragment)?);
        }
        Ok(data)
    }
}

/// A many-to-many join table, described from its owning side.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinTableMetadata {
    pub table: String,
    pub owner_entity: String,
    pub owner_relation: String,
    pub inverse_relation: Option<String>,
    pub target_entity: String,
    pub owner_table: String,
    pub target_table: String,
    pub owner_column: String,
    pub target_column: String,
}

/// How a relation reaches its join table.
#[derive(Debug, Clone)]
pub struct JoinPath {
    pub join: Arc<JoinTableMetadata>,
    /// `true` when the relation is declared on the owning side.
    pub from_owner: bool,
}

impl JoinPath {
    /// Join column holding the key of the entity the relation is declared on.
    pub fn source_column(&self) -> &str {
        if self.from_owner {
            &self.join.owner_column
        } else {
            &self.join.target_column
        }
    }

    /// Join column holding the key of the related entity.
    pub fn related_column(&self) -> &str {
        if self.from_owner {
            &self.join.target_column
        } else {
            &self.join.owner_column
        }
    }

    pub fn related_entity(&self) -> &str {
        if self.from_owner {
            &self.join.target_entity
        } else {
            &self.join.owner_entity
        }
    }

    pub fn related_table(&self) -> &str {
        if self.from_owner {
            &self.join.target_table
        } else {
            &self.join.owner_table
        }
    }

    /// Order a (source, related) key pair as the join row stores it.
    pub fn owning_pair<K>(&self, source: K, related: K) -> (K, K) {
        if self.from_owner {
            (source, related)
        } else {
            (related, source)
        }
    }
}

/// Validated metadata of every entity known to an `Orm`.
#[derive(Debug, Default)]
pub struct MetadataRegistry {
    order: Vec<String>,
    entities: HashMap<String, Arc<EntityMapping>>,
    joins: Vec<Arc<JoinTableMetadata>>,
    paths: HashMap<(String, String), JoinPath>,
}

impl MetadataRegistry {
    pub fn build(entities: Vec<EntityMetadata>) -> Result<Self> {
        let mut registry = Self::default();
        let mut tables = HashSet::new();

        for metadata in entities {
            Self::validate_names(&metadata)?;
            if registry.entities.contains_key(metadata.name()) {
                return Err(DbError::ValidationError(format!(
                    "Entity '{}' is declared twice",
                    metadata.name()
                )));
            }
            if !tables.insert(metadata.table_name().to_string()) {
                return Err(DbError::ValidationError(format!(
                    "Table '{}' is mapped by more than one entity",
                    metadata.table_name()
                )));
            }

            let name = metadata.name().to_string();
            let mapping = EntityMapping::build(metadata)?;
            registry.order.push(name.clone());
            registry.entities.insert(name, Arc::new(mapping));
        }

        registry.resolve_relations(&mut tables)?;
        Ok(registry)
    }

    fn validate_names(metadata: &EntityMetadata) -> Result<()> {
        naming::validate_identifier("entity", metadata.name())?;
        naming::validate_identifier("table", metadata.table_name())?;

        let mut seen = HashSet::new();
        for field in metadata.field_names() {
            naming::validate_identifier("property", field)?;
            if !seen.insert(field) {
                return Err(DbError::ValidationError(format!(
                    "'{}' declares '{}' more than once",
                    metadata.name(),
                    field
                )));
            }
        }
        for relation in metadata.relations() {
            if let Some(pivot) = &relation.pivot_table {
                naming::validate_identifier("table", pivot)?;
            }
        }
        Ok(())
    }

    fn resolve_relations(&mut self, tables: &mut HashSet<String>) -> Result<()> {
        let mut joins = Vec::new();
        let mut paths = HashMap::new();

        for name in &self.order {
            let mapping = &self.entities[name];
            for relation in mapping.metadata().relations().iter().filter(|r| r.owner) {
                let target = self.target_of(name, relation)?;
                let inverse_relation = self.check_inverse(name, relation, target.metadata())?;

                let join = Arc::new(Self::join_table(
                    mapping.metadata(),
                    relation,
                    target.metadata(),
                    inverse_relation,
                ));
                if !tables.insert(join.table.clone()) {
                    return Err(DbError::ValidationError(format!(
                        "Join table '{}' of '{}.{}' collides with another table",
                        join.table, name, relation.name
                    )));
                }

                paths.insert(
                    (name.clone(), relation.name.clone()),
                    JoinPath {
                        join: Arc::clone(&join),
                        from_owner: true,
                    },
                );
                joins.push(join);
            }
        }

        for name in &self.order {
            let mapping = &self.entities[name];
            for relation in mapping.metadata().relations().iter().filter(|r| !r.owner) {
                self.target_of(name, relation)?;
                let mapped_by = relation.mapped_by.as_deref().ok_or_else(|| {
                    DbError::ValidationError(format!(
                        "Inverse relation '{}.{}' needs mapped_by",
                        name, relation.name
                    ))
                })?;

                let owning = paths
                    .get(&(relation.target.clone(), mapped_by.to_string()))
                    .filter(|path| path.join.target_entity == *name)
                    .ok_or_else(|| {
                        DbError::ValidationError(format!(
                            "'{}.{}' is mapped by '{}.{}', which is not an owning relation to '{}'",
                            name, relation.name, relation.target, mapped_by, name
                        ))
                    })?;
                if let Some(inverse) = &owning.join.inverse_relation
                    && inverse != &relation.name
                {
                    return Err(DbError::ValidationError(format!(
                        "'{}.{}' is inversed by '{}', not '{}'",
                        relation.target, mapped_by, inverse, relation.name
                    )));
                }

                let mut join = owning.join.as_ref().clone();
                join.inverse_relation = Some(relation.name.clone());
                let join = Arc::new(join);
                if let Some(slot) = joins.iter_mut().find(|j| j.table == join.table) {
                    *slot = Arc::clone(&join);
                }
                if let Some(owner_path) = paths.get_mut(&(relation.target.clone(), mapped_by.to_string())) {
                    owner_path.join = Arc::clone(&join);
                }
                paths.insert(
                    (name.clone(), relation.name.clone()),
                    JoinPath {
                        join,
                        from_owner: false,
                    },
                );
            }
        }

        self.joins = joins;
        self.paths = paths;
        Ok(())
    }

    fn target_of(&self, name: &str, relation: &ManyToManyMetadata) -> Result<&Arc<EntityMapping>> {
        self.entities.get(&relation.target).ok_or_else(|| {
            DbError::ValidationError(format!(
                "'{}.{}' targets unknown entity '{}'",
                name, relation.name, relation.target
            ))
        })
    }

    fn check_inverse(
        &self,
        owner: &str,
        relation: &ManyToManyMetadata,
        target: &EntityMetadata,
    ) -> Result<Option<String>> {
        let Some(inversed_by) = &relation.inversed_by else {
            return Ok(None);
        };
        match target.get_relation(inversed_by) {
            Some(inverse)
                if !inverse.owner
                    && inverse.target == owner
                    && inverse.mapped_by.as_deref() == Some(relation.name.as_str()) =>
            {
                Ok(Some(inversed_by.clone()))
            }
            _ => Err(DbError::ValidationError(format!(
                "'{}.{}' is inversed by '{}.{}', which does not map it back",
                owner,
                relation.name,
                target.name(),
                inversed_by
            ))),
        }
    }

    fn join_table(
        owner: &EntityMetadata,
        relation: &ManyToManyMetadata,
        target: &EntityMetadata,
        inverse_relation: Option<String>,
    ) -> JoinTableMetadata {
        let table = relation
            .pivot_table
            .clone()
            .unwrap_or_else(|| naming::join_table_name(owner.table_name(), &relation.name));

        let (owner_column, target_column) = if owner.name() == target.name() {
            let pk = &owner.primary_key_property().name;
            (
                naming::join_column_name(&format!("{}_1", owner.table_name()), pk),
                naming::join_column_name(&format!("{}_2", target.table_name()), pk),
            )
        } else {
            (
                naming::join_column_name(owner.table_name(), &owner.primary_key_property().name),
                naming::join_column_name(target.table_name(), &target.primary_key_property().name),
            )
        };

        JoinTableMetadata {
            table,
            owner_entity: owner.name().to_string(),
            owner_relation: relation.name.clone(),
            inverse_relation,
            target_entity: target.name().to_string(),
            owner_table: owner.table_name().to_string(),
            target_table: target.table_name().to_string(),
            owner_column,
            target_column,
        }
    }

    pub fn entity(&self, name: &str) -> Result<Arc<EntityMapping>> {
        self.entities
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::ValidationError(format!("Unknown entity '{}'", name)))
    }

    pub fn entity_names(&self) -> &[String] {
        &self.order
    }

    pub fn join_path(&self, entity: &str, relation: &str) -> Result<&JoinPath> {
        self.paths
            .get(&(entity.to_string(), relation.to_string()))
            .ok_or_else(|| {
                DbError::ValidationError(format!(
                    "'{}' has no many-to-many relation '{}'",
                    entity, relation
                ))
            })
    }

    pub fn join_tables(&self) -> &[Arc<JoinTableMetadata>] {
        &self.joins
    }

    /// Every (join table, column) pair that stores keys of `entity`.
    pub fn join_columns_referencing(&self, entity: &str) -> Vec<(String, String)> {
        let mut refs = Vec::new();
        for join in &self.joins {
            if join.owner_entity == entity {
                refs.push((join.table.clone(), join.owner_column.clone()));
            }
            if join.target_entity == entity {
                refs.push((join.table.clone(), join.target_column.clone()));
            }
        }
        refs
    }

    /// Entity tables in declaration order, then join tables.
    pub fn table_schemas(&self) -> Result<Vec<TableSchema>> {
        let mut schemas: Vec<TableSchema> = self
            .order
            .iter()
            .map(|name| self.entities[name].schema().clone())
            .collect();

        for join in &self.joins {
            let owner_pk = self.entity(&join.owner_entity)?.metadata().primary_key_property().data_type.clone();
            let target_pk = self.entity(&join.target_entity)?.metadata().primary_key_property().data_type.clone();
            let schema = Schema::new(vec![
                Column::new(join.owner_column.clone(), owner_pk).not_null(),
                Column::new(join.target_column.clone(), target_pk).not_null(),
            ])
            .with_unique(&[join.owner_column.as_str(), join.target_column.as_str()])?;
            schemas.push(TableSchema::from_schema(join.table.clone(), schema));
        }
        Ok(schemas)
    }
}
