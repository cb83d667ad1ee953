use super::collection::CollectionHandle;
use super::store::EntityStore;
use super::unit_of_work::{LinkOp, UnitOfWork};
use crate::config::{DebugCategory, OrmConfig};
use crate::core::{DbError, Result, Row};
use crate::entity::{EntityFields, EntityKey, EntityRef, EntityState};
use crate::metadata::{EntityMapping, JoinPath, MetadataRegistry};
use crate::query::{CompiledFilter, Filter, FindOptions};
use crate::storage::InMemoryStorage;
use crate::transaction::Change;
use async_trait::async_trait;
use log::warn;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{Instrument, info_span};
use uuid::Uuid;

type IdentityKey = (String, EntityKey);

/// Identity map plus unit of work over a shared table store.
///
/// Each key maps to at most one `EntityRef` per manager. Changes are
/// collected in memory and written by `flush` in a single transaction.
/// Reads (`count`, `find*`) see flushed data only.
pub struct EntityManager {
    id: Uuid,
    registry: Arc<MetadataRegistry>,
    storage: Arc<InMemoryStorage>,
    config: Arc<OrmConfig>,
    closed: Arc<AtomicBool>,
    identity_map: BTreeMap<IdentityKey, EntityRef>,
    unit_of_work: UnitOfWork,
}

/// Changes of one flush plus what to do with the handles once it commits.
struct ChangeSet {
    changes: Vec<Change>,
    updated: Vec<EntityRef>,
}

impl EntityManager {
    pub(crate) fn new(
        registry: Arc<MetadataRegistry>,
        storage: Arc<InMemoryStorage>,
        config: Arc<OrmConfig>,
        closed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            registry,
            storage,
            config,
            closed,
            identity_map: BTreeMap::new(),
            unit_of_work: UnitOfWork::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// A fresh manager over the same store and metadata, with an empty
    /// identity map. Fails once the owning `Orm` is closed.
    pub fn fork(&self) -> Result<EntityManager> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DbError::ConfigError(format!(
                "ORM for '{}' is closed",
                self.config.db_name
            )));
        }
        Ok(Self::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.storage),
            Arc::clone(&self.config),
            Arc::clone(&self.closed),
        ))
    }

    pub fn registry(&self) -> &MetadataRegistry {
        &self.registry
    }

    pub fn is_managed(&self, entity: &EntityRef) -> bool {
        self.identity_map.values().any(|e| e.same_entity(entity))
    }

    pub fn has_pending_changes(&self) -> bool {
        self.unit_of_work.has_changes() || self.dirty_entities().next().is_some()
    }

    fn dirty_entities(&self) -> impl Iterator<Item = &EntityRef> {
        self.identity_map.values().filter(|e| {
            matches!(e.state(), Ok(EntityState::Persisted)) && e.is_dirty().unwrap_or(false)
        })
    }

    /// Build an untracked entity. Property types, required fields, embedded
    /// variants and collection key types are all checked here.
    pub fn build(&self, entity: &str, fields: EntityFields) -> Result<EntityRef> {
        let mapping = self.registry.entity(entity)?;
        let resolved = fields.resolve(&self.registry, &mapping)?;
        mapping.row_from_data(&resolved.data)?;

        let handle = EntityRef::new(Arc::clone(&mapping), resolved.data, EntityState::New);
        for (relation, keys) in resolved.relations {
            let path = self.registry.join_path(entity, &relation)?;
            let target = self.registry.entity(path.related_entity())?;
            let pk_type = &target.metadata().primary_key_property().data_type;
            if let Some(bad) = keys.iter().find(|k| !k.matches_type(pk_type)) {
                return Err(DbError::ValidationError(format!(
                    "{} is not a valid key for '{}.{}'",
                    bad, entity, relation
                )));
            }
            handle.init_collection(&relation, keys.into_iter().collect())?;
        }
        Ok(handle)
    }

    /// Start tracking a built entity. Its collection members are linked at
    /// the next flush.
    pub fn persist(&mut self, entity: &EntityRef) -> Result<()> {
        match entity.state()? {
            EntityState::New => {}
            // its links and collection entries are already gone
            EntityState::Removed if self.is_managed(entity) => {
                return Err(DbError::ValidationError(format!(
                    "Removed entity '{}' cannot be persisted again before flush or clear",
                    entity.entity_name()?
                )));
            }
            EntityState::Managed | EntityState::Persisted | EntityState::Removed => {
                if self.is_managed(entity) {
                    return Ok(());
                }
                return Err(DbError::ValidationError(format!(
                    "Entity '{}' is managed by another entity manager",
                    entity.entity_name()?
                )));
            }
            EntityState::Detached => return Err(DbError::DetachedEntity(entity.entity_name()?)),
        }

        let mapping = entity.mapping()?;
        let key = entity.key()?;
        let identity = (mapping.name().to_string(), key.clone());
        if self.identity_map.contains_key(&identity) {
            return Err(DbError::ValidationError(format!(
                "{} {} is already managed by this entity manager",
                mapping.name(),
                key
            )));
        }

        entity.set_state(EntityState::Managed)?;
        self.identity_map.insert(identity, entity.clone());
        self.unit_of_work.schedule_insert(entity.clone());

        for (relation, keys) in entity.initialized_collections()? {
            let path = self.registry.join_path(mapping.name(), &relation)?.clone();
            for related in keys {
                self.record_link(entity, &key, &relation, &path, related, LinkOp::Link)?;
            }
        }
        Ok(())
    }

    pub async fn persist_and_flush(&mut self, entity: &EntityRef) -> Result<()> {
        self.persist(entity)?;
        self.flush().await
    }

    /// Schedule deletion. A pending insert is simply dropped; a stored
    /// entity is deleted, with its join rows, at the next flush.
    pub fn remove(&mut self, entity: &EntityRef) -> Result<()> {
        if !self.is_managed(entity) {
            return match entity.state()? {
                EntityState::Detached => Err(DbError::DetachedEntity(entity.entity_name()?)),
                _ => Err(DbError::ValidationError(format!(
                    "Entity '{}' is not managed by this entity manager",
                    entity.entity_name()?
                ))),
            };
        }

        let name = entity.entity_name()?;
        let key = entity.key()?;
        self.unit_of_work.drop_links_involving(&name, &key);
        self.forget_in_collections(&name, &key)?;

        match entity.state()? {
            EntityState::Managed => {
                self.unit_of_work.cancel_insert(entity);
                self.identity_map.remove(&(name, key));
                entity.set_state(EntityState::Detached)
            }
            EntityState::Persisted => {
                entity.set_state(EntityState::Removed)?;
                self.unit_of_work.schedule_removal(entity.clone());
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn forget_in_collections(&self, entity: &str, key: &EntityKey) -> Result<()> {
        for handle in self.identity_map.values() {
            let mapping = handle.mapping()?;
            for relation in mapping.metadata().relations() {
                let path = self.registry.join_path(mapping.name(), &relation.name)?;
                if path.related_entity() == entity {
                    handle.track_collection(&relation.name, key, false)?;
                }
            }
        }
        Ok(())
    }

    /// Access a collection of a managed entity.
    pub fn collection(&mut self, owner: &EntityRef, relation: &str) -> Result<CollectionHandle<'_>> {
        if !self.is_managed(owner) {
            return match owner.state()? {
                EntityState::Detached => Err(DbError::DetachedEntity(owner.entity_name()?)),
                _ => Err(DbError::ValidationError(format!(
                    "Entity '{}' is not managed by this entity manager",
                    owner.entity_name()?
                ))),
            };
        }
        let name = owner.entity_name()?;
        let path = self.registry.join_path(&name, relation)?.clone();
        Ok(CollectionHandle::new(self, owner.clone(), relation.to_string(), path))
    }

    /// Record a pending link or unlink, seen from `owner`'s side of
    /// `relation`, and mirror it into initialized in-memory collections.
    pub(crate) fn record_link(
        &mut self,
        owner: &EntityRef,
        owner_key: &EntityKey,
        relation: &str,
        path: &JoinPath,
        related: EntityKey,
        op: LinkOp,
    ) -> Result<()> {
        let target = self.registry.entity(path.related_entity())?;
        if !related.matches_type(&target.metadata().primary_key_property().data_type) {
            return Err(DbError::ValidationError(format!(
                "{} is not a valid key for '{}'",
                related,
                target.name()
            )));
        }

        let (owning, inverse) = path.owning_pair(owner_key.clone(), related.clone());
        self.unit_of_work.schedule_link(&path.join, owning, inverse, op);

        let present = op == LinkOp::Link;
        owner.track_collection(relation, &related, present)?;

        let mirrored = if path.from_owner {
            path.join.inverse_relation.clone()
        } else {
            Some(path.join.owner_relation.clone())
        };
        if let Some(mirrored) = mirrored
            && let Some(other) = self
                .identity_map
                .get(&(path.related_entity().to_string(), related))
            && !other.same_entity(owner)
        {
            other.track_collection(&mirrored, owner_key, present)?;
        }
        Ok(())
    }

    /// Load the members of a collection, initializing it on the handle.
    /// Pending adds and removals of this manager are applied on top of the
    /// stored join rows.
    pub async fn load_collection(&mut self, owner: &EntityRef, relation: &str) -> Result<Vec<EntityRef>> {
        let name = owner.entity_name()?;
        let path = self.registry.join_path(&name, relation)?.clone();
        let target = self.registry.entity(path.related_entity())?;
        let owner_key = owner.key()?;

        let view = self
            .storage
            .read_view([path.join.table.clone(), target.table_name().to_string()])
            .await?;

        let mut keys = BTreeSet::new();
        if owner.state()? != EntityState::Managed {
            let join = view.table(&path.join.table)?;
            let columns = join.schema().schema();
            let source = columns
                .find_column_index(path.source_column())
                .ok_or_else(|| DbError::ColumnNotFound(path.source_column().to_string(), path.join.table.clone()))?;
            let related = columns
                .find_column_index(path.related_column())
                .ok_or_else(|| DbError::ColumnNotFound(path.related_column().to_string(), path.join.table.clone()))?;
            let owner_value = owner_key.to_value();
            for row in join.rows().filter(|row| row[source] == owner_value) {
                keys.insert(EntityKey::from_value(&row[related])?);
            }
        }
        for (other, op) in self
            .unit_of_work
            .pending_for(&path.join.table, path.from_owner, &owner_key)
        {
            match op {
                LinkOp::Link => keys.insert(other),
                LinkOp::Unlink => keys.remove(&other),
            };
        }

        let mut rows = Vec::with_capacity(keys.len());
        for key in &keys {
            let identity = (target.name().to_string(), key.clone());
            if self.identity_map.contains_key(&identity) {
                rows.push(None);
                continue;
            }
            let row = view.table(target.table_name())?.get_by_key(&key.to_value()).cloned();
            match row {
                Some(row) => rows.push(Some(row)),
                None => {
                    return Err(DbError::NotFound {
                        entity: target.name().to_string(),
                        key: key.to_string(),
                    });
                }
            }
        }
        drop(view);

        let mut members = Vec::with_capacity(keys.len());
        for (key, row) in keys.iter().zip(rows) {
            let member = match row {
                Some(row) => self.attach_row(&target, row)?,
                None => self.identity_map[&(target.name().to_string(), key.clone())].clone(),
            };
            members.push(member);
        }
        owner.init_collection(relation, keys)?;
        Ok(members)
    }

    pub async fn find(&mut self, entity: &str, filter: &Filter) -> Result<Vec<EntityRef>> {
        self.find_with(entity, filter, &FindOptions::default()).await
    }

    /// Entities matching `filter`, selected exactly as `count` selects
    /// them, then ordered and paged. Already-managed entities are returned
    /// as their existing handles.
    pub async fn find_with(&mut self, entity: &str, filter: &Filter, options: &FindOptions) -> Result<Vec<EntityRef>> {
        let compiled = CompiledFilter::compile(&self.registry, entity, filter)?;
        options.validate(compiled.entity())?;
        self.log_query(&compiled, "{alias}.*", options);

        let mapping = self.registry.entity(entity)?;
        let view = self.storage.read_view(compiled.tables()).await?;
        let selected = options.apply(&mapping, compiled.select(&view)?)?;
        let rows: Vec<Row> = selected.into_iter().cloned().collect();
        drop(view);

        rows.into_iter().map(|row| self.attach_row(&mapping, row)).collect()
    }

    pub async fn find_one(&mut self, entity: &str, filter: &Filter) -> Result<Option<EntityRef>> {
        let mut found = self
            .find_with(entity, filter, &FindOptions::default().limit(1))
            .await?;
        Ok(found.pop())
    }

    fn attach_row(&mut self, mapping: &Arc<EntityMapping>, row: Row) -> Result<EntityRef> {
        let key = EntityKey::from_value(&mapping.key_of_row(&row))?;
        let identity = (mapping.name().to_string(), key);
        if let Some(existing) = self.identity_map.get(&identity) {
            return Ok(existing.clone());
        }

        let data = mapping.data_from_row(&row)?;
        let entity = EntityRef::new(Arc::clone(mapping), data, EntityState::Persisted);
        tracing::trace!(entity = %identity.0, key = %identity.1, stage = "attached", "hydrated entity");
        self.identity_map.insert(identity, entity.clone());
        Ok(entity)
    }

    fn log_query(&self, compiled: &CompiledFilter, projection: &str, options: &FindOptions) {
        if !self.config.is_debug_enabled(DebugCategory::Query) {
            return;
        }
        let inline = self.config.is_debug_enabled(DebugCategory::QueryParams);
        let (sql, params) = compiled.render(projection, inline);
        let suffix = options.render_suffix(compiled.entity(), "e0");
        tracing::debug!(target: "memorm::query", em = %self.id, params = ?params, "{}{}", sql, suffix);
    }

    fn compute_change_set(&self) -> Result<ChangeSet> {
        let mut changes = Vec::new();

        for entity in self.unit_of_work.inserts() {
            let mapping = entity.mapping()?;
            let row = mapping.row_from_data(&entity.data()?)?;
            changes.push(Change::InsertRow {
                table: mapping.table_name().to_string(),
                row,
            });
        }

        let updated: Vec<EntityRef> = self.dirty_entities().cloned().collect();
        for entity in &updated {
            let mapping = entity.mapping()?;
            let row = mapping.row_from_data(&entity.data()?)?;
            changes.push(Change::UpdateRow {
                table: mapping.table_name().to_string(),
                key: entity.key()?.to_value(),
                row,
            });
        }

        for (link, op) in self.unit_of_work.links() {
            let join = self.unit_of_work.join(&link.table).ok_or_else(|| {
                DbError::StorageError(format!("No join metadata for '{}'", link.table))
            })?;
            changes.push(match op {
                LinkOp::Link => Change::Link {
                    table: link.table.clone(),
                    owner: link.owner.to_value(),
                    target: link.target.to_value(),
                    owner_table: join.owner_table.clone(),
                    target_table: join.target_table.clone(),
                },
                LinkOp::Unlink => Change::Unlink {
                    table: link.table.clone(),
                    owner: link.owner.to_value(),
                    target: link.target.to_value(),
                },
            });
        }

        let mut deletes = Vec::new();
        for entity in self.unit_of_work.removals() {
            let name = entity.entity_name()?;
            let key = entity.key()?.to_value();
            for (table, column) in self.registry.join_columns_referencing(&name) {
                changes.push(Change::UnlinkAll {
                    table,
                    column,
                    key: key.clone(),
                });
            }
            deletes.push(Change::DeleteRow {
                table: entity.mapping()?.table_name().to_string(),
                key,
            });
        }
        changes.extend(deletes);

        Ok(ChangeSet { changes, updated })
    }

    fn after_commit(&mut self, updated: Vec<EntityRef>) -> Result<()> {
        for entity in self.unit_of_work.inserts() {
            entity.set_state(EntityState::Persisted)?;
            entity.mark_clean()?;
        }
        for entity in updated {
            entity.mark_clean()?;
        }
        for entity in self.unit_of_work.removals() {
            let identity = (entity.entity_name()?, entity.key()?);
            self.identity_map.remove(&identity);
            entity.set_state(EntityState::Detached)?;
        }
        self.unit_of_work.reset();
        Ok(())
    }
}

#[async_trait]
impl EntityStore for EntityManager {
    async fn create(&mut self, entity: &str, fields: EntityFields) -> Result<EntityRef> {
        let handle = self.build(entity, fields)?;
        self.persist(&handle)?;
        Ok(handle)
    }

    async fn flush(&mut self) -> Result<()> {
        let ChangeSet { changes, updated } = self.compute_change_set()?;
        if changes.is_empty() {
            return Ok(());
        }

        let span = info_span!("flush", uow = %self.unit_of_work.id(), changes = changes.len());
        let storage = Arc::clone(&self.storage);
        async move {
            let mut scope = storage.begin().await;
            scope.apply_all(changes).await?;
            scope.commit().await
        }
        .instrument(span)
        .await?;

        self.after_commit(updated)
    }

    fn clear(&mut self) {
        if self.has_pending_changes() {
            warn!(
                "clearing entity manager {} with {} pending changes",
                self.id,
                self.unit_of_work.pending_count()
            );
        }
        for entity in self.identity_map.values() {
            if let Err(err) = entity.set_state(EntityState::Detached) {
                warn!("failed to detach entity: {}", err);
            }
        }
        for entity in self.unit_of_work.removals() {
            if let Err(err) = entity.set_state(EntityState::Detached) {
                warn!("failed to detach removed entity: {}", err);
            }
        }
        self.identity_map.clear();
        self.unit_of_work.reset();
    }

    async fn count(&self, entity: &str, filter: &Filter) -> Result<usize> {
        let compiled = CompiledFilter::compile(&self.registry, entity, filter)?;
        self.log_query(&compiled, "count(*)", &FindOptions::default());

        let view = self.storage.read_view(compiled.tables()).await?;
        Ok(compiled.select(&view)?.len())
    }

    async fn find_one_or_fail(&mut self, entity: &str, key: EntityKey) -> Result<EntityRef> {
        let mapping = self.registry.entity(entity)?;
        if !key.matches_type(&mapping.metadata().primary_key_property().data_type) {
            return Err(DbError::ValidationError(format!(
                "{} is not a valid key for '{}'",
                key, entity
            )));
        }

        let identity = (entity.to_string(), key);
        if let Some(existing) = self.identity_map.get(&identity) {
            return Ok(existing.clone());
        }

        match self.storage.get_row(mapping.table_name(), &identity.1.to_value()).await? {
            Some(row) => self.attach_row(&mapping, row),
            None => Err(DbError::NotFound {
                entity: entity.to_string(),
                key: identity.1.to_string(),
            }),
        }
    }
}
