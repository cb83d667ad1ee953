use super::entity_manager::EntityManager;
use super::unit_of_work::LinkOp;
use crate::core::{DbError, Result};
use crate::entity::{EntityKey, EntityRef, EntityState};
use crate::metadata::JoinPath;

/// Mutable view of one many-to-many collection of a managed entity.
///
/// Adds and removals become join-row changes at the next flush. Either side
/// of a bidirectional relation can be used; both are stored in the owning
/// side's join table.
pub struct CollectionHandle<'a> {
    em: &'a mut EntityManager,
    owner: EntityRef,
    relation: String,
    path: JoinPath,
}

impl<'a> CollectionHandle<'a> {
    pub(crate) fn new(em: &'a mut EntityManager, owner: EntityRef, relation: String, path: JoinPath) -> Self {
        Self {
            em,
            owner,
            relation,
            path,
        }
    }

    pub fn relation(&self) -> &str {
        &self.relation
    }

    /// Add `entity`. A new entity is persisted along with it.
    pub fn add(&mut self, entity: &EntityRef) -> Result<()> {
        self.check_target(entity)?;
        if entity.state()? == EntityState::New {
            self.em.persist(entity)?;
        }
        self.add_key(entity.key()?)
    }

    pub fn remove(&mut self, entity: &EntityRef) -> Result<()> {
        self.check_target(entity)?;
        self.remove_key(entity.key()?)
    }

    /// Add a member by primary key. The member does not have to be loaded.
    pub fn add_key(&mut self, key: impl Into<EntityKey>) -> Result<()> {
        self.record(key.into(), LinkOp::Link)
    }

    pub fn remove_key(&mut self, key: impl Into<EntityKey>) -> Result<()> {
        self.record(key.into(), LinkOp::Unlink)
    }

    pub fn contains(&self, key: &EntityKey) -> Result<bool> {
        Ok(self.owner.collection_keys(&self.relation)?.contains(key))
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.owner.collection_keys(&self.relation)?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn keys(&self) -> Result<Vec<EntityKey>> {
        self.owner.collection_keys(&self.relation)
    }

    fn record(&mut self, key: EntityKey, op: LinkOp) -> Result<()> {
        let owner_key = self.owner.key()?;
        self.em
            .record_link(&self.owner, &owner_key, &self.relation, &self.path, key, op)
    }

    fn check_target(&self, entity: &EntityRef) -> Result<()> {
        let name = entity.entity_name()?;
        if name != self.path.related_entity() {
            return Err(DbError::ValidationError(format!(
                "'{}.{}' holds '{}', not '{}'",
                self.owner.entity_name()?,
                self.relation,
                self.path.related_entity(),
                name
            )));
        }
        Ok(())
    }
}
