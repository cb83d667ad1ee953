use crate::core::Result;
use crate::entity::{EntityFields, EntityKey, EntityRef};
use crate::query::Filter;
use async_trait::async_trait;

/// Persistence operations both the existence predicate and the embedded
/// mapper are exercised through.
#[async_trait]
pub trait EntityStore: Send {
    /// Build an entity from `fields` and start tracking it. The insert
    /// happens at the next flush.
    async fn create(&mut self, entity: &str, fields: EntityFields) -> Result<EntityRef>;

    /// Write every pending change in one transaction.
    async fn flush(&mut self) -> Result<()>;

    /// Forget all tracked entities and pending changes. Handles returned so
    /// far become detached.
    fn clear(&mut self);

    /// Number of stored rows of `entity` matching `filter`.
    async fn count(&self, entity: &str, filter: &Filter) -> Result<usize>;

    /// Entity with primary key `key`, or `DbError::NotFound`.
    async fn find_one_or_fail(&mut self, entity: &str, key: EntityKey) -> Result<EntityRef>;
}
