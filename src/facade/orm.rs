use super::schema::SchemaGenerator;
use crate::config::{DebugCategory, OrmConfig};
use crate::core::{DbError, Result};
use crate::manager::EntityManager;
use crate::metadata::MetadataRegistry;
use crate::storage::InMemoryStorage;
use log::warn;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Entry point: validated metadata plus the shared table store.
///
/// Every `EntityManager` obtained from `em()` has its own identity map and
/// unit of work; they share storage and metadata.
///
/// ```
/// use memorm::{DataType, EntityFields, EntityStore, Orm, OrmConfig};
/// use memorm::metadata::EntityMetadata;
/// use memorm::query::Filter;
///
/// # tokio_test::block_on(async {
/// let config = OrmConfig::new()
///     .entity(EntityMetadata::new("Book").property("title", DataType::Text));
/// let orm = Orm::init(config).await.unwrap();
///
/// let mut em = orm.em().unwrap();
/// em.create("Book", EntityFields::new().set("id", 1).set("title", "Dune"))
///     .await
///     .unwrap();
/// em.flush().await.unwrap();
///
/// assert_eq!(em.count("Book", &Filter::new()).await.unwrap(), 1);
/// # });
/// ```
pub struct Orm {
    registry: Arc<MetadataRegistry>,
    storage: Arc<InMemoryStorage>,
    config: Arc<OrmConfig>,
    closed: Arc<AtomicBool>,
}

impl Orm {
    /// Validate the configured entities and, unless disabled, create their
    /// tables.
    pub async fn init(config: OrmConfig) -> Result<Self> {
        let registry = MetadataRegistry::build(config.entities.clone())?;
        tracing::info!(
            db = %config.db_name,
            url = %config.to_url(),
            entities = registry.entity_names().len(),
            join_tables = registry.join_tables().len(),
            "initialized ORM"
        );
        if config.is_debug_enabled(DebugCategory::Discovery) {
            for name in registry.entity_names() {
                let mapping = registry.entity(name)?;
                tracing::debug!(
                    entity = %name,
                    table = mapping.table_name(),
                    columns = mapping.schema().schema().column_count(),
                    embedded = mapping.mappers().len(),
                    "discovered entity"
                );
            }
            for join in registry.join_tables() {
                tracing::debug!(
                    table = %join.table,
                    owner = %join.owner_entity,
                    target = %join.target_entity,
                    "discovered join table"
                );
            }
        }

        let orm = Self {
            registry: Arc::new(registry),
            storage: Arc::new(InMemoryStorage::new()),
            config: Arc::new(config),
            closed: Arc::new(AtomicBool::new(false)),
        };
        if orm.config.ensure_schema {
            orm.schema().create_schema().await?;
        }
        Ok(orm)
    }

    /// A fresh entity manager.
    pub fn em(&self) -> Result<EntityManager> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DbError::ConfigError(format!(
                "ORM for '{}' is closed",
                self.config.db_name
            )));
        }
        Ok(EntityManager::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.storage),
            Arc::clone(&self.config),
            Arc::clone(&self.closed),
        ))
    }

    pub fn schema(&self) -> SchemaGenerator<'_> {
        SchemaGenerator::new(&self.registry, &self.storage)
    }

    pub fn metadata(&self) -> &MetadataRegistry {
        &self.registry
    }

    pub fn config(&self) -> &OrmConfig {
        &self.config
    }

    pub fn storage(&self) -> &InMemoryStorage {
        &self.storage
    }

    /// Reject further `em()` and `fork()` calls. Existing managers keep
    /// working.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            warn!("ORM for '{}' closed twice", self.config.db_name);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;
    use crate::manager::EntityStore;
    use crate::metadata::EntityMetadata;
    use crate::query::Filter;

    fn config() -> OrmConfig {
        OrmConfig::new()
            .db_name("library")
            .entity(EntityMetadata::new("Book").property("title", DataType::Text))
    }

    #[tokio::test]
    async fn test_init_creates_tables() {
        let orm = Orm::init(config()).await.unwrap();
        assert!(orm.storage().table_exists("book").await);
    }

    #[tokio::test]
    async fn test_init_without_schema() {
        let orm = Orm::init(config().ensure_schema(false)).await.unwrap();
        assert!(!orm.storage().table_exists("book").await);
        orm.schema().create_schema().await.unwrap();
        assert!(orm.storage().table_exists("book").await);
    }

    #[tokio::test]
    async fn test_invalid_metadata_is_rejected() {
        let config = OrmConfig::new().entity(EntityMetadata::new("Bad Name"));
        assert!(matches!(
            Orm::init(config).await,
            Err(DbError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_fork_before_close() {
        let orm = Orm::init(config()).await.unwrap();
        let em = orm.em().unwrap();
        let fork = em.fork().unwrap();
        assert_ne!(em.id(), fork.id());
    }

    #[tokio::test]
    async fn test_closed_orm_rejects_managers() {
        let orm = Orm::init(config()).await.unwrap();
        let em = orm.em().unwrap();
        orm.close();
        orm.close();
        assert!(orm.is_closed());
        assert!(matches!(orm.em(), Err(DbError::ConfigError(_))));
        assert!(matches!(em.fork(), Err(DbError::ConfigError(_))));
        assert_eq!(em.count("Book", &Filter::new()).await.unwrap(), 0);
    }
}
