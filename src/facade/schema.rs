use crate::core::Result;
use crate::metadata::MetadataRegistry;
use crate::storage::InMemoryStorage;

/// Creates and drops the tables described by a registry.
pub struct SchemaGenerator<'a> {
    registry: &'a MetadataRegistry,
    storage: &'a InMemoryStorage,
}

impl<'a> SchemaGenerator<'a> {
    pub(crate) fn new(registry: &'a MetadataRegistry, storage: &'a InMemoryStorage) -> Self {
        Self { registry, storage }
    }

    /// Create every missing entity and join table. Returns how many were
    /// created.
    pub async fn create_schema(&self) -> Result<usize> {
        let mut created = 0;
        for schema in self.registry.table_schemas()? {
            if self.storage.table_exists(schema.name()).await {
                continue;
            }
            tracing::debug!(table = schema.name(), "creating table");
            self.storage.create_table(schema).await?;
            created += 1;
        }
        Ok(created)
    }

    /// Drop every entity and join table that exists. Returns how many were
    /// dropped.
    pub async fn drop_schema(&self) -> Result<usize> {
        let mut dropped = 0;
        for schema in self.registry.table_schemas()?.iter().rev() {
            if self.storage.table_exists(schema.name()).await {
                self.storage.drop_table(schema.name()).await?;
                dropped += 1;
            }
        }
        Ok(dropped)
    }

    /// Drop and recreate every table, leaving an empty database.
    pub async fn refresh_database(&self) -> Result<()> {
        self.drop_schema().await?;
        self.create_schema().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;
    use crate::metadata::{EntityMetadata, ManyToManyMetadata};

    fn registry() -> MetadataRegistry {
        MetadataRegistry::build(vec![
            EntityMetadata::new("User")
                .property("name", DataType::Text)
                .many_to_many(ManyToManyMetadata::owner("labels", "UserLabel")),
            EntityMetadata::new("UserLabel").property("name", DataType::Text),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_drop_schema() {
        let registry = registry();
        let storage = InMemoryStorage::new();
        let generator = SchemaGenerator::new(&registry, &storage);

        assert_eq!(generator.create_schema().await.unwrap(), 3);
        assert_eq!(generator.create_schema().await.unwrap(), 0);
        assert_eq!(storage.list_tables().await.len(), 3);

        assert_eq!(generator.drop_schema().await.unwrap(), 3);
        assert!(storage.list_tables().await.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_database_empties_tables() {
        let registry = registry();
        let storage = InMemoryStorage::new();
        let generator = SchemaGenerator::new(&registry, &storage);
        generator.create_schema().await.unwrap();

        let table = registry.entity("User").unwrap().table_name().to_string();
        {
            let handle = storage.get_table(&table).await.unwrap();
            handle
                .write()
                .await
                .insert(vec![1.into(), "ann".into()])
                .unwrap();
        }
        assert_eq!(storage.row_count(&table).await.unwrap(), 1);

        generator.refresh_database().await.unwrap();
        assert_eq!(storage.row_count(&table).await.unwrap(), 0);
    }
}
