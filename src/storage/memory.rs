use super::{Table, TableSchema};
use crate::core::{DbError, Result, Row, Value};
use crate::transaction::{TransactionId, TransactionScope};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedRwLockReadGuard, RwLock};

/// Table store shared by every entity manager of one `Orm`.
///
/// Each table sits behind its own lock. Writers are serialised through
/// `write_lock` and publish their staged tables in one step on commit, so
/// readers either see all of a flush or none of it.
pub struct InMemoryStorage {
    tables: RwLock<HashMap<String, Arc<RwLock<Table>>>>,
    write_lock: Mutex<()>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    pub async fn create_table(&self, schema: TableSchema) -> Result<()> {
        let name = schema.name().to_string();
        let mut tables = self.tables.write().await;

        if tables.contains_key(&name) {
            return Err(DbError::TableExists(name));
        }

        tables.insert(name, Arc::new(RwLock::new(Table::new(schema))));
        Ok(())
    }

    pub async fn drop_table(&self, table_name: &str) -> Result<()> {
        if self.tables.write().await.remove(table_name).is_none() {
            return Err(DbError::TableNotFound(table_name.to_string()));
        }
        Ok(())
    }

    pub async fn get_table(&self, name: &str) -> Result<Arc<RwLock<Table>>> {
        self.tables
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    pub async fn table_exists(&self, name: &str) -> bool {
        self.tables.read().await.contains_key(name)
    }

    pub async fn list_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn scan_table(&self, table_name: &str) -> Result<Vec<Row>> {
        let table_handle = self.get_table(table_name).await?;
        let table = table_handle.read().await;
        Ok(table.scan())
    }

    pub async fn get_row(&self, table_name: &str, key: &Value) -> Result<Option<Row>> {
        let table_handle = self.get_table(table_name).await?;
        let table = table_handle.read().await;
        Ok(table.get_by_key(key).cloned())
    }

    pub async fn row_count(&self, table_name: &str) -> Result<usize> {
        let table_handle = self.get_table(table_name).await?;
        let table = table_handle.read().await;
        Ok(table.row_count())
    }

    /// Consistent read access to several tables at once.
    ///
    /// Guards are taken in name order, the same order a commit uses for its
    /// write guards.
    pub async fn read_view<I, S>(&self, table_names: I) -> Result<ReadView>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: BTreeSet<String> = table_names.into_iter().map(Into::into).collect();
        let mut handles = Vec::with_capacity(names.len());
        for name in names {
            let handle = self.get_table(&name).await?;
            handles.push((name, handle));
        }

        let mut guards = BTreeMap::new();
        for (name, handle) in handles {
            guards.insert(name, handle.read_owned().await);
        }
        Ok(ReadView { tables: guards })
    }

    /// Open a write scope. Only one scope exists at a time; dropping it
    /// without `commit` discards everything it staged.
    pub async fn begin(&self) -> TransactionScope<'_> {
        let guard = self.write_lock.lock().await;
        TransactionScope::new(TransactionId::new(), self, guard)
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

/// Read guards over a set of tables, held for the duration of one query.
pub struct ReadView {
    tables: BTreeMap<String, OwnedRwLockReadGuard<Table>>,
}

impl ReadView {
    pub fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .map(|guard| &**guard)
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }
}
