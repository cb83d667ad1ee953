// ============================================================================
// Transaction Scope
// ============================================================================
//
// Copy-on-write write scope over InMemoryStorage. Touched tables are cloned
// on first use, changes are applied to the clones, and commit swaps all of
// them in under write guards taken in table-name order. Dropping an
// uncommitted scope discards the clones, which is the rollback.
//
// ============================================================================

use super::{Change, Transaction, TransactionId, TransactionState};
use crate::core::{DbError, Result};
use crate::storage::{InMemoryStorage, Table};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{MutexGuard, RwLock};

pub struct TransactionScope<'a> {
    transaction: Transaction,
    storage: &'a InMemoryStorage,
    _writer: MutexGuard<'a, ()>,
    staged: BTreeMap<String, (Arc<RwLock<Table>>, Table)>,
}

impl<'a> TransactionScope<'a> {
    pub(crate) fn new(id: TransactionId, storage: &'a InMemoryStorage, writer: MutexGuard<'a, ()>) -> Self {
        tracing::debug!(txn = %id, "transaction started");
        Self {
            transaction: Transaction::new(id),
            storage,
            _writer: writer,
            staged: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.transaction.id()
    }

    pub fn state(&self) -> TransactionState {
        self.transaction.state()
    }

    pub fn change_count(&self) -> usize {
        self.transaction.change_count()
    }

    pub async fn apply_all<I>(&mut self, changes: I) -> Result<()>
    where
        I: IntoIterator<Item = Change>,
    {
        for change in changes {
            self.apply(change).await?;
        }
        Ok(())
    }

    pub async fn apply(&mut self, change: Change) -> Result<()> {
        self.transaction.record_change()?;
        match change {
            Change::InsertRow { table, row } => {
                self.staged_table(&table).await?.insert(row)?;
            }
            Change::UpdateRow { table, key, row } => {
                if !self.staged_table(&table).await?.update_by_key(&key, row)? {
                    return Err(DbError::StorageError(format!(
                        "Row {} in '{}' no longer exists",
                        key, table
                    )));
                }
            }
            Change::DeleteRow { table, key } => {
                self.staged_table(&table).await?.delete_by_key(&key);
            }
            Change::Link {
                table,
                owner,
                target,
                owner_table,
                target_table,
            } => {
                for (referenced, key) in [(&owner_table, &owner), (&target_table, &target)] {
                    if !self.staged_table(referenced).await?.contains_key(key) {
                        return Err(DbError::ConstraintViolation(format!(
                            "Join table '{}' references non-existent key {} in '{}'",
                            table, key, referenced
                        )));
                    }
                }
                let join = self.staged_table(&table).await?;
                let pair = [owner, target];
                if join.find_unique(0, &pair).is_none() {
                    join.insert(pair.to_vec())?;
                }
            }
            Change::Unlink { table, owner, target } => {
                self.staged_table(&table)
                    .await?
                    .delete_matching(&[(0, owner), (1, target)]);
            }
            Change::UnlinkAll { table, column, key } => {
                let join = self.staged_table(&table).await?;
                let idx = join
                    .schema()
                    .schema()
                    .find_column_index(&column)
                    .ok_or_else(|| DbError::ColumnNotFound(column.clone(), table.clone()))?;
                join.delete_matching(&[(idx, key)]);
            }
        }
        Ok(())
    }

    /// Publish every staged table. Either all of them become visible or,
    /// if the scope was already finished, none do.
    pub async fn commit(mut self) -> Result<()> {
        self.transaction.commit()?;

        let staged = std::mem::take(&mut self.staged);
        let mut guards = Vec::with_capacity(staged.len());
        for (_, (handle, table)) in staged {
            guards.push((handle.write_owned().await, table));
        }
        for (mut guard, table) in guards {
            *guard = table;
        }

        tracing::debug!(
            txn = %self.transaction.id(),
            changes = self.transaction.change_count(),
            elapsed_us = self.transaction.duration().as_micros() as u64,
            "transaction committed"
        );
        Ok(())
    }

    pub fn rollback(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        if self.transaction.rollback().is_ok() {
            self.staged.clear();
            tracing::debug!(
                txn = %self.transaction.id(),
                changes = self.transaction.change_count(),
                "transaction rolled back"
            );
        }
    }

    async fn staged_table(&mut self, name: &str) -> Result<&mut Table> {
        if !self.staged.contains_key(name) {
            let handle = self.storage.get_table(name).await?;
            let copy = handle.read().await.clone();
            self.staged.insert(name.to_string(), (handle, copy));
        }
        self.staged
            .get_mut(name)
            .map(|(_, table)| table)
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        if self.transaction.state().is_active() {
            self.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, DataType, Schema, Value};
    use crate::storage::TableSchema;

    async fn storage() -> InMemoryStorage {
        let storage = InMemoryStorage::new();
        for name in ["user", "label"] {
            storage
                .create_table(TableSchema::new(
                    name,
                    vec![Column::new("id", DataType::Integer).primary_key()],
                ))
                .await
                .unwrap();
        }
        let join = Schema::new(vec![
            Column::new("user_id", DataType::Integer).not_null(),
            Column::new("label_id", DataType::Integer).not_null(),
        ])
        .with_unique(&["user_id", "label_id"])
        .unwrap();
        storage
            .create_table(TableSchema::from_schema("user_labels", join))
            .await
            .unwrap();
        storage
    }

    fn link(owner: i64, target: i64) -> Change {
        Change::Link {
            table: "user_labels".into(),
            owner: Value::Integer(owner),
            target: Value::Integer(target),
            owner_table: "user".into(),
            target_table: "label".into(),
        }
    }

    fn insert(table: &str, id: i64) -> Change {
        Change::InsertRow {
            table: table.into(),
            row: vec![Value::Integer(id)],
        }
    }

    #[tokio::test]
    async fn test_commit_publishes_all_tables() {
        let storage = storage().await;
        let mut scope = storage.begin().await;
        scope
            .apply_all(vec![insert("user", 1), insert("label", 1), link(1, 1), link(1, 1)])
            .await
            .unwrap();
        assert_eq!(scope.change_count(), 4);
        scope.commit().await.unwrap();

        assert_eq!(storage.row_count("user").await.unwrap(), 1);
        // the second link of the same pair is a no-op
        assert_eq!(storage.row_count("user_labels").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_drop_rolls_back() {
        let storage = storage().await;
        {
            let mut scope = storage.begin().await;
            scope.apply(insert("user", 1)).await.unwrap();
        }
        assert_eq!(storage.row_count("user").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_change_leaves_storage_untouched() {
        let storage = storage().await;
        let result = async {
            let mut scope = storage.begin().await;
            scope.apply(insert("user", 1)).await?;
            scope.apply(link(1, 99)).await?;
            scope.commit().await
        }
        .await;

        assert!(matches!(result, Err(DbError::ConstraintViolation(_))));
        assert_eq!(storage.row_count("user").await.unwrap(), 0);
        assert_eq!(storage.row_count("user_labels").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unlink_all_by_column() {
        let storage = storage().await;
        let mut scope = storage.begin().await;
        scope
            .apply_all(vec![
                insert("user", 1),
                insert("label", 1),
                insert("label", 2),
                link(1, 1),
                link(1, 2),
            ])
            .await
            .unwrap();
        scope.commit().await.unwrap();

        let mut scope = storage.begin().await;
        scope
            .apply(Change::UnlinkAll {
                table: "user_labels".into(),
                column: "label_id".into(),
                key: Value::Integer(2),
            })
            .await
            .unwrap();
        scope.commit().await.unwrap();

        let rows = storage.scan_table("user_labels").await.unwrap();
        assert_eq!(rows, vec![vec![Value::Integer(1), Value::Integer(1)]]);
    }
}
