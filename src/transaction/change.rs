// ============================================================================
// Transaction Change Tracking
// ============================================================================
//
// Each Change is one storage command produced by a flush. Changes are
// applied against staged table copies and only become visible on commit.
//
// ============================================================================

use crate::core::{Row, Value};

/// Represents a single write inside a transaction scope
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Insert a new entity row
    InsertRow { table: String, row: Row },

    /// Replace an existing entity row, located by primary key
    UpdateRow { table: String, key: Value, row: Row },

    /// Delete an entity row by primary key
    DeleteRow { table: String, key: Value },

    /// Add an (owner, target) pair to a join table. Pairs that already exist
    /// are left alone; both keys must exist in their entity tables.
    Link {
        table: String,
        owner: Value,
        target: Value,
        owner_table: String,
        target_table: String,
    },

    /// Remove an (owner, target) pair from a join table
    Unlink { table: String, owner: Value, target: Value },

    /// Remove every join row whose `column` equals `key`
    UnlinkAll { table: String, column: String, key: Value },
}

impl Change {
    /// Get the table name affected by this change
    pub fn table_name(&self) -> &str {
        match self {
            Change::InsertRow { table, .. } => table,
            Change::UpdateRow { table, .. } => table,
            Change::DeleteRow { table, .. } => table,
            Change::Link { table, .. } => table,
            Change::Unlink { table, .. } => table,
            Change::UnlinkAll { table, .. } => table,
        }
    }

    /// Check if this change touches a join table rather than an entity table
    pub fn is_association(&self) -> bool {
        matches!(
            self,
            Change::Link { .. } | Change::Unlink { .. } | Change::UnlinkAll { .. }
        )
    }
}
