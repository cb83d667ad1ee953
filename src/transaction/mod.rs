// ============================================================================
// Transaction Management Module
// ============================================================================
//
// Flushes run inside a TransactionScope: writers are serialised, touched
// tables are staged copy-on-write, and the scope either commits every staged
// table at once or rolls back when dropped.
//
// ============================================================================

pub mod change;
pub mod scope;
pub mod state;

pub use change::Change;
pub use scope::TransactionScope;
pub use state::{Transaction, TransactionId, TransactionState};
