// ============================================================================
// Entity Manager Module
// ============================================================================
//
// An EntityManager owns an identity map and a unit of work over the shared
// storage. Entities are tracked in memory and written by `flush` inside one
// TransactionScope.
//
// ============================================================================

pub mod collection;
pub mod entity_manager;
pub mod store;
mod unit_of_work;

pub use collection::CollectionHandle;
pub use entity_manager::EntityManager;
pub use store::EntityStore;
