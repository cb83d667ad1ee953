// ============================================================================
// memorm Library
// ============================================================================
//
// An embedded ORM core over an in-memory table store: an identity map and a
// unit of work per EntityManager, many-to-many collection filters evaluated
// as semi-joins, and polymorphic embedded values selected by a stored
// discriminator.
//
// ============================================================================

pub mod config;
pub mod core;
pub mod embedded;
pub mod entity;
pub mod facade;
pub mod manager;
pub mod metadata;
pub mod prelude;
pub mod query;
pub mod storage;
pub mod transaction;

// Re-export main types for convenience
pub use config::{DebugCategory, OrmConfig};
pub use core::{DataType, DbError, Result, Value};
pub use embedded::{EmbeddedField, EmbeddedObject, PolymorphicValue};
pub use entity::{EntityFields, EntityKey, EntityRef, EntityState};
pub use facade::{Orm, SchemaGenerator};
pub use manager::{CollectionHandle, EntityManager, EntityStore};
pub use query::{Filter, FindOptions, Order};
