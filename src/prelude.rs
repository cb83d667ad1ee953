//! Everything an application usually needs, in one import.
//!
//! ```
//! use memorm::prelude::*;
//!
//! let user = EntityMetadata::new("User")
//!     .property("name", DataType::Text)
//!     .many_to_many(ManyToManyMetadata::owner("labels", "UserLabel"));
//! let config = OrmConfig::new().entity(user);
//! assert_eq!(config.entities.len(), 1);
//! ```

pub use crate::config::{DebugCategory, OrmConfig};
pub use crate::core::{DataType, DbError, Result, Value};
pub use crate::embedded::{EmbeddedObject, PolymorphicValue};
pub use crate::entity::{EntityFields, EntityKey, EntityRef, EntityState};
pub use crate::facade::Orm;
pub use crate::manager::{EntityManager, EntityStore};
pub use crate::metadata::{
    EmbeddableShape, EntityMetadata, ManyToManyMetadata, PolymorphicEmbeddable,
};
pub use crate::query::{CollectionOperator, Filter, FindOptions, Order};
