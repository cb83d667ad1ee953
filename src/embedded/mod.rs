//! Embedded values: identity-less objects stored inline in their owner's row.

pub mod codec;
pub mod mapper;
pub mod value;

pub use mapper::{DiscriminatedEmbeddedMapper, RowFragment};
pub use value::{EmbeddedField, EmbeddedObject, PolymorphicValue};
