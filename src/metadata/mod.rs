//! Entity, relation and embeddable declarations, and the registry that
//! resolves them into table layouts.

pub mod embeddable;
pub mod entity;
pub mod naming;
pub mod registry;

pub use embeddable::{
    DEFAULT_DISCRIMINATOR, EmbeddableShape, EmbeddedFieldKind, EmbeddedFieldMetadata,
    PolymorphicEmbeddable,
};
pub use entity::{
    EmbeddedPropertyMetadata, EntityMetadata, FieldRef, ManyToManyMetadata, PropertyMetadata,
};
pub use registry::{EntityMapping, JoinPath, JoinTableMetadata, MetadataRegistry};
