use crate::core::DataType;
use std::sync::Arc;

pub const DEFAULT_DISCRIMINATOR: &str = "type";

#[derive(Debug, Clone, PartialEq)]
pub enum EmbeddedFieldKind {
    Scalar(DataType),
    /// A single nested object, stored as JSON.
    Object(Arc<EmbeddableShape>),
    /// An ordered list of nested objects, stored as a JSON array.
    Array(Arc<EmbeddableShape>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedFieldMetadata {
    pub name: String,
    pub kind: EmbeddedFieldKind,
    pub nullable: bool,
}

impl EmbeddedFieldMetadata {
    pub fn scalar(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            kind: EmbeddedFieldKind::Scalar(data_type),
            nullable: false,
        }
    }

    pub fn object(name: impl Into<String>, shape: EmbeddableShape) -> Self {
        Self {
            name: name.into(),
            kind: EmbeddedFieldKind::Object(Arc::new(shape)),
            nullable: false,
        }
    }

    pub fn array(name: impl Into<String>, shape: EmbeddableShape) -> Self {
        Self {
            name: name.into(),
            kind: EmbeddedFieldKind::Array(Arc::new(shape)),
            nullable: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Type of the inline column this field occupies when it sits directly
    /// on a variant.
    pub fn column_type(&self) -> DataType {
        match &self.kind {
            EmbeddedFieldKind::Scalar(data_type) => data_type.clone(),
            EmbeddedFieldKind::Object(_) | EmbeddedFieldKind::Array(_) => DataType::Json,
        }
    }
}

/// Field layout of one embeddable class.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddableShape {
    name: String,
    fields: Vec<EmbeddedFieldMetadata>,
}

impl EmbeddableShape {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, field: EmbeddedFieldMetadata) -> Self {
        self.fields.push(field);
        self
    }

    /// Required scalar field.
    pub fn property(self, name: impl Into<String>, data_type: DataType) -> Self {
        self.field(EmbeddedFieldMetadata::scalar(name, data_type))
    }

    /// Required array-of-embeddables field.
    pub fn array(self, name: impl Into<String>, shape: EmbeddableShape) -> Self {
        self.field(EmbeddedFieldMetadata::array(name, shape))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[EmbeddedFieldMetadata] {
        &self.fields
    }

    pub fn get_field(&self, name: &str) -> Option<&EmbeddedFieldMetadata> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// A closed set of embeddable variants selected by a stored discriminator.
#[derive(Debug, Clone, PartialEq)]
pub struct PolymorphicEmbeddable {
    name: String,
    discriminator: String,
    variants: Vec<(String, EmbeddableShape)>,
}

impl PolymorphicEmbeddable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            discriminator: DEFAULT_DISCRIMINATOR.to_string(),
            variants: Vec::new(),
        }
    }

    pub fn discriminator(mut self, field: impl Into<String>) -> Self {
        self.discriminator = field.into();
        self
    }

    pub fn variant(mut self, tag: impl Into<String>, shape: EmbeddableShape) -> Self {
        self.variants.push((tag.into(), shape));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn discriminator_field(&self) -> &str {
        &self.discriminator
    }

    pub fn variants(&self) -> &[(String, EmbeddableShape)] {
        &self.variants
    }

    pub fn get_variant(&self, tag: &str) -> Option<&EmbeddableShape> {
        self.variants
            .iter()
            .find(|(t, _)| t == tag)
            .map(|(_, shape)| shape)
    }
}
