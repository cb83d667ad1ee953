use super::embeddable::PolymorphicEmbeddable;
use super::naming;
use crate::core::DataType;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyMetadata {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl PropertyMetadata {
    pub fn column(&self) -> String {
        naming::column_name(&self.name)
    }
}

/// One side of a many-to-many association.
///
/// The owning side names the inverse collection through `inversed_by`; the
/// inverse side names the owning collection through `mapped_by`. Either may
/// be omitted on the owning side for a unidirectional association.
#[derive(Debug, Clone, PartialEq)]
pub struct ManyToManyMetadata {
    pub name: String,
    pub target: String,
    pub owner: bool,
    pub mapped_by: Option<String>,
    pub inversed_by: Option<String>,
    pub pivot_table: Option<String>,
}

impl ManyToManyMetadata {
    pub fn owner(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            owner: true,
            mapped_by: None,
            inversed_by: None,
            pivot_table: None,
        }
    }

    pub fn inverse(
        name: impl Into<String>,
        target: impl Into<String>,
        mapped_by: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            owner: false,
            mapped_by: Some(mapped_by.into()),
            inversed_by: None,
            pivot_table: None,
        }
    }

    pub fn inversed_by(mut self, relation: impl Into<String>) -> Self {
        self.inversed_by = Some(relation.into());
        self
    }

    pub fn pivot_table(mut self, table: impl Into<String>) -> Self {
        self.pivot_table = Some(table.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedPropertyMetadata {
    pub name: String,
    pub embeddable: Arc<PolymorphicEmbeddable>,
    pub nullable: bool,
}

/// What a field name on an entity refers to.
#[derive(Debug, Clone, Copy)]
pub enum FieldRef<'a> {
    PrimaryKey(&'a PropertyMetadata),
    Property(&'a PropertyMetadata),
    Relation(&'a ManyToManyMetadata),
    Embedded(&'a EmbeddedPropertyMetadata),
}

/// Declarative description of an entity type.
///
/// ```
/// use memorm::metadata::{EntityMetadata, ManyToManyMetadata};
/// use memorm::DataType;
///
/// let user = EntityMetadata::new("User")
///     .property("name", DataType::Text)
///     .many_to_many(ManyToManyMetadata::owner("labels", "UserLabel").inversed_by("users"));
/// assert_eq!(user.table_name(), "user");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct EntityMetadata {
    name: String,
    table: String,
    primary_key: PropertyMetadata,
    properties: Vec<PropertyMetadata>,
    relations: Vec<ManyToManyMetadata>,
    embeddeds: Vec<EmbeddedPropertyMetadata>,
}

impl EntityMetadata {
    /// New entity with an integer `id` primary key and a snake-cased table name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            table: naming::table_name(&name),
            name,
            primary_key: PropertyMetadata {
                name: "id".to_string(),
                data_type: DataType::Integer,
                nullable: false,
            },
            properties: Vec::new(),
            relations: Vec::new(),
            embeddeds: Vec::new(),
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn primary_key(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.primary_key = PropertyMetadata {
            name: name.into(),
            data_type,
            nullable: false,
        };
        self
    }

    pub fn property(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.properties.push(PropertyMetadata {
            name: name.into(),
            data_type,
            nullable: false,
        });
        self
    }

    pub fn nullable_property(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.properties.push(PropertyMetadata {
            name: name.into(),
            data_type,
            nullable: true,
        });
        self
    }

    pub fn many_to_many(mut self, relation: ManyToManyMetadata) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn embedded(mut self, name: impl Into<String>, embeddable: PolymorphicEmbeddable) -> Self {
        self.embeddeds.push(EmbeddedPropertyMetadata {
            name: name.into(),
            embeddable: Arc::new(embeddable),
            nullable: false,
        });
        self
    }

    pub fn nullable_embedded(
        mut self,
        name: impl Into<String>,
        embeddable: PolymorphicEmbeddable,
    ) -> Self {
        self.embeddeds.push(EmbeddedPropertyMetadata {
            name: name.into(),
            embeddable: Arc::new(embeddable),
            nullable: true,
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn primary_key_property(&self) -> &PropertyMetadata {
        &self.primary_key
    }

    pub fn properties(&self) -> &[PropertyMetadata] {
        &self.properties
    }

    pub fn relations(&self) -> &[ManyToManyMetadata] {
        &self.relations
    }

    pub fn embeddeds(&self) -> &[EmbeddedPropertyMetadata] {
        &self.embeddeds
    }

    pub fn get_relation(&self, name: &str) -> Option<&ManyToManyMetadata> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn get_embedded(&self, name: &str) -> Option<&EmbeddedPropertyMetadata> {
        self.embeddeds.iter().find(|e| e.name == name)
    }

    pub fn field(&self, name: &str) -> Option<FieldRef<'_>> {
        if self.primary_key.name == name {
            return Some(FieldRef::PrimaryKey(&self.primary_key));
        }
        if let Some(prop) = self.properties.iter().find(|p| p.name == name) {
            return Some(FieldRef::Property(prop));
        }
        if let Some(rel) = self.get_relation(name) {
            return Some(FieldRef::Relation(rel));
        }
        self.get_embedded(name).map(FieldRef::Embedded)
    }

    /// Every declared field name, primary key first.
    pub fn field_names(&self) -> Vec<&str> {
        std::iter::once(self.primary_key.name.as_str())
            .chain(self.properties.iter().map(|p| p.name.as_str()))
            .chain(self.relations.iter().map(|r| r.name.as_str()))
            .chain(self.embeddeds.iter().map(|e| e.name.as_str()))
            .collect()
    }
}
