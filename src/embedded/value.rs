use crate::core::Value;
use std::collections::BTreeMap;

/// A field inside an embedded object.
#[derive(Debug, Clone, PartialEq)]
pub enum EmbeddedField {
    Value(Value),
    Object(EmbeddedObject),
    Array(Vec<EmbeddedObject>),
}

impl From<Value> for EmbeddedField {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

/// Identity-less structured value owned by an entity.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EmbeddedObject {
    fields: BTreeMap<String, EmbeddedField>,
}

impl EmbeddedObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), EmbeddedField::Value(value.into()));
        self
    }

    pub fn with_object(mut self, name: impl Into<String>, object: EmbeddedObject) -> Self {
        self.fields.insert(name.into(), EmbeddedField::Object(object));
        self
    }

    pub fn with_array(mut self, name: impl Into<String>, items: Vec<EmbeddedObject>) -> Self {
        self.fields.insert(name.into(), EmbeddedField::Array(items));
        self
    }

    pub fn set(&mut self, name: impl Into<String>, field: EmbeddedField) -> Option<EmbeddedField> {
        self.fields.insert(name.into(), field)
    }

    pub fn remove(&mut self, name: &str) -> Option<EmbeddedField> {
        self.fields.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&EmbeddedField> {
        self.fields.get(name)
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        match self.fields.get(name) {
            Some(EmbeddedField::Value(v)) => Some(v),
            _ => None,
        }
    }

    pub fn object(&self, name: &str) -> Option<&EmbeddedObject> {
        match self.fields.get(name) {
            Some(EmbeddedField::Object(o)) => Some(o),
            _ => None,
        }
    }

    pub fn array(&self, name: &str) -> Option<&[EmbeddedObject]> {
        match self.fields.get(name) {
            Some(EmbeddedField::Array(items)) => Some(items),
            _ => None,
        }
    }

    pub fn array_mut(&mut self, name: &str) -> Option<&mut Vec<EmbeddedObject>> {
        match self.fields.get_mut(name) {
            Some(EmbeddedField::Array(items)) => Some(items),
            _ => None,
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &EmbeddedField)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// An embedded value tagged with the variant it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct PolymorphicValue {
    tag: String,
    object: EmbeddedObject,
}

impl PolymorphicValue {
    pub fn new(tag: impl Into<String>, object: EmbeddedObject) -> Self {
        Self {
            tag: tag.into(),
            object,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn object(&self) -> &EmbeddedObject {
        &self.object
    }

    pub fn object_mut(&mut self) -> &mut EmbeddedObject {
        &mut self.object
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.object.value(name)
    }

    pub fn array(&self, name: &str) -> Option<&[EmbeddedObject]> {
        self.object.array(name)
    }

    pub fn into_parts(self) -> (String, EmbeddedObject) {
        (self.tag, self.object)
    }
}
