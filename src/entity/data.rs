use crate::core::Value;
use crate::embedded::PolymorphicValue;
use std::collections::BTreeMap;

/// Field values of one entity, by property name. Relations are not part of
/// the row and live in the entity's collection state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EntityData {
    values: BTreeMap<String, Value>,
    embedded: BTreeMap<String, Option<PolymorphicValue>>,
}

impl EntityData {
    pub fn value(&self, property: &str) -> Option<&Value> {
        self.values.get(property)
    }

    pub fn set_value(&mut self, property: impl Into<String>, value: Value) {
        self.values.insert(property.into(), value);
    }

    pub fn embedded(&self, property: &str) -> Option<&PolymorphicValue> {
        self.embedded.get(property).and_then(Option::as_ref)
    }

    pub fn set_embedded(&mut self, property: impl Into<String>, value: Option<PolymorphicValue>) {
        self.embedded.insert(property.into(), value);
    }

    pub fn values(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }
}
