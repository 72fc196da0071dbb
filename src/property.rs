use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use std::ops::Deref;

use crate::key::Key;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Time(DateTime<Utc>),
    Key(Key),
}

/// A single named field of an entity. Repeated fields are represented by several properties sharing the same name,
/// each having `multiple` set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub name:     String,
    pub value:    PropertyValue,
    pub multiple: bool,
    pub no_index: bool,
}

impl Property {
    pub fn new<S: Into<String>>(name: S, value: PropertyValue) -> Self {
        Self {
            name: name.into(),
            value,
            multiple: false,
            no_index: false,
        }
    }

    pub fn repeated<S: Into<String>>(name: S, value: PropertyValue) -> Self {
        Self {
            multiple: true,
            ..Self::new(name, value)
        }
    }

    pub fn unindexed(mut self) -> Self {
        self.no_index = true;
        self
    }
}

/// The ordered field-list form every entity is exchanged in.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyList(Vec<Property>);

impl PropertyList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, property: Property) {
        self.0.push(property);
    }

    pub fn with(mut self, property: Property) -> Self {
        self.0.push(property);
        self
    }

    /// First property with the given name.
    pub fn get(&self, name: &str) -> Option<&Property> {
        self.0.iter().find(|p| p.name == name)
    }

    /// All values of a (possibly repeated) property, in order.
    pub fn values_of<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a PropertyValue> + 'a {
        self.0.iter().filter(move |p| p.name == name).map(|p| &p.value)
    }

    pub fn into_inner(self) -> Vec<Property> {
        self.0
    }
}

impl Deref for PropertyList {
    type Target = [Property];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<Property>> for PropertyList {
    fn from(properties: Vec<Property>) -> Self {
        Self(properties)
    }
}

impl FromIterator<Property> for PropertyList {
    fn from_iter<I: IntoIterator<Item = Property>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for PropertyList {
    type IntoIter = std::vec::IntoIter<Property>;
    type Item = Property;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
