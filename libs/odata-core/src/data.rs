//! Entity/property graph produced for the protocol layer.

use crate::ast::Value;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Null,
    Primitive(Value),
    Complex(ComplexValue),
    Collection(Vec<PropertyValue>),
}

impl PropertyValue {
    pub fn is_null(&self) -> bool {
        matches!(self, PropertyValue::Null | PropertyValue::Primitive(Value::Null))
    }

    pub fn as_primitive(&self) -> Option<&Value> {
        match self {
            PropertyValue::Primitive(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_complex(&self) -> Option<&ComplexValue> {
        match self {
            PropertyValue::Complex(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&[PropertyValue]> {
        match self {
            PropertyValue::Collection(items) => Some(items),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Property {
    pub name: String,
    pub value: PropertyValue,
}

impl Property {
    pub fn new(name: impl Into<String>, value: PropertyValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub fn primitive(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(name, PropertyValue::Primitive(value.into()))
    }
}

/// Lookup helpers shared by entities and complex values.
pub trait PropertyContainer {
    fn properties(&self) -> &[Property];
    fn properties_mut(&mut self) -> &mut Vec<Property>;

    fn property(&self, name: &str) -> Option<&Property> {
        self.properties().iter().find(|p| p.name == name)
    }

    fn property_mut(&mut self, name: &str) -> Option<&mut Property> {
        self.properties_mut().iter_mut().find(|p| p.name == name)
    }

    fn value_of(&self, name: &str) -> Option<&PropertyValue> {
        self.property(name).map(|p| &p.value)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ComplexValue {
    pub properties: Vec<Property>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub navigation_links: Vec<Link>,
}

impl PropertyContainer for ComplexValue {
    fn properties(&self) -> &[Property] {
        &self.properties
    }

    fn properties_mut(&mut self) -> &mut Vec<Property> {
        &mut self.properties
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Inline {
    Entity(Box<Entity>),
    Collection(EntityCollection),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Link {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    pub inline: Option<Inline>,
}

impl Link {
    pub fn inline_count(&self) -> usize {
        match &self.inline {
            Some(Inline::Entity(_)) => 1,
            Some(Inline::Collection(c)) => c.entities.len(),
            None => 0,
        }
    }

    pub fn inline_entities(&self) -> Vec<&Entity> {
        match &self.inline {
            Some(Inline::Entity(e)) => vec![e.as_ref()],
            Some(Inline::Collection(c)) => c.entities.iter().collect(),
            None => Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Entity {
    #[serde(rename = "@odata.id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "@odata.type")]
    pub type_name: String,
    pub properties: Vec<Property>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub navigation_links: Vec<Link>,
}

impl Entity {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            id: None,
            type_name: type_name.into(),
            properties: Vec::new(),
            navigation_links: Vec::new(),
        }
    }

    pub fn navigation_link(&self, title: &str) -> Option<&Link> {
        self.navigation_links.iter().find(|l| l.title == title)
    }
}

impl PropertyContainer for Entity {
    fn properties(&self) -> &[Property] {
        &self.properties
    }

    fn properties_mut(&mut self) -> &mut Vec<Property> {
        &mut self.properties
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct EntityCollection {
    pub entities: Vec<Entity>,
    #[serde(rename = "@odata.count", skip_serializing_if = "Option::is_none")]
    pub count: Option<i64>,
}

impl EntityCollection {
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
