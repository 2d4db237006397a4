//! Attribute accessors used by the write path.
//!
//! The schema layer supplies an [`InstanceFactory`]; the write converter only talks to the
//! [`Instance`] trait. [`Record`] is the dynamic implementation used when no typed model
//! exists.

use crate::db::DbValue;
use crate::error::{ProcessorError, Result};
use crate::schema::{Attribute, StructuredType};

pub trait Instance: Send {
    fn type_name(&self) -> &str;

    fn set_value(&mut self, attribute: &Attribute, value: DbValue) -> Result<()>;

    fn value(&self, internal_name: &str) -> Option<&DbValue>;

    /// Remove whatever `attribute` holds.
    fn clear(&mut self, attribute: &Attribute) -> Result<()>;

    /// Nested instance of a single-valued complex attribute, created when absent.
    fn complex(&mut self, attribute: &Attribute) -> Result<&mut dyn Instance>;

    /// Append a new element to a complex collection and return it.
    fn push_complex(&mut self, attribute: &Attribute) -> Result<&mut dyn Instance>;

    /// Append a value to a primitive collection.
    fn push_value(&mut self, attribute: &Attribute, value: DbValue) -> Result<()>;

    fn collection_len(&self, internal_name: &str) -> usize;
}

pub trait InstanceFactory: Send + Sync {
    fn create(&self, ty: &StructuredType) -> Result<Box<dyn Instance>>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Value(DbValue),
    Values(Vec<DbValue>),
    Complex(Record),
    Complexes(Vec<Record>),
}

/// Field bag keyed by internal attribute name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    type_name: String,
    fields: Vec<(String, Field)>,
}

impl Record {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(&self, internal_name: &str) -> Option<&Field> {
        self.fields
            .iter()
            .find(|(n, _)| n == internal_name)
            .map(|(_, f)| f)
    }

    pub fn nested(&self, internal_name: &str) -> Option<&Record> {
        match self.field(internal_name) {
            Some(Field::Complex(r)) => Some(r),
            _ => None,
        }
    }

    fn slot(&mut self, internal_name: &str) -> Option<&mut Field> {
        self.fields
            .iter_mut()
            .find(|(n, _)| n == internal_name)
            .map(|(_, f)| f)
    }

    fn slot_or_insert(&mut self, internal_name: &str, init: impl FnOnce() -> Field) -> &mut Field {
        let idx = match self.fields.iter().position(|(n, _)| n == internal_name) {
            Some(idx) => idx,
            None => {
                self.fields.push((internal_name.to_string(), init()));
                self.fields.len() - 1
            }
        };
        &mut self.fields[idx].1
    }
}

fn wrong_shape(attribute: &Attribute, expected: &str) -> ProcessorError {
    ProcessorError::illegal_state(format!(
        "attribute '{}' does not hold {expected}",
        attribute.internal_name
    ))
}

fn element_type_name(attribute: &Attribute) -> String {
    attribute
        .complex_type()
        .map(|t| t.name.clone())
        .unwrap_or_default()
}

impl Instance for Record {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn set_value(&mut self, attribute: &Attribute, value: DbValue) -> Result<()> {
        match self.slot(&attribute.internal_name) {
            Some(Field::Value(v)) => *v = value,
            Some(_) => return Err(wrong_shape(attribute, "a single value")),
            None => self
                .fields
                .push((attribute.internal_name.clone(), Field::Value(value))),
        }
        Ok(())
    }

    fn value(&self, internal_name: &str) -> Option<&DbValue> {
        match self.field(internal_name) {
            Some(Field::Value(v)) => Some(v),
            _ => None,
        }
    }

    fn clear(&mut self, attribute: &Attribute) -> Result<()> {
        self.fields.retain(|(n, _)| n != &attribute.internal_name);
        Ok(())
    }

    fn complex(&mut self, attribute: &Attribute) -> Result<&mut dyn Instance> {
        let type_name = element_type_name(attribute);
        match self.slot_or_insert(&attribute.internal_name, || Field::Complex(Record::new(type_name))) {
            Field::Complex(r) => Ok(r as &mut dyn Instance),
            _ => Err(wrong_shape(attribute, "a complex value")),
        }
    }

    fn push_complex(&mut self, attribute: &Attribute) -> Result<&mut dyn Instance> {
        let type_name = element_type_name(attribute);
        match self.slot_or_insert(&attribute.internal_name, || Field::Complexes(Vec::new())) {
            Field::Complexes(items) => {
                items.push(Record::new(type_name));
                let idx = items.len() - 1;
                Ok(&mut items[idx] as &mut dyn Instance)
            }
            _ => Err(wrong_shape(attribute, "a complex collection")),
        }
    }

    fn push_value(&mut self, attribute: &Attribute, value: DbValue) -> Result<()> {
        match self.slot_or_insert(&attribute.internal_name, || Field::Values(Vec::new())) {
            Field::Values(items) => {
                items.push(value);
                Ok(())
            }
            _ => Err(wrong_shape(attribute, "a value collection")),
        }
    }

    fn collection_len(&self, internal_name: &str) -> usize {
        match self.field(internal_name) {
            Some(Field::Values(v)) => v.len(),
            Some(Field::Complexes(v)) => v.len(),
            _ => 0,
        }
    }
}

/// Creates empty [`Record`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecordFactory;

impl InstanceFactory for RecordFactory {
    fn create(&self, ty: &StructuredType) -> Result<Box<dyn Instance>> {
        Ok(Box::new(Record::new(ty.name.clone())))
    }
}
