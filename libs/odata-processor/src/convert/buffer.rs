//! Arena of complex values under construction for one row.
//!
//! Nodes are addressed by the external path of the complex attribute that owns them
//! (`Address`, `Address/Geo`). An element of a complex collection carries the index of the
//! row it came from (`InhouseAddress#2`), so every row yields its own entry.
//!
//! [`ComplexValueBuffer::drain_into`] moves the nodes into their parents deepest first, in
//! creation order within one depth. A node is therefore complete when it is attached, and
//! collection entries keep row order.

use crate::schema::Attribute;
use odata_core::{ComplexValue, Property, PropertyContainer, PropertyValue};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Parent {
    Root,
    Node(usize),
}

#[derive(Debug)]
struct Node {
    depth: usize,
    parent: Parent,
    name: String,
    collection: bool,
    value: ComplexValue,
}

#[derive(Debug, Default)]
pub struct ComplexValueBuffer {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
}

impl ComplexValueBuffer {
    /// Node of the last element of `elements`, creating the chain on first use.
    ///
    /// Every element must be a complex attribute; `None` for an empty chain.
    pub fn node(&mut self, elements: &[Arc<Attribute>], row_index: usize) -> Option<usize> {
        let mut key = String::new();
        let mut parent = Parent::Root;
        for (depth, attr) in elements.iter().enumerate() {
            if !key.is_empty() {
                key.push('/');
            }
            key.push_str(&attr.external_name);
            if attr.collection {
                key.push_str(&format!("#{row_index}"));
            }
            let idx = match self.index.get(&key) {
                Some(idx) => *idx,
                None => {
                    self.nodes.push(Node {
                        depth: depth + 1,
                        parent,
                        name: attr.external_name.clone(),
                        collection: attr.collection,
                        value: ComplexValue::default(),
                    });
                    let idx = self.nodes.len() - 1;
                    self.index.insert(key.clone(), idx);
                    idx
                }
            };
            parent = Parent::Node(idx);
        }
        match parent {
            Parent::Node(idx) => Some(idx),
            Parent::Root => None,
        }
    }

    pub fn value_mut(&mut self, node: usize) -> &mut ComplexValue {
        &mut self.nodes[node].value
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Attach every buffered value to its parent, ending at `root`.
    pub fn drain_into<C: PropertyContainer>(mut self, root: &mut C) {
        let mut order: Vec<usize> = (0..self.nodes.len()).collect();
        order.sort_by_key(|idx| (Reverse(self.nodes[*idx].depth), *idx));
        for idx in order {
            let value = std::mem::take(&mut self.nodes[idx].value);
            let name = std::mem::take(&mut self.nodes[idx].name);
            let collection = self.nodes[idx].collection;
            let parent = self.nodes[idx].parent;
            match parent {
                Parent::Root => attach(root, name, collection, value),
                Parent::Node(p) => attach(&mut self.nodes[p].value, name, collection, value),
            }
        }
    }
}

fn attach<C: PropertyContainer>(container: &mut C, name: String, collection: bool, value: ComplexValue) {
    let value = PropertyValue::Complex(value);
    if collection {
        match container.property_mut(&name) {
            Some(Property {
                value: PropertyValue::Collection(items),
                ..
            }) => items.push(value),
            Some(p) => p.value = PropertyValue::Collection(vec![value]),
            None => container
                .properties_mut()
                .push(Property::new(name, PropertyValue::Collection(vec![value]))),
        }
    } else {
        set_property(container, name, value);
    }
}

/// Replace or add the property `name`.
pub(crate) fn set_property<C: PropertyContainer + ?Sized>(container: &mut C, name: String, value: PropertyValue) {
    match container.property_mut(&name) {
        Some(p) => p.value = value,
        None => container.properties_mut().push(Property::new(name, value)),
    }
}

/// Append `value` to the collection property `name` unless it is already present.
pub(crate) fn add_unique<C: PropertyContainer + ?Sized>(container: &mut C, name: &str, value: PropertyValue) {
    match container.property_mut(name) {
        Some(Property {
            value: PropertyValue::Collection(items),
            ..
        }) => {
            if !items.contains(&value) {
                items.push(value);
            }
        }
        Some(p) => p.value = PropertyValue::Collection(vec![value]),
        None => container
            .properties_mut()
            .push(Property::new(name, PropertyValue::Collection(vec![value]))),
    }
}

/// Make sure the collection property `name` exists, possibly empty.
pub(crate) fn ensure_collection<C: PropertyContainer + ?Sized>(container: &mut C, name: &str) {
    if container.property(name).is_none() {
        container
            .properties_mut()
            .push(Property::new(name, PropertyValue::Collection(Vec::new())));
    }
}
