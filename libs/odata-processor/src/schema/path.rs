use super::{Association, Attribute, StructuredType};
use std::fmt;
use std::sync::Arc;

/// A resolved attribute path, outer element first. `alias` is the external path and doubles
/// as the column alias in SELECT lists.
#[derive(Clone)]
pub struct Selector {
    pub alias: String,
    pub elements: Vec<Arc<Attribute>>,
}

impl Selector {
    pub fn new(alias: impl Into<String>, elements: Vec<Arc<Attribute>>) -> Self {
        debug_assert!(!elements.is_empty());
        Self {
            alias: alias.into(),
            elements,
        }
    }

    pub fn leaf(&self) -> &Arc<Attribute> {
        &self.elements[self.elements.len() - 1]
    }

    pub fn first(&self) -> &Arc<Attribute> {
        &self.elements[0]
    }

    /// Element collection crossed by this path, if any.
    pub fn collection_element(&self) -> Option<&Arc<Attribute>> {
        self.elements.iter().find(|a| a.collection)
    }

    pub fn is_complex_path(&self) -> bool {
        self.elements.len() > 1
    }
}

impl PartialEq for Selector {
    fn eq(&self, other: &Self) -> bool {
        self.alias == other.alias
    }
}

impl Eq for Selector {}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Selector({})", self.alias)
    }
}

/// A path ending in an association, possibly behind complex attributes (`Address/Region`).
#[derive(Clone)]
pub struct AssociationPath {
    pub alias: String,
    pub prefix: Vec<Arc<Attribute>>,
    pub association: Arc<Association>,
    pub target_type: Arc<StructuredType>,
}

impl AssociationPath {
    pub fn is_to_many(&self) -> bool {
        self.association.to_many
    }

    /// External names of the complex prefix.
    pub fn prefix_names(&self) -> Vec<&str> {
        self.prefix.iter().map(|a| a.external_name.as_str()).collect()
    }

    pub fn leaf_name(&self) -> &str {
        &self.association.external_name
    }
}

impl PartialEq for AssociationPath {
    fn eq(&self, other: &Self) -> bool {
        self.alias == other.alias && self.target_type.name == other.target_type.name
    }
}

impl fmt::Debug for AssociationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssociationPath({} -> {})", self.alias, self.target_type.name)
    }
}
