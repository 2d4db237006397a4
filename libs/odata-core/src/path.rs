use crate::key::KeyPredicate;

/// One segment of an already parsed resource path.
#[derive(Clone, Debug, PartialEq)]
pub enum ResourceSegment {
    EntitySet {
        name: String,
        keys: Option<KeyPredicate>,
    },
    Navigation {
        name: String,
        keys: Option<KeyPredicate>,
    },
    ComplexProperty {
        name: String,
        collection: bool,
    },
    PrimitiveProperty {
        name: String,
        collection: bool,
    },
    Count,
    Value,
    Function {
        name: String,
    },
    Action {
        name: String,
    },
}

impl ResourceSegment {
    pub fn name(&self) -> Option<&str> {
        match self {
            ResourceSegment::EntitySet { name, .. }
            | ResourceSegment::Navigation { name, .. }
            | ResourceSegment::ComplexProperty { name, .. }
            | ResourceSegment::PrimitiveProperty { name, .. }
            | ResourceSegment::Function { name }
            | ResourceSegment::Action { name } => Some(name),
            ResourceSegment::Count | ResourceSegment::Value => None,
        }
    }

    pub fn keys(&self) -> Option<&KeyPredicate> {
        match self {
            ResourceSegment::EntitySet { keys, .. } | ResourceSegment::Navigation { keys, .. } => {
                keys.as_ref()
            }
            _ => None,
        }
    }

    pub fn is_navigation(&self) -> bool {
        matches!(self, ResourceSegment::Navigation { .. })
    }

    pub fn is_property(&self) -> bool {
        matches!(
            self,
            ResourceSegment::ComplexProperty { .. } | ResourceSegment::PrimitiveProperty { .. }
        )
    }
}

/// Resource path as handed over by the protocol layer.
///
/// ```
/// use odata_core::{KeyPredicate, ResourcePath};
/// let path = ResourcePath::entity_set("Persons")
///     .with_key(KeyPredicate::single("99"))
///     .navigate("Roles");
/// assert_eq!(path.segments.len(), 2);
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResourcePath {
    pub segments: Vec<ResourceSegment>,
}

impl ResourcePath {
    pub fn entity_set(name: impl Into<String>) -> Self {
        Self {
            segments: vec![ResourceSegment::EntitySet {
                name: name.into(),
                keys: None,
            }],
        }
    }

    /// Attach a key predicate to the last entity set or navigation segment.
    pub fn with_key(mut self, key: KeyPredicate) -> Self {
        if let Some(
            ResourceSegment::EntitySet { keys, .. } | ResourceSegment::Navigation { keys, .. },
        ) = self.segments.last_mut()
        {
            *keys = Some(key);
        }
        self
    }

    pub fn navigate(mut self, name: impl Into<String>) -> Self {
        self.segments.push(ResourceSegment::Navigation {
            name: name.into(),
            keys: None,
        });
        self
    }

    pub fn complex(mut self, name: impl Into<String>, collection: bool) -> Self {
        self.segments.push(ResourceSegment::ComplexProperty {
            name: name.into(),
            collection,
        });
        self
    }

    pub fn primitive(mut self, name: impl Into<String>, collection: bool) -> Self {
        self.segments.push(ResourceSegment::PrimitiveProperty {
            name: name.into(),
            collection,
        });
        self
    }

    pub fn count(mut self) -> Self {
        self.segments.push(ResourceSegment::Count);
        self
    }

    pub fn value(mut self) -> Self {
        self.segments.push(ResourceSegment::Value);
        self
    }

    pub fn first(&self) -> Option<&ResourceSegment> {
        self.segments.first()
    }

    pub fn has_navigation(&self) -> bool {
        self.segments.iter().any(ResourceSegment::is_navigation)
    }

    pub fn is_count(&self) -> bool {
        matches!(self.segments.last(), Some(ResourceSegment::Count))
    }

    /// Property segments after the last entity-addressing segment, joined by `/`.
    pub fn trailing_property_path(&self) -> Option<String> {
        let start = self
            .segments
            .iter()
            .rposition(|s| {
                matches!(
                    s,
                    ResourceSegment::EntitySet { .. } | ResourceSegment::Navigation { .. }
                )
            })
            .map_or(0, |i| i + 1);
        let names: Vec<&str> = self.segments[start..]
            .iter()
            .filter(|s| s.is_property())
            .filter_map(ResourceSegment::name)
            .collect();
        if names.is_empty() {
            None
        } else {
            Some(names.join("/"))
        }
    }
}
