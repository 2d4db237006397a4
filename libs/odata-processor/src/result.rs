//! Flat query results and the nested results attached to them before conversion.

use crate::db::DbValue;
use crate::error::{ProcessorError, Result};
use crate::keys::{CorrelationKey, NavigationKeyBuilder};
use crate::schema::{AssociationPath, Selector, StorageType, StructuredType};
use std::collections::HashMap;
use std::sync::Arc;

/// One result row: column alias -> storage value, in SELECT order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tuple {
    values: Vec<(String, DbValue)>,
}

impl Tuple {
    pub fn with(mut self, alias: impl Into<String>, value: DbValue) -> Self {
        self.push(alias, value);
        self
    }

    pub fn push(&mut self, alias: impl Into<String>, value: DbValue) {
        self.values.push((alias.into(), value));
    }

    pub fn get(&self, alias: &str) -> Option<&DbValue> {
        self.values
            .iter()
            .find(|(a, _)| a == alias)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DbValue)> {
        self.values.iter().map(|(a, v)| (a.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A selected column and how to decode it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub alias: String,
    pub storage: StorageType,
}

impl ColumnSpec {
    pub fn new(alias: impl Into<String>, storage: StorageType) -> Self {
        Self {
            alias: alias.into(),
            storage,
        }
    }
}

/// What the converter needs besides the rows: the entity type, the key builder of the rows
/// and the nested results.
#[derive(Debug)]
pub struct ResultScope {
    pub entity_type: Arc<StructuredType>,
    pub key_builder: Arc<NavigationKeyBuilder>,
    pub expands: Children,
    pub collections: Vec<QueryElementCollectionResult>,
}

impl ResultScope {
    pub fn new(entity_type: Arc<StructuredType>, key_builder: Arc<NavigationKeyBuilder>) -> Self {
        Self {
            entity_type,
            key_builder,
            expands: Children::default(),
            collections: Vec::new(),
        }
    }
}

/// Rows of the root query.
#[derive(Debug)]
pub struct QueryEntityResult {
    pub scope: ResultScope,
    pub rows: Vec<Tuple>,
    /// Element-collection hop addressed by the resource path.
    pub collection_hop: Option<Selector>,
}

/// Rows of one `$expand` query, grouped by the owning entity.
#[derive(Debug)]
pub struct ExpandQueryEntityResult {
    pub navigation: AssociationPath,
    /// Reads the owner key from a parent row.
    pub owning_key: Arc<NavigationKeyBuilder>,
    pub scope: ResultScope,
    groups: HashMap<CorrelationKey, Vec<Tuple>>,
}

impl ExpandQueryEntityResult {
    pub fn new(
        navigation: AssociationPath,
        owning_key: Arc<NavigationKeyBuilder>,
        scope: ResultScope,
    ) -> Self {
        Self {
            navigation,
            owning_key,
            scope,
            groups: HashMap::new(),
        }
    }

    /// Group `rows` by the owner key they carry, keeping row order within a group.
    pub fn with_rows(mut self, rows: Vec<Tuple>) -> Self {
        for row in rows {
            let key = self.owning_key.target_row_key(&row);
            self.groups.entry(key).or_default().push(row);
        }
        self
    }

    /// Rows belonging to the entity represented by `parent_row`.
    pub fn rows_for(&self, parent_row: &Tuple) -> &[Tuple] {
        let key = self.owning_key.owning_row_key(parent_row);
        self.groups.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every row, group by group.
    pub fn rows(&self) -> impl Iterator<Item = &Tuple> {
        self.groups.values().flatten()
    }

    pub fn groups_mut(&mut self) -> impl Iterator<Item = &mut Vec<Tuple>> {
        self.groups.values_mut()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn row_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }
}

/// Values of one element-collection attribute, grouped by owning entity.
#[derive(Debug)]
pub struct QueryElementCollectionResult {
    pub attribute: Selector,
    pub key_builder: Arc<NavigationKeyBuilder>,
    groups: HashMap<CorrelationKey, Vec<Tuple>>,
}

impl QueryElementCollectionResult {
    pub fn new(attribute: Selector, key_builder: Arc<NavigationKeyBuilder>, rows: Vec<Tuple>) -> Self {
        let mut groups: HashMap<CorrelationKey, Vec<Tuple>> = HashMap::new();
        for row in rows {
            groups
                .entry(key_builder.target_row_key(&row))
                .or_default()
                .push(row);
        }
        Self {
            attribute,
            key_builder,
            groups,
        }
    }

    pub fn rows_for(&self, owner_row: &Tuple) -> &[Tuple] {
        let key = self.key_builder.owning_row_key(owner_row);
        self.groups.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Expand results keyed by association path; each path may be attached once.
#[derive(Debug, Default)]
pub struct Children {
    items: Vec<ExpandQueryEntityResult>,
}

impl Children {
    pub fn put(&mut self, child: ExpandQueryEntityResult) -> Result<()> {
        if self.get(&child.navigation.alias).is_some() {
            return Err(ProcessorError::illegal_state(format!(
                "expand result for '{}' attached twice",
                child.navigation.alias
            )));
        }
        self.items.push(child);
        Ok(())
    }

    pub fn get(&self, alias: &str) -> Option<&ExpandQueryEntityResult> {
        self.items.iter().find(|c| c.navigation.alias == alias)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExpandQueryEntityResult> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
