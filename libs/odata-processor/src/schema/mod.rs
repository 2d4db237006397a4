//! Read-only typed schema: structured types, attributes, associations and path resolution.
//!
//! External (protocol) names address attributes in paths; internal names and column names
//! are what the query builder writes into SQL. Complex attributes are stored inline in the
//! owning table, element collections in their own collection table.

mod builder;
mod path;
mod storage;

pub use builder::SchemaBuilder;
pub use path::{AssociationPath, Selector};
pub use storage::{EdmPrimitive, StorageType};

use crate::convert::AttributeConverter;
use crate::db::{DataAccessConditioner, DatabaseProcessor};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// How an enum is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumStorage {
    Ordinal,
    Name,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumType {
    pub name: String,
    pub members: Vec<String>,
    pub storage: EnumStorage,
}

impl EnumType {
    pub fn new<I, S>(name: impl Into<String>, members: I, storage: EnumStorage) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            members: members.into_iter().map(Into::into).collect(),
            storage,
        }
    }

    pub fn ordinal_of(&self, member: &str) -> Option<usize> {
        self.members.iter().position(|m| m == member)
    }
}

/// Attribute-level converter selection.
#[derive(Clone, Default)]
pub enum ConverterRef {
    /// Use the registry (or pass through).
    #[default]
    Default,
    Custom(Arc<dyn AttributeConverter>),
}

impl fmt::Debug for ConverterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConverterRef::Default => f.write_str("Default"),
            ConverterRef::Custom(c) => write!(f, "Custom({})", c.name()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum AttributeType {
    Primitive {
        edm: EdmPrimitive,
        storage: StorageType,
    },
    Enum(Arc<EnumType>),
    Complex(Arc<StructuredType>),
}

/// A join column pair: `source` lives on the owning side, `target` on the joined table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinColumn {
    pub source: String,
    pub target: String,
}

impl JoinColumn {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Table holding the values of an element collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionTable {
    pub table: String,
    /// Owner column -> collection table column.
    pub join_columns: Vec<JoinColumn>,
}

#[derive(Debug, Clone)]
pub struct Attribute {
    pub internal_name: String,
    pub external_name: String,
    pub ty: AttributeType,
    pub column: Option<String>,
    pub key: bool,
    pub ignore: bool,
    pub collection: bool,
    pub searchable: bool,
    pub nullable: bool,
    pub generated: bool,
    pub converter: ConverterRef,
    pub collection_table: Option<CollectionTable>,
}

impl Attribute {
    fn with_type(external_name: impl Into<String>, ty: AttributeType) -> Self {
        let external_name = external_name.into();
        Self {
            internal_name: lower_first(&external_name),
            external_name,
            ty,
            column: None,
            key: false,
            ignore: false,
            collection: false,
            searchable: false,
            nullable: true,
            generated: false,
            converter: ConverterRef::Default,
            collection_table: None,
        }
    }

    pub fn primitive(name: impl Into<String>, edm: EdmPrimitive, storage: StorageType) -> Self {
        Self::with_type(name, AttributeType::Primitive { edm, storage })
    }

    pub fn enumeration(name: impl Into<String>, ty: Arc<EnumType>) -> Self {
        Self::with_type(name, AttributeType::Enum(ty))
    }

    pub fn complex(name: impl Into<String>, ty: Arc<StructuredType>) -> Self {
        Self::with_type(name, AttributeType::Complex(ty))
    }

    /// Composite key stored as an embedded complex value.
    pub fn embedded_id(name: impl Into<String>, ty: Arc<StructuredType>) -> Self {
        Self::complex(name, ty).key()
    }

    pub fn internal(mut self, name: impl Into<String>) -> Self {
        self.internal_name = name.into();
        self
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn key(mut self) -> Self {
        self.key = true;
        self.nullable = false;
        self
    }

    pub fn generated(mut self) -> Self {
        self.generated = true;
        self
    }

    pub fn ignored(mut self) -> Self {
        self.ignore = true;
        self
    }

    pub fn searchable(mut self) -> Self {
        self.searchable = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn converter(mut self, converter: Arc<dyn AttributeConverter>) -> Self {
        self.converter = ConverterRef::Custom(converter);
        self
    }

    /// Element collection stored in `table`, joined via `join_columns`.
    pub fn element_collection(mut self, table: impl Into<String>, join_columns: Vec<JoinColumn>) -> Self {
        self.collection = true;
        self.collection_table = Some(CollectionTable {
            table: table.into(),
            join_columns,
        });
        self
    }

    pub fn column_name(&self) -> &str {
        self.column.as_deref().unwrap_or(&self.internal_name)
    }

    pub fn is_complex(&self) -> bool {
        matches!(self.ty, AttributeType::Complex(_))
    }

    pub fn is_embedded_id(&self) -> bool {
        self.key && self.is_complex()
    }

    pub fn complex_type(&self) -> Option<&Arc<StructuredType>> {
        match &self.ty {
            AttributeType::Complex(t) => Some(t),
            _ => None,
        }
    }

    pub fn enum_type(&self) -> Option<&Arc<EnumType>> {
        match &self.ty {
            AttributeType::Enum(t) => Some(t),
            _ => None,
        }
    }

    /// Storage representation of a leaf attribute.
    pub fn storage_type(&self) -> Option<StorageType> {
        match &self.ty {
            AttributeType::Primitive { storage, .. } => Some(*storage),
            AttributeType::Enum(e) => Some(match e.storage {
                EnumStorage::Ordinal => StorageType::Int,
                EnumStorage::Name => StorageType::String,
            }),
            AttributeType::Complex(_) => None,
        }
    }

    pub fn edm_type(&self) -> Option<EdmPrimitive> {
        match &self.ty {
            AttributeType::Primitive { edm, .. } => Some(*edm),
            AttributeType::Enum(_) => Some(EdmPrimitive::Int32),
            AttributeType::Complex(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinSpec {
    /// Source-table columns equal target-table columns.
    Columns(Vec<JoinColumn>),
    /// Many-to-many through a link table.
    Table {
        table: String,
        /// Source table column -> link table column.
        source: Vec<JoinColumn>,
        /// Link table column -> target table column.
        target: Vec<JoinColumn>,
    },
}

#[derive(Debug, Clone)]
pub struct Association {
    pub internal_name: String,
    pub external_name: String,
    /// External name of the target entity type.
    pub target: String,
    pub to_many: bool,
    pub join: JoinSpec,
}

impl Association {
    fn new(name: impl Into<String>, target: impl Into<String>, to_many: bool) -> Self {
        let external_name = name.into();
        Self {
            internal_name: lower_first(&external_name),
            external_name,
            target: target.into(),
            to_many,
            join: JoinSpec::Columns(Vec::new()),
        }
    }

    pub fn to_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, target, false)
    }

    pub fn to_many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, target, true)
    }

    pub fn join(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        let column = JoinColumn::new(source, target);
        match &mut self.join {
            JoinSpec::Columns(cols) => cols.push(column),
            JoinSpec::Table { .. } => self.join = JoinSpec::Columns(vec![column]),
        }
        self
    }

    pub fn join_table(
        mut self,
        table: impl Into<String>,
        source: Vec<JoinColumn>,
        target: Vec<JoinColumn>,
    ) -> Self {
        self.join = JoinSpec::Table {
            table: table.into(),
            source,
            target,
        };
        self
    }

    /// Columns on the target side that correlate with the owner.
    pub fn target_join_columns(&self) -> Vec<&str> {
        match &self.join {
            JoinSpec::Columns(cols) => cols.iter().map(|c| c.target.as_str()).collect(),
            JoinSpec::Table { source, .. } => source.iter().map(|c| c.target.as_str()).collect(),
        }
    }
}

/// Entity type (has a table) or complex type (stored inline).
#[derive(Debug, Clone)]
pub struct StructuredType {
    pub name: String,
    pub internal_name: String,
    pub table: Option<String>,
    pub attributes: Vec<Arc<Attribute>>,
    pub associations: Vec<Arc<Association>>,
}

impl StructuredType {
    pub fn entity(name: impl Into<String>, table: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            internal_name: name.clone(),
            name,
            table: Some(table.into()),
            attributes: Vec::new(),
            associations: Vec::new(),
        }
    }

    pub fn complex(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            internal_name: name.clone(),
            name,
            table: None,
            attributes: Vec::new(),
            associations: Vec::new(),
        }
    }

    pub fn attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(Arc::new(attribute));
        self
    }

    pub fn association(mut self, association: Association) -> Self {
        self.associations.push(Arc::new(association));
        self
    }

    pub fn is_complex(&self) -> bool {
        self.table.is_none()
    }

    pub fn table_name(&self) -> &str {
        self.table.as_deref().unwrap_or(&self.internal_name)
    }

    pub fn find_attribute(&self, external_name: &str) -> Option<&Arc<Attribute>> {
        self.attributes
            .iter()
            .find(|a| a.external_name == external_name)
    }

    pub fn find_association(&self, external_name: &str) -> Option<&Arc<Association>> {
        self.associations
            .iter()
            .find(|a| a.external_name == external_name)
    }

    /// Resolve `A/B/C` through complex attributes down to an attribute.
    ///
    /// A single segment naming a component of an embedded id resolves to that component.
    pub fn path(&self, external_path: &str) -> Option<Selector> {
        let mut elements = Vec::new();
        let mut current = self;
        let segments: Vec<&str> = external_path.split('/').collect();
        for (i, segment) in segments.iter().enumerate() {
            let Some(attr) = current.find_attribute(segment) else {
                return if segments.len() == 1 {
                    self.embedded_id_component(segment)
                } else {
                    None
                };
            };
            elements.push(attr.clone());
            if i + 1 < segments.len() {
                current = attr.complex_type()?.as_ref();
            }
        }
        Some(Selector::new(external_path, elements))
    }

    fn embedded_id_component(&self, name: &str) -> Option<Selector> {
        self.attributes
            .iter()
            .filter(|a| a.is_embedded_id())
            .find_map(|id| {
                let component = id.complex_type()?.find_attribute(name)?;
                Some(Selector::new(name, vec![id.clone(), component.clone()]))
            })
    }

    /// Every selectable leaf path; ignored attributes and element collections are skipped.
    pub fn all_paths(&self) -> Vec<Selector> {
        let mut out = Vec::new();
        collect_leaves(self, &mut Vec::new(), "", false, &mut out);
        out
    }

    /// Leaf paths below `prefix` (a complex path) or the single leaf `prefix` names.
    pub fn paths_under(&self, prefix: &str) -> Vec<Selector> {
        let Some(sel) = self.path(prefix) else {
            return Vec::new();
        };
        let leaf = sel.leaf().clone();
        match leaf.complex_type() {
            Some(ct) if !leaf.is_embedded_id() => {
                let mut out = Vec::new();
                let mut elements = sel.elements.clone();
                collect_leaves(ct, &mut elements, prefix, false, &mut out);
                out
            }
            Some(ct) => {
                let mut out = Vec::new();
                for component in &ct.attributes {
                    out.push(Selector::new(
                        component.external_name.clone(),
                        vec![leaf.clone(), component.clone()],
                    ));
                }
                out
            }
            None => vec![sel],
        }
    }

    /// Key attribute paths in declaration order; embedded ids contribute their components.
    pub fn key_paths(&self) -> Vec<Selector> {
        let mut out = Vec::new();
        for attr in self.attributes.iter().filter(|a| a.key) {
            match attr.complex_type() {
                Some(ct) => {
                    for component in &ct.attributes {
                        out.push(Selector::new(
                            component.external_name.clone(),
                            vec![attr.clone(), component.clone()],
                        ));
                    }
                }
                None => out.push(Selector::new(attr.external_name.clone(), vec![attr.clone()])),
            }
        }
        out
    }

    pub fn searchable_paths(&self) -> Vec<Selector> {
        self.all_paths()
            .into_iter()
            .filter(|s| s.leaf().searchable)
            .collect()
    }

    /// Element collection attributes, at top level or nested in single-valued complex values.
    pub fn collection_paths(&self) -> Vec<Selector> {
        let mut out = Vec::new();
        collect_collections(self, &mut Vec::new(), "", &mut out);
        out
    }

    /// Leaf paths of an element collection, prefixed with the collection path.
    pub fn collection_leaf_paths(&self, collection: &Selector) -> Vec<Selector> {
        let attr = collection.leaf();
        match attr.complex_type() {
            Some(ct) => {
                let mut out = Vec::new();
                let mut elements = collection.elements.clone();
                collect_leaves(ct, &mut elements, &collection.alias, true, &mut out);
                out
            }
            None => vec![collection.clone()],
        }
    }

    /// Associations declared directly on this type.
    pub fn direct_association_paths(&self, schema: &Schema) -> Vec<AssociationPath> {
        self.associations
            .iter()
            .filter_map(|a| self.association_path(&a.external_name, schema))
            .collect()
    }

    /// Resolve `Complex/Nav` or `Nav`; `None` when no association matches or its target
    /// type is unknown.
    pub fn association_path(&self, external_path: &str, schema: &Schema) -> Option<AssociationPath> {
        let (association, prefix) = self.find_association_path(external_path)?;
        let target = schema.entity_type(&association.target)?;
        Some(AssociationPath {
            alias: external_path.to_string(),
            prefix,
            association,
            target_type: target.clone(),
        })
    }

    /// Association lookup without resolving the target type.
    pub fn find_association_path(
        &self,
        external_path: &str,
    ) -> Option<(Arc<Association>, Vec<Arc<Attribute>>)> {
        let mut prefix = Vec::new();
        let mut current = self;
        let segments: Vec<&str> = external_path.split('/').collect();
        let (last, complex) = segments.split_last()?;
        for segment in complex {
            let attr = current.find_attribute(segment)?;
            if attr.collection {
                return None;
            }
            prefix.push(attr.clone());
            current = attr.complex_type()?.as_ref();
        }
        let association = current.find_association(last)?.clone();
        Some((association, prefix))
    }
}

fn collect_leaves(
    ty: &StructuredType,
    elements: &mut Vec<Arc<Attribute>>,
    prefix: &str,
    inside_collection: bool,
    out: &mut Vec<Selector>,
) {
    for attr in &ty.attributes {
        if attr.ignore || (attr.collection && !inside_collection) {
            continue;
        }
        // embedded id components keep their plain names
        let alias = if attr.is_embedded_id() || prefix.is_empty() {
            attr.external_name.clone()
        } else {
            format!("{prefix}/{}", attr.external_name)
        };
        elements.push(attr.clone());
        match attr.complex_type() {
            Some(ct) if attr.is_embedded_id() => {
                for component in &ct.attributes {
                    out.push(Selector::new(
                        component.external_name.clone(),
                        vec![attr.clone(), component.clone()],
                    ));
                }
            }
            Some(ct) => collect_leaves(ct, elements, &alias, inside_collection, out),
            None => out.push(Selector::new(alias, elements.clone())),
        }
        elements.pop();
    }
}

fn collect_collections(
    ty: &StructuredType,
    elements: &mut Vec<Arc<Attribute>>,
    prefix: &str,
    out: &mut Vec<Selector>,
) {
    for attr in &ty.attributes {
        if attr.ignore || attr.is_embedded_id() {
            continue;
        }
        let alias = if prefix.is_empty() {
            attr.external_name.clone()
        } else {
            format!("{prefix}/{}", attr.external_name)
        };
        elements.push(attr.clone());
        if attr.collection {
            out.push(Selector::new(alias, elements.clone()));
        } else if let Some(ct) = attr.complex_type() {
            collect_collections(ct, elements, &alias, out);
        }
        elements.pop();
    }
}

fn lower_first(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) => c.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// The complete model handed to the processor.
pub struct Schema {
    types: HashMap<String, Arc<StructuredType>>,
    entity_sets: Vec<(String, String)>,
    conditioners: HashMap<String, Arc<dyn DataAccessConditioner>>,
    processor: Arc<dyn DatabaseProcessor>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    pub fn entity_type(&self, name: &str) -> Option<&Arc<StructuredType>> {
        self.types.get(name)
    }

    /// Entity type behind an entity set.
    pub fn entity_set(&self, set: &str) -> Option<&Arc<StructuredType>> {
        self.entity_sets
            .iter()
            .find(|(s, _)| s == set)
            .and_then(|(_, ty)| self.types.get(ty))
    }

    /// Entity set names in declaration order.
    pub fn entity_set_names(&self) -> impl Iterator<Item = &str> {
        self.entity_sets.iter().map(|(s, _)| s.as_str())
    }

    /// First entity set declared for `type_name`.
    pub fn entity_set_for_type(&self, type_name: &str) -> Option<&str> {
        self.entity_sets
            .iter()
            .find(|(_, ty)| ty == type_name)
            .map(|(s, _)| s.as_str())
    }

    pub fn conditioner(&self, type_name: &str) -> Option<&Arc<dyn DataAccessConditioner>> {
        self.conditioners.get(type_name)
    }

    pub fn processor(&self) -> &Arc<dyn DatabaseProcessor> {
        &self.processor
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("types", &self.types.keys().collect::<Vec<_>>())
            .field("entity_sets", &self.entity_sets)
            .finish_non_exhaustive()
    }
}
