//! Resource path segments -> navigation hops; `$expand` items -> association paths.

use crate::error::{MessageKey, ProcessorError, Result};
use crate::schema::{AssociationPath, Schema, Selector, StructuredType};
use odata_core::{ExpandItem, KeyPredicate, ODataQuery, ResourcePath, ResourceSegment};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum NavigationHop {
    /// Relationship traversal, joined LEFT.
    Association {
        path: AssociationPath,
        keys: Option<KeyPredicate>,
        filter: ODataQuery,
    },
    /// Element collection traversal, joined INNER without relationship semantics.
    ElementCollection { selector: Selector },
}

impl NavigationHop {
    pub fn association(path: AssociationPath) -> Self {
        NavigationHop::Association {
            path,
            keys: None,
            filter: ODataQuery::none(),
        }
    }

    pub fn as_association(&self) -> Option<&AssociationPath> {
        match self {
            NavigationHop::Association { path, .. } => Some(path),
            NavigationHop::ElementCollection { .. } => None,
        }
    }
}

/// Everything the query builders need to know about the addressed resource.
#[derive(Debug, Clone)]
pub struct QueryTarget {
    pub entity_set: String,
    pub start: Arc<StructuredType>,
    pub start_keys: Option<KeyPredicate>,
    pub start_filter: ODataQuery,
    pub hops: Vec<NavigationHop>,
    /// Property path after the last entity segment (`Address`, `Address/Country`).
    pub property: Option<String>,
    pub count: bool,
}

impl QueryTarget {
    pub fn new(entity_set: impl Into<String>, start: Arc<StructuredType>) -> Self {
        Self {
            entity_set: entity_set.into(),
            start,
            start_keys: None,
            start_filter: ODataQuery::none(),
            hops: Vec::new(),
            property: None,
            count: false,
        }
    }

    pub fn association_hops(&self) -> impl Iterator<Item = &AssociationPath> {
        self.hops.iter().filter_map(NavigationHop::as_association)
    }

    pub fn association_count(&self) -> usize {
        self.association_hops().count()
    }

    /// Entity type of the result rows.
    pub fn result_type(&self) -> &Arc<StructuredType> {
        self.association_hops()
            .last()
            .map(|p| &p.target_type)
            .unwrap_or(&self.start)
    }

    pub fn collection_hop(&self) -> Option<&Selector> {
        self.hops.iter().find_map(|h| match h {
            NavigationHop::ElementCollection { selector } => Some(selector),
            NavigationHop::Association { .. } => None,
        })
    }

    /// Whether the path addresses at most one entity.
    pub fn is_single(&self) -> bool {
        match self.hops.iter().rev().find_map(|h| match h {
            NavigationHop::Association { path, keys, .. } => Some((path, keys)),
            NavigationHop::ElementCollection { .. } => None,
        }) {
            Some((path, keys)) => keys.is_some() || !path.is_to_many(),
            None => self.start_keys.is_some(),
        }
    }

    pub fn result_filter(&self) -> &ODataQuery {
        self.hops
            .iter()
            .rev()
            .find_map(|h| match h {
                NavigationHop::Association { filter, .. } => Some(filter),
                NavigationHop::ElementCollection { .. } => None,
            })
            .unwrap_or(&self.start_filter)
    }

    /// Attach `filter` to the result scope.
    pub fn set_result_filter(&mut self, filter: ODataQuery) {
        let last = self.hops.iter_mut().rev().find_map(|h| match h {
            NavigationHop::Association { filter, .. } => Some(filter),
            NavigationHop::ElementCollection { .. } => None,
        });
        match last {
            Some(slot) => *slot = filter,
            None => self.start_filter = filter,
        }
    }
}

fn unknown_property(name: &str, ty: &StructuredType) -> ProcessorError {
    ProcessorError::new(MessageKey::QueryPreparationUnknownProperty, [name, ty.name.as_str()])
}

fn unsupported(segment: &ResourceSegment) -> ProcessorError {
    let name = match segment {
        ResourceSegment::Function { name } => format!("function {name}"),
        ResourceSegment::Action { name } => format!("action {name}"),
        other => format!("{other:?}"),
    };
    ProcessorError::new(MessageKey::NotSupportedResourceType, [name])
}

/// Resolve the hop list of a resource path.
pub fn determine_navigations(schema: &Schema, path: &ResourcePath) -> Result<QueryTarget> {
    let mut segments = path.segments.iter();
    let (set, keys) = match segments.next() {
        Some(ResourceSegment::EntitySet { name, keys }) => (name, keys.clone()),
        Some(other) => return Err(unsupported(other)),
        None => return Err(ProcessorError::illegal_state("empty resource path")),
    };
    let start = schema.entity_set(set).cloned().ok_or_else(|| {
        ProcessorError::new(MessageKey::QueryPreparationEntitySetUnknown, [set.as_str()])
    })?;

    let mut target = QueryTarget::new(set.clone(), start.clone());
    target.start_keys = keys;
    let mut current = start;
    let mut prefix: Vec<String> = Vec::new();
    let mut after_collection = false;

    for segment in segments {
        match segment {
            ResourceSegment::Navigation { name, keys } => {
                if after_collection {
                    return Err(unsupported(segment));
                }
                prefix.push(name.clone());
                let alias = prefix.join("/");
                prefix.clear();
                match current.association_path(&alias, schema) {
                    Some(nav) => {
                        current = nav.target_type.clone();
                        target.hops.push(NavigationHop::Association {
                            path: nav,
                            keys: keys.clone(),
                            filter: ODataQuery::none(),
                        });
                    }
                    None => match current.find_association_path(&alias) {
                        Some((association, _)) => {
                            tracing::error!(
                                navigation = %alias,
                                target = %association.target,
                                entity_type = %current.name,
                                "navigation target type unknown, hop skipped"
                            );
                        }
                        None => return Err(unknown_property(&alias, &current)),
                    },
                }
            }
            ResourceSegment::ComplexProperty { name, .. }
            | ResourceSegment::PrimitiveProperty { name, .. } => {
                if after_collection {
                    return Err(unsupported(segment));
                }
                prefix.push(name.clone());
                let alias = prefix.join("/");
                let sel = current
                    .path(&alias)
                    .ok_or_else(|| unknown_property(&alias, &current))?;
                if sel.leaf().collection {
                    target.hops.push(NavigationHop::ElementCollection { selector: sel });
                    prefix.clear();
                    after_collection = true;
                }
            }
            ResourceSegment::Count => target.count = true,
            ResourceSegment::Value => {}
            ResourceSegment::EntitySet { .. }
            | ResourceSegment::Function { .. }
            | ResourceSegment::Action { .. } => return Err(unsupported(segment)),
        }
    }
    if !prefix.is_empty() {
        target.property = Some(prefix.join("/"));
    }
    Ok(target)
}

/// Resolve `$expand` items against `ty`; `prefix` is the property path of the request.
///
/// `*` expands every association declared directly on the addressed type.
pub fn determine_expands(
    schema: &Schema,
    ty: &Arc<StructuredType>,
    prefix: Option<&str>,
    items: &[ExpandItem],
) -> Result<Vec<(AssociationPath, ExpandItem)>> {
    let mut out: Vec<(AssociationPath, ExpandItem)> = Vec::new();
    let full = |name: &str| match prefix {
        Some(p) => format!("{p}/{name}"),
        None => name.to_string(),
    };
    for item in items {
        if item.star {
            let names: Vec<String> = match prefix {
                Some(p) => ty
                    .path(p)
                    .and_then(|s| s.leaf().complex_type().cloned())
                    .map(|ct| ct.associations.iter().map(|a| a.external_name.clone()).collect())
                    .unwrap_or_default(),
                None => ty.associations.iter().map(|a| a.external_name.clone()).collect(),
            };
            for name in names {
                let alias = full(&name);
                match ty.association_path(&alias, schema) {
                    Some(nav) => push_unique(
                        &mut out,
                        nav,
                        ExpandItem::new(&name).with_options(item.options.clone()),
                    ),
                    None => tracing::error!(
                        navigation = %alias,
                        entity_type = %ty.name,
                        "navigation target type unknown, expand skipped"
                    ),
                }
            }
            continue;
        }
        let alias = full(&item.path.join("/"));
        match ty.association_path(&alias, schema) {
            Some(nav) => push_unique(&mut out, nav, item.clone()),
            None if ty.find_association_path(&alias).is_some() => tracing::error!(
                navigation = %alias,
                entity_type = %ty.name,
                "navigation target type unknown, expand skipped"
            ),
            None => return Err(unknown_property(&alias, ty)),
        }
    }
    Ok(out)
}

fn push_unique(out: &mut Vec<(AssociationPath, ExpandItem)>, nav: AssociationPath, item: ExpandItem) {
    if out.iter().any(|(p, _)| p.alias == nav.alias) {
        tracing::debug!(navigation = %nav.alias, "duplicate $expand item ignored");
        return;
    }
    out.push((nav, item));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Association, Attribute, EdmPrimitive, JoinColumn, StorageType};

    fn schema() -> Schema {
        let admin = Arc::new(
            StructuredType::complex("AdministrativeInformation")
                .attribute(Attribute::primitive("CreatedBy", EdmPrimitive::String, StorageType::String))
                .association(Association::to_one("CreatedByUser", "Person").join("created_by", "id")),
        );
        let person = StructuredType::entity("Person", "person")
            .attribute(Attribute::primitive("ID", EdmPrimitive::String, StorageType::String).column("id").key())
            .attribute(Attribute::complex("AdministrativeInformation", admin))
            .attribute(
                Attribute::primitive("Tags", EdmPrimitive::String, StorageType::String)
                    .element_collection("person_tag", vec![JoinColumn::new("id", "person_id")]),
            )
            .association(Association::to_many("Roles", "Role").join("id", "person_id"))
            .association(Association::to_many("Ghosts", "Ghost").join("id", "person_id"));
        let role = StructuredType::entity("Role", "role")
            .attribute(Attribute::primitive("RoleID", EdmPrimitive::Int32, StorageType::Int).key());
        Schema::builder()
            .entity_set("Persons", person)
            .entity_set("Roles", role)
            .build()
            .unwrap()
    }

    #[test]
    fn no_navigation_gives_no_hops() {
        let schema = schema();
        let target = determine_navigations(&schema, &ResourcePath::entity_set("Persons")).unwrap();
        assert!(target.hops.is_empty());
        assert!(!target.is_single());
        assert_eq!(target.result_type().name, "Person");
    }

    #[test]
    fn navigation_and_collection_hops() {
        let schema = schema();
        let path = ResourcePath::entity_set("Persons")
            .with_key(KeyPredicate::single("1"))
            .navigate("Roles");
        let target = determine_navigations(&schema, &path).unwrap();
        assert_eq!(target.association_count(), 1);
        assert_eq!(target.result_type().name, "Role");

        let path = ResourcePath::entity_set("Persons")
            .with_key(KeyPredicate::single("1"))
            .primitive("Tags", true);
        let target = determine_navigations(&schema, &path).unwrap();
        assert_eq!(target.collection_hop().unwrap().alias, "Tags");
        assert!(target.property.is_none());
    }

    #[test]
    fn complex_prefix_feeds_following_navigation() {
        let schema = schema();
        let path = ResourcePath::entity_set("Persons")
            .with_key(KeyPredicate::single("1"))
            .complex("AdministrativeInformation", false)
            .navigate("CreatedByUser");
        let target = determine_navigations(&schema, &path).unwrap();
        let nav = target.association_hops().next().unwrap();
        assert_eq!(nav.alias, "AdministrativeInformation/CreatedByUser");
        assert_eq!(nav.prefix.len(), 1);
    }

    #[test]
    fn unresolvable_target_is_skipped() {
        let schema = schema();
        let path = ResourcePath::entity_set("Persons").navigate("Ghosts");
        let target = determine_navigations(&schema, &path).unwrap();
        assert!(target.hops.is_empty());
    }

    #[test]
    fn unknown_navigation_and_functions_fail() {
        let schema = schema();
        let err = determine_navigations(&schema, &ResourcePath::entity_set("Persons").navigate("Nope"))
            .unwrap_err();
        assert_eq!(err.key(), MessageKey::QueryPreparationUnknownProperty);
        let err = determine_navigations(&schema, &ResourcePath::entity_set("Nope")).unwrap_err();
        assert_eq!(err.status(), http::StatusCode::NOT_FOUND);
        let mut path = ResourcePath::entity_set("Persons");
        path.segments.push(ResourceSegment::Function { name: "Top".into() });
        let err = determine_navigations(&schema, &path).unwrap_err();
        assert_eq!(err.status(), http::StatusCode::NOT_IMPLEMENTED);
    }

    #[test]
    fn star_expands_direct_associations_only() {
        let schema = schema();
        let person = schema.entity_type("Person").unwrap().clone();
        let expands = determine_expands(&schema, &person, None, &[ExpandItem::star()]).unwrap();
        let aliases: Vec<_> = expands.iter().map(|(p, _)| p.alias.as_str()).collect();
        assert_eq!(aliases, vec!["Roles"]);
    }

    #[test]
    fn expand_under_property_prefix() {
        let schema = schema();
        let person = schema.entity_type("Person").unwrap().clone();
        let expands = determine_expands(
            &schema,
            &person,
            Some("AdministrativeInformation"),
            &[ExpandItem::new("CreatedByUser")],
        )
        .unwrap();
        assert_eq!(expands[0].0.alias, "AdministrativeInformation/CreatedByUser");
    }
}
