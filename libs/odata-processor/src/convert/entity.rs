//! Flat tuples -> entity graph.

use super::buffer::{add_unique, ensure_collection, set_property, ComplexValueBuffer};
use super::merge::merge_entity;
use super::value::ValueConverter;
use crate::config::{IdStrategy, ProcessorConfig};
use crate::db::{is_null, DbValue};
use crate::error::{MessageKey, ProcessorError, Result};
use crate::result::{ExpandQueryEntityResult, QueryEntityResult, ResultScope, Tuple};
use crate::schema::{Schema, Selector, StructuredType};
use odata_core::{
    Entity, EntityCollection, Inline, KeyPredicate, Link, PropertyContainer, PropertyValue,
};
use std::collections::HashMap;

/// Turns query results into entities.
///
/// Every row produces a fresh entity and a fresh [`ComplexValueBuffer`]. Rows decoding to
/// an id already seen are merged into the first entity with that id.
pub struct EntityConverter<'a> {
    schema: &'a Schema,
    values: &'a ValueConverter,
    config: &'a ProcessorConfig,
}

impl<'a> EntityConverter<'a> {
    pub fn new(schema: &'a Schema, values: &'a ValueConverter, config: &'a ProcessorConfig) -> Self {
        Self {
            schema,
            values,
            config,
        }
    }

    pub fn convert(&self, result: &QueryEntityResult) -> Result<EntityCollection> {
        let entities = self.convert_rows(&result.scope, &result.rows)?;
        Ok(EntityCollection {
            entities,
            count: None,
        })
    }

    pub fn convert_rows(&self, scope: &ResultScope, rows: &[Tuple]) -> Result<Vec<Entity>> {
        let mut out: Vec<Entity> = Vec::with_capacity(rows.len());
        let mut by_id: HashMap<String, usize> = HashMap::new();
        for (row_index, row) in rows.iter().enumerate() {
            let entity = self.convert_row(scope, row, row_index)?;
            match entity.id.as_ref().and_then(|id| by_id.get(id).copied()) {
                Some(idx) => merge_entity(&mut out[idx], entity)?,
                None => {
                    if let Some(id) = &entity.id {
                        by_id.insert(id.clone(), out.len());
                    }
                    out.push(entity);
                }
            }
        }
        Ok(out)
    }

    fn convert_row(&self, scope: &ResultScope, row: &Tuple, row_index: usize) -> Result<Entity> {
        let ty = &scope.entity_type;
        let mut entity = Entity::new(ty.name.clone());
        let mut buffer = ComplexValueBuffer::default();

        for (alias, value) in row.iter() {
            // correlation key columns and association paths do not resolve
            let Some(sel) = ty.path(alias) else {
                continue;
            };
            if sel.elements.iter().any(|a| a.ignore) {
                continue;
            }
            self.put_value(&mut entity, &mut buffer, &sel, value, row_index)?;
        }

        for collection in &scope.collections {
            let rows = collection.rows_for(row);
            if rows.is_empty() {
                self.empty_collection(&mut entity, &mut buffer, &collection.attribute);
                continue;
            }
            let leaves = ty.collection_leaf_paths(&collection.attribute);
            for (i, crow) in rows.iter().enumerate() {
                for leaf in &leaves {
                    if let Some(value) = crow.get(&leaf.alias) {
                        self.put_value(&mut entity, &mut buffer, leaf, value, i)?;
                    }
                }
            }
        }

        for child in scope.expands.iter() {
            let Some(link) = self.link(child, row)? else {
                continue;
            };
            let prefix = &child.navigation.prefix;
            match buffer.node(prefix, row_index) {
                Some(node) => buffer.value_mut(node).navigation_links.push(link),
                None => entity.navigation_links.push(link),
            }
        }

        buffer.drain_into(&mut entity);
        entity.id = self.entity_id(ty, row)?;
        Ok(entity)
    }

    fn put_value(
        &self,
        entity: &mut Entity,
        buffer: &mut ComplexValueBuffer,
        sel: &Selector,
        value: &DbValue,
        row_index: usize,
    ) -> Result<()> {
        let leaf = sel.leaf();
        let converted = self.values.to_odata(leaf, value)?;
        let name = leaf.external_name.clone();

        // embedded id components are exposed flat
        let container: &mut dyn PropertyContainer =
            if sel.first().is_embedded_id() || sel.elements.len() == 1 {
                entity
            } else {
                let parents = &sel.elements[..sel.elements.len() - 1];
                match buffer.node(parents, row_index) {
                    Some(node) => buffer.value_mut(node),
                    None => entity,
                }
            };

        if leaf.collection {
            if !is_null(value) {
                add_unique(container, &name, PropertyValue::Primitive(converted));
            }
        } else {
            set_property(container, name, PropertyValue::Primitive(converted));
        }
        Ok(())
    }

    fn empty_collection(&self, entity: &mut Entity, buffer: &mut ComplexValueBuffer, sel: &Selector) {
        let name = &sel.leaf().external_name;
        let parents = &sel.elements[..sel.elements.len() - 1];
        match buffer.node(parents, 0) {
            Some(node) => ensure_collection(buffer.value_mut(node), name),
            None => ensure_collection(entity, name),
        }
    }

    fn link(&self, child: &ExpandQueryEntityResult, row: &Tuple) -> Result<Option<Link>> {
        let rows = child.rows_for(row);
        if rows.is_empty() {
            return Ok(None);
        }
        let mut entities = self.convert_rows(&child.scope, rows)?;
        let title = child.navigation.leaf_name().to_string();
        let link = if child.navigation.is_to_many() {
            let count = entities.len() as i64;
            Link {
                title,
                href: None,
                inline: Some(Inline::Collection(EntityCollection {
                    entities,
                    count: Some(count),
                })),
            }
        } else {
            let first = entities.swap_remove(0);
            Link {
                title,
                href: first.id.clone(),
                inline: Some(Inline::Entity(Box::new(first))),
            }
        };
        Ok(Some(link))
    }

    /// `Set(key)`; a single unnamed key value uses the short form.
    fn entity_id(&self, ty: &StructuredType, row: &Tuple) -> Result<Option<String>> {
        let set = self.schema.entity_set_for_type(&ty.name).ok_or_else(|| {
            ProcessorError::new(MessageKey::QueryResultEntitySetError, [ty.name.as_str()])
        })?;
        let keys = ty.key_paths();
        let mut values = Vec::with_capacity(keys.len());
        for key in &keys {
            let value = match row.get(&key.alias) {
                Some(v) if !is_null(v) => self.values.to_odata(key.leaf(), v)?,
                _ => {
                    return match self.config.id_strategy {
                        IdStrategy::Required => Err(ProcessorError::new(
                            MessageKey::QueryResultKeyPropertyError,
                            [key.alias.as_str(), ty.name.as_str()],
                        )),
                        IdStrategy::Nullable => Ok(None),
                        IdStrategy::Generated => Ok(Some(format!(
                            "{set}(generated-{}-{})",
                            chrono::Utc::now().timestamp_millis(),
                            uuid::Uuid::new_v4()
                        ))),
                    };
                }
            };
            values.push((key.alias.clone(), value));
        }
        let predicate = match values.as_slice() {
            [(_, value)] if !keys[0].first().is_embedded_id() => KeyPredicate::single(value.clone()),
            _ => KeyPredicate::named(values),
        };
        Ok(Some(format!("{set}{predicate}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::ConverterRegistry;
    use crate::keys::NavigationKeyBuilder;
    use crate::result::QueryElementCollectionResult;
    use crate::schema::{Association, Attribute, EdmPrimitive, JoinColumn, StorageType};
    use odata_core::ast::Value;
    use std::sync::Arc;

    fn text(s: &str) -> DbValue {
        DbValue::String(Some(Box::new(s.to_string())))
    }

    fn schema() -> Schema {
        let address = Arc::new(
            StructuredType::complex("Address")
                .attribute(Attribute::primitive("Street", EdmPrimitive::String, StorageType::String).column("street"))
                .attribute(Attribute::primitive("Country", EdmPrimitive::String, StorageType::String).column("country")),
        );
        let person = StructuredType::entity("Person", "person")
            .attribute(Attribute::primitive("ID", EdmPrimitive::String, StorageType::String).column("id").key())
            .attribute(Attribute::primitive("Name", EdmPrimitive::String, StorageType::String))
            .attribute(Attribute::complex("Address", address.clone()))
            .attribute(
                Attribute::complex("InhouseAddress", address)
                    .element_collection("inhouse_address", vec![JoinColumn::new("id", "person_id")]),
            )
            .association(Association::to_many("Roles", "Role").join("id", "person_id"));
        let role = StructuredType::entity("Role", "role")
            .attribute(Attribute::primitive("RoleID", EdmPrimitive::Int32, StorageType::Int).key());
        Schema::builder()
            .entity_set("Persons", person)
            .entity_set("Roles", role)
            .build()
            .unwrap()
    }

    fn scope(schema: &Schema, ty: &str) -> ResultScope {
        let ty = schema.entity_type(ty).unwrap().clone();
        ResultScope::new(ty.clone(), NavigationKeyBuilder::root(ty))
    }

    fn values() -> ValueConverter {
        ValueConverter::new(Arc::new(ConverterRegistry::with_defaults()))
    }

    #[test]
    fn builds_id_and_complex_values() {
        let schema = schema();
        let values = values();
        let config = ProcessorConfig::default();
        let conv = EntityConverter::new(&schema, &values, &config);
        let row = Tuple::default()
            .with("ID", text("99"))
            .with("Address/Street", text("Main"))
            .with("Address/Country", text("DEU"))
            .with("k1.ID", text("ignored"));
        let entities = conv.convert_rows(&scope(&schema, "Person"), &[row]).unwrap();
        assert_eq!(entities.len(), 1);
        let e = &entities[0];
        assert_eq!(e.id.as_deref(), Some("Persons('99')"));
        let address = e.value_of("Address").unwrap().as_complex().unwrap();
        assert_eq!(
            address.value_of("Country"),
            Some(&PropertyValue::Primitive(Value::from("DEU")))
        );
        assert!(e.property("k1.ID").is_none());
    }

    #[test]
    fn id_strategies() {
        let schema = schema();
        let values = values();
        let row = Tuple::default().with("Name", text("x"));
        let scope = scope(&schema, "Person");

        let config = ProcessorConfig::default();
        let err = EntityConverter::new(&schema, &values, &config)
            .convert_rows(&scope, std::slice::from_ref(&row))
            .unwrap_err();
        assert_eq!(err.key(), MessageKey::QueryResultKeyPropertyError);

        let config = ProcessorConfig {
            id_strategy: IdStrategy::Nullable,
            ..Default::default()
        };
        let entities = EntityConverter::new(&schema, &values, &config)
            .convert_rows(&scope, std::slice::from_ref(&row))
            .unwrap();
        assert!(entities[0].id.is_none());

        let config = ProcessorConfig {
            id_strategy: IdStrategy::Generated,
            ..Default::default()
        };
        let entities = EntityConverter::new(&schema, &values, &config)
            .convert_rows(&scope, &[row.clone(), row])
            .unwrap();
        assert_eq!(entities.len(), 2);
        assert!(entities[0].id.as_deref().unwrap().starts_with("Persons(generated-"));
    }

    #[test]
    fn element_collection_rows_become_entries() {
        let schema = schema();
        let values = values();
        let config = ProcessorConfig::default();
        let mut scope = scope(&schema, "Person");
        let person = scope.entity_type.clone();
        let coll = person.path("InhouseAddress").unwrap();
        let rows = (0..3)
            .map(|i| {
                Tuple::default()
                    .with("k1.ID", text("99"))
                    .with("InhouseAddress/Street", text(&format!("Street {i}")))
            })
            .collect();
        scope.collections.push(QueryElementCollectionResult::new(
            coll,
            scope.key_builder.clone(),
            rows,
        ));

        let conv = EntityConverter::new(&schema, &values, &config);
        let owners = [
            Tuple::default().with("ID", text("99")),
            Tuple::default().with("ID", text("100")),
        ];
        let entities = conv.convert_rows(&scope, &owners).unwrap();
        let entries = entities[0].value_of("InhouseAddress").unwrap().as_collection().unwrap();
        assert_eq!(entries.len(), 3);
        let empty = entities[1].value_of("InhouseAddress").unwrap().as_collection().unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn expand_rows_become_inline_links() {
        let schema = schema();
        let values = values();
        let config = ProcessorConfig::default();
        let mut parent = scope(&schema, "Person");
        let nav = parent.entity_type.association_path("Roles", &schema).unwrap();
        let child_builder = parent.key_builder.child(&nav, &nav.target_type).unwrap();
        let child_scope = ResultScope::new(nav.target_type.clone(), child_builder);
        let rows = vec![
            Tuple::default().with("k1.ID", text("1")).with("RoleID", DbValue::Int(Some(1))),
            Tuple::default().with("k1.ID", text("1")).with("RoleID", DbValue::Int(Some(2))),
            Tuple::default().with("k1.ID", text("2")).with("RoleID", DbValue::Int(Some(3))),
        ];
        let child = ExpandQueryEntityResult::new(nav, parent.key_builder.clone(), child_scope)
            .with_rows(rows);
        parent.expands.put(child).unwrap();

        let conv = EntityConverter::new(&schema, &values, &config);
        let owners = [
            Tuple::default().with("ID", text("1")),
            Tuple::default().with("ID", text("2")),
            Tuple::default().with("ID", text("3")),
        ];
        let entities = conv.convert_rows(&parent, &owners).unwrap();
        let counts: Vec<usize> = entities
            .iter()
            .map(|e| e.navigation_link("Roles").map(Link::inline_count).unwrap_or(0))
            .collect();
        assert_eq!(counts, vec![2, 1, 0]);
        assert!(entities[2].navigation_link("Roles").is_none());
        let role = entities[0].navigation_link("Roles").unwrap().inline_entities()[0];
        assert_eq!(role.id.as_deref(), Some("Roles(1)"));
    }

    #[test]
    fn missing_entity_set_is_a_server_error() {
        let schema = schema();
        let values = values();
        let config = ProcessorConfig::default();
        let orphan = Arc::new(
            StructuredType::entity("Orphan", "orphan")
                .attribute(Attribute::primitive("ID", EdmPrimitive::Int32, StorageType::Int).key()),
        );
        let scope = ResultScope::new(orphan.clone(), NavigationKeyBuilder::root(orphan));
        let err = EntityConverter::new(&schema, &values, &config)
            .convert_rows(&scope, &[Tuple::default().with("ID", DbValue::Int(Some(1)))])
            .unwrap_err();
        assert_eq!(err.key(), MessageKey::QueryResultEntitySetError);
    }
}
