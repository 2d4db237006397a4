use super::{Schema, StructuredType};
use crate::db::{DataAccessConditioner, DatabaseProcessor, DefaultDatabaseProcessor};
use crate::error::{MessageKey, ProcessorError, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Assembles a [`Schema`]; `build` checks the model for the mistakes the query builder
/// cannot recover from.
#[derive(Default)]
pub struct SchemaBuilder {
    types: Vec<Arc<StructuredType>>,
    entity_sets: Vec<(String, String)>,
    conditioners: HashMap<String, Arc<dyn DataAccessConditioner>>,
    processor: Option<Arc<dyn DatabaseProcessor>>,
}

impl SchemaBuilder {
    /// Register an entity type together with its entity set.
    pub fn entity_set(mut self, set: impl Into<String>, ty: StructuredType) -> Self {
        self.entity_sets.push((set.into(), ty.name.clone()));
        self.types.push(Arc::new(ty));
        self
    }

    /// Register an entity type that is only reachable through navigation.
    pub fn entity_type(mut self, ty: StructuredType) -> Self {
        self.types.push(Arc::new(ty));
        self
    }

    pub fn conditioner(
        mut self,
        type_name: impl Into<String>,
        conditioner: Arc<dyn DataAccessConditioner>,
    ) -> Self {
        self.conditioners.insert(type_name.into(), conditioner);
        self
    }

    pub fn processor(mut self, processor: Arc<dyn DatabaseProcessor>) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn build(self) -> Result<Schema> {
        let mut types = HashMap::new();
        for ty in self.types {
            if ty.is_complex() {
                return Err(invalid(&ty.name, "entity types need a table"));
            }
            if ty.key_paths().is_empty() {
                return Err(invalid(&ty.name, "entity types need at least one key attribute"));
            }
            validate_attributes(&ty)?;
            if types.insert(ty.name.clone(), ty.clone()).is_some() {
                return Err(invalid(&ty.name, "declared twice"));
            }
        }
        tracing::debug!(
            types = types.len(),
            entity_sets = self.entity_sets.len(),
            "schema built"
        );
        Ok(Schema {
            types,
            entity_sets: self.entity_sets,
            conditioners: self.conditioners,
            processor: self
                .processor
                .unwrap_or_else(|| Arc::new(DefaultDatabaseProcessor)),
        })
    }
}

fn validate_attributes(ty: &StructuredType) -> Result<()> {
    for attr in &ty.attributes {
        if attr.collection && attr.collection_table.is_none() {
            return Err(invalid(&attr.external_name, "collections need a collection table"));
        }
        if attr.collection && attr.key {
            return Err(invalid(&attr.external_name, "collections cannot be keys"));
        }
        if let Some(ct) = attr.complex_type() {
            validate_attributes(ct)?;
        }
    }
    Ok(())
}

fn invalid(name: &str, detail: &str) -> ProcessorError {
    ProcessorError::new(
        MessageKey::QueryPreparationError,
        [format!("invalid schema element '{name}': {detail}")],
    )
}
