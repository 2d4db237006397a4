//! Request entry points: resource path and query options in, entity graph out.

use crate::access::{Instance, InstanceFactory};
use crate::config::ProcessorConfig;
use crate::convert::{EntityConverter, ValueConverter, WriteConverter};
use crate::db::TupleExecutor;
use crate::error::{MessageKey, ProcessorError, Result};
use crate::navigation::{determine_navigations, QueryTarget};
use crate::query::{load_children, AggregationQuery, CountQuery, EntityQuery, QueryBuilder, QueryContext};
use crate::schema::Schema;
use odata_core::{Entity, EntityCollection, Property, QueryOptions, ResourcePath};
use std::sync::Arc;

/// Outcome of [`ODataProcessor::read`].
#[derive(Debug, Clone, PartialEq)]
pub enum ReadResult {
    Entities(EntityCollection),
    Count(i64),
    Aggregate(Entity),
}

/// Reads OData resources from the database described by a [`Schema`].
///
/// Each call builds a fresh [`QueryContext`]; queries of one request run one after another.
#[derive(Clone)]
pub struct ODataProcessor {
    schema: Arc<Schema>,
    values: Arc<ValueConverter>,
    config: ProcessorConfig,
    executor: Arc<dyn TupleExecutor>,
}

impl ODataProcessor {
    pub fn new(
        schema: Arc<Schema>,
        values: Arc<ValueConverter>,
        config: ProcessorConfig,
        executor: Arc<dyn TupleExecutor>,
    ) -> Self {
        Self {
            schema,
            values,
            config,
            executor,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Context for one request.
    pub fn context(&self) -> QueryContext {
        QueryContext::new(
            self.schema.clone(),
            self.values.clone(),
            self.config.clone(),
            self.executor.clone(),
        )
    }

    /// Dispatch on the request shape: `$apply`, `/$count`, or entities.
    pub async fn read(&self, path: &ResourcePath, options: &QueryOptions) -> Result<ReadResult> {
        if !options.apply.is_empty() {
            return self.aggregate(path, options).await.map(ReadResult::Aggregate);
        }
        let target = self.target(path, options)?;
        if target.count {
            let ctx = self.context();
            let count = CountQuery::new(&ctx, &target, options.search.as_deref()).run().await?;
            return Ok(ReadResult::Count(count));
        }
        self.read_target(&target, options).await.map(ReadResult::Entities)
    }

    pub async fn read_entities(&self, path: &ResourcePath, options: &QueryOptions) -> Result<EntityCollection> {
        let target = self.target(path, options)?;
        self.read_target(&target, options).await
    }

    /// The single entity a path addresses; 404 when there is none.
    pub async fn read_entity(&self, path: &ResourcePath, options: &QueryOptions) -> Result<Entity> {
        let target = self.target(path, options)?;
        let collection = self.read_target(&target, options).await?;
        collection.entities.into_iter().next().ok_or_else(|| {
            let addressed = match &target.start_keys {
                Some(keys) => format!("{}{keys}", target.entity_set),
                None => target.entity_set.clone(),
            };
            ProcessorError::new(MessageKey::EntityNotFound, [addressed])
        })
    }

    pub async fn count(&self, path: &ResourcePath, options: &QueryOptions) -> Result<i64> {
        let target = self.target(path, options)?;
        let ctx = self.context();
        CountQuery::new(&ctx, &target, options.search.as_deref()).run().await
    }

    pub async fn aggregate(&self, path: &ResourcePath, options: &QueryOptions) -> Result<Entity> {
        let target = self.target(path, options)?;
        let ctx = self.context();
        AggregationQuery::new(&ctx, &target, options).run().await
    }

    pub fn write_converter(&self) -> WriteConverter {
        WriteConverter::new(self.values.clone())
    }

    /// New instance of the entity set's type with `properties` written into it.
    pub fn create_instance(
        &self,
        entity_set: &str,
        properties: &[Property],
        factory: &dyn InstanceFactory,
    ) -> Result<Box<dyn Instance>> {
        let ty = self.schema.entity_set(entity_set).ok_or_else(|| {
            ProcessorError::new(MessageKey::QueryPreparationEntitySetUnknown, [entity_set])
        })?;
        let mut instance = factory.create(ty)?;
        self.write_converter().convert(ty, properties, instance.as_mut())?;
        Ok(instance)
    }

    fn target(&self, path: &ResourcePath, options: &QueryOptions) -> Result<QueryTarget> {
        let mut target = determine_navigations(&self.schema, path)?;
        if options.filter.is_some() {
            target.set_result_filter(options.filter.clone());
        }
        Ok(target)
    }

    async fn read_target(&self, target: &QueryTarget, options: &QueryOptions) -> Result<EntityCollection> {
        let ctx = self.context();
        let mut result = EntityQuery::new(&ctx, target, options).run().await?;
        let rows = std::mem::take(&mut result.rows);
        load_children(&ctx, target, options, &mut result.scope, &rows).await?;
        result.rows = rows;

        let mut collection = EntityConverter::new(&ctx.schema, &ctx.values, &ctx.config).convert(&result)?;
        if options.count {
            let count = CountQuery::new(&ctx, target, options.search.as_deref()).run().await?;
            collection.count = Some(count);
        }
        tracing::debug!(
            entity_set = %target.entity_set,
            entities = collection.len(),
            expands = result.scope.expands.len(),
            "read completed"
        );
        Ok(collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::ConverterRegistry;
    use crate::query::tests::{fixture_schema, person_row, ScriptedExecutor};
    use odata_core::{AggregateExpr, AggregateMethod, ApplyItem, KeyPredicate};

    fn processor() -> (ODataProcessor, Arc<ScriptedExecutor>) {
        let executor = Arc::new(ScriptedExecutor::default());
        let processor = ODataProcessor::new(
            Arc::new(fixture_schema()),
            Arc::new(ValueConverter::new(Arc::new(ConverterRegistry::with_defaults()))),
            ProcessorConfig::default(),
            executor.clone(),
        );
        (processor, executor)
    }

    #[tokio::test]
    async fn read_dispatches_count_and_aggregate() {
        let (processor, executor) = processor();
        executor.push(vec![crate::result::Tuple::default().with("count", crate::db::DbValue::BigInt(Some(4)))]);
        let count = processor
            .read(&ResourcePath::entity_set("Persons").count(), &QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(count, ReadResult::Count(4));

        let options = QueryOptions {
            apply: vec![ApplyItem::Aggregate(vec![AggregateExpr {
                path: "Age".into(),
                method: AggregateMethod::Max,
                alias: None,
            }])],
            ..Default::default()
        };
        let ReadResult::Aggregate(entity) = processor
            .read(&ResourcePath::entity_set("Persons"), &options)
            .await
            .unwrap()
        else {
            panic!("aggregate expected");
        };
        assert_eq!(entity.type_name, "PersonAggregate");
    }

    #[tokio::test]
    async fn missing_entity_is_not_found() {
        let (processor, _) = processor();
        let path = ResourcePath::entity_set("Persons").with_key(KeyPredicate::single("404"));
        let err = processor.read_entity(&path, &QueryOptions::default()).await.unwrap_err();
        assert_eq!(err.key(), MessageKey::EntityNotFound);
        assert_eq!(err.status(), http::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn inline_count_runs_a_second_query() {
        let (processor, executor) = processor();
        executor.push(vec![person_row("1", "Ada")]);
        executor.push(vec![crate::result::Tuple::default().with("count", crate::db::DbValue::BigInt(Some(9)))]);
        let options = QueryOptions {
            select: vec!["Name".into()],
            top: Some(1),
            count: true,
            ..Default::default()
        };
        let collection = processor
            .read_entities(&ResourcePath::entity_set("Persons"), &options)
            .await
            .unwrap();
        assert_eq!(collection.len(), 1);
        assert_eq!(collection.count, Some(9));
        let statements = executor.statements();
        assert_eq!(statements.len(), 2);
        assert!(statements[1].contains("COUNT"), "{}", statements[1]);
        assert!(!statements[1].contains("LIMIT"), "{}", statements[1]);
    }
}
