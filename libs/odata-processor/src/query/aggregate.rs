use super::context::QueryContext;
use super::criteria::{leaf_storage, where_condition, CriteriaQuery};
use super::QueryBuilder;
use crate::convert::db_to_odata;
use crate::db::is_null;
use crate::error::{MessageKey, ProcessorError, Result};
use crate::navigation::QueryTarget;
use crate::schema::{Selector, StorageType};
use async_trait::async_trait;
use odata_core::ast::Value;
use odata_core::{AggregateExpr, AggregateMethod, ApplyItem, Entity, Property, QueryOptions};
use sea_orm::sea_query::Func;

/// `$apply=aggregate(Path with method as Alias)` as a single-row query.
///
/// The result is a pseudo-entity `<Type>Aggregate` with one property named after the
/// alias (or the method when no alias is given). An aggregate over no rows is zero.
pub struct AggregationQuery<'a> {
    ctx: &'a QueryContext,
    target: &'a QueryTarget,
    options: &'a QueryOptions,
    query: CriteriaQuery,
    aggregate: Option<(AggregateExpr, Selector, StorageType)>,
}

impl<'a> AggregationQuery<'a> {
    pub fn new(ctx: &'a QueryContext, target: &'a QueryTarget, options: &'a QueryOptions) -> Self {
        Self {
            ctx,
            target,
            options,
            query: CriteriaQuery::new(),
            aggregate: None,
        }
    }

    fn single_aggregate(&self) -> Result<AggregateExpr> {
        let mut found: Option<&AggregateExpr> = None;
        for item in &self.options.apply {
            let ApplyItem::Aggregate(exprs) = item else {
                return Err(ProcessorError::new(MessageKey::NotImplemented, [item.kind_name()]));
            };
            for expr in exprs {
                if found.is_some() {
                    return Err(ProcessorError::new(
                        MessageKey::NotImplemented,
                        ["aggregate with more than one expression"],
                    ));
                }
                found = Some(expr);
            }
        }
        found
            .cloned()
            .ok_or_else(|| ProcessorError::invalid_value("$apply", "no aggregate expression"))
    }
}

/// Storage type the aggregate column is decoded as.
fn result_storage(method: AggregateMethod, storage: StorageType) -> Result<StorageType> {
    match method {
        AggregateMethod::Min | AggregateMethod::Max => Ok(storage),
        AggregateMethod::Sum => match storage {
            StorageType::Int | StorageType::BigInt => Ok(StorageType::BigInt),
            StorageType::Double => Ok(StorageType::Double),
            StorageType::Decimal => Ok(StorageType::Decimal),
            other => Err(ProcessorError::invalid_value("$apply", format!("sum over {other}"))),
        },
        AggregateMethod::Average if storage.is_numeric() && storage != StorageType::EpochMillis => {
            Ok(StorageType::Double)
        }
        AggregateMethod::Average => Err(ProcessorError::invalid_value(
            "$apply",
            format!("average over {storage}"),
        )),
    }
}

#[async_trait]
impl QueryBuilder for AggregationQuery<'_> {
    type Output = Entity;

    fn build_from(&mut self) -> Result<()> {
        let expr = self.single_aggregate()?;
        let ty = self.target.result_type().clone();
        let sel = ty.path(&expr.path).ok_or_else(|| {
            ProcessorError::new(
                MessageKey::QueryPreparationUnknownProperty,
                [expr.path.as_str(), ty.name.as_str()],
            )
        })?;
        let storage = result_storage(expr.method, leaf_storage(&sel)?)?;
        self.query.init_from(self.ctx, self.target)?;
        self.aggregate = Some((expr, sel, storage));
        Ok(())
    }

    fn build_where(&mut self) -> Result<()> {
        let from = self.query.from()?.clone();
        let search = self.options.search.as_deref();
        if let Some(condition) = where_condition(self.ctx, self.target, &from, search)? {
            self.query.and_where(condition);
        }
        Ok(())
    }

    fn build_select(&mut self) -> Result<()> {
        let scope = self.query.from()?.result_scope().clone();
        let Some((expr, sel, storage)) = self.aggregate.clone() else {
            return Err(ProcessorError::illegal_state("aggregate not resolved"));
        };
        let column = scope.column(&sel);
        let call = match expr.method {
            AggregateMethod::Sum => Func::sum(column),
            AggregateMethod::Min => Func::min(column),
            AggregateMethod::Max => Func::max(column),
            AggregateMethod::Average => Func::avg(column),
        };
        self.query.select(call.into(), expr.alias_or_method(), storage);
        Ok(())
    }

    async fn execute(&mut self) -> Result<Entity> {
        let Some((expr, sel, storage)) = self.aggregate.clone() else {
            return Err(ProcessorError::illegal_state("aggregate not resolved"));
        };
        let rows = self
            .ctx
            .executor
            .execute(self.query.statement(), self.query.columns())
            .await?;
        let name = expr.alias_or_method().to_string();
        let value = match rows.first().and_then(|r| r.get(&name)) {
            Some(v) if !is_null(v) => match expr.method {
                AggregateMethod::Min | AggregateMethod::Max => self.ctx.values.to_odata(sel.leaf(), v)?,
                AggregateMethod::Sum | AggregateMethod::Average => db_to_odata(v)?,
            },
            _ if storage.is_numeric() => Value::from(0i64),
            _ => Value::Null,
        };
        tracing::debug!(
            entity_set = %self.target.entity_set,
            method = expr.method.name(),
            path = %expr.path,
            "aggregate query executed"
        );
        let mut entity = Entity::new(format!("{}Aggregate", self.target.result_type().name));
        entity.properties.push(Property::primitive(name, value));
        Ok(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbValue;
    use crate::navigation::determine_navigations;
    use crate::query::tests::{fixture_schema, scripted};
    use crate::result::Tuple;
    use odata_core::{PropertyContainer, PropertyValue, ResourcePath};

    fn options(items: Vec<ApplyItem>) -> QueryOptions {
        QueryOptions {
            apply: items,
            ..Default::default()
        }
    }

    fn sum_age(alias: Option<&str>) -> ApplyItem {
        ApplyItem::Aggregate(vec![AggregateExpr {
            path: "Age".into(),
            method: AggregateMethod::Sum,
            alias: alias.map(str::to_string),
        }])
    }

    #[tokio::test]
    async fn sum_over_no_rows_is_zero() {
        let (ctx, executor) = scripted(fixture_schema());
        let target = determine_navigations(&ctx.schema, &ResourcePath::entity_set("Persons")).unwrap();
        executor.push(vec![Tuple::default().with("Total", DbValue::BigInt(None))]);
        let options = options(vec![sum_age(Some("Total"))]);
        let entity = AggregationQuery::new(&ctx, &target, &options).run().await.unwrap();
        assert_eq!(entity.type_name, "PersonAggregate");
        assert_eq!(entity.value_of("Total"), Some(&PropertyValue::Primitive(Value::from(0i64))));
        let sql = &executor.statements()[0];
        assert!(sql.contains(r#"SUM("E0"."age") AS "Total""#), "{sql}");
    }

    #[tokio::test]
    async fn alias_defaults_to_the_method() {
        let (ctx, executor) = scripted(fixture_schema());
        let target = determine_navigations(&ctx.schema, &ResourcePath::entity_set("Persons")).unwrap();
        executor.push(vec![Tuple::default().with("sum", DbValue::BigInt(Some(42)))]);
        let options = options(vec![sum_age(None)]);
        let entity = AggregationQuery::new(&ctx, &target, &options).run().await.unwrap();
        assert_eq!(entity.value_of("sum"), Some(&PropertyValue::Primitive(Value::from(42i64))));
    }

    #[test]
    fn unsupported_transformations() {
        let (ctx, _) = scripted(fixture_schema());
        let target = determine_navigations(&ctx.schema, &ResourcePath::entity_set("Persons")).unwrap();

        let groupby = options(vec![ApplyItem::GroupBy(vec!["Name".into()])]);
        let err = AggregationQuery::new(&ctx, &target, &groupby).build_from().unwrap_err();
        assert_eq!(err.status(), http::StatusCode::NOT_IMPLEMENTED);

        let missing = options(vec![ApplyItem::Aggregate(vec![])]);
        let err = AggregationQuery::new(&ctx, &target, &missing).build_from().unwrap_err();
        assert_eq!(err.key(), MessageKey::QueryPreparationInvalidValue);

        let text = options(vec![ApplyItem::Aggregate(vec![AggregateExpr {
            path: "Name".into(),
            method: AggregateMethod::Sum,
            alias: None,
        }])]);
        let err = AggregationQuery::new(&ctx, &target, &text).build_from().unwrap_err();
        assert!(err.is_client_error());
    }
}
