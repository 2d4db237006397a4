use super::context::QueryContext;
use super::criteria::{resolve_selection, where_condition, CriteriaQuery, Selection};
use super::QueryBuilder;
use crate::error::Result;
use crate::navigation::QueryTarget;
use crate::result::{QueryEntityResult, ResultScope};
use async_trait::async_trait;
use odata_core::QueryOptions;

/// The root query of a read request.
///
/// With navigation hops the rows also carry the start keys and the keys of every
/// intermediate hop under their correlation aliases, so `$expand` results can be attached.
pub struct EntityQuery<'a> {
    ctx: &'a QueryContext,
    target: &'a QueryTarget,
    options: &'a QueryOptions,
    query: CriteriaQuery,
    selection: Option<Selection>,
}

impl<'a> EntityQuery<'a> {
    pub fn new(ctx: &'a QueryContext, target: &'a QueryTarget, options: &'a QueryOptions) -> Self {
        Self {
            ctx,
            target,
            options,
            query: CriteriaQuery::new(),
            selection: None,
        }
    }

    /// Resolved selection, available after `build_select`.
    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn criteria(&self) -> &CriteriaQuery {
        &self.query
    }
}

#[async_trait]
impl QueryBuilder for EntityQuery<'_> {
    type Output = QueryEntityResult;

    fn build_from(&mut self) -> Result<()> {
        self.query.init_from(self.ctx, self.target)?;
        Ok(())
    }

    fn build_where(&mut self) -> Result<()> {
        let from = self.query.from()?.clone();
        if let Some(condition) = where_condition(self.ctx, self.target, &from, self.options.search.as_deref())? {
            self.query.and_where(condition);
        }
        Ok(())
    }

    fn build_select(&mut self) -> Result<()> {
        let from = self.query.from()?.clone();
        let result = from.result_scope();
        if !from.hops.is_empty() {
            self.query.select_prefixed_keys(&from.root, &from.root_keys)?;
        }
        let selection = match &from.collection {
            Some((collection, attribute)) => {
                let keys = result.ty.key_paths();
                for key in &keys {
                    self.query.select_path(result, key, key.alias.clone())?;
                }
                for leaf in result.ty.collection_leaf_paths(attribute) {
                    self.query.select_path(collection, &leaf, leaf.alias.clone())?;
                }
                Selection {
                    paths: keys,
                    collections: Vec::new(),
                }
            }
            None => {
                let selection =
                    resolve_selection(&result.ty, &self.options.select, self.target.property.as_deref())?;
                for path in &selection.paths {
                    self.query.select_path(result, path, path.alias.clone())?;
                }
                selection
            }
        };
        for hop in from.intermediate_hops() {
            self.query.select_prefixed_keys(&hop.scope, &hop.key_builder)?;
        }

        self.query.order_by(self.ctx, &self.options.orderby)?;
        if self.options.orderby.is_empty() && self.options.has_paging() && self.ctx.config.stable_paging {
            self.query.order_by_keys(result);
        }
        self.query
            .apply_top_skip(&self.ctx.config, self.options.top, self.options.skip)?;
        self.query.finish();
        self.selection = Some(selection);
        Ok(())
    }

    async fn execute(&mut self) -> Result<QueryEntityResult> {
        let from = self.query.from()?.clone();
        let rows = self
            .ctx
            .executor
            .execute(self.query.statement(), self.query.columns())
            .await?;
        tracing::debug!(
            entity_set = %self.target.entity_set,
            rows = rows.len(),
            "entity query executed"
        );
        let result = from.result_scope();
        Ok(QueryEntityResult {
            scope: ResultScope::new(result.ty.clone(), from.result_key_builder().clone()),
            rows,
            collection_hop: from.collection.map(|(_, attribute)| attribute),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MessageKey;
    use crate::navigation::determine_navigations;
    use crate::query::tests::{context, fixture_schema, person_row, scripted};
    use odata_core::{KeyPredicate, OrderByItem, ResourcePath};
    use sea_orm::sea_query::SqliteQueryBuilder;

    fn built(ctx: &QueryContext, target: &QueryTarget, options: &QueryOptions) -> String {
        let mut q = EntityQuery::new(ctx, target, options);
        q.build_from().unwrap();
        q.build_where().unwrap();
        q.build_select().unwrap();
        q.criteria().statement().to_string(SqliteQueryBuilder)
    }

    #[test]
    fn paging_orders_by_keys_and_applies_offset_then_limit() {
        let ctx = context(fixture_schema());
        let target = determine_navigations(&ctx.schema, &ResourcePath::entity_set("Persons")).unwrap();
        let options = QueryOptions {
            top: Some(2),
            skip: Some(1),
            ..Default::default()
        };
        let sql = built(&ctx, &target, &options);
        assert!(sql.contains(r#"ORDER BY "E0"."id" ASC"#), "{sql}");
        assert!(sql.contains("LIMIT 2 OFFSET 1"), "{sql}");
    }

    #[test]
    fn navigation_selects_correlation_keys() {
        let ctx = context(fixture_schema());
        let path = ResourcePath::entity_set("Persons")
            .with_key(KeyPredicate::single("1"))
            .navigate("Roles");
        let target = determine_navigations(&ctx.schema, &path).unwrap();
        let options = QueryOptions::default();
        let mut q = EntityQuery::new(&ctx, &target, &options);
        q.build_from().unwrap();
        q.build_where().unwrap();
        q.build_select().unwrap();
        let aliases: Vec<_> = q.criteria().columns().iter().map(|c| c.alias.as_str()).collect();
        assert_eq!(aliases[0], "k1.ID");
        assert!(aliases.contains(&"RoleID"));
        assert!(aliases.contains(&"RoleCategory"));
    }

    #[test]
    fn collection_path_selects_leaves_from_the_collection_table() {
        let ctx = context(fixture_schema());
        let path = ResourcePath::entity_set("Persons")
            .with_key(KeyPredicate::single("1"))
            .complex("InhouseAddress", true);
        let target = determine_navigations(&ctx.schema, &path).unwrap();
        let sql = built(&ctx, &target, &QueryOptions::default());
        assert!(sql.contains(r#"INNER JOIN "inhouse_address" AS "C1""#), "{sql}");
        assert!(sql.contains(r#""C1"."street" AS "InhouseAddress/Street""#), "{sql}");
    }

    #[test]
    fn steps_require_initialization() {
        let ctx = context(fixture_schema());
        let target = determine_navigations(&ctx.schema, &ResourcePath::entity_set("Persons")).unwrap();
        let options = QueryOptions::default();
        let mut q = EntityQuery::new(&ctx, &target, &options);
        assert_eq!(q.build_select().unwrap_err().key(), MessageKey::IllegalState);
        q.build_from().unwrap();
        assert_eq!(q.build_from().unwrap_err().key(), MessageKey::IllegalState);
    }

    #[test]
    fn negative_top_is_rejected() {
        let ctx = context(fixture_schema());
        let target = determine_navigations(&ctx.schema, &ResourcePath::entity_set("Persons")).unwrap();
        let options = QueryOptions {
            top: Some(-1),
            ..Default::default()
        };
        let mut q = EntityQuery::new(&ctx, &target, &options);
        q.build_from().unwrap();
        let err = q.build_select().unwrap_err();
        assert_eq!(err.key(), MessageKey::QueryPreparationInvalidValue);
        assert_eq!(err.params(), ["$top".to_string(), "-1".to_string()]);
    }

    #[tokio::test]
    async fn run_returns_rows_with_the_result_scope() {
        let (ctx, executor) = scripted(fixture_schema());
        let target = determine_navigations(&ctx.schema, &ResourcePath::entity_set("Persons")).unwrap();
        let options = QueryOptions {
            orderby: vec![OrderByItem::desc("Name")],
            ..Default::default()
        };
        executor.push(vec![person_row("1", "Ada")]);
        let result = EntityQuery::new(&ctx, &target, &options).run().await.unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.scope.entity_type.name, "Person");
        assert!(result.collection_hop.is_none());
        let sql = executor.statements();
        assert!(sql[0].contains(r#"ORDER BY "E0"."name" DESC"#), "{}", sql[0]);
    }
}
