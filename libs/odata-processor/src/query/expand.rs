//! `$expand`: one query per navigation and nesting level, restricted to the parent rows.
//!
//! The parent's FROM and WHERE are replayed with the navigation joined as an extra hop.
//! Rows carry the parent chain's keys under their prefixed aliases and are grouped by them.

use super::collection::ElementCollectionQuery;
use super::context::QueryContext;
use super::criteria::{paging_window, resolve_selection, where_condition, CriteriaQuery};
use super::QueryBuilder;
use crate::db::TableScope;
use crate::error::Result;
use crate::keys::KeyPart;
use crate::navigation::{determine_expands, NavigationHop, QueryTarget};
use crate::result::{ExpandQueryEntityResult, ResultScope, Tuple};
use crate::schema::{AssociationPath, Selector};
use async_trait::async_trait;
use odata_core::{ExpandItem, QueryOptions};
use sea_orm::sea_query::{Condition, Expr, Order, SimpleExpr};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

pub struct ExpandQuery<'a> {
    ctx: &'a QueryContext,
    target: QueryTarget,
    navigation: AssociationPath,
    item: &'a ExpandItem,
    parent_rows: &'a [Tuple],
    query: CriteriaQuery,
    window: (Option<u64>, Option<u64>),
}

impl<'a> ExpandQuery<'a> {
    pub fn new(
        ctx: &'a QueryContext,
        parent: &QueryTarget,
        navigation: AssociationPath,
        item: &'a ExpandItem,
        parent_rows: &'a [Tuple],
    ) -> Self {
        let mut target = parent.clone();
        target.property = None;
        target.count = false;
        target.hops.push(NavigationHop::Association {
            path: navigation.clone(),
            keys: None,
            filter: item.options.filter.clone(),
        });
        Self {
            ctx,
            target,
            navigation,
            item,
            parent_rows,
            query: CriteriaQuery::new(),
            window: (None, None),
        }
    }

    /// The parent target extended by the expanded navigation.
    pub fn target(&self) -> &QueryTarget {
        &self.target
    }
}

#[async_trait]
impl QueryBuilder for ExpandQuery<'_> {
    type Output = ExpandQueryEntityResult;

    fn build_from(&mut self) -> Result<()> {
        self.query.init_from(self.ctx, &self.target)?;
        Ok(())
    }

    fn build_where(&mut self) -> Result<()> {
        let from = self.query.from()?.clone();
        let search = self.item.options.search.as_deref();
        if let Some(condition) = where_condition(self.ctx, &self.target, &from, search)? {
            self.query.and_where(condition);
        }
        let owner = from.last_affecting();
        self.query.and_where(parent_key_restriction(
            from.last_affecting_scope(),
            owner.key_paths(),
            self.parent_rows,
        ));
        Ok(())
    }

    fn build_select(&mut self) -> Result<()> {
        let from = self.query.from()?.clone();
        let result = from.result_scope();
        let options = &self.item.options;
        self.query.select_prefixed_keys(&from.root, &from.root_keys)?;
        let selection = resolve_selection(&result.ty, &options.select, None)?;
        for path in &selection.paths {
            self.query.select_path(result, path, path.alias.clone())?;
        }
        for hop in from.intermediate_hops() {
            self.query.select_prefixed_keys(&hop.scope, &hop.key_builder)?;
        }

        // owner first so each group keeps the requested order
        self.query.order_by_keys(&from.root);
        for hop in from.intermediate_hops() {
            self.query.order_by_keys(&hop.scope);
        }
        self.query.order_by(self.ctx, &options.orderby)?;
        if options.orderby.is_empty() && options.has_paging() && self.ctx.config.stable_paging {
            self.query.order_by_keys(result);
        }
        // paging applies per owner, after grouping
        self.window = paging_window(&self.ctx.config, options.top, options.skip)?;
        self.query.finish();
        Ok(())
    }

    async fn execute(&mut self) -> Result<ExpandQueryEntityResult> {
        let from = self.query.from()?.clone();
        let scope = ResultScope::new(from.result_scope().ty.clone(), from.result_key_builder().clone());
        let result = ExpandQueryEntityResult::new(self.navigation.clone(), from.last_affecting().clone(), scope);
        if self.parent_rows.is_empty() {
            return Ok(result);
        }
        let rows = self
            .ctx
            .executor
            .execute(self.query.statement(), self.query.columns())
            .await?;
        let mut result = result.with_rows(rows);
        let (top, skip) = self.window;
        if top.is_some() || skip.is_some() {
            for group in result.groups_mut() {
                let skip = skip.map_or(0, |s| usize::try_from(s).unwrap_or(usize::MAX));
                group.drain(..skip.min(group.len()));
                if let Some(top) = top {
                    group.truncate(usize::try_from(top).unwrap_or(usize::MAX));
                }
            }
        }
        tracing::debug!(
            navigation = %from.result_key_builder().label(),
            groups = result.group_count(),
            rows = result.row_count(),
            "expand query executed"
        );
        Ok(result)
    }
}

/// `key IN (...)` over the distinct non-null keys the parent rows carry under their plain
/// aliases; composite keys become an OR of ANDs. No usable key matches nothing.
pub(super) fn parent_key_restriction(scope: &TableScope, keys: &[Selector], rows: &[Tuple]) -> Condition {
    let mut seen = HashSet::new();
    let mut tuples: Vec<Vec<KeyPart>> = Vec::new();
    for row in rows {
        let parts: Vec<KeyPart> = keys
            .iter()
            .map(|k| row.get(&k.alias).map(KeyPart::from).unwrap_or(KeyPart::Null))
            .collect();
        if parts.iter().any(|p| *p == KeyPart::Null) {
            continue;
        }
        if seen.insert(parts.clone()) {
            tuples.push(parts);
        }
    }
    if tuples.is_empty() || keys.is_empty() {
        return Condition::all().add(Expr::cust("1=0"));
    }

    if let [key] = keys {
        let values: Vec<SimpleExpr> = tuples
            .iter()
            .filter_map(|t| t[0].to_db_value())
            .map(SimpleExpr::from)
            .collect();
        return Condition::all().add(Expr::expr(scope.column(key)).is_in(values));
    }
    tuples.iter().fold(Condition::any(), |any, parts| {
        let all = keys
            .iter()
            .zip(parts)
            .filter_map(|(k, p)| Some(Expr::expr(scope.column(k)).eq(p.to_db_value()?)))
            .fold(Condition::all(), Condition::add);
        any.add(all)
    })
}

/// Run every `$expand` of `options` and every selected element collection for `rows`,
/// attaching the results to `scope`. Nested expands recurse with the child rows.
///
/// Queries run one after another.
pub fn load_children<'a>(
    ctx: &'a QueryContext,
    target: &'a QueryTarget,
    options: &'a QueryOptions,
    scope: &'a mut ResultScope,
    rows: &'a [Tuple],
) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
    Box::pin(async move {
        if rows.is_empty() || target.collection_hop().is_some() {
            return Ok(());
        }
        let result_type = target.result_type().clone();
        let expands = determine_expands(&ctx.schema, &result_type, target.property.as_deref(), &options.expand)?;
        for (navigation, item) in expands {
            let mut query = ExpandQuery::new(ctx, target, navigation, &item, rows);
            let mut child = query.run().await?;
            let child_rows: Vec<Tuple> = child.rows().cloned().collect();
            load_children(ctx, query.target(), &item.options, &mut child.scope, &child_rows).await?;
            scope.expands.put(child)?;
        }

        let selection = resolve_selection(&result_type, &options.select, target.property.as_deref())?;
        for attribute in selection.collections {
            let collection = ElementCollectionQuery::new(ctx, target, attribute, rows).run().await?;
            scope.collections.push(collection);
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbValue;
    use crate::navigation::determine_navigations;
    use crate::query::tests::{fixture_schema, person_row, scripted, text};
    use odata_core::ResourcePath;
    use sea_orm::sea_query::{Alias, Query, SqliteQueryBuilder};

    fn role(owner: &str, id: i32) -> Tuple {
        Tuple::default()
            .with("k1.ID", text(owner))
            .with("RoleID", DbValue::Int(Some(id)))
            .with("RoleCategory", text("A"))
            .with("PersonID", text(owner))
    }

    #[tokio::test]
    async fn groups_child_rows_by_parent_key() {
        let (ctx, executor) = scripted(fixture_schema());
        let target = determine_navigations(&ctx.schema, &ResourcePath::entity_set("Persons")).unwrap();
        let person = target.start.clone();
        let nav = person.association_path("Roles", &ctx.schema).unwrap();
        let parents = vec![person_row("1", "Ada"), person_row("2", "Bob"), person_row("3", "Cy")];
        executor.push(vec![role("1", 10), role("1", 11), role("2", 20)]);

        let item = ExpandItem::new("Roles");
        let child = ExpandQuery::new(&ctx, &target, nav, &item, &parents).run().await.unwrap();
        let counts: Vec<usize> = parents.iter().map(|p| child.rows_for(p).len()).collect();
        assert_eq!(counts, vec![2, 1, 0]);

        let sql = &executor.statements()[0];
        assert!(sql.contains(r#""E0"."id" IN ('1', '2', '3')"#), "{sql}");
        assert!(sql.contains(r#""E0"."id" AS "k1.ID""#), "{sql}");
        assert!(!sql.contains("LIMIT"), "{sql}");
    }

    #[tokio::test]
    async fn top_and_skip_apply_per_parent() {
        let (ctx, executor) = scripted(fixture_schema());
        let target = determine_navigations(&ctx.schema, &ResourcePath::entity_set("Persons")).unwrap();
        let nav = target.start.association_path("Roles", &ctx.schema).unwrap();
        let parents = vec![person_row("1", "Ada"), person_row("2", "Bob")];
        executor.push(vec![role("1", 10), role("1", 11), role("1", 12), role("2", 20)]);

        let item = ExpandItem::new("Roles").with_options(QueryOptions {
            top: Some(1),
            skip: Some(1),
            ..Default::default()
        });
        let child = ExpandQuery::new(&ctx, &target, nav, &item, &parents).run().await.unwrap();
        let first = child.rows_for(&parents[0]);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].get("RoleID"), Some(&DbValue::Int(Some(11))));
        assert!(child.rows_for(&parents[1]).is_empty());
    }

    #[tokio::test]
    async fn no_parent_rows_runs_no_query() {
        let (ctx, executor) = scripted(fixture_schema());
        let target = determine_navigations(&ctx.schema, &ResourcePath::entity_set("Persons")).unwrap();
        let nav = target.start.association_path("Roles", &ctx.schema).unwrap();
        let item = ExpandItem::new("Roles");
        let child = ExpandQuery::new(&ctx, &target, nav, &item, &[]).run().await.unwrap();
        assert_eq!(child.group_count(), 0);
        assert!(executor.statements().is_empty());
    }

    #[tokio::test]
    async fn load_children_attaches_expands_and_collections() {
        let (ctx, executor) = scripted(fixture_schema());
        let target = determine_navigations(&ctx.schema, &ResourcePath::entity_set("Persons")).unwrap();
        let options = QueryOptions {
            select: vec!["Name".into(), "Tags".into()],
            expand: vec![ExpandItem::new("Roles")],
            ..Default::default()
        };
        let parents = vec![person_row("1", "Ada")];
        executor.push(vec![role("1", 10)]);
        executor.push(vec![Tuple::default().with("k1.ID", text("1")).with("Tags", text("x"))]);

        let person = target.start.clone();
        let mut scope = ResultScope::new(person.clone(), crate::keys::NavigationKeyBuilder::root(person));
        load_children(&ctx, &target, &options, &mut scope, &parents).await.unwrap();
        assert_eq!(scope.expands.len(), 1);
        assert_eq!(scope.collections.len(), 1);
        assert_eq!(scope.collections[0].rows_for(&parents[0]).len(), 1);
        let statements = executor.statements();
        assert_eq!(statements.len(), 2);
        assert!(statements[1].contains(r#"INNER JOIN "person_tag""#), "{}", statements[1]);
    }

    #[test]
    fn restriction_without_keys_matches_nothing() {
        let (ctx, _) = scripted(fixture_schema());
        let person = ctx.schema.entity_type("Person").unwrap().clone();
        let keys = person.key_paths();
        let scope = TableScope::new(person, "E0");
        let rows = vec![Tuple::default().with("ID", DbValue::String(None))];
        let sql = Query::select()
            .expr(Expr::val(1))
            .from_as(Alias::new("person"), Alias::new("E0"))
            .cond_where(parent_key_restriction(&scope, &keys, &rows))
            .to_string(SqliteQueryBuilder);
        assert!(sql.contains("1=0"), "{sql}");
    }
}
