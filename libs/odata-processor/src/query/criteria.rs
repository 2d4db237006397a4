//! FROM/WHERE/SELECT/ORDER BY plumbing shared by every query kind.

use super::context::QueryContext;
use super::filter::FilterCompiler;
use crate::config::ProcessorConfig;
use crate::db::{SearchColumn, TableScope};
use crate::error::{MessageKey, ProcessorError, Result};
use crate::keys::NavigationKeyBuilder;
use crate::navigation::{NavigationHop, QueryTarget};
use crate::result::ColumnSpec;
use crate::schema::{AssociationPath, JoinSpec, Selector, StorageType, StructuredType};
use odata_core::ast::COUNT_SEGMENT;
use odata_core::{KeyPredicate, ODataQuery, OrderByItem, SortDir};
use sea_orm::sea_query::{Alias, Condition, Expr, Func, JoinType, Order, Query, SelectStatement, SimpleExpr};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitializationState {
    #[default]
    NotInitialized,
    Initialized,
}

/// An association hop joined into the statement.
#[derive(Debug, Clone)]
pub struct HopScope {
    pub scope: TableScope,
    pub key_builder: Arc<NavigationKeyBuilder>,
    pub path: AssociationPath,
}

/// Table aliases of the start entity, every association hop and an optional element
/// collection joined at the end.
#[derive(Debug, Clone)]
pub struct FromClause {
    pub root: TableScope,
    pub root_keys: Arc<NavigationKeyBuilder>,
    pub hops: Vec<HopScope>,
    pub collection: Option<(TableScope, Selector)>,
}

impl FromClause {
    /// Scope of the entity type the rows represent.
    pub fn result_scope(&self) -> &TableScope {
        self.hops.last().map(|h| &h.scope).unwrap_or(&self.root)
    }

    pub fn result_key_builder(&self) -> &Arc<NavigationKeyBuilder> {
        self.hops
            .last()
            .map(|h| &h.key_builder)
            .unwrap_or(&self.root_keys)
    }

    /// Builder of the entity owning the result rows: the previous hop, or the start entity.
    pub fn last_affecting(&self) -> &Arc<NavigationKeyBuilder> {
        match self.hops.len() {
            0 | 1 => &self.root_keys,
            n => &self.hops[n - 2].key_builder,
        }
    }

    pub fn last_affecting_scope(&self) -> &TableScope {
        match self.hops.len() {
            0 | 1 => &self.root,
            n => &self.hops[n - 2].scope,
        }
    }

    /// Every hop but the last.
    pub fn intermediate_hops(&self) -> &[HopScope] {
        &self.hops[..self.hops.len().saturating_sub(1)]
    }
}

/// A SELECT under construction plus the decoding plan of its columns.
#[derive(Debug, Default)]
pub struct CriteriaQuery {
    stmt: SelectStatement,
    state: InitializationState,
    from: Option<FromClause>,
    columns: Vec<ColumnSpec>,
    selected: Vec<SimpleExpr>,
    ordered: Vec<SimpleExpr>,
    group_by: bool,
}

impl CriteriaQuery {
    pub fn new() -> Self {
        Self {
            stmt: Query::select(),
            ..Default::default()
        }
    }

    pub fn state(&self) -> InitializationState {
        self.state
    }

    /// Root table plus one JOIN per hop.
    ///
    /// Associations are LEFT JOINed (a link table INNER, then the target LEFT); an element
    /// collection is INNER JOINed.
    pub fn init_from(&mut self, ctx: &QueryContext, target: &QueryTarget) -> Result<&FromClause> {
        if self.state == InitializationState::Initialized {
            return Err(ProcessorError::illegal_state("query builder initialized twice"));
        }
        let root_alias = ctx.next_alias("E");
        self.stmt
            .from_as(Alias::new(target.start.table_name()), Alias::new(&root_alias));
        let root = TableScope::new(target.start.clone(), root_alias);
        let root_keys = NavigationKeyBuilder::root(target.start.clone());

        let mut current = root.clone();
        let mut builder = root_keys.clone();
        let mut hops = Vec::new();
        let mut collection = None;
        for hop in &target.hops {
            match hop {
                NavigationHop::Association { path, .. } => {
                    let alias = ctx.next_alias("E");
                    join_association(ctx, &mut self.stmt, &current, path, &alias, JoinType::LeftJoin);
                    let scope = TableScope::new(path.target_type.clone(), alias);
                    builder = builder.child(path, &path.target_type)?;
                    hops.push(HopScope {
                        scope: scope.clone(),
                        key_builder: builder.clone(),
                        path: path.clone(),
                    });
                    current = scope;
                }
                NavigationHop::ElementCollection { selector } => {
                    let scope = join_collection(ctx, &mut self.stmt, &current, selector)?;
                    collection = Some((scope, selector.clone()));
                }
            }
        }
        tracing::debug!(
            entity_set = %target.entity_set,
            hops = hops.len(),
            label = %builder.label(),
            "query FROM initialized"
        );
        self.state = InitializationState::Initialized;
        Ok(self.from.insert(FromClause {
            root,
            root_keys,
            hops,
            collection,
        }))
    }

    pub fn from(&self) -> Result<&FromClause> {
        self.from
            .as_ref()
            .ok_or_else(|| ProcessorError::illegal_state("query builder used before initialization"))
    }

    /// Add a column; an alias already selected is skipped.
    pub fn select(&mut self, expr: SimpleExpr, alias: impl Into<String>, storage: StorageType) {
        let alias = alias.into();
        if self.columns.iter().any(|c| c.alias == alias) {
            return;
        }
        self.stmt.expr_as(expr.clone(), Alias::new(&alias));
        self.selected.push(expr);
        self.columns.push(ColumnSpec::new(alias, storage));
    }

    /// Select the leaf column of `sel` under `alias`.
    pub fn select_path(&mut self, scope: &TableScope, sel: &Selector, alias: impl Into<String>) -> Result<()> {
        let storage = leaf_storage(sel)?;
        self.select(scope.column(sel), alias, storage);
        Ok(())
    }

    /// Key columns of `builder` read from `scope` under the builder's prefixed aliases.
    pub fn select_prefixed_keys(&mut self, scope: &TableScope, builder: &NavigationKeyBuilder) -> Result<()> {
        for key in builder.key_paths() {
            self.select_path(scope, key, builder.prefixed_alias(key))?;
        }
        Ok(())
    }

    pub fn and_where(&mut self, condition: Condition) {
        self.stmt.cond_where(condition);
    }

    pub fn order_by_expr(&mut self, expr: SimpleExpr, order: Order) {
        self.stmt.order_by_expr(expr.clone(), order);
        self.ordered.push(expr);
    }

    /// `$orderby` against the result scope.
    ///
    /// `Nav/$count` LEFT JOINs the navigation and orders by the number of related rows,
    /// which switches the statement to GROUP BY over all selected and ordered columns.
    pub fn order_by(&mut self, ctx: &QueryContext, items: &[OrderByItem]) -> Result<()> {
        let scope = self.from()?.result_scope().clone();
        for item in items {
            let order = match item.dir {
                SortDir::Asc => Order::Asc,
                SortDir::Desc => Order::Desc,
            };
            let Some(path) = item.expr.member_path() else {
                tracing::warn!(expr = ?item.expr, "$orderby expression is not a member path, skipped");
                continue;
            };
            if let Some(nav) = path.strip_suffix(COUNT_SEGMENT).and_then(|p| p.strip_suffix('/')) {
                let nav = scope
                    .ty
                    .association_path(nav, &ctx.schema)
                    .ok_or_else(|| unknown_property(nav, &scope.ty))?;
                let counted = self.join_for_count(ctx, &scope, &nav)?;
                self.stmt.order_by_expr(counted, order);
                self.group_by = true;
                continue;
            }
            let paths = scope.ty.paths_under(path);
            if paths.is_empty() {
                return Err(unknown_property(path, &scope.ty));
            }
            for sel in &paths {
                self.order_by_expr(scope.column(sel), order.clone());
            }
        }
        Ok(())
    }

    /// Ascending order over the key columns of `scope`.
    pub fn order_by_keys(&mut self, scope: &TableScope) {
        for key in scope.ty.key_paths() {
            self.order_by_expr(scope.column(&key), Order::Asc);
        }
    }

    /// OFFSET then LIMIT; `$top` is capped at the configured maximum.
    pub fn apply_top_skip(&mut self, config: &ProcessorConfig, top: Option<i64>, skip: Option<i64>) -> Result<()> {
        let (top, skip) = paging_window(config, top, skip)?;
        if let Some(skip) = skip {
            self.stmt.offset(skip);
        }
        if let Some(top) = top {
            self.stmt.limit(top);
        }
        Ok(())
    }

    /// Group over every selected and ordered column when an ORDER BY needs an aggregate.
    pub fn finish(&mut self) {
        if !self.group_by {
            return;
        }
        let mut groups: Vec<SimpleExpr> = Vec::new();
        for expr in self.selected.iter().chain(self.ordered.iter()) {
            if !groups.contains(expr) {
                groups.push(expr.clone());
            }
        }
        self.stmt.add_group_by(groups);
    }

    pub fn is_grouped(&self) -> bool {
        self.group_by
    }

    pub fn statement(&self) -> &SelectStatement {
        &self.stmt
    }

    pub fn statement_mut(&mut self) -> &mut SelectStatement {
        &mut self.stmt
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    fn join_for_count(
        &mut self,
        ctx: &QueryContext,
        scope: &TableScope,
        nav: &AssociationPath,
    ) -> Result<SimpleExpr> {
        let alias = ctx.next_alias("O");
        let (table, columns) = match &nav.association.join {
            JoinSpec::Columns(columns) => (nav.target_type.table_name().to_string(), columns),
            JoinSpec::Table { table, source, .. } => (table.clone(), source),
        };
        let first = columns.first().ok_or_else(|| {
            ProcessorError::illegal_state(format!("association '{}' has no join columns", nav.alias))
        })?;
        let on = columns.iter().fold(Condition::all(), |c, jc| {
            c.add(column(&alias, &jc.target).equals((Alias::new(&scope.alias), Alias::new(&jc.source))))
        });
        self.stmt
            .join_as(JoinType::LeftJoin, Alias::new(table), Alias::new(&alias), on);
        Ok(Func::count(column(&alias, &first.target)).into())
    }
}

fn column(alias: &str, column: &str) -> Expr {
    Expr::col((Alias::new(alias), Alias::new(column)))
}

fn join_association(
    ctx: &QueryContext,
    stmt: &mut SelectStatement,
    owner: &TableScope,
    nav: &AssociationPath,
    alias: &str,
    join: JoinType,
) {
    let target_table = Alias::new(nav.target_type.table_name());
    match &nav.association.join {
        JoinSpec::Columns(columns) => {
            let on = columns.iter().fold(Condition::all(), |c, jc| {
                c.add(column(alias, &jc.target).equals((Alias::new(&owner.alias), Alias::new(&jc.source))))
            });
            stmt.join_as(join, target_table, Alias::new(alias), on);
        }
        JoinSpec::Table { table, source, target } => {
            let link = ctx.next_alias("L");
            let on = source.iter().fold(Condition::all(), |c, jc| {
                c.add(column(&link, &jc.target).equals((Alias::new(&owner.alias), Alias::new(&jc.source))))
            });
            stmt.join_as(JoinType::InnerJoin, Alias::new(table), Alias::new(&link), on);
            let on = target.iter().fold(Condition::all(), |c, jc| {
                c.add(column(alias, &jc.target).equals((Alias::new(&link), Alias::new(&jc.source))))
            });
            stmt.join_as(join, target_table, Alias::new(alias), on);
        }
    }
}

/// INNER JOIN of the collection table of `selector`; the scope keeps the owner type so
/// leaf columns resolve through the owner's attributes.
pub(crate) fn join_collection(
    ctx: &QueryContext,
    stmt: &mut SelectStatement,
    owner: &TableScope,
    selector: &Selector,
) -> Result<TableScope> {
    let leaf = selector.leaf();
    let table = leaf.collection_table.as_ref().ok_or_else(|| {
        ProcessorError::illegal_state(format!("collection '{}' has no collection table", selector.alias))
    })?;
    let alias = ctx.next_alias("C");
    let on = table.join_columns.iter().fold(Condition::all(), |c, jc| {
        c.add(column(&alias, &jc.target).equals((Alias::new(&owner.alias), Alias::new(&jc.source))))
    });
    stmt.join_as(JoinType::InnerJoin, Alias::new(&table.table), Alias::new(&alias), on);
    Ok(TableScope::new(owner.ty.clone(), alias))
}

pub(crate) fn leaf_storage(sel: &Selector) -> Result<StorageType> {
    sel.leaf().storage_type().ok_or_else(|| {
        ProcessorError::new(
            MessageKey::NotSupportedAttributeType,
            [sel.alias.as_str(), "complex attribute selected as a column"],
        )
    })
}

fn unknown_property(name: &str, ty: &StructuredType) -> ProcessorError {
    ProcessorError::new(MessageKey::QueryPreparationUnknownProperty, [name, ty.name.as_str()])
}

/// Validated paging window; negative values are client errors naming the option.
pub(crate) fn paging_window(
    config: &ProcessorConfig,
    top: Option<i64>,
    skip: Option<i64>,
) -> Result<(Option<u64>, Option<u64>)> {
    let skip = skip
        .map(|s| u64::try_from(s).map_err(|_| ProcessorError::invalid_value("$skip", s)))
        .transpose()?;
    let top = top
        .map(|t| u64::try_from(t).map_err(|_| ProcessorError::invalid_value("$top", t)))
        .transpose()?;
    let top = match (top, config.max_top) {
        (Some(t), Some(max)) if t > max => {
            tracing::debug!(requested = t, max, "$top capped");
            Some(max)
        }
        (t, _) => t,
    };
    Ok((top, skip))
}

/// The WHERE shared by a query and every query derived from it, AND-combined in order:
/// key predicates, access condition, filters, hop existence, search.
pub fn where_condition(
    ctx: &QueryContext,
    target: &QueryTarget,
    from: &FromClause,
    search: Option<&str>,
) -> Result<Option<Condition>> {
    let mut parts: Vec<Condition> = Vec::new();

    if let Some(keys) = &target.start_keys {
        parts.push(key_condition(ctx, &from.root, keys)?);
    }
    let hop_keys = target.hops.iter().filter_map(|h| match h {
        NavigationHop::Association { keys, .. } => Some(keys),
        NavigationHop::ElementCollection { .. } => None,
    });
    for (hop, keys) in from.hops.iter().zip(hop_keys) {
        if let Some(keys) = keys {
            parts.push(key_condition(ctx, &hop.scope, keys)?);
        }
    }

    let result = from.result_scope();
    if let Some(conditioner) = ctx.schema.conditioner(&result.ty.name) {
        if let Some(condition) = conditioner.condition(result)? {
            parts.push(condition);
        }
    }

    if let Some(condition) = compile_filter(ctx, &target.start_filter, &from.root)? {
        parts.push(condition);
    }
    let hop_filters = target.hops.iter().filter_map(|h| match h {
        NavigationHop::Association { filter, .. } => Some(filter),
        NavigationHop::ElementCollection { .. } => None,
    });
    for (hop, filter) in from.hops.iter().zip(hop_filters) {
        if let Some(condition) = compile_filter(ctx, filter, &hop.scope)? {
            parts.push(condition);
        }
    }

    for hop in &from.hops {
        let keys = hop.scope.ty.key_paths();
        if !keys.is_empty() {
            let present = keys.iter().fold(Condition::all(), |c, key| {
                c.add(Expr::expr(hop.scope.column(key)).is_not_null())
            });
            parts.push(present);
        }
    }

    if let Some(term) = search {
        parts.push(Condition::all().add(search_condition(ctx, result, term)?));
    }

    if parts.is_empty() {
        return Ok(None);
    }
    Ok(Some(parts.into_iter().fold(Condition::all(), Condition::add)))
}

/// Equality on the key columns of `scope`; literals go through the attribute converters.
fn key_condition(ctx: &QueryContext, scope: &TableScope, keys: &KeyPredicate) -> Result<Condition> {
    let key_paths = scope.ty.key_paths();
    let values: Vec<_> = keys.values().collect();
    if values.len() != key_paths.len() {
        return Err(ProcessorError::invalid_value("key predicate", keys));
    }
    let mut condition = Condition::all();
    for kv in values {
        let sel = match &kv.name {
            Some(name) => key_paths
                .iter()
                .find(|k| &k.alias == name)
                .ok_or_else(|| unknown_property(name, &scope.ty))?,
            None if key_paths.len() == 1 => &key_paths[0],
            None => return Err(ProcessorError::invalid_value("key predicate", keys)),
        };
        let value = ctx.values.to_storage(sel.leaf(), &kv.value)?;
        condition = condition.add(Expr::expr(scope.column(sel)).eq(value));
    }
    Ok(condition)
}

fn compile_filter(ctx: &QueryContext, filter: &ODataQuery, scope: &TableScope) -> Result<Option<Condition>> {
    let Some(ast) = filter.as_ast() else {
        return Ok(None);
    };
    FilterCompiler::new(ctx)
        .compile(ast, scope)
        .map(Some)
        .map_err(|e| {
            if e.is_client_error() && e.key() != MessageKey::QueryPreparationFilterError {
                ProcessorError::new(MessageKey::QueryPreparationFilterError, [e.message()]).with_source(e)
            } else {
                e
            }
        })
}

/// `EXISTS (SELECT 1 FROM <table> S WHERE S.keys = result.keys AND (<column> LIKE ... OR ...))`
fn search_condition(ctx: &QueryContext, result: &TableScope, term: &str) -> Result<SimpleExpr> {
    let term = term.trim();
    if term.chars().count() < ctx.config.search_min_length {
        return Err(ProcessorError::invalid_value("$search", term));
    }
    let ty = &result.ty;
    let mut paths = ty.searchable_paths();
    if paths.is_empty() {
        tracing::warn!(entity_type = %ty.name, "no searchable attributes, $search uses all attributes");
        paths = ty.all_paths();
    }
    let alias = ctx.next_alias("S");
    let inner = TableScope::new(ty.clone(), alias.clone());
    let columns: Vec<SearchColumn> = paths
        .iter()
        .filter_map(|p| {
            Some(SearchColumn {
                expr: inner.column(p),
                storage: p.leaf().storage_type()?,
                path: p.alias.clone(),
            })
        })
        .collect();

    let mut sub = Query::select();
    sub.expr(Expr::val(1))
        .from_as(Alias::new(ty.table_name()), Alias::new(&alias));
    for key in ty.key_paths() {
        sub.and_where(Expr::expr(inner.column(&key)).eq(result.column(&key)));
    }
    match ctx.schema.processor().create_search_where_clause(term, &columns) {
        Some(condition) => {
            sub.cond_where(condition);
        }
        None => {
            tracing::warn!(entity_type = %ty.name, "no attribute can match $search, nothing is found");
            sub.and_where(Expr::cust("1=0"));
        }
    }
    Ok(Expr::exists(sub))
}

/// Columns and element collections a query reads for one entity type.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub paths: Vec<Selector>,
    pub collections: Vec<Selector>,
}

impl Selection {
    fn push_path(&mut self, sel: Selector) {
        if !self.paths.contains(&sel) {
            self.paths.push(sel);
        }
    }

    fn push_collection(&mut self, sel: Selector) {
        if !self.collections.contains(&sel) {
            self.collections.push(sel);
        }
    }

    /// Element collections at or below `prefix`.
    fn push_collections_under(&mut self, ty: &StructuredType, prefix: &str) {
        let nested = format!("{prefix}/");
        for c in ty.collection_paths() {
            if c.alias == prefix || c.alias.starts_with(&nested) {
                self.push_collection(c);
            }
        }
    }
}

/// Resolve `$select` (or the addressed property path) to leaf paths, keys first.
///
/// Absent `$select` or `*` selects every non-ignored attribute and every element
/// collection. Association names are accepted and ignored.
pub fn resolve_selection(ty: &StructuredType, select: &[String], property: Option<&str>) -> Result<Selection> {
    let mut selection = Selection::default();
    for key in ty.key_paths() {
        selection.push_path(key);
    }
    if let Some(property) = property {
        let sel = ty
            .path(property)
            .ok_or_else(|| unknown_property(property, ty))?;
        if sel.leaf().collection {
            selection.push_collection(sel);
        } else {
            ty.paths_under(property)
                .into_iter()
                .for_each(|p| selection.push_path(p));
            selection.push_collections_under(ty, property);
        }
        return Ok(selection);
    }
    if select.is_empty() || select.iter().any(|s| s == "*") {
        ty.all_paths().into_iter().for_each(|p| selection.push_path(p));
        ty.collection_paths()
            .into_iter()
            .for_each(|c| selection.push_collection(c));
        return Ok(selection);
    }
    for item in select {
        if ty.find_association_path(item).is_some() {
            continue;
        }
        let Some(sel) = ty.path(item) else {
            return Err(ProcessorError::new(
                MessageKey::QueryPreparationInvalidSelect,
                [item.as_str(), ty.name.as_str()],
            ));
        };
        if sel.leaf().collection {
            selection.push_collection(sel);
            continue;
        }
        ty.paths_under(item)
            .into_iter()
            .for_each(|p| selection.push_path(p));
        selection.push_collections_under(ty, item);
    }
    Ok(selection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::tests::{context, fixture_schema};
    use odata_core::ast::{CompareOperator, Expr as Ast};
    use odata_core::ResourcePath;
    use sea_orm::sea_query::SqliteQueryBuilder;

    fn target(ctx: &QueryContext, path: &ResourcePath) -> QueryTarget {
        crate::navigation::determine_navigations(&ctx.schema, path).unwrap()
    }

    #[test]
    fn from_joins_hops_and_tracks_key_builders() {
        let ctx = context(fixture_schema());
        let path = ResourcePath::entity_set("Persons")
            .with_key(KeyPredicate::single("1"))
            .navigate("Roles");
        let target = target(&ctx, &path);
        let mut q = CriteriaQuery::new();
        let from = q.init_from(&ctx, &target).unwrap().clone();
        assert_eq!(from.root.alias, "E0");
        assert_eq!(from.result_scope().alias, "E1");
        assert_eq!(from.result_key_builder().alias_prefix(), "Roles2");
        assert_eq!(from.last_affecting().alias_prefix(), "k1");
        q.select(Expr::val(1).into(), "one", StorageType::Int);
        let sql = q.statement().to_string(SqliteQueryBuilder);
        assert!(sql.contains(r#"LEFT JOIN "role" AS "E1" ON "E1"."person_id" = "E0"."id""#), "{sql}");
    }

    #[test]
    fn link_table_is_joined_inner_then_target_left() {
        let ctx = context(fixture_schema());
        let target = target(&ctx, &ResourcePath::entity_set("Persons").navigate("Teams"));
        let mut q = CriteriaQuery::new();
        q.init_from(&ctx, &target).unwrap();
        q.select(Expr::val(1).into(), "one", StorageType::Int);
        let sql = q.statement().to_string(SqliteQueryBuilder);
        assert!(sql.contains(r#"INNER JOIN "person_team" AS "L2""#), "{sql}");
        assert!(sql.contains(r#"LEFT JOIN "team" AS "E1" ON "E1"."id" = "L2"."team_id""#), "{sql}");
    }

    #[test]
    fn second_initialization_and_early_use_are_illegal() {
        let ctx = context(fixture_schema());
        let target = target(&ctx, &ResourcePath::entity_set("Persons"));
        let mut q = CriteriaQuery::new();
        let err = q.from().unwrap_err();
        assert_eq!(err.key(), MessageKey::IllegalState);
        q.init_from(&ctx, &target).unwrap();
        assert_eq!(q.state(), InitializationState::Initialized);
        let err = q.init_from(&ctx, &target).unwrap_err();
        assert_eq!(err.status(), http::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn where_combines_keys_filters_and_existence() {
        let ctx = context(fixture_schema());
        let mut target = target(
            &ctx,
            &ResourcePath::entity_set("Persons")
                .with_key(KeyPredicate::single("1"))
                .navigate("Roles"),
        );
        target.set_result_filter(ODataQuery::some(Ast::compare(
            Ast::identifier("RoleCategory"),
            CompareOperator::Eq,
            Ast::value("A"),
        )));
        let mut q = CriteriaQuery::new();
        let from = q.init_from(&ctx, &target).unwrap().clone();
        let cond = where_condition(&ctx, &target, &from, None).unwrap().unwrap();
        q.and_where(cond);
        q.select(Expr::val(1).into(), "one", StorageType::Int);
        let sql = q.statement().to_string(SqliteQueryBuilder);
        let key = sql.find(r#""E0"."id" = '1'"#).unwrap();
        let filter = sql.find(r#""E1"."category" = 'A'"#).unwrap();
        let exists = sql.find(r#""E1"."role_id" IS NOT NULL"#).unwrap();
        assert!(key < filter && filter < exists, "{sql}");
    }

    #[test]
    fn existence_covers_every_key_column_of_a_hop() {
        use crate::schema::{Association, Attribute, EdmPrimitive, Schema, StructuredType};
        let text = |name: &str, column: &str| {
            Attribute::primitive(name, EdmPrimitive::String, StorageType::String).column(column)
        };
        let order = StructuredType::entity("Order", "orders")
            .attribute(text("No", "no").key())
            .association(Association::to_many("Lines", "Line").join("no", "order_no"));
        let line = StructuredType::entity("Line", "order_line")
            .attribute(text("OrderNo", "order_no").key())
            .attribute(text("LineNo", "line_no").key());
        let schema = Schema::builder()
            .entity_set("Orders", order)
            .entity_set("Lines", line)
            .build()
            .unwrap();
        let ctx = context(schema);
        let target = target(&ctx, &ResourcePath::entity_set("Orders").navigate("Lines"));
        let mut q = CriteriaQuery::new();
        let from = q.init_from(&ctx, &target).unwrap().clone();
        let cond = where_condition(&ctx, &target, &from, None).unwrap().unwrap();
        q.and_where(cond);
        q.select(Expr::val(1).into(), "one", StorageType::Int);
        let sql = q.statement().to_string(SqliteQueryBuilder);
        assert!(sql.contains(r#""E1"."order_no" IS NOT NULL"#), "{sql}");
        assert!(sql.contains(r#""E1"."line_no" IS NOT NULL"#), "{sql}");
    }

    #[test]
    fn filter_failures_become_filter_errors() {
        let ctx = context(fixture_schema());
        let mut target = target(&ctx, &ResourcePath::entity_set("Persons"));
        target.set_result_filter(ODataQuery::some(Ast::compare(
            Ast::identifier("Nope"),
            CompareOperator::Eq,
            Ast::value(1),
        )));
        let mut q = CriteriaQuery::new();
        let from = q.init_from(&ctx, &target).unwrap().clone();
        let err = where_condition(&ctx, &target, &from, None).unwrap_err();
        assert_eq!(err.key(), MessageKey::QueryPreparationFilterError);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn search_builds_exists_and_checks_length() {
        let ctx = context(fixture_schema());
        let target = target(&ctx, &ResourcePath::entity_set("Persons"));
        let mut q = CriteriaQuery::new();
        let from = q.init_from(&ctx, &target).unwrap().clone();
        let cond = where_condition(&ctx, &target, &from, Some("Ada")).unwrap().unwrap();
        q.and_where(cond);
        q.select(Expr::val(1).into(), "one", StorageType::Int);
        let sql = q.statement().to_string(SqliteQueryBuilder);
        assert!(sql.contains("EXISTS"), "{sql}");
        assert!(sql.contains(r#""S1"."name" LIKE '%Ada%'"#), "{sql}");

        let err = where_condition(&ctx, &target, &from, Some("  ")).unwrap_err();
        assert_eq!(err.key(), MessageKey::QueryPreparationInvalidValue);
    }

    #[test]
    fn negative_paging_names_option_and_value() {
        let config = ProcessorConfig::default();
        let err = paging_window(&config, Some(-1), None).unwrap_err();
        assert_eq!(err.params(), ["$top".to_string(), "-1".to_string()]);
        let err = paging_window(&config, None, Some(-1)).unwrap_err();
        assert_eq!(err.params(), ["$skip".to_string(), "-1".to_string()]);
        let capped = ProcessorConfig {
            max_top: Some(10),
            ..ProcessorConfig::default()
        };
        assert_eq!(paging_window(&capped, Some(50), Some(5)).unwrap(), (Some(10), Some(5)));
    }

    #[test]
    fn order_by_count_groups_selected_columns() {
        let ctx = context(fixture_schema());
        let target = target(&ctx, &ResourcePath::entity_set("Persons"));
        let mut q = CriteriaQuery::new();
        let from = q.init_from(&ctx, &target).unwrap().clone();
        let id = from.root.ty.path("ID").unwrap();
        q.select_path(&from.root, &id, "ID").unwrap();
        q.order_by(
            &ctx,
            &[OrderByItem::desc("Roles/$count"), OrderByItem::asc("Name")],
        )
        .unwrap();
        q.finish();
        let sql = q.statement().to_string(SqliteQueryBuilder);
        assert!(sql.contains(r#"LEFT JOIN "role" AS "O1""#), "{sql}");
        assert!(sql.contains(r#"ORDER BY COUNT("O1"."person_id") DESC, "E0"."name" ASC"#), "{sql}");
        assert!(sql.contains(r#"GROUP BY "E0"."id", "E0"."name""#), "{sql}");
    }

    #[test]
    fn unsupported_order_by_is_skipped_and_unknown_fails() {
        let ctx = context(fixture_schema());
        let target = target(&ctx, &ResourcePath::entity_set("Persons"));
        let mut q = CriteriaQuery::new();
        q.init_from(&ctx, &target).unwrap();
        let item = OrderByItem {
            expr: Ast::Function("length".into(), vec![Ast::identifier("Name")]),
            dir: SortDir::Asc,
        };
        q.order_by(&ctx, &[item]).unwrap();
        assert!(!q.is_grouped());
        let err = q.order_by(&ctx, &[OrderByItem::asc("Nope")]).unwrap_err();
        assert_eq!(err.key(), MessageKey::QueryPreparationUnknownProperty);
    }

    #[test]
    fn selection_defaults_keys_and_errors() {
        let ctx = context(fixture_schema());
        let person = ctx.schema.entity_type("Person").unwrap();
        let all = resolve_selection(person, &[], None).unwrap();
        assert_eq!(all.paths[0].alias, "ID");
        assert!(all.collections.iter().any(|c| c.alias == "InhouseAddress"));

        let some = resolve_selection(person, &["Name".into(), "Roles".into()], None).unwrap();
        let aliases: Vec<_> = some.paths.iter().map(|p| p.alias.as_str()).collect();
        assert_eq!(aliases, vec!["ID", "Name"]);
        assert!(some.collections.is_empty());

        let address = resolve_selection(person, &[], Some("Address")).unwrap();
        assert!(address.paths.iter().any(|p| p.alias == "Address/Country"));

        let err = resolve_selection(person, &["Nope".into()], None).unwrap_err();
        assert_eq!(err.key(), MessageKey::QueryPreparationInvalidSelect);
    }
}
