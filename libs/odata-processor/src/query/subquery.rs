//! Correlated subqueries across one association.

use super::context::QueryContext;
use crate::db::TableScope;
use crate::error::{ProcessorError, Result};
use crate::schema::{AssociationPath, JoinSpec};
use odata_core::ast::CompareOperator;
use sea_orm::sea_query::{Alias, Condition, Expr, Func, JoinType, Query, SelectStatement, SimpleExpr};

/// A subquery over the target of an association, correlated to the outer table.
pub(crate) struct Correlated {
    pub stmt: SelectStatement,
    pub target: TableScope,
    /// Subquery-side columns matched against the owner, as (alias, column).
    pub owner_columns: Vec<(String, String)>,
}

fn col(alias: &str, column: &str) -> Expr {
    Expr::col((Alias::new(alias), Alias::new(column)))
}

/// `FROM target [JOIN link] WHERE <target side> = <outer side>`, no select list.
pub(crate) fn correlated(ctx: &QueryContext, outer: &TableScope, nav: &AssociationPath) -> Correlated {
    let t = ctx.next_alias("S");
    let target = TableScope::new(nav.target_type.clone(), t.clone());
    let mut stmt = Query::select();
    let mut owner_columns = Vec::new();
    match &nav.association.join {
        JoinSpec::Columns(columns) => {
            stmt.from_as(Alias::new(nav.target_type.table_name()), Alias::new(&t));
            for jc in columns {
                stmt.and_where(
                    col(&t, &jc.target).equals((Alias::new(&outer.alias), Alias::new(&jc.source))),
                );
                owner_columns.push((t.clone(), jc.target.clone()));
            }
        }
        JoinSpec::Table { table, source, target: link_target } => {
            let l = ctx.next_alias("L");
            stmt.from_as(Alias::new(table), Alias::new(&l));
            let on = link_target.iter().fold(Condition::all(), |c, jc| {
                c.add(col(&l, &jc.source).equals((Alias::new(&t), Alias::new(&jc.target))))
            });
            stmt.join_as(
                JoinType::InnerJoin,
                Alias::new(nav.target_type.table_name()),
                Alias::new(&t),
                on,
            );
            for jc in source {
                stmt.and_where(
                    col(&l, &jc.target).equals((Alias::new(&outer.alias), Alias::new(&jc.source))),
                );
                owner_columns.push((l.clone(), jc.target.clone()));
            }
        }
    }
    Correlated {
        stmt,
        target,
        owner_columns,
    }
}

/// `EXISTS (SELECT 1 ... AND <inner>)`
pub(crate) fn exists(mut correlated: Correlated, inner: Option<Condition>) -> SimpleExpr {
    correlated.stmt.expr(Expr::val(1));
    if let Some(inner) = inner {
        correlated.stmt.cond_where(inner);
    }
    Expr::exists(correlated.stmt)
}

/// `EXISTS (SELECT <owner column> ... GROUP BY <owner columns> HAVING COUNT(<target key>) <op> <value>)`
///
/// Only the first owner column is selected; a composite correlation logs a warning.
pub(crate) fn count_exists(
    ctx: &QueryContext,
    outer: &TableScope,
    nav: &AssociationPath,
    op: CompareOperator,
    value: SimpleExpr,
) -> Result<SimpleExpr> {
    let mut c = correlated(ctx, outer, nav);
    let Some((first_alias, first_column)) = c.owner_columns.first().cloned() else {
        return Err(ProcessorError::illegal_state(format!(
            "association '{}' has no join columns",
            nav.alias
        )));
    };
    if c.owner_columns.len() > 1 {
        tracing::warn!(
            navigation = %nav.alias,
            columns = c.owner_columns.len(),
            "count subquery correlates on several columns, only the first is selected"
        );
    }
    let key = nav
        .target_type
        .key_paths()
        .first()
        .map(|k| k.leaf().column_name().to_string())
        .ok_or_else(|| {
            ProcessorError::illegal_state(format!("entity type '{}' has no key", nav.target_type.name))
        })?;

    c.stmt.column((Alias::new(&first_alias), Alias::new(&first_column)));
    for (alias, column) in &c.owner_columns {
        c.stmt.group_by_col((Alias::new(alias), Alias::new(column)));
    }
    let counted = Expr::expr(Func::count(col(&c.target.alias, &key)));
    c.stmt.and_having(compare(counted, op, value));
    Ok(Expr::exists(c.stmt))
}

pub(crate) fn compare(lhs: impl Into<SimpleExpr>, op: CompareOperator, rhs: impl Into<SimpleExpr>) -> SimpleExpr {
    let lhs = Expr::expr(lhs.into());
    match op {
        CompareOperator::Eq => lhs.eq(rhs),
        CompareOperator::Ne => lhs.ne(rhs),
        CompareOperator::Gt => lhs.gt(rhs),
        CompareOperator::Ge => lhs.gte(rhs),
        CompareOperator::Lt => lhs.lt(rhs),
        CompareOperator::Le => lhs.lte(rhs),
    }
}

/// Operator with its operands swapped: `5 lt Age` is `Age gt 5`.
pub(crate) fn swap(op: CompareOperator) -> CompareOperator {
    match op {
        CompareOperator::Gt => CompareOperator::Lt,
        CompareOperator::Ge => CompareOperator::Le,
        CompareOperator::Lt => CompareOperator::Gt,
        CompareOperator::Le => CompareOperator::Ge,
        other => other,
    }
}
