use super::context::QueryContext;
use super::criteria::{where_condition, CriteriaQuery};
use super::QueryBuilder;
use crate::db::DbValue;
use crate::error::{ProcessorError, Result};
use crate::navigation::QueryTarget;
use crate::schema::StorageType;
use async_trait::async_trait;
use sea_orm::sea_query::{Expr, Func};

const COUNT_ALIAS: &str = "count";

/// `SELECT COUNT(...)` over the addressed resource, ignoring paging and ordering.
pub struct CountQuery<'a> {
    ctx: &'a QueryContext,
    target: &'a QueryTarget,
    search: Option<&'a str>,
    query: CriteriaQuery,
}

impl<'a> CountQuery<'a> {
    pub fn new(ctx: &'a QueryContext, target: &'a QueryTarget, search: Option<&'a str>) -> Self {
        Self {
            ctx,
            target,
            search,
            query: CriteriaQuery::new(),
        }
    }
}

#[async_trait]
impl QueryBuilder for CountQuery<'_> {
    type Output = i64;

    fn build_from(&mut self) -> Result<()> {
        self.query.init_from(self.ctx, self.target)?;
        Ok(())
    }

    fn build_where(&mut self) -> Result<()> {
        let from = self.query.from()?.clone();
        if let Some(condition) = where_condition(self.ctx, self.target, &from, self.search)? {
            self.query.and_where(condition);
        }
        Ok(())
    }

    fn build_select(&mut self) -> Result<()> {
        let from = self.query.from()?.clone();
        // collection entries have no key of their own
        let counted = if from.collection.is_some() {
            Func::count(Expr::asterisk())
        } else {
            let scope = from.result_scope();
            let key = scope.ty.key_paths().into_iter().next().ok_or_else(|| {
                ProcessorError::illegal_state(format!("entity type '{}' has no key", scope.ty.name))
            })?;
            Func::count(scope.column(&key))
        };
        self.query.select(counted.into(), COUNT_ALIAS, StorageType::BigInt);
        Ok(())
    }

    async fn execute(&mut self) -> Result<i64> {
        let rows = self
            .ctx
            .executor
            .execute(self.query.statement(), self.query.columns())
            .await?;
        let count = match rows.first().and_then(|r| r.get(COUNT_ALIAS)) {
            Some(DbValue::BigInt(Some(n))) => *n,
            Some(DbValue::Int(Some(n))) => i64::from(*n),
            _ => 0,
        };
        tracing::debug!(entity_set = %self.target.entity_set, count, "count query executed");
        Ok(count)
    }
}
