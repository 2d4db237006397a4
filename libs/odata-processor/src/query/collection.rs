use super::context::QueryContext;
use super::criteria::{where_condition, CriteriaQuery};
use super::expand::parent_key_restriction;
use super::QueryBuilder;
use crate::error::{ProcessorError, Result};
use crate::navigation::{NavigationHop, QueryTarget};
use crate::result::{QueryElementCollectionResult, Tuple};
use crate::schema::Selector;
use async_trait::async_trait;

/// Values of one element collection for a set of owner rows.
pub struct ElementCollectionQuery<'a> {
    ctx: &'a QueryContext,
    target: QueryTarget,
    attribute: Selector,
    owner_rows: &'a [Tuple],
    query: CriteriaQuery,
}

impl<'a> ElementCollectionQuery<'a> {
    pub fn new(ctx: &'a QueryContext, owner: &QueryTarget, attribute: Selector, owner_rows: &'a [Tuple]) -> Self {
        let mut target = owner.clone();
        target.property = None;
        target.count = false;
        target.hops.push(NavigationHop::ElementCollection {
            selector: attribute.clone(),
        });
        Self {
            ctx,
            target,
            attribute,
            owner_rows,
            query: CriteriaQuery::new(),
        }
    }
}

#[async_trait]
impl QueryBuilder for ElementCollectionQuery<'_> {
    type Output = QueryElementCollectionResult;

    fn build_from(&mut self) -> Result<()> {
        self.query.init_from(self.ctx, &self.target)?;
        Ok(())
    }

    fn build_where(&mut self) -> Result<()> {
        let from = self.query.from()?.clone();
        if let Some(condition) = where_condition(self.ctx, &self.target, &from, None)? {
            self.query.and_where(condition);
        }
        let owner = from.result_scope();
        self.query.and_where(parent_key_restriction(
            owner,
            from.result_key_builder().key_paths(),
            self.owner_rows,
        ));
        Ok(())
    }

    fn build_select(&mut self) -> Result<()> {
        let from = self.query.from()?.clone();
        let Some((collection, _)) = &from.collection else {
            return Err(ProcessorError::illegal_state(format!(
                "collection '{}' not joined",
                self.attribute.alias
            )));
        };
        self.query.select_prefixed_keys(&from.root, &from.root_keys)?;
        for hop in &from.hops {
            self.query.select_prefixed_keys(&hop.scope, &hop.key_builder)?;
        }
        let owner_type = from.result_scope().ty.clone();
        for leaf in owner_type.collection_leaf_paths(&self.attribute) {
            self.query.select_path(collection, &leaf, leaf.alias.clone())?;
        }
        self.query.order_by_keys(&from.root);
        for hop in &from.hops {
            self.query.order_by_keys(&hop.scope);
        }
        Ok(())
    }

    async fn execute(&mut self) -> Result<QueryElementCollectionResult> {
        let from = self.query.from()?.clone();
        let key_builder = from.result_key_builder().clone();
        if self.owner_rows.is_empty() {
            return Ok(QueryElementCollectionResult::new(self.attribute.clone(), key_builder, Vec::new()));
        }
        let rows = self
            .ctx
            .executor
            .execute(self.query.statement(), self.query.columns())
            .await?;
        tracing::debug!(
            collection = %self.attribute.alias,
            owner = %key_builder.label(),
            rows = rows.len(),
            "element collection query executed"
        );
        Ok(QueryElementCollectionResult::new(self.attribute.clone(), key_builder, rows))
    }
}
