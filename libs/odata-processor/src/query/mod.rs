//! SQL generation for OData reads.
//!
//! Every query kind is a small strategy struct implementing [`QueryBuilder`]; they share
//! the FROM/WHERE/ORDER BY plumbing of [`CriteriaQuery`] and read schema, converters and
//! configuration from a [`QueryContext`].

mod aggregate;
mod collection;
mod context;
mod count;
mod criteria;
mod entity;
mod expand;
pub(crate) mod filter;
mod subquery;

pub use aggregate::AggregationQuery;
pub use collection::ElementCollectionQuery;
pub use context::QueryContext;
pub use count::CountQuery;
pub use criteria::{resolve_selection, CriteriaQuery, FromClause, HopScope, InitializationState, Selection};
pub use entity::EntityQuery;
pub use expand::{load_children, ExpandQuery};
pub use filter::FilterCompiler;

use crate::error::Result;
use async_trait::async_trait;

/// Build steps of one SQL statement.
///
/// `build_from` initializes the builder; the other steps fail with an illegal-state error
/// when called before it, as does a second `build_from`.
#[async_trait]
pub trait QueryBuilder: Send {
    type Output: Send;

    fn build_from(&mut self) -> Result<()>;

    fn build_where(&mut self) -> Result<()>;

    fn build_select(&mut self) -> Result<()>;

    async fn execute(&mut self) -> Result<Self::Output>;

    /// All build steps followed by execution.
    async fn run(&mut self) -> Result<Self::Output> {
        self.build_from()?;
        self.build_where()?;
        self.build_select()?;
        self.execute().await
    }
}
