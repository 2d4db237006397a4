use crate::config::ProcessorConfig;
use crate::convert::ValueConverter;
use crate::db::TupleExecutor;
use crate::schema::Schema;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Everything a query builder reads besides its own options.
pub struct QueryContext {
    pub schema: Arc<Schema>,
    pub values: Arc<ValueConverter>,
    pub config: ProcessorConfig,
    pub executor: Arc<dyn TupleExecutor>,
    aliases: AliasSeq,
}

impl QueryContext {
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
            aliases: AliasSeq::default(),
        }
    }

    /// Fresh table alias, unique within this context.
    pub fn next_alias(&self, prefix: &str) -> String {
        self.aliases.next(prefix)
    }
}

impl fmt::Debug for QueryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryContext")
            .field("schema", &self.schema)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct AliasSeq(AtomicUsize);

impl AliasSeq {
    fn next(&self, prefix: &str) -> String {
        let n = self.0.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}{n}")
    }
}
