//! Process bootstrap for the OData processor: layered configuration, logging, and the
//! database-backed [`ODataProcessor`].

pub mod config;
pub mod logging;

pub use config::{default_logging_config, AppConfig, DatabaseConfig, LoggingConfig, Section};
pub use logging::{init_logging, init_logging_from_config};

use anyhow::{Context, Result};
use odata_processor::convert::{ConverterRegistry, ValueConverter};
use odata_processor::schema::Schema;
use odata_processor::{ODataProcessor, SeaOrmExecutor};
use sea_orm::{ConnectOptions, Database};
use std::sync::Arc;

const DEFAULT_MAX_CONNS: u32 = 10;

/// Connect to the configured database and wire a processor for `schema`.
///
/// Values are converted with the default converter registry.
pub async fn build_processor(config: &AppConfig, schema: Arc<Schema>) -> Result<ODataProcessor> {
    build_processor_with(config, schema, ConverterRegistry::with_defaults()).await
}

/// Like [`build_processor`] with a caller-supplied converter registry.
pub async fn build_processor_with(
    config: &AppConfig,
    schema: Arc<Schema>,
    registry: ConverterRegistry,
) -> Result<ODataProcessor> {
    let db = config
        .database
        .as_ref()
        .context("database section is missing from the configuration")?;

    let mut options = ConnectOptions::new(db.url.clone());
    options
        .max_connections(db.max_conns.unwrap_or(DEFAULT_MAX_CONNS))
        .sqlx_logging(db.sql_logging);
    let conn = Database::connect(options)
        .await
        .with_context(|| format!("Failed to connect to {}", db.url))?;

    tracing::info!(
        entity_sets = schema.entity_set_names().count(),
        max_conns = db.max_conns.unwrap_or(DEFAULT_MAX_CONNS),
        "OData processor ready"
    );

    Ok(ODataProcessor::new(
        schema,
        Arc::new(ValueConverter::new(Arc::new(registry))),
        config.processor.clone(),
        Arc::new(SeaOrmExecutor::new(conn)),
    ))
}
