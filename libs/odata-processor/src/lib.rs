//! OData read/write processing over a relational database.
//!
//! A request is resolved against a typed [`schema::Schema`] into navigation hops, turned
//! into sea-query SELECT statements (one root query, then one query per `$expand` item and
//! per selected element collection), executed through a [`TupleExecutor`], and the flat
//! result rows are converted into an OData entity graph.
//!
//! # Features
//! - `sqlite` (default), `pg`, `mysql`: sea-orm backends for [`SeaOrmExecutor`]
//!
//! # Example
//! ```rust,no_run
//! use odata_core::{QueryOptions, ResourcePath};
//! use odata_processor::convert::{ConverterRegistry, ValueConverter};
//! use odata_processor::schema::{Attribute, EdmPrimitive, Schema, StorageType, StructuredType};
//! use odata_processor::{ODataProcessor, ProcessorConfig, SeaOrmExecutor};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let person = StructuredType::entity("Person", "person")
//!     .attribute(Attribute::primitive("ID", EdmPrimitive::Int32, StorageType::Int).column("id").key())
//!     .attribute(Attribute::primitive("Name", EdmPrimitive::String, StorageType::String).column("name"));
//! let schema = Schema::builder().entity_set("Persons", person).build()?;
//!
//! let conn = sea_orm::Database::connect("sqlite::memory:").await?;
//! let processor = ODataProcessor::new(
//!     Arc::new(schema),
//!     Arc::new(ValueConverter::new(Arc::new(ConverterRegistry::with_defaults()))),
//!     ProcessorConfig::default(),
//!     Arc::new(SeaOrmExecutor::new(conn)),
//! );
//! let persons = processor
//!     .read_entities(&ResourcePath::entity_set("Persons"), &QueryOptions::default())
//!     .await?;
//! println!("{} persons", persons.len());
//! # Ok(())
//! # }
//! ```

pub mod access;
pub mod config;
pub mod convert;
pub mod db;
pub mod error;
pub mod keys;
pub mod navigation;
pub mod processor;
pub mod query;
pub mod result;
pub mod schema;

pub use config::{IdStrategy, ProcessorConfig};
pub use db::{DataAccessConditioner, DatabaseProcessor, DbValue, SeaOrmExecutor, TupleExecutor};
pub use error::{MessageKey, ProcessorError, Result};
pub use keys::{CorrelationKey, NavigationKeyBuilder};
pub use navigation::{determine_navigations, NavigationHop, QueryTarget};
pub use processor::{ODataProcessor, ReadResult};
pub use query::{QueryBuilder, QueryContext};
pub use result::{QueryEntityResult, Tuple};
