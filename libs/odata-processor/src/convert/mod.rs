//! Conversion between storage rows and the OData entity graph, in both directions.

mod buffer;
mod entity;
mod merge;
mod registry;
mod value;
mod write;

pub use buffer::ComplexValueBuffer;
pub use entity::EntityConverter;
pub use merge::merge_entity;
pub use registry::{
    AttributeConverter, CharConverter, ConverterMapping, ConverterRegistry, EpochMillisConverter,
    NaiveDateTimeConverter,
};
pub use value::{coerce, db_to_odata, enum_to_storage, ValueConverter};
pub use write::WriteConverter;
