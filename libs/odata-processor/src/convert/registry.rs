//! Converters between storage values and OData values, and the registry that maps
//! (OData type, storage type) pairs to them.

use crate::db::DbValue;
use crate::error::{MessageKey, ProcessorError, Result};
use crate::schema::{EdmPrimitive, StorageType};
use chrono::{DateTime, TimeZone, Utc};
use odata_core::ast::Value;
use std::sync::Arc;

/// Bidirectional conversion for one attribute representation.
pub trait AttributeConverter: Send + Sync {
    fn name(&self) -> &str;

    /// Storage value (never SQL NULL) to OData value.
    fn to_odata(&self, value: &DbValue) -> Result<Value>;

    /// OData value (never null) to storage value.
    fn to_storage(&self, value: &Value) -> Result<DbValue>;
}

/// One registry entry. With `match_subtypes` the mapping also applies to storage types
/// whose lineage contains `storage`.
#[derive(Clone)]
pub struct ConverterMapping {
    pub edm: EdmPrimitive,
    pub storage: StorageType,
    pub match_subtypes: bool,
    pub converter: Arc<dyn AttributeConverter>,
}

impl ConverterMapping {
    fn matches(&self, edm: EdmPrimitive, storage: StorageType) -> bool {
        if self.edm != edm {
            return false;
        }
        if self.match_subtypes {
            storage.lineage().any(|s| s == self.storage)
        } else {
            storage == self.storage
        }
    }
}

/// Built once at startup and shared by every converter instance.
#[derive(Clone, Default)]
pub struct ConverterRegistry {
    mappings: Vec<ConverterMapping>,
}

impl ConverterRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Date/time and char mappings.
    pub fn with_defaults() -> Self {
        Self::empty()
            .register(
                EdmPrimitive::DateTimeOffset,
                StorageType::DateTime,
                false,
                Arc::new(NaiveDateTimeConverter),
            )
            .register(
                EdmPrimitive::DateTimeOffset,
                StorageType::EpochMillis,
                false,
                Arc::new(EpochMillisConverter),
            )
            .register(
                EdmPrimitive::String,
                StorageType::Char,
                false,
                Arc::new(CharConverter),
            )
    }

    pub fn register(
        mut self,
        edm: EdmPrimitive,
        storage: StorageType,
        match_subtypes: bool,
        converter: Arc<dyn AttributeConverter>,
    ) -> Self {
        self.mappings.push(ConverterMapping {
            edm,
            storage,
            match_subtypes,
            converter,
        });
        self
    }

    pub fn candidates(&self, edm: EdmPrimitive, storage: StorageType) -> Vec<&ConverterMapping> {
        self.mappings
            .iter()
            .filter(|m| m.matches(edm, storage))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

fn mismatch(storage: &str, value: &Value) -> ProcessorError {
    ProcessorError::new(MessageKey::TypeMismatch, [storage, value.kind_name()])
}

fn unexpected(converter: &str, value: &DbValue) -> ProcessorError {
    ProcessorError::conversion(format!("{converter} cannot read {value:?}"))
}

/// Zone-less timestamps are UTC.
pub struct NaiveDateTimeConverter;

impl AttributeConverter for NaiveDateTimeConverter {
    fn name(&self) -> &str {
        "NaiveDateTimeConverter"
    }

    fn to_odata(&self, value: &DbValue) -> Result<Value> {
        match value {
            DbValue::ChronoDateTime(Some(dt)) => Ok(Value::DateTime(Utc.from_utc_datetime(dt))),
            other => Err(unexpected(self.name(), other)),
        }
    }

    fn to_storage(&self, value: &Value) -> Result<DbValue> {
        match value {
            Value::DateTime(dt) => Ok(DbValue::ChronoDateTime(Some(Box::new(dt.naive_utc())))),
            Value::Date(d) => Ok(DbValue::ChronoDateTime(Some(Box::new(
                d.and_time(chrono::NaiveTime::MIN),
            )))),
            other => Err(mismatch("DateTime", other)),
        }
    }
}

pub struct EpochMillisConverter;

impl AttributeConverter for EpochMillisConverter {
    fn name(&self) -> &str {
        "EpochMillisConverter"
    }

    fn to_odata(&self, value: &DbValue) -> Result<Value> {
        let millis = match value {
            DbValue::BigInt(Some(ms)) => *ms,
            DbValue::Int(Some(ms)) => i64::from(*ms),
            other => return Err(unexpected(self.name(), other)),
        };
        DateTime::<Utc>::from_timestamp_millis(millis)
            .map(Value::DateTime)
            .ok_or_else(|| ProcessorError::conversion(format!("timestamp {millis} out of range")))
    }

    fn to_storage(&self, value: &Value) -> Result<DbValue> {
        match value {
            Value::DateTime(dt) => Ok(DbValue::BigInt(Some(dt.timestamp_millis()))),
            other => Err(mismatch("EpochMillis", other)),
        }
    }
}

pub struct CharConverter;

impl AttributeConverter for CharConverter {
    fn name(&self) -> &str {
        "CharConverter"
    }

    fn to_odata(&self, value: &DbValue) -> Result<Value> {
        match value {
            DbValue::Char(Some(c)) => Ok(Value::String(c.to_string())),
            DbValue::String(Some(s)) => Ok(Value::String(s.to_string())),
            other => Err(unexpected(self.name(), other)),
        }
    }

    fn to_storage(&self, value: &Value) -> Result<DbValue> {
        match value {
            Value::String(s) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(DbValue::Char(Some(c))),
                    _ => Err(mismatch("Char", value)),
                }
            }
            other => Err(mismatch("Char", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtype_mappings_cover_the_lineage() {
        let registry = ConverterRegistry::empty().register(
            EdmPrimitive::DateTimeOffset,
            StorageType::BigInt,
            true,
            Arc::new(EpochMillisConverter),
        );
        assert_eq!(
            registry
                .candidates(EdmPrimitive::DateTimeOffset, StorageType::EpochMillis)
                .len(),
            1
        );
        assert!(registry
            .candidates(EdmPrimitive::DateTimeOffset, StorageType::Int)
            .is_empty());
    }

    #[test]
    fn epoch_millis_round_trip() {
        let dt = Utc.with_ymd_and_hms(2020, 5, 17, 8, 30, 0).unwrap();
        let stored = EpochMillisConverter.to_storage(&Value::DateTime(dt)).unwrap();
        assert_eq!(stored, DbValue::BigInt(Some(dt.timestamp_millis())));
        assert_eq!(EpochMillisConverter.to_odata(&stored).unwrap(), Value::DateTime(dt));
    }

    #[test]
    fn char_rejects_longer_strings() {
        let err = CharConverter
            .to_storage(&Value::String("ab".into()))
            .unwrap_err();
        assert_eq!(err.key(), MessageKey::TypeMismatch);
    }
}
