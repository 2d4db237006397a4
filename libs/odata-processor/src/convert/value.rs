//! Per-attribute value conversion used for predicate literals, row values and writes.

use super::registry::{AttributeConverter, ConverterRegistry};
use crate::db::{is_null, null_of, DbValue};
use crate::error::{MessageKey, ProcessorError, Result};
use crate::schema::{Attribute, AttributeType, ConverterRef, EdmPrimitive, EnumStorage, EnumType, StorageType};
use bigdecimal::{BigDecimal, FromPrimitive, ToPrimitive};
use chrono::{TimeZone, Utc};
use dashmap::DashMap;
use odata_core::ast::Value;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;

type CacheKey = (EdmPrimitive, StorageType);

/// Resolves the converter of an attribute and applies it in both directions.
///
/// Resolution: attribute converter, then a unique registry match, then pass-through.
/// Registry lookups are cached per (OData type, storage type); ambiguous lookups are not.
pub struct ValueConverter {
    registry: Arc<ConverterRegistry>,
    cache: DashMap<CacheKey, Option<Arc<dyn AttributeConverter>>>,
}

impl ValueConverter {
    pub fn new(registry: Arc<ConverterRegistry>) -> Self {
        Self {
            registry,
            cache: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &ConverterRegistry {
        &self.registry
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    pub fn converter_for(&self, attr: &Attribute) -> Option<Arc<dyn AttributeConverter>> {
        if let ConverterRef::Custom(c) = &attr.converter {
            return Some(c.clone());
        }
        match &attr.ty {
            AttributeType::Primitive { edm, storage } => self.lookup(*edm, *storage),
            _ => None,
        }
    }

    fn lookup(&self, edm: EdmPrimitive, storage: StorageType) -> Option<Arc<dyn AttributeConverter>> {
        if let Some(hit) = self.cache.get(&(edm, storage)) {
            return hit.value().clone();
        }
        let candidates = self.registry.candidates(edm, storage);
        let resolved = match candidates.as_slice() {
            [] => None,
            [single] => Some(single.converter.clone()),
            many => {
                let names: Vec<&str> = many.iter().map(|m| m.converter.name()).collect();
                tracing::warn!(
                    edm = %edm,
                    storage = %storage,
                    converters = ?names,
                    "ambiguous converter mapping, values pass through unconverted"
                );
                return None;
            }
        };
        self.cache.insert((edm, storage), resolved.clone());
        resolved
    }

    /// Storage value of `attr` to its OData value.
    pub fn to_odata(&self, attr: &Attribute, value: &DbValue) -> Result<Value> {
        if is_null(value) {
            return Ok(Value::Null);
        }
        if let AttributeType::Enum(e) = &attr.ty {
            return enum_to_odata(e, value);
        }
        match self.converter_for(attr) {
            Some(c) => c.to_odata(value),
            None => db_to_odata(value),
        }
    }

    /// OData value to the storage value of `attr`.
    pub fn to_storage(&self, attr: &Attribute, value: &Value) -> Result<DbValue> {
        let storage = attr.storage_type().ok_or_else(|| {
            ProcessorError::new(
                MessageKey::NotSupportedAttributeType,
                [attr.external_name.as_str(), "complex"],
            )
        })?;
        if value.is_null() {
            return Ok(null_of(storage));
        }
        if let AttributeType::Enum(e) = &attr.ty {
            return enum_to_storage(e, value);
        }
        match self.converter_for(attr) {
            Some(c) => c.to_storage(value),
            None => coerce(storage, value),
        }
    }
}

fn enum_to_odata(ty: &EnumType, value: &DbValue) -> Result<Value> {
    let ordinal = match (ty.storage, value) {
        (EnumStorage::Name, DbValue::String(Some(name))) => ty.ordinal_of(name),
        (EnumStorage::Ordinal, v) => db_integer(v).and_then(|i| usize::try_from(i).ok()),
        _ => None,
    };
    match ordinal {
        Some(o) if o < ty.members.len() => Ok(Value::Number(BigDecimal::from(o as u64))),
        _ => Err(ProcessorError::conversion(format!(
            "{value:?} is not a member of enum {}",
            ty.name
        ))),
    }
}

/// Ordinal (or member name) to the persisted enum representation.
pub fn enum_to_storage(ty: &EnumType, value: &Value) -> Result<DbValue> {
    let ordinal = match value {
        Value::Number(n) => n.to_usize().filter(|o| *o < ty.members.len()),
        Value::String(s) => ty.ordinal_of(s),
        _ => None,
    };
    let Some(ordinal) = ordinal else {
        return Err(ProcessorError::new(
            MessageKey::InvalidEnumValue,
            [ty.name.clone(), value.to_string()],
        ));
    };
    Ok(match ty.storage {
        EnumStorage::Ordinal => DbValue::Int(Some(ordinal as i32)),
        EnumStorage::Name => DbValue::String(Some(Box::new(ty.members[ordinal].clone()))),
    })
}

fn db_integer(value: &DbValue) -> Option<i64> {
    match value {
        DbValue::TinyInt(Some(i)) => Some(i64::from(*i)),
        DbValue::SmallInt(Some(i)) => Some(i64::from(*i)),
        DbValue::Int(Some(i)) => Some(i64::from(*i)),
        DbValue::BigInt(Some(i)) => Some(*i),
        DbValue::TinyUnsigned(Some(i)) => Some(i64::from(*i)),
        DbValue::SmallUnsigned(Some(i)) => Some(i64::from(*i)),
        DbValue::Unsigned(Some(i)) => Some(i64::from(*i)),
        DbValue::BigUnsigned(Some(i)) => i64::try_from(*i).ok(),
        _ => None,
    }
}

/// Pass-through conversion of a storage value.
pub fn db_to_odata(value: &DbValue) -> Result<Value> {
    if is_null(value) {
        return Ok(Value::Null);
    }
    if let Some(i) = db_integer(value) {
        return Ok(Value::Number(BigDecimal::from(i)));
    }
    Ok(match value {
        DbValue::Bool(Some(b)) => Value::Bool(*b),
        DbValue::BigUnsigned(Some(u)) => Value::Number(BigDecimal::from(*u)),
        DbValue::Float(Some(f)) => float(f64::from(*f))?,
        DbValue::Double(Some(f)) => float(*f)?,
        DbValue::Decimal(Some(d)) => decimal_to_bigdecimal(d)?,
        DbValue::String(Some(s)) => Value::String(s.to_string()),
        DbValue::Char(Some(c)) => Value::String(c.to_string()),
        DbValue::Uuid(Some(u)) => Value::Uuid(**u),
        DbValue::ChronoDate(Some(d)) => Value::Date(**d),
        DbValue::ChronoTime(Some(t)) => Value::Time(**t),
        DbValue::ChronoDateTime(Some(dt)) => Value::DateTime(Utc.from_utc_datetime(dt)),
        DbValue::ChronoDateTimeUtc(Some(dt)) => Value::DateTime(**dt),
        other => {
            return Err(ProcessorError::conversion(format!(
                "unsupported storage value {other:?}"
            )))
        }
    })
}

fn float(f: f64) -> Result<Value> {
    BigDecimal::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| ProcessorError::conversion(format!("{f} is not a finite number")))
}

fn decimal_to_bigdecimal(d: &Decimal) -> Result<Value> {
    BigDecimal::from_str(&d.to_string())
        .map(Value::Number)
        .map_err(|e| ProcessorError::conversion(e.to_string()))
}

fn bigdecimal_to_decimal(n: &BigDecimal) -> Option<Decimal> {
    let s = n.to_string();
    Decimal::from_str_exact(&s).or_else(|_| s.parse::<Decimal>()).ok()
}

/// Pass-through conversion of an OData literal into `storage`.
pub fn coerce(storage: StorageType, value: &Value) -> Result<DbValue> {
    let mismatch = || {
        ProcessorError::new(
            MessageKey::TypeMismatch,
            [storage.to_string(), value.kind_name().to_string()],
        )
    };
    Ok(match (storage, value) {
        (_, Value::Null) => null_of(storage),
        (StorageType::String, Value::String(s)) => DbValue::String(Some(Box::new(s.clone()))),
        (StorageType::Char, Value::String(s)) => {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => DbValue::Char(Some(c)),
                _ => return Err(mismatch()),
            }
        }
        (StorageType::Int, Value::Number(n)) => DbValue::Int(Some(n.to_i32().ok_or_else(mismatch)?)),
        (StorageType::BigInt | StorageType::EpochMillis, Value::Number(n)) => {
            DbValue::BigInt(Some(n.to_i64().ok_or_else(mismatch)?))
        }
        (StorageType::Double, Value::Number(n)) => DbValue::Double(Some(n.to_f64().ok_or_else(mismatch)?)),
        (StorageType::Decimal, Value::Number(n)) => {
            DbValue::Decimal(Some(Box::new(bigdecimal_to_decimal(n).ok_or_else(mismatch)?)))
        }
        (StorageType::Bool, Value::Bool(b)) => DbValue::Bool(Some(*b)),
        (StorageType::Uuid, Value::Uuid(u)) => DbValue::Uuid(Some(Box::new(*u))),
        (StorageType::DateTimeUtc, Value::DateTime(dt)) => DbValue::ChronoDateTimeUtc(Some(Box::new(*dt))),
        (StorageType::DateTime, Value::DateTime(dt)) => {
            DbValue::ChronoDateTime(Some(Box::new(dt.naive_utc())))
        }
        (StorageType::Date, Value::Date(d)) => DbValue::ChronoDate(Some(Box::new(*d))),
        (StorageType::Time, Value::Time(t)) => DbValue::ChronoTime(Some(Box::new(*t))),
        _ => return Err(mismatch()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::registry::EpochMillisConverter;
    use chrono::TimeZone;

    fn enum_attr() -> Attribute {
        let ty = EnumType::new("AccessRights", ["Read", "Write", "Delete"], EnumStorage::Ordinal);
        Attribute::enumeration("Rights", Arc::new(ty))
    }

    #[test]
    fn enum_ordinals_round_trip_and_reject_out_of_range() {
        let values = ValueConverter::new(Arc::new(ConverterRegistry::empty()));
        let attr = enum_attr();
        let odata = values.to_odata(&attr, &DbValue::Int(Some(2))).unwrap();
        assert_eq!(odata, Value::from(2));
        assert_eq!(values.to_storage(&attr, &odata).unwrap(), DbValue::Int(Some(2)));

        let err = values.to_storage(&attr, &Value::from(3)).unwrap_err();
        assert_eq!(err.key(), MessageKey::InvalidEnumValue);
        assert_eq!(err.status(), http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn enum_by_name_storage() {
        let ty = EnumType::new("Color", ["Red", "Green"], EnumStorage::Name);
        let attr = Attribute::enumeration("Color", Arc::new(ty));
        let values = ValueConverter::new(Arc::new(ConverterRegistry::empty()));
        let stored = values.to_storage(&attr, &Value::from(1)).unwrap();
        assert_eq!(stored, DbValue::String(Some(Box::new("Green".to_string()))));
        assert_eq!(values.to_odata(&attr, &stored).unwrap(), Value::from(1));
    }

    #[test]
    fn naive_timestamps_are_read_as_utc() {
        let values = ValueConverter::new(Arc::new(ConverterRegistry::with_defaults()));
        let attr = Attribute::primitive("CreatedAt", EdmPrimitive::DateTimeOffset, StorageType::DateTime);
        let dt = Utc.with_ymd_and_hms(2016, 1, 20, 9, 21, 23).unwrap();
        let stored = values.to_storage(&attr, &Value::DateTime(dt)).unwrap();
        assert_eq!(stored, DbValue::ChronoDateTime(Some(Box::new(dt.naive_utc()))));
        assert_eq!(values.to_odata(&attr, &stored).unwrap(), Value::DateTime(dt));
        assert_eq!(values.cached_entries(), 1);
    }

    #[test]
    fn ambiguous_mapping_passes_through_and_is_not_cached() {
        let registry = ConverterRegistry::empty()
            .register(EdmPrimitive::Int64, StorageType::BigInt, true, Arc::new(EpochMillisConverter))
            .register(EdmPrimitive::Int64, StorageType::EpochMillis, false, Arc::new(EpochMillisConverter));
        let values = ValueConverter::new(Arc::new(registry));
        let attr = Attribute::primitive("Stamp", EdmPrimitive::Int64, StorageType::EpochMillis);

        assert!(values.converter_for(&attr).is_none());
        assert_eq!(
            values.to_odata(&attr, &DbValue::BigInt(Some(42))).unwrap(),
            Value::from(42)
        );
        assert_eq!(values.cached_entries(), 0);
    }

    #[test]
    fn attribute_converter_wins_over_registry() {
        let values = ValueConverter::new(Arc::new(ConverterRegistry::with_defaults()));
        let attr = Attribute::primitive("Stamp", EdmPrimitive::DateTimeOffset, StorageType::BigInt)
            .converter(Arc::new(EpochMillisConverter));
        let odata = values.to_odata(&attr, &DbValue::BigInt(Some(0))).unwrap();
        assert_eq!(odata, Value::DateTime(Utc.timestamp_millis_opt(0).unwrap()));
        assert_eq!(values.cached_entries(), 0);
    }

    #[test]
    fn coerce_reports_kind_and_storage() {
        let err = coerce(StorageType::Int, &Value::from("x")).unwrap_err();
        assert_eq!(err.message(), "value of kind string cannot be stored as Int");
    }

    #[test]
    fn null_becomes_typed_null() {
        assert_eq!(coerce(StorageType::String, &Value::Null).unwrap(), DbValue::String(None));
        assert_eq!(db_to_odata(&DbValue::Int(None)).unwrap(), Value::Null);
    }
}
