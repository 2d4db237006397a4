use serde::{Deserialize, Serialize};
use std::fmt;

/// Primitive types visible to OData clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdmPrimitive {
    Boolean,
    String,
    Int32,
    Int64,
    Decimal,
    Double,
    Guid,
    Date,
    TimeOfDay,
    DateTimeOffset,
}

/// Column representation in the database.
///
/// `parent()` gives the more general representation a value can also be read as; converter
/// mappings registered with subtype matching apply to the whole chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageType {
    Bool,
    Int,
    BigInt,
    Double,
    Decimal,
    String,
    Char,
    Uuid,
    Date,
    Time,
    /// Timestamp without zone, interpreted as UTC.
    DateTime,
    DateTimeUtc,
    /// Milliseconds since the Unix epoch stored in a BIGINT column.
    EpochMillis,
}

impl StorageType {
    pub fn parent(self) -> Option<StorageType> {
        match self {
            StorageType::EpochMillis => Some(StorageType::BigInt),
            StorageType::Char => Some(StorageType::String),
            _ => None,
        }
    }

    /// `self` followed by every ancestor.
    pub fn lineage(self) -> impl Iterator<Item = StorageType> {
        std::iter::successors(Some(self), |t| t.parent())
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            StorageType::Int
                | StorageType::BigInt
                | StorageType::Double
                | StorageType::Decimal
                | StorageType::EpochMillis
        )
    }

    pub fn is_textual(self) -> bool {
        matches!(self, StorageType::String | StorageType::Char | StorageType::Uuid)
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for EdmPrimitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Edm.{self:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lineage_walks_parents() {
        let chain: Vec<_> = StorageType::EpochMillis.lineage().collect();
        assert_eq!(chain, vec![StorageType::EpochMillis, StorageType::BigInt]);
        assert_eq!(StorageType::Int.lineage().count(), 1);
    }
}
