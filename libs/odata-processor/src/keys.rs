//! Correlation keys linking rows of independently executed queries to their owner.
//!
//! A [`NavigationKeyBuilder`] is created per navigation hop, chained from the start entity.
//! The owning side reads its own key columns under their plain aliases, the owned side reads
//! the same columns under the builder's alias prefix. Both sides must come from the same
//! builder chain or rows silently fail to correlate.

use crate::db::DbValue;
use crate::error::{ProcessorError, Result};
use crate::result::Tuple;
use crate::schema::{AssociationPath, Selector, StructuredType};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// One typed component of a correlation key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPart {
    Null,
    Bool(bool),
    Int(i64),
    /// Bit pattern of the `f64`.
    Float(u64),
    Decimal(Decimal),
    Text(String),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    DateTimeUtc(DateTime<Utc>),
    Bytes(Vec<u8>),
}

impl From<&DbValue> for KeyPart {
    fn from(value: &DbValue) -> Self {
        match value {
            DbValue::Bool(Some(b)) => KeyPart::Bool(*b),
            DbValue::TinyInt(Some(i)) => KeyPart::Int(i64::from(*i)),
            DbValue::SmallInt(Some(i)) => KeyPart::Int(i64::from(*i)),
            DbValue::Int(Some(i)) => KeyPart::Int(i64::from(*i)),
            DbValue::BigInt(Some(i)) => KeyPart::Int(*i),
            DbValue::TinyUnsigned(Some(i)) => KeyPart::Int(i64::from(*i)),
            DbValue::SmallUnsigned(Some(i)) => KeyPart::Int(i64::from(*i)),
            DbValue::Unsigned(Some(i)) => KeyPart::Int(i64::from(*i)),
            DbValue::BigUnsigned(Some(i)) => match i64::try_from(*i) {
                Ok(i) => KeyPart::Int(i),
                Err(_) => KeyPart::Text(i.to_string()),
            },
            DbValue::Float(Some(f)) => KeyPart::Float(f64::from(*f).to_bits()),
            DbValue::Double(Some(f)) => KeyPart::Float(f.to_bits()),
            DbValue::Decimal(Some(d)) => KeyPart::Decimal(d.normalize()),
            DbValue::String(Some(s)) => KeyPart::Text(s.to_string()),
            DbValue::Char(Some(c)) => KeyPart::Text(c.to_string()),
            DbValue::Uuid(Some(u)) => KeyPart::Uuid(**u),
            DbValue::ChronoDate(Some(d)) => KeyPart::Date(**d),
            DbValue::ChronoTime(Some(t)) => KeyPart::Time(**t),
            DbValue::ChronoDateTime(Some(dt)) => KeyPart::DateTime(**dt),
            DbValue::ChronoDateTimeUtc(Some(dt)) => KeyPart::DateTimeUtc(**dt),
            DbValue::Bytes(Some(b)) => KeyPart::Bytes(b.to_vec()),
            _ => KeyPart::Null,
        }
    }
}

impl KeyPart {
    /// Storage value for IN restrictions; `None` for SQL NULL.
    pub fn to_db_value(&self) -> Option<DbValue> {
        Some(match self {
            KeyPart::Null => return None,
            KeyPart::Bool(b) => DbValue::Bool(Some(*b)),
            KeyPart::Int(i) => DbValue::BigInt(Some(*i)),
            KeyPart::Float(bits) => DbValue::Double(Some(f64::from_bits(*bits))),
            KeyPart::Decimal(d) => DbValue::Decimal(Some(Box::new(*d))),
            KeyPart::Text(s) => DbValue::String(Some(Box::new(s.clone()))),
            KeyPart::Uuid(u) => DbValue::Uuid(Some(Box::new(*u))),
            KeyPart::Date(d) => DbValue::ChronoDate(Some(Box::new(*d))),
            KeyPart::Time(t) => DbValue::ChronoTime(Some(Box::new(*t))),
            KeyPart::DateTime(dt) => DbValue::ChronoDateTime(Some(Box::new(*dt))),
            KeyPart::DateTimeUtc(dt) => DbValue::ChronoDateTimeUtc(Some(Box::new(*dt))),
            KeyPart::Bytes(b) => DbValue::Bytes(Some(Box::new(b.clone()))),
        })
    }
}

/// Ordered key values with structural equality.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CorrelationKey(Vec<KeyPart>);

impl CorrelationKey {
    pub fn new(parts: Vec<KeyPart>) -> Self {
        Self(parts)
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{part:?}")?;
        }
        f.write_str("]")
    }
}

pub struct NavigationKeyBuilder {
    parent: Option<Arc<NavigationKeyBuilder>>,
    level: usize,
    target_type: Arc<StructuredType>,
    navigation: Option<AssociationPath>,
    key_paths: Vec<Selector>,
    alias_prefix: String,
    label: String,
}

impl NavigationKeyBuilder {
    /// Builder of the start entity of a request.
    pub fn root(ty: Arc<StructuredType>) -> Arc<Self> {
        Arc::new(Self {
            parent: None,
            level: 1,
            key_paths: ty.key_paths(),
            alias_prefix: "k1".to_string(),
            label: ty.name.clone(),
            target_type: ty,
            navigation: None,
        })
    }

    /// Builder for the hop `navigation`, which must lead to `target`.
    pub fn child(
        self: &Arc<Self>,
        navigation: &AssociationPath,
        target: &Arc<StructuredType>,
    ) -> Result<Arc<Self>> {
        if navigation.target_type.name != target.name {
            return Err(ProcessorError::illegal_state(format!(
                "navigation '{}' leads to '{}', not '{}'",
                navigation.alias, navigation.target_type.name, target.name
            )));
        }
        let level = self.level + 1;
        let label = format!(
            "{}#{}->{}",
            self.label,
            navigation.alias,
            target.name
        );
        Ok(Arc::new(Self {
            parent: Some(self.clone()),
            level,
            key_paths: target.key_paths(),
            alias_prefix: format!("{}{level}", navigation.alias.replace('/', "_")),
            label,
            target_type: target.clone(),
            navigation: Some(navigation.clone()),
        }))
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn parent(&self) -> Option<&Arc<NavigationKeyBuilder>> {
        self.parent.as_ref()
    }

    pub fn target_type(&self) -> &Arc<StructuredType> {
        &self.target_type
    }

    pub fn navigation(&self) -> Option<&AssociationPath> {
        self.navigation.as_ref()
    }

    pub fn key_paths(&self) -> &[Selector] {
        &self.key_paths
    }

    pub fn alias_prefix(&self) -> &str {
        &self.alias_prefix
    }

    /// Human-readable chain, e.g. `Person#Roles->BusinessPartnerRole`.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Column alias of a key path on the owned side.
    pub fn prefixed_alias(&self, key: &Selector) -> String {
        format!("{}.{}", self.alias_prefix, key.alias)
    }

    /// Key of a row that represents an entity of this builder's target type.
    pub fn owning_row_key(&self, row: &Tuple) -> CorrelationKey {
        let mut parts = match &self.parent {
            Some(parent) => parent.target_row_key(row).0,
            None => Vec::new(),
        };
        parts.extend(self.key_paths.iter().map(|k| read(row, &k.alias)));
        CorrelationKey(parts)
    }

    /// Key of a row that carries this builder's keys under the prefixed aliases.
    pub fn target_row_key(&self, row: &Tuple) -> CorrelationKey {
        let mut parts = match &self.parent {
            Some(parent) => parent.target_row_key(row).0,
            None => Vec::new(),
        };
        parts.extend(
            self.key_paths
                .iter()
                .map(|k| read(row, &self.prefixed_alias(k))),
        );
        CorrelationKey(parts)
    }
}

fn read(row: &Tuple, alias: &str) -> KeyPart {
    row.get(alias).map(KeyPart::from).unwrap_or(KeyPart::Null)
}

impl fmt::Debug for NavigationKeyBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NavigationKeyBuilder")
            .field("level", &self.level)
            .field("label", &self.label)
            .field("alias_prefix", &self.alias_prefix)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Association, Attribute, EdmPrimitive, Schema, StorageType};

    fn schema() -> Schema {
        let person = StructuredType::entity("Person", "person")
            .attribute(Attribute::primitive("ID", EdmPrimitive::String, StorageType::String).column("id").key())
            .association(Association::to_many("Roles", "Role").join("id", "person_id"));
        let role = StructuredType::entity("Role", "role")
            .attribute(Attribute::primitive("RoleID", EdmPrimitive::Int32, StorageType::Int).key());
        Schema::builder()
            .entity_set("Persons", person)
            .entity_set("Roles", role)
            .build()
            .unwrap()
    }

    fn text(s: &str) -> DbValue {
        DbValue::String(Some(Box::new(s.to_string())))
    }

    #[test]
    fn owner_and_owned_rows_correlate() {
        let schema = schema();
        let person = schema.entity_type("Person").unwrap().clone();
        let nav = person.association_path("Roles", &schema).unwrap();
        let root = NavigationKeyBuilder::root(person);
        let child = root.child(&nav, &nav.target_type).unwrap();

        assert_eq!(child.level(), 2);
        assert_eq!(child.alias_prefix(), "Roles2");
        assert_eq!(child.label(), "Person#Roles->Role");

        // a role row of the first expand carries the person key under the root prefix
        let role_row = Tuple::default()
            .with("k1.ID", text("99"))
            .with("RoleID", DbValue::Int(Some(7)));
        // a row of a nested query carries both keys prefixed
        let nested_row = Tuple::default()
            .with("k1.ID", text("99"))
            .with("Roles2.RoleID", DbValue::BigInt(Some(7)));
        assert_eq!(child.owning_row_key(&role_row), child.target_row_key(&nested_row));
        assert_eq!(child.owning_row_key(&role_row).len(), 2);
    }

    #[test]
    fn missing_alias_reads_as_null() {
        let schema = schema();
        let root = NavigationKeyBuilder::root(schema.entity_type("Person").unwrap().clone());
        let key = root.target_row_key(&Tuple::default());
        assert_eq!(key.parts(), [KeyPart::Null]);
    }

    #[test]
    fn child_rejects_wrong_target() {
        let schema = schema();
        let person = schema.entity_type("Person").unwrap().clone();
        let nav = person.association_path("Roles", &schema).unwrap();
        let root = NavigationKeyBuilder::root(person.clone());
        let err = root.child(&nav, &person).unwrap_err();
        assert_eq!(err.status(), http::StatusCode::INTERNAL_SERVER_ERROR);
    }
}
