//! Key predicates: `('99')` and `(BusinessPartnerID='6',RoleCategory='C')`.

use crate::ast::Value;
use crate::Error;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq)]
pub struct KeyValue {
    /// `None` only for the short form of a single-property key.
    pub name: Option<String>,
    pub value: Value,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct KeyPredicate(pub Vec<KeyValue>);

impl KeyPredicate {
    pub fn single(value: impl Into<Value>) -> Self {
        Self(vec![KeyValue {
            name: None,
            value: value.into(),
        }])
    }

    pub fn named<N: Into<String>, V: Into<Value>>(pairs: impl IntoIterator<Item = (N, V)>) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(n, v)| KeyValue {
                    name: Some(n.into()),
                    value: v.into(),
                })
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &KeyValue> {
        self.0.iter()
    }

    /// Parse the text between the parentheses of a key segment.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::InvalidKeyPredicate("empty key predicate".into()));
        }
        let parts = split_top_level(raw)?;
        if parts.len() == 1 && find_assignment(parts[0]).is_none() {
            return Ok(Self::single(Self::decode_value(parts[0])?));
        }
        let mut values = Vec::with_capacity(parts.len());
        for part in parts {
            let Some(eq) = find_assignment(part) else {
                return Err(Error::InvalidKeyPredicate(format!(
                    "composite key part without name: {part}"
                )));
            };
            let name = part[..eq].trim();
            if name.is_empty() {
                return Err(Error::InvalidKeyPredicate(format!("empty key name in: {part}")));
            }
            values.push(KeyValue {
                name: Some(name.to_string()),
                value: Self::decode_value(&part[eq + 1..])?,
            });
        }
        Ok(Self(values))
    }

    /// Decode one OData URL literal into a typed value.
    ///
    /// Quoted strings have their doubled apostrophes collapsed; unquoted literals are tried
    /// as null, boolean, guid, date-time, date, time and number in that order.
    pub fn decode_value(raw: &str) -> Result<Value, Error> {
        let raw = raw.trim();
        if let Some(rest) = raw.strip_prefix('\'') {
            let Some(inner) = rest.strip_suffix('\'') else {
                return Err(Error::InvalidLiteral(raw.to_string()));
            };
            return unescape_quoted(inner)
                .map(Value::String)
                .ok_or_else(|| Error::InvalidLiteral(raw.to_string()));
        }
        match raw {
            "null" => return Ok(Value::Null),
            "true" => return Ok(Value::Bool(true)),
            "false" => return Ok(Value::Bool(false)),
            _ => {}
        }
        if let Ok(u) = Uuid::parse_str(raw) {
            if raw.len() == 36 {
                return Ok(Value::Uuid(u));
            }
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Ok(Value::DateTime(dt.with_timezone(&Utc)));
        }
        if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            return Ok(Value::Date(d));
        }
        if raw.contains(':') {
            if let Ok(t) = NaiveTime::parse_from_str(raw, "%H:%M:%S%.f") {
                return Ok(Value::Time(t));
            }
        }
        BigDecimal::from_str(raw)
            .map(Value::Number)
            .map_err(|_| Error::InvalidLiteral(raw.to_string()))
    }

    /// Format back into the text placed between parentheses.
    pub fn format(&self) -> String {
        match self.0.as_slice() {
            [single] if single.name.is_none() => single.value.to_string(),
            values => values
                .iter()
                .map(|kv| match &kv.name {
                    Some(n) => format!("{n}={}", kv.value),
                    None => kv.value.to_string(),
                })
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

impl std::fmt::Display for KeyPredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({})", self.format())
    }
}

/* ---------- scanning helpers ---------- */

/// Split on commas that are not inside a quoted literal.
fn split_top_level(raw: &str) -> Result<Vec<&str>, Error> {
    let mut parts = Vec::new();
    let mut in_quote = false;
    let mut start = 0;
    for (i, c) in raw.char_indices() {
        match c {
            '\'' => in_quote = !in_quote,
            ',' if !in_quote => {
                parts.push(raw[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    if in_quote {
        return Err(Error::InvalidKeyPredicate(format!("unterminated literal in: {raw}")));
    }
    parts.push(raw[start..].trim());
    if parts.iter().any(|p| p.is_empty()) {
        return Err(Error::InvalidKeyPredicate(format!("empty key part in: {raw}")));
    }
    Ok(parts)
}

/// Position of the `=` separating name and value, ignoring quoted text.
fn find_assignment(part: &str) -> Option<usize> {
    let mut in_quote = false;
    for (i, c) in part.char_indices() {
        match c {
            '\'' => in_quote = !in_quote,
            '=' if !in_quote => return Some(i),
            _ => {}
        }
    }
    None
}

/// `O''Neil` → `O'Neil`; a lone apostrophe is malformed.
fn unescape_quoted(inner: &str) -> Option<String> {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\'' {
            if chars.peek() == Some(&'\'') {
                chars.next();
            } else {
                return None;
            }
        }
        out.push(c);
    }
    Some(out)
}
