//! Filter expression tree shared by the option parsers and the SQL compiler.
//!
//! Member paths are kept as `/`-separated identifiers (`Address/Country`,
//! `Roles/$count`). Inside a lambda predicate the range variable is the first
//! segment of every identifier that refers to the lambda target (`r/RoleCategory`).

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::fmt;
use uuid::Uuid;

/// Path suffix addressing the number of related entities.
pub const COUNT_SEGMENT: &str = "$count";

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Compare(Box<Expr>, CompareOperator, Box<Expr>),
    In(Box<Expr>, Vec<Expr>),
    Function(String, Vec<Expr>),
    /// `Roles/any(r: r/RoleCategory eq 'A')`
    Lambda {
        path: String,
        kind: LambdaKind,
        variable: String,
        predicate: Box<Expr>,
    },
    Identifier(String),
    Value(Value),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOperator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LambdaKind {
    Any,
    All,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Value {
    Null,
    Bool(bool),
    Number(BigDecimal),
    Uuid(Uuid),
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
    String(String),
}

impl Expr {
    pub fn identifier(path: impl Into<String>) -> Self {
        Expr::Identifier(path.into())
    }

    pub fn value(value: impl Into<Value>) -> Self {
        Expr::Value(value.into())
    }

    pub fn compare(left: Expr, op: CompareOperator, right: Expr) -> Self {
        Expr::Compare(Box::new(left), op, Box::new(right))
    }

    pub fn and(self, other: Expr) -> Self {
        Expr::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Expr) -> Self {
        Expr::Or(Box::new(self), Box::new(other))
    }

    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    pub fn any(path: impl Into<String>, variable: impl Into<String>, predicate: Expr) -> Self {
        Expr::Lambda {
            path: path.into(),
            kind: LambdaKind::Any,
            variable: variable.into(),
            predicate: Box::new(predicate),
        }
    }

    pub fn all(path: impl Into<String>, variable: impl Into<String>, predicate: Expr) -> Self {
        Expr::Lambda {
            path: path.into(),
            kind: LambdaKind::All,
            variable: variable.into(),
            predicate: Box::new(predicate),
        }
    }

    /// The member path if this expression is a plain identifier.
    pub fn member_path(&self) -> Option<&str> {
        match self {
            Expr::Identifier(p) => Some(p.as_str()),
            _ => None,
        }
    }

    /// Whether any identifier in the tree addresses `$count` of a navigation.
    pub fn uses_count(&self) -> bool {
        match self {
            Expr::And(a, b) | Expr::Or(a, b) | Expr::Compare(a, _, b) => {
                a.uses_count() || b.uses_count()
            }
            Expr::Not(x) => x.uses_count(),
            Expr::In(l, list) => l.uses_count() || list.iter().any(Expr::uses_count),
            Expr::Function(_, args) => args.iter().any(Expr::uses_count),
            Expr::Lambda { .. } | Expr::Value(_) => false,
            Expr::Identifier(p) => p.rsplit('/').next() == Some(COUNT_SEGMENT),
        }
    }
}

impl CompareOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOperator::Eq => "eq",
            CompareOperator::Ne => "ne",
            CompareOperator::Gt => "gt",
            CompareOperator::Ge => "ge",
            CompareOperator::Lt => "lt",
            CompareOperator::Le => "le",
        }
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Uuid(_) => "uuid",
            Value::DateTime(_) => "datetime",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::String(_) => "string",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Number(BigDecimal::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Number(BigDecimal::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::DateTime(v)
    }
}

/// Renders the value as an OData URL literal (`'O''Neil'`, `42`, `null`).
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Uuid(u) => write!(f, "{}", u.hyphenated()),
            Value::DateTime(dt) => {
                f.write_str(&dt.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true))
            }
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Time(t) => write!(f, "{}", t.format("%H:%M:%S%.f")),
            Value::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}

/// JSON rendering used by the entity graph.
impl serde::Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use bigdecimal::ToPrimitive;
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) if n.is_integer() => match n.to_i64() {
                Some(i) => serializer.serialize_i64(i),
                None => serializer.serialize_str(&n.to_string()),
            },
            Value::Number(n) => match n.to_f64() {
                Some(x) => serializer.serialize_f64(x),
                None => serializer.serialize_str(&n.to_string()),
            },
            Value::String(s) => serializer.serialize_str(s),
            other => {
                let literal = other.to_string();
                serializer.serialize_str(&literal)
            }
        }
    }
}
