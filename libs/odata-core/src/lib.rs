//! Protocol-side OData types: filter AST, resource paths, query options, key literals
//! and the entity graph handed back to the serializer.

pub mod ast;
pub mod data;
pub mod key;
pub mod options;
pub mod path;

pub use data::{
    ComplexValue, Entity, EntityCollection, Inline, Link, Property, PropertyContainer,
    PropertyValue,
};
pub use key::{KeyPredicate, KeyValue};
pub use options::{
    parse_apply, parse_expand, parse_orderby, parse_select, AggregateExpr, AggregateMethod,
    ApplyItem, ExpandItem, OrderByItem, QueryOptions, SortDir,
};
pub use path::{ResourcePath, ResourceSegment};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("invalid $filter: {0}")]
    InvalidFilter(String),

    #[error("invalid $orderby: {0}")]
    InvalidOrderBy(String),

    #[error("invalid $select: {0}")]
    InvalidSelect(String),

    #[error("invalid $expand: {0}")]
    InvalidExpand(String),

    #[error("invalid $apply: {0}")]
    InvalidApply(String),

    #[error("invalid value '{value}' for {option}")]
    InvalidOptionValue { option: &'static str, value: String },

    #[error("invalid key predicate: {0}")]
    InvalidKeyPredicate(String),

    #[error("invalid literal: {0}")]
    InvalidLiteral(String),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ODataQuery(pub Option<Box<ast::Expr>>);

impl ODataQuery {
    pub fn none() -> Self {
        Self(None)
    }
    pub fn some(expr: ast::Expr) -> Self {
        Self(Some(Box::new(expr)))
    }
    pub fn as_ast(&self) -> Option<&ast::Expr> {
        self.0.as_deref()
    }
    pub fn into_ast(self) -> Option<ast::Expr> {
        self.0.map(|b| *b)
    }
    pub fn is_some(&self) -> bool {
        self.0.is_some()
    }
    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }
}

impl From<Option<ast::Expr>> for ODataQuery {
    fn from(opt: Option<ast::Expr>) -> Self {
        match opt {
            Some(e) => ODataQuery::some(e),
            None => ODataQuery::none(),
        }
    }
}

/// Parse a `$filter` string into the shared AST.
#[cfg(feature = "with-odata-params")]
pub fn parse_filter(raw: &str) -> Result<ODataQuery, Error> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(ODataQuery::none());
    }
    odata_params::filters::parse_str(raw)
        .map(|e| ODataQuery::some(e.into()))
        .map_err(|e| Error::InvalidFilter(format!("{e:?}")))
}

#[cfg(not(feature = "with-odata-params"))]
pub fn parse_filter(raw: &str) -> Result<ODataQuery, Error> {
    if raw.trim().is_empty() {
        return Ok(ODataQuery::none());
    }
    Err(Error::InvalidFilter(
        "filter text parsing needs the `with-odata-params` feature".into(),
    ))
}

#[cfg(feature = "with-odata-params")]
mod convert_odata_params {
    use super::ast::*;
    use odata_params::filters as od;

    impl From<od::CompareOperator> for CompareOperator {
        fn from(op: od::CompareOperator) -> Self {
            use od::CompareOperator::*;
            match op {
                Equal => CompareOperator::Eq,
                NotEqual => CompareOperator::Ne,
                GreaterThan => CompareOperator::Gt,
                GreaterOrEqual => CompareOperator::Ge,
                LessThan => CompareOperator::Lt,
                LessOrEqual => CompareOperator::Le,
            }
        }
    }

    impl From<od::Value> for Value {
        fn from(v: od::Value) -> Self {
            match v {
                od::Value::Null => Value::Null,
                od::Value::Bool(b) => Value::Bool(b),
                od::Value::Number(n) => Value::Number(n),
                od::Value::Uuid(u) => Value::Uuid(u),
                od::Value::DateTime(dt) => Value::DateTime(dt),
                od::Value::Date(d) => Value::Date(d),
                od::Value::Time(t) => Value::Time(t),
                od::Value::String(s) => Value::String(s),
            }
        }
    }

    // Member paths arrive with `/` separators already; lambdas are not produced by the parser.
    impl From<od::Expr> for Expr {
        fn from(e: od::Expr) -> Self {
            use od::Expr::*;
            match e {
                And(a, b) => Expr::And(Box::new((*a).into()), Box::new((*b).into())),
                Or(a, b) => Expr::Or(Box::new((*a).into()), Box::new((*b).into())),
                Not(x) => Expr::Not(Box::new((*x).into())),
                Compare(l, op, r) => {
                    Expr::Compare(Box::new((*l).into()), op.into(), Box::new((*r).into()))
                }
                In(l, list) => Expr::In(
                    Box::new((*l).into()),
                    list.into_iter().map(|x| x.into()).collect(),
                ),
                Function(n, args) => {
                    Expr::Function(n, args.into_iter().map(|x| x.into()).collect())
                }
                Identifier(s) => Expr::Identifier(s),
                Value(v) => Expr::Value(v.into()),
            }
        }
    }
}
