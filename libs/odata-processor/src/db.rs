//! Database seams: statement execution, vendor-specific search and row-level access control.

use crate::error::Result;
use crate::query::filter::like_contains;
use crate::result::{ColumnSpec, Tuple};
use crate::schema::{Selector, StorageType, StructuredType};
use async_trait::async_trait;
use sea_orm::sea_query::{Alias, Expr, LikeExpr, SelectStatement, SimpleExpr};
use sea_orm::{Condition, ConnectionTrait, QueryResult};
use std::sync::Arc;

pub type DbValue = sea_orm::Value;

/// SQL NULL of any type.
pub fn is_null(value: &DbValue) -> bool {
    matches!(
        value,
        DbValue::Bool(None)
            | DbValue::TinyInt(None)
            | DbValue::SmallInt(None)
            | DbValue::Int(None)
            | DbValue::BigInt(None)
            | DbValue::TinyUnsigned(None)
            | DbValue::SmallUnsigned(None)
            | DbValue::Unsigned(None)
            | DbValue::BigUnsigned(None)
            | DbValue::Float(None)
            | DbValue::Double(None)
            | DbValue::String(None)
            | DbValue::Char(None)
            | DbValue::Bytes(None)
            | DbValue::Uuid(None)
            | DbValue::ChronoDate(None)
            | DbValue::ChronoTime(None)
            | DbValue::ChronoDateTime(None)
            | DbValue::ChronoDateTimeUtc(None)
            | DbValue::Decimal(None)
    )
}

/// Typed NULL for a storage type.
pub fn null_of(storage: StorageType) -> DbValue {
    match storage {
        StorageType::Bool => DbValue::Bool(None),
        StorageType::Int => DbValue::Int(None),
        StorageType::BigInt | StorageType::EpochMillis => DbValue::BigInt(None),
        StorageType::Double => DbValue::Double(None),
        StorageType::Decimal => DbValue::Decimal(None),
        StorageType::String => DbValue::String(None),
        StorageType::Char => DbValue::Char(None),
        StorageType::Uuid => DbValue::Uuid(None),
        StorageType::Date => DbValue::ChronoDate(None),
        StorageType::Time => DbValue::ChronoTime(None),
        StorageType::DateTime => DbValue::ChronoDateTime(None),
        StorageType::DateTimeUtc => DbValue::ChronoDateTimeUtc(None),
    }
}

/// A table (or collection table) joined under `alias`.
#[derive(Debug, Clone)]
pub struct TableScope {
    pub ty: Arc<StructuredType>,
    pub alias: String,
}

impl TableScope {
    pub fn new(ty: Arc<StructuredType>, alias: impl Into<String>) -> Self {
        Self {
            ty,
            alias: alias.into(),
        }
    }

    /// Column of the selector's leaf attribute under this alias.
    pub fn column(&self, sel: &Selector) -> SimpleExpr {
        self.column_named(sel.leaf().column_name())
    }

    pub fn column_named(&self, column: &str) -> SimpleExpr {
        Expr::col((Alias::new(&self.alias), Alias::new(column))).into()
    }
}

/// Runs a select and decodes the listed columns.
#[async_trait]
pub trait TupleExecutor: Send + Sync {
    async fn execute(&self, stmt: &SelectStatement, columns: &[ColumnSpec]) -> Result<Vec<Tuple>>;
}

/// Executor over any sea-orm connection.
pub struct SeaOrmExecutor<C> {
    conn: C,
}

impl<C> SeaOrmExecutor<C> {
    pub fn new(conn: C) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &C {
        &self.conn
    }
}

#[async_trait]
impl<C> TupleExecutor for SeaOrmExecutor<C>
where
    C: ConnectionTrait + Send + Sync,
{
    async fn execute(&self, stmt: &SelectStatement, columns: &[ColumnSpec]) -> Result<Vec<Tuple>> {
        let backend = self.conn.get_database_backend();
        let statement = backend.build(stmt);
        tracing::debug!(sql = %statement.sql, "executing query");
        let rows = self.conn.query_all(statement).await?;
        rows.iter().map(|row| decode_row(row, columns)).collect()
    }
}

fn decode_row(row: &QueryResult, columns: &[ColumnSpec]) -> Result<Tuple> {
    let mut tuple = Tuple::default();
    for col in columns {
        tuple.push(col.alias.clone(), decode(row, &col.alias, col.storage)?);
    }
    Ok(tuple)
}

fn decode(row: &QueryResult, alias: &str, storage: StorageType) -> Result<DbValue> {
    Ok(match storage {
        StorageType::Bool => DbValue::Bool(row.try_get("", alias)?),
        StorageType::Int => DbValue::Int(row.try_get("", alias)?),
        StorageType::BigInt | StorageType::EpochMillis => DbValue::BigInt(row.try_get("", alias)?),
        StorageType::Double => DbValue::Double(row.try_get("", alias)?),
        StorageType::Decimal => {
            let v: Option<rust_decimal::Decimal> = row.try_get("", alias)?;
            DbValue::Decimal(v.map(Box::new))
        }
        StorageType::String => {
            let v: Option<String> = row.try_get("", alias)?;
            DbValue::String(v.map(Box::new))
        }
        StorageType::Char => {
            let v: Option<String> = row.try_get("", alias)?;
            DbValue::Char(v.and_then(|s| s.chars().next()))
        }
        StorageType::Uuid => {
            let v: Option<uuid::Uuid> = row.try_get("", alias)?;
            DbValue::Uuid(v.map(Box::new))
        }
        StorageType::Date => {
            let v: Option<chrono::NaiveDate> = row.try_get("", alias)?;
            DbValue::ChronoDate(v.map(Box::new))
        }
        StorageType::Time => {
            let v: Option<chrono::NaiveTime> = row.try_get("", alias)?;
            DbValue::ChronoTime(v.map(Box::new))
        }
        StorageType::DateTime => {
            let v: Option<chrono::NaiveDateTime> = row.try_get("", alias)?;
            DbValue::ChronoDateTime(v.map(Box::new))
        }
        StorageType::DateTimeUtc => {
            let v: Option<chrono::DateTime<chrono::Utc>> = row.try_get("", alias)?;
            DbValue::ChronoDateTimeUtc(v.map(Box::new))
        }
    })
}

/// A column offered to `$search`.
#[derive(Debug, Clone)]
pub struct SearchColumn {
    pub expr: SimpleExpr,
    pub storage: StorageType,
    pub path: String,
}

/// Vendor-specific SQL fragments.
pub trait DatabaseProcessor: Send + Sync {
    /// Predicate matching `term` against one column; `None` skips the column.
    fn create_search_expression(&self, term: &str, column: &SearchColumn) -> Option<SimpleExpr> {
        let pattern = || LikeExpr::new(like_contains(term)).escape('\\');
        match column.storage {
            StorageType::String | StorageType::Char => {
                Some(Expr::expr(column.expr.clone()).like(pattern()))
            }
            StorageType::Int
            | StorageType::BigInt
            | StorageType::Double
            | StorageType::Decimal
            | StorageType::Uuid => Some(
                Expr::expr(column.expr.clone().cast_as(Alias::new("VARCHAR"))).like(pattern()),
            ),
            StorageType::Bool => match term.to_ascii_lowercase().as_str() {
                "true" | "1" => Some(Expr::expr(column.expr.clone()).eq(true)),
                "false" | "0" => Some(Expr::expr(column.expr.clone()).eq(false)),
                _ => None,
            },
            other => {
                tracing::warn!(
                    path = %column.path,
                    storage = %other,
                    "column type not supported by $search, skipped"
                );
                None
            }
        }
    }

    /// OR over the usable columns; `None` when no column can match.
    fn create_search_where_clause(&self, term: &str, columns: &[SearchColumn]) -> Option<Condition> {
        let parts: Vec<SimpleExpr> = columns
            .iter()
            .filter_map(|c| self.create_search_expression(term, c))
            .collect();
        if parts.is_empty() {
            return None;
        }
        Some(parts.into_iter().fold(Condition::any(), Condition::add))
    }
}

/// ANSI LIKE search.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultDatabaseProcessor;

impl DatabaseProcessor for DefaultDatabaseProcessor {}

/// Row-level restriction added to every query on an entity type.
pub trait DataAccessConditioner: Send + Sync {
    fn condition(&self, scope: &TableScope) -> Result<Option<Condition>>;
}
