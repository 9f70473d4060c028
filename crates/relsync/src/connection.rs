//! Database connections.
//!
//! A [`Connection`] runs SQL text with positional parameters that have
//! already been converted by the dialect. Rows come back untyped, with
//! the driver's column metadata, and are canonicalised by the executor.
//!
//! [`SqliteSession`] is the sqlx-backed implementation; tests substitute
//! recording doubles.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use relsync_core::dialect::ColumnMeta;
use relsync_core::physical::PhysicalType;
use relsync_core::SqlValue;
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqlitePool, SqliteRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};

/// One row as read from a cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    /// Result-set metadata, shared by every row of a cursor.
    pub columns: Arc<[ColumnMeta]>,
    /// Values in column order.
    pub values: Vec<SqlValue>,
}

impl RawRow {
    /// Builds a row from `(metadata, value)` pairs.
    #[must_use]
    pub fn new(cells: Vec<(ColumnMeta, SqlValue)>) -> Self {
        let (columns, values): (Vec<_>, Vec<_>) = cells.into_iter().unzip();
        Self {
            columns: columns.into(),
            values,
        }
    }
}

/// One live database connection, used by a single task at a time.
#[async_trait]
pub trait Connection: Send {
    /// Runs a statement and returns the number of affected rows.
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, sqlx::Error>;

    /// Runs a query and collects every row.
    async fn fetch_all(&mut self, sql: &str, params: &[SqlValue])
        -> Result<Vec<RawRow>, sqlx::Error>;

    /// Runs a query and streams its rows.
    fn stream<'a>(
        &'a mut self,
        sql: &'a str,
        params: &'a [SqlValue],
    ) -> BoxStream<'a, Result<RawRow, sqlx::Error>>;

    /// Starts a transaction.
    async fn begin(&mut self) -> Result<(), sqlx::Error> {
        self.execute("BEGIN", &[]).await.map(|_| ())
    }

    /// Commits the current transaction.
    async fn commit(&mut self) -> Result<(), sqlx::Error> {
        self.execute("COMMIT", &[]).await.map(|_| ())
    }

    /// Rolls the current transaction back.
    async fn rollback(&mut self) -> Result<(), sqlx::Error> {
        self.execute("ROLLBACK", &[]).await.map(|_| ())
    }
}

/// A pooled SQLite connection.
pub struct SqliteSession {
    conn: PoolConnection<Sqlite>,
}

impl SqliteSession {
    /// Acquires a connection from `pool`.
    ///
    /// # Errors
    ///
    /// Fails when the pool cannot hand out a connection.
    pub async fn acquire(pool: &SqlitePool) -> Result<Self, sqlx::Error> {
        Ok(Self {
            conn: pool.acquire().await?,
        })
    }
}

fn bind_all<'q>(sql: &'q str, params: &[SqlValue]) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    let mut query = sqlx::query(sql);
    for param in params {
        query = match param {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Bool(b) => query.bind(*b),
            SqlValue::Int(i) => query.bind(*i),
            SqlValue::Float(f) => query.bind(*f),
            SqlValue::Text(s) | SqlValue::Decimal(s) => query.bind(s.clone()),
            SqlValue::Blob(b) => query.bind(b.clone()),
        };
    }
    query
}

/// Maps the declared type sqlx reports for a result column.
fn column_meta(name: &str, declared: &str) -> ColumnMeta {
    let ty = match declared {
        "TEXT" => PhysicalType::Clob,
        "INTEGER" | "BOOLEAN" => PhysicalType::Integer,
        "REAL" => PhysicalType::Real,
        "NUMERIC" => PhysicalType::Numeric,
        "BLOB" => PhysicalType::Blob,
        "DATE" => PhysicalType::Date,
        "DATETIME" => PhysicalType::Timestamp,
        _ => PhysicalType::Other,
    };
    ColumnMeta {
        name: name.to_owned(),
        ty,
        length: 0,
        scale: 0,
    }
}

fn raw_row(row: &SqliteRow, columns: &Arc<[ColumnMeta]>) -> Result<RawRow, sqlx::Error> {
    let mut values = Vec::with_capacity(row.len());
    for i in 0..row.len() {
        let raw = row.try_get_raw(i)?;
        if raw.is_null() {
            values.push(SqlValue::Null);
            continue;
        }
        // Storage class of this value, whatever the declared type says.
        let storage = raw.type_info().name().to_owned();
        let value = match storage.as_str() {
            "INTEGER" => SqlValue::Int(row.try_get_unchecked::<i64, _>(i)?),
            "REAL" => SqlValue::Float(row.try_get_unchecked::<f64, _>(i)?),
            "BLOB" => SqlValue::Blob(row.try_get_unchecked::<Vec<u8>, _>(i)?),
            _ => SqlValue::Text(row.try_get_unchecked::<String, _>(i)?),
        };
        values.push(value);
    }
    Ok(RawRow {
        columns: Arc::clone(columns),
        values,
    })
}

fn metadata(row: &SqliteRow) -> Arc<[ColumnMeta]> {
    row.columns()
        .iter()
        .map(|c| column_meta(c.name(), c.type_info().name()))
        .collect()
}

#[async_trait]
impl Connection for SqliteSession {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, sqlx::Error> {
        let done = bind_all(sql, params).execute(&mut *self.conn).await?;
        Ok(done.rows_affected())
    }

    async fn fetch_all(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Vec<RawRow>, sqlx::Error> {
        let rows = bind_all(sql, params).fetch_all(&mut *self.conn).await?;
        let Some(first) = rows.first() else {
            return Ok(Vec::new());
        };
        let columns = metadata(first);
        rows.iter().map(|row| raw_row(row, &columns)).collect()
    }

    fn stream<'a>(
        &'a mut self,
        sql: &'a str,
        params: &'a [SqlValue],
    ) -> BoxStream<'a, Result<RawRow, sqlx::Error>> {
        let mut columns: Option<Arc<[ColumnMeta]>> = None;
        bind_all(sql, params)
            .fetch(&mut *self.conn)
            .map(move |row| {
                let row = row?;
                let meta = columns.get_or_insert_with(|| metadata(&row));
                raw_row(&row, meta)
            })
            .boxed()
    }
}
