//! Statement executor.
//!
//! An [`Executor`] owns one [`Connection`] and one [`Dialect`]: it renders
//! queries and writes, binds parameters through the dialect, logs every
//! statement with its elapsed time, and canonicalises the rows it reads.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use indexmap::IndexMap;
use relsync_core::dialect::Dialect;
use relsync_core::dml::{Batch, KeySpec, TableWrite};
use relsync_core::model::BoundTable;
use relsync_core::query::Select;
use relsync_core::statement::LogLimits;
use relsync_core::{Record, SqlValue, Statement};
use tracing::{debug, info, warn};

use crate::connection::{Connection, RawRow};
use crate::error::{Result, SyncError};

/// Something that renders to a statement: a [`Select`] or a raw
/// [`Statement`].
pub trait ToStatement {
    /// The query itself.
    ///
    /// # Errors
    ///
    /// Fails when the query cannot be rendered.
    fn to_statement(&self, dialect: &dyn Dialect) -> relsync_core::Result<Statement>;

    /// A query returning the number of rows of [`ToStatement::to_statement`].
    ///
    /// # Errors
    ///
    /// Fails when the query cannot be rendered.
    fn to_count_statement(&self, dialect: &dyn Dialect) -> relsync_core::Result<Statement>;
}

impl ToStatement for Select {
    fn to_statement(&self, dialect: &dyn Dialect) -> relsync_core::Result<Statement> {
        dialect.select_statement(self)
    }

    fn to_count_statement(&self, dialect: &dyn Dialect) -> relsync_core::Result<Statement> {
        dialect.count_statement(self)
    }
}

impl ToStatement for Statement {
    fn to_statement(&self, _dialect: &dyn Dialect) -> relsync_core::Result<Statement> {
        Ok(self.clone())
    }

    fn to_count_statement(&self, _dialect: &dyn Dialect) -> relsync_core::Result<Statement> {
        Ok(Statement::from_parts(
            format!("SELECT COUNT(*) FROM ({}) q", self.sql()),
            self.params().to_vec(),
        ))
    }
}

/// Rows removed and written by [`Executor::dupsert`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dupserted {
    /// Rows of the scope missing from the batch.
    pub deleted: u64,
    /// Rows inserted or updated.
    pub upserted: u64,
}

/// Runs statements on one connection.
pub struct Executor {
    conn: Box<dyn Connection>,
    dialect: Arc<dyn Dialect>,
    limits: LogLimits,
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn statement_error(st: &Statement, limits: LogLimits, source: sqlx::Error) -> SyncError {
    let sql = st.display(limits);
    warn!(error = %source, sql = %sql, "Statement failed");
    SyncError::Statement { sql, source }
}

fn to_record(dialect: &dyn Dialect, row: RawRow) -> Record {
    row.columns
        .iter()
        .zip(row.values)
        .map(|(meta, value)| (meta.name.to_lowercase(), dialect.read_value(meta, value)))
        .collect()
}

impl Executor {
    /// Creates an executor.
    #[must_use]
    pub fn new(conn: Box<dyn Connection>, dialect: Arc<dyn Dialect>) -> Self {
        Self {
            conn,
            dialect,
            limits: LogLimits::default(),
        }
    }

    /// Sets the limits applied when parameters are logged.
    #[must_use]
    pub const fn log_limits(mut self, limits: LogLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Returns the dialect.
    #[must_use]
    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    /// Returns a shared handle on the dialect.
    #[must_use]
    pub fn dialect_arc(&self) -> Arc<dyn Dialect> {
        Arc::clone(&self.dialect)
    }

    fn bind(&self, st: &Statement) -> Vec<SqlValue> {
        st.params().iter().map(|p| self.dialect.bind_value(p)).collect()
    }

    // ---- raw execution ----

    /// Executes one statement and returns the affected row count.
    ///
    /// # Errors
    ///
    /// [`SyncError::Statement`] when the database rejects it.
    pub async fn execute(&mut self, st: &Statement) -> Result<u64> {
        let params = self.bind(st);
        let started = Instant::now();
        match self.conn.execute(st.sql(), &params).await {
            Ok(rows) => {
                debug!(
                    sql = %st.display(self.limits),
                    rows,
                    elapsed_ms = elapsed_ms(started),
                    "Executed"
                );
                Ok(rows)
            }
            Err(e) => Err(statement_error(st, self.limits, e)),
        }
    }

    /// Executes `batch` once per parameter row on the same connection.
    /// sqlx has no multi-row parameter binding, so a batch costs one
    /// round-trip per row.
    ///
    /// # Errors
    ///
    /// Stops at the first failing row.
    pub async fn execute_batch(&mut self, batch: &Batch) -> Result<u64> {
        let mut total = 0;
        for st in batch.statements() {
            total += self.execute(&st).await?;
        }
        Ok(total)
    }

    /// Runs a query and collects its rows.
    ///
    /// # Errors
    ///
    /// Fails when the query cannot be rendered or is rejected.
    pub async fn query<Q: ToStatement + ?Sized>(&mut self, query: &Q) -> Result<Vec<Record>> {
        let st = query.to_statement(self.dialect.as_ref())?;
        let params = self.bind(&st);
        let started = Instant::now();
        let rows = match self.conn.fetch_all(st.sql(), &params).await {
            Ok(rows) => rows,
            Err(e) => return Err(statement_error(&st, self.limits, e)),
        };
        debug!(
            sql = %st.display(self.limits),
            rows = rows.len(),
            elapsed_ms = elapsed_ms(started),
            "Fetched"
        );
        Ok(rows
            .into_iter()
            .map(|row| to_record(self.dialect.as_ref(), row))
            .collect())
    }

    // ---- read API ----

    /// Streams the rows of `query` into `f` and returns how many were
    /// seen. An error from `f` stops the cursor.
    ///
    /// # Errors
    ///
    /// Fails when the query is rejected or when `f` fails.
    pub async fn for_each<Q, F>(&mut self, query: &Q, mut f: F) -> Result<u64>
    where
        Q: ToStatement + ?Sized,
        F: FnMut(Record) -> Result<()> + Send,
    {
        let st = query.to_statement(self.dialect.as_ref())?;
        let params = self.bind(&st);
        let started = Instant::now();
        let mut seen = 0;
        let mut rows = self.conn.stream(st.sql(), &params);
        while let Some(row) = rows.next().await {
            let row = row.map_err(|e| statement_error(&st, self.limits, e))?;
            f(to_record(self.dialect.as_ref(), row))?;
            seen += 1;
        }
        debug!(
            sql = %st.display(self.limits),
            rows = seen,
            elapsed_ms = elapsed_ms(started),
            "Streamed"
        );
        Ok(seen)
    }

    /// Passes the first row of `query`, if any, to `f`. Returns whether a
    /// row was found.
    ///
    /// # Errors
    ///
    /// Fails when the query is rejected or when `f` fails.
    pub async fn for_first<Q, F>(&mut self, query: &Q, f: F) -> Result<bool>
    where
        Q: ToStatement + ?Sized,
        F: FnOnce(Record) -> Result<()> + Send,
    {
        match self.get_map(query).await? {
            Some(record) => f(record).map(|()| true),
            None => Ok(false),
        }
    }

    /// The first row of `query`.
    ///
    /// # Errors
    ///
    /// Fails when the query is rejected.
    pub async fn get_map<Q: ToStatement + ?Sized>(&mut self, query: &Q) -> Result<Option<Record>> {
        let st = query.to_statement(self.dialect.as_ref())?;
        let params = self.bind(&st);
        let first = self.conn.stream(st.sql(), &params).next().await;
        match first {
            None => Ok(None),
            Some(Err(e)) => Err(statement_error(&st, self.limits, e)),
            Some(Ok(row)) => {
                debug!(sql = %st.display(self.limits), "Fetched first row");
                Ok(Some(to_record(self.dialect.as_ref(), row)))
            }
        }
    }

    /// Every row of `query`.
    ///
    /// # Errors
    ///
    /// Fails when the query is rejected.
    pub async fn get_list<Q: ToStatement + ?Sized>(&mut self, query: &Q) -> Result<Vec<Record>> {
        self.query(query).await
    }

    /// The rows of `select` by the loose string of their primary key, or
    /// of their first column when the key is not selected.
    ///
    /// # Errors
    ///
    /// [`relsync_core::Error::VectorPrimaryKey`] unless the table has a
    /// scalar key, and query failures.
    pub async fn get_idx(&mut self, select: &Select) -> Result<IndexMap<String, Record>> {
        let pk = select.table().scalar_pk()?.name().to_owned();
        let rows = self.query(select).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let key = row
                    .get(&pk)
                    .or_else(|| row.first().map(|(_, v)| v))
                    .map(SqlValue::to_loose_string)
                    .unwrap_or_default();
                (key, row)
            })
            .collect())
    }

    /// The number of rows `query` would return, pagination ignored.
    ///
    /// # Errors
    ///
    /// Fails when the query is rejected.
    pub async fn get_count<Q: ToStatement + ?Sized>(&mut self, query: &Q) -> Result<u64> {
        let st = query.to_count_statement(self.dialect.as_ref())?;
        let count = self
            .get_map(&st)
            .await?
            .and_then(|row| row.first().and_then(|(_, v)| v.to_i64()))
            .unwrap_or(0);
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// The first column of the first row as a string, `""` when absent.
    ///
    /// # Errors
    ///
    /// Fails when the query is rejected.
    pub async fn get_string<Q: ToStatement + ?Sized>(&mut self, query: &Q) -> Result<String> {
        Ok(self
            .get_map(query)
            .await?
            .and_then(|row| row.first().map(|(_, v)| v.to_loose_string()))
            .unwrap_or_default())
    }

    // ---- mutations ----

    /// Inserts `records`.
    ///
    /// # Errors
    ///
    /// Stops at the first rejected row.
    pub async fn insert(&mut self, table: &BoundTable, records: &[Record]) -> Result<u64> {
        let write = TableWrite::new(table, records, &KeySpec::None)?;
        let batch = self.dialect.insert(&write);
        self.execute_batch(&batch).await
    }

    /// Inserts one record and returns the key the database generated.
    ///
    /// # Errors
    ///
    /// Fails for a table without a scalar key, on a dialect that cannot
    /// return generated keys, or when the insert is rejected.
    pub async fn insert_id(&mut self, table: &BoundTable, record: &Record) -> Result<SqlValue> {
        let key = table.scalar_pk()?.name().to_owned();
        let records = std::slice::from_ref(record);
        let write = TableWrite::new(table, records, &KeySpec::None)?;
        let st = self.dialect.insert_returning(&write, &key)?;
        let row = self.get_map(&st).await?;
        Ok(row
            .and_then(|r| r.into_iter().next().map(|(_, v)| v))
            .unwrap_or(SqlValue::Null))
    }

    /// Updates `records` matched on `key`.
    ///
    /// # Errors
    ///
    /// Fails when there is nothing to update, a record lacks a key column,
    /// or a row is rejected.
    pub async fn update(
        &mut self,
        table: &BoundTable,
        records: &[Record],
        key: &KeySpec,
    ) -> Result<u64> {
        let write = TableWrite::new(table, records, key)?;
        let batch = self.dialect.update(&write)?;
        self.execute_batch(&batch).await
    }

    /// Inserts or updates `records` matched on `key`.
    ///
    /// # Errors
    ///
    /// Fails for an empty key, a record lacking a key column, or a
    /// rejected row.
    pub async fn upsert(
        &mut self,
        table: &BoundTable,
        records: &[Record],
        key: &KeySpec,
    ) -> Result<u64> {
        let write = TableWrite::new(table, records, key)?;
        let batch = self.dialect.upsert(&write)?;
        self.execute_batch(&batch).await
    }

    /// Replaces the rows of one scope: rows matching `common` whose
    /// `discriminator` is not in `records` are deleted, then every record,
    /// completed with `common`, is upserted on the discriminator plus the
    /// common columns.
    ///
    /// The two steps are separate statements; wrap the call in a
    /// transaction to make them atomic.
    ///
    /// # Errors
    ///
    /// Fails before deleting anything when a column is unknown or a record
    /// lacks the discriminator or holds NULL in it.
    pub async fn dupsert(
        &mut self,
        table: &Arc<BoundTable>,
        common: &Record,
        records: &[Record],
        discriminator: &str,
    ) -> Result<Dupserted> {
        let disc = table.require_column(discriminator)?.name().to_owned();
        let merged: Vec<Record> = records
            .iter()
            .map(|r| {
                let mut r = r.clone();
                r.extend(common.iter().map(|(k, v)| (k.clone(), v.clone())));
                r
            })
            .collect();
        let key = KeySpec::columns(std::iter::once(disc.clone()).chain(common.keys().cloned()));
        let write = TableWrite::new(table, &merged, &key)?;
        write.require_keys()?;
        if merged.iter().any(|r| r.get(&disc) == Some(&SqlValue::Null)) {
            return Err(relsync_core::Error::NullKey {
                table: table.name().to_owned(),
                column: disc,
            }
            .into());
        }
        let batch = self.dialect.upsert(&write)?;

        let mut scope = Select::new(Arc::clone(table), &[])?;
        for (name, value) in common {
            scope = if *value == SqlValue::Null {
                scope.and_is(&format!("{name} IS NULL"))?
            } else {
                scope.and(name, value.clone())?
            };
        }
        let kept: Vec<SqlValue> = merged
            .iter()
            .filter_map(|r| r.get(&disc).cloned())
            .collect();
        let scope = scope.and_all(&format!("{disc} NOT IN"), kept)?;

        let deleted = self.delete(&scope).await?;
        let upserted = self.execute_batch(&batch).await?;
        info!(table = %table.name(), deleted, upserted, "Dupserted");
        Ok(Dupserted { deleted, upserted })
    }

    /// Deletes the rows `select` matches.
    ///
    /// # Errors
    ///
    /// Fails when the statement cannot be rendered or is rejected.
    pub async fn delete(&mut self, select: &Select) -> Result<u64> {
        let st = self.dialect.delete_statement(select)?;
        self.execute(&st).await
    }

    /// Removes every row of `table`.
    ///
    /// # Errors
    ///
    /// Fails when the statement is rejected.
    pub async fn truncate(&mut self, table: &str) -> Result<u64> {
        let st = self.dialect.truncate(table);
        self.execute(&st).await
    }

    /// Upserts every row of `source` into `target`, server-side.
    ///
    /// # Errors
    ///
    /// Fails for an empty key or when the statement is rejected.
    pub async fn merge_table(
        &mut self,
        target: &BoundTable,
        source: &str,
        key: &[String],
    ) -> Result<u64> {
        let st = self.dialect.merge_table(target, source, key)?;
        self.execute(&st).await
    }

    // ---- transactions ----

    /// Starts a transaction.
    ///
    /// # Errors
    ///
    /// Fails when the database refuses.
    pub async fn begin(&mut self) -> Result<()> {
        debug!("BEGIN");
        self.conn.begin().await?;
        Ok(())
    }

    /// Commits the current transaction.
    ///
    /// # Errors
    ///
    /// Fails when the database refuses.
    pub async fn commit(&mut self) -> Result<()> {
        debug!("COMMIT");
        self.conn.commit().await?;
        Ok(())
    }

    /// Rolls the current transaction back.
    ///
    /// # Errors
    ///
    /// Fails when the database refuses.
    pub async fn rollback(&mut self) -> Result<()> {
        debug!("ROLLBACK");
        self.conn.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relsync_core::dialect::SqliteDialect;
    use relsync_core::model::{id_column, Column, ColumnType, Model, Schema, Table};
    use relsync_core::record;
    use sqlx::sqlite::SqlitePoolOptions;

    use crate::connection::SqliteSession;

    fn schema() -> Schema {
        let mut model = Model::new();
        model
            .add(
                Table::new("items", "Items")
                    .pk(id_column(ColumnType::Integer))
                    .unwrap()
                    .col(Column::new("label", ColumnType::String).length(20))
                    .unwrap()
                    .col(Column::new("qty", ColumnType::Integer).nullable())
                    .unwrap(),
            )
            .unwrap();
        model.compile(&SqliteDialect::new()).unwrap()
    }

    async fn executor() -> Executor {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory SQLite pool");
        let conn = SqliteSession::acquire(&pool).await.unwrap();
        let mut exec = Executor::new(Box::new(conn), Arc::new(SqliteDialect::new()));
        exec.execute(&Statement::new(
            "CREATE TABLE items (id INTEGER PRIMARY KEY, label VARCHAR(20) NOT NULL, qty INTEGER)",
        ))
        .await
        .unwrap();
        exec
    }

    #[tokio::test]
    async fn test_insert_then_read_back() {
        let schema = schema();
        let items = schema.table("items").unwrap();
        let mut exec = executor().await;
        let n = exec
            .insert(
                &items,
                &[
                    record! { "id" => 1, "label" => "bolt", "qty" => 5 },
                    record! { "id" => 2, "label" => "nut" },
                ],
            )
            .await
            .unwrap();
        assert_eq!(n, 2);

        let row = exec.get_map(&Select::by_id(items.clone(), 2).unwrap()).await.unwrap();
        let row = row.unwrap();
        assert_eq!(row["label"], SqlValue::Text(String::from("nut")));
        assert_eq!(row["qty"], SqlValue::Null);

        let all = Select::new(items, &["*"]).unwrap();
        assert_eq!(exec.get_count(&all).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_generated_key_is_returned() {
        let schema = schema();
        let items = schema.table("items").unwrap();
        let mut exec = executor().await;
        let id = exec
            .insert_id(&items, &record! { "label" => "washer" })
            .await
            .unwrap();
        assert_eq!(id, SqlValue::Int(1));
    }

    #[tokio::test]
    async fn test_failed_statement_carries_its_sql() {
        let mut exec = executor().await;
        let st = Statement::from_parts(
            "INSERT INTO missing (id) VALUES (?)",
            vec![relsync_core::Param::untyped(SqlValue::Int(3))],
        );
        let err = exec.execute(&st).await.unwrap_err();
        match err {
            SyncError::Statement { sql, .. } => {
                assert_eq!(sql, "INSERT INTO missing (id) VALUES (?) [3]");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_raw_statement_count_wraps_the_query() {
        let mut exec = executor().await;
        exec.execute(&Statement::new(
            "INSERT INTO items (id, label) VALUES (1, 'a'), (2, 'b'), (3, 'c')",
        ))
        .await
        .unwrap();
        let st = Statement::from_parts(
            "SELECT id FROM items WHERE id > ?",
            vec![relsync_core::Param::untyped(SqlValue::Int(1))],
        );
        assert_eq!(exec.get_count(&st).await.unwrap(), 2);
        assert_eq!(
            exec.get_string(&Statement::new("SELECT label FROM items WHERE id = 3"))
                .await
                .unwrap(),
            "c"
        );
        assert_eq!(
            exec.get_string(&Statement::new("SELECT label FROM items WHERE id = 9"))
                .await
                .unwrap(),
            ""
        );
    }
}
