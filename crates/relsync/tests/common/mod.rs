#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use relsync::connection::{Connection, RawRow, SqliteSession};
use relsync::Executor;
use relsync_core::dialect::{ColumnMeta, Dialect, SqliteDialect};
use relsync_core::model::{
    id_column, Column, ColumnType, DefaultValue, Key, Model, Schema, Table,
};
use relsync_core::physical::PhysicalType;
use relsync_core::SqlValue;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

pub async fn pool() -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap()
}

pub async fn sqlite_executor(pool: &SqlitePool) -> Executor {
    let session = SqliteSession::acquire(pool).await.unwrap();
    Executor::new(Box::new(session), Arc::new(SqliteDialect::new()))
}

/// Organisations, their users and a view over active users.
pub fn directory() -> Model {
    let mut model = Model::new();
    model
        .add(
            Table::new("orgs", "Organisations")
                .pk(id_column(ColumnType::Integer))
                .unwrap()
                .col(Column::new("label", ColumnType::String).length(80))
                .unwrap()
                .col(
                    Column::new("active", ColumnType::Boolean)
                        .default_value(DefaultValue::Bool(true)),
                )
                .unwrap()
                .item(relsync_core::record! { "id" => 1, "label" => "Root", "active" => true }),
        )
        .unwrap()
        .add(
            Table::new("users", "Users")
                .pk(id_column(ColumnType::Integer))
                .unwrap()
                .ref_col(Column::reference("id_org", "orgs").nullable())
                .unwrap()
                .col(Column::new("label", ColumnType::String).length(80))
                .unwrap()
                .col(
                    Column::new("active", ColumnType::Boolean)
                        .default_value(DefaultValue::Bool(true)),
                )
                .unwrap()
                .col(Column::new("email", ColumnType::String).length(120).nullable())
                .unwrap()
                .unique(Key::new("email", ["email"])),
        )
        .unwrap()
        .add(
            Table::view(
                "vw_active_users",
                "Active users",
                "SELECT id, label FROM users WHERE active = 1",
            )
            .col(Column::new("id", ColumnType::Integer))
            .unwrap()
            .col(Column::new("label", ColumnType::String).length(80))
            .unwrap(),
        )
        .unwrap();
    model
}

/// Line items grouped under a parent, unique on `(code, parent_id)`.
pub fn items() -> Model {
    let mut model = Model::new();
    model
        .add(
            Table::new("items", "Items")
                .pk(id_column(ColumnType::Integer))
                .unwrap()
                .col(Column::new("parent_id", ColumnType::Integer).nullable())
                .unwrap()
                .col(Column::new("code", ColumnType::String).length(10))
                .unwrap()
                .col(Column::new("qty", ColumnType::Integer).nullable())
                .unwrap()
                .unique(Key::new("code_parent", ["code", "parent_id"])),
        )
        .unwrap()
        .add(
            Table::new("items_stage", "")
                .pk(id_column(ColumnType::Integer))
                .unwrap()
                .col(Column::new("parent_id", ColumnType::Integer).nullable())
                .unwrap()
                .col(Column::new("code", ColumnType::String).length(10))
                .unwrap()
                .col(Column::new("qty", ColumnType::Integer).nullable())
                .unwrap(),
        )
        .unwrap();
    model
}

pub fn compile(model: &Model, dialect: &dyn Dialect) -> Schema {
    model.compile(dialect).unwrap()
}

/// A row of a scripted result set.
pub fn row(cells: &[(&str, SqlValue)]) -> RawRow {
    RawRow::new(
        cells
            .iter()
            .map(|(name, value)| {
                let ty = match value {
                    SqlValue::Int(_) => PhysicalType::Integer,
                    _ => PhysicalType::Clob,
                };
                let meta = ColumnMeta {
                    name: (*name).to_owned(),
                    ty,
                    length: 0,
                    scale: 0,
                };
                (meta, value.clone())
            })
            .collect(),
    )
}

pub fn text(s: &str) -> SqlValue {
    SqlValue::Text(s.to_owned())
}

#[derive(Default)]
struct Script {
    log: Vec<(String, Vec<SqlValue>)>,
    failures: Vec<(String, usize)>,
    responses: VecDeque<(String, Vec<RawRow>)>,
}

/// A connection double that records every statement.
///
/// Statements starting with a scripted prefix fail a given number of
/// times; queries starting with a scripted prefix return the scripted
/// rows once, in script order. Everything else succeeds with no rows.
#[derive(Clone, Default)]
pub struct Recorder {
    script: Arc<Mutex<Script>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    pub fn executor(&self, dialect: Arc<dyn Dialect>) -> Executor {
        Executor::new(Box::new(self.clone()), dialect)
    }

    /// Fails the next `times` statements starting with `prefix`.
    pub fn fail(&self, prefix: &str, times: usize) {
        self.lock().failures.push((prefix.to_owned(), times));
    }

    /// Answers the next query starting with `prefix`.
    pub fn respond(&self, prefix: &str, rows: Vec<RawRow>) {
        self.lock().responses.push_back((prefix.to_owned(), rows));
    }

    /// Every statement run so far.
    pub fn sqls(&self) -> Vec<String> {
        self.lock().log.iter().map(|(sql, _)| sql.clone()).collect()
    }

    /// Parameters of the statements run so far.
    pub fn params(&self) -> Vec<Vec<SqlValue>> {
        self.lock().log.iter().map(|(_, p)| p.clone()).collect()
    }

    fn run(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<RawRow>, sqlx::Error> {
        let mut script = self.lock();
        script.log.push((sql.to_owned(), params.to_vec()));
        if let Some(failure) = script
            .failures
            .iter_mut()
            .find(|(prefix, left)| *left > 0 && sql.starts_with(prefix.as_str()))
        {
            failure.1 -= 1;
            return Err(sqlx::Error::Protocol(format!("scripted failure: {sql}")));
        }
        let found = script
            .responses
            .iter()
            .position(|(prefix, _)| sql.starts_with(prefix.as_str()));
        Ok(found
            .and_then(|i| script.responses.remove(i))
            .map(|(_, rows)| rows)
            .unwrap_or_default())
    }
}

#[async_trait]
impl Connection for Recorder {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, sqlx::Error> {
        self.run(sql, params).map(|_| 0)
    }

    async fn fetch_all(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Vec<RawRow>, sqlx::Error> {
        self.run(sql, params)
    }

    fn stream<'a>(
        &'a mut self,
        sql: &'a str,
        params: &'a [SqlValue],
    ) -> BoxStream<'a, Result<RawRow, sqlx::Error>> {
        match self.run(sql, params) {
            Ok(rows) => stream::iter(rows.into_iter().map(Ok)).boxed(),
            Err(e) => stream::once(async move { Err(e) }).boxed(),
        }
    }
}
