//! Column partitioning for INSERT, UPDATE and UPSERT.
//!
//! A [`TableWrite`] splits the columns touched by a set of records into key
//! and non-key columns, in table definition order, skipping virtual
//! columns. Dialects render it into a [`Batch`]: one SQL text executed once
//! per record.

use std::fmt;

use crate::error::{Error, Result};
use crate::model::BoundTable;
use crate::statement::{format_for_log, LogLimits, Param, Statement};
use crate::value::{Record, SqlValue};

/// Which columns identify a row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum KeySpec {
    /// No key: every column is written (INSERT).
    None,
    /// The table's primary key.
    #[default]
    Primary,
    /// An explicit list of columns.
    Columns(Vec<String>),
}

impl KeySpec {
    /// Explicit key columns.
    pub fn columns<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Columns(names.into_iter().map(Into::into).collect())
    }
}

/// Records to write into one table, with their column partition.
#[derive(Debug, Clone)]
pub struct TableWrite<'a> {
    table: &'a BoundTable,
    records: &'a [Record],
    key: Vec<String>,
    columns: Vec<String>,
}

impl<'a> TableWrite<'a> {
    /// Partitions the columns present in `records`.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownColumn`] for an explicit key column missing from
    /// the table.
    pub fn new(table: &'a BoundTable, records: &'a [Record], key: &KeySpec) -> Result<Self> {
        let key: Vec<String> = match key {
            KeySpec::None => Vec::new(),
            KeySpec::Primary => table.pk().to_vec(),
            KeySpec::Columns(names) => names
                .iter()
                .map(|n| table.require_column(n).map(|c| c.name().to_owned()))
                .collect::<Result<_>>()?,
        };
        let columns = table
            .columns()
            .filter(|c| !c.is_virtual())
            .map(|c| c.name())
            .filter(|name| !key.iter().any(|k| k.as_str() == *name))
            .filter(|name| records.iter().any(|r| r.contains_key(*name)))
            .map(str::to_owned)
            .collect();
        Ok(Self {
            table,
            records,
            key,
            columns,
        })
    }

    /// Target table.
    #[must_use]
    pub const fn table(&self) -> &BoundTable {
        self.table
    }

    /// The records.
    #[must_use]
    pub const fn records(&self) -> &[Record] {
        self.records
    }

    /// Key columns in key order.
    #[must_use]
    pub fn key_columns(&self) -> &[String] {
        &self.key
    }

    /// Non-key columns in table definition order.
    #[must_use]
    pub fn non_key_columns(&self) -> &[String] {
        &self.columns
    }

    /// Non-key columns followed by key columns.
    #[must_use]
    pub fn all_columns(&self) -> Vec<String> {
        self.columns.iter().chain(&self.key).cloned().collect()
    }

    /// Fails unless every record carries every key column.
    ///
    /// # Errors
    ///
    /// [`Error::MissingKey`] naming the first missing key column.
    pub fn require_keys(&self) -> Result<()> {
        for record in self.records {
            if let Some(k) = self.key.iter().find(|k| !record.contains_key(k.as_str())) {
                return Err(Error::MissingKey {
                    table: self.table.name().to_owned(),
                    column: k.clone(),
                });
            }
        }
        Ok(())
    }

    /// One parameter row per record, values in `columns` order; absent
    /// values bind as NULL.
    #[must_use]
    pub fn rows(&self, columns: &[String]) -> Vec<Vec<Param>> {
        self.records
            .iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|name| {
                        let value = record.get(name).cloned().unwrap_or(SqlValue::Null);
                        let ty = self.table.column(name).map(|c| c.physical().ty);
                        Param { value, ty }
                    })
                    .collect()
            })
            .collect()
    }
}

/// One SQL text with a parameter row per record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    sql: String,
    rows: Vec<Vec<Param>>,
}

impl Batch {
    /// Creates a batch.
    #[must_use]
    pub fn new(sql: impl Into<String>, rows: Vec<Vec<Param>>) -> Self {
        Self {
            sql: sql.into(),
            rows,
        }
    }

    /// The SQL text.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Parameter rows.
    #[must_use]
    pub fn rows(&self) -> &[Vec<Param>] {
        &self.rows
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether there is nothing to execute.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// One statement per row.
    pub fn statements(&self) -> impl Iterator<Item = Statement> + '_ {
        self.rows
            .iter()
            .map(|row| Statement::from_parts(self.sql.clone(), row.clone()))
    }
}

impl fmt::Display for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rows.as_slice() {
            [] => f.write_str(&self.sql),
            [row] => f.write_str(&format_for_log(
                &self.sql,
                row.iter().map(|p| &p.value),
                LogLimits::default(),
            )),
            rows => write!(f, "{} x{}", self.sql, rows.len()),
        }
    }
}
