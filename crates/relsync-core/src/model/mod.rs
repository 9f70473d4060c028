//! Logical schema model.
//!
//! A [`Model`] is assembled once from [`Table`] descriptions and then
//! compiled against a [`Dialect`](crate::dialect::Dialect) into an immutable
//! [`Schema`]. Only compiled tables can be rendered to SQL: reference
//! columns have no type until compilation resolves them.

mod column;
mod compile;
mod table;

pub use column::{Column, ColumnKind, ColumnType, DefaultValue};
pub use compile::{BoundColumn, BoundTable, Schema};
pub use table::{
    id_column, Key, OnCommit, Procedure, Table, TableKind, Temporality, TemporaryScope, Trigger,
};

use indexmap::IndexMap;

use crate::dialect::Dialect;
use crate::error::{Error, Result};

/// The set of tables, views and procedures an application wants.
#[derive(Debug, Clone, Default)]
pub struct Model {
    tables: IndexMap<String, Table>,
    procedures: IndexMap<String, Procedure>,
}

impl Model {
    /// Creates an empty model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a table or view.
    ///
    /// # Errors
    ///
    /// Fails when a relation with the same name is already registered.
    pub fn add(&mut self, table: Table) -> Result<&mut Self> {
        if self.tables.contains_key(&table.name) {
            return Err(Error::InvalidModel(format!(
                "{} is registered twice",
                table.name
            )));
        }
        self.tables.insert(table.name.clone(), table);
        Ok(self)
    }

    /// Registers a stored procedure.
    pub fn procedure(&mut self, procedure: Procedure) -> &mut Self {
        self.procedures.insert(procedure.name.clone(), procedure);
        self
    }

    /// Table or view by case-insensitive name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Table> {
        self.tables.get(&name.to_lowercase())
    }

    /// Tables and views in registration order.
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    /// Procedures in registration order.
    pub fn procedures(&self) -> impl Iterator<Item = &Procedure> {
        self.procedures.values()
    }

    /// Resolves references and binds every column to its physical
    /// projection for `dialect`.
    ///
    /// # Errors
    ///
    /// Fails on references to unknown tables or to tables without a
    /// single-column primary key, on reference cycles, and on primary or
    /// key columns that do not exist.
    pub fn compile(&self, dialect: &dyn Dialect) -> Result<Schema> {
        compile::compile(self, dialect)
    }
}
