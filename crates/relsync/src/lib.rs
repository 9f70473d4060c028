//! Converges a live relational database onto a declared schema and runs
//! parameterized queries against it.
//!
//! `relsync` is the runtime half of [`relsync_core`]:
//! - [`connection`] abstracts one database session; [`SqliteSession`] is
//!   the sqlx-backed implementation
//! - [`executor`] runs statements with SQL logging and provides the read
//!   and mutation API (insert, upsert, dupsert, merge, ...)
//! - [`buffer`] batches writes; [`reconcile`] reports created, updated and
//!   unwanted rows of an upsert
//! - [`catalog`] introspects SQLite and Oracle schemas
//! - [`sync`] executes a convergence plan phase by phase
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use relsync::prelude::*;
//! use relsync_core::dialect::SqliteDialect;
//! use relsync_core::model::{id_column, Column, ColumnType, Model, Table};
//!
//! let mut model = Model::new();
//! model.add(
//!     Table::new("tags", "Tags")
//!         .pk(id_column(ColumnType::Integer))?
//!         .col(Column::new("label", ColumnType::String).length(40))?,
//! )?;
//! let dialect = Arc::new(SqliteDialect::new());
//! let schema = model.compile(dialect.as_ref())?;
//!
//! let session = SqliteSession::acquire(&pool).await?;
//! let mut exec = Executor::new(Box::new(session), dialect);
//! SchemaSync::new(&schema, &SqliteCatalog::new()).run(&mut exec).await?;
//!
//! let tags = schema.table("tags")?;
//! exec.insert(&tags, &[record! { "id" => 1, "label" => "rust" }]).await?;
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Print the statements that would converge the database
//! relsync --model model.json plan
//!
//! # Apply them
//! relsync --database sqlite:app.db --model model.json sync
//!
//! # Dump the introspected schema
//! relsync --database sqlite:app.db inspect
//! ```

pub mod buffer;
pub mod catalog;
pub mod connection;
pub mod error;
pub mod executor;
pub mod model_file;
pub mod reconcile;
pub mod sync;

pub use connection::{Connection, RawRow, SqliteSession};
pub use error::{Result, SyncError};
pub use executor::Executor;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::buffer::{Buffer, Flush, StagedUpsertBuffer};
    pub use crate::catalog::{Catalog, OracleCatalog, SqliteCatalog};
    pub use crate::connection::{Connection, SqliteSession};
    pub use crate::error::{Result, SyncError};
    pub use crate::executor::{Dupserted, Executor, ToStatement};
    pub use crate::model_file::ModelFile;
    pub use crate::reconcile::{Reconciler, Reconciliation};
    pub use crate::sync::SchemaSync;
    pub use relsync_core::dml::KeySpec;
    pub use relsync_core::{record, Record, SqlValue, Statement};
}
