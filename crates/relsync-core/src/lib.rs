//! # relsync-core
//!
//! A vendor-neutral relational schema model, a parameterized SQL builder and
//! the diff engine that converges a live database onto the model.
//!
//! This crate provides:
//! - A logical schema model compiled, per dialect, into an immutable
//!   [`model::Schema`] pairing every column with its physical projection
//! - A query builder with typed joins and a small predicate mini-language
//! - DML column partitioning for INSERT, UPDATE and UPSERT batches
//! - A [`dialect::Dialect`] trait with an ANSI baseline and the Oracle and
//!   SQLite dialects
//! - A synchronization [`sync::Planner`] diffing the compiled model against
//!   an introspected [`physical::PhysicalModel`]
//!
//! Nothing here performs I/O: every builder produces a
//! [`statement::Statement`], SQL text plus bound parameters.
//!
//! ## Building queries
//!
//! ```rust
//! use relsync_core::dialect::{Dialect, SqliteDialect};
//! use relsync_core::model::{id_column, Column, ColumnType, Model, Table};
//!
//! let mut model = Model::new();
//! model
//!     .add(
//!         Table::new("users", "Users")
//!             .pk(id_column(ColumnType::Integer))?
//!             .col(Column::new("label", ColumnType::String))?,
//!     )?;
//! let dialect = SqliteDialect::new();
//! let schema = model.compile(&dialect)?;
//!
//! let user_input = "'; DROP TABLE users; --";
//! let select = schema.select("users", &["label"])?.and("label", user_input)?;
//! let st = dialect.select_statement(&select)?;
//!
//! assert_eq!(st.sql(), "SELECT label \"label\" FROM users WHERE users.label=?");
//! assert_eq!(st.params().len(), 1);
//! # Ok::<(), relsync_core::Error>(())
//! ```
//!
//! ## Planning a synchronization
//!
//! ```rust
//! use relsync_core::dialect::SqliteDialect;
//! use relsync_core::model::{id_column, ColumnType, Model, Table};
//! use relsync_core::physical::PhysicalModel;
//! use relsync_core::sync::Planner;
//!
//! let mut model = Model::new();
//! model.add(Table::new("tags", "").pk(id_column(ColumnType::Integer))?)?;
//! let dialect = SqliteDialect::new();
//! let schema = model.compile(&dialect)?;
//!
//! let plan = Planner::new(&schema, &dialect).plan(&PhysicalModel::new())?;
//! assert_eq!(
//!     plan.tables[0].sql(),
//!     "CREATE TABLE tags (id INTEGER DEFAULT NULL NOT NULL,PRIMARY KEY (id))"
//! );
//! # Ok::<(), relsync_core::Error>(())
//! ```

pub mod dialect;
pub mod dml;
pub mod error;
pub mod model;
pub mod physical;
pub mod query;
pub mod statement;
pub mod sync;
pub mod value;

pub use error::{Error, Result};
pub use statement::{Param, Statement};
pub use value::{Record, SqlValue, ToSqlValue};
