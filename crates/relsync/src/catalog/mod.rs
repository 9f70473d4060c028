//! Catalog introspection.
//!
//! A [`Catalog`] reads the live schema into a [`PhysicalModel`] and, after
//! a synchronization, checks that the database accepted every object.

mod oracle;
mod sqlite;

pub use oracle::OracleCatalog;
pub use sqlite::SqliteCatalog;

use async_trait::async_trait;
use relsync_core::dialect::Dialect;
use relsync_core::model::Schema;
use relsync_core::physical::PhysicalModel;
use relsync_core::{Record, SqlValue};

use crate::error::Result;
use crate::executor::Executor;

/// Vendor-specific schema introspection.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Reads tables, views, columns, keys, foreign keys and triggers.
    async fn load(&self, exec: &mut Executor) -> Result<PhysicalModel>;

    /// Repairs and verifies the schema once every phase has run.
    async fn post_check(&self, _exec: &mut Executor, _schema: &Schema) -> Result<()> {
        Ok(())
    }
}

/// The catalog matching a dialect, by name.
#[must_use]
pub fn for_dialect(dialect: &dyn Dialect) -> Option<Box<dyn Catalog>> {
    match dialect.name() {
        "sqlite" => Some(Box::new(SqliteCatalog::new())),
        "oracle" => Some(Box::new(OracleCatalog::new())),
        _ => None,
    }
}

/// A column of a catalog row as a string, `""` when absent.
pub(crate) fn text(row: &Record, name: &str) -> String {
    row.get(name)
        .map_or_else(String::new, SqlValue::to_loose_string)
}

/// A column of a catalog row as a size, 0 when absent or negative.
pub(crate) fn size(row: &Record, name: &str) -> u32 {
    row.get(name)
        .and_then(SqlValue::to_i64)
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(0)
}

/// Stored default text, `None` when the column has no default.
pub(crate) fn stored_default(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("NULL") {
        None
    } else {
        Some(text.trim_end_matches(['\n', '\r']).to_owned())
    }
}
