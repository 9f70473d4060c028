//! Record reconciliation.
//!
//! Upserts a wanted set of records and reports, for every row of the
//! scope afterwards, whether it was created, updated, or is not wanted.
//! Nothing is deleted: rows reported as deleted are left for the caller.

use std::sync::Arc;

use indexmap::IndexMap;
use relsync_core::dml::KeySpec;
use relsync_core::model::BoundTable;
use relsync_core::query::Select;
use relsync_core::{Record, SqlValue};
use tracing::info;

use crate::error::Result;
use crate::executor::Executor;

type RowCallback = Box<dyn FnMut(&Record) + Send>;
type ChangeCallback = Box<dyn FnMut(&Record, &Record) + Send>;

/// Counts per category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Wanted rows that did not exist before.
    pub created: u64,
    /// Wanted rows that existed before.
    pub updated: u64,
    /// Rows of the scope that are not wanted.
    pub deleted: u64,
}

/// Reconciles the rows of one table, identified by a composite key.
pub struct Reconciler {
    table: Arc<BoundTable>,
    key: Vec<String>,
    scope: Select,
    on_created: Option<RowCallback>,
    on_updated: Option<ChangeCallback>,
    on_deleted: Option<RowCallback>,
}

impl Reconciler {
    /// Reconciles every row of `table` on the `key` columns.
    ///
    /// # Errors
    ///
    /// [`relsync_core::Error::UnknownColumn`] for a key column missing
    /// from the table.
    pub fn new(table: Arc<BoundTable>, key: &[&str]) -> Result<Self> {
        let key = key
            .iter()
            .map(|k| table.require_column(k).map(|c| c.name().to_owned()))
            .collect::<relsync_core::Result<Vec<_>>>()?;
        let scope = Select::new(Arc::clone(&table), &["*"])?;
        Ok(Self {
            table,
            key,
            scope,
            on_created: None,
            on_updated: None,
            on_deleted: None,
        })
    }

    /// Restricts the rows loaded before and after the upsert.
    #[must_use]
    pub fn scope(mut self, select: Select) -> Self {
        self.scope = select;
        self
    }

    /// Called with each created row as read back.
    #[must_use]
    pub fn on_created(mut self, f: impl FnMut(&Record) + Send + 'static) -> Self {
        self.on_created = Some(Box::new(f));
        self
    }

    /// Called with the row before and after the upsert.
    #[must_use]
    pub fn on_updated(mut self, f: impl FnMut(&Record, &Record) + Send + 'static) -> Self {
        self.on_updated = Some(Box::new(f));
        self
    }

    /// Called with each row of the scope that is not wanted.
    #[must_use]
    pub fn on_deleted(mut self, f: impl FnMut(&Record) + Send + 'static) -> Self {
        self.on_deleted = Some(Box::new(f));
        self
    }

    /// The composite key of a record: loose strings of the key columns.
    #[must_use]
    pub fn key_of(&self, record: &Record) -> String {
        self.key
            .iter()
            .map(|k| record.get(k).map_or_else(String::new, SqlValue::to_loose_string))
            .collect::<Vec<_>>()
            .join("\u{1f}")
    }

    async fn load(&self, exec: &mut Executor) -> Result<IndexMap<String, Record>> {
        let rows = exec.get_list(&self.scope).await?;
        Ok(rows.into_iter().map(|r| (self.key_of(&r), r)).collect())
    }

    /// Loads the scope, upserts `wanted`, reloads and classifies.
    ///
    /// # Errors
    ///
    /// Fails when a load or the upsert fails.
    pub async fn run(&mut self, exec: &mut Executor, wanted: &[Record]) -> Result<Reconciliation> {
        let before = self.load(exec).await?;
        exec.upsert(&self.table, wanted, &KeySpec::Columns(self.key.clone()))
            .await?;
        let after = self.load(exec).await?;

        let wanted: IndexMap<String, &Record> = wanted.iter().map(|r| (self.key_of(r), r)).collect();
        let mut counts = Reconciliation::default();
        for (key, row) in &after {
            match (wanted.contains_key(key), before.get(key)) {
                (true, None) => {
                    counts.created += 1;
                    if let Some(f) = self.on_created.as_mut() {
                        f(row);
                    }
                }
                (true, Some(old)) => {
                    counts.updated += 1;
                    if let Some(f) = self.on_updated.as_mut() {
                        f(old, row);
                    }
                }
                (false, _) => {
                    counts.deleted += 1;
                    if let Some(f) = self.on_deleted.as_mut() {
                        f(row);
                    }
                }
            }
        }
        info!(
            table = %self.table.name(),
            created = counts.created,
            updated = counts.updated,
            deleted = counts.deleted,
            "Reconciled"
        );
        Ok(counts)
    }
}
