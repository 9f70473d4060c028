//! Batch buffers.
//!
//! A [`Buffer`] collects records and writes them in batches of
//! `capacity`; [`Buffer::close`] writes what is left. A
//! [`StagedUpsertBuffer`] inserts into a staging table and periodically
//! merges it into the destination server-side.
//!
//! Buffers cannot flush from `Drop`: records still pending when a buffer
//! is dropped are lost, and a warning is logged.

use std::sync::Arc;

use futures::future::BoxFuture;
use relsync_core::dml::KeySpec;
use relsync_core::model::BoundTable;
use relsync_core::Record;
use tracing::{debug, warn};

use crate::error::Result;
use crate::executor::Executor;

/// The write a buffer performs on flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flush {
    /// `INSERT` every record.
    Insert,
    /// `UPDATE` matched on the key.
    Update(KeySpec),
    /// Insert-or-update matched on the key.
    Upsert(KeySpec),
}

type FlushCallback = Box<dyn FnMut(u64) + Send>;

/// Accumulates records and writes them in batches.
pub struct Buffer {
    table: Arc<BoundTable>,
    flush: Flush,
    capacity: usize,
    records: Vec<Record>,
    total: u64,
    on_flush: Option<FlushCallback>,
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("table", &self.table.name())
            .field("flush", &self.flush)
            .field("capacity", &self.capacity)
            .field("pending", &self.records.len())
            .field("total", &self.total)
            .finish_non_exhaustive()
    }
}

impl Buffer {
    /// Creates a buffer writing to `table` every `capacity` records.
    ///
    /// # Errors
    ///
    /// [`relsync_core::Error::InvalidCapacity`] when `capacity` is zero.
    pub fn new(table: Arc<BoundTable>, flush: Flush, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(relsync_core::Error::InvalidCapacity(format!(
                "buffer on {} needs a positive capacity",
                table.name()
            ))
            .into());
        }
        Ok(Self {
            table,
            flush,
            capacity,
            records: Vec::with_capacity(capacity),
            total: 0,
            on_flush: None,
        })
    }

    /// An insert buffer.
    ///
    /// # Errors
    ///
    /// See [`Buffer::new`].
    pub fn insert(table: Arc<BoundTable>, capacity: usize) -> Result<Self> {
        Self::new(table, Flush::Insert, capacity)
    }

    /// An update buffer keyed by `key`.
    ///
    /// # Errors
    ///
    /// See [`Buffer::new`].
    pub fn update(table: Arc<BoundTable>, key: KeySpec, capacity: usize) -> Result<Self> {
        Self::new(table, Flush::Update(key), capacity)
    }

    /// An upsert buffer keyed by `key`.
    ///
    /// # Errors
    ///
    /// See [`Buffer::new`].
    pub fn upsert(table: Arc<BoundTable>, key: KeySpec, capacity: usize) -> Result<Self> {
        Self::new(table, Flush::Upsert(key), capacity)
    }

    /// Calls `f` after every flush with the number of records written so
    /// far.
    #[must_use]
    pub fn on_flush(mut self, f: impl FnMut(u64) + Send + 'static) -> Self {
        self.on_flush = Some(Box::new(f));
        self
    }

    /// Target table.
    #[must_use]
    pub fn table(&self) -> &BoundTable {
        &self.table
    }

    /// Records waiting for the next flush.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.records.len()
    }

    /// Records written so far.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.total
    }

    /// Adds a record, flushing when the buffer is full.
    ///
    /// # Errors
    ///
    /// Fails when the flush fails; the batch is kept for a retry.
    pub async fn add(&mut self, exec: &mut Executor, record: Record) -> Result<()> {
        self.records.push(record);
        if self.records.len() >= self.capacity {
            self.flush(exec).await?;
        }
        Ok(())
    }

    /// Writes the pending records, if any.
    ///
    /// # Errors
    ///
    /// Fails when the write fails; the batch is kept for a retry.
    pub async fn flush(&mut self, exec: &mut Executor) -> Result<()> {
        if self.records.is_empty() {
            return Ok(());
        }
        match &self.flush {
            Flush::Insert => exec.insert(&self.table, &self.records).await?,
            Flush::Update(key) => exec.update(&self.table, &self.records, key).await?,
            Flush::Upsert(key) => exec.upsert(&self.table, &self.records, key).await?,
        };
        self.total += self.records.len() as u64;
        self.records.clear();
        debug!(table = %self.table.name(), total = self.total, "Flushed buffer");
        if let Some(f) = self.on_flush.as_mut() {
            f(self.total);
        }
        Ok(())
    }

    /// Writes the remaining records and returns the total written.
    ///
    /// # Errors
    ///
    /// Fails when the last flush fails.
    pub async fn close(mut self, exec: &mut Executor) -> Result<u64> {
        self.flush(exec).await?;
        Ok(self.total)
    }

    /// Runs `f` with the buffer, then closes it. Pending records are
    /// flushed even when `f` fails; its error is returned.
    ///
    /// # Errors
    ///
    /// The error of `f`, or of the final flush.
    pub async fn scoped<F>(mut self, exec: &mut Executor, f: F) -> Result<u64>
    where
        F: for<'b> FnOnce(&'b mut Self, &'b mut Executor) -> BoxFuture<'b, Result<()>>,
    {
        match f(&mut self, &mut *exec).await {
            Ok(()) => self.close(exec).await,
            Err(e) => {
                if let Err(flush) = self.flush(exec).await {
                    warn!(table = %self.table.name(), error = %flush, "Flush after failure failed");
                }
                Err(e)
            }
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if !self.records.is_empty() {
            warn!(
                table = %self.table.name(),
                lost = self.records.len(),
                "Buffer dropped without close"
            );
        }
    }
}

/// A two-level upsert buffer: records are inserted into a staging table
/// in batches of `capacity`; every `staging_capacity` staged records the
/// staging table is merged into the target and emptied.
///
/// The staging table must have the target's columns and must not be
/// written by anyone else while the buffer is open.
#[derive(Debug)]
pub struct StagedUpsertBuffer {
    staging: Buffer,
    target: Arc<BoundTable>,
    key: Vec<String>,
    staging_capacity: u64,
    next_merge: u64,
    merges: u64,
}

impl StagedUpsertBuffer {
    /// Opens the buffer, emptying the staging table first so rows left
    /// by an earlier run are never merged.
    ///
    /// # Errors
    ///
    /// [`relsync_core::Error::InvalidCapacity`] when a capacity is zero or
    /// `staging_capacity` is below `capacity`; otherwise fails when the
    /// staging table cannot be emptied.
    pub async fn open(
        exec: &mut Executor,
        staging: Arc<BoundTable>,
        target: Arc<BoundTable>,
        key: &KeySpec,
        capacity: usize,
        staging_capacity: usize,
    ) -> Result<Self> {
        let buffer = Self::new(staging, target, key, capacity, staging_capacity)?;
        let cleared = exec.truncate(buffer.staging.table().name()).await?;
        if cleared > 0 {
            debug!(
                staging = %buffer.staging.table().name(),
                cleared,
                "Emptied staging table"
            );
        }
        Ok(buffer)
    }

    fn new(
        staging: Arc<BoundTable>,
        target: Arc<BoundTable>,
        key: &KeySpec,
        capacity: usize,
        staging_capacity: usize,
    ) -> Result<Self> {
        if staging_capacity < capacity {
            return Err(relsync_core::Error::InvalidCapacity(format!(
                "staging capacity {staging_capacity} is below batch capacity {capacity}"
            ))
            .into());
        }
        let key = match key {
            KeySpec::None => Vec::new(),
            KeySpec::Primary => target.pk().to_vec(),
            KeySpec::Columns(columns) => columns.clone(),
        };
        let staging_capacity = staging_capacity as u64;
        Ok(Self {
            staging: Buffer::insert(staging, capacity)?,
            target,
            key,
            staging_capacity,
            next_merge: staging_capacity,
            merges: 0,
        })
    }

    /// Merges performed so far.
    #[must_use]
    pub const fn merges(&self) -> u64 {
        self.merges
    }

    /// Adds a record, staging and merging as capacities are reached.
    ///
    /// # Errors
    ///
    /// Fails when staging or merging fails.
    pub async fn add(&mut self, exec: &mut Executor, record: Record) -> Result<()> {
        self.staging.add(exec, record).await?;
        if self.staging.total() >= self.next_merge {
            self.merge(exec).await?;
        }
        Ok(())
    }

    async fn merge(&mut self, exec: &mut Executor) -> Result<()> {
        let staging = self.staging.table().name().to_owned();
        let merged = exec.merge_table(&self.target, &staging, &self.key).await?;
        exec.truncate(&staging).await?;
        self.merges += 1;
        self.next_merge = self.staging.total() + self.staging_capacity;
        debug!(
            target = %self.target.name(),
            staging = %staging,
            merged,
            "Merged staging table"
        );
        Ok(())
    }

    /// Stages the remaining records, merges once more and returns the
    /// total staged.
    ///
    /// # Errors
    ///
    /// Fails when staging or the final merge fails.
    pub async fn close(mut self, exec: &mut Executor) -> Result<u64> {
        self.staging.flush(exec).await?;
        self.merge(exec).await?;
        Ok(self.staging.total())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relsync_core::dialect::SqliteDialect;
    use relsync_core::model::{id_column, Column, ColumnType, Model, Table};

    fn table() -> Arc<BoundTable> {
        let mut model = Model::new();
        model
            .add(
                Table::new("t", "")
                    .pk(id_column(ColumnType::Integer))
                    .unwrap()
                    .col(Column::new("v", ColumnType::Integer))
                    .unwrap(),
            )
            .unwrap();
        model
            .compile(&SqliteDialect::new())
            .unwrap()
            .table("t")
            .unwrap()
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let err = Buffer::insert(table(), 0).unwrap_err();
        assert!(err.to_string().contains("positive capacity"));
    }

    #[test]
    fn test_staging_must_hold_a_batch() {
        let err = StagedUpsertBuffer::new(table(), table(), &KeySpec::Primary, 10, 5).unwrap_err();
        assert!(err.to_string().contains("below batch capacity"));
    }
}
