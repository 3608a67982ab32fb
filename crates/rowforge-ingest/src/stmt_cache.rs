//! Prepared-statement cache keyed by insertion fingerprint.
//!
//! Each entry binds a prepared 1-row insert handle to the destination's
//! record metadata. A schema delta on table `T` must evict every entry for
//! `T`; handles are closed exactly once, either at eviction or when the
//! cache is closed at end-of-ingest.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use rowforge_core::{IngestResult, InsertExecer, RecordMeta, SqlDriver};

use crate::insertion::Insertion;

struct CacheEntry<E> {
    table: String,
    execer: E,
    meta: RecordMeta,
}

pub struct StatementCache<D: SqlDriver> {
    entries: HashMap<String, CacheEntry<D::Execer>>,
}

impl<D: SqlDriver> Default for StatementCache<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: SqlDriver> StatementCache<D> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Munge and execute one insertion, preparing a statement on cache
    /// miss.
    pub async fn execute(
        &mut self,
        drvr: &D,
        cancel: &CancellationToken,
        conn: &mut D::Conn,
        ins: &mut Insertion,
    ) -> IngestResult<u64> {
        if let Some(entry) = self.entries.get_mut(&ins.fingerprint) {
            entry.execer.munge(&mut ins.vals)?;
            return Ok(entry.execer.exec(cancel, &ins.vals).await?);
        }

        let col_types = drvr
            .table_column_types(cancel, conn, &ins.table, &ins.cols)
            .await?;
        let meta = drvr.record_meta(&col_types)?;
        let execer = drvr
            .prepare_insert(cancel, conn, &ins.table, &ins.cols, 1)
            .await?;
        debug!(
            table = %ins.table,
            fingerprint = %ins.fingerprint,
            cols = meta.names().len(),
            "prepared insert statement"
        );

        let entry = self
            .entries
            .entry(ins.fingerprint.clone())
            .or_insert(CacheEntry {
                table: ins.table.clone(),
                execer,
                meta,
            });
        entry.execer.munge(&mut ins.vals)?;
        Ok(entry.execer.exec(cancel, &ins.vals).await?)
    }

    /// Close and drop every entry for `table`. Called after a schema delta
    /// altered the table, since the prepared handles' metadata is stale.
    pub async fn evict_table(&mut self, table: &str) -> IngestResult<()> {
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.table == table)
            .map(|(k, _)| k.clone())
            .collect();

        for key in stale {
            if let Some(mut entry) = self.entries.remove(&key) {
                entry.execer.close().await?;
                debug!(table = %table, fingerprint = %key, "evicted cached statement");
            }
        }
        Ok(())
    }

    /// Close every cached handle. Every close is attempted; the first
    /// failure is reported.
    pub async fn close(&mut self) -> IngestResult<()> {
        let mut first_err = None;
        for (_, mut entry) in self.entries.drain() {
            if let Err(err) = entry.execer.close().await {
                warn!(table = %entry.table, error = %err, "closing cached statement failed");
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
        }
        match first_err {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}
