//! Driver capability surface consumed by the ingest runner.
//!
//! The core is agnostic to the backing store: concrete SQL dialects live
//! behind [`SqlDriver`], injected by the caller. The connection is owned by
//! the runner and passed to the driver per call; only prepared-statement
//! handles may retain driver-internal state across calls.

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::errors::DriverResult;
use crate::kind::Kind;
use crate::schema::Table;

/// Declared type of one destination column, as reported by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnType {
    pub name: String,
    pub kind: Kind,
}

/// Metadata for a destination row shape, derived from [`ColumnType`]s.
/// Bound into each cached statement so value munging can consult the
/// declared kinds.
#[derive(Debug, Clone, Default)]
pub struct RecordMeta {
    cols: Vec<ColumnType>,
}

impl RecordMeta {
    pub fn new(cols: Vec<ColumnType>) -> Self {
        Self { cols }
    }

    pub fn names(&self) -> Vec<String> {
        self.cols.iter().map(|c| c.name.clone()).collect()
    }

    pub fn kind_of(&self, name: &str) -> Option<Kind> {
        self.cols.iter().find(|c| c.name == name).map(|c| c.kind)
    }
}

/// A prepared insert handle.
///
/// `munge` coerces values in place to the destination representation,
/// `exec` runs the insert. The owner must call `close` exactly once.
#[async_trait]
pub trait InsertExecer: Send {
    fn munge(&self, vals: &mut [Value]) -> DriverResult<()>;

    async fn exec(
        &mut self,
        cancel: &CancellationToken,
        vals: &[Value],
    ) -> DriverResult<u64>;

    async fn close(&mut self) -> DriverResult<()>;
}

#[async_trait]
pub trait SqlDriver: Send + Sync {
    type Conn: Send;
    type Execer: InsertExecer;

    async fn create_table(
        &self,
        cancel: &CancellationToken,
        conn: &mut Self::Conn,
        table: &Table,
    ) -> DriverResult<()>;

    async fn alter_table_add_column(
        &self,
        cancel: &CancellationToken,
        conn: &mut Self::Conn,
        table: &str,
        col: &str,
        kind: Kind,
    ) -> DriverResult<()>;

    /// Change the kinds of several columns in one batched call.
    /// `cols` and `kinds` are parallel slices.
    async fn alter_table_column_kinds(
        &self,
        cancel: &CancellationToken,
        conn: &mut Self::Conn,
        table: &str,
        cols: &[String],
        kinds: &[Kind],
    ) -> DriverResult<()>;

    async fn table_column_types(
        &self,
        cancel: &CancellationToken,
        conn: &mut Self::Conn,
        table: &str,
        cols: &[String],
    ) -> DriverResult<Vec<ColumnType>>;

    fn record_meta(
        &self,
        col_types: &[ColumnType],
    ) -> DriverResult<RecordMeta>;

    /// Prepare an insert of `n_rows` rows into `table`, binding `cols` in
    /// the given order.
    async fn prepare_insert(
        &self,
        cancel: &CancellationToken,
        conn: &mut Self::Conn,
        table: &str,
        cols: &[String],
        n_rows: usize,
    ) -> DriverResult<Self::Execer>;
}
