//! In-memory driver.
//!
//! Backs integration tests and embedders that want ingestion without an
//! external store. Tables live in a shared map behind a mutex; the
//! "connection" is a cheap clonable handle onto that map.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::driver::{ColumnType, InsertExecer, RecordMeta, SqlDriver};
use crate::errors::{DriverError, DriverResult, KindError};
use crate::kind::Kind;
use crate::schema::{Column, Table};

#[derive(Default)]
struct MemTable {
    cols: Vec<Column>,
    rows: Vec<Vec<Value>>,
}

#[derive(Default)]
struct MemDb {
    tables: HashMap<String, MemTable>,
}

/// Handle onto an in-memory database. Clones share the same storage.
#[derive(Clone, Default)]
pub struct MemConn {
    db: Arc<Mutex<MemDb>>,
}

impl MemConn {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a table's column definitions, in declared order.
    pub fn table_columns(&self, table: &str) -> Option<Vec<Column>> {
        let db = self.db.lock();
        db.tables.get(table).map(|t| t.cols.clone())
    }

    /// Snapshot of a table's rows. Each row is aligned to the table's
    /// current column order, with nulls for columns absent at insert time.
    pub fn rows(&self, table: &str) -> Option<Vec<Vec<Value>>> {
        let db = self.db.lock();
        db.tables.get(table).map(|t| t.rows.clone())
    }

    pub fn table_names(&self) -> Vec<String> {
        let db = self.db.lock();
        db.tables.keys().cloned().collect()
    }
}

/// Coerce a stored value to a column kind, mirroring what a SQL store
/// would do on ALTER COLUMN TYPE or on bind.
fn coerce(kind: Kind, val: &Value) -> DriverResult<Value> {
    if val.is_null() {
        return Ok(Value::Null);
    }

    let fail = || {
        DriverError::Munge(KindError::ValueNotRepresentable {
            kind,
            value: val.to_string(),
        })
    };

    match kind {
        Kind::Unknown | Kind::Null => Ok(val.clone()),
        Kind::Text => match val {
            Value::String(_) => Ok(val.clone()),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            other => serde_json::to_string(other)
                .map(Value::String)
                .map_err(|_| fail()),
        },
        Kind::Int => crate::kind::munge_int(val).map_err(DriverError::Munge),
        Kind::Float => match val {
            Value::Number(_) => Ok(val.clone()),
            _ => Err(fail()),
        },
        Kind::Bool => match val {
            Value::Bool(_) => Ok(val.clone()),
            _ => Err(fail()),
        },
        Kind::Date | Kind::Time | Kind::Datetime => match val {
            Value::String(_) => Ok(val.clone()),
            _ => Err(fail()),
        },
    }
}

fn check_cancel(cancel: &CancellationToken) -> DriverResult<()> {
    if cancel.is_cancelled() {
        return Err(DriverError::Cancelled);
    }
    Ok(())
}

pub struct MemDriver;

pub struct MemExecer {
    conn: MemConn,
    table: String,
    cols: Vec<String>,
    meta: RecordMeta,
    closed: bool,
}

#[async_trait]
impl InsertExecer for MemExecer {
    fn munge(&self, vals: &mut [Value]) -> DriverResult<()> {
        if vals.len() != self.cols.len() {
            return Err(DriverError::Insert {
                table: self.table.clone(),
                details: format!(
                    "expected {} values but got {}",
                    self.cols.len(),
                    vals.len()
                )
                .into(),
            });
        }
        for (i, col) in self.cols.iter().enumerate() {
            let kind =
                self.meta.kind_of(col).ok_or_else(|| {
                    DriverError::UnknownColumn {
                        table: self.table.clone(),
                        column: col.clone(),
                    }
                })?;
            vals[i] = coerce(kind, &vals[i])?;
        }
        Ok(())
    }

    async fn exec(
        &mut self,
        cancel: &CancellationToken,
        vals: &[Value],
    ) -> DriverResult<u64> {
        check_cancel(cancel)?;
        if self.closed {
            return Err(DriverError::Insert {
                table: self.table.clone(),
                details: "statement already closed".into(),
            });
        }
        if vals.len() != self.cols.len() {
            return Err(DriverError::Insert {
                table: self.table.clone(),
                details: format!(
                    "expected {} values but got {}",
                    self.cols.len(),
                    vals.len()
                )
                .into(),
            });
        }

        let mut db = self.conn.db.lock();
        let tbl = db
            .tables
            .get_mut(&self.table)
            .ok_or_else(|| DriverError::UnknownTable(self.table.clone()))?;

        // Align the bound columns to the table's current column order.
        let row: Vec<Value> = tbl
            .cols
            .iter()
            .map(|c| {
                self.cols
                    .iter()
                    .position(|b| *b == c.name)
                    .map(|i| vals[i].clone())
                    .unwrap_or(Value::Null)
            })
            .collect();
        tbl.rows.push(row);

        Ok(1)
    }

    async fn close(&mut self) -> DriverResult<()> {
        if self.closed {
            return Err(DriverError::Insert {
                table: self.table.clone(),
                details: "statement closed twice".into(),
            });
        }
        self.closed = true;
        Ok(())
    }
}

#[async_trait]
impl SqlDriver for MemDriver {
    type Conn = MemConn;
    type Execer = MemExecer;

    async fn create_table(
        &self,
        cancel: &CancellationToken,
        conn: &mut MemConn,
        table: &Table,
    ) -> DriverResult<()> {
        check_cancel(cancel)?;
        let mut db = conn.db.lock();
        if db.tables.contains_key(&table.name) {
            return Err(DriverError::Ddl {
                table: table.name.clone(),
                details: "table already exists".into(),
            });
        }
        db.tables.insert(
            table.name.clone(),
            MemTable {
                cols: table.cols.clone(),
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    async fn alter_table_add_column(
        &self,
        cancel: &CancellationToken,
        conn: &mut MemConn,
        table: &str,
        col: &str,
        kind: Kind,
    ) -> DriverResult<()> {
        check_cancel(cancel)?;
        let mut db = conn.db.lock();
        let tbl = db
            .tables
            .get_mut(table)
            .ok_or_else(|| DriverError::UnknownTable(table.to_string()))?;
        if tbl.cols.iter().any(|c| c.name == col) {
            return Err(DriverError::Ddl {
                table: table.to_string(),
                details: format!("column {col} already exists").into(),
            });
        }
        tbl.cols.push(Column::new(col, kind));
        for row in &mut tbl.rows {
            row.push(Value::Null);
        }
        Ok(())
    }

    async fn alter_table_column_kinds(
        &self,
        cancel: &CancellationToken,
        conn: &mut MemConn,
        table: &str,
        cols: &[String],
        kinds: &[Kind],
    ) -> DriverResult<()> {
        check_cancel(cancel)?;
        let mut db = conn.db.lock();
        let tbl = db
            .tables
            .get_mut(table)
            .ok_or_else(|| DriverError::UnknownTable(table.to_string()))?;

        for (col, kind) in cols.iter().zip(kinds) {
            let idx = tbl
                .cols
                .iter()
                .position(|c| c.name == *col)
                .ok_or_else(|| DriverError::UnknownColumn {
                    table: table.to_string(),
                    column: col.clone(),
                })?;
            tbl.cols[idx].kind = *kind;
            for row in &mut tbl.rows {
                row[idx] = coerce(*kind, &row[idx])?;
            }
        }
        Ok(())
    }

    async fn table_column_types(
        &self,
        cancel: &CancellationToken,
        conn: &mut MemConn,
        table: &str,
        cols: &[String],
    ) -> DriverResult<Vec<ColumnType>> {
        check_cancel(cancel)?;
        let db = conn.db.lock();
        let tbl = db
            .tables
            .get(table)
            .ok_or_else(|| DriverError::UnknownTable(table.to_string()))?;

        cols.iter()
            .map(|name| {
                tbl.cols
                    .iter()
                    .find(|c| c.name == *name)
                    .map(|c| ColumnType {
                        name: c.name.clone(),
                        kind: c.kind,
                    })
                    .ok_or_else(|| DriverError::UnknownColumn {
                        table: table.to_string(),
                        column: name.clone(),
                    })
            })
            .collect()
    }

    fn record_meta(
        &self,
        col_types: &[ColumnType],
    ) -> DriverResult<RecordMeta> {
        Ok(RecordMeta::new(col_types.to_vec()))
    }

    async fn prepare_insert(
        &self,
        cancel: &CancellationToken,
        conn: &mut MemConn,
        table: &str,
        cols: &[String],
        n_rows: usize,
    ) -> DriverResult<MemExecer> {
        check_cancel(cancel)?;
        if n_rows != 1 {
            return Err(DriverError::Insert {
                table: table.to_string(),
                details: "mem driver prepares single-row inserts only"
                    .into(),
            });
        }

        let col_types =
            self.table_column_types(cancel, conn, table, cols).await?;
        let meta = self.record_meta(&col_types)?;

        Ok(MemExecer {
            conn: conn.clone(),
            table: table.to_string(),
            cols: cols.to_vec(),
            meta,
            closed: false,
        })
    }
}
