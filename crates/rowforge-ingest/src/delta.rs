//! Schema delta application.
//!
//! Reconciles the currently materialized schema against a newly inferred
//! one and drives the minimal create/alter sequence through the driver.
//! Columns are never dropped: ingestion must not destroy data when a later
//! batch omits a field.

use tokio_util::sync::CancellationToken;
use tracing::debug;

use rowforge_core::{IngestResult, Kind, SqlDriver, Table};

use crate::processor::IngestSchema;

/// Tables touched while applying a delta. `altered` drives statement-cache
/// eviction.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeltaOutcome {
    pub created: Vec<String>,
    pub altered: Vec<String>,
}

/// Apply the delta between `cur` and `new` to the target store.
///
/// With no prior schema every table in `new` is created. Otherwise tables
/// are partitioned into alters (present but changed) and creates (absent),
/// and alters run first: a new table is never a dependency of an existing
/// one, but an existing table may need altering before the current batch's
/// rows land.
pub async fn apply_schema_delta<D: SqlDriver>(
    drvr: &D,
    cancel: &CancellationToken,
    conn: &mut D::Conn,
    cur: Option<&IngestSchema>,
    new: &IngestSchema,
) -> IngestResult<DeltaOutcome> {
    let mut outcome = DeltaOutcome::default();

    let Some(cur) = cur else {
        for tbl in &new.tables {
            drvr.create_table(cancel, conn, tbl).await?;
            debug!(table = %tbl.name, "created table");
            outcome.created.push(tbl.name.clone());
        }
        return Ok(outcome);
    };

    let mut alter_tbls: Vec<(&Table, &Table)> = Vec::new();
    let mut create_tbls: Vec<&Table> = Vec::new();

    for new_tbl in &new.tables {
        match cur.table(&new_tbl.name) {
            None => create_tbls.push(new_tbl),
            Some(old_tbl) if old_tbl != new_tbl => {
                alter_tbls.push((old_tbl, new_tbl));
            }
            Some(_) => {}
        }
    }

    for (old_tbl, want_tbl) in alter_tbls {
        if exec_maybe_alter_table(drvr, cancel, conn, old_tbl, want_tbl)
            .await?
        {
            outcome.altered.push(want_tbl.name.clone());
        }
    }

    for tbl in create_tbls {
        drvr.create_table(cancel, conn, tbl).await?;
        debug!(table = %tbl.name, "created table");
        outcome.created.push(tbl.name.clone());
    }

    Ok(outcome)
}

/// Bring `old` up to `new`: batched kind alters first, then missing
/// columns one by one. Returns true when anything was changed.
async fn exec_maybe_alter_table<D: SqlDriver>(
    drvr: &D,
    cancel: &CancellationToken,
    conn: &mut D::Conn,
    old: &Table,
    new: &Table,
) -> IngestResult<bool> {
    if old == new {
        return Ok(false);
    }

    let mut create_cols = Vec::new();
    let mut alter_col_names: Vec<String> = Vec::new();
    let mut alter_col_kinds: Vec<Kind> = Vec::new();

    for new_col in &new.cols {
        match old.find_col(&new_col.name) {
            None => create_cols.push(new_col),
            Some(old_col) if old_col.kind != new_col.kind => {
                alter_col_names.push(new_col.name.clone());
                alter_col_kinds.push(new_col.kind);
            }
            Some(_) => {}
        }
    }

    let changed = !create_cols.is_empty() || !alter_col_names.is_empty();

    if !alter_col_names.is_empty() {
        drvr.alter_table_column_kinds(
            cancel,
            conn,
            &new.name,
            &alter_col_names,
            &alter_col_kinds,
        )
        .await?;
        debug!(table = %new.name, cols = ?alter_col_names, "altered column kinds");
    }

    for col in create_cols {
        drvr.alter_table_add_column(cancel, conn, &new.name, &col.name, col.kind)
            .await?;
        debug!(table = %new.name, col = %col.name, "added column");
    }

    Ok(changed)
}
