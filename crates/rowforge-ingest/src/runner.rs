//! Ingest runner: drives the outer loop per document dialect.
//!
//! One job is single-threaded cooperative: one scanner, one processor, one
//! statement cache. Suspension happens only at I/O (the source reader and
//! the driver), and every suspension observes the job's cancellation
//! token. The statement cache is closed on every exit path.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use metrics::{counter, histogram};
use serde_json::{Map, Value};
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use rowforge_config::IngestConfig;
use rowforge_core::{IngestError, IngestResult, SqlDriver};

use crate::delta::apply_schema_delta;
use crate::processor::{IngestSchema, Processor};
use crate::scan::{Dialect, ObjectScanner, cannot_be_json};
use crate::stmt_cache::StatementCache;

/// How many head bytes feed the not-JSON sanity gate.
const SANITY_HEAD_BYTES: usize = 4096;

/// Counters for one completed ingest job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub objects: u64,
    pub rows_inserted: u64,
    pub schema_deltas: u64,
}

struct JobState<D: SqlDriver> {
    proc: Processor,
    cache: StatementCache<D>,
    cur_schema: Option<Arc<IngestSchema>>,
    summary: IngestSummary,
}

/// One ingest job against a single destination.
pub struct IngestJob<D: SqlDriver> {
    drvr: D,
    cfg: IngestConfig,
    cancel: CancellationToken,
    job_id: Uuid,
}

impl<D: SqlDriver> IngestJob<D> {
    pub fn new(drvr: D, cfg: IngestConfig, cancel: CancellationToken) -> Self {
        Self {
            drvr,
            cfg,
            cancel,
            job_id: Uuid::new_v4(),
        }
    }

    /// Ingest exactly one top-level JSON object.
    pub async fn ingest_object<R>(
        &self,
        conn: &mut D::Conn,
        src: R,
    ) -> IngestResult<IngestSummary>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.run(conn, src, Dialect::Object).await
    }

    /// Ingest a top-level JSON array of objects, streaming element by
    /// element.
    pub async fn ingest_array<R>(
        &self,
        conn: &mut D::Conn,
        src: R,
    ) -> IngestResult<IngestSummary>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.run(conn, src, Dialect::Array).await
    }

    /// Ingest newline-delimited JSON: one object per line, blank lines
    /// ignored. Objects concatenated without newlines are accepted too.
    pub async fn ingest_lines<R>(
        &self,
        conn: &mut D::Conn,
        src: R,
    ) -> IngestResult<IngestSummary>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.run(conn, src, Dialect::Lines).await
    }

    async fn run<R>(
        &self,
        conn: &mut D::Conn,
        src: R,
        dialect: Dialect,
    ) -> IngestResult<IngestSummary>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut scanner = ObjectScanner::new(src);

        // Reject inputs that cannot be JSON before any parsing.
        let head = scanner.head(SANITY_HEAD_BYTES).await?;
        if cannot_be_json(head) {
            return Err(IngestError::Decode {
                details: "input does not look like JSON".into(),
            });
        }

        info!(job_id = %self.job_id, dialect = ?dialect, "ingest starting");

        let mut st = JobState::<D> {
            proc: Processor::new(&self.cfg),
            cache: StatementCache::new(),
            cur_schema: None,
            summary: IngestSummary::default(),
        };

        let res = match dialect {
            Dialect::Object => {
                self.run_object(&mut scanner, conn, &mut st).await
            }
            Dialect::Array => {
                self.run_array(&mut scanner, conn, &mut st).await
            }
            Dialect::Lines => {
                self.run_lines(&mut scanner, conn, &mut st).await
            }
        };

        // The cache is closed on every exit path, including errors.
        let close_res = st.cache.close().await;
        res?;
        close_res?;

        info!(
            job_id = %self.job_id,
            objects = st.summary.objects,
            rows = st.summary.rows_inserted,
            deltas = st.summary.schema_deltas,
            "ingest finished"
        );
        Ok(st.summary)
    }

    async fn run_object<R>(
        &self,
        scanner: &mut ObjectScanner<R>,
        conn: &mut D::Conn,
        st: &mut JobState<D>,
    ) -> IngestResult<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        let chunk = self.next_chunk(scanner).await?.ok_or_else(|| {
            IngestError::Decode {
                details: "expected a JSON object".into(),
            }
        })?;

        if scanner.peek_nonws().await?.is_some() {
            return Err(IngestError::Decode {
                details: "unexpected trailing content after object".into(),
            });
        }

        self.process_chunk(&chunk, st)?;
        self.flush(conn, st).await
    }

    async fn run_array<R>(
        &self,
        scanner: &mut ObjectScanner<R>,
        conn: &mut D::Conn,
        st: &mut JobState<D>,
    ) -> IngestResult<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        scanner.expect_byte(b'[').await?;

        let mut first = true;
        loop {
            let Some(b) = scanner.peek_nonws().await? else {
                return Err(IngestError::Decode {
                    details: "unterminated JSON array".into(),
                });
            };
            match b {
                b']' => {
                    scanner.bump();
                    break;
                }
                b',' if !first => {
                    scanner.bump();
                    continue;
                }
                _ => {}
            }

            let chunk = self.next_chunk(scanner).await?.ok_or_else(|| {
                IngestError::Decode {
                    details: "unterminated JSON array".into(),
                }
            })?;
            first = false;

            self.process_chunk(&chunk, st)?;
            self.maybe_flush(conn, st).await?;
        }

        if scanner.peek_nonws().await?.is_some() {
            return Err(IngestError::Decode {
                details: "unexpected trailing content after array".into(),
            });
        }

        self.final_flush(conn, st).await
    }

    async fn run_lines<R>(
        &self,
        scanner: &mut ObjectScanner<R>,
        conn: &mut D::Conn,
        st: &mut JobState<D>,
    ) -> IngestResult<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        loop {
            let Some(chunk) = self.next_chunk(scanner).await? else {
                break;
            };
            self.process_chunk(&chunk, st)?;
            self.maybe_flush(conn, st).await?;
        }
        self.final_flush(conn, st).await
    }

    /// Pull the next raw object chunk, bailing out on cancellation.
    async fn next_chunk<R>(
        &self,
        scanner: &mut ObjectScanner<R>,
    ) -> IngestResult<Option<Bytes>>
    where
        R: AsyncRead + Unpin + Send,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(IngestError::Cancelled),
            chunk = scanner.next_object() => chunk,
        }
    }

    fn process_chunk(
        &self,
        chunk: &[u8],
        st: &mut JobState<D>,
    ) -> IngestResult<()> {
        let obj: Map<String, Value> =
            serde_json::from_slice(chunk).map_err(|e| {
                IngestError::Decode {
                    details: e.to_string().into(),
                }
            })?;

        let dirty = st.proc.process_object(&obj, chunk)?;
        st.summary.objects += 1;
        counter!("rowforge_objects_total").increment(1);
        if dirty {
            debug!(job_id = %self.job_id, "schema dirty after object");
        }
        Ok(())
    }

    /// Flush when the processor reports dirty or the batch threshold is
    /// reached.
    async fn maybe_flush(
        &self,
        conn: &mut D::Conn,
        st: &mut JobState<D>,
    ) -> IngestResult<()> {
        if st.proc.is_dirty()
            || st.proc.pending_rows() >= self.cfg.batch_size
        {
            self.flush(conn, st).await?;
        }
        Ok(())
    }

    async fn final_flush(
        &self,
        conn: &mut D::Conn,
        st: &mut JobState<D>,
    ) -> IngestResult<()> {
        if st.proc.pending_rows() > 0 || st.proc.is_dirty() {
            self.flush(conn, st).await?;
        }
        Ok(())
    }

    /// Materialize the processor's observations: build the schema, apply
    /// the delta, evict stale statements, then drain pending rows.
    async fn flush(
        &self,
        conn: &mut D::Conn,
        st: &mut JobState<D>,
    ) -> IngestResult<()> {
        let start = Instant::now();

        let schema = Arc::new(st.proc.build_schema_flat()?);
        let outcome = apply_schema_delta(
            &self.drvr,
            &self.cancel,
            conn,
            st.cur_schema.as_deref(),
            &schema,
        )
        .await?;

        if !outcome.created.is_empty() || !outcome.altered.is_empty() {
            st.summary.schema_deltas += 1;
            counter!("rowforge_schema_deltas_total").increment(1);
        }
        for table in &outcome.altered {
            st.cache.evict_table(table).await?;
        }

        let mut insertions = st.proc.build_insertions_flat(&schema)?;
        for ins in &mut insertions {
            let n = st
                .cache
                .execute(&self.drvr, &self.cancel, conn, ins)
                .await?;
            st.summary.rows_inserted += n;
            counter!("rowforge_rows_inserted_total").increment(n);
        }

        st.proc.mark_schema_clean();
        st.proc.set_schema(Arc::clone(&schema));
        st.cur_schema = Some(schema);

        histogram!("rowforge_flush_seconds")
            .record(start.elapsed().as_secs_f64());
        debug!(
            job_id = %self.job_id,
            created = outcome.created.len(),
            altered = outcome.altered.len(),
            "flush complete"
        );
        Ok(())
    }
}
