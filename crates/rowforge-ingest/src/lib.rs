//! Streaming JSON-to-relational ingestion.
//!
//! Consumes a heterogeneous JSON document (single object, array of objects,
//! or newline-delimited objects) of unknown structure, infers a relational
//! schema from the observed values, materializes that schema incrementally
//! through an injected [`rowforge_core::SqlDriver`], and inserts the values
//! as rows.
//!
//! # Example
//!
//! ```ignore
//! use rowforge_config::IngestConfig;
//! use rowforge_core::mem::{MemConn, MemDriver};
//! use rowforge_ingest::IngestJob;
//! use tokio_util::sync::CancellationToken;
//!
//! let job = IngestJob::new(MemDriver, IngestConfig::default(), CancellationToken::new());
//! let mut conn = MemConn::new();
//! let summary = job.ingest_lines(&mut conn, &b"{\"a\":1}\n{\"a\":2}\n"[..]).await?;
//! assert_eq!(summary.rows_inserted, 2);
//! ```

pub mod column_order;
pub mod delta;
pub mod entity;
pub mod insertion;
pub mod processor;
pub mod runner;
pub mod scan;
pub mod stmt_cache;

pub use delta::{DeltaOutcome, apply_schema_delta};
pub use entity::{Entity, EntityId, EntityTree};
pub use insertion::{Insertion, stmt_fingerprint};
pub use processor::{IngestSchema, ObjectValueSet, Processor};
pub use runner::{IngestJob, IngestSummary};
pub use scan::{Dialect, ObjectScanner, cannot_be_json, sniff_dialect};
pub use stmt_cache::StatementCache;
