//! Core types for JSON-to-relational ingestion.
//!
//! This crate carries the pieces shared between the ingest engine and the
//! drivers that back it:
//!
//! - the column kind lattice and the sampling [`kind::KindDetector`]
//! - the schema model ([`schema::Table`], [`schema::Column`])
//! - the driver capability surface ([`driver::SqlDriver`])
//! - an in-memory driver for tests and embedding ([`mem::MemDriver`])

pub mod driver;
pub mod errors;
pub mod kind;
pub mod mem;
pub mod schema;

pub use driver::{ColumnType, InsertExecer, RecordMeta, SqlDriver};
pub use errors::{
    DriverError, DriverResult, IngestError, IngestResult, KindError,
};
pub use kind::{Kind, KindDetector, MungeFn};
pub use schema::{Column, Table};

/// The distinguished table name used for the single root table when
/// flattening a document into one table.
pub const MONOTABLE_NAME: &str = "data";
