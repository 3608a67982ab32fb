use std::borrow::Cow;
use thiserror::Error;

use crate::kind::Kind;

#[derive(Debug, Error)]
pub enum IngestError {
    /// A JSON field was observed in two incompatible roles
    /// (object vs. array, scalar vs. object).
    #[error("JSON entity {{{entity}}}: field {{{field}}} {details}")]
    StructuralConflict {
        entity: String,
        field: String,
        details: Cow<'static, str>,
    },

    /// Two distinct entities produced the same flattened column name
    /// within one object.
    #[error(
        "column {{{column}}} already exists, but found column with same name in {{{entity}}}"
    )]
    DuplicateColumn { entity: String, column: String },

    /// Malformed JSON, or an unexpected token where a field name was
    /// expected.
    #[error("JSON decode error: {details}")]
    Decode { details: Cow<'static, str> },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("kind detection failed: {details}")]
    KindDetection { details: Cow<'static, str> },

    #[error(transparent)]
    Driver(DriverError),

    #[error("unsupported operation: {details}")]
    Unsupported { details: Cow<'static, str> },

    #[error("operation cancelled")]
    Cancelled,
}

pub type IngestResult<T> = Result<T, IngestError>;

impl From<DriverError> for IngestError {
    fn from(err: DriverError) -> Self {
        // Cancellation is its own kind regardless of which layer noticed.
        match err {
            DriverError::Cancelled => IngestError::Cancelled,
            other => IngestError::Driver(other),
        }
    }
}

impl From<KindError> for IngestError {
    fn from(err: KindError) -> Self {
        IngestError::KindDetection {
            details: err.to_string().into(),
        }
    }
}

/// Failures surfaced by a driver implementation (DDL or DML).
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("DDL failed on table {{{table}}}: {details}")]
    Ddl {
        table: String,
        details: Cow<'static, str>,
    },

    #[error("insert failed on table {{{table}}}: {details}")]
    Insert {
        table: String,
        details: Cow<'static, str>,
    },

    #[error("table {{{0}}} not found")]
    UnknownTable(String),

    #[error("column {{{table}.{column}}} not found")]
    UnknownColumn { table: String, column: String },

    #[error(transparent)]
    Munge(#[from] KindError),
}

pub type DriverResult<T> = Result<T, DriverError>;

/// A value could not be represented as the kind a column requires.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KindError {
    #[error("value {value} cannot be represented as {kind}")]
    ValueNotRepresentable { kind: Kind, value: String },
}
