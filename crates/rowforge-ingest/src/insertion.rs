//! Row insertions and statement fingerprinting.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// One pending row insert: table, ordered columns, ordered values, and the
/// fingerprint keying the prepared-statement cache.
#[derive(Debug, Clone, PartialEq)]
pub struct Insertion {
    pub fingerprint: String,
    pub table: String,
    pub cols: Vec<String>,
    pub vals: Vec<Value>,
}

impl Insertion {
    /// The only way to build an [`Insertion`]; it initializes the
    /// fingerprint.
    pub fn new(
        table: impl Into<String>,
        cols: Vec<String>,
        vals: Vec<Value>,
    ) -> Self {
        let table = table.into();
        Self {
            fingerprint: stmt_fingerprint(&table, &cols),
            table,
            cols,
            vals,
        }
    }
}

/// Deterministic checksum over `(table, column names)`.
///
/// Column names are sorted first, so two insertions with the same column
/// set share a fingerprint regardless of incoming key order. Hex-encoded
/// first 8 bytes of a SHA-256, like schema fingerprints elsewhere.
pub fn stmt_fingerprint(table: &str, cols: &[String]) -> String {
    let mut sorted: Vec<&str> = cols.iter().map(|c| c.as_str()).collect();
    sorted.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(table.as_bytes());
    hasher.update([0u8]);
    for col in sorted {
        hasher.update(col.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}
