use std::fs;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Configuration for a single ingest job.
///
/// All fields have serde defaults so a config file only needs to name
/// the knobs it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// When true, fields of nested JSON objects are imported as columns of
    /// the single root table, with an underscore-scoped column name.
    /// When false, a multi-table schema is produced (not yet implemented).
    pub flatten: bool,

    /// Maximum number of values a single kind detector observes before it
    /// freezes its verdict.
    pub sample_size: usize,

    /// Maximum pending rows before an implicit flush.
    pub batch_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            flatten: true,
            sample_size: 256,
            batch_size: 500,
        }
    }
}

/// Load an [`IngestConfig`] from a YAML file, expanding `${ENV}` references.
pub fn load_from_path(path: &str) -> Result<IngestConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading config {path}"))?;
    let with_env = shellexpand::env(&raw)
        .with_context(|| "expanding env references")?
        .to_string();
    let cfg: IngestConfig =
        serde_yaml::from_str(&with_env).with_context(|| "parsing yaml")?;

    Ok(cfg)
}
