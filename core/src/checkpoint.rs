//! File-backed stage checkpoints.
//!
//! RULE: Only checkpoint.rs touches the output root. Stages hand over
//! plain record vectors; this module decides where they live on disk
//! and in which format. Tabular checkpoints are CSV, summaries are
//! pretty-printed JSON.

use crate::error::{PipelineError, PipelineResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Path catalog for one run's output directory.
#[derive(Debug, Clone)]
pub struct Checkpoints {
    root: PathBuf,
}

impl Checkpoints {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn master(&self) -> PathBuf {
        self.root.join("master.csv")
    }

    pub fn features(&self) -> PathBuf {
        self.root.join("features.csv")
    }

    pub fn segments(&self) -> PathBuf {
        self.root.join("segments.csv")
    }

    pub fn expansion_targets(&self) -> PathBuf {
        self.root.join("expansion_targets.csv")
    }

    pub fn segment_summary(&self) -> PathBuf {
        self.root.join("segment_summary.json")
    }

    pub fn recommendations(&self) -> PathBuf {
        self.root.join("recommendations.csv")
    }

    pub fn scored(&self) -> PathBuf {
        self.root.join("scored_recommendations.csv")
    }

    pub fn deliverable(&self) -> PathBuf {
        self.root.join("final_recommendations.csv")
    }

    pub fn risk_summary(&self) -> PathBuf {
        self.root.join("risk_summary.json")
    }

    pub fn run_summary(&self) -> PathBuf {
        self.root.join("run_summary.json")
    }
}

/// Write rows as a headered CSV, creating parent directories.
pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> PipelineResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    log::debug!("checkpoint wrote {} rows to {path:?}", rows.len());
    Ok(())
}

/// Read a checkpoint back. A missing file is a hard stage-input error,
/// not an empty result.
pub fn read_csv<T: DeserializeOwned>(stage: &'static str, path: &Path) -> PipelineResult<Vec<T>> {
    if !path.exists() {
        return Err(PipelineError::StageInputMissing { stage, path: path.to_path_buf() });
    }
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for result in reader.deserialize::<T>() {
        rows.push(result?);
    }
    Ok(rows)
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> PipelineResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}
