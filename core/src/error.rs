use std::path::PathBuf;
use thiserror::Error;

/// Pipeline-fatal errors.
///
/// Data-quality problems (a missing source folder, an unparseable numeric
/// field) are NOT represented here: they are recovered in place with the
/// documented defaults and never abort a stage. Only inter-stage problems
/// (a missing upstream checkpoint, an exceeded stage budget, I/O failure)
/// halt the run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Stage '{stage}' input checkpoint missing: {path:?}")]
    StageInputMissing { stage: &'static str, path: PathBuf },

    #[error("Stage '{stage}' exceeded its {budget_secs}s wall-clock budget")]
    StageTimeout { stage: &'static str, budget_secs: u64 },

    #[error("Stage '{stage}' produced an empty snapshot: nothing to process")]
    EmptySnapshot { stage: &'static str },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
