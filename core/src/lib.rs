//! Core library of the advance scoring pipeline.
//!
//! A five-stage batch that turns monthly subscriber source files into
//! risk-filtered cash-advance offers:
//!
//!   merge → features → segmentation → classification → risk scoring
//!
//! Every stage boundary is a file-backed checkpoint, so a run can be
//! partially re-executed from any stage. Given the same inputs, config,
//! and seed, the whole batch is byte-for-byte deterministic.

pub mod checkpoint;
pub mod classify;
pub mod config;
pub mod error;
pub mod features;
pub mod kmeans;
pub mod merge;
pub mod pipeline;
pub mod risk;
pub mod rng;
pub mod segmentation;
pub mod source;
pub mod types;

pub use config::WeightConfig;
pub use error::{PipelineError, PipelineResult};
pub use pipeline::{Pipeline, PipelineOptions, RunSummary, Stage};
