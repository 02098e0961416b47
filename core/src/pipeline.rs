//! The pipeline engine, the heart of the advance scoring batch.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1. Merge           (sources → master table)
//!   2. Features        (master → analytical base table)
//!   3. Segmentation    (snapshot → clusters → segments)
//!   4. Classification  (segments → sized offers)
//!   5. RiskScoring     (offers → scored, HIGH filtered out)
//!
//! RULES:
//!   - Stages execute in the documented order, never reordered.
//!   - Each stage reads ONLY the prior stage's output.
//!   - Every stage boundary is a file-backed checkpoint; a later run
//!     can start from any stage whose input checkpoint exists.
//!   - A missing input checkpoint fails fast, it is never recomputed
//!     implicitly.
//!   - All randomness flows through StageRng slots.

use crate::{
    checkpoint::{self, Checkpoints},
    classify::{self, Recommendation},
    config::WeightConfig,
    error::{PipelineError, PipelineResult},
    features::{self, FeatureRecord},
    merge::{self, MasterRecord},
    risk::{self, ScoredRecommendation},
    segmentation::{self, SegmentRecord},
    source::FileSelection,
    types::{Month, RunId},
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Merge,
    Features,
    Segmentation,
    Classification,
    RiskScoring,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Merge,
        Stage::Features,
        Stage::Segmentation,
        Stage::Classification,
        Stage::RiskScoring,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Merge => "merge",
            Stage::Features => "features",
            Stage::Segmentation => "segmentation",
            Stage::Classification => "classification",
            Stage::RiskScoring => "risk_scoring",
        }
    }

    pub fn parse(token: &str) -> Option<Stage> {
        Stage::ALL.iter().copied().find(|s| s.name() == token)
    }
}

/// One run's inputs and switches.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub data_dir: PathBuf,
    pub out_dir: PathBuf,
    /// Months to ingest; empty means every month found on disk.
    pub months: Vec<Month>,
    /// Stages to execute this run; empty means all of them. Skipped
    /// stages are served from their existing checkpoints.
    pub stages: Vec<Stage>,
    /// Overrides the configured clustering seed when set.
    pub seed: Option<u64>,
    /// Wall-clock budget per stage; exceeding it fails the run.
    pub stage_budget_secs: Option<u64>,
    pub selection: FileSelection,
}

impl PipelineOptions {
    pub fn new(data_dir: impl Into<PathBuf>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            out_dir: out_dir.into(),
            months: Vec::new(),
            stages: Vec::new(),
            seed: None,
            stage_budget_secs: None,
            selection: FileSelection::new(),
        }
    }

    fn runs(&self, stage: Stage) -> bool {
        self.stages.is_empty() || self.stages.contains(&stage)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: &'static str,
    pub rows_out: usize,
    pub duration_ms: u128,
}

/// The run report serialized to run_summary.json.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub seed: u64,
    pub months: Vec<Month>,
    pub stages: Vec<StageReport>,
    pub segment_counts: BTreeMap<String, usize>,
    pub rule_counts: BTreeMap<String, usize>,
    pub tier_counts: BTreeMap<String, usize>,
    pub deliverable_offers: usize,
}

pub struct Pipeline {
    pub run_id: RunId,
    config: WeightConfig,
    options: PipelineOptions,
    paths: Checkpoints,
    reports: Vec<StageReport>,
    // In-memory hand-off between consecutive stages of one run.
    master: Option<Vec<MasterRecord>>,
    features: Option<Vec<FeatureRecord>>,
    segments: Option<Vec<SegmentRecord>>,
    recommendations: Option<Vec<Recommendation>>,
    scored: Option<Vec<ScoredRecommendation>>,
}

impl Pipeline {
    pub fn new(mut config: WeightConfig, options: PipelineOptions) -> PipelineResult<Self> {
        if let Some(seed) = options.seed {
            config.clustering.seed = seed;
        }
        config.validate()?;
        let run_id = chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
        let paths = Checkpoints::new(&options.out_dir);
        Ok(Self {
            run_id,
            config,
            options,
            paths,
            reports: Vec::new(),
            master: None,
            features: None,
            segments: None,
            recommendations: None,
            scored: None,
        })
    }

    /// Execute the selected stages in the documented order and write
    /// the run summary.
    pub fn run(&mut self) -> PipelineResult<RunSummary> {
        log::info!(
            "run={} seed={} stages={:?}",
            self.run_id,
            self.config.clustering.seed,
            self.options
                .stages
                .iter()
                .map(Stage::name)
                .collect::<Vec<_>>()
        );

        for stage in Stage::ALL {
            if !self.options.runs(stage) {
                continue;
            }
            let started = Instant::now();
            self.execute(stage)?;
            let duration_ms = started.elapsed().as_millis();
            let rows_out = self.rows_out(stage);
            log::info!("stage={} rows={} elapsed_ms={}", stage.name(), rows_out, duration_ms);
            self.reports.push(StageReport { stage: stage.name(), rows_out, duration_ms });

            if let Some(budget) = self.options.stage_budget_secs {
                if started.elapsed().as_secs() > budget {
                    return Err(PipelineError::StageTimeout {
                        stage: stage.name(),
                        budget_secs: budget,
                    });
                }
            }
        }

        let summary = self.summarize()?;
        checkpoint::write_json(&self.paths.run_summary(), &summary)?;
        Ok(summary)
    }

    fn execute(&mut self, stage: Stage) -> PipelineResult<()> {
        match stage {
            Stage::Merge => {
                let master = merge::run(
                    &self.options.data_dir,
                    &self.options.months,
                    &self.options.selection,
                    &self.config,
                )?;
                checkpoint::write_csv(&self.paths.master(), &master)?;
                self.master = Some(master);
            }
            Stage::Features => {
                let master = self.master_input(stage.name())?;
                let rows = features::build(&master);
                checkpoint::write_csv(&self.paths.features(), &rows)?;
                self.master = Some(master);
                self.features = Some(rows);
            }
            Stage::Segmentation => {
                let rows = self.features_input(stage.name())?;
                let outcome = segmentation::run(&rows, &self.config)?;
                checkpoint::write_csv(&self.paths.segments(), &outcome.records)?;
                let targets: Vec<&segmentation::SegmentRecord> = outcome
                    .records
                    .iter()
                    .filter(|r| r.segment.is_expansion_target())
                    .collect();
                checkpoint::write_csv(&self.paths.expansion_targets(), &targets)?;
                checkpoint::write_json(
                    &self.paths.segment_summary(),
                    &serde_json::json!({
                        "clusters": outcome.clusters,
                        "segment_counts": outcome.segment_counts,
                        "expansion_ratio": outcome.expansion_ratio,
                        "inertia": outcome.inertia,
                        "converged": outcome.converged,
                    }),
                )?;
                self.features = Some(rows);
                self.segments = Some(outcome.records);
            }
            Stage::Classification => {
                let rows = self.features_input(stage.name())?;
                let segments = self.segments_input(stage.name())?;
                let recs = classify::run(&rows, &segments, &self.config);
                checkpoint::write_csv(&self.paths.recommendations(), &recs)?;
                self.features = Some(rows);
                self.segments = Some(segments);
                self.recommendations = Some(recs);
            }
            Stage::RiskScoring => {
                let recs = self.recommendations_input(stage.name())?;
                let scored = risk::run(&recs, &self.config.risk);
                let deliverable = risk::filter_deliverable(&scored);
                checkpoint::write_csv(&self.paths.scored(), &scored)?;
                checkpoint::write_csv(&self.paths.deliverable(), &deliverable)?;
                checkpoint::write_json(&self.paths.risk_summary(), &risk::summarize(&scored))?;
                self.recommendations = Some(recs);
                self.scored = Some(scored);
            }
        }
        Ok(())
    }

    fn rows_out(&self, stage: Stage) -> usize {
        match stage {
            Stage::Merge => self.master.as_ref().map_or(0, Vec::len),
            Stage::Features => self.features.as_ref().map_or(0, Vec::len),
            Stage::Segmentation => self.segments.as_ref().map_or(0, Vec::len),
            Stage::Classification => self.recommendations.as_ref().map_or(0, Vec::len),
            Stage::RiskScoring => self.scored.as_ref().map_or(0, Vec::len),
        }
    }

    fn master_input(&mut self, stage: &'static str) -> PipelineResult<Vec<MasterRecord>> {
        match self.master.take() {
            Some(rows) => Ok(rows),
            None => checkpoint::read_csv(stage, &self.paths.master()),
        }
    }

    fn features_input(&mut self, stage: &'static str) -> PipelineResult<Vec<FeatureRecord>> {
        match self.features.take() {
            Some(rows) => Ok(rows),
            None => checkpoint::read_csv(stage, &self.paths.features()),
        }
    }

    fn segments_input(&mut self, stage: &'static str) -> PipelineResult<Vec<SegmentRecord>> {
        match self.segments.take() {
            Some(rows) => Ok(rows),
            None => checkpoint::read_csv(stage, &self.paths.segments()),
        }
    }

    fn recommendations_input(&mut self, stage: &'static str) -> PipelineResult<Vec<Recommendation>> {
        match self.recommendations.take() {
            Some(rows) => Ok(rows),
            None => checkpoint::read_csv(stage, &self.paths.recommendations()),
        }
    }

    fn summarize(&self) -> PipelineResult<RunSummary> {
        let mut segment_counts = BTreeMap::new();
        let mut rule_counts = BTreeMap::new();
        let mut tier_counts = BTreeMap::new();
        let mut deliverable = 0usize;

        if let Some(segments) = &self.segments {
            for seg in segments {
                *segment_counts.entry(seg.segment.to_string()).or_insert(0) += 1;
            }
        }
        if let Some(scored) = &self.scored {
            for rec in scored {
                *rule_counts.entry(rec.rule.to_string()).or_insert(0) += 1;
                *tier_counts.entry(rec.risk_tier.to_string()).or_insert(0) += 1;
                if rec.risk_tier != crate::risk::RiskTier::High {
                    deliverable += 1;
                }
            }
        }

        Ok(RunSummary {
            run_id: self.run_id.clone(),
            seed: self.config.clustering.seed,
            months: self.options.months.clone(),
            stages: self.reports.clone(),
            segment_counts,
            rule_counts,
            tier_counts,
            deliverable_offers: deliverable,
        })
    }
}
