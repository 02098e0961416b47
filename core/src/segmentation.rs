//! Stage 3: behavioral clustering and segment labeling.
//!
//! The latest month of the base table is snapshotted (one row per
//! subscriber), clustered on standardized behavioral features, and
//! each subscriber is mapped to a marketing segment:
//!   - any subscriber with advance history lands in GROUP_1_EXISTING
//!     no matter which cluster they fell into;
//!   - among never-advanced subscribers, the cluster with the highest
//!     advance-user rate is GROUP_2_SIMILAR, the lowest is
//!     GROUP_3_UNLIKELY, and everything between is GROUP_2_MEDIUM.

use crate::config::WeightConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::features::FeatureRecord;
use crate::kmeans::{self, KMeansModel};
use crate::rng::{StageRng, StageSlot};
use crate::types::Month;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Segment {
    #[serde(rename = "GROUP_1_EXISTING")]
    ExistingUser,
    #[serde(rename = "GROUP_2_SIMILAR")]
    SimilarToExisting,
    #[serde(rename = "GROUP_2_MEDIUM")]
    MediumPotential,
    #[serde(rename = "GROUP_3_UNLIKELY")]
    UnlikelyAdopter,
}

impl Segment {
    /// GROUP_2 segments are the marketing expansion targets; GROUP_1
    /// already uses the product and GROUP_3 is not worth the offer.
    pub fn is_expansion_target(self) -> bool {
        matches!(self, Self::SimilarToExisting | Self::MediumPotential)
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ExistingUser => "GROUP_1_EXISTING",
            Self::SimilarToExisting => "GROUP_2_SIMILAR",
            Self::MediumPotential => "GROUP_2_MEDIUM",
            Self::UnlikelyAdopter => "GROUP_3_UNLIKELY",
        };
        f.write_str(label)
    }
}

/// One subscriber's segment assignment in the latest-month snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentRecord {
    pub isdn: String,
    pub month: Month,
    pub cluster: u32,
    pub segment: Segment,
    /// Whether any month in the batch shows an advance for this line.
    pub is_advance_user: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterStat {
    pub cluster: u32,
    pub size: usize,
    pub advance_users: usize,
    pub advance_rate: f64,
}

/// Segmentation result plus the summary the run report serializes.
#[derive(Debug, Clone)]
pub struct SegmentationOutcome {
    pub records: Vec<SegmentRecord>,
    pub clusters: Vec<ClusterStat>,
    pub segment_counts: BTreeMap<String, usize>,
    /// Expansion targets (SIMILAR + MEDIUM) per existing advance user.
    pub expansion_ratio: f64,
    pub inertia: f64,
    pub converged: bool,
}

/// The behavioral columns the clustering sees. Advance columns stay
/// out so the geometry describes spend behavior, not the label.
fn cluster_features(rec: &FeatureRecord) -> Vec<f64> {
    vec![
        rec.arpu_total,
        rec.arpu_call + rec.arpu_sms,
        rec.arpu_data,
        rec.topup_count as f64,
        rec.total_topup_amount,
        rec.avg_topup_amount,
        rec.topup_count_3m,
        rec.topup_amount_3m,
        rec.num_packages as f64,
        rec.total_package_value,
        rec.avg_package_price,
        rec.estimated_balance,
        rec.burn_rate,
        rec.usage_record_count as f64,
        rec.tenure_days as f64,
    ]
}

/// Latest-month snapshot, one row per subscriber (first wins on
/// duplicates).
fn snapshot(features: &[FeatureRecord]) -> Vec<&FeatureRecord> {
    let Some(latest) = features.iter().map(|r| r.month).max() else {
        return Vec::new();
    };
    let mut seen: HashSet<&str> = HashSet::new();
    features
        .iter()
        .filter(|r| r.month == latest && seen.insert(r.isdn.as_str()))
        .collect()
}

/// Subscribers with an advance in any month of the batch.
fn advance_users(features: &[FeatureRecord]) -> HashSet<&str> {
    features
        .iter()
        .filter(|r| r.has_advance_in_month)
        .map(|r| r.isdn.as_str())
        .collect()
}

fn cluster_stats(model: &KMeansModel, k: usize, users: &[bool]) -> Vec<ClusterStat> {
    let mut stats: Vec<ClusterStat> = (0..k as u32)
        .map(|cluster| ClusterStat { cluster, size: 0, advance_users: 0, advance_rate: 0.0 })
        .collect();
    for (&cluster, &is_user) in model.assignments.iter().zip(users) {
        stats[cluster].size += 1;
        if is_user {
            stats[cluster].advance_users += 1;
        }
    }
    for stat in &mut stats {
        stat.advance_rate = if stat.size > 0 {
            stat.advance_users as f64 / stat.size as f64
        } else {
            0.0
        };
    }
    stats
}

/// Cluster → segment mapping for never-advanced subscribers, ranked
/// by advance rate. Works for any k ≥ 2: one SIMILAR, one UNLIKELY,
/// all middle clusters MEDIUM.
fn segment_map(stats: &[ClusterStat]) -> HashMap<u32, Segment> {
    let mut ranked: Vec<&ClusterStat> = stats.iter().collect();
    ranked.sort_by(|a, b| {
        b.advance_rate
            .total_cmp(&a.advance_rate)
            .then(a.cluster.cmp(&b.cluster))
    });
    let mut map = HashMap::new();
    for (rank, stat) in ranked.iter().enumerate() {
        let segment = if rank == 0 {
            Segment::SimilarToExisting
        } else if rank == ranked.len() - 1 {
            Segment::UnlikelyAdopter
        } else {
            Segment::MediumPotential
        };
        map.insert(stat.cluster, segment);
    }
    map
}

pub fn run(features: &[FeatureRecord], config: &WeightConfig) -> PipelineResult<SegmentationOutcome> {
    let snap = snapshot(features);
    if snap.is_empty() {
        return Err(PipelineError::EmptySnapshot { stage: "segmentation" });
    }
    let k = config.clustering.k;
    if snap.len() < k {
        return Err(PipelineError::InvalidConfig(format!(
            "clustering needs at least k={k} subscribers, snapshot has {}",
            snap.len()
        )));
    }

    let users = advance_users(features);
    let user_flags: Vec<bool> = snap.iter().map(|r| users.contains(r.isdn.as_str())).collect();

    let mut matrix: Vec<Vec<f64>> = snap.iter().map(|&r| cluster_features(r)).collect();
    kmeans::standardize(&mut matrix);

    let mut rng = StageRng::new(config.clustering.seed, StageSlot::Segmentation);
    let model = kmeans::fit(&matrix, &config.clustering, &mut rng);
    let stats = cluster_stats(&model, k, &user_flags);
    let map = segment_map(&stats);

    let records: Vec<SegmentRecord> = snap
        .iter()
        .zip(model.assignments.iter())
        .zip(user_flags.iter())
        .map(|((rec, &cluster), &is_user)| SegmentRecord {
            isdn: rec.isdn.clone(),
            month: rec.month,
            cluster: cluster as u32,
            segment: if is_user {
                Segment::ExistingUser
            } else {
                map[&(cluster as u32)]
            },
            is_advance_user: is_user,
        })
        .collect();

    for stat in &stats {
        log::info!(
            "stage=segmentation cluster={} size={} advance_rate={:.4}",
            stat.cluster,
            stat.size,
            stat.advance_rate
        );
    }

    let mut segment_counts: BTreeMap<String, usize> = BTreeMap::new();
    for rec in &records {
        *segment_counts.entry(rec.segment.to_string()).or_insert(0) += 1;
    }
    let existing = records.iter().filter(|r| r.is_advance_user).count();
    let targets = records.iter().filter(|r| r.segment.is_expansion_target()).count();
    let expansion_ratio = if existing > 0 {
        targets as f64 / existing as f64
    } else {
        0.0
    };

    Ok(SegmentationOutcome {
        records,
        clusters: stats,
        segment_counts,
        expansion_ratio,
        inertia: model.inertia,
        converged: model.converged,
    })
}
