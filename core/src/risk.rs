//! Stage 5: additive bad-debt risk scoring and the final filter.
//!
//! Every recommendation starts at the base score and accumulates
//! signed deltas from four signal families: last-month topup coverage
//! of the offered amount, topup frequency, ARPU, and average topup
//! size. The free product gets relief on three of them because its
//! economics do not ride on direct repayment. HIGH-tier offers are
//! dropped from the final output.

use crate::classify::{ProductKind, Recommendation, RuleId};
use crate::config::RiskWeights;
use crate::segmentation::Segment;
use crate::types::Month;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskTier {
    #[serde(rename = "LOW")]
    Low,
    #[serde(rename = "MEDIUM")]
    Medium,
    #[serde(rename = "HIGH")]
    High,
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        })
    }
}

/// A recommendation with its risk verdict attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredRecommendation {
    pub isdn: String,
    pub month: Month,
    pub segment: Segment,
    pub rule: RuleId,
    pub product: ProductKind,
    pub recommended_amount: f64,
    pub expected_revenue: f64,
    pub usage_window_hours: i64,
    pub voice_sms_pct: f64,
    pub arpu_total: f64,
    pub topup_count_1m: f64,
    pub topup_amount_1m: f64,
    pub topup_count_2m: f64,
    pub avg_topup_amount: f64,
    pub reason: String,
    pub risk_score: f64,
    pub risk_tier: RiskTier,
}

/// Additive score for one recommendation.
pub fn score(rec: &Recommendation, w: &RiskWeights) -> f64 {
    let is_free = rec.product == ProductKind::Free;
    let mut score = w.base_score;

    // Coverage of the offered amount by last month's topups.
    if rec.topup_amount_1m >= rec.recommended_amount {
        score += w.coverage_full_delta;
    } else if rec.topup_amount_1m > 0.0 {
        score += w.coverage_partial_delta;
    } else {
        score += w.coverage_zero_delta;
        if is_free {
            score += w.free_zero_coverage_relief;
        }
    }

    // Topup frequency.
    if rec.topup_count_1m >= 3.0 {
        score += w.freq_high_delta;
    } else if rec.topup_count_1m >= 2.0 {
        score += w.freq_two_delta;
    } else if rec.topup_count_1m >= 1.0 {
        score += w.freq_one_delta;
    } else {
        score += w.freq_zero_delta;
    }

    // ARPU tier. The band between the floor and low thresholds is
    // deliberately neutral.
    if rec.arpu_total >= w.arpu_high_threshold {
        score += w.arpu_high_delta;
    } else if rec.arpu_total >= w.arpu_mid_threshold {
        score += w.arpu_mid_delta;
    } else if rec.arpu_total >= w.arpu_low_threshold {
        score += w.arpu_low_delta;
    } else if rec.arpu_total < w.arpu_floor_threshold {
        score += w.arpu_floor_delta;
    }
    if is_free && rec.arpu_total >= w.arpu_mid_threshold {
        score += w.free_arpu_bonus;
    }

    // Average topup size. Zero average is neutral, a tiny positive
    // average raises risk.
    if rec.avg_topup_amount >= w.avg_topup_high_threshold {
        score += w.avg_topup_high_delta;
    } else if rec.avg_topup_amount >= w.avg_topup_mid_threshold {
        score += w.avg_topup_mid_delta;
    } else if rec.avg_topup_amount >= w.avg_topup_low_threshold {
        score += w.avg_topup_low_delta;
    } else if rec.avg_topup_amount > 0.0 && rec.avg_topup_amount < w.avg_topup_tiny_threshold {
        score += w.avg_topup_tiny_delta;
    }
    if is_free && rec.avg_topup_amount >= w.avg_topup_low_threshold {
        score += w.free_avg_topup_bonus;
    }

    score
}

pub fn tier(score: f64, w: &RiskWeights) -> RiskTier {
    if score <= w.low_tier_max {
        RiskTier::Low
    } else if score <= w.medium_tier_max {
        RiskTier::Medium
    } else {
        RiskTier::High
    }
}

/// Score every recommendation, preserving input order.
pub fn run(recommendations: &[Recommendation], w: &RiskWeights) -> Vec<ScoredRecommendation> {
    recommendations
        .iter()
        .map(|rec| {
            let risk_score = score(rec, w);
            ScoredRecommendation {
                isdn: rec.isdn.clone(),
                month: rec.month,
                segment: rec.segment,
                rule: rec.rule,
                product: rec.product,
                recommended_amount: rec.recommended_amount,
                expected_revenue: rec.expected_revenue,
                usage_window_hours: rec.usage_window_hours,
                voice_sms_pct: rec.voice_sms_pct,
                arpu_total: rec.arpu_total,
                topup_count_1m: rec.topup_count_1m,
                topup_amount_1m: rec.topup_amount_1m,
                topup_count_2m: rec.topup_count_2m,
                avg_topup_amount: rec.avg_topup_amount,
                reason: rec.reason.clone(),
                risk_score,
                risk_tier: tier(risk_score, w),
            }
        })
        .collect()
}

/// Rollup written alongside the scored table.
#[derive(Debug, Clone, Serialize)]
pub struct RiskSummary {
    pub scored: usize,
    pub deliverable: usize,
    pub pass_rate: f64,
    pub tier_counts: BTreeMap<String, usize>,
    /// Expected revenue across the deliverable offers only.
    pub deliverable_revenue: f64,
}

pub fn summarize(scored: &[ScoredRecommendation]) -> RiskSummary {
    let mut tier_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut deliverable = 0usize;
    let mut deliverable_revenue = 0.0f64;
    for rec in scored {
        *tier_counts.entry(rec.risk_tier.to_string()).or_insert(0) += 1;
        if rec.risk_tier != RiskTier::High {
            deliverable += 1;
            deliverable_revenue += rec.expected_revenue;
        }
    }
    RiskSummary {
        scored: scored.len(),
        deliverable,
        pass_rate: if scored.is_empty() {
            0.0
        } else {
            deliverable as f64 / scored.len() as f64
        },
        tier_counts,
        deliverable_revenue,
    }
}

/// The final cut: HIGH-tier offers never ship.
pub fn filter_deliverable(scored: &[ScoredRecommendation]) -> Vec<ScoredRecommendation> {
    scored
        .iter()
        .filter(|r| r.risk_tier != RiskTier::High)
        .cloned()
        .collect()
}
