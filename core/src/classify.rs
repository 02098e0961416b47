//! Stage 4: rule-cascade product recommendation.
//!
//! Only the GROUP_2 expansion targets are offered anything: GROUP_1
//! already uses advances and GROUP_3 is excluded by the segmentation
//! verdict. Eligible prepaid subscribers run through an ordered rule
//! cascade; the first matching rule wins and no rule below it is
//! evaluated. Every eligible subscriber receives exactly one
//! recommendation, the fallback catching whoever no rule claims.

use crate::config::{RuleThresholds, WeightConfig};
use crate::features::FeatureRecord;
use crate::segmentation::{Segment, SegmentRecord};
use crate::types::Month;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Usage-window sentinel for offers with no time limit.
pub const USAGE_UNLIMITED: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProductKind {
    #[serde(rename = "QUOTA")]
    Quota,
    #[serde(rename = "FEE")]
    Fee,
    #[serde(rename = "FREE")]
    Free,
}

impl fmt::Display for ProductKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Quota => "QUOTA",
            Self::Fee => "FEE",
            Self::Free => "FREE",
        })
    }
}

/// Which cascade rule produced the offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleId {
    #[serde(rename = "A_QUOTA")]
    VoiceQuota,
    #[serde(rename = "B_FEE")]
    VipFee,
    #[serde(rename = "C_FREE")]
    FrequentTopup,
    #[serde(rename = "FALLBACK")]
    Fallback,
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::VoiceQuota => "A_QUOTA",
            Self::VipFee => "B_FEE",
            Self::FrequentTopup => "C_FREE",
            Self::Fallback => "FALLBACK",
        })
    }
}

/// One sized offer, carrying the inputs the risk stage scores on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub isdn: String,
    pub month: Month,
    pub segment: Segment,
    pub rule: RuleId,
    pub product: ProductKind,
    pub recommended_amount: f64,
    pub expected_revenue: f64,
    /// Hours, or [`USAGE_UNLIMITED`].
    pub usage_window_hours: i64,
    pub voice_sms_pct: f64,
    pub arpu_total: f64,
    pub topup_count_1m: f64,
    pub topup_amount_1m: f64,
    pub topup_count_2m: f64,
    pub avg_topup_amount: f64,
    /// Human-readable trace of why this rule fired.
    pub reason: String,
}

/// Round to the nearest thousand, halves away from zero.
pub fn round_to_thousand(amount: f64) -> f64 {
    (amount / 1_000.0).round() * 1_000.0
}

/// Voice + SMS share of total ARPU, in percent. Zero ARPU yields 0.
pub fn voice_sms_pct(rec: &FeatureRecord) -> f64 {
    if rec.arpu_total > 0.0 {
        (rec.arpu_call + rec.arpu_sms) / rec.arpu_total * 100.0
    } else {
        0.0
    }
}

/// Usage window for a sized amount: first table step that covers the
/// amount, else the default.
pub fn usage_hours(amount: f64, rules: &RuleThresholds) -> i64 {
    rules
        .usage_time_table
        .iter()
        .find(|step| amount <= step.max_amount)
        .map(|step| step.hours)
        .unwrap_or(rules.usage_time_default_hours)
}

fn sized_amount(arpu_total: f64, multiplier: f64, min: f64, max: f64) -> f64 {
    round_to_thousand((arpu_total * multiplier).clamp(min, max))
}

struct RuleHit {
    rule: RuleId,
    product: ProductKind,
    amount: f64,
    revenue: f64,
    hours: i64,
    reason: String,
}

/// The cascade itself. Rule order is load-bearing: A, then B, then C,
/// then the fallback.
fn cascade(rec: &FeatureRecord, rules: &RuleThresholds) -> RuleHit {
    let pct = voice_sms_pct(rec);

    if pct > rules.quota_voice_sms_pct {
        let amount = sized_amount(
            rec.arpu_total,
            rules.quota_arpu_multiplier,
            rules.quota_min_amount,
            rules.quota_max_amount,
        );
        return RuleHit {
            rule: RuleId::VoiceQuota,
            product: ProductKind::Quota,
            amount,
            revenue: amount * rules.quota_revenue_rate,
            hours: usage_hours(amount, rules),
            reason: format!(
                "voice+sms is {pct:.1}% of arpu (above {:.0}%)",
                rules.quota_voice_sms_pct
            ),
        };
    }

    let fee_amount_ok = rec.topup_amount_1m >= rules.fee_min_topup_amount
        || rec.avg_topup_amount >= rules.fee_min_topup_amount;
    if rec.topup_count_1m >= rules.fee_min_topup_count_1m
        && fee_amount_ok
        && rec.topup_count_2m >= rules.fee_min_topup_count_2m
    {
        let amount = if rec.arpu_total > rules.fee_vip_arpu_threshold {
            rules.fee_vip_amount
        } else {
            rules.fee_base_amount
        };
        return RuleHit {
            rule: RuleId::VipFee,
            product: ProductKind::Fee,
            amount,
            revenue: amount * rules.fee_revenue_rate,
            hours: USAGE_UNLIMITED,
            reason: format!(
                "sustained topups at fee scale ({:.0} last month across {:.0} topups)",
                rec.topup_amount_1m, rec.topup_count_1m
            ),
        };
    }

    if rec.topup_count_1m >= rules.free_min_topup_count_1m {
        let amount = sized_amount(
            rec.arpu_total,
            rules.free_arpu_multiplier,
            rules.free_min_amount,
            rules.free_max_amount,
        );
        return RuleHit {
            rule: RuleId::FrequentTopup,
            product: ProductKind::Free,
            amount,
            revenue: amount * rules.free_revenue_rate,
            hours: usage_hours(amount, rules),
            reason: format!("{:.0} topups last month", rec.topup_count_1m),
        };
    }

    RuleHit {
        rule: RuleId::Fallback,
        product: ProductKind::Free,
        amount: rules.fallback_amount,
        revenue: rules.fallback_revenue,
        hours: rules.fallback_hours,
        reason: "no rule matched; entry-level offer".into(),
    }
}

/// Recommend for every prepaid expansion-target subscriber in the
/// segmented snapshot. Output order follows the segment records, so
/// runs are comparable checkpoint to checkpoint.
pub fn run(
    features: &[FeatureRecord],
    segments: &[SegmentRecord],
    config: &WeightConfig,
) -> Vec<Recommendation> {
    let Some(snapshot_month) = segments.iter().map(|s| s.month).max() else {
        return Vec::new();
    };
    let mut by_isdn: HashMap<&str, &FeatureRecord> = HashMap::new();
    for rec in features.iter().filter(|r| r.month == snapshot_month) {
        by_isdn.entry(rec.isdn.as_str()).or_insert(rec);
    }

    let mut out = Vec::new();
    let mut skipped_segment = 0usize;
    let mut skipped_postpaid = 0usize;
    for seg in segments {
        if !seg.segment.is_expansion_target() {
            skipped_segment += 1;
            continue;
        }
        let Some(&rec) = by_isdn.get(seg.isdn.as_str()) else {
            log::warn!("classification: no snapshot row for {}", seg.isdn);
            continue;
        };
        if !rec.is_prepaid {
            skipped_postpaid += 1;
            continue;
        }
        let hit = cascade(rec, &config.rules);
        out.push(Recommendation {
            isdn: seg.isdn.clone(),
            month: seg.month,
            segment: seg.segment,
            rule: hit.rule,
            product: hit.product,
            recommended_amount: hit.amount,
            expected_revenue: hit.revenue,
            usage_window_hours: hit.hours,
            voice_sms_pct: voice_sms_pct(rec),
            arpu_total: rec.arpu_total,
            topup_count_1m: rec.topup_count_1m,
            topup_amount_1m: rec.topup_amount_1m,
            topup_count_2m: rec.topup_count_2m,
            avg_topup_amount: rec.avg_topup_amount,
            reason: hit.reason,
        });
    }

    if skipped_segment > 0 {
        log::info!("stage=classification skipped {skipped_segment} non-expansion subscribers");
    }
    if skipped_postpaid > 0 {
        log::info!("stage=classification skipped {skipped_postpaid} non-prepaid subscribers");
    }
    out
}
