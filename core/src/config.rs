//! Versioned, strongly typed pipeline configuration.
//!
//! RULE: every tunable weight and threshold lives here. Stage code never
//! hardcodes a business constant; it reads it from the struct it is
//! handed. Config is validated once at the pipeline boundary, not
//! re-interpreted ad hoc inside each stage.

use crate::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Schema version this build understands.
pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightConfig {
    pub version: u32,
    #[serde(default)]
    pub clustering: ClusteringParams,
    #[serde(default)]
    pub rules: RuleThresholds,
    #[serde(default)]
    pub risk: RiskWeights,
    #[serde(default)]
    pub unit_scale: UnitScaleCorrection,
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            clustering: ClusteringParams::default(),
            rules: RuleThresholds::default(),
            risk: RiskWeights::default(),
            unit_scale: UnitScaleCorrection::default(),
        }
    }
}

impl WeightConfig {
    pub fn from_json_file(path: &Path) -> PipelineResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: WeightConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.version != CONFIG_VERSION {
            return Err(PipelineError::InvalidConfig(format!(
                "unsupported config version {} (expected {})",
                self.version, CONFIG_VERSION
            )));
        }
        if self.clustering.k < 2 {
            return Err(PipelineError::InvalidConfig(format!(
                "clustering.k must be >= 2, got {}",
                self.clustering.k
            )));
        }
        if self.clustering.num_inits == 0 || self.clustering.max_iter == 0 {
            return Err(PipelineError::InvalidConfig(
                "clustering.num_inits and clustering.max_iter must be > 0".into(),
            ));
        }
        if self.unit_scale.divisor <= 0.0 {
            return Err(PipelineError::InvalidConfig(format!(
                "unit_scale.divisor must be > 0, got {}",
                self.unit_scale.divisor
            )));
        }
        if self.risk.low_tier_max >= self.risk.medium_tier_max {
            return Err(PipelineError::InvalidConfig(
                "risk.low_tier_max must be below risk.medium_tier_max".into(),
            ));
        }
        for pair in [
            (self.rules.quota_min_amount, self.rules.quota_max_amount),
            (self.rules.free_min_amount, self.rules.free_max_amount),
        ] {
            if pair.0 > pair.1 {
                return Err(PipelineError::InvalidConfig(
                    "rule clamp bounds inverted (min > max)".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Parameters for the k-means segmentation stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringParams {
    pub k: usize,
    pub num_inits: usize,
    pub max_iter: usize,
    pub seed: u64,
}

impl Default for ClusteringParams {
    fn default() -> Self {
        Self {
            k: 3,
            num_inits: 20,
            max_iter: 500,
            seed: 42,
        }
    }
}

/// One step of the amount → usage-hours lookup table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageTimeStep {
    pub max_amount: f64,
    pub hours: i64,
}

/// Thresholds for the cascading product classification rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleThresholds {
    // Rule A: quota product (voice/SMS heavy users).
    pub quota_voice_sms_pct: f64,
    pub quota_arpu_multiplier: f64,
    pub quota_min_amount: f64,
    pub quota_max_amount: f64,
    pub quota_revenue_rate: f64,
    // Rule B: fee product.
    pub fee_min_topup_count_1m: f64,
    pub fee_min_topup_amount: f64,
    pub fee_min_topup_count_2m: f64,
    pub fee_vip_arpu_threshold: f64,
    pub fee_vip_amount: f64,
    pub fee_base_amount: f64,
    pub fee_revenue_rate: f64,
    // Rule C: free product (profit from the unused portion).
    pub free_min_topup_count_1m: f64,
    pub free_arpu_multiplier: f64,
    pub free_min_amount: f64,
    pub free_max_amount: f64,
    pub free_revenue_rate: f64,
    // Fallback: totality guarantee for rows matching no rule.
    pub fallback_amount: f64,
    pub fallback_revenue: f64,
    pub fallback_hours: i64,
    // Amount → usage-hours steps, ascending by max_amount.
    pub usage_time_table: Vec<UsageTimeStep>,
    pub usage_time_default_hours: i64,
}

impl Default for RuleThresholds {
    fn default() -> Self {
        Self {
            quota_voice_sms_pct: 70.0,
            quota_arpu_multiplier: 0.8,
            quota_min_amount: 10_000.0,
            quota_max_amount: 50_000.0,
            quota_revenue_rate: 0.20,
            fee_min_topup_count_1m: 1.0,
            fee_min_topup_amount: 50_000.0,
            fee_min_topup_count_2m: 1.0,
            fee_vip_arpu_threshold: 100_000.0,
            fee_vip_amount: 50_000.0,
            fee_base_amount: 25_000.0,
            fee_revenue_rate: 0.30,
            free_min_topup_count_1m: 2.0,
            free_arpu_multiplier: 1.2,
            free_min_amount: 10_000.0,
            free_max_amount: 50_000.0,
            free_revenue_rate: 0.30,
            fallback_amount: 10_000.0,
            fallback_revenue: 3_000.0,
            fallback_hours: 24,
            usage_time_table: vec![
                UsageTimeStep { max_amount: 5_000.0, hours: 24 },
                UsageTimeStep { max_amount: 15_000.0, hours: 36 },
                UsageTimeStep { max_amount: 30_000.0, hours: 48 },
            ],
            usage_time_default_hours: 60,
        }
    }
}

/// Additive bad-debt risk model weights.
///
/// Negative deltas reduce risk, positive deltas increase it. Tier cut
/// points partition the score into LOW / MEDIUM / HIGH.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskWeights {
    pub base_score: f64,
    // Coverage: last-month topup vs. the offered amount.
    pub coverage_full_delta: f64,
    pub coverage_partial_delta: f64,
    pub coverage_zero_delta: f64,
    /// Relief applied on top of coverage_zero_delta for the free product,
    /// whose economics do not depend on direct repayment.
    pub free_zero_coverage_relief: f64,
    // Topup frequency (last-month count).
    pub freq_high_delta: f64,
    pub freq_two_delta: f64,
    pub freq_one_delta: f64,
    pub freq_zero_delta: f64,
    // ARPU tiers.
    pub arpu_high_threshold: f64,
    pub arpu_mid_threshold: f64,
    pub arpu_low_threshold: f64,
    pub arpu_floor_threshold: f64,
    pub arpu_high_delta: f64,
    pub arpu_mid_delta: f64,
    pub arpu_low_delta: f64,
    pub arpu_floor_delta: f64,
    /// Extra decrease for the free product at/above arpu_mid_threshold.
    pub free_arpu_bonus: f64,
    // Average topup tiers.
    pub avg_topup_high_threshold: f64,
    pub avg_topup_mid_threshold: f64,
    pub avg_topup_low_threshold: f64,
    pub avg_topup_tiny_threshold: f64,
    pub avg_topup_high_delta: f64,
    pub avg_topup_mid_delta: f64,
    pub avg_topup_low_delta: f64,
    pub avg_topup_tiny_delta: f64,
    /// Extra decrease for the free product at/above avg_topup_low_threshold.
    pub free_avg_topup_bonus: f64,
    // Tiering.
    pub low_tier_max: f64,
    pub medium_tier_max: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            base_score: 50.0,
            coverage_full_delta: -40.0,
            coverage_partial_delta: -10.0,
            coverage_zero_delta: 40.0,
            free_zero_coverage_relief: -20.0,
            freq_high_delta: -15.0,
            freq_two_delta: -10.0,
            freq_one_delta: -5.0,
            freq_zero_delta: 20.0,
            arpu_high_threshold: 5_000.0,
            arpu_mid_threshold: 2_000.0,
            arpu_low_threshold: 1_000.0,
            arpu_floor_threshold: 500.0,
            arpu_high_delta: -15.0,
            arpu_mid_delta: -10.0,
            arpu_low_delta: -5.0,
            arpu_floor_delta: 10.0,
            free_arpu_bonus: -10.0,
            avg_topup_high_threshold: 100_000.0,
            avg_topup_mid_threshold: 50_000.0,
            avg_topup_low_threshold: 20_000.0,
            avg_topup_tiny_threshold: 10_000.0,
            avg_topup_high_delta: -15.0,
            avg_topup_mid_delta: -10.0,
            avg_topup_low_delta: -5.0,
            avg_topup_tiny_delta: 5.0,
            free_avg_topup_bonus: -10.0,
            low_tier_max: 30.0,
            medium_tier_max: 60.0,
        }
    }
}

/// Unit-scale patch for advance product types whose raw amounts are
/// recorded in a different unit than the rest of the feed. The affected
/// list is configuration, not a hardcoded fact about the world.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitScaleCorrection {
    pub service_types: Vec<String>,
    pub divisor: f64,
}

impl Default for UnitScaleCorrection {
    fn default() -> Self {
        Self {
            service_types: vec!["EasyCredit".into(), "ungdata247".into()],
            divisor: 10.0,
        }
    }
}

impl UnitScaleCorrection {
    pub fn corrected(&self, service_type: &str, amount: f64) -> f64 {
        if self.service_types.iter().any(|s| s == service_type) {
            amount / self.divisor
        } else {
            amount
        }
    }
}
