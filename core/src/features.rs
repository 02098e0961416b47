//! Stage 2: leakage-safe feature engineering over the master table.
//!
//! RULES:
//!   - Trailing windows cover strictly prior subscriber-months; the
//!     current month never contributes to its own window.
//!   - Subscribers with no history get zero-filled windows, never NaN.
//!   - Percentile flags are computed over the whole batch, once.

use crate::merge::MasterRecord;
use crate::types::Month;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Sentinel for "never advanced before this month".
pub const NO_ADVANCE_SENTINEL: f64 = 99.0;

/// Burn rate assigned when a subscriber spends with zero topups.
pub const BURN_RATE_NO_TOPUP: f64 = 999.0;

/// Burn rate cap applied after computation.
pub const BURN_RATE_CAP: f64 = 5.0;

/// Date format carried by the subscriber registry.
const DATE_FMT: &str = "%d/%m/%Y";

/// One row of the analytical base table: the master record columns
/// plus every engineered feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureRecord {
    // Carried from the master table.
    pub isdn: String,
    pub month: Month,
    pub subscriber_type: String,
    pub subscriber_status: String,
    pub activation_date: String,
    pub expire_date: String,
    pub arpu_call: f64,
    pub arpu_sms: f64,
    pub arpu_data: f64,
    pub arpu_total: f64,
    pub advance_count: u32,
    pub total_advance_amount: f64,
    pub avg_advance_amount: f64,
    pub max_advance_amount: f64,
    pub total_repayment_amount: f64,
    pub avg_repayment_rate: f64,
    pub outstanding_debt: f64,
    pub has_advance_in_month: bool,
    pub most_used_advance_service: String,
    pub topup_count: u32,
    pub total_topup_amount: f64,
    pub avg_topup_amount: f64,
    pub std_topup_amount: f64,
    pub max_topup_amount: f64,
    pub most_used_topup_channel: String,
    pub num_packages: u32,
    pub total_package_value: f64,
    pub avg_package_price: f64,
    pub max_package_price: f64,
    pub avg_package_cycle: f64,
    pub num_active_packages: u32,
    pub num_renewed_packages: u32,
    pub usage_record_count: u32,

    // Trailing windows over strictly prior months.
    pub advance_count_1m: f64,
    pub advance_count_2m: f64,
    pub advance_count_3m: f64,
    pub topup_count_1m: f64,
    pub topup_count_2m: f64,
    pub topup_count_3m: f64,
    pub topup_amount_1m: f64,
    pub topup_amount_2m: f64,
    pub topup_amount_3m: f64,

    // Advance history.
    pub has_advance_history: bool,
    pub months_since_last_advance: f64,
    pub is_good_payer: bool,
    pub has_outstanding_debt: bool,
    pub is_repeat_advancer: bool,

    // Topup behavior.
    pub topup_frequency_tier: String,
    pub topup_cv: f64,
    pub has_stable_topup: bool,
    pub high_topup_count: bool,
    pub high_topup_total: bool,
    pub high_topup_avg: bool,

    // Balance and spend pressure.
    pub estimated_balance: f64,
    pub balance_negative: bool,
    pub balance_low: bool,
    pub burn_rate: f64,
    pub burn_rate_high: bool,
    pub burn_rate_very_high: bool,
    pub high_package_value: bool,
    pub package_value_p90: bool,
    pub financial_stress_score: u8,

    // Account shape.
    pub is_active_user: bool,
    /// Usage records per day of the month, roughly.
    pub usage_intensity: f64,
    pub has_multiple_packages: bool,
    pub package_per_topup_ratio: f64,
    pub is_prepaid: bool,
    pub is_active_status: bool,
    pub tenure_days: i64,
    pub is_new_customer: bool,
    pub is_mature_customer: bool,

    // Interactions.
    pub heavy_user_good_payer: bool,
    pub heavy_user_has_debt: bool,
    pub high_topup_high_package: bool,
    pub repeat_advance_good_payer: bool,
}

impl FeatureRecord {
    fn from_master(m: &MasterRecord) -> Self {
        Self {
            isdn: m.isdn.clone(),
            month: m.month,
            subscriber_type: m.subscriber_type.clone(),
            subscriber_status: m.subscriber_status.clone(),
            activation_date: m.activation_date.clone(),
            expire_date: m.expire_date.clone(),
            arpu_call: m.arpu_call,
            arpu_sms: m.arpu_sms,
            arpu_data: m.arpu_data,
            arpu_total: m.arpu_total,
            advance_count: m.advance_count,
            total_advance_amount: m.total_advance_amount,
            avg_advance_amount: m.avg_advance_amount,
            max_advance_amount: m.max_advance_amount,
            total_repayment_amount: m.total_repayment_amount,
            avg_repayment_rate: m.avg_repayment_rate,
            outstanding_debt: m.outstanding_debt,
            has_advance_in_month: m.has_advance_in_month,
            most_used_advance_service: m.most_used_advance_service.clone(),
            topup_count: m.topup_count,
            total_topup_amount: m.total_topup_amount,
            avg_topup_amount: m.avg_topup_amount,
            std_topup_amount: m.std_topup_amount,
            max_topup_amount: m.max_topup_amount,
            most_used_topup_channel: m.most_used_topup_channel.clone(),
            num_packages: m.num_packages,
            total_package_value: m.total_package_value,
            avg_package_price: m.avg_package_price,
            max_package_price: m.max_package_price,
            avg_package_cycle: m.avg_package_cycle,
            num_active_packages: m.num_active_packages,
            num_renewed_packages: m.num_renewed_packages,
            usage_record_count: m.usage_record_count,
            advance_count_1m: 0.0,
            advance_count_2m: 0.0,
            advance_count_3m: 0.0,
            topup_count_1m: 0.0,
            topup_count_2m: 0.0,
            topup_count_3m: 0.0,
            topup_amount_1m: 0.0,
            topup_amount_2m: 0.0,
            topup_amount_3m: 0.0,
            has_advance_history: false,
            months_since_last_advance: NO_ADVANCE_SENTINEL,
            is_good_payer: false,
            has_outstanding_debt: false,
            is_repeat_advancer: false,
            topup_frequency_tier: String::new(),
            topup_cv: 0.0,
            has_stable_topup: false,
            high_topup_count: false,
            high_topup_total: false,
            high_topup_avg: false,
            estimated_balance: 0.0,
            balance_negative: false,
            balance_low: false,
            burn_rate: 0.0,
            burn_rate_high: false,
            burn_rate_very_high: false,
            high_package_value: false,
            package_value_p90: false,
            financial_stress_score: 0,
            is_active_user: false,
            usage_intensity: 0.0,
            has_multiple_packages: false,
            package_per_topup_ratio: 0.0,
            is_prepaid: false,
            is_active_status: false,
            tenure_days: -1,
            is_new_customer: false,
            is_mature_customer: false,
            heavy_user_good_payer: false,
            heavy_user_has_debt: false,
            high_topup_high_package: false,
            repeat_advance_good_payer: false,
        }
    }
}

/// Linear-interpolation quantile over a sorted slice.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        sorted[lo] + (pos - lo as f64) * (sorted[hi] - sorted[lo])
    }
}

fn sorted_column<F: Fn(&FeatureRecord) -> f64>(rows: &[FeatureRecord], f: F) -> Vec<f64> {
    let mut v: Vec<f64> = rows.iter().map(f).collect();
    v.sort_by(|a, b| a.total_cmp(b));
    v
}

fn frequency_tier(count: u32) -> &'static str {
    match count {
        0 => "none",
        1..=2 => "low",
        3..=5 => "medium",
        _ => "high",
    }
}

/// First day of the latest month in the batch. Tenure is measured
/// against this date, not against wall-clock time.
fn reference_date(rows: &[MasterRecord]) -> Option<NaiveDate> {
    let latest = rows.iter().map(|r| r.month).max()?;
    NaiveDate::from_ymd_opt(latest.year() as i32, latest.month_of_year(), 1)
}

/// Build the analytical base table from master rows.
pub fn build(master: &[MasterRecord]) -> Vec<FeatureRecord> {
    let reference = reference_date(master);

    // Group rows per subscriber in month order so that window features
    // see a stable, strictly increasing timeline.
    let mut order: Vec<usize> = (0..master.len()).collect();
    order.sort_by(|&a, &b| {
        master[a]
            .isdn
            .cmp(&master[b].isdn)
            .then(master[a].month.index().cmp(&master[b].month.index()))
    });

    let mut rows: Vec<FeatureRecord> = Vec::with_capacity(master.len());
    let mut group_start = 0usize;
    while group_start < order.len() {
        let isdn = &master[order[group_start]].isdn;
        let mut group_end = group_start;
        while group_end < order.len() && &master[order[group_end]].isdn == isdn {
            group_end += 1;
        }
        let group: Vec<&MasterRecord> =
            order[group_start..group_end].iter().map(|&i| &master[i]).collect();
        rows.extend(build_subscriber(&group, reference));
        group_start = group_end;
    }

    apply_batch_flags(&mut rows);
    rows
}

/// Per-subscriber pass: windows, history, and all row-local features.
fn build_subscriber(group: &[&MasterRecord], reference: Option<NaiveDate>) -> Vec<FeatureRecord> {
    let mut out = Vec::with_capacity(group.len());
    let mut cumulative_advances = 0u32;
    let mut last_advance_month: Option<i64> = None;

    for (pos, &master) in group.iter().enumerate() {
        let mut rec = FeatureRecord::from_master(master);

        for (width, adv, tc, ta) in [
            (1usize, &mut rec.advance_count_1m, &mut rec.topup_count_1m, &mut rec.topup_amount_1m),
            (2, &mut rec.advance_count_2m, &mut rec.topup_count_2m, &mut rec.topup_amount_2m),
            (3, &mut rec.advance_count_3m, &mut rec.topup_count_3m, &mut rec.topup_amount_3m),
        ] {
            let from = pos.saturating_sub(width);
            for prior in &group[from..pos] {
                *adv += prior.advance_count as f64;
                *tc += prior.topup_count as f64;
                *ta += prior.total_topup_amount;
            }
        }

        rec.has_advance_history = cumulative_advances > 0;
        // Calendar distance, not row distance: a subscriber absent from
        // an intervening month still advances the counter.
        rec.months_since_last_advance = match last_advance_month {
            Some(last) => (master.month.index() - last) as f64,
            None => NO_ADVANCE_SENTINEL,
        };
        rec.is_good_payer = master.avg_repayment_rate >= 0.95;
        rec.has_outstanding_debt = master.outstanding_debt > 0.0;
        rec.is_repeat_advancer = cumulative_advances >= 2;

        rec.topup_frequency_tier = frequency_tier(master.topup_count).to_string();
        rec.topup_cv = if master.avg_topup_amount > 0.0 {
            master.std_topup_amount / master.avg_topup_amount
        } else {
            0.0
        };
        rec.has_stable_topup = rec.topup_cv < 0.5;

        rec.estimated_balance = master.total_topup_amount - master.total_package_value;
        rec.balance_negative = rec.estimated_balance < 0.0;
        rec.balance_low = rec.estimated_balance >= 0.0 && rec.estimated_balance < 50_000.0;
        rec.burn_rate = if master.total_topup_amount > 0.0 {
            (master.total_package_value / master.total_topup_amount).min(BURN_RATE_CAP)
        } else if master.total_package_value > 0.0 {
            BURN_RATE_NO_TOPUP
        } else {
            0.0
        };
        rec.burn_rate_high = rec.burn_rate > 1.0;
        rec.burn_rate_very_high = rec.burn_rate > 1.5;

        rec.is_active_user = rec.topup_count_3m > 0.0;
        rec.usage_intensity = master.usage_record_count as f64 / 30.0;
        rec.has_multiple_packages = master.num_packages > 1;
        rec.package_per_topup_ratio = if master.topup_count > 0 {
            master.num_packages as f64 / master.topup_count as f64
        } else {
            0.0
        };
        rec.is_prepaid = master.subscriber_type == "PRE";
        rec.is_active_status = master.subscriber_status == "ACTIF";

        if let (Some(reference), Ok(activated)) = (
            reference,
            NaiveDate::parse_from_str(master.activation_date.trim(), DATE_FMT),
        ) {
            let tenure = (reference - activated).num_days();
            rec.tenure_days = tenure;
            rec.is_new_customer = tenure >= 0 && tenure < 90;
            rec.is_mature_customer = tenure > 365;
        }

        if master.advance_count > 0 {
            cumulative_advances += master.advance_count;
            last_advance_month = Some(master.month.index());
        }
        out.push(rec);
    }
    out
}

/// Batch pass: percentile flags, the stress composite, and the
/// interaction features that depend on batch flags.
fn apply_batch_flags(rows: &mut Vec<FeatureRecord>) {
    if rows.is_empty() {
        return;
    }
    let p75_topup_count = quantile(&sorted_column(rows, |r| r.topup_count as f64), 0.75);
    let p75_topup_total = quantile(&sorted_column(rows, |r| r.total_topup_amount), 0.75);
    let p75_topup_avg = quantile(&sorted_column(rows, |r| r.avg_topup_amount), 0.75);
    let p75_package = quantile(&sorted_column(rows, |r| r.total_package_value), 0.75);
    let p90_package = quantile(&sorted_column(rows, |r| r.total_package_value), 0.90);

    for rec in rows.iter_mut() {
        rec.high_topup_count = (rec.topup_count as f64) > p75_topup_count;
        rec.high_topup_total = rec.total_topup_amount > p75_topup_total;
        rec.high_topup_avg = rec.avg_topup_amount > p75_topup_avg;
        rec.high_package_value = rec.total_package_value > p75_package;
        rec.package_value_p90 = rec.total_package_value > p90_package;

        rec.financial_stress_score = [
            rec.balance_negative,
            rec.balance_low,
            rec.burn_rate_high,
            rec.burn_rate_very_high,
            rec.package_value_p90,
        ]
        .iter()
        .filter(|&&f| f)
        .count() as u8;

        rec.heavy_user_good_payer = rec.high_topup_count && rec.is_good_payer;
        rec.heavy_user_has_debt = rec.high_topup_count && rec.outstanding_debt > 0.0;
        rec.high_topup_high_package = rec.high_topup_avg && rec.high_package_value;
        rec.repeat_advance_good_payer = rec.advance_count_3m >= 2.0 && rec.is_good_payer;
    }
}
