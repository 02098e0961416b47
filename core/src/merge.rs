//! Stage 1: multi-source merge into the subscriber-month master table.
//!
//! Each source is aggregated to (subscriber, month) granularity and then
//! left-joined onto the subscriber registry anchor. RULES:
//!   - No anchor row is ever dropped.
//!   - Numeric gaps fill with 0, categorical gaps with "Unknown".
//!   - Malformed numeric fields coerce to 0, they never raise.
//!   - An absent source degrades to all-default values for its columns.

use crate::config::{UnitScaleCorrection, WeightConfig};
use crate::error::PipelineResult;
use crate::source::{discover_files, load_tagged, FileSelection, SourceId, Tagged};
use crate::types::{Month, SubscriberId};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Sentinel for absent categorical values.
pub const UNKNOWN: &str = "Unknown";

type Key = (SubscriberId, Month);

/// Numeric field coercion: blank or unparseable values become 0.0.
fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    let raw: Option<String> = Option::deserialize(d)?;
    Ok(raw
        .and_then(|s| s.trim().parse::<f64>().ok())
        .unwrap_or(0.0))
}

// ── Source row schemas ─────────────────────────────────────────────

/// Registry anchor row. One per (subscriber, month); duplicate anchor
/// entries (e.g. re-registered lines) are preserved, not deduplicated.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriberRow {
    pub isdn: String,
    #[serde(default)]
    pub subscriber_type: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub activation_date: String,
    #[serde(default)]
    pub expire_date: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArpuRow {
    pub isdn: String,
    #[serde(deserialize_with = "lenient_f64", default)]
    pub arpu_call: f64,
    #[serde(deserialize_with = "lenient_f64", default)]
    pub arpu_sms: f64,
    #[serde(deserialize_with = "lenient_f64", default)]
    pub arpu_data: f64,
    #[serde(deserialize_with = "lenient_f64", default)]
    pub arpu_total: f64,
}

/// One advance-product transaction. `txn_kind` is "advance" for a
/// disbursal and "repayment" for money coming back.
#[derive(Debug, Clone, Deserialize)]
pub struct AdvanceRow {
    pub isdn: String,
    #[serde(default)]
    pub txn_kind: String,
    #[serde(default)]
    pub service_type: String,
    #[serde(deserialize_with = "lenient_f64", default)]
    pub amount: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopupRow {
    pub isdn: String,
    #[serde(deserialize_with = "lenient_f64", default)]
    pub amount: f64,
    #[serde(default)]
    pub channel: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PackageRow {
    pub isdn: String,
    #[serde(default)]
    pub package_code: String,
    #[serde(deserialize_with = "lenient_f64", default)]
    pub price: f64,
    #[serde(deserialize_with = "lenient_f64", default)]
    pub cycle_days: f64,
    #[serde(default)]
    pub status: String,
    /// Renewal timestamp; non-empty means the package was renewed.
    #[serde(default)]
    pub renewed_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UsageRow {
    pub isdn: String,
}

// ── Per-source aggregates ──────────────────────────────────────────

/// Category frequency in first-encounter order. Ties on count resolve
/// to the category seen first.
fn bump(counts: &mut Vec<(String, u32)>, value: &str) {
    if value.is_empty() {
        return;
    }
    match counts.iter_mut().find(|(v, _)| v == value) {
        Some((_, n)) => *n += 1,
        None => counts.push((value.to_string(), 1)),
    }
}

fn most_frequent(counts: &[(String, u32)]) -> String {
    let mut best: Option<&(String, u32)> = None;
    for entry in counts {
        if best.map(|(_, n)| entry.1 > *n).unwrap_or(true) {
            best = Some(entry);
        }
    }
    best.map(|(v, _)| v.clone()).unwrap_or_else(|| UNKNOWN.into())
}

#[derive(Debug, Clone, Default)]
pub struct AdvanceAgg {
    pub count: u32,
    pub total: f64,
    pub max: f64,
    pub repayment: f64,
    service_counts: Vec<(String, u32)>,
}

impl AdvanceAgg {
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total / self.count as f64
        }
    }

    /// repayment / advance, 0 when nothing was advanced.
    pub fn repayment_rate(&self) -> f64 {
        if self.total > 0.0 {
            self.repayment / self.total
        } else {
            0.0
        }
    }

    /// max(advance − repayment, 0).
    pub fn outstanding_debt(&self) -> f64 {
        (self.total - self.repayment).max(0.0)
    }

    pub fn top_service(&self) -> String {
        most_frequent(&self.service_counts)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TopupAgg {
    pub count: u32,
    pub total: f64,
    pub max: f64,
    sum_sq: f64,
    channel_counts: Vec<(String, u32)>,
}

impl TopupAgg {
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total / self.count as f64
        }
    }

    /// Sample standard deviation; 0 with fewer than two observations.
    pub fn stddev(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        let n = self.count as f64;
        let var = (self.sum_sq - self.total * self.total / n) / (n - 1.0);
        var.max(0.0).sqrt()
    }

    pub fn top_channel(&self) -> String {
        most_frequent(&self.channel_counts)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PackageAgg {
    pub count: u32,
    pub price_sum: f64,
    pub price_max: f64,
    pub cycle_sum: f64,
    pub active: u32,
    pub renewed: u32,
}

impl PackageAgg {
    pub fn price_mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.price_sum / self.count as f64
        }
    }

    pub fn cycle_mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.cycle_sum / self.count as f64
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ArpuVals {
    pub call: f64,
    pub sms: f64,
    pub data: f64,
    pub total: f64,
}

/// Split advance vs. repayment by txn_kind, apply the unit-scale
/// correction, and aggregate per (subscriber, month).
pub fn aggregate_advance(
    rows: Vec<Tagged<AdvanceRow>>,
    correction: &UnitScaleCorrection,
) -> HashMap<Key, AdvanceAgg> {
    let mut map: HashMap<Key, AdvanceAgg> = HashMap::new();
    for tagged in rows {
        let Some(month) = tagged.month else { continue };
        let row = tagged.row;
        let amount = correction.corrected(&row.service_type, row.amount);
        let agg = map.entry((row.isdn, month)).or_default();
        match row.txn_kind.as_str() {
            "advance" => {
                agg.count += 1;
                agg.total += amount;
                agg.max = agg.max.max(amount);
                bump(&mut agg.service_counts, &row.service_type);
            }
            "repayment" => agg.repayment += amount,
            other => log::debug!("advance row with unknown txn_kind '{other}', ignored"),
        }
    }
    map
}

pub fn aggregate_topup(rows: Vec<Tagged<TopupRow>>) -> HashMap<Key, TopupAgg> {
    let mut map: HashMap<Key, TopupAgg> = HashMap::new();
    for tagged in rows {
        let Some(month) = tagged.month else { continue };
        let row = tagged.row;
        let agg = map.entry((row.isdn, month)).or_default();
        agg.count += 1;
        agg.total += row.amount;
        agg.sum_sq += row.amount * row.amount;
        agg.max = agg.max.max(row.amount);
        bump(&mut agg.channel_counts, &row.channel);
    }
    map
}

pub fn aggregate_package(rows: Vec<Tagged<PackageRow>>) -> HashMap<Key, PackageAgg> {
    let mut map: HashMap<Key, PackageAgg> = HashMap::new();
    for tagged in rows {
        let Some(month) = tagged.month else { continue };
        let row = tagged.row;
        let agg = map.entry((row.isdn, month)).or_default();
        agg.count += 1;
        agg.price_sum += row.price;
        agg.price_max = agg.price_max.max(row.price);
        agg.cycle_sum += row.cycle_days;
        if row.status == "active" {
            agg.active += 1;
        }
        if !row.renewed_at.trim().is_empty() {
            agg.renewed += 1;
        }
    }
    map
}

/// ARPU passes through without aggregation beyond coercion. Where the
/// feed carries duplicate (subscriber, month) rows the first wins.
pub fn aggregate_arpu(rows: Vec<Tagged<ArpuRow>>) -> HashMap<Key, ArpuVals> {
    let mut map: HashMap<Key, ArpuVals> = HashMap::new();
    for tagged in rows {
        let Some(month) = tagged.month else { continue };
        let row = tagged.row;
        map.entry((row.isdn, month)).or_insert(ArpuVals {
            call: row.arpu_call,
            sms: row.arpu_sms,
            data: row.arpu_data,
            total: row.arpu_total,
        });
    }
    map
}

pub fn aggregate_usage(rows: Vec<Tagged<UsageRow>>) -> HashMap<Key, u32> {
    let mut map: HashMap<Key, u32> = HashMap::new();
    for tagged in rows {
        let Some(month) = tagged.month else { continue };
        *map.entry((tagged.row.isdn, month)).or_default() += 1;
    }
    map
}

// ── The master record ──────────────────────────────────────────────

/// One row of the merged master table: the subscriber-month record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterRecord {
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
}

impl Default for MasterRecord {
    fn default() -> Self {
        Self {
            isdn: String::new(),
            month: Month(0),
            subscriber_type: UNKNOWN.into(),
            subscriber_status: UNKNOWN.into(),
            activation_date: String::new(),
            expire_date: String::new(),
            arpu_call: 0.0,
            arpu_sms: 0.0,
            arpu_data: 0.0,
            arpu_total: 0.0,
            advance_count: 0,
            total_advance_amount: 0.0,
            avg_advance_amount: 0.0,
            max_advance_amount: 0.0,
            total_repayment_amount: 0.0,
            avg_repayment_rate: 0.0,
            outstanding_debt: 0.0,
            has_advance_in_month: false,
            most_used_advance_service: UNKNOWN.into(),
            topup_count: 0,
            total_topup_amount: 0.0,
            avg_topup_amount: 0.0,
            std_topup_amount: 0.0,
            max_topup_amount: 0.0,
            most_used_topup_channel: UNKNOWN.into(),
            num_packages: 0,
            total_package_value: 0.0,
            avg_package_price: 0.0,
            max_package_price: 0.0,
            avg_package_cycle: 0.0,
            num_active_packages: 0,
            num_renewed_packages: 0,
            usage_record_count: 0,
        }
    }
}

fn or_unknown(value: &str) -> String {
    if value.trim().is_empty() {
        UNKNOWN.into()
    } else {
        value.to_string()
    }
}

/// Left-join all aggregated sources onto the registry anchor.
/// Every anchor row with a known month yields exactly one master row.
pub fn merge(
    anchor: Vec<Tagged<SubscriberRow>>,
    arpu: &HashMap<Key, ArpuVals>,
    advance: &HashMap<Key, AdvanceAgg>,
    topup: &HashMap<Key, TopupAgg>,
    package: &HashMap<Key, PackageAgg>,
    usage: &HashMap<Key, u32>,
) -> Vec<MasterRecord> {
    let mut out = Vec::with_capacity(anchor.len());
    let mut unknown_month = 0usize;

    for tagged in anchor {
        let Some(month) = tagged.month else {
            unknown_month += 1;
            continue;
        };
        let sub = tagged.row;
        let key = (sub.isdn.clone(), month);

        let mut rec = MasterRecord {
            isdn: sub.isdn,
            month,
            subscriber_type: or_unknown(&sub.subscriber_type),
            subscriber_status: or_unknown(&sub.status),
            activation_date: sub.activation_date,
            expire_date: sub.expire_date,
            ..MasterRecord::default()
        };

        if let Some(a) = arpu.get(&key) {
            rec.arpu_call = a.call;
            rec.arpu_sms = a.sms;
            rec.arpu_data = a.data;
            rec.arpu_total = a.total;
        }
        if let Some(a) = advance.get(&key) {
            rec.advance_count = a.count;
            rec.total_advance_amount = a.total;
            rec.avg_advance_amount = a.mean();
            rec.max_advance_amount = a.max;
            rec.total_repayment_amount = a.repayment;
            rec.avg_repayment_rate = a.repayment_rate();
            rec.outstanding_debt = a.outstanding_debt();
            rec.has_advance_in_month = a.count > 0;
            rec.most_used_advance_service = a.top_service();
        }
        if let Some(t) = topup.get(&key) {
            rec.topup_count = t.count;
            rec.total_topup_amount = t.total;
            rec.avg_topup_amount = t.mean();
            rec.std_topup_amount = t.stddev();
            rec.max_topup_amount = t.max;
            rec.most_used_topup_channel = t.top_channel();
        }
        if let Some(p) = package.get(&key) {
            rec.num_packages = p.count;
            rec.total_package_value = p.price_sum;
            rec.avg_package_price = p.price_mean();
            rec.max_package_price = p.price_max;
            rec.avg_package_cycle = p.cycle_mean();
            rec.num_active_packages = p.active;
            rec.num_renewed_packages = p.renewed;
        }
        if let Some(&n) = usage.get(&key) {
            rec.usage_record_count = n;
        }

        out.push(rec);
    }

    if unknown_month > 0 {
        log::warn!("merge: {unknown_month} anchor rows had no month tag and were excluded");
    }
    out
}

/// Load, aggregate, and merge all sources for a run.
pub fn run(
    data_dir: &Path,
    months: &[Month],
    selection: &FileSelection,
    config: &WeightConfig,
) -> PipelineResult<Vec<MasterRecord>> {
    let files = |source: SourceId| -> Vec<std::path::PathBuf> {
        selection
            .files_for(source)
            .map(<[_]>::to_vec)
            .unwrap_or_else(|| discover_files(data_dir, source, months))
    };

    let anchor = load_tagged::<SubscriberRow>(SourceId::Subscriber, &files(SourceId::Subscriber))?;
    let arpu = aggregate_arpu(load_tagged(SourceId::Arpu, &files(SourceId::Arpu))?);
    let advance = aggregate_advance(
        load_tagged(SourceId::Advance, &files(SourceId::Advance))?,
        &config.unit_scale,
    );
    let topup = aggregate_topup(load_tagged(SourceId::Topup, &files(SourceId::Topup))?);
    let package = aggregate_package(load_tagged(SourceId::Package, &files(SourceId::Package))?);
    let usage = aggregate_usage(load_tagged(SourceId::Usage, &files(SourceId::Usage))?);

    let master = merge(anchor, &arpu, &advance, &topup, &package, &usage);
    log::info!("stage=merge master rows={}", master.len());
    Ok(master)
}
