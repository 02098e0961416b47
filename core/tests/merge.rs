use advance_core::config::UnitScaleCorrection;
use advance_core::merge::{
    self, AdvanceRow, ArpuRow, MasterRecord, PackageRow, SubscriberRow, TopupRow,
};
use advance_core::source::Tagged;
use advance_core::types::Month;
use std::collections::HashMap;

const M: Month = Month(202508);

fn tag<T>(row: T) -> Tagged<T> {
    Tagged { month: Some(M), row }
}

fn advance_row(isdn: &str, kind: &str, service: &str, amount: f64) -> Tagged<AdvanceRow> {
    tag(AdvanceRow {
        isdn: isdn.into(),
        txn_kind: kind.into(),
        service_type: service.into(),
        amount,
    })
}

fn topup_row(isdn: &str, amount: f64, channel: &str) -> Tagged<TopupRow> {
    tag(TopupRow { isdn: isdn.into(), amount, channel: channel.into() })
}

fn subscriber_row(isdn: &str) -> Tagged<SubscriberRow> {
    tag(SubscriberRow {
        isdn: isdn.into(),
        subscriber_type: "PRE".into(),
        status: "ACTIF".into(),
        activation_date: "15/01/2024".into(),
        expire_date: String::new(),
    })
}

#[test]
fn unit_scale_correction_applies_only_to_listed_services() {
    let correction = UnitScaleCorrection::default();
    let rows = vec![
        advance_row("100", "advance", "EasyCredit", 50_000.0),
        advance_row("100", "advance", "classic", 5_000.0),
    ];
    let agg = merge::aggregate_advance(rows, &correction);
    let a = &agg[&("100".to_string(), M)];

    // EasyCredit 50,000 is recorded in tenths: corrected to 5,000.
    assert_eq!(a.count, 2);
    assert!((a.total - 10_000.0).abs() < 1e-9);
    assert!((a.max - 5_000.0).abs() < 1e-9);
}

#[test]
fn repayment_rate_and_outstanding_debt() {
    let correction = UnitScaleCorrection::default();
    let rows = vec![
        advance_row("100", "advance", "classic", 10_000.0),
        advance_row("100", "repayment", "classic", 4_000.0),
    ];
    let agg = merge::aggregate_advance(rows, &correction);
    let a = &agg[&("100".to_string(), M)];

    assert!((a.repayment_rate() - 0.4).abs() < 1e-9);
    assert!((a.outstanding_debt() - 6_000.0).abs() < 1e-9);

    // Repayments alone never produce negative debt.
    let rows = vec![advance_row("200", "repayment", "classic", 9_000.0)];
    let agg = merge::aggregate_advance(rows, &correction);
    let a = &agg[&("200".to_string(), M)];
    assert_eq!(a.outstanding_debt(), 0.0);
    assert_eq!(a.repayment_rate(), 0.0);
}

#[test]
fn modal_category_ties_resolve_to_first_encountered() {
    let rows = vec![
        topup_row("100", 1_000.0, "retail"),
        topup_row("100", 2_000.0, "app"),
        topup_row("100", 3_000.0, "app"),
        topup_row("100", 4_000.0, "retail"),
    ];
    let agg = merge::aggregate_topup(rows);
    let t = &agg[&("100".to_string(), M)];
    assert_eq!(t.top_channel(), "retail");
}

#[test]
fn topup_stddev_is_sample_based_and_zero_for_singletons() {
    let rows = vec![topup_row("100", 5_000.0, "app")];
    let agg = merge::aggregate_topup(rows);
    assert_eq!(agg[&("100".to_string(), M)].stddev(), 0.0);

    let rows = vec![
        topup_row("200", 1_000.0, "app"),
        topup_row("200", 3_000.0, "app"),
    ];
    let agg = merge::aggregate_topup(rows);
    let t = &agg[&("200".to_string(), M)];
    // Sample stddev of {1000, 3000} is sqrt(2_000_000).
    assert!((t.stddev() - 2_000_000.0f64.sqrt()).abs() < 1e-6);
}

#[test]
fn package_active_and_renewed_counts() {
    let rows = vec![
        tag(PackageRow {
            isdn: "100".into(),
            package_code: "D7".into(),
            price: 10_000.0,
            cycle_days: 7.0,
            status: "active".into(),
            renewed_at: "2025-08-03T10:00:00".into(),
        }),
        tag(PackageRow {
            isdn: "100".into(),
            package_code: "D30".into(),
            price: 30_000.0,
            cycle_days: 30.0,
            status: "expired".into(),
            renewed_at: String::new(),
        }),
    ];
    let agg = merge::aggregate_package(rows);
    let p = &agg[&("100".to_string(), M)];
    assert_eq!(p.count, 2);
    assert_eq!(p.active, 1);
    assert_eq!(p.renewed, 1);
    assert!((p.price_mean() - 20_000.0).abs() < 1e-9);
}

#[test]
fn malformed_numeric_fields_coerce_to_zero() {
    let data = "isdn,amount,channel\n100,not-a-number,app\n100,2500,app\n";
    let mut reader = csv::Reader::from_reader(data.as_bytes());
    let rows: Vec<Tagged<TopupRow>> = reader
        .deserialize::<TopupRow>()
        .map(|r| tag(r.expect("lenient parse")))
        .collect();
    let agg = merge::aggregate_topup(rows);
    let t = &agg[&("100".to_string(), M)];
    assert_eq!(t.count, 2);
    assert!((t.total - 2_500.0).abs() < 1e-9);
}

#[test]
fn left_join_keeps_anchor_rows_and_fills_defaults() {
    let anchor = vec![subscriber_row("100"), subscriber_row("200")];
    let arpu_rows = vec![tag(ArpuRow {
        isdn: "100".into(),
        arpu_call: 4_000.0,
        arpu_sms: 1_000.0,
        arpu_data: 5_000.0,
        arpu_total: 10_000.0,
    })];
    let arpu = merge::aggregate_arpu(arpu_rows);
    let empty_adv = HashMap::new();
    let empty_top = HashMap::new();
    let empty_pkg = HashMap::new();
    let empty_use = HashMap::new();

    let master = merge::merge(anchor, &arpu, &empty_adv, &empty_top, &empty_pkg, &empty_use);
    assert_eq!(master.len(), 2);

    let with_arpu = master.iter().find(|r| r.isdn == "100").unwrap();
    assert!((with_arpu.arpu_total - 10_000.0).abs() < 1e-9);

    let bare = master.iter().find(|r| r.isdn == "200").unwrap();
    assert_eq!(bare.arpu_total, 0.0);
    assert_eq!(bare.advance_count, 0);
    assert!(!bare.has_advance_in_month);
    assert_eq!(bare.most_used_advance_service, "Unknown");
    assert_eq!(bare.most_used_topup_channel, "Unknown");
}

#[test]
fn anchor_rows_without_month_tags_are_excluded() {
    let anchor = vec![
        subscriber_row("100"),
        Tagged { month: None, row: subscriber_row("999").row },
    ];
    let master = merge::merge(
        anchor,
        &HashMap::new(),
        &HashMap::new(),
        &HashMap::new(),
        &HashMap::new(),
        &HashMap::new(),
    );
    assert_eq!(master.len(), 1);
    assert_eq!(master[0].isdn, "100");
}

#[test]
fn master_record_defaults_are_merge_fill_values() {
    let rec = MasterRecord::default();
    assert_eq!(rec.subscriber_type, "Unknown");
    assert_eq!(rec.arpu_total, 0.0);
    assert_eq!(rec.avg_repayment_rate, 0.0);
}
