use advance_core::classify::{self, ProductKind, RuleId, USAGE_UNLIMITED};
use advance_core::config::WeightConfig;
use advance_core::features::{self, FeatureRecord};
use advance_core::merge::MasterRecord;
use advance_core::segmentation::{Segment, SegmentRecord};
use advance_core::types::Month;

fn prepaid_row(isdn: &str, month: u32) -> MasterRecord {
    MasterRecord {
        isdn: isdn.into(),
        month: Month(month),
        subscriber_type: "PRE".into(),
        subscriber_status: "ACTIF".into(),
        ..MasterRecord::default()
    }
}

fn segment_for(isdn: &str, month: u32) -> SegmentRecord {
    SegmentRecord {
        isdn: isdn.into(),
        month: Month(month),
        cluster: 0,
        segment: Segment::SimilarToExisting,
        is_advance_user: false,
    }
}

fn classify_one(rows: Vec<MasterRecord>, isdn: &str) -> classify::Recommendation {
    let feats = features::build(&rows);
    let segments = vec![segment_for(isdn, 202508)];
    let recs = classify::run(&feats, &segments, &WeightConfig::default());
    assert_eq!(recs.len(), 1);
    recs.into_iter().next().unwrap()
}

#[test]
fn voice_heavy_subscriber_gets_the_quota_product() {
    let mut row = prepaid_row("100", 202508);
    row.arpu_call = 15_000.0;
    row.arpu_sms = 2_000.0;
    row.arpu_data = 3_000.0;
    row.arpu_total = 20_000.0;

    let rec = classify_one(vec![row], "100");
    assert_eq!(rec.rule, RuleId::VoiceQuota);
    assert_eq!(rec.product, ProductKind::Quota);
    // 0.8 × 20,000 = 16,000; 20% margin.
    assert_eq!(rec.recommended_amount, 16_000.0);
    assert!((rec.expected_revenue - 3_200.0).abs() < 1e-9);
    assert_eq!(rec.usage_window_hours, 48);
}

#[test]
fn quota_amount_clamps_before_rounding() {
    let mut row = prepaid_row("100", 202508);
    row.arpu_call = 200_000.0;
    row.arpu_total = 200_000.0;

    let rec = classify_one(vec![row], "100");
    assert_eq!(rec.rule, RuleId::VoiceQuota);
    assert_eq!(rec.recommended_amount, 50_000.0);
    assert_eq!(rec.usage_window_hours, 60);

    let mut row = prepaid_row("200", 202508);
    row.arpu_call = 5_000.0;
    row.arpu_total = 5_000.0;

    let rec = classify_one(vec![row], "200");
    // 0.8 × 5,000 clamps up to the 10,000 floor.
    assert_eq!(rec.recommended_amount, 10_000.0);
    assert_eq!(rec.usage_window_hours, 36);
}

#[test]
fn vip_topup_history_gets_the_fee_product_unlimited() {
    // Balanced ARPU so the quota rule does not fire first.
    let mut prior = prepaid_row("100", 202507);
    prior.topup_count = 2;
    prior.total_topup_amount = 60_000.0;
    let mut current = prepaid_row("100", 202508);
    current.arpu_call = 50_000.0;
    current.arpu_data = 100_000.0;
    current.arpu_total = 150_000.0;

    let rec = classify_one(vec![prior, current], "100");
    assert_eq!(rec.rule, RuleId::VipFee);
    assert_eq!(rec.product, ProductKind::Fee);
    assert_eq!(rec.recommended_amount, 50_000.0);
    assert!((rec.expected_revenue - 15_000.0).abs() < 1e-9);
    assert_eq!(rec.usage_window_hours, USAGE_UNLIMITED);
}

#[test]
fn fee_product_drops_to_base_amount_below_the_vip_arpu_bar() {
    let mut prior = prepaid_row("100", 202507);
    prior.topup_count = 1;
    prior.total_topup_amount = 55_000.0;
    let mut current = prepaid_row("100", 202508);
    current.arpu_data = 40_000.0;
    current.arpu_total = 40_000.0;

    let rec = classify_one(vec![prior, current], "100");
    assert_eq!(rec.rule, RuleId::VipFee);
    assert_eq!(rec.recommended_amount, 25_000.0);
}

#[test]
fn frequent_topups_get_the_free_product() {
    let mut prior = prepaid_row("100", 202507);
    prior.topup_count = 2;
    prior.total_topup_amount = 8_000.0;
    let mut current = prepaid_row("100", 202508);
    current.arpu_data = 10_000.0;
    current.arpu_total = 10_000.0;

    let rec = classify_one(vec![prior, current], "100");
    assert_eq!(rec.rule, RuleId::FrequentTopup);
    assert_eq!(rec.product, ProductKind::Free);
    // 1.2 × 10,000 = 12,000; 30% margin.
    assert_eq!(rec.recommended_amount, 12_000.0);
    assert!((rec.expected_revenue - 3_600.0).abs() < 1e-9);
    assert_eq!(rec.usage_window_hours, 36);
}

#[test]
fn everyone_else_gets_the_fallback_offer() {
    let row = prepaid_row("100", 202508);
    let rec = classify_one(vec![row], "100");
    assert_eq!(rec.rule, RuleId::Fallback);
    assert_eq!(rec.product, ProductKind::Free);
    assert_eq!(rec.recommended_amount, 10_000.0);
    assert_eq!(rec.expected_revenue, 3_000.0);
    assert_eq!(rec.usage_window_hours, 24);
}

#[test]
fn rule_order_is_first_match_wins() {
    // Qualifies for the quota rule AND the fee rule; quota wins.
    let mut prior = prepaid_row("100", 202507);
    prior.topup_count = 3;
    prior.total_topup_amount = 90_000.0;
    let mut current = prepaid_row("100", 202508);
    current.arpu_call = 120_000.0;
    current.arpu_total = 150_000.0;

    let rec = classify_one(vec![prior, current], "100");
    assert_eq!(rec.rule, RuleId::VoiceQuota);
}

#[test]
fn postpaid_subscribers_are_excluded() {
    let mut row = prepaid_row("100", 202508);
    row.subscriber_type = "POST".into();

    let feats = features::build(&vec![row]);
    let segments = vec![segment_for("100", 202508)];
    let recs = classify::run(&feats, &segments, &WeightConfig::default());
    assert!(recs.is_empty());
}

#[test]
fn only_expansion_segments_receive_offers() {
    let rows = vec![
        prepaid_row("100", 202508),
        prepaid_row("200", 202508),
        prepaid_row("300", 202508),
        prepaid_row("400", 202508),
    ];
    let feats = features::build(&rows);

    let mut segments = vec![
        segment_for("100", 202508),
        segment_for("200", 202508),
        segment_for("300", 202508),
        segment_for("400", 202508),
    ];
    segments[0].segment = Segment::ExistingUser;
    segments[0].is_advance_user = true;
    segments[1].segment = Segment::UnlikelyAdopter;
    segments[2].segment = Segment::SimilarToExisting;
    segments[3].segment = Segment::MediumPotential;

    let recs = classify::run(&feats, &segments, &WeightConfig::default());
    let isdns: Vec<&str> = recs.iter().map(|r| r.isdn.as_str()).collect();
    // GROUP_1 already uses advances, GROUP_3 was ruled out; only the
    // two GROUP_2 subscribers are offered anything.
    assert_eq!(isdns, ["300", "400"]);
}

#[test]
fn zero_arpu_yields_zero_voice_share() {
    let feats = features::build(&vec![prepaid_row("100", 202508)]);
    assert_eq!(classify::voice_sms_pct(&feats[0]), 0.0);
}

#[test]
fn rounding_is_to_the_nearest_thousand() {
    assert_eq!(classify::round_to_thousand(16_400.0), 16_000.0);
    assert_eq!(classify::round_to_thousand(16_500.0), 17_000.0);
    assert_eq!(classify::round_to_thousand(16_600.0), 17_000.0);
}

#[test]
fn usage_window_table_boundaries() {
    let rules = WeightConfig::default().rules;
    assert_eq!(classify::usage_hours(5_000.0, &rules), 24);
    assert_eq!(classify::usage_hours(5_001.0, &rules), 36);
    assert_eq!(classify::usage_hours(15_000.0, &rules), 36);
    assert_eq!(classify::usage_hours(30_000.0, &rules), 48);
    assert_eq!(classify::usage_hours(30_001.0, &rules), 60);
}

#[test]
fn recommendations_carry_their_scoring_inputs() {
    let mut prior = prepaid_row("100", 202507);
    prior.topup_count = 2;
    prior.total_topup_amount = 8_000.0;
    let mut current = prepaid_row("100", 202508);
    current.arpu_total = 10_000.0;
    current.avg_topup_amount = 4_000.0;

    let rec = classify_one(vec![prior, current], "100");
    assert_eq!(rec.topup_count_1m, 2.0);
    assert_eq!(rec.topup_amount_1m, 8_000.0);
    assert_eq!(rec.avg_topup_amount, 4_000.0);
    assert_eq!(rec.arpu_total, 10_000.0);
}

fn _assert_send_sync<T: Send + Sync>() {}

#[test]
fn records_are_thread_safe() {
    _assert_send_sync::<FeatureRecord>();
    _assert_send_sync::<classify::Recommendation>();
}
