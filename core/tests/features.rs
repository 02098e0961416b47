use advance_core::features::{self, NO_ADVANCE_SENTINEL};
use advance_core::merge::MasterRecord;
use advance_core::types::Month;

fn month_row(isdn: &str, month: u32) -> MasterRecord {
    MasterRecord {
        isdn: isdn.into(),
        month: Month(month),
        subscriber_type: "PRE".into(),
        subscriber_status: "ACTIF".into(),
        ..MasterRecord::default()
    }
}

#[test]
fn trailing_windows_exclude_the_current_month() {
    let mut rows = vec![
        month_row("100", 202506),
        month_row("100", 202507),
        month_row("100", 202508),
    ];
    rows[0].topup_count = 2;
    rows[0].total_topup_amount = 10_000.0;
    rows[1].topup_count = 3;
    rows[1].total_topup_amount = 15_000.0;
    rows[2].topup_count = 99;
    rows[2].total_topup_amount = 999_999.0;

    let feats = features::build(&rows);
    let last = feats.iter().find(|r| r.month == Month(202508)).unwrap();

    assert_eq!(last.topup_count_1m, 3.0);
    assert_eq!(last.topup_amount_1m, 15_000.0);
    assert_eq!(last.topup_count_2m, 5.0);
    assert_eq!(last.topup_amount_3m, 25_000.0);

    // First month has no history at all.
    let first = feats.iter().find(|r| r.month == Month(202506)).unwrap();
    assert_eq!(first.topup_count_1m, 0.0);
    assert_eq!(first.topup_amount_3m, 0.0);
}

#[test]
fn advance_history_is_strictly_prior() {
    let mut rows = vec![
        month_row("100", 202506),
        month_row("100", 202507),
        month_row("100", 202508),
    ];
    rows[1].advance_count = 1;
    rows[1].has_advance_in_month = true;

    let feats = features::build(&rows);
    let by_month = |m: u32| feats.iter().find(|r| r.month == Month(m)).unwrap();

    // The advance month itself does not see its own advance.
    assert!(!by_month(202507).has_advance_history);
    assert_eq!(by_month(202507).months_since_last_advance, NO_ADVANCE_SENTINEL);

    assert!(by_month(202508).has_advance_history);
    assert_eq!(by_month(202508).months_since_last_advance, 1.0);
    assert_eq!(by_month(202508).advance_count_1m, 1.0);

    assert!(!by_month(202506).has_advance_history);
}

#[test]
fn months_since_last_advance_counts_calendar_months() {
    // The subscriber is absent from the registry in 202506 and 202507;
    // the counter still measures calendar distance, not row distance.
    let mut rows = vec![month_row("100", 202505), month_row("100", 202508)];
    rows[0].advance_count = 1;
    rows[0].has_advance_in_month = true;

    let feats = features::build(&rows);
    let last = feats.iter().find(|r| r.month == Month(202508)).unwrap();
    assert_eq!(last.months_since_last_advance, 3.0);

    // Across a year boundary the delta follows the month index.
    let mut rows = vec![month_row("200", 202511), month_row("200", 202602)];
    rows[0].advance_count = 1;
    rows[0].has_advance_in_month = true;

    let feats = features::build(&rows);
    let last = feats.iter().find(|r| r.month == Month(202602)).unwrap();
    assert_eq!(last.months_since_last_advance, 3.0);
}

#[test]
fn burn_rate_and_balance_flags() {
    let mut rows = vec![month_row("100", 202508), month_row("200", 202508)];
    rows[0].total_topup_amount = 10_000.0;
    rows[0].total_package_value = 25_000.0;
    rows[1].total_topup_amount = 0.0;
    rows[1].total_package_value = 5_000.0;

    let feats = features::build(&rows);
    let spender = feats.iter().find(|r| r.isdn == "100").unwrap();
    assert!((spender.burn_rate - 2.5).abs() < 1e-9);
    assert!(spender.burn_rate_high);
    assert!(spender.burn_rate_very_high);
    assert!(spender.balance_negative);

    // Spend with zero topups hits the sentinel burn rate.
    let ghost = feats.iter().find(|r| r.isdn == "200").unwrap();
    assert_eq!(ghost.burn_rate, 999.0);
    assert!(ghost.balance_negative);
}

#[test]
fn burn_rate_is_capped() {
    let mut rows = vec![month_row("100", 202508)];
    rows[0].total_topup_amount = 1_000.0;
    rows[0].total_package_value = 100_000.0;

    let feats = features::build(&rows);
    assert_eq!(feats[0].burn_rate, 5.0);
}

#[test]
fn tenure_is_measured_against_the_latest_batch_month() {
    let mut rows = vec![month_row("100", 202508), month_row("200", 202508)];
    rows[0].activation_date = "01/07/2025".into();
    rows[1].activation_date = "10/02/2020".into();

    let feats = features::build(&rows);
    let fresh = feats.iter().find(|r| r.isdn == "100").unwrap();
    // 2025-07-01 to 2025-08-01.
    assert_eq!(fresh.tenure_days, 31);
    assert!(fresh.is_new_customer);
    assert!(!fresh.is_mature_customer);

    let veteran = feats.iter().find(|r| r.isdn == "200").unwrap();
    assert!(veteran.tenure_days > 365);
    assert!(veteran.is_mature_customer);
}

#[test]
fn unparseable_activation_date_gets_sentinel_tenure() {
    let mut rows = vec![month_row("100", 202508)];
    rows[0].activation_date = "not-a-date".into();

    let feats = features::build(&rows);
    assert_eq!(feats[0].tenure_days, -1);
    assert!(!feats[0].is_new_customer);
    assert!(!feats[0].is_mature_customer);
}

#[test]
fn good_payer_threshold() {
    let mut rows = vec![month_row("100", 202508), month_row("200", 202508)];
    rows[0].avg_repayment_rate = 0.95;
    rows[1].avg_repayment_rate = 0.94;

    let feats = features::build(&rows);
    assert!(feats.iter().find(|r| r.isdn == "100").unwrap().is_good_payer);
    assert!(!feats.iter().find(|r| r.isdn == "200").unwrap().is_good_payer);
}

#[test]
fn topup_frequency_tiers() {
    let counts = [(0u32, "none"), (2, "low"), (5, "medium"), (6, "high")];
    for (count, tier) in counts {
        let mut rows = vec![month_row("100", 202508)];
        rows[0].topup_count = count;
        let feats = features::build(&rows);
        assert_eq!(feats[0].topup_frequency_tier, tier, "count={count}");
    }
}

#[test]
fn percentile_flags_mark_the_top_of_the_batch() {
    let mut rows: Vec<MasterRecord> = (0..8)
        .map(|i| {
            let mut r = month_row(&format!("{i}"), 202508);
            r.topup_count = i as u32;
            r.total_topup_amount = 1_000.0 * i as f64;
            r.avg_topup_amount = if i > 0 { 1_000.0 } else { 0.0 };
            r
        })
        .collect();
    rows[7].total_package_value = 90_000.0;

    let feats = features::build(&rows);
    let top = feats.iter().find(|r| r.isdn == "7").unwrap();
    assert!(top.high_topup_count);
    assert!(top.high_topup_total);
    assert!(top.high_package_value);
    assert!(top.package_value_p90);

    let bottom = feats.iter().find(|r| r.isdn == "0").unwrap();
    assert!(!bottom.high_topup_count);
    assert!(!bottom.high_package_value);
}

#[test]
fn stress_score_counts_its_component_flags() {
    let mut rows = vec![month_row("100", 202508), month_row("200", 202508)];
    // Heavy spender: negative balance, very high burn rate.
    rows[0].total_topup_amount = 10_000.0;
    rows[0].total_package_value = 40_000.0;

    let feats = features::build(&rows);
    let stressed = feats.iter().find(|r| r.isdn == "100").unwrap();
    // balance_negative + burn_rate_high + burn_rate_very_high + package p90.
    assert_eq!(stressed.financial_stress_score, 4);

    let calm = feats.iter().find(|r| r.isdn == "200").unwrap();
    // Zero topup and zero spend: balance 0 counts as low balance only.
    assert_eq!(calm.financial_stress_score, 1);
}

#[test]
fn interaction_features_combine_their_parents() {
    let mut rows: Vec<MasterRecord> = (0..4)
        .map(|i| {
            let mut r = month_row(&format!("{i}"), 202508);
            r.topup_count = i as u32;
            r
        })
        .collect();
    rows[3].avg_repayment_rate = 1.0;
    rows[3].outstanding_debt = 2_500.0;

    let feats = features::build(&rows);
    let heavy = feats.iter().find(|r| r.isdn == "3").unwrap();
    assert!(heavy.high_topup_count);
    assert!(heavy.heavy_user_good_payer);
    assert!(heavy.heavy_user_has_debt);
}
