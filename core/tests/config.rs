use advance_core::config::{WeightConfig, CONFIG_VERSION};
use advance_core::error::PipelineError;
use std::fs;

#[test]
fn defaults_validate() {
    WeightConfig::default().validate().expect("defaults must be valid");
}

#[test]
fn default_clustering_parameters() {
    let config = WeightConfig::default();
    assert_eq!(config.version, CONFIG_VERSION);
    assert_eq!(config.clustering.k, 3);
    assert_eq!(config.clustering.num_inits, 20);
    assert_eq!(config.clustering.max_iter, 500);
    assert_eq!(config.clustering.seed, 42);
}

#[test]
fn version_mismatch_is_rejected() {
    let mut config = WeightConfig::default();
    config.version = CONFIG_VERSION + 1;
    assert!(matches!(config.validate(), Err(PipelineError::InvalidConfig(_))));
}

#[test]
fn degenerate_clustering_is_rejected() {
    let mut config = WeightConfig::default();
    config.clustering.k = 1;
    assert!(config.validate().is_err());

    let mut config = WeightConfig::default();
    config.clustering.num_inits = 0;
    assert!(config.validate().is_err());
}

#[test]
fn inverted_tier_bounds_are_rejected() {
    let mut config = WeightConfig::default();
    config.risk.low_tier_max = 70.0;
    config.risk.medium_tier_max = 60.0;
    assert!(config.validate().is_err());
}

#[test]
fn inverted_clamp_bounds_are_rejected() {
    let mut config = WeightConfig::default();
    config.rules.quota_min_amount = 60_000.0;
    assert!(config.validate().is_err());
}

#[test]
fn partial_json_files_fall_back_to_defaults() {
    let path = std::env::temp_dir().join(format!(
        "advance-config-{}-partial.json",
        std::process::id()
    ));
    fs::write(
        &path,
        r#"{ "version": 1, "clustering": { "k": 4, "num_inits": 5, "max_iter": 100, "seed": 7 } }"#,
    )
    .unwrap();

    let config = WeightConfig::from_json_file(&path).expect("partial config loads");
    assert_eq!(config.clustering.k, 4);
    assert_eq!(config.clustering.seed, 7);
    // Unspecified sections keep their defaults.
    assert_eq!(config.rules.fallback_amount, 10_000.0);
    assert_eq!(config.risk.base_score, 50.0);
    let _ = fs::remove_file(&path);
}

#[test]
fn invalid_json_files_are_rejected_on_load() {
    let path = std::env::temp_dir().join(format!(
        "advance-config-{}-badversion.json",
        std::process::id()
    ));
    fs::write(&path, r#"{ "version": 99 }"#).unwrap();
    assert!(WeightConfig::from_json_file(&path).is_err());
    let _ = fs::remove_file(&path);
}

#[test]
fn unit_scale_correction_defaults() {
    let config = WeightConfig::default();
    assert!((config.unit_scale.corrected("EasyCredit", 50_000.0) - 5_000.0).abs() < 1e-9);
    assert!((config.unit_scale.corrected("ungdata247", 1_000.0) - 100.0).abs() < 1e-9);
    assert_eq!(config.unit_scale.corrected("classic", 1_000.0), 1_000.0);
}
