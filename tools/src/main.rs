//! pipeline-runner: headless batch runner for the advance scoring pipeline.
//!
//! Usage:
//!   pipeline-runner --data-dir ./data --out-dir ./out
//!   pipeline-runner --data-dir ./data --out-dir ./out --months 202506,202507,202508
//!   pipeline-runner --out-dir ./out --stages classification,risk_scoring
//!   pipeline-runner --data-dir ./data --out-dir ./out --config weights.json --seed 7

use advance_core::{
    config::WeightConfig,
    pipeline::{Pipeline, PipelineOptions, RunSummary, Stage},
    types::Month,
};
use anyhow::{bail, Result};
use std::env;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let data_dir = str_arg(&args, "--data-dir").unwrap_or_else(|| "./data".into());
    let out_dir = str_arg(&args, "--out-dir").unwrap_or_else(|| "./out".into());
    let config_path = str_arg(&args, "--config");
    let months = parse_months(str_arg(&args, "--months").as_deref())?;
    let stages = parse_stages(str_arg(&args, "--stages").as_deref())?;
    let seed = str_arg(&args, "--seed").map(|s| s.parse::<u64>()).transpose()?;
    let budget = str_arg(&args, "--stage-budget-secs")
        .map(|s| s.parse::<u64>())
        .transpose()?;

    let config = match &config_path {
        Some(path) => WeightConfig::from_json_file(path.as_ref())?,
        None => WeightConfig::default(),
    };

    println!("advance scoring :: pipeline-runner");
    println!("  data_dir: {data_dir}");
    println!("  out_dir:  {out_dir}");
    println!("  config:   {}", config_path.as_deref().unwrap_or("<defaults>"));
    println!("  seed:     {}", seed.unwrap_or(config.clustering.seed));
    println!();

    let mut options = PipelineOptions::new(&data_dir, &out_dir);
    options.months = months;
    options.stages = stages;
    options.seed = seed;
    options.stage_budget_secs = budget;

    let mut pipeline = Pipeline::new(config, options)?;
    let summary = pipeline.run()?;
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("=== RUN SUMMARY ===");
    println!("  run_id: {}", summary.run_id);
    println!("  seed:   {}", summary.seed);
    for stage in &summary.stages {
        println!(
            "  {:<16} rows={:<8} elapsed_ms={}",
            stage.stage, stage.rows_out, stage.duration_ms
        );
    }
    if !summary.segment_counts.is_empty() {
        println!();
        println!("=== SEGMENTS ===");
        for (segment, count) in &summary.segment_counts {
            println!("  {segment:<18} {count}");
        }
    }
    if !summary.tier_counts.is_empty() {
        println!();
        println!("=== RISK TIERS ===");
        for (tier, count) in &summary.tier_counts {
            println!("  {tier:<8} {count}");
        }
        println!("  deliverable offers: {}", summary.deliverable_offers);
    }
}

fn str_arg(args: &[String], flag: &str) -> Option<String> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].clone())
}

fn parse_months(raw: Option<&str>) -> Result<Vec<Month>> {
    let Some(raw) = raw else { return Ok(Vec::new()) };
    let mut months = Vec::new();
    for token in raw.split(',').filter(|t| !t.is_empty()) {
        match Month::parse(token) {
            Some(month) => months.push(month),
            None => bail!("invalid month '{token}', expected YYYYMM"),
        }
    }
    Ok(months)
}

fn parse_stages(raw: Option<&str>) -> Result<Vec<Stage>> {
    let Some(raw) = raw else { return Ok(Vec::new()) };
    let mut stages = Vec::new();
    for token in raw.split(',').filter(|t| !t.is_empty()) {
        match Stage::parse(token) {
            Some(stage) => stages.push(stage),
            None => bail!(
                "unknown stage '{token}', expected one of merge, features, segmentation, classification, risk_scoring"
            ),
        }
    }
    Ok(stages)
}
