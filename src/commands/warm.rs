//! `warm` command: fill the cache ahead of interactive use
//!
//! Usage:
//! - `warm SPY QQQ`
//! - `warm INDPRO --source fred-md --years 2010,2020`

use super::{normalize_target, parse_source, runtime};
use crate::constants::WARM_START_YEARS;
use crate::models::AppConfig;
use crate::services::{CorrelationRequest, CorrelationService};
use std::time::Instant;

pub fn run(config: AppConfig, targets: Vec<String>, source: String, years: Vec<i32>, exclude_otc: bool, monthly: bool) {
    let years = if years.is_empty() { WARM_START_YEARS.to_vec() } else { years };
    let source_mode = parse_source(&source);
    let targets: Vec<String> = targets.iter().map(|t| normalize_target(t, source_mode)).collect();
    let template = CorrelationRequest {
        source_mode,
        exclude_otc,
        monthly_resample: monthly,
        ..CorrelationRequest::new("")
    };

    println!(
        "🔥 Warming {} target(s) x {} start year(s): {:?}",
        targets.len(),
        years.len(),
        years
    );

    let rt = runtime();
    let started = Instant::now();
    let result = rt.block_on(async {
        let service = CorrelationService::open(config).await?;
        Ok::<_, crate::error::AppError>(service.warm(&targets, &years, &template).await)
    });

    let reports = match result {
        Ok(reports) => reports,
        Err(e) => {
            eprintln!("❌ Error: {}", e);
            std::process::exit(1);
        }
    };

    let mut failed = 0;
    for report in &reports {
        match &report.outcome {
            Ok(outcome) => println!(
                "   ✅ {} from {}: {} ({} ranked)",
                report.target, report.start_year, outcome, report.ranked
            ),
            Err(reason) => {
                failed += 1;
                println!("   ❌ {} from {}: {}", report.target, report.start_year, reason);
            }
        }
    }

    println!(
        "\n📊 {} done, {} failed in {:.1}s",
        reports.len() - failed,
        failed,
        started.elapsed().as_secs_f64()
    );
    if failed > 0 {
        std::process::exit(1);
    }
}
