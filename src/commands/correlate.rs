//! `correlate` command
//!
//! Usage:
//! - `correlate SPY --start-year 2018`
//! - `correlate INDPRO --source fred-md --filter sector=Energy --cap-range mid..`
//! - `correlate AAPL --exclude-otc --display detrended --json`

use super::{normalize_target, runtime};
use crate::error::{AppError, Result};
use crate::models::{AppConfig, DetrendMethod, DisplayMode, SourceMode};
use crate::services::{CorrelationRequest, CorrelationResponse, CorrelationService, DisplayCandidate, Predicate};

pub struct CorrelateArgs {
    pub target: String,
    pub source: String,
    pub start_year: i32,
    pub top_n: Option<usize>,
    pub exclude_otc: bool,
    pub monthly: bool,
    pub reload: bool,
    pub display: String,
    pub detrend: String,
    pub filters: Vec<String>,
    pub cap_range: Option<String>,
    pub json: bool,

    /// Show the strongest positive and negative correlations separately
    pub split: bool,
}

impl CorrelateArgs {
    pub fn to_request(&self) -> Result<CorrelationRequest> {
        let mut predicates = self
            .filters
            .iter()
            .map(|f| Predicate::parse(f))
            .collect::<Result<Vec<_>>>()?;
        if let Some(range) = &self.cap_range {
            predicates.push(Predicate::parse_cap_range(range)?);
        }

        let source_mode = SourceMode::from_str(&self.source).map_err(AppError::InvalidInput)?;
        Ok(CorrelationRequest {
            target: normalize_target(&self.target, source_mode),
            start_year: self.start_year,
            top_n: self.top_n,
            exclude_otc: self.exclude_otc,
            monthly_resample: self.monthly,
            source_mode,
            reload: self.reload,
            predicates,
            display_mode: DisplayMode::from_str(&self.display).map_err(AppError::InvalidInput)?,
            detrend: DetrendMethod::from_str(&self.detrend).map_err(AppError::InvalidInput)?,
        })
    }
}

pub fn run(config: AppConfig, args: CorrelateArgs) {
    let request = match args.to_request() {
        Ok(request) => request,
        Err(e) => {
            eprintln!("❌ Error: {}", e);
            std::process::exit(1);
        }
    };

    let rt = runtime();
    let result = rt.block_on(async {
        let service = CorrelationService::open(config).await?;
        service.run(&request).await
    });

    match result {
        Ok(response) if args.json => match serde_json::to_string_pretty(&response) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("❌ Error: {}", e);
                std::process::exit(1);
            }
        },
        Ok(response) => print_response(&request, &response, args.split),
        Err(e) => {
            eprintln!("❌ Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_response(request: &CorrelationRequest, response: &CorrelationResponse, split: bool) {
    println!(
        "🔗 {} ({}) since {} | detrend: {} | monthly: {}",
        request.target, request.source_mode, request.start_year, request.detrend, response.key.monthly_resample
    );
    if response.stale {
        println!("⚠️  Source unavailable, showing ranking computed {}", response.computed_at.format("%Y-%m-%d %H:%M"));
    }
    for predicate in &request.predicates {
        println!("   filter: {}", predicate);
    }
    println!();

    if split {
        println!("📈 Strongest positive");
        print_table(&response.strongest_positive);
        println!("\n📉 Strongest negative");
        print_table(&response.strongest_negative);
    } else {
        print_table(&response.candidates);
    }

    let skipped = &response.skipped;
    println!(
        "\n📊 {} ranked, {} filtered out, {} skipped (overlap {}, constant {}, short {}, partial {}, unavailable {})",
        response.total_ranked,
        response.filtered_out,
        skipped.total(),
        skipped.insufficient_overlap,
        skipped.zero_variance,
        skipped.insufficient_data,
        skipped.incomplete_coverage,
        skipped.unavailable
    );
    println!("💾 Cache {} (data {})", response.outcome, response.fingerprint);
}

fn print_table(candidates: &[DisplayCandidate]) {
    if candidates.is_empty() {
        println!("⚠️  No candidates matched");
        return;
    }
    println!("   {:>3}  {:<12} {:>8} {:>7}  {:<24} {}", "#", "SYMBOL", "R", "POINTS", "SECTOR", "CAP");
    for (i, c) in candidates.iter().enumerate() {
        println!(
            "   {:>3}  {:<12} {:>+8.4} {:>7}  {:<24} {}",
            i + 1,
            c.identifier,
            c.coefficient,
            c.overlap,
            truncate(&c.metadata.sector.to_string(), 24),
            c.metadata.market_cap
        );
    }
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(width.saturating_sub(1)).collect();
        cut.push('…');
        cut
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MarketCap, MetadataField};

    fn args() -> CorrelateArgs {
        CorrelateArgs {
            target: " spy ".to_string(),
            source: "fred-api".to_string(),
            start_year: 2018,
            top_n: Some(5),
            exclude_otc: true,
            monthly: false,
            reload: false,
            display: "detrended".to_string(),
            detrend: "diff".to_string(),
            filters: vec!["sector=Energy,Utilities".to_string()],
            cap_range: Some("mid..large".to_string()),
            json: false,
            split: false,
        }
    }

    #[test]
    fn test_to_request() {
        let request = args().to_request().unwrap();
        assert_eq!(request.target, "spy");
        assert_eq!(request.source_mode, SourceMode::FredApi);
        assert_eq!(request.display_mode, DisplayMode::Detrended);
        assert_eq!(request.detrend, DetrendMethod::FirstDifference);
        assert_eq!(
            request.predicates,
            vec![
                Predicate::one_of(MetadataField::Sector, ["energy", "utilities"]),
                Predicate::market_cap_between(MarketCap::Mid, MarketCap::Large),
            ]
        );
    }

    #[test]
    fn test_macro_codes_keep_their_case() {
        let request = CorrelateArgs {
            target: " Indpro ".to_string(),
            source: "fred-md".to_string(),
            ..args()
        };
        let request = request.to_request().unwrap();
        assert_eq!(request.target, "Indpro");
        assert_eq!(request.source_mode, SourceMode::FredMd);

        let price = CorrelateArgs {
            source: "price".to_string(),
            ..args()
        };
        assert_eq!(price.to_request().unwrap().target, "SPY");
    }

    #[test]
    fn test_bad_filter_is_rejected() {
        let bad = CorrelateArgs {
            filters: vec!["sector".to_string()],
            ..args()
        };
        assert!(matches!(bad.to_request(), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("Energy", 24), "Energy");
        assert_eq!(truncate("Information Technology", 8), "Informa…");
    }
}
