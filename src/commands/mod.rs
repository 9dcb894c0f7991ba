pub mod cache;
pub mod correlate;
pub mod list;
pub mod status;
pub mod warm;

use crate::models::SourceMode;

/// Tokio runtime for one command, or exit
pub(crate) fn runtime() -> tokio::runtime::Runtime {
    match tokio::runtime::Runtime::new() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("❌ Failed to create async runtime: {}", e);
            std::process::exit(1);
        }
    }
}

/// Tickers are case-insensitive; macro series codes are kept as written
pub(crate) fn normalize_target(target: &str, source: SourceMode) -> String {
    let target = target.trim();
    match source {
        SourceMode::Price => target.to_uppercase(),
        _ => target.to_string(),
    }
}

pub(crate) fn parse_source(source: &str) -> SourceMode {
    match SourceMode::from_str(source) {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_target() {
        assert_eq!(normalize_target(" spy ", SourceMode::Price), "SPY");
        assert_eq!(normalize_target("S&P div yield", SourceMode::FredMd), "S&P div yield");
        assert_eq!(normalize_target(" indpro ", SourceMode::FredApi), "indpro");
        assert_eq!(normalize_target("gdp", SourceMode::FredApiAsReported), "gdp");
    }
}
