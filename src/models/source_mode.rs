//! Data source for a series
//!
//! Determines where the series store looks for an identifier.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::constants::layout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceMode {
    /// Daily security prices
    ///
    /// Data source: prices/<TICKER>.csv
    #[serde(alias = "securities", alias = "yahoo")]
    Price,

    /// FRED-MD monthly panel
    ///
    /// Data source: fred_md/current.csv (one column per series)
    #[serde(alias = "fredmd")]
    FredMd,

    /// FRED API, latest revised values
    ///
    /// Data source: fred_api/revised/<ID>.csv
    #[serde(alias = "fred-api-revised", alias = "fredapi")]
    FredApi,

    /// FRED API, values as first reported (vintages preserved)
    ///
    /// Data source: fred_api/as_reported/<ID>.csv
    #[serde(alias = "fredapiog")]
    FredApiAsReported,
}

impl Default for SourceMode {
    fn default() -> Self {
        SourceMode::Price
    }
}

impl SourceMode {
    /// Parse from string
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "price" | "securities" | "yahoo" => Ok(SourceMode::Price),
            "fred-md" | "fredmd" => Ok(SourceMode::FredMd),
            "fred-api" | "fred-api-revised" | "fredapi" => Ok(SourceMode::FredApi),
            "fred-api-as-reported" | "fredapiog" => Ok(SourceMode::FredApiAsReported),
            _ => Err(format!(
                "Invalid source: '{}'. Valid values: price, fred-md, fred-api, fred-api-as-reported",
                s
            )),
        }
    }

    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceMode::Price => "price",
            SourceMode::FredMd => "fred-md",
            SourceMode::FredApi => "fred-api",
            SourceMode::FredApiAsReported => "fred-api-as-reported",
        }
    }

    /// Whether this source holds macroeconomic series rather than securities
    pub fn is_macro(&self) -> bool {
        !matches!(self, SourceMode::Price)
    }

    /// Location of this source's data below `data_dir`
    ///
    /// A directory for per-identifier sources, the panel file for FRED-MD.
    pub fn location(&self, data_dir: &Path) -> PathBuf {
        match self {
            SourceMode::Price => data_dir.join(layout::PRICES_DIR),
            SourceMode::FredMd => data_dir.join(layout::FRED_MD_FILE),
            SourceMode::FredApi => data_dir.join(layout::FRED_API_REVISED_DIR),
            SourceMode::FredApiAsReported => data_dir.join(layout::FRED_API_AS_REPORTED_DIR),
        }
    }
}

impl fmt::Display for SourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_mode_default() {
        assert_eq!(SourceMode::default(), SourceMode::Price);
    }

    #[test]
    fn test_source_mode_from_str() {
        assert_eq!(SourceMode::from_str("price").unwrap(), SourceMode::Price);
        assert_eq!(SourceMode::from_str("YAHOO").unwrap(), SourceMode::Price);
        assert_eq!(SourceMode::from_str("fred-md").unwrap(), SourceMode::FredMd);
        assert_eq!(SourceMode::from_str("FREDAPI").unwrap(), SourceMode::FredApi);
        assert_eq!(
            SourceMode::from_str("fredapiog").unwrap(),
            SourceMode::FredApiAsReported
        );
        assert!(SourceMode::from_str("bloomberg").is_err());
    }

    #[test]
    fn test_source_mode_round_trips_through_as_str() {
        for mode in [
            SourceMode::Price,
            SourceMode::FredMd,
            SourceMode::FredApi,
            SourceMode::FredApiAsReported,
        ] {
            assert_eq!(SourceMode::from_str(mode.as_str()).unwrap(), mode);
        }
    }

    #[test]
    fn test_source_mode_serialize() {
        let json = serde_json::to_string(&SourceMode::FredApiAsReported).unwrap();
        assert_eq!(json, r#""fred-api-as-reported""#);

        let parsed: SourceMode = serde_json::from_str(r#""yahoo""#).unwrap();
        assert_eq!(parsed, SourceMode::Price);
    }

    #[test]
    fn test_is_macro() {
        assert!(!SourceMode::Price.is_macro());
        assert!(SourceMode::FredMd.is_macro());
        assert!(SourceMode::FredApiAsReported.is_macro());
    }
}
