use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{CorrelationResult, DetrendMethod, SourceMode};

/// Composite key of a cached correlation ranking
///
/// Two requests with equal keys get equal results unless the target's raw
/// data changed. `top_n` and display predicates are deliberately absent:
/// they are applied on top of the full cached ranking.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub target: String,
    pub start_year: i32,
    pub source_mode: SourceMode,
    pub exclude_otc: bool,
    pub monthly_resample: bool,
    pub detrend: DetrendMethod,
}

impl CacheKey {
    /// Stable file stem: `<hex(target)>--<source>-<year>-otc<0|1>-m<0|1>-<detrend>`
    ///
    /// The target is hex-encoded so tickers such as `BRK-A` or `^GSPC` are
    /// safe in file names and never collide with the separators.
    pub fn encode(&self) -> String {
        format!(
            "{}--{}-{}-otc{}-m{}-{}",
            hex::encode(self.target.as_bytes()),
            self.source_mode.as_str(),
            self.start_year,
            u8::from(self.exclude_otc),
            u8::from(self.monthly_resample),
            self.detrend.as_str()
        )
    }

    /// Parse a stem produced by [`CacheKey::encode`]
    pub fn decode(stem: &str) -> Option<Self> {
        let (target_hex, rest) = stem.split_once("--")?;
        let target = String::from_utf8(hex::decode(target_hex).ok()?).ok()?;

        // Source names contain dashes, so peel fields off the right
        let (rest, detrend) = rest.rsplit_once('-')?;
        let (rest, monthly) = rest.rsplit_once('-')?;
        let (rest, otc) = rest.rsplit_once('-')?;
        let (source, year) = rest.rsplit_once('-')?;

        Some(Self {
            target,
            start_year: year.parse().ok()?,
            source_mode: SourceMode::from_str(source).ok()?,
            exclude_otc: parse_flag(otc, "otc")?,
            monthly_resample: parse_flag(monthly, "m")?,
            detrend: DetrendMethod::from_str(detrend).ok()?,
        })
    }
}

/// Persisted ranking plus the data version it was computed from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub result: CorrelationResult,
    pub created_at: DateTime<Utc>,

    /// Fingerprint of the target's raw data at computation time
    pub fingerprint: String,
}

impl CacheEntry {
    pub fn new(key: CacheKey, result: CorrelationResult, fingerprint: impl Into<String>) -> Self {
        Self {
            key,
            result,
            created_at: Utc::now(),
            fingerprint: fingerprint.into(),
        }
    }

    pub fn is_fresh_for(&self, fingerprint: &str) -> bool {
        self.fingerprint == fingerprint
    }
}

fn parse_flag(raw: &str, prefix: &str) -> Option<bool> {
    match raw.strip_prefix(prefix)? {
        "0" => Some(false),
        "1" => Some(true),
        _ => None,
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{} from {}, otc={}, monthly={}, detrend={}]",
            self.target,
            self.source_mode,
            self.start_year,
            if self.exclude_otc { "excluded" } else { "included" },
            self.monthly_resample,
            self.detrend
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(target: &str, source_mode: SourceMode) -> CacheKey {
        CacheKey {
            target: target.to_string(),
            start_year: 2018,
            source_mode,
            exclude_otc: true,
            monthly_resample: false,
            detrend: DetrendMethod::Linear,
        }
    }

    #[test]
    fn test_encode_is_stable() {
        let stem = key("AAPL", SourceMode::Price).encode();
        assert_eq!(stem, "4141504c--price-2018-otc1-m0-linear");
    }

    #[test]
    fn test_decode_handles_dashed_sources_and_tickers() {
        for k in [
            key("BRK-A", SourceMode::FredApiAsReported),
            key("^GSPC", SourceMode::FredMd),
            key("RPI", SourceMode::FredApi),
        ] {
            assert_eq!(CacheKey::decode(&k.encode()), Some(k));
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(CacheKey::decode("not-a-key"), None);
        assert_eq!(CacheKey::decode("zz--price-2018-otc1-m0-linear"), None);
        assert_eq!(CacheKey::decode("4141--price-2018-otc7-m0-linear"), None);
    }
}
