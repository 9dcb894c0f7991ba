//! Shared constants
//!
//! File layout, column names and numeric thresholds used across the
//! series store, preprocessor, engine and cache.

/// Minimum number of points for a meaningful correlation
///
/// Applies both to a processed series and to the aligned overlap between
/// target and candidate.
pub const MIN_CORRELATION_POINTS: usize = 20;

/// Number of ranked candidates returned when the caller does not specify one
pub const DEFAULT_TOP_N: usize = 10;

/// Start year used when the caller does not specify one
pub const DEFAULT_START_YEAR: i32 = 2010;

/// Accepted range for a requested start year
pub const MIN_START_YEAR: i32 = 1800;
pub const MAX_START_YEAR: i32 = 9999;

/// Start years pre-computed by the `warm` command
pub const WARM_START_YEARS: &[i32] = &[2010, 2018, 2021, 2022, 2023];

/// Variance below this (relative to the squared mean magnitude) counts as constant
pub const ZERO_VARIANCE_EPSILON: f64 = 1e-12;

/// A FRED API series whose median spacing is at least this many days is monthly
pub const MONTHLY_SPACING_DAYS: i64 = 25;

/// Number of hex characters kept from the SHA-256 fingerprint
pub const FINGERPRINT_HEX_LEN: usize = 16;

/// Directory layout below the data directory
pub mod layout {
    pub const PRICES_DIR: &str = "prices";
    pub const FRED_MD_FILE: &str = "fred_md/current.csv";
    pub const FRED_API_REVISED_DIR: &str = "fred_api/revised";
    pub const FRED_API_AS_REPORTED_DIR: &str = "fred_api/as_reported";
    pub const FRED_API_SERIES_LIST: &str = "fred_api/series_list.txt";
    pub const METADATA_DIR: &str = "metadata";
    pub const CACHE_DIR: &str = "correlation_cache";
}

/// Accepted header names, in priority order
pub mod columns {
    pub const TIME: &[&str] = &["time", "date", "Date", "DATE", "sasdate", "observation_date"];
    pub const VALUE: &[&str] = &["adj_close", "Adj Close", "close", "Close", "value", "VALUE"];
}

/// FRED placeholder for a missing observation
pub const FRED_MISSING_VALUE: &str = ".";

/// Raw metadata strings that mean "unknown"
pub const MISSING_SENTINELS: &[&str] = &["", "nan", "NaN", "Missing", "None", "null", "N/A"];
