use std::path::PathBuf;

use crate::constants::{DEFAULT_TOP_N, MIN_CORRELATION_POINTS};
use crate::error::{AppError, Result};
use crate::utils::{env_bool, env_usize, get_cache_dir, get_data_dir};

/// Process-wide configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Root of the input data (prices, FRED, metadata)
    pub data_dir: PathBuf,

    /// Where cache entries are persisted
    pub cache_dir: PathBuf,

    /// Minimum points for a processed series and for an aligned overlap
    pub min_points: usize,

    /// Ranked candidates returned when a request does not say
    pub default_top_n: usize,

    /// Skip candidates whose history does not span the start month through
    /// the target's last month
    pub require_full_coverage: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from("data");
        Self {
            cache_dir: data_dir.join(crate::constants::layout::CACHE_DIR),
            data_dir,
            min_points: MIN_CORRELATION_POINTS,
            default_top_n: DEFAULT_TOP_N,
            require_full_coverage: true,
        }
    }
}

impl AppConfig {
    /// Build from `CORR_DATA_DIR`, `CORR_CACHE_DIR`, `MIN_CORRELATION_POINTS`,
    /// `DEFAULT_TOP_N` and `REQUIRE_FULL_COVERAGE`
    pub fn from_env() -> Result<Self> {
        let data_dir = get_data_dir();
        let cache_dir = get_cache_dir(&data_dir);
        let config = Self {
            data_dir,
            cache_dir,
            min_points: env_usize("MIN_CORRELATION_POINTS", MIN_CORRELATION_POINTS),
            default_top_n: env_usize("DEFAULT_TOP_N", DEFAULT_TOP_N),
            require_full_coverage: env_bool("REQUIRE_FULL_COVERAGE", true),
        };
        config.validate()?;
        Ok(config)
    }

    /// Override directories from CLI flags
    pub fn with_dirs(mut self, data_dir: Option<PathBuf>, cache_dir: Option<PathBuf>) -> Self {
        if let Some(dir) = data_dir {
            // A new data dir moves the derived cache dir with it unless one is given
            if cache_dir.is_none() && std::env::var("CORR_CACHE_DIR").is_err() {
                self.cache_dir = dir.join(crate::constants::layout::CACHE_DIR);
            }
            self.data_dir = dir;
        }
        if let Some(dir) = cache_dir {
            self.cache_dir = dir;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        // Pearson needs at least two pairs to be defined
        if self.min_points < 2 {
            return Err(AppError::Config(format!(
                "MIN_CORRELATION_POINTS must be at least 2, got {}",
                self.min_points
            )));
        }
        Ok(())
    }
}
