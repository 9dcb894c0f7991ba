mod app_config;
mod cache_key;
mod correlation;
mod metadata;
mod processing;
mod series;
mod source_mode;

pub use app_config::AppConfig;
pub use cache_key::{CacheEntry, CacheKey};
pub use correlation::{rank_order, top_negative, top_positive, CorrelationResult, RankedCandidate, SkipCounts};
pub use metadata::{Field, MarketCap, MetadataField, SecurityMetadata, SecurityType};
pub use processing::{DetrendMethod, DisplayMode, ProcessedSeries, ProcessingOptions};
pub use series::{Frequency, RawSeries, SeriesPoint};
pub use source_mode::SourceMode;

use std::collections::HashMap;

/// Symbol -> metadata row
pub type MetadataMap = HashMap<String, SecurityMetadata>;
