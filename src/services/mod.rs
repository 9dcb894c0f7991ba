pub mod correlation_cache;
pub mod correlation_engine;
pub mod correlation_service;
pub mod filter;
pub mod metadata;
pub mod preprocessor;
pub mod series_store;

pub use correlation_cache::{CacheLookup, CacheOutcome, CacheStats, CorrelationCache, SharedCorrelationCache};
pub use correlation_engine::{align, pearson, Alignment, CandidateScore, CorrelationEngine};
pub use correlation_service::{
    CorrelationRequest, CorrelationResponse, CorrelationService, DisplayCandidate, WarmReport,
};
pub use filter::{filter_ranked, filter_universe, passes, Predicate};
pub use metadata::{parse_metadata_csv, MetadataLookup, MetadataTable};
pub use preprocessor::Preprocessor;
pub use series_store::{fingerprint_bytes, SeriesStore, SharedSeriesStore};
