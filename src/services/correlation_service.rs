use crate::constants::{layout, DEFAULT_START_YEAR};
use crate::error::{AppError, Result};
use crate::models::{
    top_negative, top_positive, AppConfig, CacheEntry, CacheKey, CorrelationResult, DetrendMethod, DisplayMode,
    Frequency, ProcessedSeries, ProcessingOptions, RankedCandidate, RawSeries, SecurityMetadata, SeriesPoint,
    SkipCounts, SourceMode,
};
use crate::services::correlation_cache::{CacheOutcome, CorrelationCache, SharedCorrelationCache};
use crate::services::correlation_engine::CorrelationEngine;
use crate::services::filter::{filter_ranked, filter_universe, Predicate};
use crate::services::metadata::MetadataTable;
use crate::services::preprocessor::Preprocessor;
use crate::services::series_store::{SeriesStore, SharedSeriesStore};
use crate::utils::year_start;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// One user-initiated correlation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationRequest {
    pub target: String,
    pub start_year: i32,

    /// Candidates returned after filtering; `None` uses the configured default
    pub top_n: Option<usize>,

    /// Drop OTC securities from the universe before ranking
    pub exclude_otc: bool,
    pub monthly_resample: bool,
    pub source_mode: SourceMode,

    /// Recompute even when a fresh cached ranking exists
    pub reload: bool,

    /// Display predicates applied to the full ranking
    pub predicates: Vec<Predicate>,
    pub display_mode: DisplayMode,
    pub detrend: DetrendMethod,
}

impl CorrelationRequest {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            start_year: DEFAULT_START_YEAR,
            top_n: None,
            exclude_otc: false,
            monthly_resample: false,
            source_mode: SourceMode::default(),
            reload: false,
            predicates: Vec::new(),
            display_mode: DisplayMode::default(),
            detrend: DetrendMethod::default(),
        }
    }

    /// Cache key as requested, before any forced monthly resampling
    pub fn cache_key(&self) -> CacheKey {
        CacheKey {
            target: self.target.clone(),
            start_year: self.start_year,
            source_mode: self.source_mode,
            exclude_otc: self.exclude_otc,
            monthly_resample: self.monthly_resample,
            detrend: self.detrend,
        }
    }
}

/// A ranked candidate ready for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayCandidate {
    pub identifier: String,
    pub coefficient: f64,
    pub overlap: usize,
    pub metadata: SecurityMetadata,

    /// Aligned observations in the requested display mode
    pub points: Vec<SeriesPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationResponse {
    /// Key the ranking was stored under
    pub key: CacheKey,

    /// Target observations in the requested display mode; empty when served stale
    pub target_series: Vec<SeriesPoint>,
    pub candidates: Vec<DisplayCandidate>,
    pub skipped: SkipCounts,

    /// Ranked candidates removed by display predicates
    pub filtered_out: usize,

    /// Positive correlations passing the predicates, most positive first, at most top_n
    pub strongest_positive: Vec<DisplayCandidate>,

    /// Negative correlations passing the predicates, most negative first, at most top_n
    pub strongest_negative: Vec<DisplayCandidate>,

    /// Size of the full cached ranking
    pub total_ranked: usize,
    pub fingerprint: String,
    pub computed_at: DateTime<Utc>,
    pub outcome: CacheOutcome,

    /// Served from cache because the target's source could not be read
    pub stale: bool,
}

/// Result of pre-computing one (target, start year) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarmReport {
    pub target: String,
    pub start_year: i32,
    pub outcome: std::result::Result<CacheOutcome, String>,
    pub ranked: usize,
}

/// Request pipeline: series store -> preprocessor -> engine, behind the cache
pub struct CorrelationService {
    config: AppConfig,
    store: SharedSeriesStore,
    cache: SharedCorrelationCache,
    metadata: Arc<MetadataTable>,
    preprocessor: Preprocessor,
    engine: CorrelationEngine,
}

impl CorrelationService {
    pub fn new(
        config: AppConfig,
        store: SharedSeriesStore,
        cache: SharedCorrelationCache,
        metadata: Arc<MetadataTable>,
    ) -> Self {
        Self {
            preprocessor: Preprocessor::new(config.min_points),
            engine: CorrelationEngine::new(config.min_points),
            config,
            store,
            cache,
            metadata,
        }
    }

    /// Build every collaborator from `config` and load metadata
    pub async fn open(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(SeriesStore::new(config.data_dir.clone()));
        let cache = Arc::new(CorrelationCache::new(config.cache_dir.clone()));
        let metadata = Arc::new(MetadataTable::load(&config.data_dir.join(layout::METADATA_DIR)).await?);

        info!(
            "Correlation service ready: data={}, cache={}, min_points={}",
            config.data_dir.display(),
            config.cache_dir.display(),
            config.min_points
        );
        Ok(Self::new(config, store, cache, metadata))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &SeriesStore {
        &self.store
    }

    pub fn cache(&self) -> &CorrelationCache {
        &self.cache
    }

    pub fn metadata(&self) -> &MetadataTable {
        &self.metadata
    }

    /// Serve one request
    pub async fn run(&self, request: &CorrelationRequest) -> Result<CorrelationResponse> {
        let started = Instant::now();
        let target = request.target.as_str();
        let source = request.source_mode;
        // Out-of-range years never reach the cache, stale lookups included
        year_start(request.start_year)?;

        if request.reload {
            // A reload re-reads every series, candidates included
            self.store.refresh_all().await;
        }

        let fingerprint = match self.store.fingerprint(target, source).await {
            Ok(fingerprint) => fingerprint,
            Err(e @ AppError::SourceUnavailable { .. }) => return self.serve_stale(request, e).await,
            Err(e) => return Err(e),
        };

        if self.store.loaded_fingerprint(target, source).await.as_deref() != Some(fingerprint.as_str()) {
            self.store.refresh(target, source).await;
        }
        let target_raw = self.store.get_raw_series(target, source).await?;

        let mut key = request.cache_key();
        key.monthly_resample = effective_monthly(request, &target_raw);
        let options = ProcessingOptions {
            start_year: request.start_year,
            detrend: request.detrend,
            monthly_resample: key.monthly_resample,
        };

        // Surfaces InsufficientData for the target before any candidate work
        let target_processed = self.preprocessor.process(&target_raw, &options)?;

        let lookup = self
            .cache
            .get_or_compute(&key, &fingerprint, request.reload, || {
                self.compute_ranking(target_processed.clone(), request, options)
            })
            .await?;

        let response = self.respond(request, &lookup.entry, lookup.outcome, Some(&target_processed), false);
        info!(
            "{} from {} ({}): {} shown, {} ranked, {} skipped in {:.2?}",
            target,
            request.start_year,
            lookup.outcome,
            response.candidates.len(),
            response.total_ranked,
            response.skipped.total(),
            started.elapsed()
        );
        Ok(response)
    }

    /// Pre-compute rankings for several targets and start years
    ///
    /// Failures are reported per pair and never stop the batch.
    pub async fn warm(&self, targets: &[String], start_years: &[i32], template: &CorrelationRequest) -> Vec<WarmReport> {
        let mut reports = Vec::with_capacity(targets.len() * start_years.len());

        for target in targets {
            for &start_year in start_years {
                let request = CorrelationRequest {
                    target: target.clone(),
                    start_year,
                    ..template.clone()
                };
                let report = match self.run(&request).await {
                    Ok(response) => WarmReport {
                        target: target.clone(),
                        start_year,
                        outcome: Ok(response.outcome),
                        ranked: response.total_ranked,
                    },
                    Err(e) => {
                        warn!("Warm-up failed for {} from {}: {}", target, start_year, e);
                        WarmReport {
                            target: target.clone(),
                            start_year,
                            outcome: Err(e.to_string()),
                            ranked: 0,
                        }
                    }
                };
                reports.push(report);
            }
        }
        reports
    }

    /// Identifiers eligible as candidates for `request`
    pub async fn candidate_universe(&self, request: &CorrelationRequest) -> Result<Vec<String>> {
        let mut universe = self.store.list_identifiers(SourceMode::Price).await?;
        if request.source_mode == SourceMode::Price {
            universe.retain(|id| *id != request.target);
        }
        if request.exclude_otc {
            universe = filter_universe(&universe, self.metadata.as_ref(), &[Predicate::exclude_otc()]);
        }
        Ok(universe)
    }

    async fn compute_ranking(
        &self,
        target: ProcessedSeries,
        request: &CorrelationRequest,
        options: ProcessingOptions,
    ) -> Result<CorrelationResult> {
        let universe = self.candidate_universe(request).await?;
        info!(
            "Computing {} against {} candidates from {}",
            target.identifier,
            universe.len(),
            request.start_year
        );

        let mut skipped = SkipCounts::default();
        let mut raws: Vec<Arc<RawSeries>> = Vec::with_capacity(universe.len());
        for identifier in &universe {
            match self.store.get_raw_series(identifier, SourceMode::Price).await {
                Ok(raw) => raws.push(raw),
                Err(e) if e.is_recoverable() => {
                    debug!("Candidate {} unavailable: {}", identifier, e);
                    skipped.unavailable += 1;
                }
                Err(e) => {
                    warn!("Candidate {} could not be read: {}", identifier, e);
                    skipped.unavailable += 1;
                }
            }
        }

        // Candidates must span the target's window, which starts no earlier
        // than January of the start year
        if self.config.require_full_coverage {
            if let (Some(start), Some(end)) = (target.points.first(), target.points.last()) {
                let (start, end) = (start.time, end.time);
                raws.retain(|raw| {
                    let covers = Preprocessor::covers_window(raw, start, end);
                    if !covers {
                        debug!(
                            "Candidate {} does not span {} through {}",
                            raw.identifier,
                            start.format("%Y-%m"),
                            end.format("%Y-%m")
                        );
                        skipped.incomplete_coverage += 1;
                    }
                    covers
                });
            }
        }

        let preprocessor = self.preprocessor;
        let engine = self.engine;
        let mut result = tokio::task::spawn_blocking(move || -> Result<CorrelationResult> {
            let processed: Vec<Result<ProcessedSeries>> = raws
                .par_iter()
                .map(|raw| preprocessor.process(raw, &options))
                .collect();

            let mut candidates = Vec::with_capacity(processed.len());
            for outcome in processed {
                match outcome {
                    Ok(series) => candidates.push(series),
                    Err(AppError::InsufficientData { .. }) => skipped.insufficient_data += 1,
                    Err(e) => {
                        debug!("Candidate could not be processed: {}", e);
                        skipped.unavailable += 1;
                    }
                }
            }

            let mut result = engine.correlate(&target, &candidates, None)?;
            result.skipped.merge(skipped);
            Ok(result)
        })
        .await??;

        result.target = request.target.clone();
        Ok(result)
    }

    /// Fall back to whatever ranking is stored when the target cannot be read
    async fn serve_stale(&self, request: &CorrelationRequest, cause: AppError) -> Result<CorrelationResponse> {
        let key = request.cache_key();
        let entry = match self.cache.peek(&key).await {
            Some(entry) => Some(entry),
            None if !key.monthly_resample => {
                let forced = CacheKey {
                    monthly_resample: true,
                    ..key
                };
                self.cache.peek(&forced).await
            }
            None => None,
        };

        match entry {
            Some(entry) => {
                warn!("{}; serving cached ranking from {}", cause, entry.created_at);
                Ok(self.respond(request, &entry, CacheOutcome::Hit, None, true))
            }
            None => Err(cause),
        }
    }

    fn respond(
        &self,
        request: &CorrelationRequest,
        entry: &CacheEntry,
        outcome: CacheOutcome,
        target: Option<&ProcessedSeries>,
        stale: bool,
    ) -> CorrelationResponse {
        let top_n = request.top_n.unwrap_or(self.config.default_top_n);
        let (kept, filtered_out) = filter_ranked(&entry.result.ranked, self.metadata.as_ref(), &request.predicates);

        let display = |c: &RankedCandidate| self.display_candidate(c, request.display_mode);
        let strongest_positive = top_positive(kept.iter().copied(), top_n).into_iter().map(display).collect();
        let strongest_negative = top_negative(kept.iter().copied(), top_n).into_iter().map(display).collect();
        let candidates = kept.into_iter().take(top_n).map(display).collect();

        CorrelationResponse {
            key: entry.key.clone(),
            target_series: target
                .map(|t| t.display_points(request.display_mode))
                .unwrap_or_default(),
            candidates,
            skipped: entry.result.skipped,
            filtered_out,
            strongest_positive,
            strongest_negative,
            total_ranked: entry.result.len(),
            fingerprint: entry.fingerprint.clone(),
            computed_at: entry.created_at,
            outcome,
            stale,
        }
    }

    fn display_candidate(&self, candidate: &RankedCandidate, mode: DisplayMode) -> DisplayCandidate {
        DisplayCandidate {
            identifier: candidate.identifier.clone(),
            coefficient: candidate.coefficient,
            overlap: candidate.overlap,
            metadata: self.metadata.get_or_unknown(&candidate.identifier),
            points: candidate.series.display_points(mode),
        }
    }
}

/// Monthly targets force monthly resampling so both sides share a granularity
fn effective_monthly(request: &CorrelationRequest, target: &RawSeries) -> bool {
    request.monthly_resample || target.frequency == Frequency::Monthly
}
