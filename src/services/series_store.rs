use crate::constants::{columns, layout, FINGERPRINT_HEX_LEN, FRED_MISSING_VALUE};
use crate::error::{AppError, Result};
use crate::models::{Frequency, RawSeries, SeriesPoint, SourceMode};
use crate::utils::parse_timestamp;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

type SeriesId = (String, SourceMode);

#[derive(Clone)]
struct LoadedSeries {
    series: Arc<RawSeries>,
    fingerprint: String,
}

/// Codes present in the memoized FRED-MD panel
struct PanelIndex {
    fingerprint: String,
    codes: BTreeSet<String>,
}

/// Loads and memoizes raw series for every source
///
/// One instance lives for the whole process and is shared by reference.
/// Loaded series stay in memory until [`SeriesStore::refresh`] or
/// [`SeriesStore::refresh_all`] drops them.
pub struct SeriesStore {
    data_dir: PathBuf,
    loaded: RwLock<HashMap<SeriesId, LoadedSeries>>,
    fred_md_panel: RwLock<Option<PanelIndex>>,
}

pub type SharedSeriesStore = Arc<SeriesStore>;

impl SeriesStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            loaded: RwLock::new(HashMap::new()),
            fred_md_panel: RwLock::new(None),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Raw series for `identifier` in `source`
    ///
    /// `NotFound` when the source does not know the identifier. A known
    /// identifier with few or no observations is returned as-is.
    pub async fn get_raw_series(&self, identifier: &str, source: SourceMode) -> Result<Arc<RawSeries>> {
        let id = (identifier.to_string(), source);
        {
            let loaded = self.loaded.read().await;
            if let Some(entry) = loaded.get(&id) {
                return Ok(entry.series.clone());
            }
        }
        if source == SourceMode::FredMd {
            // A loaded panel already lists every code it has
            if let Some(panel) = self.fred_md_panel.read().await.as_ref() {
                if !panel.codes.contains(identifier) {
                    return Err(AppError::NotFound(format!("{} in {}", identifier, source)));
                }
            }
        }

        // Read and parse without holding the lock
        let bytes = self.read_source_file(identifier, source).await?;
        let fingerprint = fingerprint_bytes(&bytes);

        if source == SourceMode::FredMd {
            let panel = parse_fred_md_panel(&bytes)?;
            debug!("Loaded FRED-MD panel with {} series", panel.len());

            let mut loaded = self.loaded.write().await;
            *self.fred_md_panel.write().await = Some(PanelIndex {
                fingerprint: fingerprint.clone(),
                codes: panel.iter().map(|series| series.identifier.clone()).collect(),
            });
            for series in panel {
                loaded.insert(
                    (series.identifier.clone(), SourceMode::FredMd),
                    LoadedSeries {
                        series: Arc::new(series),
                        fingerprint: fingerprint.clone(),
                    },
                );
            }
            return loaded
                .get(&id)
                .map(|entry| entry.series.clone())
                .ok_or_else(|| AppError::NotFound(format!("{} in {}", identifier, source)));
        }

        let series = Arc::new(parse_series_csv(&bytes, identifier, source)?);
        debug!(
            "Loaded {} ({}): {} points, {}",
            identifier,
            source,
            series.len(),
            series.frequency
        );

        self.loaded.write().await.insert(
            id,
            LoadedSeries {
                series: series.clone(),
                fingerprint,
            },
        );
        Ok(series)
    }

    /// Fingerprint of the data currently on disk for `identifier`
    ///
    /// Always rehashes the backing file, so a changed file is noticed even
    /// while an older version is memoized.
    pub async fn fingerprint(&self, identifier: &str, source: SourceMode) -> Result<String> {
        let bytes = self.read_source_file(identifier, source).await?;
        Ok(fingerprint_bytes(&bytes))
    }

    /// Fingerprint of the memoized version, if loaded
    ///
    /// Any FRED-MD code reports the panel's fingerprint once the panel is
    /// loaded, so unknown codes do not force a reload.
    pub async fn loaded_fingerprint(&self, identifier: &str, source: SourceMode) -> Option<String> {
        if source == SourceMode::FredMd {
            return self
                .fred_md_panel
                .read()
                .await
                .as_ref()
                .map(|panel| panel.fingerprint.clone());
        }
        self.loaded
            .read()
            .await
            .get(&(identifier.to_string(), source))
            .map(|entry| entry.fingerprint.clone())
    }

    /// Drop the memoized copy so the next read goes back to disk
    pub async fn refresh(&self, identifier: &str, source: SourceMode) {
        let mut loaded = self.loaded.write().await;
        if source == SourceMode::FredMd {
            // All FRED-MD series share one file
            loaded.retain(|(_, s), _| *s != SourceMode::FredMd);
            *self.fred_md_panel.write().await = None;
        } else {
            loaded.remove(&(identifier.to_string(), source));
        }
        debug!("Refreshed {} ({})", identifier, source);
    }

    pub async fn refresh_all(&self) {
        let mut loaded = self.loaded.write().await;
        let count = loaded.len();
        loaded.clear();
        *self.fred_md_panel.write().await = None;
        info!("Dropped {} memoized series", count);
    }

    pub async fn loaded_count(&self) -> usize {
        self.loaded.read().await.len()
    }

    /// Identifiers known to `source`, sorted
    ///
    /// For FRED API sources this includes listed codes without a local file.
    pub async fn list_identifiers(&self, source: SourceMode) -> Result<Vec<String>> {
        let location = source.location(&self.data_dir);

        let mut ids: BTreeSet<String> = BTreeSet::new();
        match source {
            SourceMode::FredMd => {
                let bytes = match tokio::fs::read(&location).await {
                    Ok(bytes) => bytes,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                    Err(e) => return Err(e.into()),
                };
                ids.extend(fred_md_columns(&bytes)?);
            }
            _ => {
                ids.extend(csv_stems(&location).await?);
                if source.is_macro() {
                    ids.extend(self.listed_fred_codes().await?);
                }
            }
        }

        Ok(ids.into_iter().collect())
    }

    fn series_path(&self, identifier: &str, source: SourceMode) -> Result<PathBuf> {
        if identifier.is_empty()
            || identifier.contains('/')
            || identifier.contains('\\')
            || identifier.contains("..")
        {
            return Err(AppError::InvalidInput(format!("Invalid identifier: '{}'", identifier)));
        }

        let location = source.location(&self.data_dir);
        Ok(match source {
            SourceMode::FredMd => location,
            _ => location.join(format!("{}.csv", identifier)),
        })
    }

    async fn read_source_file(&self, identifier: &str, source: SourceMode) -> Result<Vec<u8>> {
        let path = self.series_path(identifier, source)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(self.missing_file_error(identifier, source, &path).await)
            }
            Err(e) => Err(AppError::SourceUnavailable {
                source_name: source.to_string(),
                reason: format!("cannot read {}: {}", path.display(), e),
            }),
        }
    }

    async fn missing_file_error(&self, identifier: &str, source: SourceMode, path: &Path) -> AppError {
        match source {
            SourceMode::FredMd => AppError::SourceUnavailable {
                source_name: source.to_string(),
                reason: format!("panel file {} is missing", path.display()),
            },
            SourceMode::FredApi | SourceMode::FredApiAsReported => {
                let listed = match self.listed_fred_codes().await {
                    Ok(codes) => codes.contains(identifier),
                    Err(e) => {
                        warn!("Cannot read FRED series list: {}", e);
                        false
                    }
                };
                if listed {
                    AppError::SourceUnavailable {
                        source_name: source.to_string(),
                        reason: format!("{} is listed but has no local data", identifier),
                    }
                } else {
                    AppError::NotFound(format!("{} in {}", identifier, source))
                }
            }
            SourceMode::Price => AppError::NotFound(format!("{} in {}", identifier, source)),
        }
    }

    async fn listed_fred_codes(&self) -> Result<BTreeSet<String>> {
        let path = self.data_dir.join(layout::FRED_API_SERIES_LIST);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(e.into()),
        };

        Ok(text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split(|c: char| c == ',' || c.is_whitespace()).next())
            .map(str::to_string)
            .collect())
    }
}

/// Short content hash used as a data version
pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    let mut digest = hex::encode(Sha256::digest(bytes));
    digest.truncate(FINGERPRINT_HEX_LEN);
    digest
}

fn find_column(headers: &csv::StringRecord, candidates: &[&str]) -> Option<usize> {
    candidates
        .iter()
        .find_map(|name| headers.iter().position(|h| h.trim() == *name))
}

fn parse_value(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == FRED_MISSING_VALUE {
        return None;
    }
    trimmed.parse::<f64>().ok()
}

/// Parse a one-identifier file (`prices/*.csv` or `fred_api/*/*.csv`)
pub fn parse_series_csv(bytes: &[u8], identifier: &str, source: SourceMode) -> Result<RawSeries> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let headers = reader.headers()?.clone();
    let time_idx = find_column(&headers, columns::TIME).unwrap_or(0);
    let value_idx = match find_column(&headers, columns::VALUE) {
        Some(idx) => idx,
        None if headers.len() == 2 => 1,
        None => {
            return Err(AppError::Parse(format!(
                "{}: no value column in header {:?}",
                identifier,
                headers.iter().collect::<Vec<_>>()
            )))
        }
    };

    let mut points = Vec::new();
    let mut skipped = 0usize;
    for record in reader.records() {
        let record = record?;
        let time = record.get(time_idx).map(parse_timestamp);
        let value = record.get(value_idx).and_then(parse_value);
        match (time, value) {
            (Some(Ok(time)), Some(value)) => points.push(SeriesPoint::new(time, value)),
            _ => skipped += 1,
        }
    }
    if skipped > 0 {
        debug!("{}: skipped {} rows without a usable time/value", identifier, skipped);
    }

    let frequency = match source {
        SourceMode::Price => Frequency::Daily,
        SourceMode::FredMd => Frequency::Monthly,
        SourceMode::FredApi | SourceMode::FredApiAsReported => Frequency::infer(&points),
    };

    Ok(RawSeries::from_points(identifier, source, frequency, points))
}

fn fred_md_columns(bytes: &[u8]) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(bytes);
    Ok(reader
        .headers()?
        .iter()
        .skip(1)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .collect())
}

/// Parse the FRED-MD panel into one series per column
///
/// The first column holds the date. A leading `Transform` row carries
/// transformation codes, not observations, and is skipped.
pub fn parse_fred_md_panel(bytes: &[u8]) -> Result<Vec<RawSeries>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let codes = fred_md_columns(bytes)?;
    let mut columns_points: Vec<Vec<SeriesPoint>> = vec![Vec::new(); codes.len()];

    for record in reader.records() {
        let record = record?;
        let first = record.get(0).unwrap_or("");
        if first.is_empty() || first.starts_with("Transform") {
            continue;
        }
        let time = match parse_timestamp(first) {
            Ok(time) => time,
            Err(_) => {
                debug!("FRED-MD: skipping row with date '{}'", first);
                continue;
            }
        };

        for (col, points) in columns_points.iter_mut().enumerate() {
            if let Some(value) = record.get(col + 1).and_then(parse_value) {
                points.push(SeriesPoint::new(time, value));
            }
        }
    }

    Ok(codes
        .into_iter()
        .zip(columns_points)
        .map(|(code, points)| RawSeries::from_points(code, SourceMode::FredMd, Frequency::Monthly, points))
        .collect())
}

async fn csv_stems(dir: &Path) -> Result<Vec<String>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut stems = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("csv") {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            stems.push(stem.to_string());
        }
    }
    Ok(stems)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Utc};

    fn write(dir: &Path, rel: &str, contents: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_parse_price_csv() {
        let csv = "Date,Open,Close,Adj Close\n\
                   2023-01-04,1,10,9.5\n\
                   2023-01-03,1,11,10.5\n\
                   2023-01-05,1,12,\n\
                   2023-01-04,1,10,9.75\n";
        let series = parse_series_csv(csv.as_bytes(), "AAPL", SourceMode::Price).unwrap();

        assert_eq!(series.frequency, Frequency::Daily);
        let values: Vec<f64> = series.points.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![10.5, 9.75]);
        assert_eq!(
            series.first_time(),
            Some(Utc.with_ymd_and_hms(2023, 1, 3, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_parse_fred_api_csv_with_placeholders() {
        let mut csv = String::from("date,value\n");
        for month in 1..=12 {
            let value = if month == 6 { ".".to_string() } else { month.to_string() };
            csv.push_str(&format!("2020-{:02}-01,{}\n", month, value));
        }
        let series = parse_series_csv(csv.as_bytes(), "UNRATE", SourceMode::FredApi).unwrap();

        assert_eq!(series.len(), 11);
        assert_eq!(series.frequency, Frequency::Monthly);
    }

    #[test]
    fn test_parse_fred_md_panel() {
        let csv = "sasdate,RPI,INDPRO\n\
                   Transform:,5,5\n\
                   1/1/2020,100.0,50.0\n\
                   2/1/2020,,51.0\n\
                   3/1/2020,102.0,52.0\n";
        let panel = parse_fred_md_panel(csv.as_bytes()).unwrap();

        assert_eq!(panel.len(), 2);
        assert_eq!(panel[0].identifier, "RPI");
        assert_eq!(panel[0].len(), 2);
        assert_eq!(panel[1].len(), 3);
        assert_eq!(panel[1].points[1].time.month(), 2);
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let a = fingerprint_bytes(b"date,value\n2020-01-01,1\n");
        let b = fingerprint_bytes(b"date,value\n2020-01-01,2\n");
        assert_eq!(a.len(), FINGERPRINT_HEX_LEN);
        assert_ne!(a, b);
        assert_eq!(a, fingerprint_bytes(b"date,value\n2020-01-01,1\n"));
    }

    #[tokio::test]
    async fn test_get_raw_series_memoizes_until_refresh() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "prices/SPY.csv", "date,close\n2023-01-03,1\n2023-01-04,2\n");
        let store = SeriesStore::new(dir.path().to_path_buf());

        let first = store.get_raw_series("SPY", SourceMode::Price).await.unwrap();
        assert_eq!(first.len(), 2);

        write(dir.path(), "prices/SPY.csv", "date,close\n2023-01-03,1\n2023-01-04,2\n2023-01-05,3\n");
        let cached = store.get_raw_series("SPY", SourceMode::Price).await.unwrap();
        assert_eq!(cached.len(), 2);

        let on_disk = store.fingerprint("SPY", SourceMode::Price).await.unwrap();
        assert_ne!(store.loaded_fingerprint("SPY", SourceMode::Price).await, Some(on_disk.clone()));

        store.refresh("SPY", SourceMode::Price).await;
        let fresh = store.get_raw_series("SPY", SourceMode::Price).await.unwrap();
        assert_eq!(fresh.len(), 3);
        assert_eq!(store.loaded_fingerprint("SPY", SourceMode::Price).await, Some(on_disk));
    }

    #[tokio::test]
    async fn test_not_found_vs_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "fred_api/series_list.txt", "# codes\nGDP\nUNRATE,Unemployment\n");
        write(dir.path(), "prices/EMPTY.csv", "date,close\n");
        let store = SeriesStore::new(dir.path().to_path_buf());

        assert!(matches!(
            store.get_raw_series("NOPE", SourceMode::Price).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            store.get_raw_series("UNRATE", SourceMode::FredApi).await,
            Err(AppError::SourceUnavailable { .. })
        ));
        assert!(matches!(
            store.get_raw_series("NOPE", SourceMode::FredApiAsReported).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            store.get_raw_series("RPI", SourceMode::FredMd).await,
            Err(AppError::SourceUnavailable { .. })
        ));

        // Known identifier without rows is data, not an error
        let empty = store.get_raw_series("EMPTY", SourceMode::Price).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_path_like_identifiers() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeriesStore::new(dir.path().to_path_buf());
        assert!(matches!(
            store.get_raw_series("../secret", SourceMode::Price).await,
            Err(AppError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_list_identifiers() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "prices/MSFT.csv", "date,close\n");
        write(dir.path(), "prices/AAPL.csv", "date,close\n");
        write(dir.path(), "prices/notes.txt", "ignore me");
        write(dir.path(), "fred_md/current.csv", "sasdate,RPI,INDPRO\n");
        write(dir.path(), "fred_api/revised/GDP.csv", "date,value\n");
        write(dir.path(), "fred_api/series_list.txt", "UNRATE\nGDP\n");
        let store = SeriesStore::new(dir.path().to_path_buf());

        assert_eq!(store.list_identifiers(SourceMode::Price).await.unwrap(), vec!["AAPL", "MSFT"]);
        assert_eq!(store.list_identifiers(SourceMode::FredMd).await.unwrap(), vec!["INDPRO", "RPI"]);
        assert_eq!(store.list_identifiers(SourceMode::FredApi).await.unwrap(), vec!["GDP", "UNRATE"]);
    }

    #[tokio::test]
    async fn test_fred_md_loads_whole_panel_once() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "fred_md/current.csv",
            "sasdate,RPI,INDPRO\n1/1/2020,1,2\n2/1/2020,3,4\n",
        );
        let store = SeriesStore::new(dir.path().to_path_buf());

        store.get_raw_series("RPI", SourceMode::FredMd).await.unwrap();
        assert_eq!(store.loaded_count().await, 2);
        assert!(matches!(
            store.get_raw_series("CPI", SourceMode::FredMd).await,
            Err(AppError::NotFound(_))
        ));

        store.refresh("RPI", SourceMode::FredMd).await;
        assert_eq!(store.loaded_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_fred_md_code_does_not_reread_panel() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "fred_md/current.csv",
            "sasdate,RPI,INDPRO\n1/1/2020,1,2\n2/1/2020,3,4\n",
        );
        let store = SeriesStore::new(dir.path().to_path_buf());
        store.get_raw_series("RPI", SourceMode::FredMd).await.unwrap();
        let panel_fingerprint = store.loaded_fingerprint("RPI", SourceMode::FredMd).await;
        assert!(panel_fingerprint.is_some());
        assert_eq!(store.loaded_fingerprint("CPI", SourceMode::FredMd).await, panel_fingerprint);

        // Without the file, a reread would report the source as unavailable
        std::fs::remove_file(dir.path().join("fred_md/current.csv")).unwrap();
        assert!(matches!(
            store.get_raw_series("CPI", SourceMode::FredMd).await,
            Err(AppError::NotFound(_))
        ));
        assert!(store.get_raw_series("INDPRO", SourceMode::FredMd).await.is_ok());

        store.refresh_all().await;
        assert_eq!(store.loaded_fingerprint("CPI", SourceMode::FredMd).await, None);
        assert!(matches!(
            store.get_raw_series("CPI", SourceMode::FredMd).await,
            Err(AppError::SourceUnavailable { .. })
        ));
    }
}
