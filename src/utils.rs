use crate::constants::{layout, MAX_START_YEAR, MIN_START_YEAR};
use crate::error::{AppError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Get data directory from environment variable or use default
pub fn get_data_dir() -> PathBuf {
    std::env::var("CORR_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data"))
}

/// Get correlation cache directory from environment variable or derive it from the data dir
pub fn get_cache_dir(data_dir: &Path) -> PathBuf {
    std::env::var("CORR_CACHE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| data_dir.join(layout::CACHE_DIR))
}

/// Read a numeric environment variable, falling back to `default` when unset or malformed
pub fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

/// Parse a timestamp from the formats found in price and FRED files
///
/// Accepts `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS`,
/// RFC 3339 and the FRED-MD `M/D/YYYY` form. Date-only values map to
/// midnight UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let s = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }

    for fmt in ["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            if let Some(naive) = date.and_hms_opt(0, 0, 0) {
                return Ok(Utc.from_utc_datetime(&naive));
            }
        }
    }

    Err(AppError::Parse(format!("Unrecognized timestamp '{}'", raw)))
}

/// Read a boolean environment variable (`1/0`, `true/false`, `yes/no`)
pub fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name).map(|s| s.trim().to_lowercase()) {
        Ok(s) if matches!(s.as_str(), "1" | "true" | "yes" | "on") => true,
        Ok(s) if matches!(s.as_str(), "0" | "false" | "no" | "off") => false,
        _ => default,
    }
}

/// First instant of `year` in UTC
///
/// Years outside `MIN_START_YEAR..=MAX_START_YEAR` are rejected so every
/// cache file name stays decodable.
pub fn year_start(year: i32) -> Result<DateTime<Utc>> {
    if !(MIN_START_YEAR..=MAX_START_YEAR).contains(&year) {
        return Err(AppError::InvalidInput(format!(
            "Start year {} is outside {}..={}",
            year, MIN_START_YEAR, MAX_START_YEAR
        )));
    }
    Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0)
        .single()
        .ok_or_else(|| AppError::InvalidInput(format!("Invalid start year: {}", year)))
}

/// Write file atomically (write to temp, then rename)
///
/// Readers either see the previous file or the complete new one. The temp
/// name is unique per call so concurrent writers never share a temp file.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let nonce = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| AppError::InvalidInput(format!("Invalid file path: {}", path.display())))?;
    let temp_path = path.with_file_name(format!(
        "{}.tmp-{}-{}",
        file_name,
        std::process::id(),
        nonce
    ));

    tokio::fs::write(&temp_path, bytes).await?;

    if let Err(e) = tokio::fs::rename(&temp_path, path).await {
        // Clean up temp file
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e.into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2023, 6, 2, 0, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2023-06-02").unwrap(), expected);
        assert_eq!(parse_timestamp("6/2/2023").unwrap(), expected);
        assert_eq!(parse_timestamp("2023-06-02 00:00:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2023-06-02T00:00:00Z").unwrap(), expected);
        assert!(parse_timestamp("Transform:").is_err());
    }

    #[test]
    fn test_year_start() {
        let start = year_start(2018).unwrap();
        assert_eq!((start.year(), start.month(), start.day()), (2018, 1, 1));
    }

    #[test]
    fn test_year_start_rejects_out_of_range_years() {
        assert!(matches!(year_start(-1), Err(AppError::InvalidInput(_))));
        assert!(matches!(year_start(0), Err(AppError::InvalidInput(_))));
        assert!(matches!(year_start(10_000), Err(AppError::InvalidInput(_))));
        assert!(year_start(MIN_START_YEAR).is_ok());
        assert!(year_start(MAX_START_YEAR).is_ok());
    }

    #[test]
    fn test_env_bool() {
        std::env::set_var("CORRFINDER_TEST_FLAG_OFF", " Off ");
        std::env::set_var("CORRFINDER_TEST_FLAG_ON", "yes");
        std::env::set_var("CORRFINDER_TEST_FLAG_JUNK", "maybe");
        assert!(!env_bool("CORRFINDER_TEST_FLAG_OFF", true));
        assert!(env_bool("CORRFINDER_TEST_FLAG_ON", false));
        assert!(env_bool("CORRFINDER_TEST_FLAG_JUNK", true));
        assert!(!env_bool("CORRFINDER_TEST_FLAG_UNSET", false));
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entry.json");

        write_atomic(&path, b"first").await.unwrap();
        write_atomic(&path, b"second").await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}
