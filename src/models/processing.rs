use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Frequency, SeriesPoint, SourceMode};

/// How the trend is removed before correlation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetrendMethod {
    /// Subtract a least-squares line fitted over elapsed days. Keeps every timestamp.
    Linear,
    /// value[i] - value[i-1]. Drops the first timestamp.
    #[serde(alias = "diff")]
    FirstDifference,
}

impl Default for DetrendMethod {
    fn default() -> Self {
        DetrendMethod::Linear
    }
}

impl DetrendMethod {
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "linear" => Ok(DetrendMethod::Linear),
            "diff" | "first-difference" => Ok(DetrendMethod::FirstDifference),
            _ => Err(format!("Invalid detrend method: '{}'. Valid values: linear, diff", s)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DetrendMethod::Linear => "linear",
            DetrendMethod::FirstDifference => "diff",
        }
    }
}

impl fmt::Display for DetrendMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which values a caller wants to see
///
/// Display only. Coefficients are always computed on detrended values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    Trended,
    Detrended,
}

impl Default for DisplayMode {
    fn default() -> Self {
        DisplayMode::Trended
    }
}

impl DisplayMode {
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "trended" | "raw" => Ok(DisplayMode::Trended),
            "detrended" => Ok(DisplayMode::Detrended),
            _ => Err(format!("Invalid display mode: '{}'. Valid values: trended, detrended", s)),
        }
    }
}

/// Options that turn a RawSeries into a ProcessedSeries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessingOptions {
    /// Points before January 1st of this year are dropped
    pub start_year: i32,

    /// Trend removal, always applied
    pub detrend: DetrendMethod,

    /// Reduce to one point per calendar month
    pub monthly_resample: bool,
}

impl ProcessingOptions {
    pub fn new(start_year: i32, monthly_resample: bool) -> Self {
        Self {
            start_year,
            detrend: DetrendMethod::default(),
            monthly_resample,
        }
    }

    pub fn with_detrend(mut self, detrend: DetrendMethod) -> Self {
        self.detrend = detrend;
        self
    }
}

/// Canonical series used for correlation math
///
/// `points` hold the detrended values; `levels` hold the values before
/// detrending at the same timestamps, for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedSeries {
    pub identifier: String,
    pub source: SourceMode,

    /// Frequency after resampling
    pub frequency: Frequency,

    /// Detrended observations (correlation basis)
    pub points: Vec<SeriesPoint>,

    /// Pre-detrend values, parallel to `points`
    pub levels: Vec<f64>,
}

impl ProcessedSeries {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Observations for the requested display mode
    pub fn display_points(&self, mode: DisplayMode) -> Vec<SeriesPoint> {
        match mode {
            DisplayMode::Detrended => self.points.clone(),
            DisplayMode::Trended => self
                .points
                .iter()
                .zip(self.levels.iter())
                .map(|(p, level)| SeriesPoint::new(p.time, *level))
                .collect(),
        }
    }

    /// Keep only the observations at `indices` (ascending)
    pub fn select(&self, indices: &[usize]) -> ProcessedSeries {
        ProcessedSeries {
            identifier: self.identifier.clone(),
            source: self.source,
            frequency: self.frequency,
            points: indices.iter().map(|&i| self.points[i]).collect(),
            levels: indices.iter().map(|&i| self.levels[i]).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn sample() -> ProcessedSeries {
        let t = |d| Utc.with_ymd_and_hms(2023, 3, d, 0, 0, 0).unwrap();
        ProcessedSeries {
            identifier: "MSFT".to_string(),
            source: SourceMode::Price,
            frequency: Frequency::Daily,
            points: vec![
                SeriesPoint::new(t(1), -0.5),
                SeriesPoint::new(t(2), 0.25),
                SeriesPoint::new(t(3), 0.25),
            ],
            levels: vec![100.0, 101.0, 102.0],
        }
    }

    #[test]
    fn test_display_points_switches_values_not_timestamps() {
        let series = sample();
        let trended = series.display_points(DisplayMode::Trended);
        let detrended = series.display_points(DisplayMode::Detrended);

        assert_eq!(trended[1].value, 101.0);
        assert_eq!(detrended[1].value, 0.25);
        assert_eq!(trended[2].time, detrended[2].time);
    }

    #[test]
    fn test_select_keeps_points_and_levels_parallel() {
        let series = sample().select(&[0, 2]);
        assert_eq!(series.len(), 2);
        assert_eq!(series.levels, vec![100.0, 102.0]);
        assert_eq!(series.points[1].value, 0.25);
    }

    #[test]
    fn test_parse_options() {
        assert_eq!(DetrendMethod::from_str("diff").unwrap(), DetrendMethod::FirstDifference);
        assert_eq!(DisplayMode::from_str("Detrended").unwrap(), DisplayMode::Detrended);
        assert!(DetrendMethod::from_str("hp-filter").is_err());
    }
}
