use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::SourceMode;
use crate::constants::MONTHLY_SPACING_DAYS;

/// A single observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    /// Timestamp of the observation
    pub time: DateTime<Utc>,

    /// Observed value
    pub value: f64,
}

impl SeriesPoint {
    pub fn new(time: DateTime<Utc>, value: f64) -> Self {
        Self { time, value }
    }
}

/// Native sampling frequency of a series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    /// Trading days
    Daily,
    /// One observation per calendar month
    Monthly,
}

impl Frequency {
    /// Infer frequency from median spacing between observations
    pub fn infer(points: &[SeriesPoint]) -> Self {
        if points.len() < 2 {
            return Frequency::Daily;
        }

        let mut gaps: Vec<i64> = points
            .windows(2)
            .map(|w| (w[1].time - w[0].time).num_days())
            .collect();
        gaps.sort_unstable();

        if gaps[gaps.len() / 2] >= MONTHLY_SPACING_DAYS {
            Frequency::Monthly
        } else {
            Frequency::Daily
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Raw time series as loaded from a source
///
/// Points are strictly increasing in time with no duplicates and only
/// finite values. Build through [`RawSeries::from_points`] to get those
/// guarantees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSeries {
    /// Ticker or FRED code
    pub identifier: String,

    /// Where the series came from
    pub source: SourceMode,

    /// Native sampling frequency
    pub frequency: Frequency,

    /// Ordered observations
    pub points: Vec<SeriesPoint>,
}

impl RawSeries {
    /// Normalize observations into a RawSeries
    ///
    /// Drops non-finite values, sorts by time and keeps the last occurrence
    /// of a duplicated timestamp.
    pub fn from_points(
        identifier: impl Into<String>,
        source: SourceMode,
        frequency: Frequency,
        points: Vec<SeriesPoint>,
    ) -> Self {
        // BTreeMap insert overwrites, so later rows win
        let mut by_time: BTreeMap<DateTime<Utc>, f64> = BTreeMap::new();
        for point in points.into_iter().filter(|p| p.value.is_finite()) {
            by_time.insert(point.time, point.value);
        }

        Self {
            identifier: identifier.into(),
            source,
            frequency,
            points: by_time
                .into_iter()
                .map(|(time, value)| SeriesPoint { time, value })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// First valid timestamp
    pub fn first_time(&self) -> Option<DateTime<Utc>> {
        self.points.first().map(|p| p.time)
    }

    /// Last valid timestamp
    pub fn last_time(&self) -> Option<DateTime<Utc>> {
        self.points.last().map(|p| p.time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_from_points_sorts_and_keeps_last_duplicate() {
        let points = vec![
            SeriesPoint::new(day(3), 3.0),
            SeriesPoint::new(day(1), 1.0),
            SeriesPoint::new(day(2), 2.0),
            SeriesPoint::new(day(2), 20.0),
            SeriesPoint::new(day(4), f64::NAN),
        ];

        let series = RawSeries::from_points("AAPL", SourceMode::Price, Frequency::Daily, points);

        let values: Vec<f64> = series.points.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![1.0, 20.0, 3.0]);
        assert_eq!(series.first_time(), Some(day(1)));
        assert_eq!(series.last_time(), Some(day(3)));
    }

    #[test]
    fn test_infer_frequency() {
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let daily: Vec<SeriesPoint> = (0..10)
            .map(|i| SeriesPoint::new(start + Duration::days(i), i as f64))
            .collect();
        let monthly: Vec<SeriesPoint> = (0..10)
            .map(|i| SeriesPoint::new(start + Duration::days(i * 30), i as f64))
            .collect();

        assert_eq!(Frequency::infer(&daily), Frequency::Daily);
        assert_eq!(Frequency::infer(&monthly), Frequency::Monthly);
        assert_eq!(Frequency::infer(&[]), Frequency::Daily);
    }
}
