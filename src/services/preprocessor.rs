use crate::constants::MIN_CORRELATION_POINTS;
use crate::error::{AppError, Result};
use crate::models::{DetrendMethod, Frequency, ProcessedSeries, ProcessingOptions, RawSeries, SeriesPoint};
use crate::utils::year_start;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use std::collections::BTreeMap;
use tracing::debug;

/// Turns raw series into the canonical series used for correlation
///
/// Order is fixed: truncate to the start year, optionally resample to
/// monthly, then detrend. Every step is a pure function of its input.
#[derive(Debug, Clone, Copy)]
pub struct Preprocessor {
    min_points: usize,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new(MIN_CORRELATION_POINTS)
    }
}

impl Preprocessor {
    pub fn new(min_points: usize) -> Self {
        Self { min_points }
    }

    pub fn min_points(&self) -> usize {
        self.min_points
    }

    /// Process a raw series
    ///
    /// Fails with `InsufficientData` when fewer than `min_points`
    /// observations survive the pipeline.
    pub fn process(&self, raw: &RawSeries, options: &ProcessingOptions) -> Result<ProcessedSeries> {
        let start = year_start(options.start_year)?;
        let mut points = Self::truncate(&raw.points, start);

        let frequency = if options.monthly_resample {
            points = Self::resample_monthly(&points);
            Frequency::Monthly
        } else {
            raw.frequency
        };

        let (detrended, levels) = Self::detrend(&points, options.detrend);

        if detrended.len() < self.min_points {
            debug!(
                "{}: {} points after processing from {} (need {})",
                raw.identifier,
                detrended.len(),
                options.start_year,
                self.min_points
            );
            return Err(AppError::InsufficientData {
                identifier: raw.identifier.clone(),
                points: detrended.len(),
                required: self.min_points,
            });
        }

        Ok(ProcessedSeries {
            identifier: raw.identifier.clone(),
            source: raw.source,
            frequency,
            points: detrended,
            levels,
        })
    }

    /// Whether `raw` spans the whole comparison window
    ///
    /// The first observation must fall in or before the calendar month of
    /// `start`, and the last must reach the calendar month of `end`.
    /// An empty series never covers anything.
    pub fn covers_window(raw: &RawSeries, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        let (Some(first), Some(last)) = (raw.first_time(), raw.last_time()) else {
            return false;
        };
        let starts_in_time = (first.year(), first.month()) <= (start.year(), start.month());
        let reaches_end = (last.year(), last.month()) >= (end.year(), end.month());
        starts_in_time && reaches_end
    }

    /// Drop every point before `start`
    pub fn truncate(points: &[SeriesPoint], start: DateTime<Utc>) -> Vec<SeriesPoint> {
        // Points are sorted, so everything from the first kept index on is kept
        let first = points.partition_point(|p| p.time < start);
        points[first..].to_vec()
    }

    /// One point per calendar month: the month's first observation,
    /// stamped at the first day of that month 00:00 UTC
    pub fn resample_monthly(points: &[SeriesPoint]) -> Vec<SeriesPoint> {
        let mut buckets: BTreeMap<DateTime<Utc>, f64> = BTreeMap::new();
        for point in points {
            buckets.entry(month_start(point.time)).or_insert(point.value);
        }
        buckets
            .into_iter()
            .map(|(time, value)| SeriesPoint::new(time, value))
            .collect()
    }

    /// Remove the trend
    ///
    /// Returns the detrended points and the pre-detrend values at the same
    /// timestamps.
    pub fn detrend(points: &[SeriesPoint], method: DetrendMethod) -> (Vec<SeriesPoint>, Vec<f64>) {
        match method {
            DetrendMethod::Linear => {
                let xs = elapsed_days(points);
                let ys: Vec<f64> = points.iter().map(|p| p.value).collect();
                let (slope, intercept) = linear_fit(&xs, &ys);

                let detrended = points
                    .iter()
                    .zip(xs.iter())
                    .map(|(p, x)| SeriesPoint::new(p.time, p.value - (intercept + slope * x)))
                    .collect();
                (detrended, ys)
            }
            DetrendMethod::FirstDifference => {
                let detrended = points
                    .windows(2)
                    .map(|w| SeriesPoint::new(w[1].time, w[1].value - w[0].value))
                    .collect();
                let levels = points.iter().skip(1).map(|p| p.value).collect();
                (detrended, levels)
            }
        }
    }
}

/// First instant of the calendar month containing `time`
pub fn month_start(time: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(time.year(), time.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(time)
}

/// Days since the first point, fractional
fn elapsed_days(points: &[SeriesPoint]) -> Vec<f64> {
    let Some(origin) = points.first().map(|p| p.time) else {
        return Vec::new();
    };
    points
        .iter()
        .map(|p| (p.time - origin).num_seconds() as f64 / 86_400.0)
        .collect()
}

/// Ordinary least squares fit of `ys` on `xs`, returns (slope, intercept)
pub fn linear_fit(xs: &[f64], ys: &[f64]) -> (f64, f64) {
    let n = xs.len().min(ys.len());
    if n == 0 {
        return (0.0, 0.0);
    }

    let mean_x = xs[..n].iter().sum::<f64>() / n as f64;
    let mean_y = ys[..n].iter().sum::<f64>() / n as f64;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for i in 0..n {
        let dx = xs[i] - mean_x;
        sxy += dx * (ys[i] - mean_y);
        sxx += dx * dx;
    }

    let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    (slope, mean_y - slope * mean_x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceMode;
    use chrono::{Duration, NaiveDate, Weekday};
    use std::collections::BTreeSet;

    /// Weekday calendar from `start` for `days` calendar days
    fn trading_days(start: NaiveDate, days: i64) -> Vec<DateTime<Utc>> {
        (0..days)
            .map(|i| start + Duration::days(i))
            .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
            .map(|d| Utc.from_utc_datetime(&d.and_hms_opt(0, 0, 0).unwrap()))
            .collect()
    }

    fn raw(times: &[DateTime<Utc>], f: impl Fn(usize) -> f64) -> RawSeries {
        let points = times
            .iter()
            .enumerate()
            .map(|(i, t)| SeriesPoint::new(*t, f(i)))
            .collect();
        RawSeries::from_points("TEST", SourceMode::Price, Frequency::Daily, points)
    }

    #[test]
    fn test_linear_detrend_removes_slope() {
        let times = trading_days(NaiveDate::from_ymd_opt(2015, 1, 1).unwrap(), 5 * 365);
        let series = raw(&times, |i| 100.0 + 0.05 * i as f64 + 3.0 * (i as f64 / 10.0).sin());

        let processed = Preprocessor::default()
            .process(&series, &ProcessingOptions::new(2015, false))
            .unwrap();

        assert_eq!(processed.len(), series.len());
        let xs = elapsed_days(&processed.points);
        let ys: Vec<f64> = processed.points.iter().map(|p| p.value).collect();
        let (slope, _) = linear_fit(&xs, &ys);
        assert!(slope.abs() < 1e-9, "residual slope {}", slope);

        // Timestamps and levels are preserved
        assert_eq!(processed.points[10].time, series.points[10].time);
        assert_eq!(processed.levels[10], series.points[10].value);
    }

    #[test]
    fn test_covers_window() {
        let end = Utc.with_ymd_and_hms(2023, 12, 29, 0, 0, 0).unwrap();
        let full = raw(&trading_days(NaiveDate::from_ymd_opt(2009, 6, 1).unwrap(), 5 * 365), |i| i as f64);
        let from_january = raw(&trading_days(NaiveDate::from_ymd_opt(2019, 1, 20).unwrap(), 5 * 365), |i| i as f64);
        let listed_late = raw(&trading_days(NaiveDate::from_ymd_opt(2023, 11, 20).unwrap(), 40), |i| i as f64);
        let delisted = raw(&trading_days(NaiveDate::from_ymd_opt(2009, 1, 1).unwrap(), 365 * 14), |i| i as f64);

        let jan = |year: i32| Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).unwrap();

        // 2009-06 + 5y ends in 2014, far before the end month
        assert!(!Preprocessor::covers_window(&full, jan(2010), end));
        assert!(Preprocessor::covers_window(&full, jan(2010), Utc.with_ymd_and_hms(2014, 5, 1, 0, 0, 0).unwrap()));
        assert!(Preprocessor::covers_window(&from_january, jan(2019), end));
        assert!(!Preprocessor::covers_window(&from_january, jan(2018), end));
        // only the month matters, not the day
        assert!(Preprocessor::covers_window(&from_january, Utc.with_ymd_and_hms(2019, 1, 2, 0, 0, 0).unwrap(), end));
        assert!(!Preprocessor::covers_window(&listed_late, jan(2010), end));
        assert!(Preprocessor::covers_window(&listed_late, Utc.with_ymd_and_hms(2023, 11, 1, 0, 0, 0).unwrap(), end));
        assert!(!Preprocessor::covers_window(&delisted, jan(2010), end));
        assert!(!Preprocessor::covers_window(&raw(&[], |_| 0.0), jan(2010), end));
    }

    #[test]
    fn test_process_is_deterministic() {
        let times = trading_days(NaiveDate::from_ymd_opt(2019, 6, 1).unwrap(), 900);
        let series = raw(&times, |i| ((i * 7919) % 113) as f64);
        let options = ProcessingOptions::new(2020, true).with_detrend(DetrendMethod::FirstDifference);

        let a = Preprocessor::default().process(&series, &options).unwrap();
        let b = Preprocessor::default().process(&series, &options).unwrap();
        assert_eq!(serde_json::to_vec(&a).unwrap(), serde_json::to_vec(&b).unwrap());
    }

    #[test]
    fn test_monthly_resample_one_point_per_month() {
        let times = trading_days(NaiveDate::from_ymd_opt(2020, 1, 15).unwrap(), 800);
        let months: BTreeSet<(i32, u32)> = times.iter().map(|t| (t.year(), t.month())).collect();
        let series = raw(&times, |i| i as f64);

        let processed = Preprocessor::default()
            .process(&series, &ProcessingOptions::new(2020, true))
            .unwrap();

        assert_eq!(processed.len(), months.len());
        assert_eq!(processed.frequency, Frequency::Monthly);
        assert!(processed.points.iter().all(|p| p.time.day() == 1));
        // First observation of January 2020 is the 15th, i.e. index 0
        assert_eq!(processed.levels[0], 0.0);
    }

    #[test]
    fn test_resample_takes_first_observation() {
        let t = |m, d| Utc.with_ymd_and_hms(2021, m, d, 0, 0, 0).unwrap();
        let points = vec![
            SeriesPoint::new(t(3, 2), 5.0),
            SeriesPoint::new(t(3, 31), 9.0),
            SeriesPoint::new(t(4, 1), 7.0),
        ];
        let resampled = Preprocessor::resample_monthly(&points);
        assert_eq!(
            resampled,
            vec![SeriesPoint::new(t(3, 1), 5.0), SeriesPoint::new(t(4, 1), 7.0)]
        );
    }

    #[test]
    fn test_truncation_below_threshold_is_insufficient_data() {
        let times = trading_days(NaiveDate::from_ymd_opt(2022, 11, 1).unwrap(), 90);
        let series = raw(&times, |i| i as f64);

        // Only January 2023 survives: roughly 22 trading days, 1 monthly point
        let err = Preprocessor::default()
            .process(&series, &ProcessingOptions::new(2023, true))
            .unwrap_err();
        assert!(matches!(err, AppError::InsufficientData { points: 1, required: 20, .. }));

        let err = Preprocessor::default()
            .process(&series, &ProcessingOptions::new(2024, false))
            .unwrap_err();
        assert!(matches!(err, AppError::InsufficientData { points: 0, .. }));
    }

    #[test]
    fn test_first_difference_drops_first_timestamp() {
        let t = |d| Utc.with_ymd_and_hms(2021, 1, d, 0, 0, 0).unwrap();
        let points = vec![
            SeriesPoint::new(t(1), 1.0),
            SeriesPoint::new(t(2), 4.0),
            SeriesPoint::new(t(3), 2.0),
        ];
        let (diffs, levels) = Preprocessor::detrend(&points, DetrendMethod::FirstDifference);
        assert_eq!(diffs, vec![SeriesPoint::new(t(2), 3.0), SeriesPoint::new(t(3), -2.0)]);
        assert_eq!(levels, vec![4.0, 2.0]);
    }
}
