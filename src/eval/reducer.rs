//! Series reducers
//!
//! A reducer collapses one time series into a single nullable scalar.
//! Null and NaN points are excluded; a series whose every point is invalid
//! reduces to `None`, which is distinct from zero.

use serde::{Deserialize, Serialize};

use crate::model::TimeSeries;

/// How a time series is reduced to one scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reducer {
    Avg,
    Sum,
    Min,
    Max,
    /// Counts every point, including nulls.
    Count,
    Last,
    Median,
    /// Newest valid point minus the oldest valid point.
    Diff,
    DiffAbs,
    PercentDiff,
    PercentDiffAbs,
    CountNonNull,
}

impl Reducer {
    pub fn reduce(&self, series: &TimeSeries) -> Option<f64> {
        if series.points.is_empty() {
            return None;
        }

        let valid = || {
            series
                .points
                .iter()
                .filter(|p| p.is_valid())
                .filter_map(|p| p.value)
        };

        match self {
            Reducer::Avg => {
                let (sum, count) = valid().fold((0.0, 0u64), |(s, c), v| (s + v, c + 1));
                if count == 0 {
                    None
                } else {
                    Some(sum / count as f64)
                }
            }
            Reducer::Sum => {
                let mut any = false;
                let sum = valid().inspect(|_| any = true).sum();
                any.then_some(sum)
            }
            Reducer::Min => valid().fold(None, |acc: Option<f64>, v| {
                Some(acc.map_or(v, |a| a.min(v)))
            }),
            Reducer::Max => valid().fold(None, |acc: Option<f64>, v| {
                Some(acc.map_or(v, |a| a.max(v)))
            }),
            Reducer::Count => Some(series.points.len() as f64),
            Reducer::Last => series
                .points
                .iter()
                .rev()
                .find(|p| p.is_valid())
                .and_then(|p| p.value),
            Reducer::Median => {
                let mut values: Vec<f64> = valid().collect();
                if values.is_empty() {
                    return None;
                }
                values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                let n = values.len();
                if n % 2 == 1 {
                    Some(values[(n - 1) / 2])
                } else {
                    Some((values[n / 2 - 1] + values[n / 2]) / 2.0)
                }
            }
            Reducer::Diff => reduce_diff(series, |newest, oldest| newest - oldest),
            Reducer::DiffAbs => reduce_diff(series, |newest, oldest| (newest - oldest).abs()),
            Reducer::PercentDiff => {
                reduce_diff(series, |newest, oldest| (newest - oldest) / oldest.abs() * 100.0)
            }
            Reducer::PercentDiffAbs => {
                reduce_diff(series, |newest, oldest| ((newest - oldest) / oldest * 100.0).abs())
            }
            Reducer::CountNonNull => {
                let count = valid().count();
                if count == 0 {
                    None
                } else {
                    Some(count as f64)
                }
            }
        }
    }
}

/// Compare the newest valid point against the oldest valid point that
/// precedes it. A series with a single valid point reduces to zero, not
/// `None`.
fn reduce_diff(series: &TimeSeries, f: impl Fn(f64, f64) -> f64) -> Option<f64> {
    let newest_idx = series.points.iter().rposition(|p| p.is_valid())?;
    let newest = series.points[newest_idx].value?;

    let oldest = series.points[..newest_idx]
        .iter()
        .find(|p| p.is_valid())
        .and_then(|p| p.value);

    match oldest {
        Some(oldest) => Some(f(newest, oldest)),
        None => Some(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Point;

    fn series(values: &[Option<f64>]) -> TimeSeries {
        TimeSeries::new("test").with_points(
            values
                .iter()
                .enumerate()
                .map(|(i, v)| Point::new(*v, i as i64 * 1000))
                .collect(),
        )
    }

    #[test]
    fn test_avg() {
        let s = series(&[Some(120.0), Some(0.0)]);
        assert_eq!(Reducer::Avg.reduce(&s), Some(60.0));

        let s = series(&[Some(120.0), Some(150.0)]);
        assert_eq!(Reducer::Avg.reduce(&s), Some(135.0));
    }

    #[test]
    fn test_avg_skips_nulls() {
        let s = series(&[Some(3.0), None, Some(f64::NAN), Some(1.0)]);
        assert_eq!(Reducer::Avg.reduce(&s), Some(2.0));
    }

    #[test]
    fn test_all_null_reduces_to_none() {
        let s = series(&[None, Some(f64::NAN), None]);
        for reducer in [
            Reducer::Avg,
            Reducer::Sum,
            Reducer::Min,
            Reducer::Max,
            Reducer::Last,
            Reducer::Median,
            Reducer::CountNonNull,
        ] {
            assert_eq!(reducer.reduce(&s), None, "{:?}", reducer);
        }
    }

    #[test]
    fn test_empty_series_reduces_to_none() {
        let s = series(&[]);
        assert_eq!(Reducer::Count.reduce(&s), None);
        assert_eq!(Reducer::Sum.reduce(&s), None);
    }

    #[test]
    fn test_count_includes_nulls() {
        let s = series(&[Some(1.0), None, Some(3.0)]);
        assert_eq!(Reducer::Count.reduce(&s), Some(3.0));
        assert_eq!(Reducer::CountNonNull.reduce(&s), Some(2.0));
    }

    #[test]
    fn test_min_max_last_median() {
        let s = series(&[Some(3.0), Some(1.0), Some(4.0), Some(2.0)]);
        assert_eq!(Reducer::Min.reduce(&s), Some(1.0));
        assert_eq!(Reducer::Max.reduce(&s), Some(4.0));
        assert_eq!(Reducer::Last.reduce(&s), Some(2.0));
        assert_eq!(Reducer::Median.reduce(&s), Some(2.5));
    }

    #[test]
    fn test_last_skips_trailing_null() {
        let s = series(&[Some(1.0), Some(5.0), None]);
        assert_eq!(Reducer::Last.reduce(&s), Some(5.0));
    }

    #[test]
    fn test_diff_family() {
        let s = series(&[Some(30.0), Some(40.0)]);
        assert_eq!(Reducer::Diff.reduce(&s), Some(10.0));

        let s = series(&[Some(40.0), Some(30.0)]);
        assert_eq!(Reducer::Diff.reduce(&s), Some(-10.0));
        assert_eq!(Reducer::DiffAbs.reduce(&s), Some(10.0));

        let s = series(&[Some(40.0), Some(30.0)]);
        assert_eq!(Reducer::PercentDiff.reduce(&s), Some(-25.0));
        assert_eq!(Reducer::PercentDiffAbs.reduce(&s), Some(25.0));
    }

    #[test]
    fn test_diff_single_valid_point_is_zero() {
        let s = series(&[None, Some(40.0)]);
        assert_eq!(Reducer::Diff.reduce(&s), Some(0.0));
    }

    #[test]
    fn test_percent_diff_negative_oldest() {
        // oldest is negative: percent_diff divides by |oldest|
        let s = series(&[Some(-10.0), Some(10.0)]);
        assert_eq!(Reducer::PercentDiff.reduce(&s), Some(200.0));
    }
}
