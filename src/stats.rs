//! Small statistics used by both preparers. Missing values are `None` and are skipped.

use chrono::{Duration, NaiveDate};

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn max(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::max)
}

pub fn min(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::min)
}

pub fn sum(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum())
}

/// Quantile with linear interpolation between the two closest ranks.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let h = (sorted.len() - 1) as f64 * q.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    Some(sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo]))
}

/// Weighted mean over `(value, weight)` pairs.
///
/// Falls back to the plain mean when every weight is zero.
pub fn weighted_mean(pairs: &[(f64, f64)]) -> Option<f64> {
    if pairs.is_empty() {
        return None;
    }
    let total_weight: f64 = pairs.iter().map(|(_, w)| w).sum();
    if total_weight <= 0.0 {
        let values: Vec<f64> = pairs.iter().map(|(v, _)| *v).collect();
        return mean(&values);
    }
    Some(pairs.iter().map(|(v, w)| v * w).sum::<f64>() / total_weight)
}

pub fn present(values: &[Option<f64>]) -> Vec<f64> {
    values.iter().flatten().copied().collect()
}

/// Applies `agg` over the trailing window `(date - days, date]` of a date-sorted series.
///
/// The result is missing when the window holds fewer than `min_periods` present values.
pub fn rolling<F>(
    dates: &[NaiveDate],
    values: &[Option<f64>],
    days: i64,
    min_periods: usize,
    agg: F,
) -> Vec<Option<f64>>
where
    F: Fn(&[f64]) -> Option<f64>,
{
    let mut out = Vec::with_capacity(dates.len());
    let mut start = 0;
    for (i, date) in dates.iter().enumerate() {
        let lower = *date - Duration::days(days);
        while dates[start] <= lower {
            start += 1;
        }
        let window = present(&values[start..=i]);
        if window.len() < min_periods.max(1) {
            out.push(None);
        } else {
            out.push(agg(&window));
        }
    }
    out
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn should_interpolate_quantile() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(quantile(&values, 0.5), Some(3.0));
        assert_eq!(quantile(&values, 0.95), Some(4.8));
        assert_eq!(quantile(&[7.0], 0.99), Some(7.0));
        assert_eq!(quantile(&[], 0.5), None);
    }

    #[test]
    fn should_weight_by_population() {
        let pairs = [(10.0, 1.0), (20.0, 3.0)];
        assert_eq!(weighted_mean(&pairs), Some(17.5));
    }

    #[test]
    fn should_fall_back_to_mean_without_weights() {
        let pairs = [(10.0, 0.0), (20.0, 0.0)];
        assert_eq!(weighted_mean(&pairs), Some(15.0));
    }

    #[test]
    fn should_roll_over_calendar_days_not_rows() {
        let dates = [date(2020, 1, 1), date(2020, 1, 2), date(2020, 1, 5)];
        let values = [Some(1.0), Some(2.0), Some(4.0)];

        let sums = rolling(&dates, &values, 2, 1, sum);

        // 2020-01-05 window is (01-03, 01-05], which only holds itself
        assert_eq!(sums, vec![Some(1.0), Some(3.0), Some(4.0)]);
    }

    #[test]
    fn should_require_min_periods() {
        let dates = [date(2020, 1, 1), date(2020, 1, 2), date(2020, 1, 3)];
        let values = [Some(1.0), None, Some(1.0)];

        let sums = rolling(&dates, &values, 3, 2, sum);

        assert_eq!(sums, vec![None, None, Some(2.0)]);
    }
}
