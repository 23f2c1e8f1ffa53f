//! Small numeric helpers shared by the metrics, calibration and
//! settlement code. Every helper returns a finite value; degenerate inputs
//! (empty series, zero denominators) yield 0.0.

use statrs::statistics::Statistics;

/// Round to a fixed number of decimal places.
pub fn round_dp(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    finite_or_zero((value * factor).round() / factor)
}

pub fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Division guarded against zero and non-finite denominators.
pub fn safe_div(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 || !denominator.is_finite() {
        return 0.0;
    }
    finite_or_zero(numerator / denominator)
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    finite_or_zero(values.iter().mean())
}

/// Population standard deviation (divides by N).
pub fn population_std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    finite_or_zero(values.iter().population_std_dev())
}

/// Standard deviation over mean. 0.0 with fewer than two values or a zero
/// mean.
pub fn coefficient_of_variation(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    if m == 0.0 {
        return 0.0;
    }
    safe_div(population_std_dev(values), m)
}

/// Ordinary-least-squares slope of `values` against their index.
pub fn ols_slope(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let xs: Vec<f64> = (0..values.len()).map(|i| i as f64).collect();
    let variance = xs.iter().population_variance();
    let covariance = xs.iter().population_covariance(values.iter());
    safe_div(covariance, variance)
}

/// Nearest-rank quantile: the element at `floor(len × q)` of the sorted
/// values. `None` for an empty slice.
pub fn nearest_rank(values: &[f64], q: f64) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    let idx = ((sorted.len() as f64) * q.clamp(0.0, 1.0)).floor() as usize;
    sorted.get(idx.min(sorted.len() - 1)).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_dp() {
        assert_eq!(round_dp(2.46501, 3), 2.465);
        assert_eq!(round_dp(0.125, 2), 0.13);
        assert_eq!(round_dp(f64::NAN, 3), 0.0);
    }

    #[test]
    fn test_safe_div_guards() {
        assert_eq!(safe_div(5.0, 0.0), 0.0);
        assert_eq!(safe_div(5.0, f64::INFINITY), 0.0);
        assert_eq!(safe_div(6.0, 3.0), 2.0);
    }

    #[test]
    fn test_population_std_dev() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((population_std_dev(&values) - 2.0).abs() < 1e-12);
        assert_eq!(population_std_dev(&[]), 0.0);
    }

    #[test]
    fn test_coefficient_of_variation_edge_cases() {
        assert_eq!(coefficient_of_variation(&[3.0]), 0.0);
        assert_eq!(coefficient_of_variation(&[0.0, 0.0, 0.0]), 0.0);
        assert_eq!(coefficient_of_variation(&[4.0, 4.0, 4.0]), 0.0);
        let cv = coefficient_of_variation(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((cv - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_ols_slope() {
        assert!((ols_slope(&[1.0, 3.0, 5.0, 7.0]) - 2.0).abs() < 1e-12);
        assert!((ols_slope(&[4.0, 4.0, 4.0])).abs() < 1e-12);
        assert_eq!(ols_slope(&[10.0]), 0.0);
        assert_eq!(ols_slope(&[]), 0.0);
    }

    #[test]
    fn test_nearest_rank() {
        let values = [0.9, 0.1, 0.5, 0.3, 0.7, 0.2, 0.8, 0.4];
        // sorted: 0.1 0.2 0.3 0.4 0.5 0.7 0.8 0.9 → index 2
        assert_eq!(nearest_rank(&values, 0.25), Some(0.3));
        assert_eq!(nearest_rank(&values, 1.0), Some(0.9));
        assert_eq!(nearest_rank(&[], 0.25), None);
    }
}
