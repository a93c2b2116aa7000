//! Small numeric helpers shared by the agents and the correlation engine.
//! Everything here works on plain `f64` slices that are already free of nulls.

use serde::{Deserialize, Serialize};

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1 denominator).
pub fn std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let variance = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / (values.len() - 1) as f64;
    Some(variance.sqrt())
}

/// Linear-interpolated quantile, `q` in [0, 1].
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let q = q.clamp(0.0, 1.0);
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let weight = pos - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
}

pub fn median(values: &[f64]) -> Option<f64> {
    quantile(values, 0.5)
}

/// Baseline of a series: mean and sample standard deviation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baseline {
    pub mean: f64,
    pub std_dev: f64,
}

impl Baseline {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        Some(Self {
            mean: mean(values)?,
            std_dev: std_dev(values)?,
        })
    }

    /// `None` for a flat series, where every point is "the baseline".
    pub fn z_score(&self, value: f64) -> Option<f64> {
        if self.std_dev <= f64::EPSILON {
            return None;
        }
        Some((value - self.mean) / self.std_dev)
    }
}

/// Pearson correlation of two equally long series.
///
/// Returns `None` when the lengths differ, there are fewer than two points, or
/// either side has zero variance. The result is clamped to [-1, 1] so float
/// noise never leaks outside the valid range.
pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    let n = a.len();
    if n != b.len() || n < 2 {
        return None;
    }

    let mean_a = mean(a)?;
    let mean_b = mean(b)?;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        let da = x - mean_a;
        let db = y - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    let denom = (var_a * var_b).sqrt();
    if denom < 1e-12 {
        return None;
    }
    Some((cov / denom).clamp(-1.0, 1.0))
}

/// Summary statistics for one metric column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesStats {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub p95: f64,
    pub min: f64,
    pub max: f64,
    pub latest: f64,
}

impl SeriesStats {
    /// `values` must be in time order so that `latest` is meaningful.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let latest = *values.last()?;
        Some(Self {
            count: values.len(),
            mean: mean(values)?,
            median: median(values)?,
            p95: quantile(values, 0.95)?,
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            latest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn mean_and_std_dev() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!(close(mean(&values).unwrap(), 5.0));
        // sample std dev of this classic set is sqrt(32 / 7)
        assert!(close(std_dev(&values).unwrap(), (32.0f64 / 7.0).sqrt()));
        assert_eq!(mean(&[]), None);
        assert_eq!(std_dev(&[1.0]), None);
    }

    #[test]
    fn quantiles_interpolate() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert!(close(median(&values).unwrap(), 3.0));
        assert!(close(quantile(&values, 0.95).unwrap(), 4.8));
        assert!(close(quantile(&[5.0, 1.0], 0.5).unwrap(), 3.0));
        assert_eq!(quantile(&[], 0.5), None);
    }

    #[test]
    fn pearson_extremes() {
        let a: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let b: Vec<f64> = a.iter().map(|x| 3.0 * x + 1.0).collect();
        let c: Vec<f64> = a.iter().map(|x| 100.0 - 2.0 * x).collect();
        assert!(close(pearson(&a, &b).unwrap(), 1.0));
        assert!(close(pearson(&a, &c).unwrap(), -1.0));
    }

    #[test]
    fn pearson_rejects_degenerate_input() {
        assert_eq!(pearson(&[1.0, 2.0], &[1.0]), None);
        assert_eq!(pearson(&[1.0], &[1.0]), None);
        assert_eq!(pearson(&[1.0, 2.0, 3.0], &[4.0, 4.0, 4.0]), None);
    }

    #[test]
    fn flat_baseline_has_no_z_score() {
        let baseline = Baseline::from_values(&[3.0, 3.0, 3.0]).unwrap();
        assert_eq!(baseline.z_score(10.0), None);
    }

    #[test]
    fn series_stats_tracks_latest() {
        let stats = SeriesStats::from_values(&[10.0, 30.0, 20.0]).unwrap();
        assert_eq!(stats.count, 3);
        assert!(close(stats.latest, 20.0));
        assert!(close(stats.max, 30.0));
        assert!(close(stats.min, 10.0));
        assert!(close(stats.median, 20.0));
    }
}
