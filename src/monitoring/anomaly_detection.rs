use serde::{Deserialize, Serialize};
use std::fmt;

use super::metrics::{MetricsTable, Timestamp};
use super::stats::{self, Baseline};
use super::thresholds::{Direction, Limit, ThresholdPolicy};
use crate::errors::{ObserverError, ObserverResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn is_severe(&self) -> bool {
        *self >= Severity::High
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    ThresholdBreach,
    StatisticalOutlier,
}

/// When an anomaly was observed. A single sample has `start == end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedAt {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl DetectedAt {
    pub fn at(ts: Timestamp) -> Self {
        Self { start: ts, end: ts }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    #[serde(rename = "type")]
    pub anomaly_type: String,
    pub kind: AnomalyKind,
    pub metric: String,
    pub description: String,
    pub severity: Severity,
    pub detected_at: DetectedAt,
    /// The offending value: the aggregate for a breach, the worst point for an outlier.
    pub value: f64,
    /// The bound for a breach, the baseline mean for an outlier.
    pub reference: f64,
}

/// Tuning for both detection passes and for the health penalty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// Breach ratios below this are medium.
    pub medium_ratio: f64,
    /// Breach ratios below this (and at or above `medium_ratio`) are high; the rest critical.
    pub high_ratio: f64,
    /// Outlier cut-off in standard deviations.
    pub deviation_multiple: f64,
    /// Fewer non-null samples than this and the statistical pass skips the metric.
    /// With n samples no point can sit beyond (n - 1) / sqrt(n) sample sigmas,
    /// so this must be large enough for `deviation_multiple` to be reachable.
    pub min_baseline_samples: usize,
    pub penalty_low: f64,
    pub penalty_medium: f64,
    pub penalty_high: f64,
    pub penalty_critical: f64,
    /// Share of samples beyond the bound that makes a breach "sustained".
    pub sustained_fraction: f64,
    /// Consecutive samples beyond the bound that also make it "sustained".
    pub sustained_min_run: usize,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            medium_ratio: 1.25,
            high_ratio: 1.5,
            deviation_multiple: 3.0,
            min_baseline_samples: 11,
            penalty_low: 2.0,
            penalty_medium: 5.0,
            penalty_high: 10.0,
            penalty_critical: 20.0,
            sustained_fraction: 0.5,
            sustained_min_run: 5,
        }
    }
}

impl DetectionSettings {
    pub fn validate(&self) -> ObserverResult<()> {
        if !(self.medium_ratio >= 1.0 && self.high_ratio > self.medium_ratio) {
            return Err(ObserverError::config(format!(
                "severity bands must satisfy 1 <= medium_ratio < high_ratio (got {} / {})",
                self.medium_ratio, self.high_ratio
            )));
        }
        if !(self.deviation_multiple > 0.0) {
            return Err(ObserverError::config("deviation_multiple must be positive"));
        }
        if self.min_baseline_samples < 3 {
            return Err(ObserverError::config("min_baseline_samples must be at least 3"));
        }
        let n = self.min_baseline_samples as f64;
        if (n - 1.0) / n.sqrt() <= self.deviation_multiple {
            return Err(ObserverError::config(format!(
                "min_baseline_samples {} can never produce a point beyond {} standard deviations",
                self.min_baseline_samples, self.deviation_multiple
            )));
        }
        let penalties = [self.penalty_low, self.penalty_medium, self.penalty_high, self.penalty_critical];
        if penalties.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return Err(ObserverError::config("severity penalties must be finite and non-negative"));
        }
        if penalties.windows(2).any(|w| w[0] > w[1]) {
            return Err(ObserverError::config(format!(
                "severity penalties must not decrease with severity (got {} / {} / {} / {})",
                self.penalty_low, self.penalty_medium, self.penalty_high, self.penalty_critical
            )));
        }
        if !(self.sustained_fraction > 0.0 && self.sustained_fraction <= 1.0) || self.sustained_min_run == 0 {
            return Err(ObserverError::config("sustained_fraction must be in (0, 1] and sustained_min_run > 0"));
        }
        Ok(())
    }

    /// Severity of a threshold breach from its ratio (>= 1).
    pub fn breach_severity(&self, ratio: f64) -> Severity {
        if ratio < self.medium_ratio {
            Severity::Medium
        } else if ratio < self.high_ratio {
            Severity::High
        } else {
            Severity::Critical
        }
    }

    /// Severity of an outlier from |z|: one extra sigma per step up.
    pub fn outlier_severity(&self, abs_z: f64) -> Severity {
        let k = self.deviation_multiple;
        if abs_z < k + 1.0 {
            Severity::Low
        } else if abs_z < k + 2.0 {
            Severity::Medium
        } else {
            Severity::High
        }
    }

    pub fn penalty(&self, severity: Severity) -> f64 {
        match severity {
            Severity::Low => self.penalty_low,
            Severity::Medium => self.penalty_medium,
            Severity::High => self.penalty_high,
            Severity::Critical => self.penalty_critical,
        }
    }

    /// 100 minus the severity-weighted penalties, floored at 0.
    pub fn health_score(&self, anomalies: &[Anomaly]) -> f64 {
        let penalty: f64 = anomalies.iter().map(|a| self.penalty(a.severity)).sum();
        (100.0 - penalty).clamp(0.0, 100.0)
    }
}

/// How long and how often a metric sat beyond its bound.
#[derive(Debug, Clone, PartialEq)]
pub struct BreachProfile {
    pub metric: String,
    pub limit: Limit,
    pub breaching: usize,
    pub total: usize,
    pub longest_run: usize,
    pub longest_run_span: Option<DetectedAt>,
}

impl BreachProfile {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 { 0.0 } else { self.breaching as f64 / self.total as f64 }
    }

    pub fn is_sustained(&self, settings: &DetectionSettings) -> bool {
        self.breaching > 0
            && (self.fraction() >= settings.sustained_fraction || self.longest_run >= settings.sustained_min_run)
    }
}

pub struct AnomalyDetector<'a> {
    thresholds: &'a ThresholdPolicy,
    settings: &'a DetectionSettings,
}

impl<'a> AnomalyDetector<'a> {
    pub fn new(thresholds: &'a ThresholdPolicy, settings: &'a DetectionSettings) -> Self {
        Self { thresholds, settings }
    }

    /// Threshold breaches first (in metric order), then statistical outliers.
    pub fn analyze_metrics(&self, table: &MetricsTable, summary: &[(String, f64)]) -> Vec<Anomaly> {
        let mut anomalies = self.threshold_breaches(table, summary);
        anomalies.extend(self.statistical_outliers(table));
        anomalies
    }

    /// Compare each metric's aggregate against its limit.
    pub fn threshold_breaches(&self, table: &MetricsTable, summary: &[(String, f64)]) -> Vec<Anomaly> {
        summary
            .iter()
            .filter_map(|(metric, aggregate)| {
                let limit = self.thresholds.get(metric)?;
                if !limit.is_breached_by(*aggregate) {
                    return None;
                }

                let ratio = limit.breach_ratio(*aggregate);
                let severity = self.settings.breach_severity(ratio);
                let series = table.series(metric);
                let breaching: Vec<Timestamp> = series
                    .iter()
                    .filter(|(_, v)| limit.is_breached_by(*v))
                    .map(|(ts, _)| *ts)
                    .collect();
                let detected_at = match (breaching.first(), breaching.last()) {
                    (Some(start), Some(end)) => DetectedAt { start: *start, end: *end },
                    _ => {
                        let (start, end) = table.time_range()?;
                        DetectedAt { start, end }
                    }
                };

                let (prefix, verb) = match limit.direction {
                    Direction::Exceeds => ("high", "above"),
                    Direction::FallsBelow => ("low", "below"),
                };
                Some(Anomaly {
                    anomaly_type: format!("{}_{}", prefix, metric),
                    kind: AnomalyKind::ThresholdBreach,
                    metric: metric.clone(),
                    description: format!(
                        "Average {} of {:.2} is {} the threshold of {:.2} ({:.2}x breach, {} of {} samples)",
                        metric,
                        aggregate,
                        verb,
                        limit.bound,
                        ratio,
                        breaching.len(),
                        series.len()
                    ),
                    severity,
                    detected_at,
                    value: *aggregate,
                    reference: limit.bound,
                })
            })
            .collect()
    }

    /// Flag runs of points further than `deviation_multiple` sigmas from the
    /// whole-series mean. Consecutive outlier rows collapse into one anomaly.
    pub fn statistical_outliers(&self, table: &MetricsTable) -> Vec<Anomaly> {
        let mut anomalies = Vec::new();

        for metric in table.metrics() {
            let series = table.series(metric);
            if series.len() < self.settings.min_baseline_samples {
                continue;
            }
            let values: Vec<f64> = series.iter().map(|(_, v)| *v).collect();
            let Some(baseline) = Baseline::from_values(&values) else {
                continue;
            };

            let mut run: Option<OutlierRun> = None;
            for (idx, (ts, value)) in series.iter().enumerate() {
                let z = baseline.z_score(*value).unwrap_or(0.0);
                if z.abs() > self.settings.deviation_multiple {
                    match run.as_mut() {
                        Some(open) if open.last_idx + 1 == idx => open.extend(idx, *ts, *value, z),
                        _ => {
                            if let Some(done) = run.take() {
                                anomalies.push(done.into_anomaly(metric, &baseline, self.settings));
                            }
                            run = Some(OutlierRun::start(idx, *ts, *value, z));
                        }
                    }
                }
            }
            if let Some(done) = run {
                anomalies.push(done.into_anomaly(metric, &baseline, self.settings));
            }
        }

        anomalies
    }

    /// Per-row breach statistics for every limited metric, used for insights.
    pub fn breach_profiles(&self, table: &MetricsTable) -> Vec<BreachProfile> {
        self.thresholds
            .iter()
            .filter(|(metric, _)| table.has_metric(metric))
            .map(|(metric, limit)| {
                let series = table.series(metric);
                let mut breaching = 0;
                let mut longest_run = 0;
                let mut longest_run_span = None;
                let mut current: Option<(usize, Timestamp, Timestamp)> = None;

                for (ts, value) in &series {
                    if limit.is_breached_by(*value) {
                        breaching += 1;
                        let (len, start, _) = current.unwrap_or((0, *ts, *ts));
                        current = Some((len + 1, start, *ts));
                        if len + 1 > longest_run {
                            longest_run = len + 1;
                            longest_run_span = Some(DetectedAt { start, end: *ts });
                        }
                    } else {
                        current = None;
                    }
                }

                BreachProfile {
                    metric: metric.to_string(),
                    limit: *limit,
                    breaching,
                    total: series.len(),
                    longest_run,
                    longest_run_span,
                }
            })
            .collect()
    }
}

struct OutlierRun {
    last_idx: usize,
    span: DetectedAt,
    points: usize,
    worst_value: f64,
    worst_z: f64,
}

impl OutlierRun {
    fn start(idx: usize, ts: Timestamp, value: f64, z: f64) -> Self {
        Self {
            last_idx: idx,
            span: DetectedAt::at(ts),
            points: 1,
            worst_value: value,
            worst_z: z,
        }
    }

    fn extend(&mut self, idx: usize, ts: Timestamp, value: f64, z: f64) {
        self.last_idx = idx;
        self.span.end = ts;
        self.points += 1;
        if z.abs() > self.worst_z.abs() {
            self.worst_z = z;
            self.worst_value = value;
        }
    }

    fn into_anomaly(self, metric: &str, baseline: &Baseline, settings: &DetectionSettings) -> Anomaly {
        let direction = if self.worst_z > 0.0 { "above" } else { "below" };
        Anomaly {
            anomaly_type: "statistical_outlier".to_string(),
            kind: AnomalyKind::StatisticalOutlier,
            metric: metric.to_string(),
            description: format!(
                "{} reached {:.2}, {:.1} standard deviations {} its mean of {:.2} ({} consecutive sample{})",
                metric,
                self.worst_value,
                self.worst_z.abs(),
                direction,
                baseline.mean,
                self.points,
                if self.points == 1 { "" } else { "s" }
            ),
            severity: settings.outlier_severity(self.worst_z.abs()),
            detected_at: self.span,
            value: self.worst_value,
            reference: baseline.mean,
        }
    }
}

/// Mean of every tracked metric that has at least one sample, in table order.
pub fn summarize(table: &MetricsTable) -> Vec<(String, f64)> {
    table
        .metrics()
        .iter()
        .filter_map(|metric| stats::mean(&table.values(metric)).map(|m| (metric.clone(), m)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::schema::ServiceKind;
    use crate::monitoring::metrics::TableBuilder;
    use chrono::{Duration, TimeZone, Utc};

    fn table(metric: &str, values: &[f64]) -> MetricsTable {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let mut builder = TableBuilder::new([metric]);
        for (i, v) in values.iter().enumerate() {
            builder.push(start + Duration::minutes(i as i64), [(metric, Some(*v))]);
        }
        builder.build()
    }

    #[test]
    fn breach_bands() {
        let settings = DetectionSettings::default();
        assert_eq!(settings.breach_severity(1.1), Severity::Medium);
        assert_eq!(settings.breach_severity(1.3), Severity::High);
        assert_eq!(settings.breach_severity(1.5), Severity::Critical);
        assert_eq!(settings.breach_severity(1.6), Severity::Critical);
    }

    #[test]
    fn cpu_at_128_is_critical() {
        let policy = ThresholdPolicy::for_service(ServiceKind::ComputeCluster);
        let settings = DetectionSettings::default();
        let detector = AnomalyDetector::new(&policy, &settings);
        let data = table("cpu_usage_percent", &[128.0; 12]);

        let anomalies = detector.analyze_metrics(&data, &summarize(&data));
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].severity, Severity::Critical);
        assert_eq!(anomalies[0].anomaly_type, "high_cpu_usage_percent");
        assert_eq!(settings.health_score(&anomalies), 80.0);
    }

    #[test]
    fn lower_bound_breach_mirrors() {
        let policy = ThresholdPolicy::for_service(ServiceKind::Cache);
        let settings = DetectionSettings::default();
        let detector = AnomalyDetector::new(&policy, &settings);
        // 70 against a floor of 80 is an 80/70 ~ 1.14x breach
        let data = table("cache_hit_rate_percent", &[70.0; 12]);

        let anomalies = detector.threshold_breaches(&data, &summarize(&data));
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].severity, Severity::Medium);
        assert_eq!(anomalies[0].anomaly_type, "low_cache_hit_rate_percent");
    }

    #[test]
    fn spike_is_flagged_as_outlier_without_breach() {
        let policy = ThresholdPolicy::for_service(ServiceKind::ComputeCluster);
        let settings = DetectionSettings::default();
        let detector = AnomalyDetector::new(&policy, &settings);
        let mut values = vec![20.0, 21.0, 19.0, 20.5, 19.5, 20.0, 21.0, 19.0, 20.0, 20.5,
                              19.5, 20.0, 21.0, 19.0, 20.0, 20.5, 19.5, 20.0, 21.0, 20.0];
        values[10] = 60.0;
        let data = table("cpu_usage_percent", &values);

        let anomalies = detector.analyze_metrics(&data, &summarize(&data));
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].kind, AnomalyKind::StatisticalOutlier);
        assert_eq!(anomalies[0].value, 60.0);
        assert_eq!(anomalies[0].detected_at.start, anomalies[0].detected_at.end);
    }

    #[test]
    fn short_series_skip_statistical_pass() {
        let policy = ThresholdPolicy::for_service(ServiceKind::ComputeCluster);
        let settings = DetectionSettings::default();
        let detector = AnomalyDetector::new(&policy, &settings);
        let data = table("cpu_usage_percent", &[20.0, 20.0, 20.0, 95.0]);
        assert!(detector.statistical_outliers(&data).is_empty());
    }

    #[test]
    fn score_floors_at_zero() {
        let settings = DetectionSettings::default();
        let anomaly = Anomaly {
            anomaly_type: "high_cpu_usage_percent".into(),
            kind: AnomalyKind::ThresholdBreach,
            metric: "cpu_usage_percent".into(),
            description: String::new(),
            severity: Severity::Critical,
            detected_at: DetectedAt::at(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            value: 200.0,
            reference: 80.0,
        };
        let many = vec![anomaly; 7];
        assert_eq!(settings.health_score(&many), 0.0);
        assert_eq!(settings.health_score(&[]), 100.0);
    }

    #[test]
    fn breach_profile_finds_longest_run() {
        let policy = ThresholdPolicy::for_service(ServiceKind::ComputeCluster);
        let settings = DetectionSettings::default();
        let detector = AnomalyDetector::new(&policy, &settings);
        let data = table("cpu_usage_percent", &[90.0, 50.0, 91.0, 92.0, 93.0, 50.0]);

        let profiles = detector.breach_profiles(&data);
        let cpu = profiles.iter().find(|p| p.metric == "cpu_usage_percent").unwrap();
        assert_eq!(cpu.breaching, 4);
        assert_eq!(cpu.longest_run, 3);
        assert!(cpu.is_sustained(&settings));
    }

    #[test]
    fn rejects_unordered_bands_and_negative_penalties() {
        let mut settings = DetectionSettings { high_ratio: 1.1, ..Default::default() };
        assert!(settings.validate().is_err());
        settings = DetectionSettings { penalty_low: -1.0, ..Default::default() };
        assert!(settings.validate().is_err());
        assert!(DetectionSettings::default().validate().is_ok());
    }

    #[test]
    fn rejects_penalties_that_shrink_with_severity() {
        let inverted = DetectionSettings { penalty_low: 30.0, ..Default::default() };
        assert!(matches!(inverted.validate(), Err(ObserverError::Configuration(_))));

        let flat = DetectionSettings {
            penalty_low: 5.0,
            penalty_medium: 5.0,
            penalty_high: 5.0,
            penalty_critical: 5.0,
            ..Default::default()
        };
        assert!(flat.validate().is_ok());
    }

    #[test]
    fn rejects_baselines_too_short_to_reach_the_cutoff() {
        // ten samples top out at 9 / sqrt(10) ~ 2.85 sigmas
        let short = DetectionSettings { min_baseline_samples: 10, ..Default::default() };
        assert!(matches!(short.validate(), Err(ObserverError::Configuration(_))));

        let looser = DetectionSettings { min_baseline_samples: 10, deviation_multiple: 2.5, ..Default::default() };
        assert!(looser.validate().is_ok());

        // the default window can flag a single spike
        let settings = DetectionSettings::default();
        let mut values = vec![50.0; settings.min_baseline_samples - 1];
        values.push(500.0);
        let policy = ThresholdPolicy::for_service(ServiceKind::ComputeCluster);
        let detector = AnomalyDetector::new(&policy, &settings);
        let outliers = detector.statistical_outliers(&table("cpu_usage_percent", &values));
        assert_eq!(outliers.len(), 1);
        assert_eq!(outliers[0].value, 500.0);
    }
}
