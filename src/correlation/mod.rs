/*
* Correlation Engine
* ------------------
* The cross-service step. Runs only after every agent is done (it needs all
* results at once) and never mutates them.
*
*   1. Pairwise Pearson correlation of each pair of services' primary metrics,
*      inner-joined on timestamp. Silence below the overlap or significance
*      bound, never a zero-valued record.
*   2. Bottlenecks: local saturation (severe anomaly + low health) and/or
*      being the common factor in several strong correlations with degraded
*      services.
*   3. System health: 100 minus the mean health deficit of available services,
*      with a bottleneck's deficit counted `bottleneck_weight` times. A
*      bottleneck can only pull the score down. Services without data are
*      excluded, not zeroed.
*
* Output order is fully specified (no HashMap iteration anywhere), so the same
* inputs always give byte-identical output.
*/

pub mod recommendations;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

use crate::agents::{AnalysisResult, HealthStatus};
use crate::errors::{ObserverError, ObserverResult};
use crate::monitoring::anomaly_detection::{Anomaly, Severity};
use crate::monitoring::metrics::Timestamp;
use crate::monitoring::stats;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationSettings {
    /// |r| must be strictly greater than this to be reported.
    pub min_coefficient: f64,
    /// Minimum number of timestamps both services share.
    pub min_overlap: usize,
    /// Local saturation needs health below this.
    pub bottleneck_health_threshold: f64,
    /// A correlated partner counts as degraded below this.
    pub degraded_health_threshold: f64,
    /// Strong links to degraded partners needed to call a service a root cause.
    pub min_propagation_links: usize,
    /// Multiplier on a bottleneck's health deficit in the overall score.
    pub bottleneck_weight: f64,
}

impl Default for CorrelationSettings {
    fn default() -> Self {
        Self {
            min_coefficient: 0.6,
            min_overlap: 10,
            bottleneck_health_threshold: 60.0,
            degraded_health_threshold: 80.0,
            min_propagation_links: 2,
            bottleneck_weight: 2.0,
        }
    }
}

impl CorrelationSettings {
    pub fn validate(&self) -> ObserverResult<()> {
        if !(self.min_coefficient > 0.0 && self.min_coefficient < 1.0) {
            return Err(ObserverError::config("min_coefficient must be in (0, 1)"));
        }
        if self.min_overlap < 3 {
            return Err(ObserverError::config("min_overlap must be at least 3"));
        }
        for (name, value) in [
            ("bottleneck_health_threshold", self.bottleneck_health_threshold),
            ("degraded_health_threshold", self.degraded_health_threshold),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(ObserverError::config(format!("{} must be within 0..=100", name)));
            }
        }
        if self.min_propagation_links == 0 {
            return Err(ObserverError::config("min_propagation_links must be at least 1"));
        }
        if !(self.bottleneck_weight.is_finite() && self.bottleneck_weight >= 1.0) {
            return Err(ObserverError::config("bottleneck_weight must be >= 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correlation {
    /// Always two distinct services, in name order.
    pub services: [String; 2],
    pub metrics: [String; 2],
    pub correlation: f64,
    pub sample_count: usize,
    pub description: String,
}

impl Correlation {
    pub fn involves(&self, service: &str) -> bool {
        self.services.iter().any(|s| s == service)
    }

    pub fn partner_of(&self, service: &str) -> Option<&str> {
        match &self.services {
            [a, b] if a == service => Some(b.as_str()),
            [a, b] if b == service => Some(a.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BottleneckKind {
    /// Severe anomaly and low health on the service itself.
    ResourceSaturation,
    /// Strongly correlated with several degraded services.
    PropagatingDegradation,
    /// Both of the above.
    RootCause,
}

impl fmt::Display for BottleneckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BottleneckKind::ResourceSaturation => write!(f, "resource_saturation"),
            BottleneckKind::PropagatingDegradation => write!(f, "propagating_degradation"),
            BottleneckKind::RootCause => write!(f, "root_cause"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bottleneck {
    pub service: String,
    #[serde(rename = "type")]
    pub kind: BottleneckKind,
    pub severity: Severity,
    pub health_score: f64,
    pub description: String,
    pub impact: String,
    /// Degraded services linked to this one by a strong correlation.
    pub implicated_services: Vec<String>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthFactor {
    pub service: String,
    /// `None` for services excluded for lack of data.
    pub health_score: Option<f64>,
    pub weight: f64,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealth {
    pub overall_score: f64,
    pub status: HealthStatus,
    pub services_included: usize,
    pub excluded_services: Vec<String>,
    pub factors: Vec<HealthFactor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationAnalysis {
    pub correlations: Vec<Correlation>,
    pub bottlenecks: Vec<Bottleneck>,
    pub system_health: SystemHealth,
}

#[derive(Debug, Clone, Default)]
pub struct CorrelationEngine {
    settings: CorrelationSettings,
}

impl CorrelationEngine {
    pub fn new(settings: CorrelationSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &CorrelationSettings {
        &self.settings
    }

    pub fn analyze_correlations(
        &self,
        results: &BTreeMap<String, AnalysisResult>,
    ) -> ObserverResult<CorrelationAnalysis> {
        let usable = results.values().filter(|r| !r.is_empty()).count();
        if usable == 0 {
            return Err(ObserverError::NoUsableResults);
        }

        let correlations = self.correlate(results);
        let bottlenecks = self.find_bottlenecks(results, &correlations);
        let system_health = self.system_health(results, &bottlenecks);

        info!(
            services = usable,
            correlations = correlations.len(),
            bottlenecks = bottlenecks.len(),
            overall_score = system_health.overall_score,
            "Correlation analysis complete"
        );

        Ok(CorrelationAnalysis {
            correlations,
            bottlenecks,
            system_health,
        })
    }

    fn correlate(&self, results: &BTreeMap<String, AnalysisResult>) -> Vec<Correlation> {
        let candidates: Vec<(&String, &AnalysisResult, &'static str)> = results
            .iter()
            .filter(|(_, r)| !r.is_empty() && !r.time_series_data.is_empty())
            .map(|(name, r)| (name, r, r.service.schema().primary_metric))
            .collect();

        let mut correlations = Vec::new();
        for (i, (name_a, result_a, metric_a)) in candidates.iter().enumerate() {
            for (name_b, result_b, metric_b) in candidates.iter().skip(i + 1) {
                let (xs, ys) = align(
                    &result_a.time_series_data.series(metric_a),
                    &result_b.time_series_data.series(metric_b),
                );
                if xs.len() < self.settings.min_overlap {
                    debug!(
                        pair = %format!("{}/{}", name_a, name_b),
                        overlap = xs.len(),
                        "Skipping pair: insufficient overlap"
                    );
                    continue;
                }
                let Some(r) = stats::pearson(&xs, &ys) else {
                    debug!(pair = %format!("{}/{}", name_a, name_b), "Skipping pair: flat series");
                    continue;
                };
                if r.abs() <= self.settings.min_coefficient {
                    continue;
                }

                correlations.push(Correlation {
                    services: [name_a.to_string(), name_b.to_string()],
                    metrics: [metric_a.to_string(), metric_b.to_string()],
                    correlation: r,
                    sample_count: xs.len(),
                    description: describe(result_a, metric_a, result_b, metric_b, r, xs.len()),
                });
            }
        }

        correlations.sort_by(|a, b| {
            b.correlation
                .abs()
                .total_cmp(&a.correlation.abs())
                .then_with(|| a.services.cmp(&b.services))
        });
        correlations
    }

    fn find_bottlenecks(
        &self,
        results: &BTreeMap<String, AnalysisResult>,
        correlations: &[Correlation],
    ) -> Vec<Bottleneck> {
        let mut bottlenecks = Vec::new();

        for (name, result) in results.iter().filter(|(_, r)| !r.is_empty()) {
            let saturated = result.has_severe_anomaly()
                && result.health_score < self.settings.bottleneck_health_threshold;

            // strong links whose other end is a degraded service with data
            let links: Vec<(&str, &Correlation, f64)> = correlations
                .iter()
                .filter_map(|c| {
                    let partner = c.partner_of(name)?;
                    let other = results.get(partner).filter(|r| !r.is_empty())?;
                    (other.health_score < self.settings.degraded_health_threshold)
                        .then_some((partner, c, other.health_score))
                })
                .collect();
            let propagating = links.len() >= self.settings.min_propagation_links;

            let kind = match (saturated, propagating) {
                (true, true) => BottleneckKind::RootCause,
                (true, false) => BottleneckKind::ResourceSaturation,
                (false, true) => BottleneckKind::PropagatingDegradation,
                (false, false) => continue,
            };

            let severe: Vec<&Anomaly> = result.anomalies.iter().filter(|a| a.severity.is_severe()).collect();
            let display = result.service.display_name();

            let mut reasons = Vec::new();
            if saturated {
                let worst = severe
                    .iter()
                    .max_by_key(|a| a.severity)
                    .map(|a| a.description.clone())
                    .unwrap_or_default();
                reasons.push(format!(
                    "{} health score {:.1} is below {:.0} with {} high/critical anomal{} (worst: {})",
                    display,
                    result.health_score,
                    self.settings.bottleneck_health_threshold,
                    severe.len(),
                    if severe.len() == 1 { "y" } else { "ies" },
                    worst
                ));
            }
            if propagating {
                reasons.push(format!(
                    "{} is the common factor in {} strong correlations with degraded services",
                    display,
                    links.len()
                ));
            }

            let impact = if links.is_empty() {
                format!(
                    "Impact appears contained to {}; no strongly correlated service is degraded",
                    display
                )
            } else {
                let implicated: Vec<String> = links
                    .iter()
                    .map(|(partner, c, health)| format!("{} (r = {:.2}, health {:.1})", partner, c.correlation, health))
                    .collect();
                format!("Likely propagating into: {}", implicated.join(", "))
            };

            bottlenecks.push(Bottleneck {
                service: name.clone(),
                kind,
                severity: result.worst_severity().unwrap_or(Severity::Low),
                health_score: result.health_score,
                description: reasons.join("; "),
                impact,
                implicated_services: links.iter().map(|(partner, _, _)| partner.to_string()).collect(),
                recommendations: recommendations::recommend(result.service, &severe, propagating),
            });
        }

        bottlenecks.sort_by(|a, b| b.severity.cmp(&a.severity).then_with(|| a.service.cmp(&b.service)));
        bottlenecks
    }

    fn system_health(&self, results: &BTreeMap<String, AnalysisResult>, bottlenecks: &[Bottleneck]) -> SystemHealth {
        let mut factors = Vec::new();
        let mut excluded_services = Vec::new();
        let mut weighted_deficit = 0.0;
        let mut included = 0usize;

        for (name, result) in results {
            if result.is_empty() {
                excluded_services.push(name.clone());
                factors.push(HealthFactor {
                    service: name.clone(),
                    health_score: None,
                    weight: 0.0,
                    note: "no data, excluded from the overall score".to_string(),
                });
                continue;
            }

            let is_bottleneck = bottlenecks.iter().any(|b| &b.service == name);
            let weight = if is_bottleneck { self.settings.bottleneck_weight } else { 1.0 };
            weighted_deficit += weight * (100.0 - result.health_score).max(0.0);
            included += 1;

            let note = if is_bottleneck {
                format!("bottleneck, deficit counted x{}", self.settings.bottleneck_weight)
            } else {
                format!("{} with {} anomalies", result.status, result.anomalies.len())
            };
            factors.push(HealthFactor {
                service: name.clone(),
                health_score: Some(result.health_score),
                weight,
                note,
            });
        }

        let overall_score = if included > 0 {
            (100.0 - weighted_deficit / included as f64).clamp(0.0, 100.0)
        } else {
            0.0
        };

        SystemHealth {
            overall_score,
            status: HealthStatus::from_score(overall_score),
            services_included: results.len() - excluded_services.len(),
            excluded_services,
            factors,
        }
    }
}

/// Inner join of two time-ordered series on exact timestamp.
fn align(a: &[(Timestamp, f64)], b: &[(Timestamp, f64)]) -> (Vec<f64>, Vec<f64>) {
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].0.cmp(&b[j].0) {
            Ordering::Less => i += 1,
            Ordering::Greater => j += 1,
            Ordering::Equal => {
                xs.push(a[i].1);
                ys.push(b[j].1);
                i += 1;
                j += 1;
            }
        }
    }
    (xs, ys)
}

fn describe(a: &AnalysisResult, metric_a: &str, b: &AnalysisResult, metric_b: &str, r: f64, n: usize) -> String {
    let strength = match r.abs() {
        x if x >= 0.9 => "Very strong",
        x if x >= 0.75 => "Strong",
        _ => "Moderate",
    };
    let (sign, reading) = if r > 0.0 {
        ("positive", "they rise and fall together, suggesting shared load or a dependency")
    } else {
        ("negative", "one rises as the other falls, suggesting one starves or throttles the other")
    };
    format!(
        "{} {} correlation (r = {:.3}) between {} {} and {} {} over {} samples: {}",
        strength,
        sign,
        r,
        a.service.display_name(),
        metric_a,
        b.service.display_name(),
        metric_b,
        n,
        reading
    )
}
