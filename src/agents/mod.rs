/*
* Service Agents
* --------------
* One `Agent` per service category. The five categories share every line of
* control flow and differ only in their `ServiceSchema` (columns, aliases,
* default limits, primary metric), so there is one struct, not five.
*
* Lifecycle:
*   Agent::new(kind, dir) -> tweak `thresholds` -> load() -> analyze()
*
* `load()` never errors out: it reports a bool so the caller can substitute an
* empty result and carry on with the other services. `analyze()` without a
* successful load is a programming error and comes back as `Precondition`.
*/

pub mod insights;
pub mod schema;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::errors::{ObserverError, ObserverResult};
use crate::monitoring::anomaly_detection::{summarize, Anomaly, AnomalyDetector, DetectionSettings, Severity};
use crate::monitoring::loader::load_service_table;
use crate::monitoring::metrics::MetricsTable;
use crate::monitoring::stats::SeriesStats;
use crate::monitoring::thresholds::ThresholdPolicy;
pub use schema::ServiceKind;

/// Coarse label for a 0-100 score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

impl HealthStatus {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            HealthStatus::Healthy
        } else if score >= 60.0 {
            HealthStatus::Warning
        } else {
            HealthStatus::Critical
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Warning => write!(f, "warning"),
            HealthStatus::Critical => write!(f, "critical"),
        }
    }
}

/// Output of one `Agent::analyze()` call. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub service: ServiceKind,
    /// False for the placeholder substituted when a service had no data.
    pub data_available: bool,
    /// Mean of each metric over the full series.
    pub metrics: BTreeMap<String, f64>,
    pub statistics: BTreeMap<String, SeriesStats>,
    pub health_score: f64,
    pub status: HealthStatus,
    pub anomalies: Vec<Anomaly>,
    pub insights: Vec<String>,
    pub time_series_data: MetricsTable,
}

impl AnalysisResult {
    /// Placeholder for a service that could not be loaded or analyzed.
    pub fn empty(service: ServiceKind) -> Self {
        Self {
            service,
            data_available: false,
            metrics: BTreeMap::new(),
            statistics: BTreeMap::new(),
            health_score: 100.0,
            status: HealthStatus::Healthy,
            anomalies: Vec::new(),
            insights: Vec::new(),
            time_series_data: MetricsTable::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.data_available
    }

    pub fn worst_severity(&self) -> Option<Severity> {
        self.anomalies.iter().map(|a| a.severity).max()
    }

    pub fn has_severe_anomaly(&self) -> bool {
        self.anomalies.iter().any(|a| a.severity.is_severe())
    }
}

#[derive(Debug, Clone)]
pub struct Agent {
    kind: ServiceKind,
    data_dir: PathBuf,
    /// Callers may adjust limits between construction and `analyze()`.
    pub thresholds: ThresholdPolicy,
    pub detection: DetectionSettings,
    table: Option<MetricsTable>,
}

impl Agent {
    pub fn new(kind: ServiceKind, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            data_dir: data_dir.into(),
            thresholds: ThresholdPolicy::for_service(kind),
            detection: DetectionSettings::default(),
            table: None,
        }
    }

    pub fn with_detection(mut self, detection: DetectionSettings) -> Self {
        self.detection = detection;
        self
    }

    pub fn kind(&self) -> ServiceKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.key()
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn is_loaded(&self) -> bool {
        self.table.is_some()
    }

    pub fn table(&self) -> Option<&MetricsTable> {
        self.table.as_ref()
    }

    /// Load from the directory the agent was constructed with.
    pub fn load(&mut self) -> bool {
        let dir = self.data_dir.clone();
        self.load_from(dir)
    }

    /// Load every matching file under `source`. Returns false (and logs why)
    /// when nothing usable is found; any previously loaded table is dropped.
    pub fn load_from(&mut self, source: impl AsRef<Path>) -> bool {
        match self.try_load(source.as_ref()) {
            Ok(()) => true,
            Err(e) => {
                warn!(service = %self.kind, error = %e, "Load failed");
                false
            }
        }
    }

    pub fn try_load(&mut self, source: &Path) -> ObserverResult<()> {
        self.table = None;
        let table = load_service_table(source, self.kind)?;
        self.data_dir = source.to_path_buf();
        self.table = Some(table);
        Ok(())
    }

    /// Use an already-built table, e.g. one assembled in memory.
    pub fn load_table(&mut self, table: MetricsTable) -> bool {
        let schema = self.kind.schema();
        let missing: Vec<&str> = schema
            .required_metrics()
            .filter(|m| table.values(m).is_empty())
            .collect();

        if table.is_empty() || !missing.is_empty() {
            warn!(service = %self.kind, missing = ?missing, rows = table.len(), "Rejected in-memory table");
            self.table = None;
            return false;
        }
        self.table = Some(table);
        true
    }

    pub fn analyze(&self) -> ObserverResult<AnalysisResult> {
        let Some(table) = self.table.as_ref() else {
            error!(service = %self.kind, "analyze() called before a successful load()");
            return Err(ObserverError::Precondition {
                service: self.kind.key().to_string(),
            });
        };

        let summary = summarize(table);
        let detector = AnomalyDetector::new(&self.thresholds, &self.detection);
        let anomalies = detector.analyze_metrics(table, &summary);
        let health_score = self.detection.health_score(&anomalies);
        let profiles = detector.breach_profiles(table);
        let insights = insights::generate(self.kind, &anomalies, &profiles, &self.detection, health_score);

        let statistics = table
            .metrics()
            .iter()
            .filter_map(|m| table.stats(m).map(|s| (m.clone(), s)))
            .collect();

        info!(
            service = %self.kind,
            rows = table.len(),
            anomalies = anomalies.len(),
            health_score,
            "Service analysis complete"
        );

        Ok(AnalysisResult {
            service: self.kind,
            data_available: true,
            metrics: summary.into_iter().collect(),
            statistics,
            health_score,
            status: HealthStatus::from_score(health_score),
            anomalies,
            insights,
            time_series_data: table.clone(),
        })
    }
}
