//! JSON export of one diagnostic pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

use crate::agents::{AnalysisResult, HealthStatus};
use crate::correlation::CorrelationAnalysis;
use crate::errors::handlers::ServiceFailure;
use crate::errors::ObserverResult;
use crate::monitoring::metrics::MetricsTable;
use crate::scheduler::BatchOutcome;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub services_analyzed: usize,
    pub services_without_data: usize,
    pub total_anomalies: usize,
    pub bottleneck_count: usize,
    pub overall_health_score: f64,
    pub overall_status: HealthStatus,
}

impl Summary {
    pub fn from_parts(results: &BTreeMap<String, AnalysisResult>, analysis: &CorrelationAnalysis) -> Self {
        let with_data = results.values().filter(|r| !r.is_empty()).count();
        Self {
            services_analyzed: with_data,
            services_without_data: results.len() - with_data,
            total_anomalies: results.values().map(|r| r.anomalies.len()).sum(),
            bottleneck_count: analysis.bottlenecks.len(),
            overall_health_score: analysis.system_health.overall_score,
            overall_status: analysis.system_health.status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub data_dir: PathBuf,
    pub results: BTreeMap<String, AnalysisResult>,
    pub correlation_analysis: CorrelationAnalysis,
    pub summary: Summary,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ServiceFailure>,
}

impl AnalysisReport {
    pub fn new(outcome: BatchOutcome, data_dir: impl Into<PathBuf>) -> Self {
        let summary = Summary::from_parts(&outcome.results, &outcome.correlation_analysis);
        Self {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            data_dir: data_dir.into(),
            results: outcome.results,
            correlation_analysis: outcome.correlation_analysis,
            summary,
            failures: outcome.failures,
        }
    }

    /// Drop the raw rows from every result; they dominate the file size.
    pub fn without_time_series(mut self) -> Self {
        for result in self.results.values_mut() {
            result.time_series_data = MetricsTable::default();
        }
        self
    }

    pub fn file_name(&self) -> String {
        format!("analysis_{}.json", self.generated_at.format("%Y%m%d_%H%M%S"))
    }

    /// Write pretty JSON into `output_dir`, creating it if needed.
    pub fn write_json(&self, output_dir: &Path) -> ObserverResult<PathBuf> {
        fs::create_dir_all(output_dir)?;
        let path = output_dir.join(self.file_name());

        let mut writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;

        info!(path = %path.display(), run_id = %self.run_id, "Analysis report written");
        Ok(path)
    }
}
