pub mod agents;
pub mod cli;
pub mod config;
pub mod correlation;
pub mod errors;
pub mod monitoring;
pub mod report;
pub mod scheduler;

// Re-exports
pub use agents::{Agent, AnalysisResult, HealthStatus, ServiceKind};
pub use config::Settings;
pub use correlation::{CorrelationAnalysis, CorrelationEngine};
pub use errors::{ObserverError, ObserverResult};
pub use monitoring::thresholds::{Direction, Limit, LimitOverride, ThresholdPolicy};
pub use report::AnalysisReport;
pub use scheduler::{BatchOutcome, BatchRunner};
