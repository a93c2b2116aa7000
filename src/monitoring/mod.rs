pub mod anomaly_detection;
pub mod loader;
pub mod metrics;
pub mod stats;
pub mod thresholds;

pub use anomaly_detection::{Anomaly, AnomalyDetector, AnomalyKind, DetectionSettings, Severity};
pub use metrics::{MetricsTable, TableBuilder, Timestamp};
pub use thresholds::{Direction, Limit, LimitOverride, ThresholdPolicy};
