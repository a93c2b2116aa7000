use thiserror::Error;
use tracing::error;

pub mod handlers;

#[derive(Error, Debug)]
pub enum ObserverError {
    /// No source file (or no usable column set) for a service.
    #[error("No usable metrics for {service}: {reason}")]
    DataUnavailable {
        service: String,
        reason: String,
    },

    /// `analyze()` called before a successful `load()`.
    #[error("Agent for {service} was asked to analyze before a successful load")]
    Precondition {
        service: String,
    },

    #[error("Configuration Error: {0}")]
    Configuration(String),

    #[error("No usable analysis results across any service, nothing to correlate")]
    NoUsableResults,

    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV Error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Settings Error: {0}")]
    Settings(#[from] config::ConfigError),
}

impl ObserverError {
    pub fn data_unavailable(service: impl Into<String>, reason: impl Into<String>) -> Self {
        ObserverError::DataUnavailable {
            service: service.into(),
            reason: reason.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        ObserverError::Configuration(message.into())
    }

    /// Per-service failures degrade coverage; everything else aborts the batch.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ObserverError::DataUnavailable { .. } | ObserverError::Precondition { .. }
        )
    }

    pub fn log(&self) {
        error!(error = %self, fatal = self.is_fatal(), "Observer operation failed");
    }
}

// Result type alias for convenience
pub type ObserverResult<T> = Result<T, ObserverError>;
