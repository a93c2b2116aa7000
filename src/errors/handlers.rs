use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use super::{ObserverError, ObserverResult};

/// A per-service failure that was absorbed instead of aborting the batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceFailure {
    pub service: String,
    pub reason: String,
}

/// Sorts per-service outcomes into "keep going" and "stop everything".
#[derive(Debug, Default)]
pub struct ErrorHandler {
    failures: Vec<ServiceFailure>,
}

impl ErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Ok(None)` means the service failed but the batch continues without it.
    pub fn handle<T>(&mut self, service: &str, outcome: ObserverResult<T>) -> ObserverResult<Option<T>> {
        match outcome {
            Ok(value) => Ok(Some(value)),
            Err(e) if !e.is_fatal() => {
                warn!(
                    service = service,
                    error = %e,
                    "Service excluded from this run"
                );
                self.record(service, e.to_string());
                Ok(None)
            }
            Err(e) => {
                error!(service = service, error = %e, "Fatal error, aborting batch");
                Err(e)
            }
        }
    }

    /// Task-level failures (a panicked worker) are always absorbed.
    pub fn record(&mut self, service: &str, reason: impl Into<String>) {
        self.failures.push(ServiceFailure {
            service: service.to_string(),
            reason: reason.into(),
        });
    }

    pub fn failures(&self) -> &[ServiceFailure] {
        &self.failures
    }

    pub fn into_failures(self) -> Vec<ServiceFailure> {
        self.failures
    }
}
