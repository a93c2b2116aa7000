/*
* Batch Runner
* ------------
* One diagnostic pass over every configured service:
*
*   Settings -> build_agents() -> [load + analyze per agent] -> CorrelationEngine
*
* Agents share nothing, so each one runs on its own blocking task (file reads
* are the only blocking work). The correlation step is a barrier: it starts
* only after every agent has finished or been replaced by an empty result.
*/

use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::agents::{Agent, AnalysisResult, ServiceKind};
use crate::config::Settings;
use crate::correlation::{CorrelationAnalysis, CorrelationEngine};
use crate::errors::handlers::{ErrorHandler, ServiceFailure};
use crate::errors::ObserverResult;

/// Everything one pass produced.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub results: BTreeMap<String, AnalysisResult>,
    pub correlation_analysis: CorrelationAnalysis,
    pub failures: Vec<ServiceFailure>,
}

#[derive(Debug, Clone)]
pub struct BatchRunner {
    settings: Settings,
    services: Vec<ServiceKind>,
}

impl BatchRunner {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            services: ServiceKind::ALL.to_vec(),
        }
    }

    /// Restrict the pass to a subset of services.
    pub fn with_services(mut self, services: impl IntoIterator<Item = ServiceKind>) -> Self {
        self.services = services.into_iter().collect();
        self.services.sort();
        self.services.dedup();
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn data_dir(&self) -> &PathBuf {
        &self.settings.analysis.data_dir
    }

    /// Agents with defaults, detection tuning and configured overrides applied.
    pub fn build_agents(&self) -> ObserverResult<Vec<Agent>> {
        let mut agents = Vec::with_capacity(self.services.len());
        for &kind in &self.services {
            let mut agent = Agent::new(kind, self.data_dir().clone()).with_detection(self.settings.detection.clone());
            let overrides = self.settings.threshold_overrides(kind);
            let ignored = agent.thresholds.apply_overrides(&overrides)?;
            if !ignored.is_empty() {
                warn!(service = %kind, ignored = ?ignored, "Ignoring overrides for unknown metrics");
            }
            agents.push(agent);
        }
        Ok(agents)
    }

    /// Load and analyze every agent. Per-service failures become empty results.
    pub async fn run_agents(&self) -> ObserverResult<(BTreeMap<String, AnalysisResult>, Vec<ServiceFailure>)> {
        let agents = self.build_agents()?;
        let mut handler = ErrorHandler::new();
        let mut results = BTreeMap::new();

        if self.settings.analysis.parallel {
            let kinds: Vec<ServiceKind> = agents.iter().map(Agent::kind).collect();
            let handles = agents
                .into_iter()
                .map(|agent| tokio::task::spawn_blocking(move || run_agent(agent)));
            let joined = join_all(handles).await;

            for (kind, outcome) in kinds.into_iter().zip(joined) {
                let result = match outcome {
                    Ok(outcome) => handler.handle(kind.key(), outcome)?,
                    Err(join_error) => {
                        warn!(service = %kind, error = %join_error, "Agent task did not complete");
                        handler.record(kind.key(), format!("agent task failed: {}", join_error));
                        None
                    }
                };
                results.insert(kind.key().to_string(), result.unwrap_or_else(|| AnalysisResult::empty(kind)));
            }
        } else {
            for agent in agents {
                let kind = agent.kind();
                let result = handler.handle(kind.key(), run_agent(agent))?;
                results.insert(kind.key().to_string(), result.unwrap_or_else(|| AnalysisResult::empty(kind)));
            }
        }

        info!(
            services = results.len(),
            failed = handler.failures().len(),
            "All agents finished"
        );
        Ok((results, handler.into_failures()))
    }

    pub async fn run(&self) -> ObserverResult<BatchOutcome> {
        let (results, failures) = self.run_agents().await?;
        let engine = CorrelationEngine::new(self.settings.correlation.clone());
        let correlation_analysis = engine.analyze_correlations(&results)?;

        Ok(BatchOutcome {
            results,
            correlation_analysis,
            failures,
        })
    }
}

fn run_agent(mut agent: Agent) -> ObserverResult<AnalysisResult> {
    let dir = agent.data_dir().to_path_buf();
    debug!(service = %agent.kind(), dir = %dir.display(), "Loading service data");
    agent.try_load(&dir)?;
    agent.analyze()
}
