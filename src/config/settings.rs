/*
* Settings
* --------
* Layered configuration, lowest to highest priority:
*   1. compiled defaults (`Settings::default()`)
*   2. <CONFIG_PATH>/default.toml   (optional)
*   3. <CONFIG_PATH>/local.toml     (optional)
*   4. an explicit --config file    (required if given)
*   5. OBSERVER_* environment variables, `__` between nesting levels,
*      e.g. OBSERVER_CORRELATION__MIN_OVERLAP=20
*
* Everything is validated here, before any agent runs: bad tuning constants
* and malformed threshold overrides surface as `ObserverError::Configuration`.
*/

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::agents::schema::ServiceKind;
use crate::correlation::CorrelationSettings;
use crate::errors::{ObserverError, ObserverResult};
use crate::monitoring::anomaly_detection::DetectionSettings;
use crate::monitoring::thresholds::LimitOverride;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub analysis: AnalysisSettings,
    pub detection: DetectionSettings,
    pub correlation: CorrelationSettings,
    /// `[thresholds.<service>] metric = bound | { bound, direction }`
    pub thresholds: BTreeMap<String, BTreeMap<String, LimitOverride>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Run the agents on separate blocking tasks.
    pub parallel: bool,
    /// Keep raw rows in the JSON export (they can be large).
    pub export_time_series: bool,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/samples"),
            output_dir: PathBuf::from("./output"),
            parallel: true,
            export_time_series: false,
        }
    }
}

impl Settings {
    /// Load from `CONFIG_PATH` (default `config`), an optional explicit
    /// file and the environment.
    pub fn new(explicit: Option<&Path>) -> ObserverResult<Self> {
        let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config".to_string());
        Self::load(Path::new(&config_path), explicit)
    }

    pub fn load(config_dir: &Path, explicit: Option<&Path>) -> ObserverResult<Self> {
        info!("Loading configuration from path: {}", config_dir.display());

        let mut builder = Config::builder()
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(File::from(config_dir.join("default")).required(false))
            .add_source(File::from(config_dir.join("local")).required(false));

        if let Some(path) = explicit {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix("OBSERVER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Self::finish(config)
    }

    /// Parse a TOML document layered over the defaults.
    pub fn from_toml_str(toml: &str) -> ObserverResult<Self> {
        let config = Config::builder()
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        Self::finish(config)
    }

    fn finish(config: Config) -> ObserverResult<Self> {
        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| ObserverError::config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> ObserverResult<()> {
        self.detection.validate()?;
        self.correlation.validate()?;
        let mut sections: BTreeMap<ServiceKind, &str> = BTreeMap::new();
        for (service, overrides) in &self.thresholds {
            let kind = service.parse::<ServiceKind>()?;
            if let Some(earlier) = sections.insert(kind, service) {
                return Err(ObserverError::config(format!(
                    "[thresholds.{}] and [thresholds.{}] both name {}; use one spelling",
                    earlier, service, kind
                )));
            }
            for (metric, value) in overrides {
                value.validate(metric)?;
            }
        }
        Ok(())
    }

    /// Overrides configured for one service, whichever alias the file used.
    /// `validate()` guarantees at most one section per service.
    pub fn threshold_overrides(&self, kind: ServiceKind) -> BTreeMap<String, LimitOverride> {
        self.section_for(kind)
            .and_then(|section| self.thresholds.get(&section))
            .cloned()
            .unwrap_or_default()
    }

    /// Add one override on top of whatever the files said. Lands in the
    /// section the files already use for the service, so it wins over them.
    pub fn push_override(&mut self, kind: ServiceKind, metric: &str, value: LimitOverride) -> ObserverResult<()> {
        value.validate(metric)?;
        let section = self.section_for(kind).unwrap_or_else(|| kind.key().to_string());
        self.thresholds
            .entry(section)
            .or_default()
            .insert(metric.to_string(), value);
        Ok(())
    }

    fn section_for(&self, kind: ServiceKind) -> Option<String> {
        self.thresholds
            .keys()
            .find(|service| service.parse::<ServiceKind>().ok() == Some(kind))
            .cloned()
    }
}

pub fn generate_default_config() -> Settings {
    let mut settings = Settings::default();
    // seed the file with the limits people most often tune
    for kind in [ServiceKind::ComputeCluster, ServiceKind::RelationalDatabase] {
        let schema = kind.schema();
        let seeded = schema
            .metrics
            .iter()
            .filter(|m| m.required)
            .filter_map(|m| {
                m.default_limit.map(|limit| {
                    (
                        m.name.to_string(),
                        LimitOverride::Full { bound: limit.bound, direction: Some(limit.direction) },
                    )
                })
            })
            .collect();
        settings.thresholds.insert(kind.key().to_string(), seeded);
    }
    settings
}
