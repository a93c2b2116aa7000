mod settings;

pub use settings::{generate_default_config, AnalysisSettings, Settings};
