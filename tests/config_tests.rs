use anyhow::Result;
use std::fs;
use tempfile::TempDir;

use service_observer::agents::ServiceKind;
use service_observer::config::{generate_default_config, Settings};
use service_observer::monitoring::thresholds::Direction;
use service_observer::{BatchRunner, ObserverError};

#[test]
fn test_missing_config_dir_falls_back_to_defaults() -> Result<()> {
    let dir = TempDir::new()?;
    let settings = Settings::load(&dir.path().join("nothing-here"), None)?;
    assert_eq!(settings.analysis, Settings::default().analysis);
    assert_eq!(settings.detection, Settings::default().detection);
    Ok(())
}

#[test]
fn test_layers_apply_in_order() -> Result<()> {
    let dir = TempDir::new()?;
    fs::write(
        dir.path().join("default.toml"),
        r#"
        [analysis]
        data_dir = "/srv/exports"
        parallel = false

        [thresholds.compute_cluster]
        cpu_usage_percent = 70
        memory_usage_percent = 90
        "#,
    )?;
    fs::write(
        dir.path().join("local.toml"),
        r#"
        [thresholds.compute_cluster]
        cpu_usage_percent = 65
        "#,
    )?;
    let explicit = dir.path().join("override.toml");
    fs::write(
        &explicit,
        r#"
        [analysis]
        parallel = true

        [thresholds.redis]
        cache_hit_rate_percent = { bound = 75.0, direction = "falls_below" }
        "#,
    )?;

    let settings = Settings::load(dir.path(), Some(&explicit))?;
    assert_eq!(settings.analysis.data_dir.to_str(), Some("/srv/exports"));
    assert!(settings.analysis.parallel);

    let compute = settings.threshold_overrides(ServiceKind::ComputeCluster);
    assert_eq!(compute["cpu_usage_percent"].bound(), 65.0);
    assert_eq!(compute["memory_usage_percent"].bound(), 90.0);

    // alias section names resolve to the service
    let cache = settings.threshold_overrides(ServiceKind::Cache);
    assert_eq!(cache["cache_hit_rate_percent"].direction(), Some(Direction::FallsBelow));

    let agents = BatchRunner::new(settings).build_agents()?;
    let compute_agent = agents.iter().find(|a| a.kind() == ServiceKind::ComputeCluster).unwrap();
    assert_eq!(compute_agent.thresholds.get("cpu_usage_percent").map(|l| l.bound), Some(65.0));
    // untouched entries keep their defaults
    assert_eq!(compute_agent.thresholds.get("pod_restarts").map(|l| l.bound), Some(5.0));
    Ok(())
}

#[test]
fn test_explicit_file_must_exist() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("missing.toml");
    assert!(Settings::load(dir.path(), Some(&missing)).is_err());
}

#[test]
fn test_invalid_override_fails_before_analysis() -> Result<()> {
    let dir = TempDir::new()?;
    fs::write(
        dir.path().join("default.toml"),
        r#"
        [thresholds.api_gateway]
        response_time_ms = { bound = 500.0, direction = "upwards" }
        "#,
    )?;
    let err = Settings::load(dir.path(), None).unwrap_err();
    assert!(matches!(err, ObserverError::Configuration(_)));
    Ok(())
}

#[test]
fn test_environment_overrides_files() -> Result<()> {
    let dir = TempDir::new()?;
    fs::write(
        dir.path().join("default.toml"),
        r#"
        [correlation]
        min_propagation_links = 2
        "#,
    )?;

    std::env::set_var("OBSERVER_CORRELATION__MIN_PROPAGATION_LINKS", "3");
    let loaded = Settings::load(dir.path(), None);
    std::env::remove_var("OBSERVER_CORRELATION__MIN_PROPAGATION_LINKS");

    assert_eq!(loaded?.correlation.min_propagation_links, 3);
    Ok(())
}

#[test]
fn test_generated_config_loads_back() -> Result<()> {
    let dir = TempDir::new()?;
    let generated = generate_default_config();
    fs::write(dir.path().join("default.toml"), toml::to_string_pretty(&generated)?)?;

    let settings = Settings::load(dir.path(), None)?;
    assert_eq!(settings.thresholds, generated.thresholds);
    assert!(settings.thresholds.contains_key("relational_database"));
    Ok(())
}

#[test]
fn test_config_path_env_picks_the_directory() -> Result<()> {
    let dir = TempDir::new()?;
    fs::write(
        dir.path().join("default.toml"),
        r#"
        [correlation]
        min_overlap = 25
        "#,
    )?;
    let explicit = dir.path().join("override.toml");
    fs::write(
        &explicit,
        r#"
        [analysis]
        export_time_series = true
        "#,
    )?;

    std::env::set_var("CONFIG_PATH", dir.path());
    let loaded = Settings::new(Some(&explicit));
    std::env::remove_var("CONFIG_PATH");

    let settings = loaded?;
    assert_eq!(settings.correlation.min_overlap, 25);
    assert!(settings.analysis.export_time_series);
    Ok(())
}
