/*
* Service Observer Command Line Interface
* ---------------------------------------
* Thin shell over the library: parse flags, layer them over the loaded
* settings, run the batch, print a colored summary and export JSON.
*
* Command Structure:
* ---------------
* service-observer
* ├── analyze [--data-dir] [--output-dir] [--threshold svc.metric=bound[:dir]]... [--no-export]
* ├── stats --service <svc> [--metric <m>] [--from <ts>] [--to <ts>]
* └── init [--force]
*
* Global flags: --config <file>, --verbose
*
* Usage Examples:
* -------------
* ```bash
* service-observer analyze --data-dir ./exports --threshold compute_cluster.cpu_usage_percent=75
* service-observer stats --service cache --metric cache_hit_rate_percent --from 2024-06-01
* ```
*/

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::{ColoredString, Colorize};
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::agents::{Agent, AnalysisResult, HealthStatus, ServiceKind};
use crate::config::Settings;
use crate::correlation::CorrelationAnalysis;
use crate::errors::{ObserverError, ObserverResult};
use crate::monitoring::anomaly_detection::Severity;
use crate::monitoring::loader::parse_timestamp;
use crate::monitoring::thresholds::LimitOverride;
use crate::report::AnalysisReport;
use crate::scheduler::BatchRunner;

#[derive(Parser, Debug)]
#[command(name = "service-observer")]
#[command(about = "Cross-service health and bottleneck analysis for metrics exports", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, value_name = "CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging (RUST_LOG still wins when set)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze every service and correlate the results
    Analyze {
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
        /// Override one limit: service.metric=bound[:direction]
        #[arg(short, long = "threshold", value_name = "RULE")]
        thresholds: Vec<String>,
        /// Print the summary only, write no JSON
        #[arg(long)]
        no_export: bool,
    },
    /// Descriptive statistics for one service
    Stats {
        #[arg(short, long)]
        service: String,
        #[arg(short, long)]
        metric: Option<String>,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
    },
    /// Generate default configuration
    Init {
        #[arg(short, long)]
        force: bool,
    },
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Init { force } => handle_init_command(force),
        Commands::Analyze {
            data_dir,
            output_dir,
            thresholds,
            no_export,
        } => {
            let mut settings = load_settings(cli.config.as_deref())?;
            if let Some(dir) = data_dir {
                settings.analysis.data_dir = dir;
            }
            if let Some(dir) = output_dir {
                settings.analysis.output_dir = dir;
            }
            for rule in &thresholds {
                let (kind, metric, value) = parse_threshold_arg(rule)?;
                settings.push_override(kind, &metric, value)?;
            }
            handle_analyze_command(settings, no_export).await
        }
        Commands::Stats {
            service,
            metric,
            from,
            to,
            data_dir,
        } => {
            let settings = load_settings(cli.config.as_deref())?;
            let dir = data_dir.unwrap_or(settings.analysis.data_dir);
            handle_stats_command(&service, metric.as_deref(), from.as_deref(), to.as_deref(), &dir)
        }
    }
}

fn load_settings(explicit: Option<&Path>) -> anyhow::Result<Settings> {
    Settings::new(explicit).context("failed to load configuration")
}

/// `compute_cluster.cpu_usage_percent=75` or `cache.cache_hit_rate_percent=70:falls_below`
pub fn parse_threshold_arg(rule: &str) -> ObserverResult<(ServiceKind, String, LimitOverride)> {
    let malformed = || ObserverError::config(format!("threshold '{}' is not service.metric=bound[:direction]", rule));

    let (target, value) = rule.split_once('=').ok_or_else(malformed)?;
    let (service, metric) = target.split_once('.').ok_or_else(malformed)?;
    let metric = metric.trim();
    if metric.is_empty() {
        return Err(malformed());
    }

    Ok((service.parse()?, metric.to_string(), value.parse()?))
}

async fn handle_analyze_command(settings: Settings, no_export: bool) -> anyhow::Result<()> {
    let data_dir = settings.analysis.data_dir.clone();
    let output_dir = settings.analysis.output_dir.clone();
    let keep_series = settings.analysis.export_time_series;
    info!(data_dir = %data_dir.display(), "Starting analysis");

    let outcome = match BatchRunner::new(settings).run().await {
        Ok(outcome) => outcome,
        Err(e) => {
            e.log();
            return Err(e.into());
        }
    };

    print_results(&outcome.results);
    print_correlation(&outcome.correlation_analysis);
    for failure in &outcome.failures {
        println!("{} {}: {}", "!".yellow(), failure.service, failure.reason);
    }

    if no_export {
        return Ok(());
    }
    let report = AnalysisReport::new(outcome, data_dir);
    let report = if keep_series { report } else { report.without_time_series() };
    let path = report.write_json(&output_dir)?;
    println!("{} Report written to {}", "✓".green(), path.display());
    Ok(())
}

fn handle_stats_command(
    service: &str,
    metric: Option<&str>,
    from: Option<&str>,
    to: Option<&str>,
    data_dir: &Path,
) -> anyhow::Result<()> {
    let kind: ServiceKind = service.parse()?;
    let from = from.map(parse_bound).transpose()?;
    let to = to.map(parse_bound).transpose()?;

    let mut agent = Agent::new(kind, data_dir);
    agent.try_load(data_dir)?;
    let table = agent
        .table()
        .ok_or_else(|| ObserverError::data_unavailable(kind.key(), "no table after load"))?;

    let metrics: Vec<String> = match metric {
        Some(m) if table.has_metric(m) => vec![m.to_string()],
        Some(m) => anyhow::bail!("{} has no metric '{}'", kind.display_name(), m),
        None => table.metrics().to_vec(),
    };

    println!("{}", format!("{} statistics", kind.display_name()).bold());
    for name in metrics {
        match table.stats_in_range(&name, from, to) {
            Some(s) => println!(
                "- {:<28} n={:<5} mean={:<10.2} median={:<10.2} p95={:<10.2} min={:<10.2} max={:<10.2} latest={:.2}",
                name, s.count, s.mean, s.median, s.p95, s.min, s.max, s.latest
            ),
            None => println!("- {:<28} {}", name, "no samples in range".dimmed()),
        }
    }
    Ok(())
}

fn parse_bound(raw: &str) -> ObserverResult<crate::monitoring::metrics::Timestamp> {
    parse_timestamp(raw).ok_or_else(|| ObserverError::config(format!("cannot parse time '{}'", raw)))
}

fn handle_init_command(force: bool) -> anyhow::Result<()> {
    let config_dir = PathBuf::from("config");
    let target = config_dir.join("default.toml");
    if target.exists() && !force {
        error!("Configuration file already exists. Use --force to overwrite.");
        return Ok(());
    }

    std::fs::create_dir_all(&config_dir)?;
    let default_config = crate::config::generate_default_config();
    let config_str = toml::to_string_pretty(&default_config)?;
    std::fs::write(&target, config_str)?;

    println!("{} Default configuration generated at {}", "✓".green(), target.display());
    Ok(())
}

fn status_label(status: HealthStatus) -> ColoredString {
    match status {
        HealthStatus::Healthy => "healthy".green(),
        HealthStatus::Warning => "warning".yellow(),
        HealthStatus::Critical => "critical".red(),
    }
}

fn severity_label(severity: Severity) -> ColoredString {
    match severity {
        Severity::Low => "low".normal(),
        Severity::Medium => "medium".yellow(),
        Severity::High => "high".red(),
        Severity::Critical => "critical".red().bold(),
    }
}

fn print_results(results: &std::collections::BTreeMap<String, AnalysisResult>) {
    println!("{}", "Services:".bold());
    for (name, result) in results {
        if result.is_empty() {
            println!("- {:<20} {}", name, "no data".dimmed());
            continue;
        }
        println!(
            "- {:<20} {:>5.1} ({}) {} anomalies",
            name,
            result.health_score,
            status_label(result.status),
            result.anomalies.len()
        );
        for insight in &result.insights {
            println!("    {}", insight);
        }
    }
}

fn print_correlation(analysis: &CorrelationAnalysis) {
    if !analysis.correlations.is_empty() {
        println!("{}", "Correlations:".bold());
        for c in &analysis.correlations {
            println!("- {} <-> {}: {:+.3}", c.services[0], c.services[1], c.correlation);
        }
    }

    if !analysis.bottlenecks.is_empty() {
        println!("{}", "Bottlenecks:".bold());
        for b in &analysis.bottlenecks {
            println!("- {} [{}] {}", b.service, severity_label(b.severity), b.description);
            println!("    {}", b.impact.dimmed());
            for rec in &b.recommendations {
                println!("    → {}", rec);
            }
        }
    }

    let health = &analysis.system_health;
    println!(
        "{} {:.1} ({}) across {} services",
        "System health:".bold(),
        health.overall_score,
        status_label(health.status),
        health.services_included
    );
    if !health.excluded_services.is_empty() {
        println!("  excluded (no data): {}", health.excluded_services.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::thresholds::Direction;

    #[test]
    fn threshold_arg_with_direction() {
        let (kind, metric, value) = parse_threshold_arg("cache.cache_hit_rate_percent=70:falls_below").unwrap();
        assert_eq!(kind, ServiceKind::Cache);
        assert_eq!(metric, "cache_hit_rate_percent");
        assert_eq!(value.bound(), 70.0);
        assert_eq!(value.direction(), Some(Direction::FallsBelow));
    }

    #[test]
    fn threshold_arg_rejects_garbage() {
        assert!(parse_threshold_arg("cpu=80").is_err());
        assert!(parse_threshold_arg("compute_cluster.cpu_usage_percent=high").is_err());
        assert!(parse_threshold_arg("mainframe.cpu=80").is_err());
    }

    #[test]
    fn cli_parses_repeated_thresholds() {
        let cli = Cli::try_parse_from([
            "service-observer",
            "analyze",
            "--threshold",
            "compute_cluster.cpu_usage_percent=75",
            "--threshold",
            "api_gateway.error_rate_percent=2",
            "--no-export",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Analyze { thresholds, no_export, .. } => {
                assert_eq!(thresholds.len(), 2);
                assert!(no_export);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
