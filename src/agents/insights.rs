use crate::agents::schema::ServiceKind;
use crate::agents::HealthStatus;
use crate::monitoring::anomaly_detection::{Anomaly, AnomalyKind, BreachProfile, DetectionSettings, Severity};
use std::collections::BTreeMap;

/// Turn anomalies and breach patterns into short, ordered findings.
///
/// Order: sustained breaches, then severe anomalies, then the rest, then a
/// roll-up of isolated outliers. A clean run gets a single all-clear line.
pub fn generate(
    kind: ServiceKind,
    anomalies: &[Anomaly],
    profiles: &[BreachProfile],
    settings: &DetectionSettings,
    health_score: f64,
) -> Vec<String> {
    let mut insights = Vec::new();

    for profile in profiles.iter().filter(|p| p.is_sustained(settings)) {
        let window = profile
            .longest_run_span
            .map(|span| format!(", longest stretch {} to {}", span.start.format("%Y-%m-%d %H:%M"), span.end.format("%Y-%m-%d %H:%M")))
            .unwrap_or_default();
        insights.push(format!(
            "🔴 Sustained pressure on {}: {} of {} samples ({:.0}%) were beyond the limit ({}){}",
            profile.metric,
            profile.breaching,
            profile.total,
            profile.fraction() * 100.0,
            profile.limit,
            window
        ));
    }

    let mut breaches: Vec<&Anomaly> = anomalies
        .iter()
        .filter(|a| a.kind == AnomalyKind::ThresholdBreach)
        .collect();
    // stable: equal severities keep detection order
    breaches.sort_by(|a, b| b.severity.cmp(&a.severity));
    for anomaly in breaches {
        let marker = if anomaly.severity.is_severe() { "🔴" } else { "⚠️" };
        insights.push(format!("{} [{}] {}", marker, anomaly.severity, anomaly.description));
    }

    let mut outliers: BTreeMap<&str, Vec<&Anomaly>> = BTreeMap::new();
    for anomaly in anomalies.iter().filter(|a| a.kind == AnomalyKind::StatisticalOutlier) {
        outliers.entry(anomaly.metric.as_str()).or_default().push(anomaly);
    }
    for (metric, group) in outliers {
        let worst = group.iter().map(|a| a.severity).max().unwrap_or(Severity::Low);
        let marker = if worst.is_severe() { "⚠️" } else { "ℹ️" };
        if group.len() == 1 {
            insights.push(format!("{} Isolated spike: {}", marker, group[0].description));
        } else {
            insights.push(format!(
                "{} {} separate statistical outlier episodes on {} (worst: {})",
                marker,
                group.len(),
                metric,
                worst
            ));
        }
    }

    if anomalies.is_empty() {
        insights.push(format!(
            "✅ {} is operating within all configured thresholds",
            kind.display_name()
        ));
    } else if HealthStatus::from_score(health_score) == HealthStatus::Critical {
        insights.push(format!(
            "🔴 {} health score is {:.1}; this service needs attention before others",
            kind.display_name(),
            health_score
        ));
    }

    insights
}
