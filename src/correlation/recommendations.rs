use crate::agents::schema::ServiceKind;
use crate::monitoring::anomaly_detection::{Anomaly, AnomalyKind};

/// Remediation templates for a saturated metric.
fn for_metric(kind: ServiceKind, metric: &str) -> &'static [&'static str] {
    match (kind, metric) {
        (ServiceKind::ComputeCluster, "cpu_usage_percent") => &[
            "Scale out the node pool or enable the cluster autoscaler to relieve CPU saturation",
            "Review pod CPU requests and limits; move CPU-heavy workloads to a dedicated node pool",
        ],
        (ServiceKind::ComputeCluster, "memory_usage_percent") => &[
            "Add nodes or move to a memory-optimized VM size",
            "Check for memory leaks in long-running pods and tighten memory limits",
        ],
        (ServiceKind::ComputeCluster, "pod_restarts") => &[
            "Inspect crash-looping pods (liveness checks, OOM kills) before scaling",
        ],
        (ServiceKind::ComputeCluster, "pending_pods") => &[
            "Pending pods indicate insufficient capacity: raise the autoscaler maximum or free reserved resources",
        ],
        (ServiceKind::RelationalDatabase, "dtu_percent") => &[
            "Tune the application connection pool (size, idle timeout) to cut connection churn",
            "Scale up the database tier or move read traffic to a replica",
        ],
        (ServiceKind::RelationalDatabase, "avg_query_time_ms") => &[
            "Review the slowest query plans and add missing indexes",
            "Cache hot read queries in front of the database",
        ],
        (ServiceKind::RelationalDatabase, "active_connections") => &[
            "Cap the connection pool size per application instance and enable pooling middleware",
        ],
        (ServiceKind::RelationalDatabase, "deadlocks") => &[
            "Shorten transactions and access tables in a consistent order to avoid deadlocks",
        ],
        (ServiceKind::RelationalDatabase, "storage_percent") => &[
            "Archive or purge cold data, or grow the allocated storage",
        ],
        (ServiceKind::ObjectStorage, "latency_ms") => &[
            "Put a CDN in front of hot objects or move to a premium storage tier",
            "Batch small object requests and check for throttling on the account",
        ],
        (ServiceKind::ObjectStorage, "availability_percent") | (ServiceKind::ObjectStorage, "error_rate_percent") => &[
            "Review server-side errors and throttling; add client retries with exponential backoff",
        ],
        (ServiceKind::ObjectStorage, "throughput_mbps") => &[
            "Parallelize transfers and verify the account is not hitting egress limits",
        ],
        (ServiceKind::ApiGateway, "response_time_ms") | (ServiceKind::ApiGateway, "p95_response_time_ms") => &[
            "Add response caching for idempotent endpoints",
            "Scale out API instances and trace slow downstream dependencies",
        ],
        (ServiceKind::ApiGateway, "error_rate_percent") => &[
            "Inspect failing endpoints and recent deployments; add circuit breakers for flaky dependencies",
        ],
        (ServiceKind::Cache, "cache_hit_rate_percent") => &[
            "Review key TTLs and the cache-aside pattern; warm the cache for hot keys",
        ],
        (ServiceKind::Cache, "memory_usage_percent") | (ServiceKind::Cache, "evicted_keys") => &[
            "Scale up the cache tier or set an eviction policy such as allkeys-lru",
        ],
        (ServiceKind::Cache, "connected_clients") => &[
            "Reuse client connections (multiplexing) instead of opening one per request",
        ],
        (ServiceKind::Cache, "server_load_percent") => &[
            "Avoid O(N) commands on large keys and consider sharding or clustering the cache",
        ],
        _ => &[],
    }
}

const OUTLIER_ADVICE: &str =
    "Correlate outlier windows with deployments, batch jobs or traffic spikes around the same time";
const PROPAGATION_ADVICE: &str =
    "Fix this service first: correlated degradation elsewhere is likely a downstream effect";

/// Recommendations for a bottleneck, most specific first, without repeats.
pub fn recommend(kind: ServiceKind, severe: &[&Anomaly], propagating: bool) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();

    for anomaly in severe {
        match anomaly.kind {
            AnomalyKind::ThresholdBreach => {
                let templates = for_metric(kind, &anomaly.metric);
                if templates.is_empty() {
                    push(&mut out, format!("Investigate the trend of {} on {}", anomaly.metric, kind.display_name()));
                }
                for line in templates {
                    push(&mut out, line.to_string());
                }
            }
            AnomalyKind::StatisticalOutlier => push(&mut out, OUTLIER_ADVICE.to_string()),
        }
    }

    if propagating {
        push(&mut out, PROPAGATION_ADVICE.to_string());
    }
    if out.is_empty() {
        push(&mut out, format!("Review recent changes to {} and watch its primary metric", kind.display_name()));
    }
    out
}

fn push(out: &mut Vec<String>, line: String) {
    if !out.contains(&line) {
        out.push(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::anomaly_detection::{DetectedAt, Severity};
    use chrono::{TimeZone, Utc};

    fn breach(metric: &str) -> Anomaly {
        Anomaly {
            anomaly_type: format!("high_{}", metric),
            kind: AnomalyKind::ThresholdBreach,
            metric: metric.to_string(),
            description: String::new(),
            severity: Severity::Critical,
            detected_at: DetectedAt::at(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            value: 0.0,
            reference: 0.0,
        }
    }

    #[test]
    fn cpu_saturation_suggests_scale_out() {
        let cpu = breach("cpu_usage_percent");
        let recs = recommend(ServiceKind::ComputeCluster, &[&cpu], false);
        assert!(recs[0].contains("Scale out"));
    }

    #[test]
    fn database_saturation_suggests_pool_tuning() {
        let dtu = breach("dtu_percent");
        let recs = recommend(ServiceKind::RelationalDatabase, &[&dtu, &dtu], true);
        assert!(recs[0].contains("connection pool"));
        assert_eq!(recs.len(), 3);
        assert_eq!(recs.last().map(String::as_str), Some(PROPAGATION_ADVICE));
    }

    #[test]
    fn never_empty() {
        assert_eq!(recommend(ServiceKind::Cache, &[], false).len(), 1);
    }
}
