use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::ObserverError;
use crate::monitoring::thresholds::{Direction, Limit};

/// The five service categories an agent can be built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    ComputeCluster,
    RelationalDatabase,
    ObjectStorage,
    ApiGateway,
    Cache,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 5] = [
        ServiceKind::ComputeCluster,
        ServiceKind::RelationalDatabase,
        ServiceKind::ObjectStorage,
        ServiceKind::ApiGateway,
        ServiceKind::Cache,
    ];

    /// Stable key used in result maps, config sections and exports.
    pub fn key(&self) -> &'static str {
        match self {
            ServiceKind::ComputeCluster => "compute_cluster",
            ServiceKind::RelationalDatabase => "relational_database",
            ServiceKind::ObjectStorage => "object_storage",
            ServiceKind::ApiGateway => "api_gateway",
            ServiceKind::Cache => "cache",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ServiceKind::ComputeCluster => "Compute Cluster",
            ServiceKind::RelationalDatabase => "Relational Database",
            ServiceKind::ObjectStorage => "Object Storage",
            ServiceKind::ApiGateway => "API Gateway",
            ServiceKind::Cache => "Cache",
        }
    }

    pub fn schema(&self) -> &'static ServiceSchema {
        match self {
            ServiceKind::ComputeCluster => &COMPUTE_CLUSTER,
            ServiceKind::RelationalDatabase => &RELATIONAL_DATABASE,
            ServiceKind::ObjectStorage => &OBJECT_STORAGE,
            ServiceKind::ApiGateway => &API_GATEWAY,
            ServiceKind::Cache => &CACHE,
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

impl FromStr for ServiceKind {
    type Err = ObserverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // short names from the old Azure exports still work
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "compute_cluster" | "compute" | "aks" => Ok(ServiceKind::ComputeCluster),
            "relational_database" | "database" | "sql" | "sqlserver" => Ok(ServiceKind::RelationalDatabase),
            "object_storage" | "storage" | "blob" | "blobstorage" => Ok(ServiceKind::ObjectStorage),
            "api_gateway" | "api" => Ok(ServiceKind::ApiGateway),
            "cache" | "redis" | "rediscache" => Ok(ServiceKind::Cache),
            other => Err(ObserverError::config(format!("unknown service '{}'", other))),
        }
    }
}

/// One tracked metric column.
#[derive(Debug)]
pub struct MetricSpec {
    pub name: &'static str,
    /// Normalized header spellings that also map to this metric.
    pub aliases: &'static [&'static str],
    pub required: bool,
    pub default_limit: Option<Limit>,
}

impl MetricSpec {
    pub fn matches(&self, normalized_header: &str) -> bool {
        self.name == normalized_header || self.aliases.contains(&normalized_header)
    }
}

/// What distinguishes one service category from another: its columns,
/// default limits, and the metric used for cross-service correlation.
#[derive(Debug)]
pub struct ServiceSchema {
    pub metrics: &'static [MetricSpec],
    pub primary_metric: &'static str,
}

impl ServiceSchema {
    pub fn resolve_header(&self, normalized_header: &str) -> Option<&'static str> {
        self.metrics
            .iter()
            .find(|m| m.matches(normalized_header))
            .map(|m| m.name)
    }

    pub fn required_metrics(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.metrics.iter().filter(|m| m.required).map(|m| m.name)
    }

    pub fn metric_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.metrics.iter().map(|m| m.name)
    }
}

const fn cap(bound: f64) -> Option<Limit> {
    Some(Limit { bound, direction: Direction::Exceeds })
}

const fn floor(bound: f64) -> Option<Limit> {
    Some(Limit { bound, direction: Direction::FallsBelow })
}

static COMPUTE_CLUSTER: ServiceSchema = ServiceSchema {
    primary_metric: "cpu_usage_percent",
    metrics: &[
        MetricSpec {
            name: "cpu_usage_percent",
            aliases: &["cpu_percent", "cpu_usage", "cpu_utilization_percent", "node_cpu_usage_percentage"],
            required: true,
            default_limit: cap(80.0),
        },
        MetricSpec {
            name: "memory_usage_percent",
            aliases: &["memory_percent", "memory_usage", "memory_utilization_percent", "node_memory_working_set_percentage"],
            required: true,
            default_limit: cap(85.0),
        },
        MetricSpec {
            name: "pod_restarts",
            aliases: &["pod_restart_count", "restarts", "restart_count"],
            required: false,
            default_limit: cap(5.0),
        },
        MetricSpec {
            name: "pending_pods",
            aliases: &["pods_pending", "pending_pod_count"],
            required: false,
            default_limit: cap(3.0),
        },
        MetricSpec {
            name: "network_throughput_mbps",
            aliases: &["network_mbps", "network_in_mbps"],
            required: false,
            default_limit: None,
        },
    ],
};

static RELATIONAL_DATABASE: ServiceSchema = ServiceSchema {
    primary_metric: "dtu_percent",
    metrics: &[
        MetricSpec {
            name: "dtu_percent",
            aliases: &["dtu_consumption_percent", "dtu_usage_percent", "throughput_utilization_percent"],
            required: true,
            default_limit: cap(80.0),
        },
        MetricSpec {
            name: "avg_query_time_ms",
            aliases: &["average_query_time_ms", "query_time_ms", "avg_query_latency_ms"],
            required: true,
            default_limit: cap(300.0),
        },
        MetricSpec {
            name: "active_connections",
            aliases: &["connections", "connection_count", "sessions"],
            required: false,
            default_limit: cap(200.0),
        },
        MetricSpec {
            name: "deadlocks",
            aliases: &["deadlock_count"],
            required: false,
            default_limit: cap(1.0),
        },
        MetricSpec {
            name: "storage_percent",
            aliases: &["storage_usage_percent", "storage_used_percent"],
            required: false,
            default_limit: cap(85.0),
        },
    ],
};

static OBJECT_STORAGE: ServiceSchema = ServiceSchema {
    primary_metric: "latency_ms",
    metrics: &[
        MetricSpec {
            name: "latency_ms",
            aliases: &["success_e2e_latency_ms", "e2e_latency_ms", "avg_latency_ms"],
            required: true,
            default_limit: cap(100.0),
        },
        MetricSpec {
            name: "availability_percent",
            aliases: &["availability"],
            required: false,
            default_limit: floor(99.9),
        },
        MetricSpec {
            name: "error_rate_percent",
            aliases: &["error_rate", "errors_percent"],
            required: false,
            default_limit: cap(1.0),
        },
        MetricSpec {
            name: "throughput_mbps",
            aliases: &["egress_mbps", "bandwidth_mbps"],
            required: false,
            default_limit: floor(10.0),
        },
    ],
};

static API_GATEWAY: ServiceSchema = ServiceSchema {
    primary_metric: "response_time_ms",
    metrics: &[
        MetricSpec {
            name: "response_time_ms",
            aliases: &["avg_response_time_ms", "duration_ms"],
            required: true,
            default_limit: cap(500.0),
        },
        MetricSpec {
            name: "error_rate_percent",
            aliases: &["error_rate", "failed_requests_percent"],
            required: true,
            default_limit: cap(5.0),
        },
        MetricSpec {
            name: "requests_per_second",
            aliases: &["rps", "request_rate"],
            required: false,
            default_limit: None,
        },
        MetricSpec {
            name: "p95_response_time_ms",
            aliases: &["p95_latency_ms", "response_time_p95_ms"],
            required: false,
            default_limit: cap(1000.0),
        },
    ],
};

static CACHE: ServiceSchema = ServiceSchema {
    primary_metric: "cache_hit_rate_percent",
    metrics: &[
        MetricSpec {
            name: "cache_hit_rate_percent",
            aliases: &["hit_rate_percent", "cache_hit_ratio_percent", "hit_rate"],
            required: true,
            default_limit: floor(80.0),
        },
        MetricSpec {
            name: "memory_usage_percent",
            aliases: &["used_memory_percent", "memory_percent"],
            required: false,
            default_limit: cap(90.0),
        },
        MetricSpec {
            name: "evicted_keys",
            aliases: &["evictions", "evicted_key_count"],
            required: false,
            default_limit: cap(100.0),
        },
        MetricSpec {
            name: "connected_clients",
            aliases: &["clients", "client_connections"],
            required: false,
            default_limit: cap(5000.0),
        },
        MetricSpec {
            name: "server_load_percent",
            aliases: &["server_load"],
            required: false,
            default_limit: cap(80.0),
        },
    ],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_schema_is_self_consistent() {
        for kind in ServiceKind::ALL {
            let schema = kind.schema();
            assert!(
                schema.metrics.iter().any(|m| m.name == schema.primary_metric),
                "{kind}: primary metric missing"
            );
            assert!(schema.required_metrics().count() > 0, "{kind}: no required metrics");
            assert!(
                schema.required_metrics().any(|m| m == schema.primary_metric),
                "{kind}: primary metric should be required"
            );
        }
    }

    #[test]
    fn keys_round_trip_through_from_str() {
        for kind in ServiceKind::ALL {
            assert_eq!(kind.key().parse::<ServiceKind>().unwrap(), kind);
        }
        assert_eq!("AKS".parse::<ServiceKind>().unwrap(), ServiceKind::ComputeCluster);
        assert!("mainframe".parse::<ServiceKind>().is_err());
    }

    #[test]
    fn aliases_resolve_to_canonical_names() {
        let schema = ServiceKind::ComputeCluster.schema();
        assert_eq!(schema.resolve_header("cpu_percent"), Some("cpu_usage_percent"));
        assert_eq!(schema.resolve_header("cpu_usage_percent"), Some("cpu_usage_percent"));
        assert_eq!(schema.resolve_header("gpu_percent"), None);
    }
}
