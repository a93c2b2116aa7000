use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::agents::schema::ServiceKind;
use crate::errors::{ObserverError, ObserverResult};

/// Which side of the bound is the bad side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Exceeds,
    FallsBelow,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Exceeds => write!(f, "exceeds"),
            Direction::FallsBelow => write!(f, "falls_below"),
        }
    }
}

impl FromStr for Direction {
    type Err = ObserverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "exceeds" | "above" | "max" | "gt" => Ok(Direction::Exceeds),
            "falls_below" | "below" | "min" | "lt" => Ok(Direction::FallsBelow),
            other => Err(ObserverError::config(format!(
                "unknown threshold direction '{}' (expected 'exceeds' or 'falls_below')",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limit {
    pub bound: f64,
    pub direction: Direction,
}

impl Limit {
    pub fn exceeds(bound: f64) -> Self {
        Self { bound, direction: Direction::Exceeds }
    }

    pub fn falls_below(bound: f64) -> Self {
        Self { bound, direction: Direction::FallsBelow }
    }

    pub fn is_breached_by(&self, value: f64) -> bool {
        match self.direction {
            Direction::Exceeds => value > self.bound,
            Direction::FallsBelow => value < self.bound,
        }
    }

    /// How far past the bound `value` sits, as a ratio >= 1 on a breach.
    ///
    /// For "falls below" the ratio is mirrored (bound / value), so a hit rate of
    /// 40 against a floor of 80 is a 2x breach just like 160 against a cap of 80.
    pub fn breach_ratio(&self, value: f64) -> f64 {
        match self.direction {
            Direction::Exceeds if self.bound > 0.0 => value / self.bound,
            Direction::Exceeds => {
                if value > self.bound { f64::INFINITY } else { 1.0 }
            }
            Direction::FallsBelow if value > 0.0 => self.bound / value,
            Direction::FallsBelow => {
                if value < self.bound { f64::INFINITY } else { 1.0 }
            }
        }
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            Direction::Exceeds => write!(f, "> {}", self.bound),
            Direction::FallsBelow => write!(f, "< {}", self.bound),
        }
    }
}

/// A caller-supplied replacement for one limit. Without a direction the
/// metric keeps the direction it already has.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LimitOverride {
    Bound(f64),
    Full {
        bound: f64,
        #[serde(default)]
        direction: Option<Direction>,
    },
}

impl LimitOverride {
    pub fn bound(&self) -> f64 {
        match self {
            LimitOverride::Bound(bound) => *bound,
            LimitOverride::Full { bound, .. } => *bound,
        }
    }

    pub fn direction(&self) -> Option<Direction> {
        match self {
            LimitOverride::Bound(_) => None,
            LimitOverride::Full { direction, .. } => *direction,
        }
    }

    pub fn validate(&self, metric: &str) -> ObserverResult<()> {
        if !self.bound().is_finite() {
            return Err(ObserverError::config(format!(
                "threshold bound for '{}' must be a finite number",
                metric
            )));
        }
        Ok(())
    }
}

impl FromStr for LimitOverride {
    type Err = ObserverError;

    /// Accepts `75` or `75:falls_below`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (bound, direction) = match s.split_once(':') {
            Some((bound, direction)) => (bound, Some(direction.parse::<Direction>()?)),
            None => (s, None),
        };
        let bound = bound
            .trim()
            .parse::<f64>()
            .map_err(|_| ObserverError::config(format!("threshold bound '{}' is not numeric", bound.trim())))?;

        let parsed = match direction {
            Some(direction) => LimitOverride::Full { bound, direction: Some(direction) },
            None => LimitOverride::Bound(bound),
        };
        parsed.validate("override")?;
        Ok(parsed)
    }
}

/// Per-service metric limits: built-in defaults plus caller overrides.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdPolicy {
    limits: BTreeMap<String, Limit>,
    #[serde(skip)]
    known_metrics: BTreeSet<String>,
}

impl ThresholdPolicy {
    pub fn new<I, S>(known_metrics: I, defaults: impl IntoIterator<Item = (String, Limit)>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut known_metrics: BTreeSet<String> = known_metrics.into_iter().map(Into::into).collect();
        let limits: BTreeMap<String, Limit> = defaults.into_iter().collect();
        known_metrics.extend(limits.keys().cloned());
        Self { limits, known_metrics }
    }

    /// Defaults for one service category.
    pub fn for_service(kind: ServiceKind) -> Self {
        let schema = kind.schema();
        Self::new(
            schema.metrics.iter().map(|m| m.name),
            schema
                .metrics
                .iter()
                .filter_map(|m| m.default_limit.map(|limit| (m.name.to_string(), limit))),
        )
    }

    pub fn get(&self, metric: &str) -> Option<&Limit> {
        self.limits.get(metric)
    }

    pub fn is_known(&self, metric: &str) -> bool {
        self.known_metrics.contains(metric)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Limit)> {
        self.limits.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.limits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limits.is_empty()
    }

    /// Replace a single entry. Unknown metric names are ignored; returns
    /// whether the entry was applied. A non-finite bound is rejected.
    pub fn set(&mut self, metric: &str, limit: Limit) -> ObserverResult<bool> {
        if !limit.bound.is_finite() {
            return Err(ObserverError::config(format!(
                "threshold bound for '{}' must be a finite number",
                metric
            )));
        }
        if !self.is_known(metric) {
            debug!(metric = metric, "Ignoring threshold for unknown metric");
            return Ok(false);
        }
        self.limits.insert(metric.to_string(), limit);
        Ok(true)
    }

    /// Merge `overrides` over the current limits. Only named entries change.
    ///
    /// Every override is validated before any is applied, so a bad entry leaves
    /// the policy untouched. Returns the names that were ignored as unknown.
    pub fn apply_overrides<'a, I>(&mut self, overrides: I) -> ObserverResult<Vec<String>>
    where
        I: IntoIterator<Item = (&'a String, &'a LimitOverride)>,
    {
        let overrides: Vec<(&String, &LimitOverride)> = overrides.into_iter().collect();
        for (metric, value) in &overrides {
            value.validate(metric)?;
        }

        let mut ignored = Vec::new();
        for (metric, value) in overrides {
            let direction = value
                .direction()
                .or_else(|| self.limits.get(metric).map(|l| l.direction))
                .unwrap_or(Direction::Exceeds);
            if !self.set(metric, Limit { bound: value.bound(), direction })? {
                ignored.push(metric.clone());
            }
        }
        Ok(ignored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overrides(entries: &[(&str, f64)]) -> BTreeMap<String, LimitOverride> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), LimitOverride::Bound(*v)))
            .collect()
    }

    #[test]
    fn overrides_merge_over_defaults() {
        let mut policy = ThresholdPolicy::for_service(ServiceKind::ComputeCluster);
        let before = policy.len();
        policy
            .apply_overrides(&overrides(&[("cpu_usage_percent", 70.0)]))
            .unwrap();

        assert_eq!(policy.len(), before);
        assert_eq!(policy.get("cpu_usage_percent"), Some(&Limit::exceeds(70.0)));
        assert_eq!(policy.get("memory_usage_percent"), Some(&Limit::exceeds(85.0)));
    }

    #[test]
    fn unknown_metrics_are_ignored() {
        let mut policy = ThresholdPolicy::for_service(ServiceKind::Cache);
        let snapshot = policy.clone();
        let ignored = policy
            .apply_overrides(&overrides(&[("gpu_temperature", 90.0)]))
            .unwrap();
        assert_eq!(ignored, vec!["gpu_temperature".to_string()]);
        assert_eq!(policy, snapshot);
    }

    #[test]
    fn disjoint_overrides_compose() {
        let a = overrides(&[("dtu_percent", 60.0)]);
        let b = overrides(&[("avg_query_time_ms", 150.0)]);
        let mut union = a.clone();
        union.extend(b.clone());

        let mut stepwise = ThresholdPolicy::for_service(ServiceKind::RelationalDatabase);
        stepwise.apply_overrides(&a).unwrap();
        stepwise.apply_overrides(&b).unwrap();

        let mut at_once = ThresholdPolicy::for_service(ServiceKind::RelationalDatabase);
        at_once.apply_overrides(&union).unwrap();

        assert_eq!(stepwise, at_once);
    }

    #[test]
    fn bound_only_override_keeps_direction() {
        let mut policy = ThresholdPolicy::for_service(ServiceKind::Cache);
        policy
            .apply_overrides(&overrides(&[("cache_hit_rate_percent", 70.0)]))
            .unwrap();
        assert_eq!(policy.get("cache_hit_rate_percent"), Some(&Limit::falls_below(70.0)));
    }

    #[test]
    fn invalid_override_leaves_policy_untouched() {
        let mut policy = ThresholdPolicy::for_service(ServiceKind::ComputeCluster);
        let snapshot = policy.clone();
        let mut bad = overrides(&[("cpu_usage_percent", 50.0)]);
        bad.insert("memory_usage_percent".into(), LimitOverride::Bound(f64::NAN));

        assert!(matches!(
            policy.apply_overrides(&bad),
            Err(ObserverError::Configuration(_))
        ));
        assert_eq!(policy, snapshot);
    }

    #[test]
    fn set_rejects_non_finite_bounds() {
        let mut policy = ThresholdPolicy::for_service(ServiceKind::ComputeCluster);
        let snapshot = policy.clone();

        for bound in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(
                policy.set("cpu_usage_percent", Limit::exceeds(bound)),
                Err(ObserverError::Configuration(_))
            ));
        }
        assert_eq!(policy, snapshot);

        assert!(policy.set("cpu_usage_percent", Limit::exceeds(70.0)).unwrap());
        assert!(!policy.set("gpu_temperature", Limit::exceeds(70.0)).unwrap());
        assert_eq!(policy.get("cpu_usage_percent"), Some(&Limit::exceeds(70.0)));
    }

    #[test]
    fn parses_cli_style_overrides() {
        assert_eq!("75".parse::<LimitOverride>().unwrap(), LimitOverride::Bound(75.0));
        assert_eq!(
            "80:below".parse::<LimitOverride>().unwrap(),
            LimitOverride::Full { bound: 80.0, direction: Some(Direction::FallsBelow) }
        );
        assert!("abc".parse::<LimitOverride>().is_err());
        assert!("10:sideways".parse::<LimitOverride>().is_err());
    }

    #[test]
    fn breach_ratio_mirrors_for_lower_bounds() {
        let cap = Limit::exceeds(80.0);
        let floor = Limit::falls_below(80.0);
        assert!((cap.breach_ratio(128.0) - 1.6).abs() < 1e-9);
        assert!((floor.breach_ratio(40.0) - 2.0).abs() < 1e-9);
        assert!(floor.breach_ratio(0.0).is_infinite());
        assert!(!cap.is_breached_by(80.0));
        assert!(floor.is_breached_by(79.9));
    }
}
