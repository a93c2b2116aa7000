/*
* Metrics Table
* -------------
* The in-memory shape every agent works on: one service's samples, sorted by
* time, one row per distinct timestamp, every declared metric present in every
* row (absent readings are an explicit `None`, never a dropped key).
*
* Tables are built once through `TableBuilder` and are read-only afterwards.
* Rows that land on the same timestamp (two exports covering the same window)
* are merged cell by cell: the first non-null reading wins.
*/

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::stats::SeriesStats;

pub type Timestamp = DateTime<Utc>;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MetricRow {
    pub timestamp: Timestamp,
    pub values: BTreeMap<String, Option<f64>>,
}

impl MetricRow {
    pub fn value(&self, metric: &str) -> Option<f64> {
        self.values.get(metric).copied().flatten()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct MetricsTable {
    metrics: Vec<String>,
    rows: Vec<MetricRow>,
}

impl MetricsTable {
    pub fn metrics(&self) -> &[String] {
        &self.metrics
    }

    pub fn rows(&self) -> &[MetricRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_metric(&self, metric: &str) -> bool {
        self.metrics.iter().any(|m| m == metric)
    }

    /// Non-null points of one metric, in time order.
    pub fn series(&self, metric: &str) -> Vec<(Timestamp, f64)> {
        self.rows
            .iter()
            .filter_map(|row| row.value(metric).map(|v| (row.timestamp, v)))
            .collect()
    }

    pub fn values(&self, metric: &str) -> Vec<f64> {
        self.rows.iter().filter_map(|row| row.value(metric)).collect()
    }

    pub fn time_range(&self) -> Option<(Timestamp, Timestamp)> {
        Some((self.rows.first()?.timestamp, self.rows.last()?.timestamp))
    }

    pub fn stats(&self, metric: &str) -> Option<SeriesStats> {
        self.stats_in_range(metric, None, None)
    }

    /// Statistics over an inclusive time window; open ends are unbounded.
    pub fn stats_in_range(
        &self,
        metric: &str,
        from: Option<Timestamp>,
        to: Option<Timestamp>,
    ) -> Option<SeriesStats> {
        let values: Vec<f64> = self
            .rows
            .iter()
            .filter(|row| from.map_or(true, |from| row.timestamp >= from))
            .filter(|row| to.map_or(true, |to| row.timestamp <= to))
            .filter_map(|row| row.value(metric))
            .collect();
        SeriesStats::from_values(&values)
    }
}

/// Accumulates samples from any number of sources into a `MetricsTable`.
#[derive(Debug)]
pub struct TableBuilder {
    metrics: Vec<String>,
    rows: BTreeMap<Timestamp, BTreeMap<String, Option<f64>>>,
}

impl TableBuilder {
    pub fn new<I, S>(metrics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            metrics: metrics.into_iter().map(Into::into).collect(),
            rows: BTreeMap::new(),
        }
    }

    /// Add one sample. Metrics outside the declared schema are ignored.
    pub fn push<'a, I>(&mut self, timestamp: Timestamp, values: I)
    where
        I: IntoIterator<Item = (&'a str, Option<f64>)>,
    {
        let metrics = &self.metrics;
        let row = self.rows.entry(timestamp).or_insert_with(|| {
            metrics.iter().map(|m| (m.clone(), None)).collect()
        });

        for (metric, value) in values {
            if let Some(slot) = row.get_mut(metric) {
                if slot.is_none() {
                    *slot = value.filter(|v| v.is_finite());
                }
            }
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn build(self) -> MetricsTable {
        MetricsTable {
            metrics: self.metrics,
            rows: self
                .rows
                .into_iter()
                .map(|(timestamp, values)| MetricRow { timestamp, values })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(minute: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap()
    }

    #[test]
    fn rows_come_out_sorted_and_complete() {
        let mut builder = TableBuilder::new(["cpu", "mem"]);
        builder.push(ts(5), [("cpu", Some(50.0))]);
        builder.push(ts(1), [("cpu", Some(10.0)), ("mem", Some(20.0))]);
        let table = builder.build();

        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[0].timestamp, ts(1));
        // missing reading is kept as an explicit null
        assert_eq!(table.rows()[1].values.get("mem"), Some(&None));
    }

    #[test]
    fn duplicate_timestamps_merge_first_non_null_wins() {
        let mut builder = TableBuilder::new(["cpu", "mem"]);
        builder.push(ts(1), [("cpu", Some(10.0)), ("mem", None)]);
        builder.push(ts(1), [("cpu", Some(99.0)), ("mem", Some(40.0))]);
        let table = builder.build();

        assert_eq!(table.len(), 1);
        assert_eq!(table.rows()[0].value("cpu"), Some(10.0));
        assert_eq!(table.rows()[0].value("mem"), Some(40.0));
    }

    #[test]
    fn non_finite_and_undeclared_values_are_dropped() {
        let mut builder = TableBuilder::new(["cpu"]);
        builder.push(ts(1), [("cpu", Some(f64::NAN)), ("disk", Some(3.0))]);
        let table = builder.build();
        assert_eq!(table.rows()[0].value("cpu"), None);
        assert!(!table.rows()[0].values.contains_key("disk"));
    }

    #[test]
    fn stats_respect_time_window() {
        let mut builder = TableBuilder::new(["cpu"]);
        for minute in 0..10 {
            builder.push(ts(minute), [("cpu", Some(minute as f64))]);
        }
        let table = builder.build();

        let all = table.stats("cpu").unwrap();
        assert_eq!(all.count, 10);
        let window = table.stats_in_range("cpu", Some(ts(2)), Some(ts(4))).unwrap();
        assert_eq!(window.count, 3);
        assert_eq!(window.max, 4.0);
        assert!(table.stats_in_range("cpu", Some(ts(30)), None).is_none());
    }
}
