use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::metrics::{MetricsTable, TableBuilder, Timestamp};
use crate::agents::schema::ServiceKind;
use crate::errors::{ObserverError, ObserverResult};

/// Header spellings accepted for the time column, after normalization.
const TIMESTAMP_COLUMNS: &[&str] = &["timestamp", "time", "datetime", "date", "time_generated", "timegenerated"];

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M", "%Y/%m/%d %H:%M:%S"];

/// `"CPU Usage %"` -> `"cpu_usage_percent"`.
pub fn normalize_header(header: &str) -> String {
    let lowered = header.trim().to_lowercase().replace('%', " percent ");
    let mut out = String::with_capacity(lowered.len());
    for ch in lowered.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

pub fn parse_timestamp(raw: &str) -> Option<Timestamp> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| Utc.from_utc_datetime(&naive));
    }
    // epoch seconds
    raw.parse::<i64>().ok().and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}

/// Coerce a cell to a number; anything unparseable becomes null.
pub fn parse_value(raw: &str) -> Option<f64> {
    let cleaned = raw.trim().trim_end_matches('%').replace(',', "");
    cleaned.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Every `.csv` file under `dir`, in path order so merges are reproducible.
pub fn discover_files(dir: &Path) -> ObserverResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(ObserverError::data_unavailable(
            dir.display().to_string(),
            "data directory does not exist",
        ));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable directory entry");
                continue;
            }
        };
        let is_csv = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .map_or(false, |ext| ext.eq_ignore_ascii_case("csv"));
        if entry.file_type().is_file() && is_csv {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Column layout of one file as seen through a service schema.
struct ColumnMap {
    timestamp: usize,
    metrics: Vec<(usize, &'static str)>,
}

fn map_columns(headers: &csv::StringRecord, kind: ServiceKind) -> Option<ColumnMap> {
    let schema = kind.schema();
    let normalized: Vec<String> = headers.iter().map(normalize_header).collect();

    let timestamp = normalized
        .iter()
        .position(|h| TIMESTAMP_COLUMNS.contains(&h.as_str()))?;

    let mut seen: BTreeMap<&'static str, usize> = BTreeMap::new();
    for (idx, header) in normalized.iter().enumerate() {
        if idx == timestamp {
            continue;
        }
        if let Some(metric) = schema.resolve_header(header) {
            seen.entry(metric).or_insert(idx);
        }
    }

    if schema.required_metrics().any(|m| !seen.contains_key(m)) {
        return None;
    }

    let mut metrics: Vec<(usize, &'static str)> = seen.into_iter().map(|(m, idx)| (idx, m)).collect();
    metrics.sort();
    Some(ColumnMap { timestamp, metrics })
}

/// Feed one file into `builder` if its columns fit the schema. Returns the
/// number of rows taken, or `None` when the file belongs to someone else.
fn read_file(path: &Path, kind: ServiceKind, builder: &mut TableBuilder) -> ObserverResult<Option<usize>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let headers = reader.headers()?.clone();
    let Some(columns) = map_columns(&headers, kind) else {
        debug!(service = %kind, file = %path.display(), "File does not match schema");
        return Ok(None);
    };

    let mut taken = 0;
    let mut skipped = 0;
    for record in reader.records() {
        let record = record?;
        let Some(timestamp) = record.get(columns.timestamp).and_then(parse_timestamp) else {
            skipped += 1;
            continue;
        };
        builder.push(
            timestamp,
            columns
                .metrics
                .iter()
                .map(|(idx, metric)| (*metric, record.get(*idx).and_then(parse_value))),
        );
        taken += 1;
    }

    if skipped > 0 {
        debug!(file = %path.display(), skipped, "Dropped rows with unparseable timestamps");
    }
    Ok(Some(taken))
}

/// Build the table for one service from every matching file under `dir`.
pub fn load_service_table(dir: &Path, kind: ServiceKind) -> ObserverResult<MetricsTable> {
    let files = discover_files(dir).map_err(|_| {
        ObserverError::data_unavailable(kind.key(), format!("{} is not a directory", dir.display()))
    })?;

    let mut builder = TableBuilder::new(kind.schema().metric_names());
    let mut matched = 0;
    for path in &files {
        match read_file(path, kind, &mut builder) {
            Ok(Some(rows)) => {
                matched += 1;
                debug!(service = %kind, file = %path.display(), rows, "Loaded metrics file");
            }
            Ok(None) => {}
            Err(e) => warn!(service = %kind, file = %path.display(), error = %e, "Skipping unreadable file"),
        }
    }

    if matched == 0 {
        return Err(ObserverError::data_unavailable(
            kind.key(),
            format!("no file under {} carries the required columns", dir.display()),
        ));
    }
    if builder.row_count() == 0 {
        return Err(ObserverError::data_unavailable(kind.key(), "matching files contain no timestamped rows"));
    }

    let table = builder.build();
    info!(service = %kind, files = matched, rows = table.len(), "Metrics table built");
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn headers_normalize_to_snake_case() {
        assert_eq!(normalize_header("CPU Usage %"), "cpu_usage_percent");
        assert_eq!(normalize_header("  Avg Query Time (ms) "), "avg_query_time_ms");
        assert_eq!(normalize_header("TimeGenerated"), "timegenerated");
        assert_eq!(normalize_header("cache-hit-rate-percent"), "cache_hit_rate_percent");
    }

    #[test]
    fn timestamps_in_common_shapes() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(parse_timestamp("2024-01-02T03:04:05Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-02 03:04:05"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-02T03:04:05"), Some(expected));
        assert_eq!(parse_timestamp(&expected.timestamp().to_string()), Some(expected));
        assert_eq!(parse_timestamp("2024-01-02").map(|t| t.day()), Some(2));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn values_coerce_or_null() {
        assert_eq!(parse_value("42.5"), Some(42.5));
        assert_eq!(parse_value("85%"), Some(85.0));
        assert_eq!(parse_value("1,200"), Some(1200.0));
        assert_eq!(parse_value("n/a"), None);
        assert_eq!(parse_value("NaN"), None);
        assert_eq!(parse_value(""), None);
    }

    #[test]
    fn columns_require_timestamp_and_required_metrics() {
        let ok = csv::StringRecord::from(vec!["Timestamp", "CPU %", "Memory Usage %", "gpu_temp"]);
        let map = map_columns(&ok, ServiceKind::ComputeCluster).unwrap();
        assert_eq!(map.timestamp, 0);
        assert_eq!(map.metrics, vec![(1, "cpu_usage_percent"), (2, "memory_usage_percent")]);

        let missing = csv::StringRecord::from(vec!["timestamp", "cpu_usage_percent"]);
        assert!(map_columns(&missing, ServiceKind::ComputeCluster).is_none());

        let no_time = csv::StringRecord::from(vec!["cpu_usage_percent", "memory_usage_percent"]);
        assert!(map_columns(&no_time, ServiceKind::ComputeCluster).is_none());
    }
}
