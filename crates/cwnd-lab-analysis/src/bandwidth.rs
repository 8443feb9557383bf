use crate::error::AnalysisError;
use cwnd_lab_abstract::{FlowSeries, IntervalRecord};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Tokens that mark end-of-run summary lines.
pub const SUMMARY_MARKERS: [&str; 2] = ["sender", "receiver"];

/// Whitespace-separated field positions in an interval line such as
/// `[  5]   0.00-1.00   sec  11.8 MBytes  98.6 Mbits/sec    0    245 KBytes`.
const RANGE_FIELD: usize = 2;
const VALUE_FIELD: usize = 6;
const UNIT_FIELD: usize = 7;

const UNIT_SUFFIX: &str = "bits/sec";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BandwidthUnit {
    Gbits,
    Mbits,
    Kbits,
    Other(String),
}

impl BandwidthUnit {
    pub fn from_token(token: &str) -> Self {
        match token {
            "Gbits/sec" => Self::Gbits,
            "Mbits/sec" => Self::Mbits,
            "Kbits/sec" => Self::Kbits,
            other => Self::Other(other.to_string()),
        }
    }

    /// Convert to Mbps. Unknown units pass the value through unchanged.
    pub fn to_mbps(&self, value: f64) -> f64 {
        match self {
            Self::Gbits => value * 1000.0,
            Self::Mbits | Self::Other(_) => value,
            Self::Kbits => value / 1000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ParseStats {
    pub lines: usize,
    pub data_lines: usize,
    /// Data lines whose fields did not sit at the expected positions.
    pub malformed: usize,
    pub unknown_unit: usize,
}

/// An interval data line carries a `start-end` range token and a
/// `*bits/sec` unit token and is not a summary line.
pub fn is_data_line(line: &str) -> bool {
    let mut has_range = false;
    let mut has_unit = false;
    for token in line.split_whitespace() {
        if SUMMARY_MARKERS.contains(&token) {
            return false;
        }
        has_range |= range_end(token).is_some();
        has_unit |= token.ends_with(UNIT_SUFFIX);
    }
    has_range && has_unit
}

fn range_end(token: &str) -> Option<f64> {
    let (start, end) = token.split_once('-')?;
    start.parse::<f64>().ok()?;
    end.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Extract the interval end time and bandwidth from a data line.
pub fn parse_data_line(line: &str) -> Option<(f64, f64, BandwidthUnit)> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let end_time = range_end(fields.get(RANGE_FIELD)?)?;
    let value = fields
        .get(VALUE_FIELD)?
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)?;
    let unit = fields.get(UNIT_FIELD)?;
    if !unit.ends_with(UNIT_SUFFIX) {
        return None;
    }
    Some((end_time, value, BandwidthUnit::from_token(unit)))
}

/// Parse a whole throughput report into one flow's series, in report order.
pub fn parse_str(flow: &str, text: &str) -> (FlowSeries, ParseStats) {
    let mut series = FlowSeries::new(flow);
    let mut stats = ParseStats::default();
    let mut unknown_units = BTreeSet::new();

    for (idx, line) in text.lines().enumerate() {
        stats.lines += 1;
        if !is_data_line(line) {
            continue;
        }
        stats.data_lines += 1;

        let Some((end_time, value, unit)) = parse_data_line(line) else {
            stats.malformed += 1;
            debug!("{flow}: skipping line {}: {line:?}", idx + 1);
            continue;
        };
        if let BandwidthUnit::Other(token) = &unit {
            stats.unknown_unit += 1;
            unknown_units.insert(token.clone());
        }
        series.records.push(IntervalRecord {
            end_time,
            bandwidth_mbps: unit.to_mbps(value),
        });
    }

    if !unknown_units.is_empty() {
        warn!("{flow}: unrecognized bandwidth unit(s) {unknown_units:?} kept as-is");
    }
    if stats.malformed > 0 {
        warn!("{flow}: skipped {} malformed interval line(s)", stats.malformed);
    }
    (series, stats)
}

pub fn parse_file(flow: &str, path: &Path) -> Result<FlowSeries, AnalysisError> {
    let bytes = fs::read(path).map_err(|source| AnalysisError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if bytes.is_empty() {
        return Err(AnalysisError::EmptyInput {
            path: path.to_path_buf(),
        });
    }
    let (series, stats) = parse_str(flow, &String::from_utf8_lossy(&bytes));
    info!(
        "{flow}: {} interval(s) from {} ({} data line(s), mean {:.2} Mbps)",
        series.len(),
        path.display(),
        stats.data_lines,
        series.mean_mbps()
    );
    Ok(series)
}

/// Like [`parse_file`], but an unreadable or empty report yields an empty
/// series together with the logged cause.
pub fn parse_file_or_empty(flow: &str, path: &Path) -> (FlowSeries, Option<AnalysisError>) {
    match parse_file(flow, path) {
        Ok(series) => (series, None),
        Err(e) => {
            error!("{flow}: {e}");
            (FlowSeries::new(flow), Some(e))
        }
    }
}
