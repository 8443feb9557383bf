use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Marker written in place of a missing timestamp or an empty cwnd list.
pub const MISSING: &str = "NaN";

/// One sampler tick: a wall-clock timestamp (seconds since the epoch) and the
/// cwnd values of the data connections seen during that tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: Option<f64>,
    pub values: Vec<Option<u64>>,
}

/// Why a raw sample line could not be turned into a [`Sample`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LineError {
    #[error("empty line")]
    Empty,
    #[error("unparsable timestamp {0:?}")]
    Timestamp(String),
    #[error("{found} value fields, at most {max} allowed")]
    TooManyFields { found: usize, max: usize },
    #[error("unparsable cwnd value {0:?}")]
    Value(String),
}

impl Sample {
    pub fn new(timestamp: Option<f64>, values: Vec<u64>) -> Self {
        Self {
            timestamp,
            values: values.into_iter().map(Some).collect(),
        }
    }

    /// Values that are actually present, in field order.
    pub fn valid_values(&self) -> impl Iterator<Item = u64> + '_ {
        self.values.iter().flatten().copied()
    }

    /// Render as a single log line (without the trailing newline).
    ///
    /// The timestamp keeps millisecond resolution. An empty value list is
    /// written as a single `NaN` field so every line carries at least one
    /// value column.
    pub fn to_line(&self) -> String {
        let mut line = match self.timestamp {
            Some(ts) if ts.is_finite() => format!("{ts:.3}"),
            _ => MISSING.to_string(),
        };
        if self.values.is_empty() {
            line.push(',');
            line.push_str(MISSING);
            return line;
        }
        for value in &self.values {
            line.push(',');
            match value {
                Some(v) => line.push_str(&v.to_string()),
                None => line.push_str(MISSING),
            }
        }
        line
    }

    /// Parse a raw log line of the form `<timestamp>,<v0>[,<v1>...]`.
    ///
    /// `NaN` and empty fields are missing values. A `NaN` timestamp parses to
    /// `timestamp: None`; it is up to the caller to decide what that means.
    pub fn parse_line(line: &str, max_flows: usize) -> Result<Self, LineError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(LineError::Empty);
        }

        let mut fields = line.split(',');
        let ts_field = fields.next().unwrap_or_default().trim();
        let timestamp = parse_missing(ts_field)
            .map(|raw| {
                raw.parse::<f64>()
                    .ok()
                    .filter(|ts| ts.is_finite())
                    .ok_or_else(|| LineError::Timestamp(raw.to_string()))
            })
            .transpose()?;

        let values = fields
            .map(|field| {
                parse_missing(field.trim())
                    .map(|raw| {
                        raw.parse::<u64>()
                            .map_err(|_| LineError::Value(raw.to_string()))
                    })
                    .transpose()
            })
            .collect::<Result<Vec<_>, _>>()?;

        if values.len() > max_flows {
            return Err(LineError::TooManyFields {
                found: values.len(),
                max: max_flows,
            });
        }

        Ok(Self { timestamp, values })
    }
}

fn parse_missing(raw: &str) -> Option<&str> {
    if raw.is_empty() || raw.eq_ignore_ascii_case(MISSING) {
        None
    } else {
        Some(raw)
    }
}

/// A reduced congestion-window reading relative to the experiment start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CwndRecord {
    pub relative_time: f64,
    pub cwnd: u64,
}

/// One per-interval line of a throughput report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntervalRecord {
    pub end_time: f64,
    pub bandwidth_mbps: f64,
}

/// Interval records of one logical flow, in report order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowSeries {
    pub flow: String,
    pub records: Vec<IntervalRecord>,
}

impl FlowSeries {
    pub fn new(flow: impl Into<String>) -> Self {
        Self {
            flow: flow.into(),
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, end_time: f64, bandwidth_mbps: f64) {
        self.records.push(IntervalRecord {
            end_time,
            bandwidth_mbps,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn times(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.end_time).collect()
    }

    pub fn bandwidths(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.bandwidth_mbps).collect()
    }

    /// Arithmetic mean of the bandwidth values; 0 for an empty series.
    pub fn mean_mbps(&self) -> f64 {
        if self.records.is_empty() {
            return 0.0;
        }
        let total: f64 = self.records.iter().map(|r| r.bandwidth_mbps).sum();
        total / self.records.len() as f64
    }
}

/// Per-run throughput scorecard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FairnessResult {
    pub per_flow_mean: BTreeMap<String, f64>,
    pub aggregate: f64,
    pub fairness_index: f64,
}

/// Absolute timestamps bounding the measured transfer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalysisWindow {
    pub start: f64,
    pub end: f64,
}

impl AnalysisWindow {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn from_duration(start: f64, duration_secs: f64) -> Self {
        Self::new(start, start + duration_secs)
    }

    /// Inclusive on both ends.
    pub fn contains(&self, timestamp: f64) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

impl fmt::Display for AnalysisWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:.3}, {:.3}]", self.start, self.end)
    }
}
