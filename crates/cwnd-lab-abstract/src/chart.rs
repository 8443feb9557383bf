use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A named `(x, y)` series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSeries {
    pub label: String,
    pub points: Vec<(f64, f64)>,
}

impl ChartSeries {
    pub fn new(label: impl Into<String>, points: Vec<(f64, f64)>) -> Self {
        Self {
            label: label.into(),
            points,
        }
    }

    pub fn from_columns(label: impl Into<String>, xs: &[f64], ys: &[f64]) -> Self {
        Self::new(label, xs.iter().copied().zip(ys.iter().copied()).collect())
    }
}

/// A horizontal line at a fixed y value, e.g. the nominal link capacity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceLine {
    pub label: String,
    pub y: f64,
}

/// Everything a renderer needs to draw one chart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub series: Vec<ChartSeries>,
    pub reference_lines: Vec<ReferenceLine>,
    /// Fixed y range; derived from the data when absent.
    pub y_range: Option<(f64, f64)>,
}

impl ChartSpec {
    pub fn new(
        title: impl Into<String>,
        x_label: impl Into<String>,
        y_label: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            x_label: x_label.into(),
            y_label: y_label.into(),
            ..Default::default()
        }
    }

    pub fn with_series(mut self, series: ChartSeries) -> Self {
        self.series.push(series);
        self
    }

    pub fn with_reference(mut self, label: impl Into<String>, y: f64) -> Self {
        self.reference_lines.push(ReferenceLine {
            label: label.into(),
            y,
        });
        self
    }

    pub fn with_y_range(mut self, low: f64, high: f64) -> Self {
        self.y_range = Some((low, high));
        self
    }

    /// True when no series holds a single point.
    pub fn is_empty(&self) -> bool {
        self.series.iter().all(|s| s.points.is_empty())
    }

    /// Smallest and largest x over all series.
    pub fn x_bounds(&self) -> Option<(f64, f64)> {
        bounds(self.series.iter().flat_map(|s| s.points.iter().map(|p| p.0)))
    }

    /// Smallest and largest y over all series and reference lines.
    pub fn y_bounds(&self) -> Option<(f64, f64)> {
        bounds(
            self.series
                .iter()
                .flat_map(|s| s.points.iter().map(|p| p.1))
                .chain(self.reference_lines.iter().map(|r| r.y)),
        )
    }
}

fn bounds(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    values
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("nothing to draw for chart {0:?}")]
    Empty(String),
    #[error("failed to create chart directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to draw chart {path}: {message}")]
    Backend { path: PathBuf, message: String },
}

/// Turns a chart description into a persisted image.
pub trait Renderer {
    fn render(&self, chart: &ChartSpec, path: &Path) -> Result<(), RenderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_cover_series_and_references() {
        let chart = ChartSpec::new("t", "x", "y")
            .with_series(ChartSeries::new("a", vec![(0.0, 5.0), (2.0, 80.0)]))
            .with_series(ChartSeries::from_columns("b", &[1.0, 3.0], &[20.0, 30.0]))
            .with_reference("limit", 100.0);
        assert_eq!(chart.x_bounds(), Some((0.0, 3.0)));
        assert_eq!(chart.y_bounds(), Some((5.0, 100.0)));
        assert!(!chart.is_empty());
    }

    #[test]
    fn empty_chart_has_no_bounds() {
        let chart = ChartSpec::new("t", "x", "y").with_series(ChartSeries::new("a", Vec::new()));
        assert!(chart.is_empty());
        assert_eq!(chart.x_bounds(), None);
    }
}
