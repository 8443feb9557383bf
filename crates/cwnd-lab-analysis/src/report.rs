use crate::bandwidth;
use crate::error::AnalysisError;
use crate::fairness;
use crate::reducer::{Reducer, Reduction};
use cwnd_lab_abstract::{
    AnalysisWindow, ChartSeries, ChartSpec, FairnessResult, FlowSeries, LabConfig,
};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Headroom above the link capacity on the bandwidth chart.
const CAPACITY_MARGIN: f64 = 1.05;

/// One throughput report to analyze.
#[derive(Debug, Clone)]
pub struct FlowInput {
    pub id: String,
    pub label: String,
    pub log: PathBuf,
}

impl FlowInput {
    pub fn new(id: impl Into<String>, log: impl Into<PathBuf>) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            log: log.into(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct AnalysisRequest {
    pub name: Option<String>,
    /// Sample log and the window to keep from it.
    pub cwnd: Option<(PathBuf, AnalysisWindow)>,
    pub flows: Vec<FlowInput>,
    pub config: LabConfig,
}

/// Result of the cwnd half of an analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CwndOutcome {
    NotRequested,
    Unreadable { error: String },
    Reduced(Reduction),
}

impl CwndOutcome {
    pub fn reduction(&self) -> Option<&Reduction> {
        match self {
            Self::Reduced(r) => Some(r),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FlowReport {
    pub label: String,
    pub log: PathBuf,
    pub series: FlowSeries,
    /// Set when the report could not be read; the series is then empty.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub name: Option<String>,
    pub config: LabConfig,
    pub window: Option<AnalysisWindow>,
    pub cwnd: CwndOutcome,
    pub flows: Vec<FlowReport>,
    pub scorecard: Option<FairnessResult>,
}

/// Reduce the sample log and parse every flow report. Unreadable inputs are
/// logged and recorded in the report rather than aborting the analysis.
pub fn analyze(request: &AnalysisRequest) -> AnalysisReport {
    let cwnd = match &request.cwnd {
        None => CwndOutcome::NotRequested,
        Some((path, window)) => match Reducer::new(&request.config).reduce_file(path, *window) {
            Ok(reduction) => CwndOutcome::Reduced(reduction),
            Err(e) => {
                error!("{e}");
                CwndOutcome::Unreadable {
                    error: e.to_string(),
                }
            }
        },
    };

    let flows: Vec<FlowReport> = request
        .flows
        .iter()
        .map(|input| {
            let (series, error) = bandwidth::parse_file_or_empty(&input.id, &input.log);
            FlowReport {
                label: input.label.clone(),
                log: input.log.clone(),
                series,
                error: error.map(|e| e.to_string()),
            }
        })
        .collect();

    let scorecard = (!flows.is_empty()).then(|| {
        let series: Vec<FlowSeries> = flows.iter().map(|f| f.series.clone()).collect();
        fairness::score(&series)
    });

    AnalysisReport {
        name: request.name.clone(),
        config: request.config.clone(),
        window: request.cwnd.as_ref().map(|(_, w)| *w),
        cwnd,
        flows,
        scorecard,
    }
}

impl AnalysisReport {
    /// cwnd over relative time, or `None` when there is nothing to plot.
    pub fn cwnd_chart(&self, title: Option<&str>) -> Option<ChartSpec> {
        let reduction = self.cwnd.reduction().filter(|r| !r.is_empty())?;
        Some(
            ChartSpec::new(
                title.unwrap_or("TCP Congestion Window"),
                "Time (s)",
                "Congestion Window (packets)",
            )
            .with_series(ChartSeries::new("cwnd", reduction.points())),
        )
    }

    /// Per-flow bandwidth over interval end time, with the link capacity
    /// drawn as a reference when configured.
    pub fn bandwidth_chart(&self, title: Option<&str>) -> Option<ChartSpec> {
        if self.flows.iter().all(|f| f.series.is_empty()) {
            return None;
        }
        let mut chart = ChartSpec::new(
            title.unwrap_or("Flow Bandwidth"),
            "Time (s)",
            "Bandwidth (Mbps)",
        );
        for flow in &self.flows {
            chart = chart.with_series(ChartSeries::from_columns(
                flow.label.clone(),
                &flow.series.times(),
                &flow.series.bandwidths(),
            ));
        }
        if let Some(capacity) = self.config.link_capacity_mbps {
            chart = chart
                .with_reference(format!("{capacity} Mbps Limit"), capacity)
                .with_y_range(0.0, capacity * CAPACITY_MARGIN);
        }
        Some(chart)
    }

    /// Scorecard as printable lines: one mean per flow, then the total and
    /// the fairness index.
    pub fn scorecard_lines(&self) -> Vec<String> {
        let Some(scorecard) = &self.scorecard else {
            return Vec::new();
        };
        let mut lines: Vec<String> = self
            .flows
            .iter()
            .map(|flow| {
                let mean = scorecard
                    .per_flow_mean
                    .get(&flow.series.flow)
                    .copied()
                    .unwrap_or_default();
                format!("{} average: {mean:.2} Mbps", flow.label)
            })
            .collect();
        lines.push(format!("Total throughput: {:.2} Mbps", scorecard.aggregate));
        lines.push(format!(
            "Jain's fairness index: {:.4}",
            scorecard.fairness_index
        ));
        lines
    }

    /// Console summary: the cwnd outcome, a notice when no flow produced any
    /// interval, then the scorecard.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        match &self.cwnd {
            CwndOutcome::NotRequested => {}
            CwndOutcome::Unreadable { error } => {
                lines.push(format!("[ERROR] No valid cwnd data: {error}"));
            }
            CwndOutcome::Reduced(r) if r.is_empty() => {
                lines.push("[ERROR] No valid cwnd data in the experiment window".to_string());
            }
            CwndOutcome::Reduced(r) => lines.push(format!(
                "cwnd: {} sample(s) kept of {} line(s)",
                r.stats.kept, r.stats.lines
            )),
        }
        if !self.flows.is_empty() && self.flows.iter().all(|f| f.series.is_empty()) {
            lines.push("[ERROR] No valid bandwidth data".to_string());
        }
        lines.extend(self.scorecard_lines());
        lines
    }

    pub fn to_json(&self) -> Result<String, AnalysisError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json(&self, path: &Path) -> Result<(), AnalysisError> {
        fs::write(path, self.to_json()?).map_err(|source| AnalysisError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Report saved to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("cwnd-lab-{}-{name}", std::process::id()));
        fs::write(&path, content).unwrap();
        path
    }

    fn interval_log(values: &[f64]) -> String {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                format!(
                    "[  5]   {}.00-{}.00   sec  1.00 MBytes  {v} Mbits/sec\n",
                    i,
                    i + 1
                )
            })
            .collect()
    }

    #[test]
    fn full_analysis() {
        let samples = temp_file("full.log", "1000.000,10,12\n1000.100,8\n1000.200,NaN\n1000.300,5,9,7\n");
        let flow1 = temp_file("full-c1.log", &interval_log(&[70.0, 50.0]));
        let flow2 = temp_file("full-c2.log", &interval_log(&[40.0, 40.0]));

        let request = AnalysisRequest {
            name: Some("two-flows".into()),
            cwnd: Some((samples.clone(), AnalysisWindow::new(1000.0, 1000.25))),
            flows: vec![
                FlowInput::new("flow1", &flow1).with_label("Cubic"),
                FlowInput::new("flow2", &flow2),
            ],
            config: LabConfig {
                link_capacity_mbps: Some(100.0),
                ..Default::default()
            },
        };
        let report = analyze(&request);
        for p in [samples, flow1, flow2] {
            fs::remove_file(p).ok();
        }

        assert_eq!(report.cwnd.reduction().unwrap().records.len(), 1);
        assert_eq!(
            report.scorecard_lines(),
            vec![
                "Cubic average: 60.00 Mbps",
                "flow2 average: 40.00 Mbps",
                "Total throughput: 100.00 Mbps",
                "Jain's fairness index: 0.9615",
            ]
        );

        let bw = report.bandwidth_chart(None).unwrap();
        assert_eq!(bw.series.len(), 2);
        assert_eq!(bw.series[0].label, "Cubic");
        assert_eq!(bw.reference_lines[0].y, 100.0);
        assert_eq!(bw.y_range, Some((0.0, 105.0)));
        assert!(report.cwnd_chart(Some("cwnd")).is_some());

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["cwnd"]["status"], "reduced");
        assert_eq!(json["flows"][1]["series"]["flow"], "flow2");
    }

    #[test]
    fn missing_inputs_are_recorded_not_fatal() {
        let request = AnalysisRequest {
            cwnd: Some(("/nonexistent/cwnd.log".into(), AnalysisWindow::new(0.0, 1.0))),
            flows: vec![FlowInput::new("flow1", "/nonexistent/client1.log")],
            ..Default::default()
        };
        let report = analyze(&request);
        assert!(matches!(report.cwnd, CwndOutcome::Unreadable { .. }));
        assert!(report.flows[0].error.is_some());
        assert_eq!(report.scorecard.as_ref().unwrap().fairness_index, 0.0);
        assert!(report.cwnd_chart(None).is_none());
        assert!(report.bandwidth_chart(None).is_none());
    }

    #[test]
    fn zero_byte_inputs_are_reported_empty() {
        let samples = temp_file("blank.log", "");
        let flow1 = temp_file("blank-c1.log", "");
        let request = AnalysisRequest {
            cwnd: Some((samples.clone(), AnalysisWindow::new(0.0, 1.0))),
            flows: vec![FlowInput::new("flow1", &flow1)],
            ..Default::default()
        };
        let report = analyze(&request);
        for p in [samples, flow1] {
            fs::remove_file(p).ok();
        }

        let CwndOutcome::Unreadable { error } = &report.cwnd else {
            panic!("expected unreadable cwnd outcome, got {:?}", report.cwnd);
        };
        assert!(error.ends_with("is empty"));
        assert!(report.flows[0].error.as_deref().unwrap().ends_with("is empty"));
    }

    #[test]
    fn summary_flags_missing_data() {
        let samples = temp_file("summary.log", "1000.000,NaN\n");
        let request = AnalysisRequest {
            cwnd: Some((samples.clone(), AnalysisWindow::new(1000.0, 1001.0))),
            flows: vec![FlowInput::new("flow1", "/nonexistent/client1.log")],
            ..Default::default()
        };
        let report = analyze(&request);
        fs::remove_file(samples).ok();

        let lines = report.summary_lines();
        assert_eq!(lines[0], "[ERROR] No valid cwnd data in the experiment window");
        assert_eq!(lines[1], "[ERROR] No valid bandwidth data");
        assert_eq!(lines[2], "flow1 average: 0.00 Mbps");

        let unreadable = analyze(&AnalysisRequest {
            cwnd: Some(("/nonexistent/cwnd.log".into(), AnalysisWindow::new(0.0, 1.0))),
            ..Default::default()
        });
        let lines = unreadable.summary_lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("[ERROR] No valid cwnd data: "));
    }

    #[test]
    fn no_flows_no_scorecard() {
        let report = analyze(&AnalysisRequest::default());
        assert_eq!(report.cwnd, CwndOutcome::NotRequested);
        assert!(report.scorecard.is_none());
        assert!(report.scorecard_lines().is_empty());
        assert!(report.summary_lines().is_empty());
    }
}
