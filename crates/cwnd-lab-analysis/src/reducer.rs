use crate::error::AnalysisError;
use cwnd_lab_abstract::{AnalysisWindow, CwndRecord, LabConfig, LineError, Sample};
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Rows shown at each end of the reduced series in debug output.
const DEBUG_HEAD_TAIL: usize = 10;

/// What happened to the lines of one sample log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReductionStats {
    pub lines: usize,
    pub malformed: usize,
    /// Rows with too few valid cwnd values.
    pub insufficient: usize,
    pub out_of_window: usize,
    pub kept: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Reduction {
    pub records: Vec<CwndRecord>,
    pub stats: ReductionStats,
}

impl Reduction {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn points(&self) -> Vec<(f64, f64)> {
        self.records
            .iter()
            .map(|r| (r.relative_time, r.cwnd as f64))
            .collect()
    }
}

/// Turns the sampler's raw log into one cwnd value per timestamp.
#[derive(Debug, Clone, Copy)]
pub struct Reducer {
    max_flows: usize,
    min_valid_values: usize,
}

impl Reducer {
    pub fn new(config: &LabConfig) -> Self {
        Self {
            max_flows: config.max_flows,
            min_valid_values: config.min_valid_values.max(1),
        }
    }

    /// Representative cwnd of one row: the largest value, provided at least
    /// `min_valid_values` values are present.
    pub fn reduce_sample(&self, sample: &Sample) -> Option<u64> {
        let mut count = 0;
        let mut max = 0;
        for value in sample.valid_values() {
            count += 1;
            max = max.max(value);
        }
        (count >= self.min_valid_values).then_some(max)
    }

    pub fn reduce_lines<'a, I>(&self, lines: I, window: AnalysisWindow) -> Reduction
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut stats = ReductionStats::default();
        let mut rows: Vec<(f64, u64)> = Vec::new();

        for (idx, line) in lines.into_iter().enumerate() {
            let sample = match Sample::parse_line(line, self.max_flows) {
                Ok(sample) => sample,
                Err(LineError::Empty) => continue,
                Err(e) => {
                    stats.lines += 1;
                    stats.malformed += 1;
                    debug!("skipping sample line {}: {e}", idx + 1);
                    continue;
                }
            };
            stats.lines += 1;

            let Some(timestamp) = sample.timestamp else {
                stats.malformed += 1;
                debug!("skipping sample line {}: missing timestamp", idx + 1);
                continue;
            };
            let Some(cwnd) = self.reduce_sample(&sample) else {
                stats.insufficient += 1;
                continue;
            };
            if !window.contains(timestamp) {
                stats.out_of_window += 1;
                continue;
            }
            rows.push((timestamp, cwnd));
        }

        rows.sort_by(|a, b| a.0.total_cmp(&b.0));
        let records: Vec<CwndRecord> = rows
            .into_iter()
            .map(|(timestamp, cwnd)| CwndRecord {
                relative_time: timestamp - window.start,
                cwnd,
            })
            .collect();
        stats.kept = records.len();

        if stats.malformed > 0 {
            warn!("skipped {} malformed sample line(s)", stats.malformed);
        }
        log_head_tail(&records);

        Reduction { records, stats }
    }

    /// Read and reduce a sample log. An unreadable or zero-byte file is an
    /// error; a reduction that keeps nothing is a valid result.
    pub fn reduce_file(
        &self,
        path: &Path,
        window: AnalysisWindow,
    ) -> Result<Reduction, AnalysisError> {
        let bytes = fs::read(path).map_err(|source| AnalysisError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if bytes.is_empty() {
            return Err(AnalysisError::EmptyInput {
                path: path.to_path_buf(),
            });
        }
        let text = String::from_utf8_lossy(&bytes);
        let reduction = self.reduce_lines(text.lines(), window);
        info!(
            "{}: {} line(s), kept {} within {window} ({} malformed, {} with < {} values, {} outside window)",
            path.display(),
            reduction.stats.lines,
            reduction.stats.kept,
            reduction.stats.malformed,
            reduction.stats.insufficient,
            self.min_valid_values,
            reduction.stats.out_of_window,
        );
        Ok(reduction)
    }
}

fn log_head_tail(records: &[CwndRecord]) {
    if records.is_empty() {
        return;
    }
    for r in records.iter().take(DEBUG_HEAD_TAIL) {
        debug!("head  t={:>8.3}s cwnd={}", r.relative_time, r.cwnd);
    }
    if records.len() > DEBUG_HEAD_TAIL {
        let tail = records.len().saturating_sub(DEBUG_HEAD_TAIL).max(DEBUG_HEAD_TAIL);
        for r in &records[tail..] {
            debug!("tail  t={:>8.3}s cwnd={}", r.relative_time, r.cwnd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reducer() -> Reducer {
        Reducer::new(&LabConfig::default())
    }

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    #[test]
    fn end_to_end_window_example() {
        let lines = ["1000.000,10,12", "1000.100,8", "1000.200,NaN", "1000.300,5,9,7"];
        let reduction = reducer().reduce_lines(lines, AnalysisWindow::new(1000.0, 1000.25));
        assert_eq!(reduction.records.len(), 1);
        assert_close(reduction.records[0].relative_time, 0.0);
        assert_eq!(reduction.records[0].cwnd, 12);
        assert_eq!(
            reduction.stats,
            ReductionStats {
                lines: 4,
                malformed: 0,
                insufficient: 2,
                out_of_window: 1,
                kept: 1,
            }
        );
    }

    #[test]
    fn max_of_concurrent_values() {
        let sample = Sample::parse_line("1.0,5,NaN,9,7", 10).unwrap();
        assert_eq!(reducer().reduce_sample(&sample), Some(9));
        let single = Sample::parse_line("1.0,42", 10).unwrap();
        assert_eq!(reducer().reduce_sample(&single), None);
    }

    #[test]
    fn single_flow_mode_keeps_lone_values() {
        let config = LabConfig {
            min_valid_values: 1,
            ..Default::default()
        };
        let reduction = Reducer::new(&config)
            .reduce_lines(["10.0,8", "10.1,NaN"], AnalysisWindow::new(10.0, 11.0));
        assert_eq!(reduction.records.len(), 1);
        assert_eq!(reduction.records[0].cwnd, 8);
    }

    #[test]
    fn output_is_sorted_and_relative() {
        let lines = [
            "1000.300,5,6",
            "1000.100,9,3",
            "bogus",
            "",
            "1000.200,1,x",
            "1000.100,4,4",
            "NaN,1,2",
            "1000.000,1,2,3,4,5,6,7,8,9,10,11",
        ];
        let window = AnalysisWindow::new(1000.0, 1001.0);
        let reduction = reducer().reduce_lines(lines, window);

        assert_eq!(reduction.stats.malformed, 4);
        assert_eq!(reduction.stats.lines, 7);
        let times: Vec<f64> = reduction.records.iter().map(|r| r.relative_time).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(
            reduction.records.iter().map(|r| r.cwnd).collect::<Vec<_>>(),
            vec![9, 4, 6]
        );
        assert_close(times[0], 0.1);
        assert_close(times[2], 0.3);
    }

    #[test]
    fn empty_result_is_not_an_error() {
        let path = std::env::temp_dir().join(format!("cwnd-lab-reduce-{}.log", std::process::id()));
        std::fs::write(&path, "1000.000,NaN\n1000.100,7\n").unwrap();
        let reduction = reducer()
            .reduce_file(&path, AnalysisWindow::new(1000.0, 1001.0))
            .unwrap();
        std::fs::remove_file(&path).ok();
        assert!(reduction.is_empty());
        assert_eq!(reduction.stats.insufficient, 2);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = reducer()
            .reduce_file(Path::new("/nonexistent/cwnd.log"), AnalysisWindow::new(0.0, 1.0))
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Read { .. }));
    }

    #[test]
    fn zero_byte_log_is_an_error() {
        let path = std::env::temp_dir().join(format!("cwnd-lab-reduce-empty-{}.log", std::process::id()));
        std::fs::write(&path, "").unwrap();
        let err = reducer()
            .reduce_file(&path, AnalysisWindow::new(0.0, 1.0))
            .unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, AnalysisError::EmptyInput { .. }));
    }
}
