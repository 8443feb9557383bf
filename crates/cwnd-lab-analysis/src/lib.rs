//! Offline analysis of one experiment: cwnd sample reduction, interval
//! bandwidth parsing, fairness scoring and chart rendering.

pub mod bandwidth;
pub mod error;
pub mod fairness;
pub mod reducer;
pub mod render;
pub mod report;
#[cfg(feature = "tui")]
pub mod tui;

pub use error::AnalysisError;
pub use reducer::{Reducer, Reduction, ReductionStats};
pub use render::PngRenderer;
pub use report::{AnalysisReport, AnalysisRequest, CwndOutcome, FlowInput, FlowReport, analyze};
