pub mod chart;
pub mod config;
pub mod interface;
pub mod model;
pub mod scenario;

pub use chart::{ChartSeries, ChartSpec, ReferenceLine, RenderError, Renderer};
pub use config::{ConfigError, LabConfig, LabConfigOverride};
pub use interface::{Connection, ConnectionQuery, Destination, SampleSource, SourceError};
pub use model::{
    AnalysisWindow, CwndRecord, FairnessResult, FlowSeries, IntervalRecord, LineError, Sample,
};
pub use scenario::{ChartOutputs, ExperimentScenario, FlowSpec, ScenarioError};
