use crate::config::{LabConfig, LabConfigOverride};
use crate::interface::Destination;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// An experiment description loaded from TOML.
///
/// ```toml
/// name = "cubic-vs-reno"
/// description = "Two flows sharing a 100 Mbps bottleneck"
/// destination = "10.0.0.3:5201"
/// duration_secs = 15.0
/// sample_log = "/tmp/cwnd.log"
///
/// [config]
/// link_capacity_mbps = 100.0
///
/// [[flows]]
/// id = "flow1"
/// label = "Cubic (h1->h3)"
/// command = ["iperf3", "-c", "10.0.0.3", "-p", "5201", "-t", "15", "-C", "cubic"]
/// log = "/tmp/client1.log"
/// ```
#[derive(Deserialize, Debug, Clone)]
pub struct ExperimentScenario {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Where the measured connections go; no cwnd sampling when absent.
    pub destination: Option<String>,
    pub duration_secs: f64,
    /// Time between starting the sampler and starting the traffic.
    #[serde(default = "default_settle_secs")]
    pub settle_secs: f64,
    pub sample_log: Option<PathBuf>,
    #[serde(default)]
    pub config: LabConfigOverride,
    #[serde(default)]
    pub flows: Vec<FlowSpec>,
    #[serde(default)]
    pub charts: ChartOutputs,
}

#[derive(Deserialize, Debug, Clone)]
pub struct FlowSpec {
    pub id: String,
    pub label: Option<String>,
    /// Traffic generator argv, launched when the experiment starts.
    #[serde(default)]
    pub command: Vec<String>,
    /// Interval bandwidth log written by the generator.
    pub log: Option<PathBuf>,
}

impl FlowSpec {
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ChartOutputs {
    pub cwnd: Option<PathBuf>,
    pub bandwidth: Option<PathBuf>,
    pub title: Option<String>,
}

fn default_settle_secs() -> f64 {
    2.0
}

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("failed to read scenario file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse scenario file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid scenario: {0}")]
    Invalid(String),
}

impl ExperimentScenario {
    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let content = fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ScenarioError> {
        let scenario: Self = toml::from_str(content)?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn validate(&self) -> Result<(), ScenarioError> {
        if self.duration_secs.is_nan() || self.duration_secs <= 0.0 {
            return Err(ScenarioError::Invalid(format!(
                "duration_secs must be positive, got {}",
                self.duration_secs
            )));
        }
        if self.settle_secs < 0.0 {
            return Err(ScenarioError::Invalid("settle_secs must not be negative".into()));
        }
        if self.destination.is_some() != self.sample_log.is_some() {
            return Err(ScenarioError::Invalid(
                "destination and sample_log must be given together".into(),
            ));
        }
        self.destination()?;
        self.lab_config()
            .validate()
            .map_err(|e| ScenarioError::Invalid(format!("[config] {e}")))?;
        for (idx, flow) in self.flows.iter().enumerate() {
            if self.flows[..idx].iter().any(|f| f.id == flow.id) {
                return Err(ScenarioError::Invalid(format!("duplicate flow id {:?}", flow.id)));
            }
        }
        Ok(())
    }

    pub fn destination(&self) -> Result<Option<Destination>, ScenarioError> {
        self.destination
            .as_deref()
            .map(|d| d.parse().map_err(|e| ScenarioError::Invalid(format!("{e}"))))
            .transpose()
    }

    pub fn lab_config(&self) -> LabConfig {
        let mut config = LabConfig::default();
        self.config.apply_to(&mut config);
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_FLOWS: &str = r#"
        name = "cubic-vs-reno"
        duration_secs = 15.0

        [config]
        link_capacity_mbps = 100.0

        [[flows]]
        id = "flow1"
        label = "Cubic (h1->h3)"
        command = ["iperf3", "-c", "10.0.0.3", "-p", "5201"]
        log = "/tmp/client1.log"

        [[flows]]
        id = "flow2"
        log = "/tmp/client2.log"
    "#;

    #[test]
    fn loads_two_flow_scenario() {
        let scenario = ExperimentScenario::from_toml(TWO_FLOWS).unwrap();
        assert_eq!(scenario.flows.len(), 2);
        assert_eq!(scenario.flows[0].label(), "Cubic (h1->h3)");
        assert_eq!(scenario.flows[1].label(), "flow2");
        assert_eq!(scenario.settle_secs, 2.0);
        assert_eq!(scenario.lab_config().link_capacity_mbps, Some(100.0));
        assert!(scenario.destination().unwrap().is_none());
    }

    #[test]
    fn rejects_bad_scenarios() {
        let no_duration = r#"
            name = "x"
            duration_secs = 0.0
        "#;
        assert!(matches!(
            ExperimentScenario::from_toml(no_duration),
            Err(ScenarioError::Invalid(_))
        ));

        let half_sampling = r#"
            name = "x"
            duration_secs = 5.0
            destination = "10.0.0.3:5201"
        "#;
        assert!(matches!(
            ExperimentScenario::from_toml(half_sampling),
            Err(ScenarioError::Invalid(_))
        ));

        let duplicate = r#"
            name = "x"
            duration_secs = 5.0
            [[flows]]
            id = "a"
            [[flows]]
            id = "a"
        "#;
        assert!(ExperimentScenario::from_toml(duplicate).is_err());

        let no_flows = r#"
            name = "x"
            duration_secs = 5.0
            [config]
            max_flows = 0
        "#;
        assert!(matches!(
            ExperimentScenario::from_toml(no_flows),
            Err(ScenarioError::Invalid(msg)) if msg.contains("max_flows")
        ));
    }
}
