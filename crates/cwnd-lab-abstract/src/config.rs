use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_flows must be at least 1")]
    NoFlows,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabConfig {
    /// Sampler polling period.
    pub sample_interval_ms: u64,
    /// Declared maximum number of concurrent data flows per sample row.
    pub max_flows: usize,
    /// Rows with fewer valid cwnd values than this are dropped by the reducer.
    pub min_valid_values: usize,
    /// Nominal bottleneck capacity, drawn as a reference line.
    pub link_capacity_mbps: Option<f64>,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 100,
            max_flows: 10,
            min_valid_values: 2,
            link_capacity_mbps: None,
        }
    }
}

impl LabConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms.max(1))
    }

    /// A row must be allowed at least one cwnd field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_flows == 0 {
            return Err(ConfigError::NoFlows);
        }
        Ok(())
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct LabConfigOverride {
    pub sample_interval_ms: Option<u64>,
    pub max_flows: Option<usize>,
    pub min_valid_values: Option<usize>,
    pub link_capacity_mbps: Option<f64>,
}

impl LabConfigOverride {
    pub fn apply_to(&self, config: &mut LabConfig) {
        if let Some(v) = self.sample_interval_ms {
            config.sample_interval_ms = v;
        }
        if let Some(v) = self.max_flows {
            config.max_flows = v;
        }
        if let Some(v) = self.min_valid_values {
            config.min_valid_values = v;
        }
        if let Some(v) = self.link_capacity_mbps {
            config.link_capacity_mbps = Some(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_only_touches_given_fields() {
        let mut config = LabConfig::default();
        LabConfigOverride {
            min_valid_values: Some(1),
            link_capacity_mbps: Some(100.0),
            ..Default::default()
        }
        .apply_to(&mut config);
        assert_eq!(config.min_valid_values, 1);
        assert_eq!(config.link_capacity_mbps, Some(100.0));
        assert_eq!(config.sample_interval(), Duration::from_millis(100));
        assert_eq!(config.max_flows, 10);
    }

    #[test]
    fn zero_max_flows_is_rejected() {
        assert_eq!(LabConfig::default().validate(), Ok(()));
        let mut config = LabConfig::default();
        LabConfigOverride {
            max_flows: Some(0),
            ..Default::default()
        }
        .apply_to(&mut config);
        assert_eq!(config.validate(), Err(ConfigError::NoFlows));
    }
}
