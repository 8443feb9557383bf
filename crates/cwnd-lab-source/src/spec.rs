use anyhow::{Context, Result};
use cwnd_lab_abstract::Destination;
use std::path::PathBuf;

use crate::SourceDescriptor;

/// Parse a source spec: `ss`, `ss:/sbin/ss` or `replay:/path/to/script`.
pub fn parse_source_spec(spec: &str) -> Result<SourceDescriptor> {
    match spec.split_once(':') {
        None if spec == "ss" => Ok(SourceDescriptor::Ss { binary: None }),
        Some(("ss", path)) if !path.is_empty() => Ok(SourceDescriptor::Ss {
            binary: Some(PathBuf::from(path)),
        }),
        Some(("replay", path)) if !path.is_empty() => Ok(SourceDescriptor::Replay {
            script: PathBuf::from(path),
        }),
        _ => anyhow::bail!("Unknown sample source '{spec}'. Try 'ss' or 'replay:<file>'."),
    }
}

/// Parse a destination of the form `addr` or `addr:port`.
pub fn parse_destination(spec: &str) -> Result<Destination> {
    spec.parse()
        .with_context(|| format!("Destination should look like 10.0.0.3 or 10.0.0.3:5201, got {spec:?}"))
}
