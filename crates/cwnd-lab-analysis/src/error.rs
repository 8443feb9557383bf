use cwnd_lab_abstract::RenderError;
use std::path::PathBuf;
use thiserror::Error;

/// Failures that stop an input from being analyzed at all. Bad lines inside
/// a readable file are never errors.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} is empty")]
    EmptyInput { path: PathBuf },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Render(#[from] RenderError),
}
