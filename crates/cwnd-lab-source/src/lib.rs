mod scripted;
pub mod spec;
mod ss;

use anyhow::{Context, Result};
use cwnd_lab_abstract::{Connection, ConnectionQuery, SampleSource, SourceError};
use std::fs;
use std::path::PathBuf;

pub use scripted::{Frame, ScriptedSource};
pub use ss::{SsSource, parse_ss_output};

/// Describes how to obtain a sample source.
#[derive(Debug, Clone)]
pub enum SourceDescriptor {
    /// Live kernel state via `ss`, optionally at a non-default path.
    Ss { binary: Option<PathBuf> },
    /// Frames replayed from a script file.
    Replay { script: PathBuf },
}

/// Any of the built-in sources behind one concrete type.
#[derive(Debug, Clone)]
pub enum AnySource {
    Ss(SsSource),
    Scripted(ScriptedSource),
}

impl SampleSource for AnySource {
    async fn established(
        &mut self,
        query: &ConnectionQuery,
    ) -> Result<Vec<Connection>, SourceError> {
        match self {
            AnySource::Ss(source) => source.established(query).await,
            AnySource::Scripted(source) => source.established(query).await,
        }
    }
}

pub fn load(descriptor: SourceDescriptor) -> Result<AnySource> {
    match descriptor {
        SourceDescriptor::Ss { binary } => Ok(AnySource::Ss(
            binary.map(SsSource::new).unwrap_or_default(),
        )),
        SourceDescriptor::Replay { script } => {
            let content = fs::read_to_string(&script)
                .with_context(|| format!("Failed to read replay script {}", script.display()))?;
            let source = ScriptedSource::from_script(&content)
                .with_context(|| format!("Failed to parse replay script {}", script.display()))?;
            Ok(AnySource::Scripted(source))
        }
    }
}
