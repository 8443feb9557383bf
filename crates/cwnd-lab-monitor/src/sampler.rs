use cwnd_lab_abstract::{ConnectionQuery, Destination, LabConfig, Sample, SampleSource, SourceError};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Counters reported when the sampler stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SamplerStats {
    pub ticks: u64,
    /// Ticks that produced no cwnd value.
    pub empty_ticks: u64,
    pub failed_queries: u64,
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("failed to open sample log {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to append to sample log: {0}")]
    Write(#[from] std::io::Error),
    #[error("sampler task ended abnormally: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Polls a [`SampleSource`] for the congestion windows of the data
/// connections to one destination.
pub struct Sampler<S> {
    source: S,
    destination: Destination,
    interval: Duration,
    max_flows: usize,
    stats: SamplerStats,
    warned_overflow: bool,
}

impl<S: SampleSource> Sampler<S> {
    pub fn new(source: S, destination: Destination, config: &LabConfig) -> Self {
        Self {
            source,
            destination,
            interval: config.sample_interval(),
            max_flows: config.max_flows,
            stats: SamplerStats::default(),
            warned_overflow: false,
        }
    }

    pub fn stats(&self) -> SamplerStats {
        self.stats
    }

    /// Take one sample. Never fails: a missing clock yields a `None`
    /// timestamp and a failed query yields an empty value list.
    pub async fn tick(&mut self) -> Sample {
        let timestamp = wall_clock_secs();
        let values = match self.data_cwnds().await {
            Ok(values) => values,
            Err(e) => {
                self.stats.failed_queries += 1;
                debug!("cwnd query for {} failed: {e}", self.destination);
                Vec::new()
            }
        };

        self.stats.ticks += 1;
        if values.is_empty() {
            self.stats.empty_ticks += 1;
        }
        Sample::new(timestamp, values)
    }

    /// Two-phase lookup: list everything to the destination, take the first
    /// connection as the control channel, then list again without it.
    async fn data_cwnds(&mut self) -> Result<Vec<u64>, SourceError> {
        let all = self
            .source
            .established(&ConnectionQuery::all(self.destination))
            .await?;
        let Some(control) = all.first() else {
            return Ok(Vec::new());
        };

        let data = self
            .source
            .established(&ConnectionQuery::excluding(
                self.destination,
                control.local_port,
            ))
            .await?;

        let mut values: Vec<u64> = data.iter().filter_map(|c| c.cwnd).collect();
        if values.len() > self.max_flows {
            if !self.warned_overflow {
                warn!(
                    "{} data connections to {}, keeping the first {}",
                    values.len(),
                    self.destination,
                    self.max_flows
                );
                self.warned_overflow = true;
            }
            values.truncate(self.max_flows);
        }
        Ok(values)
    }

    /// Sample at a fixed period and append one line per tick to `out` until
    /// `cancel` fires.
    ///
    /// Cancellation is only observed while waiting for the next tick or for
    /// the source; a line that has started being written is always finished.
    pub async fn run<W>(
        &mut self,
        out: &mut W,
        cancel: CancellationToken,
    ) -> Result<SamplerStats, MonitorError>
    where
        W: AsyncWrite + Unpin,
    {
        info!(
            "Sampling cwnd to {} every {:?}",
            self.destination, self.interval
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let sample = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                sample = self.tick() => sample,
            };

            let mut line = sample.to_line();
            line.push('\n');
            out.write_all(line.as_bytes()).await?;
            out.flush().await?;
        }

        info!(
            "Sampler stopped after {} ticks ({} without data, {} failed queries)",
            self.stats.ticks, self.stats.empty_ticks, self.stats.failed_queries
        );
        Ok(self.stats)
    }
}

/// Wall-clock seconds since the epoch, truncated to milliseconds.
fn wall_clock_secs() -> Option<f64> {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => Some(d.as_millis() as f64 / 1000.0),
        Err(e) => {
            warn!("system clock before the epoch: {e}");
            None
        }
    }
}

/// A sampler running as a background task.
pub struct SamplerHandle {
    cancel: CancellationToken,
    task: JoinHandle<Result<SamplerStats, MonitorError>>,
}

impl SamplerHandle {
    /// Cancel the loop and wait for the last line to be written.
    pub async fn stop(self) -> Result<SamplerStats, MonitorError> {
        self.cancel.cancel();
        self.task.await?
    }
}

/// Truncate `path` and start sampling into it on a background task.
pub async fn spawn_to_file<S>(
    mut sampler: Sampler<S>,
    path: &Path,
) -> Result<SamplerHandle, MonitorError>
where
    S: SampleSource + 'static,
{
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|source| MonitorError::Open {
            path: path.to_path_buf(),
            source,
        })?;
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();
    let task = tokio::spawn(async move { sampler.run(&mut file, task_cancel).await });
    Ok(SamplerHandle { cancel, task })
}
