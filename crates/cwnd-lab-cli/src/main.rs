use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::process::{Child, Command};
use tracing::{info, warn};

use cwnd_lab_abstract::{AnalysisWindow, ExperimentScenario, LabConfig, Renderer};
use cwnd_lab_analysis::tui::{MemoryLogBuffer, ReportViewer};
use cwnd_lab_analysis::{AnalysisReport, AnalysisRequest, FlowInput, PngRenderer, analyze};
use cwnd_lab_monitor::{Sampler, SamplerHandle, spawn_to_file};
use cwnd_lab_source::spec::{parse_destination, parse_source_spec};

#[derive(Parser, Debug)]
#[command(author, version, about = "TCP congestion window sampling and fairness analysis")]
struct Cli {
    /// Show the finished analysis in the terminal UI.
    #[arg(long, global = true, default_value_t = false)]
    tui: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sample data-connection cwnd values into a log until stopped.
    Sample(SampleArgs),
    /// Reduce a sample log and score interval bandwidth logs.
    Analyze(AnalyzeArgs),
    /// Run a whole experiment described by a scenario file.
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct SampleArgs {
    /// Destination of the measured connections, e.g. 10.0.0.3:5201.
    #[arg(long)]
    dest: String,

    /// Sample log to write (truncated first).
    #[arg(long)]
    out: PathBuf,

    /// `ss`, `ss:<path>` or `replay:<script>`.
    #[arg(long, default_value = "ss")]
    source: String,

    #[arg(long)]
    interval_ms: Option<u64>,

    #[arg(long)]
    max_flows: Option<usize>,

    /// Stop after this many seconds instead of waiting for Ctrl-C.
    #[arg(long)]
    duration_secs: Option<f64>,
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    /// Raw sample log written by `sample`.
    #[arg(long, requires = "start")]
    samples: Option<PathBuf>,

    /// Experiment start, seconds since the epoch.
    #[arg(long)]
    start: Option<f64>,

    /// Experiment end, seconds since the epoch.
    #[arg(long, conflicts_with = "duration_secs")]
    end: Option<f64>,

    /// Experiment length; the window ends at start + duration.
    #[arg(long)]
    duration_secs: Option<f64>,

    /// Interval bandwidth log as `ID=PATH` or `ID:LABEL=PATH`; repeatable.
    #[arg(long = "flow", value_parser = parse_flow)]
    flows: Vec<FlowInput>,

    #[arg(long)]
    max_flows: Option<usize>,

    /// Minimum valid cwnd values per sample row (1 for single-flow runs).
    #[arg(long)]
    min_valid_values: Option<usize>,

    /// Link capacity in Mbps, drawn as a reference line.
    #[arg(long)]
    capacity_mbps: Option<f64>,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args, Debug)]
struct RunArgs {
    scenario: PathBuf,

    /// `ss`, `ss:<path>` or `replay:<script>`.
    #[arg(long, default_value = "ss")]
    source: String,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args, Debug)]
struct OutputArgs {
    #[arg(long)]
    cwnd_chart: Option<PathBuf>,

    #[arg(long)]
    bandwidth_chart: Option<PathBuf>,

    #[arg(long)]
    title: Option<String>,

    /// Write the full analysis report as JSON.
    #[arg(long)]
    report_out: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_buffer = init_logging(cli.tui);
    info!("cwnd-lab starting…");

    match cli.command {
        Commands::Sample(args) => run_sample(args).await,
        Commands::Analyze(args) => {
            let request = args.request()?;
            let report = analyze(&request);
            finish(&report, &args.output, log_buffer)
        }
        Commands::Run(args) => {
            let scenario = ExperimentScenario::load(&args.scenario)?;
            let report = run_experiment(&scenario, &args.source).await?;
            let output = args.output.or_scenario(&scenario);
            finish(&report, &output, log_buffer)
        }
    }
}

fn init_logging(use_tui: bool) -> Option<MemoryLogBuffer> {
    if use_tui {
        let buffer = MemoryLogBuffer::new();
        let writer = buffer.clone();
        tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .init();
        Some(buffer)
    } else {
        tracing_subscriber::fmt::init();
        None
    }
}

fn parse_flow(spec: &str) -> Result<FlowInput, String> {
    let (name, path) = spec
        .split_once('=')
        .filter(|(name, path)| !name.is_empty() && !path.is_empty())
        .ok_or_else(|| format!("expected ID=PATH or ID:LABEL=PATH, got {spec:?}"))?;
    Ok(match name.split_once(':') {
        Some((id, label)) => FlowInput::new(id, path).with_label(label),
        None => FlowInput::new(name, path),
    })
}

impl AnalyzeArgs {
    fn request(&self) -> Result<AnalysisRequest> {
        let mut config = LabConfig::default();
        if let Some(v) = self.max_flows {
            config.max_flows = v;
        }
        if let Some(v) = self.min_valid_values {
            config.min_valid_values = v;
        }
        config.link_capacity_mbps = self.capacity_mbps;
        config.validate()?;

        let cwnd = match (&self.samples, self.start) {
            (Some(path), Some(start)) => {
                let window = match (self.end, self.duration_secs) {
                    (Some(end), _) => AnalysisWindow::new(start, end),
                    (None, Some(duration)) => AnalysisWindow::from_duration(start, duration),
                    (None, None) => anyhow::bail!("--samples needs --end or --duration-secs"),
                };
                if window.end < window.start {
                    anyhow::bail!("analysis window {window} ends before it starts");
                }
                Some((path.clone(), window))
            }
            _ => None,
        };

        if cwnd.is_none() && self.flows.is_empty() {
            anyhow::bail!("nothing to analyze: give --samples and/or --flow");
        }

        Ok(AnalysisRequest {
            name: None,
            cwnd,
            flows: self.flows.clone(),
            config,
        })
    }
}

impl OutputArgs {
    /// Flags win; chart paths and title fall back to the scenario's.
    fn or_scenario(self, scenario: &ExperimentScenario) -> Self {
        Self {
            cwnd_chart: self.cwnd_chart.or_else(|| scenario.charts.cwnd.clone()),
            bandwidth_chart: self
                .bandwidth_chart
                .or_else(|| scenario.charts.bandwidth.clone()),
            title: self.title.or_else(|| scenario.charts.title.clone()),
            report_out: self.report_out,
        }
    }
}

async fn run_sample(args: SampleArgs) -> Result<()> {
    let destination = parse_destination(&args.dest)?;
    let mut config = LabConfig::default();
    if let Some(v) = args.interval_ms {
        config.sample_interval_ms = v;
    }
    if let Some(v) = args.max_flows {
        config.max_flows = v;
    }
    config.validate()?;

    let source = cwnd_lab_source::load(parse_source_spec(&args.source)?)?;
    ensure_parent(&args.out)?;
    let handle = spawn_to_file(Sampler::new(source, destination, &config), &args.out).await?;

    let limit = async {
        match args.duration_secs {
            Some(secs) => tokio::time::sleep(duration_from_secs(secs)?).await,
            None => std::future::pending::<()>().await,
        }
        Ok::<_, anyhow::Error>(())
    };
    tokio::select! {
        res = limit => res?,
        res = tokio::signal::ctrl_c() => res.context("Failed to listen for Ctrl-C")?,
    }

    let stats = handle.stop().await?;
    info!(
        "Wrote {} sample line(s) to {} ({} without data)",
        stats.ticks,
        args.out.display(),
        stats.empty_ticks
    );
    Ok(())
}

/// Sampler up, settle, traffic, sampler down, then analyze the window
/// `[start, start + duration]`.
async fn run_experiment(scenario: &ExperimentScenario, source_spec: &str) -> Result<AnalysisReport> {
    let config = scenario.lab_config();
    info!("Running experiment '{}'", scenario.name);
    if !scenario.description.is_empty() {
        info!("{}", scenario.description);
    }

    let sampler = match (scenario.destination()?, &scenario.sample_log) {
        (Some(destination), Some(log)) => {
            let source = cwnd_lab_source::load(parse_source_spec(source_spec)?)?;
            ensure_parent(log)?;
            let handle = spawn_to_file(Sampler::new(source, destination, &config), log).await?;
            tokio::time::sleep(duration_from_secs(scenario.settle_secs)?).await;
            Some(handle)
        }
        _ => None,
    };

    let start = unix_now()?;
    let traffic = run_traffic(scenario).await;
    let window = AnalysisWindow::from_duration(start, scenario.duration_secs);
    let stats = match sampler {
        Some(handle) => Some(stop_sampler(handle).await?),
        None => None,
    };
    traffic?;
    if let Some(stats) = stats {
        info!(
            "Sampler took {} sample(s), {} without data, {} failed queries",
            stats.ticks, stats.empty_ticks, stats.failed_queries
        );
    }

    let request = AnalysisRequest {
        name: Some(scenario.name.clone()),
        cwnd: scenario.sample_log.clone().map(|log| (log, window)),
        flows: scenario
            .flows
            .iter()
            .filter_map(|flow| {
                let log = flow.log.as_ref()?;
                Some(FlowInput::new(&flow.id, log).with_label(flow.label()))
            })
            .collect(),
        config,
    };
    Ok(analyze(&request))
}

async fn stop_sampler(handle: SamplerHandle) -> Result<cwnd_lab_monitor::SamplerStats> {
    handle.stop().await.context("Sampler failed")
}

/// Launch every flow command at once and wait for all of them. Without any
/// command the experiment simply lasts `duration_secs`.
async fn run_traffic(scenario: &ExperimentScenario) -> Result<()> {
    let mut children: Vec<(&str, Child)> = Vec::new();
    for flow in &scenario.flows {
        if let Some(child) = spawn_flow(&flow.command, flow.log.as_deref())
            .with_context(|| format!("Failed to start traffic for flow '{}'", flow.id))?
        {
            children.push((flow.id.as_str(), child));
        }
    }

    if children.is_empty() {
        info!(
            "No traffic commands; recording for {:.1} s",
            scenario.duration_secs
        );
        tokio::time::sleep(duration_from_secs(scenario.duration_secs)?).await;
        return Ok(());
    }

    for (id, mut child) in children {
        let status = child
            .wait()
            .await
            .with_context(|| format!("Failed to wait for flow '{id}'"))?;
        if status.success() {
            info!("Flow '{id}' finished");
        } else {
            warn!("Flow '{id}' exited with {status}");
        }
    }
    Ok(())
}

/// The command's stdout goes to `log` when given.
fn spawn_flow(command: &[String], log: Option<&Path>) -> Result<Option<Child>> {
    let Some((program, args)) = command.split_first() else {
        return Ok(None);
    };
    let mut cmd = Command::new(program);
    cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);
    if let Some(path) = log {
        ensure_parent(path)?;
        let file = File::create(path)
            .with_context(|| format!("Failed to create flow log {}", path.display()))?;
        cmd.stdout(Stdio::from(file));
    }
    info!("Starting {}", command.join(" "));
    Ok(Some(cmd.spawn()?))
}

fn finish(
    report: &AnalysisReport,
    output: &OutputArgs,
    log_buffer: Option<MemoryLogBuffer>,
) -> Result<()> {
    let renderer = PngRenderer::default();
    let title = output.title.as_deref();

    if let Some(path) = &output.cwnd_chart {
        match report.cwnd_chart(title) {
            Some(chart) => renderer.render(&chart, path)?,
            None => println!("[ERROR] No valid cwnd data; {} not drawn", path.display()),
        }
    }
    if let Some(path) = &output.bandwidth_chart {
        match report.bandwidth_chart(title) {
            Some(chart) => renderer.render(&chart, path)?,
            None => println!("[ERROR] No valid bandwidth data; {} not drawn", path.display()),
        }
    }
    if let Some(path) = &output.report_out {
        report.write_json(path)?;
    }

    match log_buffer {
        Some(logs) => ReportViewer::new(report.clone(), logs, title).run()?,
        None => print_summary(report),
    }
    Ok(())
}

fn print_summary(report: &AnalysisReport) {
    for line in report.summary_lines() {
        println!("{line}");
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;
    }
    Ok(())
}

fn duration_from_secs(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).with_context(|| format!("Invalid duration {secs} s"))
}

fn unix_now() -> Result<f64> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("System clock is before the epoch")?;
    Ok(now.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("flow1=/tmp/c1.log", "flow1", "flow1", "/tmp/c1.log")]
    #[case("flow2:Reno (h2->h3)=/tmp/c2.log", "flow2", "Reno (h2->h3)", "/tmp/c2.log")]
    fn flow_arguments(
        #[case] spec: &str,
        #[case] id: &str,
        #[case] label: &str,
        #[case] path: &str,
    ) {
        let flow = parse_flow(spec).unwrap();
        assert_eq!(flow.id, id);
        assert_eq!(flow.label, label);
        assert_eq!(flow.log, PathBuf::from(path));
    }

    #[rstest]
    #[case("flow1")]
    #[case("=/tmp/c1.log")]
    #[case("flow1=")]
    fn bad_flow_arguments(#[case] spec: &str) {
        assert!(parse_flow(spec).is_err());
    }

    #[test]
    fn analyze_window_from_duration() {
        let cli = Cli::parse_from([
            "cwnd-lab",
            "analyze",
            "--samples",
            "cwnd.log",
            "--start",
            "1000",
            "--duration-secs",
            "15",
            "--flow",
            "flow1=c1.log",
            "--min-valid-values",
            "1",
        ]);
        let Commands::Analyze(args) = cli.command else {
            panic!("expected analyze");
        };
        let request = args.request().unwrap();
        let (_, window) = request.cwnd.unwrap();
        assert_eq!(window, AnalysisWindow::new(1000.0, 1015.0));
        assert_eq!(request.config.min_valid_values, 1);
        assert_eq!(request.flows.len(), 1);
    }

    #[test]
    fn analyze_needs_inputs() {
        let cli = Cli::parse_from(["cwnd-lab", "analyze"]);
        let Commands::Analyze(args) = cli.command else {
            panic!("expected analyze");
        };
        assert!(args.request().is_err());
    }

    #[test]
    fn analyze_rejects_zero_max_flows() {
        let cli = Cli::parse_from([
            "cwnd-lab",
            "analyze",
            "--flow",
            "flow1=client1.log",
            "--max-flows",
            "0",
        ]);
        let Commands::Analyze(args) = cli.command else {
            panic!("expected analyze");
        };
        let err = args.request().unwrap_err();
        assert!(err.to_string().contains("max_flows"));
    }

    #[tokio::test]
    async fn scenario_without_sampling_or_commands() {
        let dir = std::env::temp_dir();
        let log = dir.join(format!("cwnd-lab-run-{}.log", std::process::id()));
        std::fs::write(&log, "[  5]   0.00-1.00   sec  11.8 MBytes  98.6 Mbits/sec\n").unwrap();
        let scenario = ExperimentScenario::from_toml(&format!(
            r#"
            name = "replay"
            duration_secs = 0.05

            [[flows]]
            id = "flow1"
            log = "{}"
            "#,
            log.display()
        ))
        .unwrap();

        let report = run_experiment(&scenario, "ss").await.unwrap();
        std::fs::remove_file(&log).ok();
        assert_eq!(report.name.as_deref(), Some("replay"));
        assert_eq!(report.flows[0].series.len(), 1);
        assert!(report.window.is_none());
        assert!(report.scorecard.is_some());
    }
}
