//! pdfvar CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use pv_envelope::{EnvelopeConfig, EnvelopePipeline, StrategyKind};
use pv_viz::SeriesOptions;

mod convert;

#[derive(Parser)]
#[command(name = "pdfvar")]
#[command(about = "pdfvar - PDF replica envelopes per analysis bin")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute per-bin envelopes and emit the plot artifact
    Envelope {
        /// Input events (.parquet or .jsonl)
        #[arg(short, long)]
        input: PathBuf,

        /// Envelope configuration (JSON). Defaults to the reference setup.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the accumulation strategy (yield-sum | per-event-ratio)
        #[arg(long)]
        strategy: Option<StrategyKind>,

        /// Split every bin by the reference mj12 intervals, unless the config
        /// already defines sub-bins.
        #[arg(long)]
        sub_bins: bool,

        /// Include the sorted per-event ratios (per-event-ratio only).
        #[arg(long)]
        event_values: bool,

        /// Output file for the artifact (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Threads (0 = auto). Use 1 for deterministic parity.
        #[arg(long, default_value = "0")]
        threads: usize,
    },

    /// Print the reference configuration
    Config {
        /// Strategy to put in the printed configuration
        #[arg(long)]
        strategy: Option<StrategyKind>,

        /// Include the reference mj12 sub-binning.
        #[arg(long)]
        sub_bins: bool,

        /// Output file (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Convert JSON-lines events to Parquet
    Convert {
        /// Input events (.jsonl)
        #[arg(short, long)]
        input: PathBuf,

        /// Output Parquet file
        #[arg(short, long)]
        output: PathBuf,

        /// Keep only the first N events
        #[arg(long)]
        max_events: Option<usize>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    match cli.command {
        Commands::Envelope { input, config, strategy, sub_bins, event_values, output, threads } => {
            cmd_envelope(
                &input,
                config.as_ref(),
                strategy,
                sub_bins,
                event_values,
                output.as_ref(),
                threads,
            )
        }
        Commands::Config { strategy, sub_bins, output } => {
            cmd_config(strategy, sub_bins, output.as_ref())
        }
        Commands::Convert { input, output, max_events } => {
            convert::cmd_convert(&input, &output, max_events)
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<EnvelopeConfig> {
    let Some(path) = path else {
        return Ok(EnvelopeConfig::reference());
    };
    tracing::info!(path = %path.display(), "loading configuration");
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let cfg: EnvelopeConfig = serde_json::from_str(&json)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    Ok(cfg)
}

fn apply_overrides(
    mut cfg: EnvelopeConfig,
    strategy: Option<StrategyKind>,
    sub_bins: bool,
) -> EnvelopeConfig {
    if let Some(s) = strategy {
        cfg = cfg.strategy(s);
    }
    if sub_bins && cfg.sub_binning.is_none() {
        cfg = cfg.reference_sub_binning();
    }
    cfg
}

fn cmd_envelope(
    input: &PathBuf,
    config: Option<&PathBuf>,
    strategy: Option<StrategyKind>,
    sub_bins: bool,
    event_values: bool,
    output: Option<&PathBuf>,
    threads: usize,
) -> Result<()> {
    if threads > 0 {
        // Best-effort; if a global pool already exists, keep going.
        let _ = rayon::ThreadPoolBuilder::new().num_threads(threads).build_global();
    }

    let cfg = apply_overrides(load_config(config)?, strategy, sub_bins);
    if event_values && cfg.strategy != StrategyKind::PerEventRatio {
        tracing::warn!(strategy = %cfg.strategy, "--event-values only applies to per-event-ratio");
    }
    let pipeline = EnvelopePipeline::new(cfg).context("invalid envelope configuration")?;

    let mut source = pv_io::open_event_source(input)
        .with_context(|| format!("failed to open events {}", input.display()))?;
    let results = pipeline.run(&mut source)?;

    let opts = SeriesOptions::default()
        .include_event_values(event_values)
        .threads(if threads > 0 { threads } else { rayon::current_num_threads() });
    let artifact = pv_viz::envelope_artifact(&results, &opts)?;

    write_json(output, serde_json::to_value(artifact)?)
}

fn cmd_config(
    strategy: Option<StrategyKind>,
    sub_bins: bool,
    output: Option<&PathBuf>,
) -> Result<()> {
    let cfg = apply_overrides(EnvelopeConfig::reference(), strategy, sub_bins);
    cfg.validate()?;
    write_json(output, serde_json::to_value(cfg)?)
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
