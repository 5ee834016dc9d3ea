//! Network neutrality inference CLI.
//!
//! Analyzes measurement logs recorded during emulated experiments and reports
//! which links and link sequences discriminate between traffic classes.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Context, Result};

use neutralsim::analysis::{
    self,
    congestion::CongestionEstimator,
    pipeline::{self, AnalysisInput},
    report, Strategy,
};
use neutralsim::config::{apply_overrides, load_config, AnalysisConfig, ConfigOverrides};
use neutralsim::measurement::{sort_by_success_rate, ExperimentLog, LinkMeasurement};
use neutralsim::utils::{format_nanos, parse_duration_to_nanos};

#[derive(Parser)]
#[command(name = "neutralsim")]
#[command(about = "Network neutrality inference for emulated experiments")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Analysis configuration YAML file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Number of parallel workers (0 = auto-detect)
    #[arg(short = 'j', long, default_value = "0")]
    threads: usize,
}

/// Measurement log and the topology it was recorded on
#[derive(clap::Args)]
struct InputArgs {
    /// Binary measurement log
    measurements: PathBuf,

    /// Topology file (YAML or JSON)
    #[arg(short, long)]
    topology: PathBuf,

    /// Loss rate at which an interval counts as congested
    #[arg(long)]
    loss_threshold: Option<f64>,

    /// Packets per traffic-volume bin
    #[arg(long)]
    bin_size: Option<f64>,

    /// Coarser interval size, e.g. 5s
    #[arg(long, value_parser = parse_duration)]
    resample: Option<Duration>,

    /// Subsampling draws per interval and path
    #[arg(long)]
    sampling_iterations: Option<usize>,

    /// Random seed for subsampling and clustering
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full analysis and write reports
    Analyze {
        #[command(flatten)]
        input: InputArgs,

        /// Output directory for reports
        #[arg(short, long, default_value = "analysis_output")]
        output: PathBuf,

        /// Relative gap separating neutral from non-neutral
        #[arg(long)]
        gap_threshold: Option<f64>,

        /// Sequence classification strategy (gap-threshold, global-clustering)
        #[arg(long, value_parser = parse_strategy)]
        strategy: Option<Strategy>,

        /// Reuse or create a cache of sequence estimates
        #[arg(long)]
        cache: Option<PathBuf>,

        /// Also write the per-interval loss of every path
        #[arg(long)]
        interval_loss: bool,
    },

    /// Classify individual links from (link, path) data only
    Links {
        #[command(flatten)]
        input: InputArgs,
    },

    /// Path congestion probabilities for a ladder of loss thresholds
    PathCongestion {
        #[command(flatten)]
        input: InputArgs,

        /// Write the table here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show dimensions and totals of a measurement log
    Summary {
        /// Binary measurement log
        measurements: PathBuf,
    },

    /// Drop trailing empty intervals and optionally resample
    Trim {
        /// Binary measurement log
        measurements: PathBuf,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// Coarser interval size, e.g. 5s
        #[arg(long, value_parser = parse_duration)]
        resample: Option<Duration>,
    },
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    parse_duration_to_nanos(value).map(Duration::from_nanos)
}

fn parse_strategy(value: &str) -> Result<Strategy, String> {
    match value {
        "gap-threshold" | "gap_threshold" => Ok(Strategy::GapThreshold),
        "global-clustering" | "global_clustering" => Ok(Strategy::GlobalClustering),
        _ => Err(format!("Unknown strategy: {}", value)),
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    // Set thread pool size
    if cli.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(cli.threads)
            .build_global()
            .context("Failed to configure thread pool")?;
    }

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AnalysisConfig::default(),
    };

    match cli.command {
        Commands::Analyze {
            input,
            output,
            gap_threshold,
            strategy,
            cache,
            interval_loss,
        } => {
            let overrides = ConfigOverrides {
                gap_threshold,
                sequence_strategy: strategy,
                ..input.overrides()
            };
            apply_overrides(&mut config, &overrides).context("Invalid configuration override")?;
            let input = AnalysisInput::load(&input.measurements, &input.topology, &config)?;

            log::info!("Running full analysis...");
            let report = pipeline::run_analysis(&input, &config, cache.as_deref())?;
            let stem = input.output_stem();
            pipeline::write_reports(&report, &output, &stem)?;

            if interval_loss {
                let series = CongestionEstimator::new(&input.log, &config.estimator)
                    .interval_path_loss(&input.topology);
                report::generate_interval_loss_table(
                    &series,
                    &output.join(format!("{stem}-interval-loss.tsv")),
                )?;
            }

            report::print_summary(&report);
            log::info!("Analysis complete. Reports written to {}", output.display());
        }
        Commands::Links { input } => {
            apply_overrides(&mut config, &input.overrides()).context("Invalid configuration override")?;
            let input = AnalysisInput::load(&input.measurements, &input.topology, &config)?;
            let (links, metrics) = pipeline::analyze_links(&input, &config);

            println!("\n=== PER-LINK ANALYSIS ===\n");
            for link in links.iter().filter(|l| !l.probabilities.is_empty()) {
                let outcome = link
                    .verdict
                    .outcome
                    .map(|o| format!(" [{}]", o))
                    .unwrap_or_default();
                println!("Link {}: {}{}", link.link + 1, link.verdict.label(), outcome);
            }
            println!(
                "\nDecided: {}, true positives: {}, false positives: {}",
                metrics.decided(),
                metrics.true_positives,
                metrics.false_positives
            );
            println!();
        }
        Commands::PathCongestion { input, output } => {
            apply_overrides(&mut config, &input.overrides()).context("Invalid configuration override")?;
            let input = AnalysisInput::load(&input.measurements, &input.topology, &config)?;
            let table = CongestionEstimator::new(&input.log, &config.estimator)
                .path_congestion(&input.topology, config.path_thresholds());
            match output {
                Some(path) => report::generate_path_congestion_table(&table, &path)?,
                None => print!("{}", report::render_path_congestion(&table)),
            }
        }
        Commands::Summary { measurements } => {
            let log = ExperimentLog::load(&measurements)?;
            print_log_summary(&measurements, &log);
        }
        Commands::Trim {
            measurements,
            output,
            resample,
        } => {
            let mut log = ExperimentLog::load(&measurements)?;
            if let Some(period) = resample {
                let period = u64::try_from(period.as_nanos()).context("Resample period is too large")?;
                log = log.resample(period);
            }
            if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
            log.save(&output)?;
            println!(
                "{} intervals of {} written to {}",
                log.num_intervals(),
                format_nanos(log.interval_size),
                output.display()
            );
        }
    }

    Ok(())
}

impl InputArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            loss_threshold: self.loss_threshold,
            bin_size: self.bin_size,
            resample_period: self.resample,
            sampling_iterations: self.sampling_iterations,
            seed: self.seed,
            ..Default::default()
        }
    }
}

fn print_log_summary(path: &Path, log: &ExperimentLog) {
    println!("\n=== MEASUREMENT LOG SUMMARY ===\n");
    println!("File: {}", path.display());
    println!("Intervals: {} of {}", log.num_intervals(), format_nanos(log.interval_size));
    println!(
        "Time span: {} to {} ({})",
        log.ts_start,
        log.ts_last,
        format_nanos(log.ts_last.saturating_sub(log.ts_start))
    );
    println!("Links: {}", log.num_edges);
    println!("Paths: {}", log.num_paths);
    println!("Routed (link, path) pairs: {}", log.global.edge_paths.len());
    println!("Packet size threshold: {} bytes", log.packet_size_threshold);
    println!();

    let in_flight: u64 = log.global.paths.iter().map(|m| m.in_flight).sum();
    let dropped: u64 = log.global.paths.iter().map(|m| m.dropped).sum();
    println!("Path packets: {}", in_flight);
    println!("  Dropped: {}", dropped);
    if in_flight > 0 {
        println!("  Loss: {:.4}%", 100.0 * dropped as f64 / in_flight as f64);
    }

    let mut paths: Vec<_> = log
        .global
        .paths
        .iter()
        .filter(|m| m.in_flight > 0)
        .cloned()
        .collect();
    sort_by_success_rate(&mut paths);
    if let (Some(worst), Some(best)) = (paths.first(), paths.last()) {
        let rate = |m: &LinkMeasurement| 100.0 * m.success_rate().unwrap_or(0.0);
        println!(
            "  Path success rate: {:.4}% (worst) to {:.4}% (best), median {:.4}%",
            rate(worst),
            rate(best),
            rate(&paths[paths.len() / 2])
        );
    }
    let routed: Vec<usize> = log
        .global
        .edges
        .iter()
        .enumerate()
        .filter(|(_, m)| m.in_flight > 0)
        .map(|(link, _)| link)
        .collect();
    let routed = analysis::types::format_links(&routed);
    println!("Links with traffic: {}", routed);
    println!();
}
