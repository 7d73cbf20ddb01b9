//! Visuotactile Align CLI
//!
//! Offline alignment of camera, tactile and trajectory recordings.

use clap::{Parser, Subcommand};
use statrs::statistics::Statistics;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use visuotactile_align::{
    collector::{
        ingest_lines, now_millis, spawn_key_listener, Recorder, StopFlag, DEFAULT_QUEUE_CAPACITY,
        DEFAULT_STOP_KEY,
    },
    config::{AuxiliaryStream, Config},
    core::{experiment_dir_name, BatchRunner, GraspEventTrimmer, ReferenceAugmenter},
    report::{GroupOutcome, GroupStatus, RunReport},
    store::{append_event_marker, StreamLayout},
    VERSION,
};

#[derive(Parser)]
#[command(name = "vt-align")]
#[command(version = VERSION)]
#[command(about = "Offline timestamp alignment for visuo-tactile recordings", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fuse every experiment group and trim it at its grasp event
    Fuse {
        /// Configuration file (defaults to the user config, then built-in defaults)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Base directory of the camera stream
        #[arg(long)]
        vis_dir: Option<PathBuf>,

        /// Base directory of the tactile stream
        #[arg(long)]
        tac_dir: Option<PathBuf>,

        /// Base directory of the trajectory stream
        #[arg(long)]
        traj_dir: Option<PathBuf>,

        /// Base directory for fused output
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Process only this experiment (numbers are zero-padded: 7 -> 0007)
        #[arg(long)]
        experiment: Option<String>,

        /// Matching tolerance in milliseconds for every auxiliary stream
        #[arg(long)]
        tolerance_ms: Option<u64>,

        /// Matching tolerance in milliseconds for the trajectory stream
        #[arg(long)]
        traj_tolerance_ms: Option<u64>,

        /// Keep frames without a trajectory match (pose is omitted)
        #[arg(long)]
        optional_traj: bool,

        /// Do not use the trajectory stream at all
        #[arg(long, conflicts_with = "optional_traj")]
        no_traj: bool,

        /// Keep records captured before the grasp event
        #[arg(long)]
        no_trim: bool,

        /// Number of experiments processed in parallel
        #[arg(long)]
        jobs: Option<usize>,

        /// Write a JSON run report to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Trim one fused store at an event marker
    Trim {
        /// Fused store directory
        #[arg(long)]
        dir: PathBuf,

        /// Marker file (last line is the cutoff timestamp)
        #[arg(long)]
        marker: PathBuf,
    },

    /// Append a timestamp to an event marker file
    Mark {
        /// Marker file
        #[arg(long)]
        marker: PathBuf,

        /// Timestamp in epoch milliseconds (defaults to now)
        #[arg(long)]
        timestamp: Option<i64>,
    },

    /// Record JSON-lines snapshots into a per-record store
    Ingest {
        /// Input file (defaults to stdin)
        #[arg(long, short)]
        input: Option<PathBuf>,

        /// Base directory of the stream being recorded
        #[arg(long)]
        output_dir: PathBuf,

        /// Experiment sub-directory (numbers are zero-padded)
        #[arg(long)]
        experiment: Option<String>,

        /// Clock offset in milliseconds for lines without a timestamp
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        offset_ms: i64,

        /// Line that stops recording when typed on stdin (file input only)
        #[arg(long, default_value = DEFAULT_STOP_KEY)]
        stop_key: String,
    },

    /// Add reference-frame copies of tactile fields to fused records
    Reference {
        /// Fused base directory (one sub-directory per experiment)
        #[arg(long)]
        input_dir: PathBuf,

        /// Output base directory
        #[arg(long)]
        output_dir: PathBuf,

        /// Process only this experiment
        #[arg(long)]
        experiment: Option<String>,

        /// Payload key holding the fields
        #[arg(long, default_value = "tac_data")]
        sub_key: String,

        /// Fields to copy from the baseline record
        #[arg(long, value_delimiter = ',', default_value = "P1,P2")]
        fields: Vec<String>,
    },

    /// Summarize a record store
    Inspect {
        /// Store directory
        #[arg(long)]
        dir: PathBuf,

        /// Read the directory as trajectory files
        #[arg(long)]
        trajectory: bool,
    },

    /// Show configuration
    Config {
        /// Configuration file to show
        #[arg(long)]
        config: Option<PathBuf>,

        /// Write the effective configuration to the config file
        #[arg(long)]
        write: bool,
    },
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Fuse {
            config,
            vis_dir,
            tac_dir,
            traj_dir,
            output_dir,
            experiment,
            tolerance_ms,
            traj_tolerance_ms,
            optional_traj,
            no_traj,
            no_trim,
            jobs,
            report,
        } => {
            let mut config = load_config(config.as_deref());
            let overrides = FuseOverrides {
                vis_dir,
                tac_dir,
                traj_dir,
                output_dir,
                tolerance_ms,
                traj_tolerance_ms,
                optional_traj,
                no_traj,
                no_trim,
                jobs,
                report,
            };
            overrides.apply(&mut config);
            cmd_fuse(config, experiment.as_deref());
        }
        Commands::Trim { dir, marker } => {
            cmd_trim(&dir, &marker);
        }
        Commands::Mark { marker, timestamp } => {
            cmd_mark(&marker, timestamp);
        }
        Commands::Ingest {
            input,
            output_dir,
            experiment,
            offset_ms,
            stop_key,
        } => {
            cmd_ingest(
                input.as_deref(),
                &output_dir,
                experiment.as_deref(),
                offset_ms,
                &stop_key,
            );
        }
        Commands::Reference {
            input_dir,
            output_dir,
            experiment,
            sub_key,
            fields,
        } => {
            cmd_reference(&input_dir, &output_dir, experiment.as_deref(), sub_key, fields);
        }
        Commands::Inspect { dir, trajectory } => {
            cmd_inspect(&dir, trajectory);
        }
        Commands::Config { config, write } => {
            cmd_config(config.as_deref(), write);
        }
    }
}

/// Log to stderr, filtered by `RUST_LOG` (default `info`).
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Config {
    let result = match path {
        Some(path) => Config::load(path),
        None => Config::load_default(),
    };
    match result {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    }
}

/// Command-line adjustments to a loaded configuration.
struct FuseOverrides {
    vis_dir: Option<PathBuf>,
    tac_dir: Option<PathBuf>,
    traj_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    tolerance_ms: Option<u64>,
    traj_tolerance_ms: Option<u64>,
    optional_traj: bool,
    no_traj: bool,
    no_trim: bool,
    jobs: Option<usize>,
    report: Option<PathBuf>,
}

impl FuseOverrides {
    const TACTILE: &'static str = "tactile";
    const TRAJECTORY: &'static str = "trajectory";

    fn apply(self, config: &mut Config) {
        if let Some(dir) = self.vis_dir {
            config.driving.base_dir = dir;
        }
        if let Some(dir) = self.output_dir {
            config.output_dir = dir;
        }
        if let Some(tolerance) = self.tolerance_ms {
            for aux in &mut config.auxiliary {
                aux.tolerance_ms = tolerance;
            }
        }
        if let Some(dir) = self.tac_dir {
            if let Some(aux) = stream_mut(config, Self::TACTILE) {
                aux.source.base_dir = dir;
            }
        }

        if self.no_traj {
            config.auxiliary.retain(|aux| aux.name() != Self::TRAJECTORY);
        } else if let Some(aux) = stream_mut(config, Self::TRAJECTORY) {
            if let Some(dir) = self.traj_dir {
                aux.source.base_dir = dir;
            }
            if let Some(tolerance) = self.traj_tolerance_ms {
                aux.tolerance_ms = tolerance;
            }
            if self.optional_traj {
                aux.required = false;
            }
        }

        if self.no_trim {
            config.trim = false;
        }
        if let Some(jobs) = self.jobs {
            config.jobs = jobs;
        }
        if let Some(report) = self.report {
            config.report_path = Some(report);
        }
    }
}

fn stream_mut<'a>(config: &'a mut Config, name: &str) -> Option<&'a mut AuxiliaryStream> {
    let found = config.auxiliary.iter_mut().find(|aux| aux.name() == name);
    if found.is_none() {
        eprintln!("Warning: no '{name}' stream configured, ignoring its options");
    }
    found
}

fn cmd_fuse(config: Config, experiment: Option<&str>) {
    let report_path = config.report_path.clone();
    let runner = match BatchRunner::new(config) {
        Ok(runner) => runner,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let config = runner.config();
    println!("Visuotactile Align v{VERSION}");
    println!("Driving stream: {} ({:?})", config.driving.name, config.driving.base_dir);
    for aux in &config.auxiliary {
        println!(
            "  + {} ({:?}), tolerance {} ms, {}",
            aux.name(),
            aux.source.base_dir,
            aux.tolerance_ms,
            if aux.required { "required" } else { "optional" }
        );
    }
    println!("Output: {:?}", config.output_dir);
    println!();

    let result = match experiment {
        Some(experiment) => runner.run_experiment(experiment),
        None => runner.run(),
    };
    let report = match result {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    print_report(&report);
    println!();
    println!("{}", runner.stats().summary());

    if let Some(path) = report_path {
        match report.save(&path) {
            Ok(()) => println!("Report written to {path:?}"),
            Err(e) => {
                eprintln!("Error writing report: {e}");
                std::process::exit(1);
            }
        }
    }
}

fn print_report(report: &RunReport) {
    for outcome in &report.groups {
        println!("{}", describe_outcome(outcome));
        for stream in &outcome.streams {
            let mean = stream
                .mean_ms
                .map(|m| format!("{m:.1} ms"))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "    {}: {} matched, {} missed, mean skew {}",
                stream.stream, stream.matched, stream.missed, mean
            );
        }
    }
}

fn describe_outcome(outcome: &GroupOutcome) -> String {
    match &outcome.status {
        GroupStatus::Completed {
            fused,
            dropped,
            removed,
            malformed,
        } => {
            let mut line = format!(
                "{}: fused {fused}, dropped {dropped}, trimmed {removed}, kept {}",
                outcome.group,
                outcome.retained()
            );
            if *malformed > 0 {
                line.push_str(&format!(" ({malformed} malformed inputs skipped)"));
            }
            line
        }
        GroupStatus::Skipped { reason } => format!("{}: skipped, {reason}", outcome.group),
    }
}

fn cmd_trim(dir: &Path, marker: &Path) {
    let trimmer = GraspEventTrimmer::new(marker);
    match trimmer.trim(dir) {
        Ok(removed) => println!("Removed {removed} records from {dir:?}"),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_mark(marker: &Path, timestamp: Option<i64>) {
    let timestamp = timestamp.unwrap_or_else(|| now_millis(0));
    match append_event_marker(marker, timestamp) {
        Ok(()) => println!("Marked {timestamp} in {marker:?}"),
        Err(e) => {
            eprintln!("Error writing marker: {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_ingest(
    input: Option<&Path>,
    output_dir: &Path,
    experiment: Option<&str>,
    offset_ms: i64,
    stop_key: &str,
) {
    let target = match experiment {
        Some(experiment) => output_dir.join(experiment_dir_name(experiment)),
        None => output_dir.to_path_buf(),
    };

    let stop = StopFlag::new();
    if let Err(e) = stop.install_ctrlc() {
        tracing::warn!("Could not install Ctrl+C handler: {}", e);
    }

    let reader: Box<dyn BufRead + Send> = match input {
        Some(path) => match File::open(path) {
            Ok(file) => {
                println!("Reading {path:?}; type '{stop_key}' and Enter to stop early");
                spawn_key_listener(BufReader::new(io::stdin()), stop_key, stop.clone());
                Box::new(BufReader::new(file))
            }
            Err(e) => {
                eprintln!("Error opening {path:?}: {e}");
                std::process::exit(1);
            }
        },
        None => Box::new(BufReader::new(io::stdin())),
    };

    let recorder = match Recorder::start(&target, DEFAULT_QUEUE_CAPACITY) {
        Ok(recorder) => recorder,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let summary = recorder
        .sender()
        .and_then(|sender| ingest_lines(reader, &sender, &stop, offset_ms));
    let written = recorder.finish();

    match (summary, written) {
        (Ok(summary), Ok(written)) => {
            if summary.stopped {
                println!("Stopped on request");
            }
            println!("Recorded {written} snapshots into {target:?}");
            if summary.rejected > 0 {
                println!("Skipped {} invalid lines", summary.rejected);
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_reference(
    input_dir: &Path,
    output_dir: &Path,
    experiment: Option<&str>,
    sub_key: String,
    fields: Vec<String>,
) {
    let augmenter = ReferenceAugmenter::new(sub_key, fields);

    let results = match experiment {
        Some(experiment) => {
            let group = experiment_dir_name(experiment);
            augmenter
                .augment(input_dir.join(&group), output_dir.join(&group))
                .map(|outcome| vec![(group, Some(outcome))])
        }
        None => augmenter.augment_groups(input_dir, output_dir),
    };

    match results {
        Ok(results) => {
            for (group, outcome) in results {
                match outcome {
                    Some(outcome) => println!(
                        "{group}: wrote {}, skipped {}",
                        outcome.written, outcome.skipped
                    ),
                    None => println!("{group}: skipped, no baseline record"),
                }
            }
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_inspect(dir: &Path, trajectory: bool) {
    let layout = if trajectory {
        StreamLayout::Trajectory
    } else {
        StreamLayout::PerRecord
    };
    let store = match layout.load(dir) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    println!("Store: {dir:?}");
    println!("=====");
    println!("Records: {}", store.len());
    println!("Malformed: {}", store.malformed_count());
    if let (Some(first), Some(last)) = (store.first(), store.last()) {
        println!("First: {}", first.timestamp);
        println!("Last: {}", last.timestamp);
    }
    if let Some(span) = store.span_ms() {
        println!("Span: {span} ms");
    }

    let stamps: Vec<i64> = store.timestamps().collect();
    let intervals: Vec<f64> = stamps.windows(2).map(|w| w[1].abs_diff(w[0]) as f64).collect();
    if !intervals.is_empty() {
        println!("Mean interval: {:.1} ms", Statistics::mean(&intervals));
    }
}

fn cmd_config(path: Option<&Path>, write: bool) {
    let config = load_config(path);
    let config_path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::config_path);

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {config_path:?}");
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );

    if write {
        match config.save(&config_path) {
            Ok(()) => println!("\nWritten to {config_path:?}"),
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        }
    }
}
