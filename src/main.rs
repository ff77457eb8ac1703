use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};

use bead_monitor::config::{ChannelRef, EngineConfig, TraceLayout};
use bead_monitor::data::identifier::parse_identifier;
use bead_monitor::data::loader::{collect_trace_paths, load_status, load_trace};
use bead_monitor::state::Session;

#[derive(Parser)]
#[command(name = "bead-monitor")]
#[command(about = "Bead segmentation and gap-compressed timeline alignment", version)]
struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Segment, smooth, filter and align trace files; write a JSON report
    Analyze {
        /// Trace CSV files or directories of them
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Status CSV (Timestamp, Stat1, Stat2, Value) to overlay
        #[arg(short, long)]
        status: Option<PathBuf>,
        /// Overlay the first available Stat1 / Stat2 pair
        #[arg(long)]
        status_first: bool,
        /// Segmentation threshold
        #[arg(short, long)]
        threshold: Option<f64>,
        /// Segmentation channel, by position or by name
        #[arg(long)]
        channel: Option<String>,
        /// Smoothing window
        #[arg(short, long)]
        window: Option<usize>,
        /// Join tolerance in milliseconds
        #[arg(long)]
        tolerance_ms: Option<u64>,
        /// Trace layout: identified or tabular
        #[arg(long, value_parser = parse_layout)]
        layout: Option<TraceLayout>,
        /// Output JSON file (stdout when omitted)
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Pretty-print the JSON
        #[arg(long)]
        pretty: bool,
    },

    /// Parse record identifiers and print their timestamps
    Identify {
        /// Identifiers such as 093015_BM240101Y0001_X_F1.csv
        #[arg(required = true)]
        identifiers: Vec<String>,
    },
}

fn parse_layout(s: &str) -> Result<TraceLayout, String> {
    match s {
        "identified" => Ok(TraceLayout::Identified),
        "tabular" => Ok(TraceLayout::Tabular),
        other => Err(format!("unknown layout '{other}' (identified, tabular)")),
    }
}

fn channel_ref(s: &str) -> ChannelRef {
    s.parse::<usize>()
        .map(ChannelRef::Index)
        .unwrap_or_else(|_| ChannelRef::Name(s.to_string()))
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity (must come first)
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    if let Err(e) = run(cli) {
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => {
            let cfg = EngineConfig::from_yaml(path)?;
            info!("Loaded config from: {}", path.display());
            cfg
        }
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::Analyze {
            inputs,
            status,
            status_first,
            threshold,
            channel,
            window,
            tolerance_ms,
            layout,
            out,
            pretty,
        } => {
            if let Some(t) = threshold {
                config.segmentation.threshold = t;
            }
            if let Some(c) = channel {
                config.segmentation.channel = channel_ref(&c);
            }
            if let Some(w) = window {
                config.smoothing.window = w;
            }
            if let Some(ms) = tolerance_ms {
                config.join.tolerance_ms = ms;
            }
            if let Some(l) = layout {
                config.input.layout = l;
            }
            // Reject a bad filter before loading anything.
            config.filter.prepare()?;

            let paths = collect_trace_paths(&inputs)?;
            if paths.is_empty() {
                bail!("no trace files found");
            }

            let mut session = Session::new(config);
            if let Some(path) = status {
                session.set_status(load_status(&path)?, status_first);
            }

            let mut reports = Vec::new();
            for path in &paths {
                let source = match load_trace(path, &session.config.input) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!("skipping {}: {e:#}", path.display());
                        continue;
                    }
                };
                match session.analyze(source) {
                    Ok(report) => reports.push(report),
                    Err(e) => warn!("skipping {}: {e}", path.display()),
                }
            }
            if reports.is_empty() {
                bail!("none of the {} trace files could be analysed", paths.len());
            }

            let json = if pretty {
                serde_json::to_string_pretty(&reports)?
            } else {
                serde_json::to_string(&reports)?
            };
            match out {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("writing {}", path.display()))?;
                    info!("Wrote {} reports to {}", reports.len(), path.display());
                }
                None => {
                    let mut stdout = std::io::stdout().lock();
                    stdout.write_all(json.as_bytes())?;
                    stdout.write_all(b"\n")?;
                }
            }
        }

        Commands::Identify { identifiers } => {
            for id in &identifiers {
                match parse_identifier(id) {
                    Ok(rec) => println!(
                        "{id}\t{}\t{}\t{}\t{}",
                        rec.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        rec.code,
                        rec.feed,
                        rec.tag.as_deref().unwrap_or("-")
                    ),
                    Err(e) => println!("{id}\terror: {e}"),
                }
            }
        }
    }
    Ok(())
}
