//! Palimpsest CLI - offline tools around the adaptation engine
//!
//! Commands:
//! - content-map: build a content map from an original/rewritten pair
//! - resolve: match one chunk text against a content map
//! - simulate: replay an interaction script through the behavior engine
//! - parse-report: recover scores from a scoring service response

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;

use palimpsest_lib::behavior::BehaviorEngine;
use palimpsest_lib::config::{ConfigStore, EngineConfig, MatchPolicy};
use palimpsest_lib::content::ContentMap;
use palimpsest_lib::evaluation::parse_response;
use palimpsest_lib::interaction::InteractionSample;

/// Offline tools for the palimpsest content adaptation engine
#[derive(Parser)]
#[command(name = "palimpsest")]
#[command(version)]
#[command(about = "Inspect content maps, replay behavior and parse scoring reports", long_about = None)]
struct Cli {
    /// Engine configuration file (JSON); defaults apply when absent
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a content map and print its entries
    ContentMap {
        /// Original page text (markdown or plain)
        #[arg(long)]
        original: PathBuf,

        /// Fully rewritten page text
        #[arg(long)]
        rewritten: PathBuf,
    },

    /// Resolve a chunk's text against a content map
    Resolve {
        #[arg(long)]
        original: PathBuf,

        #[arg(long)]
        rewritten: PathBuf,

        /// Chunk text to look up
        #[arg(long)]
        text: String,
    },

    /// Replay a JSON array of interaction samples and print transitions
    Simulate {
        /// Script file (JSON array of samples)
        #[arg(short, long)]
        script: PathBuf,

        /// Keep ticking until this session time (ms)
        #[arg(long)]
        until: Option<u64>,
    },

    /// Parse a scoring response into scores
    ParseReport {
        /// Raw response text file
        #[arg(short, long)]
        input: PathBuf,

        /// Pass threshold for the average score
        #[arg(long)]
        threshold: Option<f64>,
    },
}

fn main() -> ExitCode {
    palimpsest_lib::init_logging();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => ConfigStore::load(path.clone())?.get(),
        None => EngineConfig::default(),
    }
    .with_env_overrides();
    let policy = &config.orchestrator.match_policy;

    match cli.command {
        Commands::ContentMap { original, rewritten } => cmd_content_map(&original, &rewritten, policy),
        Commands::Resolve {
            original,
            rewritten,
            text,
        } => cmd_resolve(&original, &rewritten, &text, policy),
        Commands::Simulate { script, until } => cmd_simulate(&script, until, &config),
        Commands::ParseReport { input, threshold } => {
            cmd_parse_report(&input, threshold.unwrap_or(config.evaluation.pass_threshold))
        }
    }
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn build_map(original: &Path, rewritten: &Path, policy: &MatchPolicy) -> Result<ContentMap> {
    Ok(ContentMap::build(&read(original)?, &read(rewritten)?, policy))
}

fn cmd_content_map(original: &Path, rewritten: &Path, policy: &MatchPolicy) -> Result<()> {
    let map = build_map(original, rewritten, policy)?;
    println!("{}", serde_json::to_string_pretty(&map)?);
    eprintln!("{} entries", map.len());
    Ok(())
}

fn cmd_resolve(original: &Path, rewritten: &Path, text: &str, policy: &MatchPolicy) -> Result<()> {
    let map = build_map(original, rewritten, policy)?;
    let output = match map.resolve(text) {
        Some(hit) => json!({ "matched": true, "match": hit }),
        None => json!({ "matched": false }),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn cmd_simulate(script: &Path, until: Option<u64>, config: &EngineConfig) -> Result<()> {
    let mut samples: Vec<InteractionSample> =
        serde_json::from_str(&read(script)?).context("script must be a JSON array of samples")?;
    samples.sort_by_key(|sample| sample.timestamp_ms);

    let last_sample = samples.last().map(|s| s.timestamp_ms).unwrap_or(0);
    let end = until.unwrap_or(last_sample + 1_000);
    let step = config.behavior.tick_interval_ms.max(1);

    let mut engine = BehaviorEngine::new(config.behavior.clone(), 0);
    let mut pending = samples.iter().peekable();
    let mut now = 0;

    while now <= end {
        while let Some(sample) = pending.next_if(|sample| sample.timestamp_ms <= now) {
            for event in engine.process_sample(sample) {
                println!("{}", serde_json::to_string(&event)?);
            }
        }
        for event in engine.tick(now) {
            println!("{}", serde_json::to_string(&event)?);
        }
        now += step;
    }

    eprintln!("{}", serde_json::to_string(engine.state())?);
    Ok(())
}

fn cmd_parse_report(input: &Path, threshold: f64) -> Result<()> {
    let raw = read(input)?;
    let output = match parse_response(&raw) {
        Some(parsed) => json!({
            "scores": parsed.scores,
            "averageScore": parsed.average_score,
            "passed": parsed.average_score >= threshold,
        }),
        None => json!({
            "scores": [],
            "averageScore": 0.0,
            "passed": false,
            "failure": "no recoverable scores",
        }),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
