use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use battler::engine::parse_option;
use battler::game::DEFAULT_SEARCH_TIMEOUT;
use battler::runner::DEFAULT_HANDSHAKE_TIMEOUT;
use battler::tactics::{load_epd, run_suite};
use battler::{EngineProcess, EngineSpec, SearchLimits};
use clap::Parser;
use colored::Colorize;
use log::{info, warn};

const DEFAULT_MOVETIME_MS: u64 = 2000;

/// Runs an EPD test suite against a UCI engine
#[derive(Parser, Debug)]
struct Cli {
    engine: PathBuf,
    epd: PathBuf,

    #[arg(short = 't', long, default_value_t = DEFAULT_MOVETIME_MS)]
    movetime: u64,

    /// Search to a fixed depth instead of a fixed time
    #[arg(short, long)]
    depth: Option<u32>,

    /// Only run the first N positions
    #[arg(short, long)]
    limit: Option<usize>,

    #[arg(long)]
    csv: Option<PathBuf>,

    /// UCI option as NAME=VALUE, repeatable
    #[arg(long)]
    option: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let suite = load_epd(&cli.epd)
        .with_context(|| format!("failed to read suite {}", cli.epd.display()))?;
    if suite.skipped > 0 {
        warn!("Skipped {} unreadable lines in {}", suite.skipped, cli.epd.display());
    }
    let mut entries = suite.entries;
    if let Some(limit) = cli.limit {
        entries.truncate(limit);
    }

    let (limits, timeout) = match cli.depth {
        Some(depth) => (SearchLimits::depth(depth), DEFAULT_SEARCH_TIMEOUT),
        None => (
            SearchLimits::movetime(Duration::from_millis(cli.movetime)),
            Duration::from_millis(cli.movetime) + Duration::from_secs(5),
        ),
    };

    let mut spec = EngineSpec::new(&cli.engine);
    for raw in &cli.option {
        let (name, value) = parse_option(raw)?;
        spec = spec.with_option(name, value);
    }
    let mut engine = EngineProcess::start(&spec, DEFAULT_HANDSHAKE_TIMEOUT)
        .with_context(|| format!("failed to start {}", cli.engine.display()))?;

    info!(
        "Running {} positions from {} with `{}`",
        entries.len(),
        cli.epd.display(),
        limits.go_command()
    );

    let summary = run_suite(&mut engine, &entries, &limits, timeout, |result| {
        let verdict = if result.passed {
            "PASS".green()
        } else {
            "FAIL".red()
        };
        println!(
            "{} {:<12} got {:<6} expected {:<16} depth {:>3} score {}",
            verdict,
            result.id,
            result.engine_move.as_deref().unwrap_or("-"),
            result.expected,
            result.depth.unwrap_or(0),
            result.score
        );
    });
    engine.quit();

    println!();
    let rate = format!(
        "Solved {}/{} ({:.1}%)",
        summary.passed,
        summary.total,
        summary.success_rate()
    );
    println!("{}", rate.bold());

    let failed: Vec<&str> = summary.failed().map(|r| r.id.as_str()).collect();
    if !failed.is_empty() {
        println!("Failed: {}", failed.join(", "));
    }

    if let Some(path) = &cli.csv {
        summary.write_csv(path)?;
        println!("Results written to {}", path.display());
    }

    Ok(())
}
