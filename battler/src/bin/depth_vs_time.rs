use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use battler::engine::parse_option;
use battler::runner::DEFAULT_HANDSHAKE_TIMEOUT;
use battler::telemetry::{sample_position, write_samples_csv};
use battler::{EngineProcess, EngineSpec};
use clap::Parser;
use log::{error, info};

const SEARCH_MARGIN: Duration = Duration::from_secs(5);

/// Measures how deep each engine searches in a fixed time per position
#[derive(Parser, Debug)]
struct Cli {
    /// UCI engine binary, repeatable
    #[arg(long, required = true)]
    engine: Vec<PathBuf>,

    /// FEN or `startpos`, repeatable
    #[arg(long, required = true)]
    fen: Vec<String>,

    #[arg(long, default_value_t = 1000)]
    time_ms: u64,

    #[arg(long, default_value = "depth_vs_time.csv")]
    out: PathBuf,

    /// UCI option as NAME=VALUE applied to every engine, repeatable
    #[arg(long)]
    uci_option: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut options = Vec::with_capacity(cli.uci_option.len());
    for raw in &cli.uci_option {
        options.push(parse_option(raw)?);
    }
    let movetime = Duration::from_millis(cli.time_ms);

    let mut samples = Vec::new();
    for path in &cli.engine {
        let mut spec = EngineSpec::new(path);
        for (name, value) in &options {
            spec = spec.with_option(name.clone(), value.clone());
        }

        let mut engine = match EngineProcess::start(&spec, DEFAULT_HANDSHAKE_TIMEOUT) {
            Ok(engine) => engine,
            Err(e) => {
                error!("Failed to start {}: {}", path.display(), e);
                continue;
            }
        };

        for fen in &cli.fen {
            match sample_position(&mut engine, fen, movetime, SEARCH_MARGIN) {
                Ok(sample) => {
                    println!("{} fen={}", sample.pretty(), fen);
                    samples.push(sample);
                }
                Err(e) => {
                    error!("{} failed on {}: {}", spec.name, fen, e);
                    // It may still be stuck in the search
                    engine.quit();
                    match EngineProcess::start(&spec, DEFAULT_HANDSHAKE_TIMEOUT) {
                        Ok(fresh) => engine = fresh,
                        Err(e) => {
                            error!("Failed to restart {}: {}", path.display(), e);
                            break;
                        }
                    }
                }
            }
        }
        engine.quit();
    }

    write_samples_csv(&cli.out, &samples)
        .with_context(|| format!("failed to write {}", cli.out.display()))?;
    info!("Wrote {} rows to {}", samples.len(), cli.out.display());
    Ok(())
}
