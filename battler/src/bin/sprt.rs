use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use anyhow::Context;
use battler::engine::parse_option;
use battler::report::{
    GAMES_FILE, PROGRESS_INTERVAL, SprtReport, default_output_dir, progress_line, write_games_csv,
};
use battler::runner::default_concurrency;
use battler::game::DEFAULT_SEARCH_TIMEOUT;
use battler::{EngineSpec, GameConfig, MatchSettings, OpeningBook, SearchLimits, SprtRunner};
use clap::{Args, Parser};
use colored::Colorize;
use log::{info, warn};
use sprt_core::{SprtConfig, SprtState, SprtTest};

#[derive(Args, Debug)]
struct SprtArgs {
    /// Elo difference under H0
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    elo0: f64,
    /// Elo difference under H1
    #[arg(long, default_value_t = 5.0, allow_negative_numbers = true)]
    elo1: f64,
    #[arg(long, default_value_t = 0.05)]
    alpha: f64,
    #[arg(long, default_value_t = 0.05)]
    beta: f64,
    /// Stop as inconclusive after this many games
    #[arg(long, default_value_t = 1000)]
    games: u32,
}

#[derive(Args, Debug)]
struct LimitArgs {
    /// Milliseconds per move. Default when no other limit is given.
    #[arg(long)]
    movetime: Option<u64>,
    #[arg(long)]
    depth: Option<u32>,
    #[arg(long)]
    nodes: Option<u64>,
    #[arg(long, default_value_t = battler::game::DEFAULT_MAX_PLIES)]
    max_plies: u32,
    /// Seconds allowed per move for depth or node limited searches
    #[arg(long, default_value_t = DEFAULT_SEARCH_TIMEOUT.as_secs())]
    search_timeout: u64,
}

impl LimitArgs {
    fn to_limits(&self) -> SearchLimits {
        if self.movetime.is_none() && self.depth.is_none() && self.nodes.is_none() {
            return SearchLimits::default();
        }
        SearchLimits {
            movetime: self.movetime.map(Duration::from_millis),
            depth: self.depth,
            nodes: self.nodes,
        }
    }
}

/// Runs an SPRT between two UCI engines. engine1 is the engine under test.
#[derive(Parser, Debug)]
struct Cli {
    engine1: PathBuf,
    engine2: PathBuf,

    #[command(flatten)]
    sprt: SprtArgs,

    #[command(flatten)]
    limits: LimitArgs,

    /// Report directory, sprt_results/test_<timestamp> by default
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(short, long)]
    concurrency: Option<usize>,

    /// YAML opening book, the start position when absent
    #[arg(long)]
    openings: Option<PathBuf>,

    /// Shuffle the opening book with this seed
    #[arg(long)]
    seed: Option<u64>,

    /// UCI option for engine1 as NAME=VALUE, repeatable
    #[arg(long)]
    option1: Vec<String>,

    /// UCI option for engine2 as NAME=VALUE, repeatable
    #[arg(long)]
    option2: Vec<String>,
}

fn engine_spec(path: &PathBuf, options: &[String]) -> anyhow::Result<EngineSpec> {
    let mut spec = EngineSpec::new(path);
    for raw in options {
        let (name, value) = parse_option(raw)?;
        spec = spec.with_option(name, value);
    }
    Ok(spec)
}

fn main() -> anyhow::Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = SprtConfig::new(cli.sprt.elo0, cli.sprt.elo1, cli.sprt.alpha, cli.sprt.beta)
        .with_max_games(cli.sprt.games);
    let test = SprtTest::new(config).context("invalid SPRT parameters")?;
    let bounds = test.bounds();

    let engine1 = engine_spec(&cli.engine1, &cli.option1)?;
    let engine2 = engine_spec(&cli.engine2, &cli.option2)?;

    let mut book = match &cli.openings {
        Some(path) => OpeningBook::load(path)
            .with_context(|| format!("failed to load openings from {}", path.display()))?,
        None => OpeningBook::startpos(),
    };
    if cli.seed.is_some() {
        book.shuffle(cli.seed);
    }

    let settings = MatchSettings {
        game: GameConfig {
            limits: cli.limits.to_limits(),
            max_plies: cli.limits.max_plies,
            search_timeout: Duration::from_secs(cli.limits.search_timeout),
            ..GameConfig::default()
        },
        concurrency: cli.concurrency.unwrap_or_else(default_concurrency),
        ..MatchSettings::new(engine1, engine2)
    }
    .with_book(&book)?;
    let name1 = settings.engine1.name.clone();
    let name2 = settings.engine2.name.clone();

    let output_dir = cli.output.clone().unwrap_or_else(default_output_dir);
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;

    info!("Starting SPRT test");
    info!("Engine 1: {}", cli.engine1.display());
    info!("Engine 2: {}", cli.engine2.display());
    info!("Elo bounds: [{}, {}]", config.elo0, config.elo1);
    info!("Alpha: {}, Beta: {}", config.alpha, config.beta);
    info!("LLR bounds: [{:.3}, {:.3}]", bounds.lower, bounds.upper);

    let runner = SprtRunner::new(settings, test);
    let started_at = Instant::now();
    let summary = runner.run(|_, status| {
        let games = status.counts.games();
        if games % PROGRESS_INTERVAL == 0 {
            info!("{}", progress_line(status, started_at.elapsed()));
            let report = SprtReport::new(&name1, &name2, &config, status);
            if let Err(e) = report.write_json(&output_dir) {
                warn!("Failed to write interim status: {}", e);
            }
        }
    })?;

    let status = &summary.status;
    let report = SprtReport::new(&name1, &name2, &config, status);
    report.save(&output_dir)?;
    write_games_csv(&output_dir.join(GAMES_FILE), &summary.games)?;

    println!();
    let (verdict, code) = match status.state {
        SprtState::Passed => (
            format!(
                "SPRT PASSED! H1 accepted (improvement detected), LLR {:.3} >= {:.3}",
                status.llr, status.bounds.upper
            )
            .green(),
            0,
        ),
        SprtState::Failed => (
            format!(
                "SPRT FAILED! H0 accepted (no improvement), LLR {:.3} <= {:.3}",
                status.llr, status.bounds.lower
            )
            .red(),
            1,
        ),
        SprtState::Inconclusive => (
            format!("SPRT INCONCLUSIVE after {} games", status.counts.games()).yellow(),
            2,
        ),
        // Workers died before a verdict
        SprtState::Running => (
            format!(
                "SPRT ABORTED after {} games: {}",
                status.counts.games(),
                summary.aborted.as_deref().unwrap_or("workers stopped early")
            )
            .red(),
            3,
        ),
    };
    println!("{}", verdict.bold());
    println!("{}", status);
    if let Some(estimate) = &report.elo_estimate {
        println!("Elo: {}", estimate);
    }
    println!(
        "Results saved to {} ({:.1}s)",
        output_dir.display(),
        summary.elapsed.as_secs_f64()
    );

    Ok(ExitCode::from(code))
}
