use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use csv::Writer;
use serde::{Deserialize, Serialize};
use sprt_core::elo::EloEstimate;
use sprt_core::{SprtConfig, SprtStatus};

use crate::error::BattlerError;
use crate::game::GameRecord;

pub const STATUS_FILE: &str = "sprt_status.json";
pub const SUMMARY_FILE: &str = "test_summary.md";
pub const GAMES_FILE: &str = "games.csv";

/// A progress line goes out every this many games
pub const PROGRESS_INTERVAL: u32 = 10;

pub fn timestamp_string() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

pub fn default_output_dir() -> PathBuf {
    PathBuf::from(format!("sprt_results/test_{}", timestamp_string()))
}

/// Persisted summary of a test, written as JSON and Markdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SprtReport {
    pub date: String,
    pub engine1: String,
    pub engine2: String,
    pub elo_bounds: [f64; 2],
    pub alpha: f64,
    pub beta: f64,
    pub games: u32,
    pub wins: u32,
    pub draws: u32,
    pub losses: u32,
    pub score: f64,
    pub score_percentage: f64,
    pub llr: f64,
    pub llr_bounds: [f64; 2],
    pub result: String,
    pub elo_estimate: Option<EloEstimate>,
}

impl SprtReport {
    pub fn new(engine1: &str, engine2: &str, config: &SprtConfig, status: &SprtStatus) -> Self {
        let counts = status.counts;
        Self {
            date: Utc::now().to_rfc3339(),
            engine1: engine1.to_owned(),
            engine2: engine2.to_owned(),
            elo_bounds: [config.elo0, config.elo1],
            alpha: config.alpha,
            beta: config.beta,
            games: counts.games(),
            wins: counts.wins,
            draws: counts.draws,
            losses: counts.losses,
            score: counts.score(),
            score_percentage: counts.score_ratio() * 100.0,
            llr: status.llr,
            llr_bounds: [status.bounds.lower, status.bounds.upper],
            result: status.state.to_string(),
            elo_estimate: EloEstimate::from_counts(&counts),
        }
    }

    pub fn to_markdown(&self) -> String {
        let mut md = format!(
            "# SPRT Test Results\n\n\
             **Date:** {date}\n\
             **Result:** {result}\n\n\
             ## Engines\n\
             - Test: {engine1}\n\
             - Base: {engine2}\n\n\
             ## Parameters\n\
             - Elo bounds: [{elo0}, {elo1}]\n\
             - Alpha: {alpha}\n\
             - Beta: {beta}\n\n\
             ## Results\n\
             - Games: {games}\n\
             - Score: {score}/{games} ({pct:.1}%)\n\
             - W/D/L: {wins}/{draws}/{losses}\n\
             - LLR: {llr:.3} [{lower:.3}, {upper:.3}]\n",
            date = self.date,
            result = self.result,
            engine1 = self.engine1,
            engine2 = self.engine2,
            elo0 = self.elo_bounds[0],
            elo1 = self.elo_bounds[1],
            alpha = self.alpha,
            beta = self.beta,
            games = self.games,
            score = self.score,
            pct = self.score_percentage,
            wins = self.wins,
            draws = self.draws,
            losses = self.losses,
            llr = self.llr,
            lower = self.llr_bounds[0],
            upper = self.llr_bounds[1],
        );
        if let Some(estimate) = &self.elo_estimate {
            md.push_str(&format!("- Elo: {}\n", estimate));
        }
        md
    }

    pub fn write_json(&self, dir: &Path) -> Result<PathBuf, BattlerError> {
        let path = dir.join(STATUS_FILE);
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }

    pub fn write_markdown(&self, dir: &Path) -> Result<PathBuf, BattlerError> {
        let path = dir.join(SUMMARY_FILE);
        std::fs::write(&path, self.to_markdown())?;
        Ok(path)
    }

    /// Creates `dir` and writes both report files into it
    pub fn save(&self, dir: &Path) -> Result<(), BattlerError> {
        std::fs::create_dir_all(dir)?;
        self.write_json(dir)?;
        self.write_markdown(dir)?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct GameRow<'a> {
    game: usize,
    opening: &'a str,
    white: &'a str,
    black: &'a str,
    result: String,
    termination: &'static str,
    plies: u32,
    moves: String,
}

pub fn write_games_csv(path: &Path, games: &[GameRecord]) -> Result<(), BattlerError> {
    let mut wtr = Writer::from_path(path)?;
    for (idx, game) in games.iter().enumerate() {
        wtr.serialize(GameRow {
            game: idx + 1,
            opening: &game.opening,
            white: &game.white,
            black: &game.black,
            result: game.result.to_string(),
            termination: game.termination.into(),
            plies: game.plies,
            moves: game.moves.join(" "),
        })?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn progress_line(status: &SprtStatus, elapsed: Duration) -> String {
    let counts = status.counts;
    let games = counts.games();
    let secs = elapsed.as_secs_f64();
    let games_per_sec = if secs > 0.0 { games as f64 / secs } else { 0.0 };
    format!(
        "Games: {:4} | Score: {:.1}/{} ({:.1}%) | W/D/L: {} | LLR: {:+.3} | Games/sec: {:.1}",
        games,
        counts.score(),
        games,
        counts.score_ratio() * 100.0,
        counts,
        status.llr,
        games_per_sec
    )
}
