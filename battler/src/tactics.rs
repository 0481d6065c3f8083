use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chess::{Board, ChessMove};
use log::{info, warn};
use serde::Serialize;

use crate::engine::{EngineProcess, SearchLimits};
use crate::error::BattlerError;
use crate::openings::parse_board;

/// One test position: the engine should play one of `best_moves` and none of
/// `avoid_moves`. Moves are stored in coordinate notation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpdEntry {
    pub id: String,
    pub fen: String,
    pub best_moves: Vec<String>,
    pub avoid_moves: Vec<String>,
}

impl EpdEntry {
    pub fn is_solved_by(&self, engine_move: &str) -> bool {
        let avoided = !self.avoid_moves.iter().any(|mv| mv == engine_move);
        let found = self.best_moves.is_empty() || self.best_moves.iter().any(|mv| mv == engine_move);
        avoided && found
    }
}

fn next_field(rest: &str) -> (&str, &str) {
    let rest = rest.trim_start();
    let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    (&rest[..end], &rest[end..])
}

fn looks_like_coordinates(mv: &str) -> bool {
    let bytes = mv.as_bytes();
    let square = |file: u8, rank: u8| (b'a'..=b'h').contains(&file) && (b'1'..=b'8').contains(&rank);
    match bytes.len() {
        4 => square(bytes[0], bytes[1]) && square(bytes[2], bytes[3]),
        5 => {
            square(bytes[0], bytes[1])
                && square(bytes[2], bytes[3])
                && matches!(bytes[4], b'q' | b'r' | b'b' | b'n')
        }
        _ => false,
    }
}

/// Converts a SAN move to coordinate notation. Moves already written as
/// coordinates are accepted when legal.
pub fn san_to_uci(board: &Board, san: &str) -> Option<String> {
    let cleaned = san.trim_end_matches(['+', '#', '!', '?']);
    if let Ok(mv) = ChessMove::from_san(board, cleaned) {
        return Some(mv.to_string());
    }
    if looks_like_coordinates(cleaned) {
        let mv = ChessMove::from_str(cleaned).ok()?;
        if board.legal(mv) {
            return Some(mv.to_string());
        }
    }
    None
}

/// Parses a line like `<4 FEN fields> bm Qg6; id "WAC.003";`.
///
/// Blank lines and `#` comments give `Ok(None)`. Positions without an `id`
/// are named after `line_number`.
pub fn parse_epd_line(line: &str, line_number: usize) -> Result<Option<EpdEntry>, BattlerError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let bad = |reason: &str| BattlerError::Epd {
        line: line.to_owned(),
        reason: reason.to_owned(),
    };

    let mut rest = line;
    let mut fields = Vec::with_capacity(6);
    for _ in 0..4 {
        let (field, remaining) = next_field(rest);
        if field.is_empty() {
            return Err(bad("fewer than four FEN fields"));
        }
        fields.push(field);
        rest = remaining;
    }

    // Some files carry the move counters too
    let mut counters = Vec::with_capacity(2);
    for _ in 0..2 {
        let (field, remaining) = next_field(rest);
        if field.is_empty() || !field.chars().all(|c| c.is_ascii_digit()) {
            break;
        }
        counters.push(field);
        rest = remaining;
    }
    match counters.len() {
        2 => fields.extend(counters),
        _ => fields.extend(["0", "1"]),
    }

    let fen = fields.join(" ");
    let board = parse_board(&fen)?;

    let mut id = None;
    let mut best_moves = Vec::new();
    let mut avoid_moves = Vec::new();
    for operation in rest.split(';') {
        let (opcode, operands) = next_field(operation);
        match opcode {
            "bm" | "am" => {
                let target = if opcode == "bm" {
                    &mut best_moves
                } else {
                    &mut avoid_moves
                };
                for san in operands.split_whitespace() {
                    let uci = san_to_uci(&board, san)
                        .ok_or_else(|| bad(&format!("{} is not a legal move here", san)))?;
                    target.push(uci);
                }
            }
            "id" => id = Some(operands.trim().trim_matches('"').to_owned()),
            _ => {}
        }
    }

    if best_moves.is_empty() && avoid_moves.is_empty() {
        return Err(bad("no bm or am operation"));
    }

    Ok(Some(EpdEntry {
        id: id.unwrap_or_else(|| format!("line_{}", line_number)),
        fen,
        best_moves,
        avoid_moves,
    }))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EpdSuite {
    pub entries: Vec<EpdEntry>,
    /// Lines that couldn't be turned into a position
    pub skipped: usize,
}

/// Parses a whole file. Bad lines are logged and skipped so one typo
/// doesn't cost the rest of the suite.
pub fn parse_epd(text: &str) -> EpdSuite {
    let mut suite = EpdSuite::default();
    for (idx, line) in text.lines().enumerate() {
        match parse_epd_line(line, idx + 1) {
            Ok(Some(entry)) => suite.entries.push(entry),
            Ok(None) => {}
            Err(e) => {
                warn!("Skipping line {}: {}", idx + 1, e);
                suite.skipped += 1;
            }
        }
    }
    suite
}

pub fn load_epd(path: &Path) -> Result<EpdSuite, BattlerError> {
    Ok(parse_epd(&std::fs::read_to_string(path)?))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TacticResult {
    pub id: String,
    pub fen: String,
    pub expected: String,
    pub engine_move: Option<String>,
    pub passed: bool,
    pub depth: Option<u32>,
    pub nodes: Option<u64>,
    pub score: String,
    pub time_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SuiteSummary {
    pub results: Vec<TacticResult>,
    pub passed: usize,
    pub total: usize,
}

impl SuiteSummary {
    pub fn push(&mut self, result: TacticResult) {
        self.total += 1;
        if result.passed {
            self.passed += 1;
        }
        self.results.push(result);
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        100.0 * self.passed as f64 / self.total as f64
    }

    pub fn failed(&self) -> impl Iterator<Item = &TacticResult> {
        self.results.iter().filter(|r| !r.passed)
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), BattlerError> {
        let mut writer = csv::Writer::from_path(path)?;
        for result in &self.results {
            writer.serialize(result)?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn expected_label(entry: &EpdEntry) -> String {
    let mut parts = Vec::new();
    if !entry.best_moves.is_empty() {
        parts.push(format!("bm {}", entry.best_moves.join(" ")));
    }
    if !entry.avoid_moves.is_empty() {
        parts.push(format!("am {}", entry.avoid_moves.join(" ")));
    }
    parts.join("; ")
}

/// Searches every position once. A position the engine fails to answer in
/// time counts as a miss; the suite keeps going.
pub fn run_suite<F>(
    engine: &mut EngineProcess,
    entries: &[EpdEntry],
    limits: &SearchLimits,
    timeout: Duration,
    mut on_result: F,
) -> SuiteSummary
where
    F: FnMut(&TacticResult),
{
    let mut summary = SuiteSummary::default();

    for entry in entries {
        let searched = engine
            .new_game(timeout)
            .and_then(|_| engine.search(&format!("fen {}", entry.fen), limits, timeout));

        let result = match searched {
            Ok(outcome) => {
                let info = outcome.info.as_ref();
                let passed = outcome
                    .best_move
                    .as_deref()
                    .is_some_and(|mv| entry.is_solved_by(mv));
                TacticResult {
                    id: entry.id.clone(),
                    fen: entry.fen.clone(),
                    expected: expected_label(entry),
                    engine_move: outcome.best_move.clone(),
                    passed,
                    depth: info.and_then(|i| i.depth),
                    nodes: info.and_then(|i| i.nodes),
                    score: info
                        .and_then(|i| i.score)
                        .map_or_else(|| "?".to_owned(), |s| s.to_string()),
                    time_ms: outcome.elapsed.as_millis() as u64,
                }
            }
            Err(e) => {
                info!("{}: {}", entry.id, e);
                TacticResult {
                    id: entry.id.clone(),
                    fen: entry.fen.clone(),
                    expected: expected_label(entry),
                    engine_move: None,
                    passed: false,
                    depth: None,
                    nodes: None,
                    score: if e.is_timeout() { "timeout" } else { "error" }.to_owned(),
                    time_ms: timeout.as_millis() as u64,
                }
            }
        };

        on_result(&result);
        summary.push(result);
    }

    summary
}
