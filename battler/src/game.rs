use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chess::{Board, BoardStatus, ChessMove, Color, Piece};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use sprt_core::Outcome;
use strum::{Display, IntoStaticStr};

use crate::engine::{DEFAULT_MOVETIME, EngineProcess, SearchLimits};
use crate::error::{BattlerError, EngineError};
use crate::openings::{Opening, halfmove_clock, parse_board};

pub const DEFAULT_MAX_PLIES: u32 = 200;
/// Deadline for a single depth or node limited search
pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(60);
const FIFTY_MOVE_PLIES: u32 = 100;
const REPETITION_LIMIT: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameConfig {
    pub limits: SearchLimits,
    /// Games still running after this many plies are scored as draws
    pub max_plies: u32,
    /// Added on top of the movetime before a move is considered lost
    pub timeout_margin: Duration,
    /// Deadline per move when the search has no movetime bound
    pub search_timeout: Duration,
    pub ready_timeout: Duration,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            limits: SearchLimits::default(),
            max_plies: DEFAULT_MAX_PLIES,
            timeout_margin: Duration::from_secs(5),
            search_timeout: DEFAULT_SEARCH_TIMEOUT,
            ready_timeout: Duration::from_secs(10),
        }
    }
}

impl GameConfig {
    pub fn move_timeout(&self) -> Duration {
        let limits = &self.limits;
        match limits.movetime {
            Some(movetime) => movetime + self.timeout_margin,
            None if limits.depth.is_some() || limits.nodes.is_some() => self.search_timeout,
            None => DEFAULT_MOVETIME + self.timeout_margin,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameResult {
    WhiteWins,
    BlackWins,
    Draw,
}

impl GameResult {
    fn win_for(color: Color) -> Self {
        match color {
            Color::White => GameResult::WhiteWins,
            Color::Black => GameResult::BlackWins,
        }
    }

    fn loss_for(color: Color) -> Self {
        Self::win_for(!color)
    }

    /// Outcome from white's point of view
    pub fn white_outcome(self) -> Outcome {
        match self {
            GameResult::WhiteWins => Outcome::Win,
            GameResult::BlackWins => Outcome::Loss,
            GameResult::Draw => Outcome::Draw,
        }
    }
}

impl fmt::Display for GameResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            GameResult::WhiteWins => "1-0",
            GameResult::BlackWins => "0-1",
            GameResult::Draw => "1/2-1/2",
        };
        f.write_str(text)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Checkmate,
    Stalemate,
    InsufficientMaterial,
    FiftyMoves,
    Repetition,
    MaxPlies,
    /// Engine answered `bestmove (none)` while it still had legal moves
    NoMove,
    IllegalMove,
    Timeout,
    EngineFailure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRecord {
    pub opening: String,
    pub white: String,
    pub black: String,
    pub result: GameResult,
    pub termination: Termination,
    pub moves: Vec<String>,
    pub plies: u32,
}

impl GameRecord {
    /// Result for the named engine, `None` if it didn't play this game.
    /// Ambiguous for self-play, where `white_outcome` is the way to go.
    pub fn outcome_for(&self, engine: &str) -> Option<Outcome> {
        if engine == self.white {
            Some(self.result.white_outcome())
        } else if engine == self.black {
            Some(self.result.white_outcome().flip())
        } else {
            None
        }
    }

    pub fn pretty(&self) -> String {
        format!(
            "{} vs {} [{}]: {} by {} after {} plies",
            self.white, self.black, self.opening, self.result, self.termination, self.plies
        )
    }
}

/// Board plus the bookkeeping the `chess` crate leaves to us: the fifty move
/// counter and repetition counts.
#[derive(Debug, Clone)]
pub(crate) struct GameState {
    fen: String,
    board: Board,
    halfmove_clock: u32,
    seen: HashMap<u64, u32>,
    moves: Vec<String>,
}

impl GameState {
    pub(crate) fn new(fen: &str) -> Result<Self, BattlerError> {
        let board = parse_board(fen)?;
        let mut seen = HashMap::new();
        seen.insert(board.get_hash(), 1);
        Ok(Self {
            fen: fen.to_owned(),
            board,
            halfmove_clock: halfmove_clock(fen),
            seen,
            moves: Vec::new(),
        })
    }

    pub(crate) fn side_to_move(&self) -> Color {
        self.board.side_to_move()
    }

    pub(crate) fn plies(&self) -> u32 {
        self.moves.len() as u32
    }

    pub(crate) fn position_command(&self) -> String {
        if self.moves.is_empty() {
            format!("fen {}", self.fen)
        } else {
            format!("fen {} moves {}", self.fen, self.moves.join(" "))
        }
    }

    /// Plays a move given in coordinate notation. Returns `None` if it
    /// doesn't parse or isn't legal here.
    pub(crate) fn play(&mut self, uci: &str) -> Option<ChessMove> {
        let mv = ChessMove::from_str(uci).ok()?;
        if !self.board.legal(mv) {
            return None;
        }

        let resets_clock = self.board.piece_on(mv.get_source()) == Some(Piece::Pawn)
            || self.board.piece_on(mv.get_dest()).is_some();
        self.halfmove_clock = if resets_clock {
            0
        } else {
            self.halfmove_clock + 1
        };

        self.board = self.board.make_move_new(mv);
        *self.seen.entry(self.board.get_hash()).or_insert(0) += 1;
        self.moves.push(mv.to_string());
        Some(mv)
    }

    fn insufficient_material(&self) -> bool {
        let occupied = self.board.combined().popcnt();
        let minors = (*self.board.pieces(Piece::Knight) | *self.board.pieces(Piece::Bishop)).popcnt();
        occupied == 2 || (occupied == 3 && minors == 1)
    }

    /// Whether the game is over before the side to move plays
    pub(crate) fn adjudicate(&self, max_plies: u32) -> Option<(GameResult, Termination)> {
        match self.board.status() {
            BoardStatus::Checkmate => {
                return Some((
                    GameResult::loss_for(self.side_to_move()),
                    Termination::Checkmate,
                ));
            }
            BoardStatus::Stalemate => return Some((GameResult::Draw, Termination::Stalemate)),
            BoardStatus::Ongoing => {}
        }

        if self.insufficient_material() {
            return Some((GameResult::Draw, Termination::InsufficientMaterial));
        }
        if self.halfmove_clock >= FIFTY_MOVE_PLIES {
            return Some((GameResult::Draw, Termination::FiftyMoves));
        }
        let repetitions = self.seen.get(&self.board.get_hash()).copied().unwrap_or(0);
        if repetitions >= REPETITION_LIMIT {
            return Some((GameResult::Draw, Termination::Repetition));
        }
        if self.plies() >= max_plies {
            return Some((GameResult::Draw, Termination::MaxPlies));
        }
        None
    }

    fn into_record(
        self,
        opening: &Opening,
        white: &str,
        black: &str,
        result: GameResult,
        termination: Termination,
    ) -> GameRecord {
        GameRecord {
            opening: opening.name.clone(),
            white: white.to_owned(),
            black: black.to_owned(),
            result,
            termination,
            plies: self.plies(),
            moves: self.moves,
        }
    }
}

fn engine_failure(err: &EngineError) -> Termination {
    if err.is_timeout() {
        Termination::Timeout
    } else {
        Termination::EngineFailure
    }
}

/// Plays one game between two running engines.
///
/// Engine faults never abort the run: a timeout or broken pipe scores the
/// game as a draw, while a null or illegal move loses it for the mover.
/// The only error is an opening position that doesn't parse.
pub fn play_game(
    white: &mut EngineProcess,
    black: &mut EngineProcess,
    opening: &Opening,
    config: &GameConfig,
) -> Result<GameRecord, BattlerError> {
    let mut state = GameState::new(&opening.fen)?;
    let white_name = white.name().to_owned();
    let black_name = black.name().to_owned();

    for engine in [&mut *white, &mut *black] {
        if let Err(e) = engine.new_game(config.ready_timeout) {
            warn!("{} failed to start a new game: {}", engine.name(), e);
            let termination = engine_failure(&e);
            return Ok(state.into_record(
                opening,
                &white_name,
                &black_name,
                GameResult::Draw,
                termination,
            ));
        }
    }

    let timeout = config.move_timeout();
    loop {
        if let Some((result, termination)) = state.adjudicate(config.max_plies) {
            return Ok(state.into_record(opening, &white_name, &black_name, result, termination));
        }

        let mover = state.side_to_move();
        let engine = match mover {
            Color::White => &mut *white,
            Color::Black => &mut *black,
        };

        let outcome = match engine.search(&state.position_command(), &config.limits, timeout) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("{} failed to move: {}", engine.name(), e);
                let termination = engine_failure(&e);
                return Ok(state.into_record(
                    opening,
                    &white_name,
                    &black_name,
                    GameResult::Draw,
                    termination,
                ));
            }
        };

        let Some(best_move) = outcome.best_move else {
            warn!("{} has no move in a live position", engine.name());
            return Ok(state.into_record(
                opening,
                &white_name,
                &black_name,
                GameResult::loss_for(mover),
                Termination::NoMove,
            ));
        };

        if state.play(&best_move).is_none() {
            warn!(
                "{} played illegal move {} in {}",
                engine.name(),
                best_move,
                state.position_command()
            );
            return Ok(state.into_record(
                opening,
                &white_name,
                &black_name,
                GameResult::loss_for(mover),
                Termination::IllegalMove,
            ));
        }

        debug!(
            "({}) ply {}: {} | depth: {:?} score: {:?}",
            engine.name(),
            state.plies(),
            best_move,
            outcome.info.as_ref().and_then(|info| info.depth),
            outcome.info.as_ref().and_then(|info| info.score),
        );
    }
}
