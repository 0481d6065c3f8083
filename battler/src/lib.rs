pub mod engine;
pub mod error;
pub mod game;
pub mod openings;
pub mod report;
pub mod runner;
pub mod tactics;
pub mod telemetry;

pub use engine::{EngineProcess, EngineSpec, SearchLimits, SearchOutcome};
pub use error::{BattlerError, EngineError};
pub use game::{GameConfig, GameRecord, GameResult, Termination, play_game};
pub use openings::{Opening, OpeningBook};
pub use runner::{MatchSettings, RunSummary, SprtRunner, WorkerMessage};
