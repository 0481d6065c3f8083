use std::io;
use std::path::PathBuf;

use sprt_core::SprtError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to spawn engine {}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("engine i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("{engine} timed out waiting for {waiting_for}")]
    Timeout { engine: String, waiting_for: String },
    #[error("{engine} closed its output")]
    Disconnected { engine: String },
}

impl EngineError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, EngineError::Timeout { .. })
    }
}

#[derive(Debug, Error)]
pub enum BattlerError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Sprt(#[from] SprtError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("opening book: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error("invalid FEN {fen:?}: {reason}")]
    InvalidFen { fen: String, reason: String },
    #[error("bad EPD line {line:?}: {reason}")]
    Epd { line: String, reason: String },
    #[error("engine option must look like NAME=VALUE, got {0:?}")]
    InvalidOption(String),
    #[error("opening book has no enabled positions")]
    EmptyOpeningBook,
    #[error("no games were played, last worker error: {0}")]
    WorkersFailed(String),
}
