use std::path::Path;
use std::str::FromStr;

use chess::Board;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::error::BattlerError;

pub const STARTPOS_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Opening {
    pub name: String,
    pub fen: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Opening {
    pub fn new(name: impl Into<String>, fen: &str) -> Self {
        Self {
            name: name.into(),
            fen: normalize_fen(fen),
            notes: String::new(),
            is_enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpeningBook {
    pub positions: Vec<Opening>,
}

impl OpeningBook {
    pub fn startpos() -> Self {
        Self {
            positions: vec![Opening::new("startpos", STARTPOS_FEN)],
        }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, BattlerError> {
        let mut book: OpeningBook = serde_yaml::from_str(yaml)?;
        for position in book.positions.iter_mut() {
            position.fen = normalize_fen(&position.fen);
            parse_board(&position.fen)?;
        }
        Ok(book)
    }

    pub fn load(path: &Path) -> Result<Self, BattlerError> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    pub fn write(&self, path: &Path) -> Result<(), BattlerError> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Enabled positions in book order. Errors if nothing is left to play.
    pub fn enabled(&self) -> Result<Vec<Opening>, BattlerError> {
        let enabled: Vec<Opening> = self
            .positions
            .iter()
            .filter(|p| p.is_enabled)
            .cloned()
            .collect();
        if enabled.is_empty() {
            return Err(BattlerError::EmptyOpeningBook);
        }
        Ok(enabled)
    }

    pub fn shuffle(&mut self, seed: Option<u64>) {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        self.positions.shuffle(&mut rng);
    }
}

/// EPD style positions stop after the en passant field; pad them with
/// zeroed move counters.
pub fn normalize_fen(fen: &str) -> String {
    let fields: Vec<&str> = fen.split_whitespace().collect();
    match fields.len() {
        4 => format!("{} 0 1", fields.join(" ")),
        5 => format!("{} 1", fields.join(" ")),
        _ => fields.join(" "),
    }
}

pub fn parse_board(fen: &str) -> Result<Board, BattlerError> {
    Board::from_str(fen).map_err(|e| BattlerError::InvalidFen {
        fen: fen.to_owned(),
        reason: format!("{:?}", e),
    })
}

/// Halfmove clock from the fifth FEN field, zero when absent
pub fn halfmove_clock(fen: &str) -> u32 {
    fen.split_whitespace()
        .nth(4)
        .and_then(|field| field.parse().ok())
        .unwrap_or(0)
}
