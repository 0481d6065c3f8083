//! Engine to GUI side of the UCI protocol, one tagged variant per output line.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Score {
    Centipawns(i32),
    /// Moves to mate, negative when the engine is getting mated
    Mate(i32),
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Score::Centipawns(cp) => write!(f, "{cp}"),
            Score::Mate(moves) => write!(f, "M{moves}"),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreBound {
    Lower,
    Upper,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoLine {
    pub depth: Option<u32>,
    pub seldepth: Option<u32>,
    pub multipv: Option<u32>,
    pub score: Option<Score>,
    pub score_bound: Option<ScoreBound>,
    pub nodes: Option<u64>,
    pub nps: Option<u64>,
    pub time_ms: Option<u64>,
    pub hashfull: Option<u32>,
    pub tbhits: Option<u64>,
    pub currmove: Option<String>,
    pub pv: Vec<String>,
    /// Free text after `info string`, which swallows the rest of the line
    pub string: Option<String>,
}

impl InfoLine {
    fn parse<'a>(mut tokens: impl Iterator<Item = &'a str>) -> Self {
        fn number<'a, T: std::str::FromStr>(tokens: &mut impl Iterator<Item = &'a str>) -> Option<T> {
            tokens.next().and_then(|t| t.parse().ok())
        }

        let mut info = InfoLine::default();
        while let Some(token) = tokens.next() {
            match token {
                "depth" => info.depth = number(&mut tokens),
                "seldepth" => info.seldepth = number(&mut tokens),
                "multipv" => info.multipv = number(&mut tokens),
                "nodes" => info.nodes = number(&mut tokens),
                "nps" => info.nps = number(&mut tokens),
                "time" => info.time_ms = number(&mut tokens),
                "hashfull" => info.hashfull = number(&mut tokens),
                "tbhits" => info.tbhits = number(&mut tokens),
                "currmove" => info.currmove = tokens.next().map(str::to_owned),
                "score" => {
                    info.score = match tokens.next() {
                        Some("cp") => number(&mut tokens).map(Score::Centipawns),
                        Some("mate") => number(&mut tokens).map(Score::Mate),
                        _ => None,
                    };
                }
                "lowerbound" => info.score_bound = Some(ScoreBound::Lower),
                "upperbound" => info.score_bound = Some(ScoreBound::Upper),
                "pv" => {
                    info.pv = tokens.by_ref().map(str::to_owned).collect();
                }
                "string" => {
                    let rest: Vec<&str> = tokens.by_ref().collect();
                    info.string = Some(rest.join(" "));
                }
                _ => {}
            }
        }
        info
    }

    /// `info string` lines carry debug text rather than search progress
    pub fn is_search_progress(&self) -> bool {
        self.string.is_none() && (self.depth.is_some() || self.score.is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UciLine {
    Id { key: String, value: String },
    UciOk,
    ReadyOk,
    Info(InfoLine),
    /// `best` is `None` for `bestmove (none)` and `bestmove 0000`
    BestMove {
        best: Option<String>,
        ponder: Option<String>,
    },
    OptionDecl(String),
    Other(String),
}

impl UciLine {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        let mut tokens = trimmed.split_whitespace();

        match tokens.next() {
            Some("uciok") => UciLine::UciOk,
            Some("readyok") => UciLine::ReadyOk,
            Some("id") => {
                let key = tokens.next().unwrap_or_default().to_owned();
                let value = tokens.collect::<Vec<_>>().join(" ");
                UciLine::Id { key, value }
            }
            Some("info") => UciLine::Info(InfoLine::parse(tokens)),
            Some("bestmove") => {
                let best = tokens
                    .next()
                    .filter(|mv| !matches!(*mv, "(none)" | "0000" | "none"))
                    .map(str::to_owned);
                let ponder = match tokens.next() {
                    Some("ponder") => tokens.next().map(str::to_owned),
                    _ => None,
                };
                UciLine::BestMove { best, ponder }
            }
            Some("option") => UciLine::OptionDecl(trimmed["option".len()..].trim().to_owned()),
            _ => UciLine::Other(trimmed.to_owned()),
        }
    }
}
