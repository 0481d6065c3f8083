use std::path::Path;
use std::time::Duration;

use csv::Writer;
use serde::Serialize;

use crate::engine::{EngineProcess, SearchLimits, SearchOutcome};
use crate::error::BattlerError;
use crate::openings::{normalize_fen, parse_board};

/// How deep and wide one engine got on one position in a fixed time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepthSample {
    pub timestamp: String,
    pub engine: String,
    pub fen: String,
    pub time_ms: u64,
    pub depth: Option<u32>,
    pub nodes: Option<u64>,
    pub bestmove: Option<String>,
    pub score: Option<String>,
    pub hashfull: Option<u32>,
}

impl DepthSample {
    fn from_outcome(engine: &str, fen: &str, movetime: Duration, outcome: &SearchOutcome) -> Self {
        let info = outcome.info.as_ref();
        Self {
            timestamp: crate::report::timestamp_string(),
            engine: engine.to_owned(),
            fen: fen.to_owned(),
            time_ms: movetime.as_millis() as u64,
            depth: info.and_then(|i| i.depth),
            nodes: info.and_then(|i| i.nodes),
            bestmove: outcome.best_move.clone(),
            score: info.and_then(|i| i.score).map(|s| s.to_string()),
            hashfull: info.and_then(|i| i.hashfull),
        }
    }

    pub fn pretty(&self) -> String {
        fn or_dash<T: ToString>(value: &Option<T>) -> String {
            value.as_ref().map_or_else(|| "-".to_owned(), T::to_string)
        }
        format!(
            "{}: depth={} nodes={} hashfull={} score={} move={}",
            self.engine,
            or_dash(&self.depth),
            or_dash(&self.nodes),
            or_dash(&self.hashfull),
            or_dash(&self.score),
            or_dash(&self.bestmove),
        )
    }
}

/// `startpos` passes through, anything else is checked and sent as a FEN
pub fn position_arg(fen: &str) -> Result<String, BattlerError> {
    let fen = fen.trim();
    if fen == "startpos" {
        return Ok(fen.to_owned());
    }
    let fen = normalize_fen(fen);
    parse_board(&fen)?;
    Ok(format!("fen {}", fen))
}

/// Searches `fen` for `movetime` in a fresh game and keeps the last
/// search info the engine printed.
pub fn sample_position(
    engine: &mut EngineProcess,
    fen: &str,
    movetime: Duration,
    margin: Duration,
) -> Result<DepthSample, BattlerError> {
    let position = position_arg(fen)?;
    let timeout = movetime + margin;
    engine.new_game(timeout)?;
    let outcome = engine.search(&position, &SearchLimits::movetime(movetime), timeout)?;
    Ok(DepthSample::from_outcome(engine.name(), fen, movetime, &outcome))
}

pub fn write_samples_csv(path: &Path, samples: &[DepthSample]) -> Result<(), BattlerError> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let mut wtr = Writer::from_path(path)?;
    for sample in samples {
        wtr.serialize(sample)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprt_core::uci_types::{InfoLine, Score};

    fn outcome() -> SearchOutcome {
        SearchOutcome {
            best_move: Some("e2e4".to_owned()),
            ponder: None,
            info: Some(InfoLine {
                depth: Some(14),
                nodes: Some(250_000),
                score: Some(Score::Centipawns(31)),
                hashfull: Some(120),
                ..InfoLine::default()
            }),
            elapsed: Duration::from_millis(1000),
        }
    }

    #[test]
    fn test_position_arg() {
        assert_eq!(position_arg("startpos").unwrap(), "startpos");
        assert_eq!(
            position_arg("8/8/8/4k3/8/8/8/4K3 w - -").unwrap(),
            "fen 8/8/8/4k3/8/8/8/4K3 w - - 0 1"
        );
        assert!(matches!(
            position_arg("not a position"),
            Err(BattlerError::InvalidFen { .. })
        ));
    }

    #[test]
    fn test_sample_from_outcome() {
        let sample = DepthSample::from_outcome("stage7", "startpos", Duration::from_secs(1), &outcome());
        assert_eq!(sample.time_ms, 1000);
        assert_eq!(sample.depth, Some(14));
        assert_eq!(sample.nodes, Some(250_000));
        assert_eq!(sample.score.as_deref(), Some("31"));
        assert_eq!(sample.hashfull, Some(120));
        assert_eq!(
            sample.pretty(),
            "stage7: depth=14 nodes=250000 hashfull=120 score=31 move=e2e4"
        );

        let silent = SearchOutcome {
            best_move: None,
            info: None,
            ..outcome()
        };
        let sample = DepthSample::from_outcome("quiet", "startpos", Duration::from_secs(1), &silent);
        assert_eq!(
            sample.pretty(),
            "quiet: depth=- nodes=- hashfull=- score=- move=-"
        );
    }

    #[test]
    fn test_samples_csv() {
        let dir = std::env::temp_dir().join(format!("battler-telemetry-{}", std::process::id()));
        let path = dir.join("nested").join("depth.csv");
        let mut sample = DepthSample::from_outcome("stage7", "startpos", Duration::from_secs(1), &outcome());
        sample.timestamp = "20250101_000000".to_owned();
        let mut empty = sample.clone();
        empty.hashfull = None;
        empty.score = None;
        write_samples_csv(&path, &[sample, empty]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "timestamp,engine,fen,time_ms,depth,nodes,bestmove,score,hashfull",
                "20250101_000000,stage7,startpos,1000,14,250000,e2e4,31,120",
                "20250101_000000,stage7,startpos,1000,14,250000,e2e4,,",
            ]
        );

        let _ = std::fs::remove_dir_all(dir);
    }
}
