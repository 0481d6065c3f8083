use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::str::FromStr;

use chess::{Board, ChessMove, MoveGen};
use clap::Parser;
use log::warn;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;

/// Minimal UCI engine that plays random legal moves
#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    seed: Option<u64>,

    /// Always play the first generated move instead of a random one
    #[arg(long)]
    first: bool,

    /// Never answer `go`, for exercising timeouts
    #[arg(long)]
    stall: bool,

    /// Ignore the first `go` unless this file exists, then create it. The
    /// stall happens once across restarts.
    #[arg(long, value_name = "FILE")]
    stall_once: Option<PathBuf>,
}

struct RandomMover {
    board: Board,
    rng: StdRng,
    first: bool,
    stall: bool,
    stall_once: Option<PathBuf>,
}

impl RandomMover {
    fn should_stall(&mut self) -> bool {
        if self.stall {
            return true;
        }
        let Some(marker) = self.stall_once.take() else {
            return false;
        };
        if marker.exists() {
            return false;
        }
        if let Err(e) = std::fs::write(&marker, b"stalled") {
            warn!("Failed to write {}: {}", marker.display(), e);
        }
        true
    }

    fn set_position(&mut self, parts: &[&str]) -> Result<(), String> {
        let moves_at = parts.iter().position(|p| *p == "moves");
        let (setup, moves) = match moves_at {
            Some(idx) => (&parts[..idx], &parts[idx + 1..]),
            None => (parts, &[][..]),
        };

        let mut board = match setup.split_first() {
            Some((&"startpos", _)) => Board::default(),
            Some((&"fen", fen)) => {
                Board::from_str(&fen.join(" ")).map_err(|e| format!("Error parsing FEN: {:?}", e))?
            }
            _ => return Err(format!("Bad position command: {}", parts.join(" "))),
        };

        for mv in moves {
            let parsed = ChessMove::from_str(mv).map_err(|e| format!("Bad move {}: {:?}", mv, e))?;
            if !board.legal(parsed) {
                return Err(format!("Illegal move {} in {}", mv, board));
            }
            board = board.make_move_new(parsed);
        }

        self.board = board;
        Ok(())
    }

    fn choose_move(&mut self) -> Option<ChessMove> {
        let legal_moves: Vec<ChessMove> = MoveGen::new_legal(&self.board).collect();
        if self.first {
            legal_moves.first().copied()
        } else {
            legal_moves.choose(&mut self.rng).copied()
        }
    }

    fn handle_command(&mut self, raw_cmd: &str) -> Result<Vec<String>, String> {
        let parts: Vec<&str> = raw_cmd.split_whitespace().collect();
        let Some((command, args)) = parts.split_first() else {
            return Ok(vec![]);
        };

        match *command {
            "uci" => Ok(vec![
                "id name random_mover".to_owned(),
                "id author battler".to_owned(),
                "uciok".to_owned(),
            ]),
            "isready" => Ok(vec!["readyok".to_owned()]),
            "ucinewgame" => {
                self.board = Board::default();
                Ok(vec![])
            }
            "setoption" | "stop" | "ponderhit" => Ok(vec![]),
            "position" => {
                self.set_position(args)?;
                Ok(vec![])
            }
            "go" => {
                if self.should_stall() {
                    return Ok(vec![]);
                }
                let legal_count = MoveGen::new_legal(&self.board).len();
                let best = match self.choose_move() {
                    Some(mv) => mv.to_string(),
                    None => "(none)".to_owned(),
                };
                Ok(vec![
                    format!("info depth 1 score cp 0 nodes {} time 0 pv {}", legal_count, best),
                    format!("bestmove {}", best),
                ])
            }
            _ => Err(format!("Skipping unknown command: {}", raw_cmd.trim())),
        }
    }
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_rng(&mut rand::rng()),
    };
    let mut engine = RandomMover {
        board: Board::default(),
        rng,
        first: args.first,
        stall: args.stall,
        stall_once: args.stall_once,
    };

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    for line in stdin.lock().lines() {
        let Ok(raw_cmd) = line else {
            break;
        };
        if raw_cmd.trim() == "quit" {
            break;
        }

        match engine.handle_command(&raw_cmd) {
            Ok(responses) => {
                for response in responses {
                    if writeln!(stdout, "{}", response).is_err() {
                        return;
                    }
                }
                if stdout.flush().is_err() {
                    return;
                }
            }
            Err(e) => warn!("{}", e),
        }
    }
}
