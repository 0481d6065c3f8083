use std::time::{Duration, Instant};

use battler::game::DEFAULT_MAX_PLIES;
use battler::openings::STARTPOS_FEN;
use battler::telemetry::sample_position;
use battler::{
    EngineProcess, EngineSpec, GameConfig, GameResult, MatchSettings, Opening, SearchLimits,
    SprtRunner, Termination, play_game,
};
use sprt_core::uci_types::UciLine;
use sprt_core::{SprtConfig, SprtState, SprtTest};

const TIMEOUT: Duration = Duration::from_secs(10);

fn random_mover(name: &str, extra_args: &[&str]) -> EngineSpec {
    let mut spec = EngineSpec::new(env!("CARGO_BIN_EXE_random_mover"))
        .with_name(name)
        .with_option("Hash", "16");
    for arg in extra_args {
        spec = spec.with_arg(*arg);
    }
    spec
}

fn fast_config() -> GameConfig {
    GameConfig {
        limits: SearchLimits::movetime(Duration::from_millis(10)),
        max_plies: DEFAULT_MAX_PLIES,
        timeout_margin: Duration::from_secs(5),
        search_timeout: TIMEOUT,
        ready_timeout: TIMEOUT,
    }
}

#[test]
fn test_handshake_and_search() {
    let mut engine = EngineProcess::start(&random_mover("mover", &[]), TIMEOUT).unwrap();
    assert_eq!(engine.id_name(), Some("random_mover"));
    assert!(engine.is_alive());

    engine.new_game(TIMEOUT).unwrap();
    let outcome = engine
        .search("startpos moves e2e4", &SearchLimits::default(), TIMEOUT)
        .unwrap();
    let best = outcome.best_move.expect("a move from the start position");
    assert_eq!(best.len(), 4);
    assert!(best.starts_with(|c: char| ('a'..='h').contains(&c)));
    assert!(outcome.info.is_some());

    engine.send("isready").unwrap();
    let line = engine.read_line(Instant::now() + TIMEOUT).unwrap();
    assert_eq!(line, UciLine::ReadyOk);

    engine.send("uci").unwrap();
    let line = engine
        .wait_for("uciok", TIMEOUT, |line| *line == UciLine::UciOk)
        .unwrap();
    assert_eq!(line, UciLine::UciOk);

    engine.quit();
    assert!(!engine.is_alive());
}

#[test]
fn test_no_move_when_mated() {
    let mut engine = EngineProcess::start(&random_mover("mover", &[]), TIMEOUT).unwrap();
    let outcome = engine
        .search(
            &format!("fen {} moves f2f3 e7e5 g2g4 d8h4", STARTPOS_FEN),
            &SearchLimits::default(),
            TIMEOUT,
        )
        .unwrap();
    assert_eq!(outcome.best_move, None);
}

#[test]
fn test_full_game_terminates() {
    let mut white = EngineProcess::start(&random_mover("white", &["--seed", "1"]), TIMEOUT).unwrap();
    let mut black = EngineProcess::start(&random_mover("black", &["--seed", "2"]), TIMEOUT).unwrap();
    let opening = Opening::new("startpos", STARTPOS_FEN);

    let record = play_game(&mut white, &mut black, &opening, &fast_config()).unwrap();
    assert_eq!(record.white, "white");
    assert_eq!(record.black, "black");
    assert_eq!(record.plies as usize, record.moves.len());
    assert!(record.plies <= DEFAULT_MAX_PLIES);
    assert!(!matches!(
        record.termination,
        Termination::Timeout | Termination::EngineFailure | Termination::IllegalMove
    ));
    if record.termination == Termination::MaxPlies {
        assert_eq!(record.result, GameResult::Draw);
    }
}

#[test]
fn test_four_game_sprt_is_inconclusive() {
    let settings = MatchSettings {
        game: fast_config(),
        concurrency: 2,
        ..MatchSettings::new(random_mover("new", &[]), random_mover("base", &[]))
    };
    let config = SprtConfig::new(0.0, 5.0, 0.05, 0.05).with_max_games(4);
    let runner = SprtRunner::new(settings, SprtTest::new(config).unwrap());

    let mut seen = Vec::new();
    let summary = runner
        .run(|record, status| seen.push((record.clone(), status.counts.games())))
        .unwrap();

    assert_eq!(summary.status.state, SprtState::Inconclusive);
    assert_eq!(summary.status.counts.games(), 4);
    assert_eq!(summary.games.len(), 4);
    let progress: Vec<u32> = seen.iter().map(|(_, games)| *games).collect();
    assert_eq!(progress, vec![1, 2, 3, 4]);

    let whites = summary.games.iter().filter(|g| g.white == "new").count();
    assert_eq!(whites, 2);
}

#[test]
fn test_stalled_engine_draws_on_timeout() {
    let mut white = EngineProcess::start(&random_mover("staller", &["--stall"]), TIMEOUT).unwrap();
    let mut black = EngineProcess::start(&random_mover("mover", &[]), TIMEOUT).unwrap();
    let opening = Opening::new("startpos", STARTPOS_FEN);
    let config = GameConfig {
        limits: SearchLimits::movetime(Duration::from_millis(20)),
        timeout_margin: Duration::from_millis(300),
        ..fast_config()
    };

    let record = play_game(&mut white, &mut black, &opening, &config).unwrap();
    assert_eq!(record.result, GameResult::Draw);
    assert_eq!(record.termination, Termination::Timeout);
    assert_eq!(record.plies, 0);
}

#[test]
fn test_first_mover_is_deterministic() {
    let play = || {
        let mut white = EngineProcess::start(&random_mover("a", &["--first"]), TIMEOUT).unwrap();
        let mut black = EngineProcess::start(&random_mover("b", &["--first"]), TIMEOUT).unwrap();
        let opening = Opening::new("startpos", STARTPOS_FEN);
        let config = GameConfig {
            max_plies: 20,
            ..fast_config()
        };
        play_game(&mut white, &mut black, &opening, &config).unwrap()
    };

    let first = play();
    let second = play();
    assert_eq!(first.moves, second.moves);
    assert!(first.plies <= 20);
}

#[test]
fn test_engine_restarted_after_timeout() {
    let marker = std::env::temp_dir().join(format!("battler-stall-once-{}", std::process::id()));
    let _ = std::fs::remove_file(&marker);
    let staller = random_mover("staller", &["--stall-once", marker.to_str().unwrap()]);

    let settings = MatchSettings {
        game: GameConfig {
            timeout_margin: Duration::from_millis(300),
            ..fast_config()
        },
        concurrency: 1,
        ..MatchSettings::new(staller, random_mover("mover", &[]))
    };
    let config = SprtConfig::new(0.0, 5.0, 0.05, 0.05).with_max_games(4);
    let runner = SprtRunner::new(settings, SprtTest::new(config).unwrap());
    let summary = runner.run(|_, _| {}).unwrap();

    let terminations: Vec<Termination> = summary.games.iter().map(|g| g.termination).collect();
    assert_eq!(terminations.len(), 4);
    assert_eq!(terminations[0], Termination::Timeout);
    assert!(
        terminations[1..].iter().all(|t| *t != Termination::Timeout),
        "{terminations:?}"
    );
    assert_eq!(summary.status.state, SprtState::Inconclusive);
    assert!(!summary.is_aborted());

    let _ = std::fs::remove_file(marker);
}

#[test]
fn test_run_aborted_when_workers_die_mid_run() {
    let settings = MatchSettings {
        game: fast_config(),
        concurrency: 1,
        openings: vec![
            Opening::new("startpos", STARTPOS_FEN),
            Opening::new("broken", "not a fen"),
        ],
        ..MatchSettings::new(random_mover("new", &[]), random_mover("base", &[]))
    };
    let config = SprtConfig::new(0.0, 5.0, 0.05, 0.05).with_max_games(10);
    let runner = SprtRunner::new(settings, SprtTest::new(config).unwrap());
    let summary = runner.run(|_, _| {}).unwrap();

    assert_eq!(summary.games.len(), 2);
    assert_eq!(summary.status.state, SprtState::Running);
    let reason = summary.aborted.expect("run should be marked aborted");
    assert!(reason.contains("invalid FEN"), "{reason}");
}

#[test]
fn test_depth_sample_from_engine() {
    let mut engine = EngineProcess::start(&random_mover("mover", &[]), TIMEOUT).unwrap();
    let sample = sample_position(
        &mut engine,
        "startpos",
        Duration::from_millis(20),
        Duration::from_secs(5),
    )
    .unwrap();
    assert_eq!(sample.engine, "mover");
    assert_eq!(sample.depth, Some(1));
    assert_eq!(sample.nodes, Some(20));
    assert_eq!(sample.score.as_deref(), Some("0"));
    assert!(sample.bestmove.is_some());

    let kings = sample_position(
        &mut engine,
        "8/8/8/4k3/8/8/8/4K3 w - -",
        Duration::from_millis(20),
        TIMEOUT,
    )
    .unwrap();
    assert_eq!(kings.nodes, Some(5));
}
