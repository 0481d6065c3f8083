use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use sprt_core::{SharedSprtTest, SprtError, SprtStatus, SprtTest};

use crate::engine::{EngineProcess, EngineSpec};
use crate::error::{BattlerError, EngineError};
use crate::game::{GameConfig, GameRecord, Termination, play_game};
use crate::openings::{Opening, OpeningBook, STARTPOS_FEN};

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub fn default_concurrency() -> usize {
    (num_cpus::get() / 2).max(1)
}

#[derive(Debug, Clone)]
pub struct MatchSettings {
    /// The engine under test. Outcomes are recorded from its side.
    pub engine1: EngineSpec,
    pub engine2: EngineSpec,
    pub game: GameConfig,
    pub concurrency: usize,
    pub openings: Vec<Opening>,
    pub handshake_timeout: Duration,
}

impl MatchSettings {
    /// Engines sharing a name get `#1` and `#2` suffixes so their games
    /// can be told apart.
    pub fn new(mut engine1: EngineSpec, mut engine2: EngineSpec) -> Self {
        if engine1.name == engine2.name {
            let name1 = format!("{}#1", engine1.name);
            let name2 = format!("{}#2", engine2.name);
            engine1 = engine1.with_name(name1);
            engine2 = engine2.with_name(name2);
        }
        Self {
            engine1,
            engine2,
            game: GameConfig::default(),
            concurrency: default_concurrency(),
            openings: vec![Opening::new("startpos", STARTPOS_FEN)],
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    pub fn with_book(mut self, book: &OpeningBook) -> Result<Self, BattlerError> {
        self.openings = book.enabled()?;
        Ok(self)
    }
}

/// Opening index and whether engine1 has white for game `index`.
/// Each opening is played twice with colors swapped.
pub fn schedule(index: u32, openings: usize) -> (usize, bool) {
    let opening = (index as usize / 2) % openings.max(1);
    (opening, index % 2 == 0)
}

#[derive(Debug)]
pub enum WorkerMessage {
    GameFinished {
        index: u32,
        engine1_white: bool,
        record: GameRecord,
    },
    WorkerFailed {
        worker: usize,
        error: String,
    },
    Done,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub status: SprtStatus,
    /// Recorded games in the order their results arrived
    pub games: Vec<GameRecord>,
    pub elapsed: Duration,
    /// Set when every worker died before the test reached a verdict
    pub aborted: Option<String>,
}

impl RunSummary {
    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }
}

/// Hands out game indices until the test stops or the budget runs out
fn claim_game(next_game: &Mutex<u32>, budget: Option<u32>, test: &SharedSprtTest) -> Option<u32> {
    if test.is_finished() {
        return None;
    }
    let mut next = next_game.lock().unwrap_or_else(PoisonError::into_inner);
    if budget.is_some_and(|budget| *next >= budget) {
        return None;
    }
    let index = *next;
    *next += 1;
    Some(index)
}

fn ensure_running(
    engine: &mut EngineProcess,
    spec: &EngineSpec,
    timeout: Duration,
) -> Result<(), EngineError> {
    if !engine.is_alive() {
        warn!("{} exited, restarting it", spec.name);
        *engine = EngineProcess::start(spec, timeout)?;
    }
    Ok(())
}

/// A process that missed a deadline may still be stuck in its search, so
/// it gets replaced instead of reused.
fn restart(
    engine: &mut EngineProcess,
    spec: &EngineSpec,
    timeout: Duration,
) -> Result<(), EngineError> {
    engine.quit();
    *engine = EngineProcess::start(spec, timeout)?;
    Ok(())
}

fn ended_by_engine_fault(record: &GameRecord) -> bool {
    matches!(
        record.termination,
        Termination::Timeout | Termination::EngineFailure
    )
}

fn battling_worker(
    worker_idx: usize,
    settings: &MatchSettings,
    test: &SharedSprtTest,
    next_game: &Mutex<u32>,
    result_channel: &Sender<WorkerMessage>,
) -> Result<(), BattlerError> {
    let budget = test.config().max_games;
    let mut c1 = EngineProcess::start(&settings.engine1, settings.handshake_timeout)?;
    let mut c2 = EngineProcess::start(&settings.engine2, settings.handshake_timeout)?;
    debug!("worker {} ready", worker_idx);

    while let Some(index) = claim_game(next_game, budget, test) {
        ensure_running(&mut c1, &settings.engine1, settings.handshake_timeout)?;
        ensure_running(&mut c2, &settings.engine2, settings.handshake_timeout)?;

        let (opening_idx, engine1_white) = schedule(index, settings.openings.len());
        let opening = &settings.openings[opening_idx];
        let record = if engine1_white {
            play_game(&mut c1, &mut c2, opening, &settings.game)?
        } else {
            play_game(&mut c2, &mut c1, opening, &settings.game)?
        };

        let faulted = ended_by_engine_fault(&record);
        if faulted {
            warn!(
                "worker {}: game {} ended by {}, restarting engines",
                worker_idx,
                index + 1,
                record.termination
            );
        }

        let msg = WorkerMessage::GameFinished {
            index,
            engine1_white,
            record,
        };
        if result_channel.send(msg).is_err() {
            break;
        }

        if faulted {
            restart(&mut c1, &settings.engine1, settings.handshake_timeout)?;
            restart(&mut c2, &settings.engine2, settings.handshake_timeout)?;
        }
    }

    c1.quit();
    c2.quit();
    Ok(())
}

/// Plays games between two engines on a pool of worker threads until the
/// SPRT reaches a decision or the game budget is spent.
pub struct SprtRunner {
    settings: Arc<MatchSettings>,
    test: SharedSprtTest,
}

impl SprtRunner {
    pub fn new(settings: MatchSettings, test: SprtTest) -> Self {
        Self {
            settings: Arc::new(settings),
            test: SharedSprtTest::new(test),
        }
    }

    pub fn test(&self) -> &SharedSprtTest {
        &self.test
    }

    pub fn settings(&self) -> &MatchSettings {
        &self.settings
    }

    /// `on_game` sees every recorded game together with the status right after it
    pub fn run<F>(&self, mut on_game: F) -> Result<RunSummary, BattlerError>
    where
        F: FnMut(&GameRecord, &SprtStatus),
    {
        if self.settings.openings.is_empty() {
            return Err(BattlerError::EmptyOpeningBook);
        }

        let started_at = Instant::now();
        let budget = self.test.config().max_games;
        let num_workers = match budget {
            Some(budget) => self.settings.concurrency.clamp(1, budget.max(1) as usize),
            None => self.settings.concurrency.max(1),
        };

        info!(
            "Starting {} workers: {} vs {}",
            num_workers, self.settings.engine1.name, self.settings.engine2.name
        );

        let (tx, rx) = mpsc::channel::<WorkerMessage>();
        let next_game = Arc::new(Mutex::new(0u32));

        for worker_idx in 0..num_workers {
            let tx = tx.clone();
            let settings = Arc::clone(&self.settings);
            let test = self.test.clone();
            let next_game = Arc::clone(&next_game);
            std::thread::spawn(move || {
                if let Err(e) = battling_worker(worker_idx, &settings, &test, &next_game, &tx) {
                    let _ = tx.send(WorkerMessage::WorkerFailed {
                        worker: worker_idx,
                        error: e.to_string(),
                    });
                }
                let _ = tx.send(WorkerMessage::Done);
            });
        }
        drop(tx);

        let mut games = Vec::<GameRecord>::new();
        let mut last_failure = None;
        let mut done_workers_count = 0;
        while done_workers_count < num_workers {
            let Ok(msg) = rx.recv() else {
                break;
            };
            match msg {
                WorkerMessage::GameFinished {
                    index,
                    engine1_white,
                    record,
                } => {
                    let white_outcome = record.result.white_outcome();
                    let outcome = if engine1_white {
                        white_outcome
                    } else {
                        white_outcome.flip()
                    };

                    match self.test.record(outcome) {
                        Ok(state) => {
                            info!("Game {}: {}", index + 1, record.pretty());
                            let status = self.test.status();
                            on_game(&record, &status);
                            games.push(record);
                            if state.is_terminal() {
                                info!("Test finished with {} after {} games", state, games.len());
                            }
                        }
                        Err(SprtError::TestFinished(state)) => {
                            debug!(
                                "Dropping game {} finished after the test reached {}",
                                index + 1,
                                state
                            );
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                WorkerMessage::WorkerFailed { worker, error } => {
                    error!("Worker {} failed: {}", worker, error);
                    last_failure = Some(error);
                }
                WorkerMessage::Done => {
                    done_workers_count += 1;
                }
            }
        }

        if games.is_empty() {
            if let Some(error) = last_failure {
                return Err(BattlerError::WorkersFailed(error));
            }
        }

        let status = self.test.status();
        let aborted = if status.state.is_terminal() {
            None
        } else {
            let reason = last_failure.unwrap_or_else(|| "workers stopped early".to_owned());
            error!(
                "Run aborted after {} games without a verdict: {}",
                games.len(),
                reason
            );
            Some(reason)
        };

        Ok(RunSummary {
            status,
            games,
            elapsed: started_at.elapsed(),
            aborted,
        })
    }
}
