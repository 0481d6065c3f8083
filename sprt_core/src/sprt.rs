use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::elo::elo_to_score;
use crate::error::SprtError;

/// Frequencies of exactly zero are replaced by this before taking a log
pub const ZERO_FREQUENCY_CLAMP: f64 = 0.001;

/// Result of a single game, seen from the engine under test
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    #[strum(to_string = "win", serialize = "w", serialize = "1", serialize = "1-0")]
    Win,
    #[strum(
        to_string = "draw",
        serialize = "d",
        serialize = "0.5",
        serialize = "1/2",
        serialize = "1/2-1/2"
    )]
    Draw,
    #[strum(to_string = "loss", serialize = "l", serialize = "0", serialize = "0-1")]
    Loss,
}

impl Outcome {
    /// Parses a textual result, rejecting anything that isn't clearly a win, draw or loss
    pub fn from_label(label: &str) -> Result<Self, SprtError> {
        Outcome::from_str(label.trim()).map_err(|_| SprtError::InvalidOutcome(label.to_owned()))
    }

    /// Maps a game score (1, 0.5 or 0) onto an outcome
    pub fn from_score(score: f64) -> Result<Self, SprtError> {
        if score == 1.0 {
            Ok(Outcome::Win)
        } else if score == 0.5 {
            Ok(Outcome::Draw)
        } else if score == 0.0 {
            Ok(Outcome::Loss)
        } else {
            Err(SprtError::InvalidOutcome(score.to_string()))
        }
    }

    pub fn flip(self) -> Self {
        match self {
            Outcome::Win => Outcome::Loss,
            Outcome::Draw => Outcome::Draw,
            Outcome::Loss => Outcome::Win,
        }
    }
}

/// Accumulated game results
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub wins: u32,
    pub draws: u32,
    pub losses: u32,
}

impl Counts {
    pub fn games(&self) -> u32 {
        self.wins + self.draws + self.losses
    }

    /// Points scored, counting draws as half a point
    pub fn score(&self) -> f64 {
        self.wins as f64 + 0.5 * self.draws as f64
    }

    /// Fraction of available points scored. An empty record counts as even.
    pub fn score_ratio(&self) -> f64 {
        let games = self.games();
        if games == 0 {
            return 0.5;
        }
        self.score() / games as f64
    }

    fn add(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Win => self.wins += 1,
            Outcome::Draw => self.draws += 1,
            Outcome::Loss => self.losses += 1,
        }
    }
}

impl fmt::Display for Counts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.wins, self.draws, self.losses)
    }
}

/// LLR stopping boundaries derived from the error rates
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct SprtBounds {
    pub lower: f64,
    pub upper: f64,
}

impl SprtBounds {
    pub fn from_errors(alpha: f64, beta: f64) -> Self {
        Self {
            lower: (beta / (1.0 - alpha)).ln(),
            upper: ((1.0 - beta) / alpha).ln(),
        }
    }
}

impl fmt::Display for SprtBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:.3}, {:.3}]", self.lower, self.upper)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct SprtConfig {
    /// H0: the Elo difference is elo0 or less
    pub elo0: f64,
    /// H1: the Elo difference is elo1 or more
    pub elo1: f64,
    /// Probability of accepting H1 when H0 is true
    pub alpha: f64,
    /// Probability of accepting H0 when H1 is true
    pub beta: f64,
    /// Games after which a still running test is declared inconclusive
    pub max_games: Option<u32>,
}

impl Default for SprtConfig {
    fn default() -> Self {
        Self::new(0.0, 5.0, 0.05, 0.05)
    }
}

impl SprtConfig {
    pub fn new(elo0: f64, elo1: f64, alpha: f64, beta: f64) -> Self {
        Self {
            elo0,
            elo1,
            alpha,
            beta,
            max_games: None,
        }
    }

    pub fn with_max_games(mut self, max_games: u32) -> Self {
        self.max_games = Some(max_games);
        self
    }

    pub fn validate(&self) -> Result<(), SprtError> {
        // Written as negated ranges so that NaN is rejected too
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(SprtError::InvalidAlpha(self.alpha));
        }
        if !(self.beta > 0.0 && self.beta < 1.0) {
            return Err(SprtError::InvalidBeta(self.beta));
        }
        if self.max_games == Some(0) {
            return Err(SprtError::InvalidGameBudget);
        }
        if self.elo1 <= self.elo0 {
            log::warn!(
                "elo1 ({}) is not above elo0 ({}), the test cannot detect an improvement",
                self.elo1,
                self.elo0
            );
        }
        Ok(())
    }

    pub fn bounds(&self) -> SprtBounds {
        SprtBounds::from_errors(self.alpha, self.beta)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SprtDecision {
    /// Neither boundary has been reached
    Continue,
    /// Upper boundary reached: H1 accepted, improvement detected
    Pass,
    /// Lower boundary reached: H0 accepted, no improvement
    Fail,
}

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, Display, IntoStaticStr, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum SprtState {
    #[strum(to_string = "RUNNING")]
    Running,
    #[strum(to_string = "PASS")]
    Passed,
    #[strum(to_string = "FAIL")]
    Failed,
    #[strum(to_string = "INCONCLUSIVE")]
    Inconclusive,
}

impl SprtState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SprtState::Running)
    }
}

/// Point-in-time view of a test
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct SprtStatus {
    pub state: SprtState,
    pub llr: f64,
    pub bounds: SprtBounds,
    pub counts: Counts,
}

impl fmt::Display for SprtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Games: {} | W/D/L: {} | LLR: {:+.3} {} | {}",
            self.counts.games(),
            self.counts,
            self.llr,
            self.bounds,
            self.state
        )
    }
}

/// Log-likelihood ratio of H1 against H0 for a set of results.
///
/// Only the win and loss frequencies enter the likelihood; draws are counted
/// in the number of games and nowhere else.
pub fn llr_for(counts: &Counts, elo0: f64, elo1: f64) -> f64 {
    let games = counts.games();
    if games == 0 {
        return 0.0;
    }
    let n = games as f64;

    let clamp = |freq: f64| if freq == 0.0 { ZERO_FREQUENCY_CLAMP } else { freq };
    let w = clamp(counts.wins as f64 / n);
    let l = clamp(counts.losses as f64 / n);

    let p0 = elo_to_score(elo0);
    let p1 = elo_to_score(elo1);

    n * (w * (p1 / p0).ln() + l * ((1.0 - p1) / (1.0 - p0)).ln())
}

/// Sequential probability ratio test between an engine under test and a baseline
#[derive(Debug, Clone)]
pub struct SprtTest {
    config: SprtConfig,
    bounds: SprtBounds,
    counts: Counts,
    state: SprtState,
}

impl SprtTest {
    pub fn new(config: SprtConfig) -> Result<Self, SprtError> {
        config.validate()?;
        Ok(Self {
            bounds: config.bounds(),
            config,
            counts: Counts::default(),
            state: SprtState::Running,
        })
    }

    pub fn config(&self) -> &SprtConfig {
        &self.config
    }

    pub fn bounds(&self) -> SprtBounds {
        self.bounds
    }

    pub fn counts(&self) -> Counts {
        self.counts
    }

    pub fn state(&self) -> SprtState {
        self.state
    }

    pub fn llr(&self) -> f64 {
        llr_for(&self.counts, self.config.elo0, self.config.elo1)
    }

    pub fn decide(&self) -> SprtDecision {
        let llr = self.llr();
        if llr >= self.bounds.upper {
            SprtDecision::Pass
        } else if llr <= self.bounds.lower {
            SprtDecision::Fail
        } else {
            SprtDecision::Continue
        }
    }

    /// Adds one game and advances the state machine.
    /// A test that already reached a verdict refuses further results.
    pub fn record(&mut self, outcome: Outcome) -> Result<SprtState, SprtError> {
        if self.state.is_terminal() {
            return Err(SprtError::TestFinished(self.state));
        }

        self.counts.add(outcome);

        self.state = match self.decide() {
            SprtDecision::Pass => SprtState::Passed,
            SprtDecision::Fail => SprtState::Failed,
            SprtDecision::Continue => match self.config.max_games {
                Some(max_games) if self.counts.games() >= max_games => SprtState::Inconclusive,
                _ => SprtState::Running,
            },
        };

        Ok(self.state)
    }

    pub fn status(&self) -> SprtStatus {
        SprtStatus {
            state: self.state,
            llr: self.llr(),
            bounds: self.bounds,
            counts: self.counts,
        }
    }
}

impl fmt::Display for SprtTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.counts.games();
        if total == 0 {
            return write!(f, "No games recorded");
        }

        write!(
            f,
            "Games: {} (W: {}, D: {}, L: {}), Score: {:.1}%, LLR: {:+.3} {}, Status: {}",
            total,
            self.counts.wins,
            self.counts.draws,
            self.counts.losses,
            100.0 * self.counts.score_ratio(),
            self.llr(),
            self.bounds,
            self.state
        )
    }
}

/// Handle for feeding one test from several game loops at once
#[derive(Debug, Clone)]
pub struct SharedSprtTest {
    inner: Arc<Mutex<SprtTest>>,
}

impl SharedSprtTest {
    pub fn new(test: SprtTest) -> Self {
        Self {
            inner: Arc::new(Mutex::new(test)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SprtTest> {
        // The test holds plain counters, a panic elsewhere can't leave them half updated
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, outcome: Outcome) -> Result<SprtState, SprtError> {
        self.lock().record(outcome)
    }

    pub fn status(&self) -> SprtStatus {
        self.lock().status()
    }

    pub fn is_finished(&self) -> bool {
        self.lock().state().is_terminal()
    }

    pub fn config(&self) -> SprtConfig {
        *self.lock().config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(wins: u32, draws: u32, losses: u32) -> Counts {
        Counts {
            wins,
            draws,
            losses,
        }
    }

    fn record_many(test: &mut SprtTest, outcome: Outcome, times: u32) {
        for _ in 0..times {
            test.record(outcome).unwrap();
        }
    }

    #[test]
    fn test_basic_functionality() {
        let mut sprt = SprtTest::new(SprtConfig::new(0.0, 50.0, 0.05, 0.05)).unwrap();

        assert_eq!(sprt.decide(), SprtDecision::Continue);

        record_many(&mut sprt, Outcome::Win, 20);
        record_many(&mut sprt, Outcome::Loss, 10);
        record_many(&mut sprt, Outcome::Draw, 5);

        assert_eq!(sprt.counts().games(), 35);
        assert!(sprt.llr() > 0.0);
    }

    #[test]
    fn test_empty_llr_is_zero() {
        assert_eq!(llr_for(&Counts::default(), 0.0, 5.0), 0.0);
        let sprt = SprtTest::new(SprtConfig::default()).unwrap();
        assert_eq!(sprt.llr(), 0.0);
        assert_eq!(sprt.state(), SprtState::Running);
    }

    #[test]
    fn test_bounds_for_five_percent_errors() {
        let bounds = SprtConfig::new(0.0, 200.0, 0.05, 0.05).bounds();
        assert!((bounds.lower + 2.944).abs() < 1e-3);
        assert!((bounds.upper - 2.944).abs() < 1e-3);
        assert!((bounds.upper - 2.9444389791664403).abs() < 1e-12);
    }

    #[test]
    fn test_ten_straight_wins_fixture() {
        let llr5 = llr_for(&counts(10, 0, 0), 0.0, 5.0);
        let llr10 = llr_for(&counts(10, 0, 0), 0.0, 10.0);

        assert!((llr5 - 0.14273113001977603).abs() < 1e-12);
        assert!((llr10 - 0.28338963582831783).abs() < 1e-12);
        assert!(llr5 > 0.0);
        assert!(llr5 < llr10);
    }

    #[test]
    fn test_mixed_results_fixture() {
        let llr = llr_for(&counts(20, 5, 10), 0.0, 50.0);
        assert!((llr - 1.1295240216124076).abs() < 1e-12);
    }

    #[test]
    fn test_draws_only_enter_through_game_count() {
        // Both frequencies are clamped, leaving a tiny negative residue
        let llr = llr_for(&counts(0, 10, 0), 0.0, 5.0);
        assert!(llr < 0.0);
        assert!(llr > -1e-5);
    }

    #[test]
    fn test_llr_finite_over_grid() {
        for wins in 0..15 {
            for draws in 0..15 {
                for losses in 0..15 {
                    let llr = llr_for(&counts(wins, draws, losses), -10.0, 10.0);
                    assert!(llr.is_finite(), "{wins}/{draws}/{losses} -> {llr}");
                }
            }
        }
    }

    #[test]
    fn test_llr_monotonic_in_wins() {
        for draws in [0, 3, 17] {
            for losses in [0, 1, 9] {
                let mut previous = llr_for(&counts(0, draws, losses), 0.0, 5.0);
                for wins in 1..60 {
                    let llr = llr_for(&counts(wins, draws, losses), 0.0, 5.0);
                    assert!(llr > previous, "{wins}/{draws}/{losses}");
                    previous = llr;
                }
            }
        }
    }

    #[test]
    fn test_llr_does_not_mutate() {
        let mut sprt = SprtTest::new(SprtConfig::default()).unwrap();
        record_many(&mut sprt, Outcome::Win, 3);
        let before = sprt.status();
        let _ = sprt.llr();
        let _ = sprt.decide();
        assert_eq!(sprt.status(), before);
    }

    #[test]
    fn test_passes_on_straight_wins() {
        let mut sprt = SprtTest::new(SprtConfig::new(0.0, 200.0, 0.05, 0.05)).unwrap();
        record_many(&mut sprt, Outcome::Win, 7);
        assert_eq!(sprt.state(), SprtState::Running);

        assert_eq!(sprt.record(Outcome::Win).unwrap(), SprtState::Passed);
        assert_eq!(sprt.decide(), SprtDecision::Pass);
    }

    #[test]
    fn test_fails_on_straight_losses() {
        let mut sprt = SprtTest::new(SprtConfig::new(0.0, 200.0, 0.05, 0.05)).unwrap();
        record_many(&mut sprt, Outcome::Loss, 4);
        assert_eq!(sprt.state(), SprtState::Running);

        assert_eq!(sprt.record(Outcome::Loss).unwrap(), SprtState::Failed);
        assert_eq!(sprt.decide(), SprtDecision::Fail);
    }

    #[test]
    fn test_terminal_state_is_sticky() {
        let mut sprt = SprtTest::new(SprtConfig::new(0.0, 200.0, 0.05, 0.05)).unwrap();
        record_many(&mut sprt, Outcome::Win, 8);
        let passed = sprt.status();
        assert_eq!(passed.state, SprtState::Passed);

        for outcome in [Outcome::Loss, Outcome::Draw, Outcome::Win] {
            assert_eq!(
                sprt.record(outcome),
                Err(SprtError::TestFinished(SprtState::Passed))
            );
        }
        assert_eq!(sprt.status(), passed);
    }

    #[test]
    fn test_budget_exhaustion_is_inconclusive() {
        let config = SprtConfig::new(0.0, 5.0, 0.05, 0.05).with_max_games(4);
        let mut sprt = SprtTest::new(config).unwrap();

        for outcome in [Outcome::Win, Outcome::Loss, Outcome::Draw] {
            assert_eq!(sprt.record(outcome).unwrap(), SprtState::Running);
        }
        assert_eq!(sprt.record(Outcome::Win).unwrap(), SprtState::Inconclusive);
        assert!(sprt.record(Outcome::Win).is_err());
        assert_eq!(sprt.counts().games(), 4);
    }

    #[test]
    fn test_boundary_beats_budget() {
        let config = SprtConfig::new(0.0, 200.0, 0.05, 0.05).with_max_games(8);
        let mut sprt = SprtTest::new(config).unwrap();
        record_many(&mut sprt, Outcome::Win, 8);
        assert_eq!(sprt.state(), SprtState::Passed);
    }

    #[test]
    fn test_rejects_bad_error_rates() {
        for alpha in [0.0, 1.0, -0.1, 1.5, f64::NAN] {
            let config = SprtConfig::new(0.0, 5.0, alpha, 0.05);
            assert!(matches!(
                SprtTest::new(config),
                Err(SprtError::InvalidAlpha(_))
            ));
        }
        for beta in [0.0, 1.0, -0.1, 1.5, f64::NAN] {
            let config = SprtConfig::new(0.0, 5.0, 0.05, beta);
            assert!(matches!(
                SprtTest::new(config),
                Err(SprtError::InvalidBeta(_))
            ));
        }
    }

    #[test]
    fn test_rejects_empty_budget() {
        let config = SprtConfig::default().with_max_games(0);
        assert_eq!(
            SprtTest::new(config).unwrap_err(),
            SprtError::InvalidGameBudget
        );
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(Outcome::from_label("win").unwrap(), Outcome::Win);
        assert_eq!(Outcome::from_label(" WIN ").unwrap(), Outcome::Win);
        assert_eq!(Outcome::from_label("1/2").unwrap(), Outcome::Draw);
        assert_eq!(Outcome::from_label("0-1").unwrap(), Outcome::Loss);
        assert_eq!(
            Outcome::from_label("forfeit"),
            Err(SprtError::InvalidOutcome("forfeit".to_owned()))
        );
        assert_eq!(Outcome::Draw.to_string(), "draw");
    }

    #[test]
    fn test_outcome_scores() {
        assert_eq!(Outcome::from_score(1.0).unwrap(), Outcome::Win);
        assert_eq!(Outcome::from_score(0.5).unwrap(), Outcome::Draw);
        assert_eq!(Outcome::from_score(0.0).unwrap(), Outcome::Loss);
        assert!(Outcome::from_score(0.75).is_err());
        assert!(Outcome::from_score(f64::NAN).is_err());
    }

    #[test]
    fn test_status_serializes_verdict() {
        let mut sprt = SprtTest::new(SprtConfig::new(0.0, 200.0, 0.05, 0.05)).unwrap();
        record_many(&mut sprt, Outcome::Loss, 5);
        let json = serde_json::to_value(sprt.status()).unwrap();
        assert_eq!(json["state"], "FAILED");
        assert_eq!(json["counts"]["losses"], 5);
        assert_eq!(sprt.state().to_string(), "FAIL");
    }

    #[test]
    fn test_shared_test_across_threads() {
        let config = SprtConfig::new(0.0, 5.0, 0.05, 0.05).with_max_games(400);
        let shared = SharedSprtTest::new(SprtTest::new(config).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|idx| {
                let shared = shared.clone();
                std::thread::spawn(move || {
                    let outcome = match idx % 3 {
                        0 => Outcome::Win,
                        1 => Outcome::Draw,
                        _ => Outcome::Loss,
                    };
                    for _ in 0..50 {
                        shared.record(outcome).unwrap();
                        let status = shared.status();
                        assert_eq!(
                            status.counts.games(),
                            status.counts.wins + status.counts.draws + status.counts.losses
                        );
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let status = shared.status();
        assert_eq!(status.counts, counts(100, 50, 50));
        assert!(!shared.is_finished());
    }
}
