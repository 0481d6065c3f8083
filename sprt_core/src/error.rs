use thiserror::Error;

use crate::sprt::SprtState;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SprtError {
    #[error("alpha must lie strictly between 0 and 1, got {0}")]
    InvalidAlpha(f64),
    #[error("beta must lie strictly between 0 and 1, got {0}")]
    InvalidBeta(f64),
    #[error("a game budget must allow at least one game")]
    InvalidGameBudget,
    #[error("unrecognised game outcome: {0:?}")]
    InvalidOutcome(String),
    #[error("test already finished with {0}, no more results are accepted")]
    TestFinished(SprtState),
}
