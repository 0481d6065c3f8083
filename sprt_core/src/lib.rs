pub mod elo;
pub mod error;
pub mod sprt;
pub mod uci_types;

pub use error::SprtError;
pub use sprt::{
    Counts, Outcome, SharedSprtTest, SprtBounds, SprtConfig, SprtDecision, SprtState, SprtStatus,
    SprtTest,
};
