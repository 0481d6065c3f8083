use serde::{Deserialize, Serialize};

use crate::sprt::Counts;

/// Two-sided 95% quantile of the standard normal distribution
const Z_95: f64 = 1.959963984540054;

/// Expected score of a player that is `elo` points stronger than its opponent
pub fn elo_to_score(elo: f64) -> f64 {
    1.0 / (1.0 + 10.0_f64.powf(-elo / 400.0))
}

/// Inverse of `elo_to_score`. Diverges to +/- infinity at scores of 1 and 0.
pub fn score_to_elo(score: f64) -> f64 {
    -400.0 * (1.0 / score - 1.0).log10()
}

/// Elo difference implied by a match result, with a 95% error margin
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EloEstimate {
    pub elo: f64,
    pub error_95: f64,
}

impl EloEstimate {
    /// Returns `None` when no games were played or the score is a clean
    /// sweep, since the Elo difference is unbounded in those cases.
    pub fn from_counts(counts: &Counts) -> Option<Self> {
        let games = counts.games();
        if games == 0 {
            return None;
        }

        let n = games as f64;
        let mean = counts.score_ratio();
        if mean <= 0.0 || mean >= 1.0 {
            return None;
        }

        let variance = (counts.wins as f64 * (1.0 - mean).powi(2)
            + counts.draws as f64 * (0.5 - mean).powi(2)
            + counts.losses as f64 * mean.powi(2))
            / n;
        let margin = Z_95 * (variance / n).sqrt();

        let low = (mean - margin).max(f64::EPSILON);
        let high = (mean + margin).min(1.0 - f64::EPSILON);

        Some(Self {
            elo: score_to_elo(mean),
            error_95: (score_to_elo(high) - score_to_elo(low)) / 2.0,
        })
    }
}

impl std::fmt::Display for EloEstimate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:+.1} +/- {:.1}", self.elo, self.error_95)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elo_to_score_even() {
        assert_eq!(elo_to_score(0.0), 0.5);
    }

    #[test]
    fn test_elo_to_score_400() {
        assert!((elo_to_score(400.0) - 10.0 / 11.0).abs() < 1e-9);
        assert!((elo_to_score(-400.0) - 1.0 / 11.0).abs() < 1e-9);
    }

    #[test]
    fn test_score_to_elo_inverts() {
        for elo in [-350.0, -35.5, 0.0, 5.0, 200.0] {
            assert!((score_to_elo(elo_to_score(elo)) - elo).abs() < 1e-9);
        }
    }

    #[test]
    fn test_estimate_needs_games() {
        assert_eq!(EloEstimate::from_counts(&Counts::default()), None);
    }

    #[test]
    fn test_estimate_sweep_is_unbounded() {
        let counts = Counts {
            wins: 12,
            draws: 0,
            losses: 0,
        };
        assert_eq!(EloEstimate::from_counts(&counts), None);
    }

    #[test]
    fn test_estimate_even_match() {
        let counts = Counts {
            wins: 30,
            draws: 40,
            losses: 30,
        };
        let estimate = EloEstimate::from_counts(&counts).unwrap();
        assert!(estimate.elo.abs() < 1e-9);
        assert!(estimate.error_95 > 0.0);
    }

    #[test]
    fn test_estimate_positive_when_ahead() {
        let counts = Counts {
            wins: 60,
            draws: 20,
            losses: 20,
        };
        let estimate = EloEstimate::from_counts(&counts).unwrap();
        assert!(estimate.elo > 0.0);
        assert!(estimate.elo - estimate.error_95 > 0.0);
    }
}
