//! Session progress tracking

use crate::SessionIndex;
use serde::{Deserialize, Serialize};

/// Fraction of the current session that has elapsed
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionProgress {
    fraction: f64,
}

impl SessionProgress {
    /// Progress from the node's estimate of blocks elapsed in the session.
    ///
    /// The estimate is not clamped: a late session can report slightly more
    /// than one full session.
    pub fn from_estimate(estimate: u64, blocks_per_session: u64) -> Self {
        if blocks_per_session == 0 {
            return Self::default();
        }
        Self {
            fraction: estimate as f64 / blocks_per_session as f64,
        }
    }

    /// Elapsed fraction
    pub fn fraction(&self) -> f64 {
        self.fraction
    }

    /// Elapsed percentage, rounded to the nearest integer
    pub fn percent(&self) -> i64 {
        (self.fraction * 100.0).round() as i64
    }

    /// Alerts wait until the rounded percentage leaves 0, giving validators a
    /// chance to submit a heartbeat after the session rolls over.
    pub fn alerts_allowed(&self) -> bool {
        self.percent() > 0
    }
}

/// Session index and progress observed in one pass
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionState {
    pub index: SessionIndex,
    pub progress: SessionProgress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraction() {
        let progress = SessionProgress::from_estimate(300, 2400);
        assert!((progress.fraction() - 0.125).abs() < f64::EPSILON);
        assert_eq!(progress.percent(), 13);
    }

    #[test]
    fn test_rollover_guard() {
        // 10/2400 = 0.42% rounds to 0
        assert!(!SessionProgress::from_estimate(10, 2400).alerts_allowed());
        // 11/2400 = 0.458% still rounds to 0
        assert!(!SessionProgress::from_estimate(11, 2400).alerts_allowed());
        // 12/2400 = 0.5% rounds up to 1
        assert!(SessionProgress::from_estimate(12, 2400).alerts_allowed());
    }

    #[test]
    fn test_zero_session_length() {
        let progress = SessionProgress::from_estimate(100, 0);
        assert_eq!(progress.percent(), 0);
    }
}
