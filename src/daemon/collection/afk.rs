use std::time::Duration;

/// Pseudo application reported while the user is away from the machine.
pub const AWAY_APP: &str = "away";
/// Task paired with [AWAY_APP].
pub const AWAY_TASK: &str = "away";

/// Decides whether the user is away based on the OS-reported idle time.
#[derive(Debug, Clone, Copy)]
pub struct AfkEvaluator {
    threshold_ms: u64,
}

impl AfkEvaluator {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold_ms: threshold.as_millis().min(u64::MAX as u128) as u64,
        }
    }

    pub fn from_seconds(threshold_s: u32) -> Self {
        Self::new(Duration::from_secs(threshold_s.into()))
    }

    pub fn is_afk(&self, idle_ms: u32) -> bool {
        self.threshold_ms < u64::from(idle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::AfkEvaluator;

    #[test]
    fn test_is_afk_only_past_threshold() {
        let evaluator = AfkEvaluator::from_seconds(120);
        assert!(!evaluator.is_afk(0));
        assert!(!evaluator.is_afk(120_000));
        assert!(evaluator.is_afk(120_001));
    }
}
