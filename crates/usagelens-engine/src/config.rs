//! Engine configuration.

use std::time::Duration;

/// Default per-call timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default wall-clock ceiling for one whole cascade.
pub const DEFAULT_CASCADE_BUDGET: Duration = Duration::from_secs(90);

/// Timing limits for orchestration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Upper bound for a single collaborator call.
    pub call_timeout: Duration,

    /// Upper bound for all attempts of one invocation combined.  Each call
    /// gets `min(call_timeout, remaining budget)`.
    pub cascade_budget: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            cascade_budget: DEFAULT_CASCADE_BUDGET,
        }
    }
}

impl EngineConfig {
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_cascade_budget(mut self, budget: Duration) -> Self {
        self.cascade_budget = budget;
        self
    }

    /// Timeout for the next call given what is left of the budget.
    pub fn call_timeout_within(&self, remaining: Duration) -> Duration {
        self.call_timeout.min(remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.call_timeout, Duration::from_secs(30));
        assert_eq!(config.cascade_budget, Duration::from_secs(90));
    }

    #[test]
    fn call_timeout_shrinks_with_budget() {
        let config = EngineConfig::default();
        assert_eq!(
            config.call_timeout_within(Duration::from_secs(100)),
            Duration::from_secs(30)
        );
        assert_eq!(
            config.call_timeout_within(Duration::from_secs(5)),
            Duration::from_secs(5)
        );
    }
}
