use std::time::Duration;

/// Backoff for re-establishing the event stream.
///
/// `delays[n]` is waited before reconnect attempt `n + 1`; attempts past the
/// end of the list reuse the last delay. The attempt counter resets whenever
/// a connection succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Consecutive failed attempts before giving up. `None` retries forever.
    pub max_retries: Option<usize>,
    pub delays: Vec<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: None,
            delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
            ],
        }
    }
}

impl RetryConfig {
    /// Never reconnect.
    pub fn disabled() -> Self {
        Self {
            max_retries: Some(0),
            delays: Vec::new(),
        }
    }

    pub fn from_millis(delays_ms: &[u64], max_retries: Option<usize>) -> Self {
        Self {
            max_retries,
            delays: delays_ms.iter().copied().map(Duration::from_millis).collect(),
        }
    }

    /// Delay before retry number `attempt` (0-based), or `None` to give up.
    pub fn delay_for(&self, attempt: usize) -> Option<Duration> {
        if self.max_retries.is_some_and(|max| attempt >= max) {
            return None;
        }
        self.delays
            .get(attempt)
            .or_else(|| self.delays.last())
            .copied()
            .or(Some(Duration::ZERO))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_saturate_at_last_entry() {
        let cfg = RetryConfig::from_millis(&[10, 20], None);
        assert_eq!(cfg.delay_for(0), Some(Duration::from_millis(10)));
        assert_eq!(cfg.delay_for(1), Some(Duration::from_millis(20)));
        assert_eq!(cfg.delay_for(7), Some(Duration::from_millis(20)));
    }

    #[test]
    fn max_retries_stops_backoff() {
        let cfg = RetryConfig::from_millis(&[10], Some(2));
        assert!(cfg.delay_for(1).is_some());
        assert!(cfg.delay_for(2).is_none());
        assert!(RetryConfig::disabled().delay_for(0).is_none());
    }

    #[test]
    fn empty_delays_retry_immediately() {
        let cfg = RetryConfig::from_millis(&[], Some(3));
        assert_eq!(cfg.delay_for(0), Some(Duration::ZERO));
    }
}
