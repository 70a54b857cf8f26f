use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// Set while the single half-open trial call is outstanding.
    trial_in_flight: bool,
}

/// Per-source circuit breaker.
///
/// After `failure_threshold` consecutive failed attempts a source is disabled for
/// `cooldown`. Once the cooldown elapses exactly one trial attempt is let through
/// (half-open) and every other caller is refused until it reports back; success
/// closes the breaker, failure re-opens it.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    states: Mutex<HashMap<String, BreakerState>>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Admits a call to `source`, or returns `Err(remaining)` while it is disabled.
    ///
    /// A call admitted in the half-open state is the trial: it must be followed by
    /// `record_success` or `record_failure`.
    pub fn check(&self, source: &str) -> Result<(), Duration> {
        let mut states = self.states.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(state) = states.get_mut(source) else {
            return Ok(());
        };
        let Some(opened_at) = state.opened_at else {
            return Ok(());
        };
        let elapsed = opened_at.elapsed();
        if elapsed < self.cooldown {
            return Err(self.cooldown - elapsed);
        }
        if state.trial_in_flight {
            return Err(Duration::ZERO);
        }
        state.trial_in_flight = true;
        debug!(source, "Circuit breaker half-open, admitting one trial call");
        Ok(())
    }

    pub fn record_success(&self, source: &str) {
        let mut states = self.states.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(state) = states.remove(source) {
            if state.opened_at.is_some() {
                info!(source, "Circuit breaker closed after a successful trial call");
            }
        }
    }

    pub fn record_failure(&self, source: &str) {
        let mut states = self.states.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let state = states.entry(source.to_string()).or_default();
        state.consecutive_failures += 1;

        let trial_failed = state.opened_at.is_some();
        if trial_failed || state.consecutive_failures >= self.failure_threshold {
            state.opened_at = Some(Instant::now());
            state.trial_in_flight = false;
            warn!(
                source,
                consecutive_failures = state.consecutive_failures,
                cooldown_secs = self.cooldown.as_secs(),
                "Circuit breaker opened"
            );
        }
    }

    /// Whether a call to `source` would be refused right now. Never consumes the trial.
    pub fn is_open(&self, source: &str) -> bool {
        let states = self.states.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        states.get(source).is_some_and(|state| match state.opened_at {
            Some(opened_at) => opened_at.elapsed() < self.cooldown || state.trial_in_flight,
            None => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_and_isolates_sources() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        breaker.record_failure("a");
        assert!(!breaker.is_open("a"));
        breaker.record_failure("a");
        assert!(breaker.is_open("a"));
        assert!(!breaker.is_open("b"));
    }

    #[test]
    fn success_resets_the_count() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        breaker.record_failure("a");
        breaker.record_success("a");
        breaker.record_failure("a");
        assert!(!breaker.is_open("a"));
    }

    #[test]
    fn half_open_after_cooldown() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(20));
        breaker.record_failure("a");
        assert!(breaker.is_open("a"));
        std::thread::sleep(Duration::from_millis(30));
        assert!(!breaker.is_open("a"));
        assert!(breaker.check("a").is_ok());

        // A failed trial re-opens immediately.
        breaker.record_failure("a");
        assert!(breaker.is_open("a"));
    }

    #[test]
    fn half_open_admits_a_single_trial() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(20));
        breaker.record_failure("a");
        std::thread::sleep(Duration::from_millis(30));

        assert!(breaker.check("a").is_ok());
        assert!(breaker.is_open("a"));
        assert_eq!(breaker.check("a"), Err(Duration::ZERO));
        assert!(breaker.check("a").is_err());

        breaker.record_success("a");
        assert!(breaker.check("a").is_ok());
        assert!(breaker.check("a").is_ok());
        assert!(!breaker.is_open("a"));
    }

    #[test]
    fn failed_trial_waits_a_full_cooldown_before_the_next() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(20));
        breaker.record_failure("a");
        std::thread::sleep(Duration::from_millis(30));
        assert!(breaker.check("a").is_ok());
        breaker.record_failure("a");

        assert!(matches!(breaker.check("a"), Err(remaining) if remaining > Duration::ZERO));
        std::thread::sleep(Duration::from_millis(30));
        assert!(breaker.check("a").is_ok());
        assert!(breaker.check("a").is_err());
    }
}
