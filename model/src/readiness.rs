use log::{debug, trace};
use std::future::Future;
use std::time::Duration;

/// A bounded polling budget. The predicate is evaluated at most `attempts` times with
/// `interval` between evaluations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessCheck {
    attempts: u32,
    interval: Duration,
}

impl ReadinessCheck {
    /// Budget derived from a total `timeout`: `ceil(timeout / interval)` polls, at least one.
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        let attempts = if interval.is_zero() {
            1
        } else {
            let interval = interval.as_nanos();
            let polls = (timeout.as_nanos() + interval - 1) / interval;
            u32::try_from(polls).unwrap_or(u32::MAX)
        };
        Self::with_attempts(attempts, interval)
    }

    pub fn with_attempts(attempts: u32, interval: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            interval,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The predicate held on poll number `attempts`.
    Ready { attempts: u32 },
    /// The predicate never held within the budget.
    TimedOut { attempts: u32 },
}

impl WaitOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, WaitOutcome::Ready { .. })
    }
}

/// Poll `predicate` until it returns `true` or the budget in `check` is spent. Timing out is
/// reported as a value; whether that is fatal is up to the caller.
pub async fn wait_for<F, Fut>(what: &str, check: ReadinessCheck, mut predicate: F) -> WaitOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for attempt in 1..=check.attempts {
        if predicate().await {
            debug!("{} is ready after {} poll(s)", what, attempt);
            return WaitOutcome::Ready { attempts: attempt };
        }
        trace!(
            "{} not ready ({}/{}), next poll in {:?}",
            what,
            attempt,
            check.attempts,
            check.interval
        );
        if attempt < check.attempts {
            tokio::time::sleep(check.interval).await;
        }
    }
    debug!("{} did not become ready in {} poll(s)", what, check.attempts);
    WaitOutcome::TimedOut {
        attempts: check.attempts,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn attempts_from_timeout() {
        let check = ReadinessCheck::new(Duration::from_secs(50), Duration::from_secs(10));
        assert_eq!(check.attempts(), 5);
        let check = ReadinessCheck::new(Duration::from_secs(51), Duration::from_secs(10));
        assert_eq!(check.attempts(), 6);
        let check = ReadinessCheck::new(Duration::ZERO, Duration::from_secs(10));
        assert_eq!(check.attempts(), 1);
        let check = ReadinessCheck::new(Duration::from_secs(10), Duration::ZERO);
        assert_eq!(check.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn never_ready_polls_exactly_n_times() {
        let interval = Duration::from_secs(3);
        let check = ReadinessCheck::new(interval * 7, interval);
        let counter = AtomicU32::new(0);
        let polls = &counter;
        let started = tokio::time::Instant::now();

        let outcome = wait_for("nothing", check, move || async move {
            polls.fetch_add(1, Ordering::SeqCst);
            false
        })
        .await;

        assert_eq!(outcome, WaitOutcome::TimedOut { attempts: 7 });
        assert_eq!(counter.load(Ordering::SeqCst), 7);
        // No sleep after the final poll.
        assert_eq!(started.elapsed(), interval * 6);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_polling_once_ready() {
        let check = ReadinessCheck::with_attempts(10, Duration::from_secs(1));
        let counter = AtomicU32::new(0);
        let polls = &counter;

        let outcome = wait_for("third time", check, move || async move {
            polls.fetch_add(1, Ordering::SeqCst) + 1 == 3
        })
        .await;

        assert_eq!(outcome, WaitOutcome::Ready { attempts: 3 });
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }
}
