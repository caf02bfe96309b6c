use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Smallest sleep allowed between attempts
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Fixed-interval, fixed-budget polling for asynchronously propagated state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: MIN_POLL_INTERVAL,
            max_attempts: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollPolicyError {
    #[error("poll interval {interval_ms}ms is below the {minimum_ms}ms minimum")]
    IntervalTooShort { interval_ms: u128, minimum_ms: u128 },
    #[error("poll budget must allow at least one attempt")]
    NoAttempts,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Result<Self, PollPolicyError> {
        if interval < MIN_POLL_INTERVAL {
            return Err(PollPolicyError::IntervalTooShort {
                interval_ms: interval.as_millis(),
                minimum_ms: MIN_POLL_INTERVAL.as_millis(),
            });
        }
        if max_attempts == 0 {
            return Err(PollPolicyError::NoAttempts);
        }
        Ok(Self {
            interval,
            max_attempts,
        })
    }
}

/// Poll until the check yields a value or the attempt budget runs out.
///
/// The first check runs immediately and each retry sleeps for the policy
/// interval first. Exhaustion is not an error: it is logged and `Ok(None)` is
/// returned so the caller's own final check decides the outcome. A check error
/// stops polling at once.
pub async fn retry<T, E, F, Fut>(policy: &PollPolicy, waiting_for: &str, mut check: F) -> Result<Option<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    for attempt in 1..=policy.max_attempts {
        if attempt > 1 {
            tokio::time::sleep(policy.interval).await;
        }
        if let Some(value) = check().await? {
            log::debug!("{} observed after {} attempt(s)", waiting_for, attempt);
            return Ok(Some(value));
        }
    }

    log::warn!(
        "Poll overflow: gave up waiting for {} after {} attempts at {}ms",
        waiting_for,
        policy.max_attempts,
        policy.interval.as_millis()
    );
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> PollPolicy {
        PollPolicy::new(MIN_POLL_INTERVAL, max_attempts).unwrap()
    }

    #[test]
    fn test_policy_bounds() {
        assert_eq!(
            PollPolicy::new(Duration::from_millis(99), 10),
            Err(PollPolicyError::IntervalTooShort {
                interval_ms: 99,
                minimum_ms: 100
            })
        );
        assert_eq!(PollPolicy::new(Duration::from_millis(100), 0), Err(PollPolicyError::NoAttempts));
        assert!(PollPolicy::new(Duration::from_millis(250), 1).is_ok());
    }

    #[tokio::test]
    async fn test_first_success_exits_early() {
        let calls = AtomicU32::new(0);
        let result: Result<Option<u32>, String> = retry(&fast(5), "value", || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok(if n == 2 { Some(n) } else { None }) }
        })
        .await;

        assert_eq!(result, Ok(Some(2)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_none() {
        let calls = AtomicU32::new(0);
        let result: Result<Option<()>, String> = retry(&fast(3), "never", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(None) }
        })
        .await;

        assert_eq!(result, Ok(None));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_check_error_stops_polling() {
        let calls = AtomicU32::new(0);
        let result: Result<Option<()>, String> = retry(&fast(5), "failing", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("boom".to_string()) }
        })
        .await;

        assert_eq!(result, Err("boom".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
