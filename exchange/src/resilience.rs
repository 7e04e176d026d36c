use backon::{BackoffBuilder, ConstantBuilder, ExponentialBuilder};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use std::time::Duration;

/// Delay schedule between reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum RetryDelay {
    Fixed(#[serde(with = "millis")] Duration),
    /// min → 2×min → ... → max, with jitter
    Exponential {
        #[serde(with = "millis")]
        min: Duration,
        #[serde(with = "millis")]
        max: Duration,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RetryPolicy {
    pub delay: RetryDelay,
    /// `None` keeps retrying until cancelled
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: RetryDelay::Fixed(Duration::from_secs(5)),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    pub fn exponential(min: Duration, max: Duration) -> Self {
        Self {
            delay: RetryDelay::Exponential { min, max },
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Fresh delay iterator; exhausted once `max_attempts` delays were handed out.
    pub fn backoff(&self) -> Box<dyn Iterator<Item = Duration> + Send> {
        match (self.delay, self.max_attempts) {
            (RetryDelay::Fixed(delay), Some(times)) => Box::new(
                ConstantBuilder::default()
                    .with_delay(delay)
                    .with_max_times(times as usize)
                    .build(),
            ),
            (RetryDelay::Fixed(delay), None) => Box::new(
                ConstantBuilder::default()
                    .with_delay(delay)
                    .without_max_times()
                    .build(),
            ),
            (RetryDelay::Exponential { min, max }, Some(times)) => Box::new(
                ExponentialBuilder::default()
                    .with_min_delay(min)
                    .with_max_delay(max)
                    .with_jitter()
                    .with_max_times(times as usize)
                    .build(),
            ),
            (RetryDelay::Exponential { min, max }, None) => Box::new(
                ExponentialBuilder::default()
                    .with_min_delay(min)
                    .with_max_delay(max)
                    .with_jitter()
                    .without_max_times()
                    .build(),
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    /// The delay elapsed, try again
    Attempt,
    /// The policy ran out of attempts
    Exhausted,
    Cancelled,
}

/// Stateful retry driver: one per connection loop, reset after a successful connect.
pub struct Reconnector {
    policy: RetryPolicy,
    backoff: Box<dyn Iterator<Item = Duration> + Send>,
    attempts: u32,
}

impl Reconnector {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            backoff: policy.backoff(),
            policy,
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.backoff = self.policy.backoff();
        self.attempts = 0;
    }

    /// Sleeps for the next delay unless cancelled first.
    pub async fn wait(&mut self, cancel: &CancellationToken) -> Retry {
        let Some(delay) = self.backoff.next() else {
            return Retry::Exhausted;
        };
        self.attempts += 1;

        if sleep_or_cancel(delay, cancel).await {
            Retry::Attempt
        } else {
            Retry::Cancelled
        }
    }
}

/// `true` when the full delay elapsed, `false` when cancelled.
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_policy_respects_max_attempts() {
        let policy = RetryPolicy::default().with_max_attempts(3);
        let delays: Vec<_> = policy.backoff().collect();
        assert_eq!(delays, vec![Duration::from_secs(5); 3]);
    }

    #[test]
    fn exponential_policy_stays_within_bounds() {
        let policy = RetryPolicy::exponential(Duration::from_millis(100), Duration::from_secs(2))
            .with_max_attempts(8);
        let delays: Vec<_> = policy.backoff().collect();

        assert_eq!(delays.len(), 8);
        // jitter adds at most one extra delay on top
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(4)));
    }

    #[test]
    fn policy_serializes_in_millis() {
        let policy = RetryPolicy::default();
        let json = serde_json::to_string(&policy).unwrap();
        assert_eq!(json, r#"{"delay":{"Fixed":5000},"max_attempts":null}"#);

        let back: RetryPolicy = serde_json::from_str(r#"{"delay":{"Fixed":250}}"#).unwrap();
        assert_eq!(back.delay, RetryDelay::Fixed(Duration::from_millis(250)));
        assert_eq!(back.max_attempts, None);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_wait() {
        let cancel = CancellationToken::new();
        let mut reconnector = Reconnector::new(RetryPolicy::default());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        assert_eq!(reconnector.wait(&cancel).await, Retry::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_policy_stops_retrying() {
        let cancel = CancellationToken::new();
        let mut reconnector = Reconnector::new(RetryPolicy::default().with_max_attempts(2));

        assert_eq!(reconnector.wait(&cancel).await, Retry::Attempt);
        assert_eq!(reconnector.wait(&cancel).await, Retry::Attempt);
        assert_eq!(reconnector.wait(&cancel).await, Retry::Exhausted);
        assert_eq!(reconnector.attempts(), 2);

        reconnector.reset();
        assert_eq!(reconnector.attempts(), 0);
        assert_eq!(reconnector.wait(&cancel).await, Retry::Attempt);
    }
}
