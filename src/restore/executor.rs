// ABOUTME: Retrying statement executor with a fixed wait between attempts
// ABOUTME: Shared by connection acquisition and per-statement execution

use crate::error::{DbError, RetryExhausted};
use crate::postgres::Database;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;

/// Attempt count and fixed wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(rename = "interval_secs", with = "secs")]
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            interval: Duration::from_secs(5),
        }
    }
}

mod secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

/// A failed attempt, as reported to the caller's sink before waiting.
#[derive(Debug)]
pub struct AttemptFailure<'a> {
    pub attempt: u32,
    pub max_attempts: u32,
    pub error: &'a DbError,
    /// `None` when this was the last attempt.
    pub retry_in: Option<Duration>,
}

/// Run `operation` until it succeeds or `policy.max_attempts` attempts have failed.
///
/// `on_failure` sees every failed attempt, including the last one.
pub async fn retry_fixed<F, Fut, T, S>(
    policy: &RetryPolicy,
    mut operation: F,
    mut on_failure: S,
) -> Result<T, RetryExhausted>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DbError>>,
    S: FnMut(&AttemptFailure<'_>),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let is_last = attempt >= max_attempts;
        on_failure(&AttemptFailure {
            attempt,
            max_attempts,
            error: &error,
            retry_in: (!is_last).then_some(policy.interval),
        });

        if is_last {
            return Err(RetryExhausted {
                attempts: attempt,
                last: error,
            });
        }

        if !policy.interval.is_zero() {
            tokio::time::sleep(policy.interval).await;
        }
    }
}

/// Execute one statement with bounded retry.
pub async fn execute<D, S>(
    db: &D,
    statement: &str,
    policy: &RetryPolicy,
    on_failure: S,
) -> Result<(), RetryExhausted>
where
    D: Database + ?Sized,
    S: FnMut(&AttemptFailure<'_>),
{
    retry_fixed(policy, || db.exec(statement), on_failure).await
}
