// Retry layer: wraps a `Transport` with the rate-limit / server-error
// backoff policy. The schedule is fixed:
//
//   429        -> min(60 * 2^attempt, 300) seconds
//   500 and up -> min(10 * 2^attempt, 60) seconds
//
// where `attempt` is the 0-based index of the attempt that just failed.
// Anything else fails on the spot.

use crate::api::{ApiError, ApiRequest, ApiResponse, Transport};
use std::thread;
use std::time::Duration;

pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Blocking wait. Abstracted so tests can observe waits without time
/// actually passing.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

impl<S: Sleeper + ?Sized> Sleeper for &S {
    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Why a response is worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    RateLimited,
    ServerError,
}

impl RetryReason {
    pub fn classify(status: u16) -> Option<Self> {
        match status {
            429 => Some(RetryReason::RateLimited),
            s if s >= 500 => Some(RetryReason::ServerError),
            _ => None,
        }
    }

    pub fn backoff(self, attempt: u32) -> Duration {
        let (base, cap) = match self {
            RetryReason::RateLimited => (60u64, 300u64),
            RetryReason::ServerError => (10u64, 60u64),
        };
        let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
        Duration::from_secs(base.saturating_mul(factor).min(cap))
    }

    fn label(self) -> &'static str {
        match self {
            RetryReason::RateLimited => "rate limited",
            RetryReason::ServerError => "server error",
        }
    }
}

pub struct RetryingExecutor<T, S> {
    transport: T,
    sleeper: S,
    max_attempts: u32,
}

impl<T: Transport, S: Sleeper> RetryingExecutor<T, S> {
    /// `max_attempts` counts every attempt, the first one included. A
    /// value of zero is treated as one.
    pub fn new(transport: T, sleeper: S, max_attempts: u32) -> Self {
        Self {
            transport,
            sleeper,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn sleeper(&self) -> &S {
        &self.sleeper
    }

    /// Send `request` until it succeeds, hits a non-retryable failure, or
    /// runs out of attempts. No wait follows the final attempt.
    pub fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut last_status = 0;

        for attempt in 0..self.max_attempts {
            tracing::debug!(
                method = %request.method,
                url = %request.url,
                attempt = attempt + 1,
                "Sending request"
            );

            // Transport failures are not retried.
            let response = self.transport.send(request)?;
            if response.is_success() {
                return Ok(response);
            }

            let reason = match RetryReason::classify(response.status) {
                Some(reason) => reason,
                None => {
                    tracing::error!(
                        url = %request.url,
                        status = response.status,
                        body = %response.body,
                        "Request rejected"
                    );
                    return Err(ApiError::Status {
                        status: response.status,
                        body: response.body.to_string(),
                    });
                }
            };

            last_status = response.status;
            if attempt + 1 >= self.max_attempts {
                break;
            }

            let wait = reason.backoff(attempt);
            tracing::warn!(
                url = %request.url,
                status = response.status,
                attempt = attempt + 1,
                max_attempts = self.max_attempts,
                wait_secs = wait.as_secs(),
                "{}, retrying",
                reason.label()
            );
            self.sleeper.sleep(wait);
        }

        tracing::error!(
            url = %request.url,
            attempts = self.max_attempts,
            last_status,
            "Max retries exceeded"
        );
        Err(ApiError::RetriesExhausted {
            attempts: self.max_attempts,
            last_status,
        })
    }
}
