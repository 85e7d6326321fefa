use std::future::Future;
use std::time::Duration;

use helm_config::RetryConfig;
use helm_core::{HelmError, Result};
use tracing::{debug, warn};

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed,
    Exponential,
}

/// Bounded retry around a fallible async operation.
///
/// The sleep between attempts is an ordinary `.await`, so an enclosing
/// `tokio::time::timeout` cancels it like any other suspension point.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub backoff: Backoff,
    pub max_delay: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(3, Duration::from_secs(1))
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            backoff: Backoff::Fixed,
            max_delay: None,
        }
    }

    pub fn exponential(max_attempts: u32, base: Duration, max_delay: Option<Duration>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay: base,
            backoff: Backoff::Exponential,
            max_delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        let delay = Duration::from_millis(config.delay_ms);
        match config.backoff.to_lowercase().as_str() {
            "exponential" => Self::exponential(
                config.max_attempts,
                delay,
                config.max_delay_ms.map(Duration::from_millis),
            ),
            _ => Self::fixed(config.max_attempts, delay),
        }
    }

    /// Delay after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.delay.saturating_mul(factor)
            }
        };
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    /// Retry transient failures (lost connections, flaky primitives).
    pub async fn run<T, F, Fut>(&self, label: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_if(label, op, HelmError::is_transient).await
    }

    /// Retry failures for which `retriable` holds; anything else is returned
    /// after the first attempt. The last failure is returned once attempts
    /// run out.
    pub async fn run_if<T, F, Fut, P>(&self, label: &str, mut op: F, retriable: P) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&HelmError) -> bool,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(op = label, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if attempt < self.max_attempts && retriable(&e) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        op = label,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
