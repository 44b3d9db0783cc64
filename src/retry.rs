use std::fmt::Display;
use std::thread;
use std::time::Duration;

use rand::Rng;

use crate::error::HarvestError;
use crate::logging::LogContext;

pub trait Release {
    fn release(&mut self) -> Result<(), HarvestError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(5),
            jitter: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            base_delay: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    pub fn backoff_delay(&self) -> Duration {
        let window = self.jitter.as_millis() as u64;
        if window == 0 {
            return self.base_delay;
        }
        let extra = rand::thread_rng().gen_range(0..window);
        self.base_delay + Duration::from_millis(extra)
    }
}

#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    log: LogContext,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy, log: LogContext) -> Self {
        Self { policy, log }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn run<T, E, F>(&self, label: &str, mut action: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Result<T, E>,
    {
        let _guard = self.log.enter();
        let attempts = self.policy.attempts.max(1);
        let mut attempt = 1;
        loop {
            match action() {
                Ok(value) => return Ok(value),
                Err(err) if attempt < attempts => {
                    tracing::warn!(%label, attempt, error = %err, "attempt failed");
                    let delay = self.policy.backoff_delay();
                    tracing::info!(%label, delay_ms = delay.as_millis() as u64, "retrying");
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => {
                    tracing::error!(%label, attempts, error = %err, "max retries reached");
                    return Err(err);
                }
            }
        }
    }

    /// Like `run`, but the action operates on `resource`, which is
    /// released once every attempt has failed. Release failures are logged and dropped.
    pub fn run_with<R, T, E, F>(&self, label: &str, resource: &mut R, mut action: F) -> Result<T, E>
    where
        R: Release + ?Sized,
        E: Display,
        F: FnMut(&mut R) -> Result<T, E>,
    {
        let result = self.run(label, || action(&mut *resource));
        if result.is_err() {
            let _guard = self.log.enter();
            if let Err(err) = resource.release() {
                tracing::debug!(%label, error = %err, "release after exhausted retries failed");
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_stays_inside_window() {
        let policy = RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(5),
            jitter: Duration::from_millis(2),
        };
        for _ in 0..50 {
            let delay = policy.backoff_delay();
            assert!(delay >= Duration::from_millis(5));
            assert!(delay < Duration::from_millis(7));
        }
    }

    #[test]
    fn zero_attempts_still_runs_once() {
        let executor = RetryExecutor::new(RetryPolicy::immediate(0), LogContext::detached());
        let mut calls = 0;
        let result: Result<(), String> = executor.run("noop", || {
            calls += 1;
            Err("nope".to_string())
        });
        assert_eq!(result.unwrap_err(), "nope");
        assert_eq!(calls, 1);
    }
}
