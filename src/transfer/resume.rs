//! Bounded retry with exponential backoff.

use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

use crate::config::ResumeConfig;
use crate::error::{FaspError, Result, TransferError};

#[derive(Debug, Clone, PartialEq)]
pub struct ResumePolicy {
    /// Retries after the first attempt
    pub iter_max: u32,
    pub sleep_initial: Duration,
    pub sleep_factor: f64,
    pub sleep_max: Duration,
    /// Treat a non-retryable error on the first attempt as retryable
    pub forgive_first_failure: bool,
}

impl Default for ResumePolicy {
    fn default() -> Self {
        Self::from_config(&ResumeConfig::default())
    }
}

/// Retry bookkeeping for one `execute_with_resume` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResumeState {
    /// 1-based number of the attempt about to run
    pub attempt: u32,
    pub remaining: u32,
    pub backoff: Duration,
}

impl ResumeState {
    pub fn new(policy: &ResumePolicy) -> Self {
        Self {
            attempt: 1,
            remaining: policy.iter_max,
            backoff: policy.sleep_initial.min(policy.sleep_max),
        }
    }

    /// State for the following attempt.
    pub fn next(self, policy: &ResumePolicy) -> Self {
        let grown = Duration::try_from_secs_f64(self.backoff.as_secs_f64() * policy.sleep_factor)
            .unwrap_or(policy.sleep_max);
        Self {
            attempt: self.attempt + 1,
            remaining: self.remaining.saturating_sub(1),
            backoff: grown.min(policy.sleep_max),
        }
    }
}

impl ResumePolicy {
    pub fn from_config(config: &ResumeConfig) -> Self {
        let secs = |s: f64| Duration::try_from_secs_f64(s).unwrap_or(Duration::ZERO);
        Self {
            iter_max: config.iter_max,
            sleep_initial: secs(config.sleep_initial_secs),
            sleep_factor: config.sleep_factor,
            sleep_max: secs(config.sleep_max_secs),
            forgive_first_failure: config.forgive_first_failure,
        }
    }

    /// Run `work` until it succeeds, fails without retry, or retries run out.
    ///
    /// `work` receives the 1-based attempt number. Only coded transfer errors
    /// are considered for retry; any other error is returned as is.
    pub async fn execute_with_resume<F, Fut, T>(&self, mut work: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut state = ResumeState::new(self);
        loop {
            let err = match work(state.attempt).await {
                Ok(value) => return Ok(value),
                Err(TransferError::Fasp(err)) => err,
                Err(other) => return Err(other),
            };

            if !self.should_retry(&err, &state) {
                error!(attempt = state.attempt, "transfer failed: {err}");
                return Err(TransferError::Fasp(err));
            }
            if state.remaining == 0 {
                error!(iter_max = self.iter_max, "retries exhausted: {err}");
                return Err(TransferError::RetriesExhausted {
                    iter_max: self.iter_max,
                    last: err,
                });
            }

            warn!(
                attempt = state.attempt,
                remaining = state.remaining,
                delay = ?state.backoff,
                "transfer failed: {err}, resuming"
            );
            tokio::time::sleep(state.backoff).await;
            state = state.next(self);
        }
    }

    fn should_retry(&self, err: &FaspError, state: &ResumeState) -> bool {
        err.is_retryable() || (self.forgive_first_failure && state.attempt == 1)
    }
}
