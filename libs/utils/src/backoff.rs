// Copyright 2025 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Exponential backoff and retry helpers.
//!
//! [`ExponentialBackoff`] computes the delay for a given attempt. The retry helpers drive an
//! async operation with that delay until it succeeds or a budget runs out. The budget is either
//! a maximum number of attempts ([`ExponentialBackoff::retry_attempts`]) or a maximum amount of
//! total elapsed time ([`ExponentialBackoff::retry_for`]).
//!
//! Elapsed time is measured with [`tokio::time::Instant`], so paused test clocks apply.

use std::{fmt::Display, future::Future, time::Duration};

use tokio::time::Instant;

/// Configuration for exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// Minimum delay before retrying.
    pub minimum_delay_secs: f32,
    /// Maximum delay for a retry.
    pub maximum_delay_secs: f32,
    /// Factor by which to increase the delay.
    pub factor: f32,
    /// Jitter to add to the delay.
    pub jitter_secs: f32,
}

/// Exponential backoff
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
}

impl ExponentialBackoff {
    /// Creates a new [`ExponentialBackoff`].
    pub fn new(
        minimum_delay_secs: f32,
        maximum_delay_secs: f32,
        factor: f32,
        jitter_secs: f32,
    ) -> Self {
        Self {
            config: BackoffConfig {
                minimum_delay_secs,
                maximum_delay_secs,
                factor,
                jitter_secs,
            },
        }
    }

    /// Creates a new [`ExponentialBackoff`] from the given configuration.
    pub fn new_from_config(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration of this backoff.
    pub fn config(&self) -> BackoffConfig {
        self.config
    }

    /// Returns the backoff duration for the given attempt.
    pub fn duration(&self, attempt: u32) -> Duration {
        let backoff = self.config.minimum_delay_secs * self.config.factor.powi(attempt as i32);
        let backoff = backoff + rand::random::<f32>() * self.config.jitter_secs;
        Duration::from_secs_f32(backoff.min(self.config.maximum_delay_secs))
    }

    /// Runs `op` until it succeeds, sleeping between failures.
    ///
    /// Gives up and returns the last error once the next sleep would push the total elapsed time
    /// past `max_elapsed`.
    pub async fn retry_for<T, E, F, Fut>(&self, max_elapsed: Duration, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let start = Instant::now();
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let delay = self.duration(attempt);
                    if start.elapsed() + delay > max_elapsed {
                        tracing::debug!(err = %e, attempt, "Giving up after retry budget was exhausted");
                        return Err(e);
                    }
                    tracing::debug!(err = %e, attempt, ?delay, "Operation failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Runs `op` until it succeeds, at most `1 + retries` times.
    ///
    /// Only errors for which `retryable` returns true are retried, every other error is returned
    /// immediately.
    pub async fn retry_attempts<T, E, F, Fut, R>(
        &self,
        retries: u32,
        retryable: R,
        mut op: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        E: Display,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < retries && retryable(&e) => {
                    let delay = self.duration(attempt);
                    tracing::debug!(err = %e, attempt, ?delay, "Transient failure, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
