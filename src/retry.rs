use crate::error::PublishError;
use crate::ui;
use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;
use tokio::time::{sleep, Instant};

pub const DEFAULT_INITIAL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_RANDOMIZATION_FACTOR: f64 = 0.5;
pub const DEFAULT_MAX_INTERVAL_MS: u64 = 60_000;
pub const DEFAULT_MAX_ELAPSED_SECS: u64 = 900;

/// Result of a single attempt, as seen by [`RetryExecutor`].
#[derive(Debug)]
pub enum AttemptOutcome<T> {
    Success(T),
    Retryable(PublishError),
    Fatal(PublishError),
}

#[async_trait]
pub trait RetryableOperation: Send {
    type Output: Send;

    async fn attempt(&mut self) -> AttemptOutcome<Self::Output>;

    /// Runs after every retryable failure, before the backoff delay.
    async fn on_failure(&mut self, _error: &PublishError) {}
}

pub trait BackoffPolicy: Send {
    /// Next delay, or `None` once the retry budget is spent.
    fn next_backoff(&mut self) -> Option<Duration>;
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffSettings {
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub randomization_factor: f64,
    pub max_interval: Duration,
    pub max_elapsed_time: Duration,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(DEFAULT_INITIAL_INTERVAL_MS),
            multiplier: DEFAULT_MULTIPLIER,
            randomization_factor: DEFAULT_RANDOMIZATION_FACTOR,
            max_interval: Duration::from_millis(DEFAULT_MAX_INTERVAL_MS),
            max_elapsed_time: Duration::from_secs(DEFAULT_MAX_ELAPSED_SECS),
        }
    }
}

impl BackoffSettings {
    pub fn start(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(*self)
    }
}

/// Exponential backoff with bounded jitter and a total elapsed-time budget.
///
/// Returned intervals never decrease: a jittered value that falls below
/// the previous delay is raised to it.
#[derive(Debug)]
pub struct ExponentialBackoff {
    settings: BackoffSettings,
    current_interval: Duration,
    last_delay: Duration,
    attempts: u32,
    started_at: Instant,
}

impl ExponentialBackoff {
    pub fn new(settings: BackoffSettings) -> Self {
        Self {
            settings,
            current_interval: settings.initial_interval,
            last_delay: Duration::ZERO,
            attempts: 0,
            started_at: Instant::now(),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    fn jittered(&self, interval: Duration) -> Duration {
        let factor = self.settings.randomization_factor.clamp(0.0, 1.0);
        if factor == 0.0 {
            return interval;
        }
        let base = interval.as_secs_f64();
        let delta = base * factor;
        let value = rand::thread_rng().gen_range((base - delta)..=(base + delta));
        Duration::from_secs_f64(value.max(0.0))
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn next_backoff(&mut self) -> Option<Duration> {
        if self.started_at.elapsed() > self.settings.max_elapsed_time {
            return None;
        }

        let delay = self
            .jittered(self.current_interval)
            .min(self.settings.max_interval)
            .max(self.last_delay);

        let grown = self.current_interval.as_secs_f64() * self.settings.multiplier.max(1.0);
        self.current_interval =
            Duration::from_secs_f64(grown).min(self.settings.max_interval);
        self.last_delay = delay;
        self.attempts += 1;

        Some(delay)
    }
}

pub struct RetryExecutor {
    settings: BackoffSettings,
    verbose: bool,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(BackoffSettings::default(), false)
    }
}

impl RetryExecutor {
    pub fn new(settings: BackoffSettings, verbose: bool) -> Self {
        Self { settings, verbose }
    }

    pub fn settings(&self) -> &BackoffSettings {
        &self.settings
    }

    pub async fn execute<Op>(&self, artifact: &str, operation: &mut Op) -> Result<Op::Output, PublishError>
    where
        Op: RetryableOperation,
    {
        let mut backoff = self.settings.start();
        self.execute_with_policy(artifact, operation, &mut backoff).await
    }

    pub async fn execute_with_policy<Op, P>(
        &self,
        artifact: &str,
        operation: &mut Op,
        backoff: &mut P,
    ) -> Result<Op::Output, PublishError>
    where
        Op: RetryableOperation,
        P: BackoffPolicy,
    {
        loop {
            let error = match operation.attempt().await {
                AttemptOutcome::Success(value) => return Ok(value),
                AttemptOutcome::Fatal(error) => return Err(error),
                AttemptOutcome::Retryable(error) => error,
            };

            operation.on_failure(&error).await;

            let Some(delay) = backoff.next_backoff() else {
                log::warn!("Giving up on artifact {artifact}: {error}");
                return Err(PublishError::BackoffExhausted {
                    artifact: artifact.to_string(),
                    last_error: error.to_string(),
                });
            };

            let message = format!(
                "Failed to publish artifact {artifact}: {error}. Will retry in {} seconds.",
                delay.as_secs()
            );
            log::info!("{message}");
            if self.verbose {
                ui::info(&message);
            }
            sleep(delay).await;
        }
    }
}
