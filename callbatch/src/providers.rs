//! Provider abstractions for time, task spawning, and randomness.
//!
//! The batch client never touches tokio's clock, executor, or RNG directly.
//! Everything goes through these traits so tests can run the whole polling
//! loop under a paused clock and so hosts can plug in their own runtime
//! glue.
//!
//! All providers assume a single-threaded runtime: futures are `?Send`
//! and spawned tasks run on the current thread via `spawn_local`.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rand::distr::{Distribution, StandardUniform};
use rand::Rng;
use thiserror::Error;
use tokio::task::JoinHandle;

/// Errors that can occur during time operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeError {
    /// The operation timed out.
    #[error("operation timed out")]
    Elapsed,
}

/// Provider trait for time operations.
#[async_trait(?Send)]
pub trait TimeProvider: Clone {
    /// Sleep for the specified duration.
    async fn sleep(&self, duration: Duration);

    /// Time elapsed since the provider was created.
    fn now(&self) -> Duration;

    /// Run a future with a timeout.
    ///
    /// Returns `Err(TimeError::Elapsed)` if `future` does not complete
    /// within `duration`.
    async fn timeout<F, T>(&self, duration: Duration, future: F) -> Result<T, TimeError>
    where
        F: Future<Output = T>;
}

/// Real time provider using Tokio's time facilities.
#[derive(Debug, Clone)]
pub struct TokioTimeProvider {
    start: tokio::time::Instant,
}

impl TokioTimeProvider {
    /// Create a new Tokio time provider.
    pub fn new() -> Self {
        Self {
            start: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioTimeProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl TimeProvider for TokioTimeProvider {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    async fn timeout<F, T>(&self, duration: Duration, future: F) -> Result<T, TimeError>
    where
        F: Future<Output = T>,
    {
        tokio::time::timeout(duration, future)
            .await
            .map_err(|_| TimeError::Elapsed)
    }
}

/// Provider for spawning local tasks in a single-threaded context.
pub trait TaskProvider: Clone {
    /// Spawn a named task on the current thread.
    ///
    /// Must be called from within a `LocalSet`.
    fn spawn_task<F>(&self, name: &str, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + 'static;
}

/// Tokio-based task provider using `spawn_local`.
#[derive(Debug, Clone, Default)]
pub struct TokioTaskProvider;

impl TaskProvider for TokioTaskProvider {
    fn spawn_task<F>(&self, name: &str, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + 'static,
    {
        let task_name = name.to_string();
        tokio::task::spawn_local(async move {
            tracing::trace!("Task {} starting", task_name);
            future.await;
            tracing::trace!("Task {} completed", task_name);
        })
    }
}

/// Provider trait for random number generation.
pub trait RandomProvider: Clone {
    /// Generate a random value of type `T`.
    fn random<T>(&self) -> T
    where
        StandardUniform: Distribution<T>;
}

/// Production random provider backed by the thread-local RNG.
#[derive(Debug, Clone, Default)]
pub struct TokioRandomProvider;

impl TokioRandomProvider {
    /// Create a new production random provider.
    pub fn new() -> Self {
        Self
    }
}

impl RandomProvider for TokioRandomProvider {
    fn random<T>(&self) -> T
    where
        StandardUniform: Distribution<T>,
    {
        rand::rng().random()
    }
}

/// Bundle of provider types for a runtime environment.
///
/// Keeps the client generic over one type parameter instead of three.
pub trait Providers: Clone + 'static {
    /// Time provider type for sleeps and timeouts.
    type Time: TimeProvider + 'static;

    /// Task provider type for spawning the batch worker.
    type Task: TaskProvider + 'static;

    /// Random provider type for request key nonces.
    type Random: RandomProvider + 'static;

    /// Get the time provider instance.
    fn time(&self) -> &Self::Time;

    /// Get the task provider instance.
    fn task(&self) -> &Self::Task;

    /// Get the random provider instance.
    fn random(&self) -> &Self::Random;
}

/// Production providers using the Tokio runtime.
#[derive(Debug, Clone, Default)]
pub struct TokioProviders {
    time: TokioTimeProvider,
    task: TokioTaskProvider,
    random: TokioRandomProvider,
}

impl TokioProviders {
    /// Create a new production providers bundle.
    pub fn new() -> Self {
        Self {
            time: TokioTimeProvider::new(),
            task: TokioTaskProvider,
            random: TokioRandomProvider::new(),
        }
    }
}

impl Providers for TokioProviders {
    type Time = TokioTimeProvider;
    type Task = TokioTaskProvider;
    type Random = TokioRandomProvider;

    fn time(&self) -> &Self::Time {
        &self.time
    }

    fn task(&self) -> &Self::Task {
        &self.task
    }

    fn random(&self) -> &Self::Random {
        &self.random
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timeout_elapses() {
        let time = TokioTimeProvider::new();
        let result = time
            .timeout(Duration::from_millis(100), time.sleep(Duration::from_secs(5)))
            .await;
        assert_eq!(result, Err(TimeError::Elapsed));
        assert!(time.now() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_completes() {
        let time = TokioTimeProvider::new();
        let result = time.timeout(Duration::from_secs(1), async { 7 }).await;
        assert_eq!(result, Ok(7));
    }
}
