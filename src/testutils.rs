//! Helpers for integration tests: scoped worker fleets and polling
//! assertions.

use std::future::Future;
use std::time::Duration;

use crate::api::Engine;
use crate::config::PoolConfig;
use crate::worker::WorkerPool;

/// A worker pool scoped to a test: fast timers, torn down on drop.
pub struct WorkerFleet {
    pool: Option<WorkerPool>,
}

impl WorkerFleet {
    /// One worker serving the `default` domain.
    pub fn up(engine: &Engine) -> Self {
        Self::up_in(engine, "default", 1)
    }

    /// `workers` workers serving `domain`.
    pub fn up_in(engine: &Engine, domain: &str, workers: usize) -> Self {
        let config = PoolConfig::new(domain)
            .with_workers(workers)
            .with_poll_interval_ms(10)
            .with_heartbeat_timeout_ms(2000)
            .with_abort_grace_ms(200);
        Self {
            pool: Some(WorkerPool::spawn(engine.clone(), config)),
        }
    }

    /// Graceful teardown; waits for in-flight tasks.
    pub async fn down(mut self) {
        if let Some(pool) = self.pool.take() {
            pool.shutdown().await;
        }
    }
}

impl Drop for WorkerFleet {
    fn drop(&mut self) {
        // Dropping the pool aborts anything still running.
        self.pool.take();
    }
}

/// Wait for a condition to become true with timeout
pub async fn wait_for<F, Fut>(condition: F, timeout: Duration, poll_interval: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        tokio::time::sleep(poll_interval).await;
    }
    false
}

/// Assert a condition eventually becomes true
pub async fn assert_eventually<F, Fut>(condition: F, timeout: Duration, message: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = wait_for(condition, timeout, Duration::from_millis(10)).await;
    assert!(result, "{}", message);
}
