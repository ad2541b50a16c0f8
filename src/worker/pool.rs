use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::Engine;
use crate::config::PoolConfig;
use crate::store::Store;
use crate::worker::runner;

/// Owns the worker loops for one domain, plus a monitor that reaps
/// workers whose heartbeat lapsed and resolves the tasks they stranded.
///
/// Dropping the pool aborts whatever is still running; call
/// [`shutdown`](WorkerPool::shutdown) for a graceful stop that waits for
/// in-flight tasks to finish.
pub struct WorkerPool {
    config: PoolConfig,
    shutdown: CancellationToken,
    workers: Vec<JoinHandle<()>>,
    monitor: Option<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn the configured number of workers and the liveness monitor.
    pub fn spawn(engine: Engine, config: PoolConfig) -> Self {
        let shutdown = CancellationToken::new();

        let workers = (0..config.workers)
            .map(|_| {
                tokio::spawn(runner::worker_loop(
                    engine.clone(),
                    config.clone(),
                    shutdown.clone(),
                ))
            })
            .collect();

        let monitor = tokio::spawn(monitor_loop(
            engine.store().clone(),
            config.clone(),
            shutdown.clone(),
        ));

        tracing::info!(domain = %config.domain, workers = config.workers, "worker pool started");
        Self {
            config,
            shutdown,
            workers,
            monitor: Some(monitor),
        }
    }

    pub fn domain(&self) -> &str {
        &self.config.domain
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stop claiming new tasks and wait for every worker to drain.
    /// In-flight task bodies run to completion; abort tasks you do not
    /// want to wait for before calling this.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        for handle in self.workers.drain(..) {
            let _ = handle.await;
        }
        if let Some(monitor) = self.monitor.take() {
            let _ = monitor.await;
        }
        tracing::info!(domain = %self.config.domain, "worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Abort whatever shutdown did not drain.
        for handle in &self.workers {
            handle.abort();
        }
        if let Some(monitor) = &self.monitor {
            monitor.abort();
        }
    }
}

/// Periodically sweep the worker table. A worker whose heartbeat lapsed
/// past the configured threshold is marked dead and its in-flight tasks
/// are resolved by the store, never left to hang.
async fn monitor_loop(store: Store, config: PoolConfig, shutdown: CancellationToken) {
    let sweep_every = (config.heartbeat_timeout() / 2).max(config.poll_interval());
    let mut ticks = tokio::time::interval(sweep_every);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticks.tick() => {}
        }
        match store.reap_dead_workers(config.heartbeat_timeout()) {
            Ok(reaped) => {
                for (worker, tasks) in reaped {
                    tracing::warn!(
                        worker = %worker,
                        orphaned = ?tasks,
                        "worker heartbeat lapsed, marked dead"
                    );
                }
            }
            Err(error) => {
                tracing::error!(%error, "failed to sweep worker table");
            }
        }
    }
}
