use std::time::Duration;

/// Configuration for a worker pool serving a single domain.
///
/// Domains isolate task types: a long-running task in one domain cannot
/// starve another domain's capacity. Spawn one pool per domain and size
/// each independently.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Domain whose queued tasks this pool claims
    pub domain: String,
    /// Number of worker loops to spawn
    pub workers: usize,
    /// Interval between claim attempts and heartbeat refreshes
    pub poll_interval_ms: u64,
    /// A worker whose heartbeat lapses past this threshold is considered dead
    pub heartbeat_timeout_ms: u64,
    /// Time a task gets to honor a cooperative abort before its body is
    /// forcefully terminated
    pub abort_grace_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            domain: "default".to_string(),
            workers: 2,
            poll_interval_ms: 50,
            heartbeat_timeout_ms: 5000,
            abort_grace_ms: 1000,
        }
    }
}

impl PoolConfig {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            ..Default::default()
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_heartbeat_timeout_ms(mut self, ms: u64) -> Self {
        self.heartbeat_timeout_ms = ms;
        self
    }

    pub fn with_abort_grace_ms(mut self, ms: u64) -> Self {
        self.abort_grace_ms = ms;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn abort_grace(&self) -> Duration {
        Duration::from_millis(self.abort_grace_ms)
    }
}
