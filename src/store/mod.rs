//! Durable task store: the single source of truth shared by schedulers
//! and workers.
//!
//! All coordination goes through this store's atomic primitives. Each
//! primitive takes the store's critical section once, so claims are
//! linearizable: no two workers ever win the same queued record. With a
//! journal attached (see [`Store::open`]), every mutation is persisted
//! and flushed before it is acknowledged.

mod journal;
pub mod task;

pub use task::{LogEntry, TaskRecord, TaskState, WorkerRecord, WorkerStatus};

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use journal::{Journal, JournalOp};

#[derive(Debug)]
struct StoreState {
    next_task_id: u64,
    tasks: BTreeMap<u64, TaskRecord>,
    logs: HashMap<u64, Vec<LogEntry>>,
    workers: HashMap<Uuid, WorkerRecord>,
    journal: Option<Journal>,
}

impl StoreState {
    fn empty(journal: Option<Journal>) -> Self {
        Self {
            next_task_id: 1,
            tasks: BTreeMap::new(),
            logs: HashMap::new(),
            workers: HashMap::new(),
            journal,
        }
    }

    fn journal(&mut self, op: &JournalOp) -> Result<()> {
        match self.journal.as_mut() {
            Some(journal) => journal.append(op),
            None => Ok(()),
        }
    }

    fn record(&self, id: u64) -> Result<&TaskRecord> {
        self.tasks.get(&id).ok_or(EngineError::UnknownTaskId(id))
    }

    /// Apply a terminal or aborting transition. Stale writes (the record
    /// already moved on) are ignored so racing finalizers cannot corrupt
    /// a terminal record. Returns whether the transition was applied.
    fn finish(
        &mut self,
        id: u64,
        state: TaskState,
        output: Option<Value>,
        traceback: Option<String>,
    ) -> Result<bool> {
        let current = self.record(id)?.state;
        if !current.can_transition_to(state) {
            return Ok(false);
        }
        let finished_at = Utc::now();
        self.journal(&JournalOp::Finish {
            id,
            state,
            finished_at,
            output: output.clone(),
            traceback: traceback.clone(),
        })?;
        let record = self.tasks.get_mut(&id).expect("record checked above");
        record.state = state;
        if state.is_terminal() {
            record.finished_at = Some(finished_at);
        }
        if state == TaskState::Done {
            record.output = output;
        }
        if traceback.is_some() {
            record.traceback = traceback;
        }
        Ok(true)
    }
}

/// Cloneable handle to the shared task store.
#[derive(Debug, Clone)]
pub struct Store {
    state: Arc<Mutex<StoreState>>,
    changed: Arc<Notify>,
}

impl Store {
    /// A store with no journal. State lives for the lifetime of the
    /// process; suitable for tests and embedded use.
    pub fn in_memory() -> Self {
        Self::from_state(StoreState::empty(None))
    }

    /// Open a journal-backed store, replaying any existing journal.
    ///
    /// Tasks found in-flight during replay are resolved rather than left
    /// to hang: `running` records are marked failed (their worker is
    /// gone), `aborting` records are marked aborted.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let ops = journal::replay(path)?;
        let mut state = StoreState::empty(None);
        for op in ops {
            apply_replayed(&mut state, op);
        }
        state.journal = Some(Journal::open(path)?);

        let in_flight: Vec<(u64, TaskState)> = state
            .tasks
            .values()
            .filter(|r| matches!(r.state, TaskState::Running | TaskState::Aborting))
            .map(|r| (r.id, r.state))
            .collect();
        for (id, from) in in_flight {
            let (to, traceback) = match from {
                TaskState::Aborting => (TaskState::Aborted, None),
                _ => (
                    TaskState::Failed,
                    Some("worker lost: store reopened while task was running".to_string()),
                ),
            };
            state.finish(id, to, None, traceback)?;
            tracing::warn!(task_id = id, from = %from, to = %to, "resolved in-flight task during replay");
        }

        Ok(Self::from_state(state))
    }

    fn from_state(state: StoreState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            changed: Arc::new(Notify::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a new task record in `queued` state and return its id.
    pub fn insert_task(&self, name: &str, domain: &str, input: Value) -> Result<u64> {
        let mut state = self.lock();
        let id = state.next_task_id;
        let record = TaskRecord::new(id, name.to_string(), domain.to_string(), input);
        state.journal(&JournalOp::Insert {
            record: record.clone(),
        })?;
        state.next_task_id += 1;
        state.tasks.insert(id, record);
        state.logs.insert(id, Vec::new());
        drop(state);
        self.changed.notify_waiters();
        Ok(id)
    }

    /// Atomically claim the oldest queued task in `domain` for `worker`,
    /// transitioning it to `running`. Returns `None` when nothing is
    /// claimable; concurrent losers see `None`, never an error.
    pub fn claim_next(&self, domain: &str, worker: Uuid) -> Result<Option<TaskRecord>> {
        let mut state = self.lock();
        let id = match state
            .tasks
            .values()
            .find(|r| r.state == TaskState::Queued && r.domain == domain)
            .map(|r| r.id)
        {
            Some(id) => id,
            None => return Ok(None),
        };
        let started_at = Utc::now();
        state.journal(&JournalOp::Claim {
            id,
            worker,
            started_at,
        })?;
        let record = state.tasks.get_mut(&id).expect("claim candidate exists");
        record.state = TaskState::Running;
        record.worker = Some(worker);
        record.started_at = Some(started_at);
        let claimed = record.clone();
        drop(state);
        self.changed.notify_waiters();
        Ok(Some(claimed))
    }

    /// Transition a task to `done`, committing its output.
    pub fn mark_done(&self, id: u64, output: Option<Value>) -> Result<bool> {
        self.finish(id, TaskState::Done, output, None)
    }

    /// Transition a task to `failed`, recording the traceback.
    pub fn mark_failed(&self, id: u64, traceback: &str) -> Result<bool> {
        self.finish(id, TaskState::Failed, None, Some(traceback.to_string()))
    }

    /// Record that a worker observed the abort flag and is winding the
    /// task down.
    pub fn mark_aborting(&self, id: u64) -> Result<bool> {
        let mut state = self.lock();
        let current = state.record(id)?.state;
        if !current.can_transition_to(TaskState::Aborting) {
            return Ok(false);
        }
        state.journal(&JournalOp::Aborting { id })?;
        state.tasks.get_mut(&id).expect("record checked above").state = TaskState::Aborting;
        drop(state);
        self.changed.notify_waiters();
        Ok(true)
    }

    /// Transition a task to `aborted`.
    pub fn mark_aborted(&self, id: u64) -> Result<bool> {
        self.finish(id, TaskState::Aborted, None, None)
    }

    fn finish(
        &self,
        id: u64,
        state: TaskState,
        output: Option<Value>,
        traceback: Option<String>,
    ) -> Result<bool> {
        let applied = self.lock().finish(id, state, output, traceback)?;
        if applied {
            self.changed.notify_waiters();
        }
        Ok(applied)
    }

    /// Request an abort without blocking. A still-queued task is aborted
    /// directly; a running one gets the flag for its worker to observe.
    /// Requests against terminal tasks are no-ops.
    pub fn request_abort(&self, id: u64) -> Result<()> {
        let mut state = self.lock();
        let current = state.record(id)?.state;
        match current {
            TaskState::Queued => {
                state.finish(id, TaskState::Aborted, None, None)?;
            }
            TaskState::Running => {
                state.journal(&JournalOp::AbortRequested { id })?;
                state
                    .tasks
                    .get_mut(&id)
                    .expect("record checked above")
                    .abort_requested = true;
            }
            _ => return Ok(()),
        }
        drop(state);
        self.changed.notify_waiters();
        Ok(())
    }

    pub fn abort_requested(&self, id: u64) -> Result<bool> {
        Ok(self.lock().record(id)?.abort_requested)
    }

    pub fn read(&self, id: u64) -> Result<TaskRecord> {
        Ok(self.lock().record(id)?.clone())
    }

    /// Append a log line for a task. The store assigns the sequence
    /// number, so entries are totally ordered per task regardless of
    /// which worker wrote them.
    pub fn append_log(&self, id: u64, level: &str, message: &str) -> Result<u64> {
        let mut state = self.lock();
        state.record(id)?;
        let seq = state.logs.get(&id).map(Vec::len).unwrap_or(0) as u64 + 1;
        let entry = LogEntry {
            task_id: id,
            seq,
            level: level.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
        };
        state.journal(&JournalOp::Log {
            entry: entry.clone(),
        })?;
        state.logs.entry(id).or_default().push(entry);
        Ok(seq)
    }

    /// Logs for a task in emission order.
    pub fn read_logs(&self, id: u64) -> Result<Vec<LogEntry>> {
        let state = self.lock();
        state.record(id)?;
        Ok(state.logs.get(&id).cloned().unwrap_or_default())
    }

    /// Block until the task reaches a terminal state, or fail with
    /// `Timeout`. The task itself is unaffected by a timeout; waiting can
    /// be retried.
    pub async fn wait_terminal(&self, id: u64, timeout: Option<Duration>) -> Result<TaskState> {
        let wait = async {
            loop {
                // Register interest before checking, so a change landing
                // between the check and the await is not missed.
                let mut notified = std::pin::pin!(self.changed.notified());
                notified.as_mut().enable();
                let state = self.read(id)?.state;
                if state.is_terminal() {
                    return Ok(state);
                }
                notified.await;
            }
        };
        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, wait)
                .await
                .map_err(|_| EngineError::Timeout)?,
            None => wait.await,
        }
    }

    // --- worker liveness -------------------------------------------------

    /// Register a new worker loop and return its id.
    pub fn register_worker(&self, domain: &str) -> Result<Uuid> {
        let record = WorkerRecord::new(domain.to_string());
        let id = record.id;
        self.lock().workers.insert(id, record);
        tracing::info!(worker = %id, domain, "worker registered");
        Ok(id)
    }

    /// Refresh a worker's heartbeat. Unknown ids are ignored (the worker
    /// may already have been reaped).
    pub fn worker_heartbeat(&self, id: Uuid) {
        if let Some(worker) = self.lock().workers.get_mut(&id) {
            worker.last_heartbeat = Utc::now();
        }
    }

    pub fn set_worker_busy(&self, id: Uuid, busy: bool) {
        if let Some(worker) = self.lock().workers.get_mut(&id) {
            if !matches!(worker.status, WorkerStatus::Dead | WorkerStatus::Exited) {
                worker.status = if busy {
                    WorkerStatus::Busy
                } else {
                    WorkerStatus::Idle
                };
            }
        }
    }

    pub fn mark_worker_exited(&self, id: Uuid) {
        if let Some(worker) = self.lock().workers.get_mut(&id) {
            worker.status = WorkerStatus::Exited;
        }
    }

    pub fn workers(&self) -> Vec<WorkerRecord> {
        self.lock().workers.values().cloned().collect()
    }

    /// Mark workers whose heartbeat lapsed past `timeout` as dead and
    /// resolve their orphaned in-flight tasks: `running` records become
    /// `failed` (never silently requeued), `aborting` records become
    /// `aborted`. Returns each reaped worker with the tasks it stranded.
    pub fn reap_dead_workers(&self, timeout: Duration) -> Result<Vec<(Uuid, Vec<u64>)>> {
        let threshold = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX);
        let mut state = self.lock();
        let lapsed: Vec<Uuid> = state
            .workers
            .values()
            .filter(|w| {
                !matches!(w.status, WorkerStatus::Dead | WorkerStatus::Exited)
                    && !w.is_alive(threshold)
            })
            .map(|w| w.id)
            .collect();

        let mut reaped = Vec::new();
        for worker_id in lapsed {
            if let Some(worker) = state.workers.get_mut(&worker_id) {
                worker.status = WorkerStatus::Dead;
            }
            let orphaned: Vec<(u64, TaskState)> = state
                .tasks
                .values()
                .filter(|r| {
                    r.worker == Some(worker_id)
                        && matches!(r.state, TaskState::Running | TaskState::Aborting)
                })
                .map(|r| (r.id, r.state))
                .collect();
            let mut resolved = Vec::new();
            for (task_id, from) in orphaned {
                let applied = match from {
                    TaskState::Aborting => state.finish(task_id, TaskState::Aborted, None, None)?,
                    _ => state.finish(
                        task_id,
                        TaskState::Failed,
                        None,
                        Some(format!("worker {worker_id} lost: heartbeat timeout")),
                    )?,
                };
                if applied {
                    resolved.push(task_id);
                }
            }
            reaped.push((worker_id, resolved));
        }
        drop(state);
        if !reaped.is_empty() {
            self.changed.notify_waiters();
        }
        Ok(reaped)
    }
}

/// Rebuild in-memory state from a journaled operation. Mirrors the live
/// mutation paths minus journaling and notification.
fn apply_replayed(state: &mut StoreState, op: JournalOp) {
    match op {
        JournalOp::Insert { record } => {
            state.next_task_id = state.next_task_id.max(record.id + 1);
            state.logs.entry(record.id).or_default();
            state.tasks.insert(record.id, record);
        }
        JournalOp::Claim {
            id,
            worker,
            started_at,
        } => {
            if let Some(record) = state.tasks.get_mut(&id) {
                record.state = TaskState::Running;
                record.worker = Some(worker);
                record.started_at = Some(started_at);
            }
        }
        JournalOp::Aborting { id } => {
            if let Some(record) = state.tasks.get_mut(&id) {
                record.state = TaskState::Aborting;
            }
        }
        JournalOp::AbortRequested { id } => {
            if let Some(record) = state.tasks.get_mut(&id) {
                record.abort_requested = true;
            }
        }
        JournalOp::Finish {
            id,
            state: task_state,
            finished_at,
            output,
            traceback,
        } => {
            if let Some(record) = state.tasks.get_mut(&id) {
                record.state = task_state;
                if task_state.is_terminal() {
                    record.finished_at = Some(finished_at);
                }
                if task_state == TaskState::Done {
                    record.output = output;
                }
                if traceback.is_some() {
                    record.traceback = traceback;
                }
            }
        }
        JournalOp::Log { entry } => {
            state.logs.entry(entry.task_id).or_default().push(entry);
        }
    }
}
