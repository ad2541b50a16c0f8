//! Client-facing scheduling API.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::Result;
use crate::registry::Registry;
use crate::schema;
use crate::store::{LogEntry, Store, TaskState};

/// A store plus the process's task registry; everything a scheduler or
/// worker pool needs. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Engine {
    store: Store,
    registry: Arc<Registry>,
}

impl Engine {
    pub fn new(store: Store, registry: Arc<Registry>) -> Self {
        Self { store, registry }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Validate `input` against the named task's schema and insert a
/// `queued` record for it.
///
/// Validation errors surface here, synchronously, before any record is
/// inserted. The returned handle observes the task through the store.
pub fn schedule(engine: &Engine, name: &str, input: Value) -> Result<TaskHandle> {
    let def = engine.registry().lookup(name)?;
    let validated = schema::validate_input(def.inputs(), &input)?;
    let id = engine
        .store()
        .insert_task(name, def.domain(), Value::Object(validated))?;
    tracing::debug!(task_id = id, task = name, domain = def.domain(), "task scheduled");
    Ok(TaskHandle {
        engine: engine.clone(),
        id,
    })
}

/// Handle to one scheduled task; all accessors read through the store.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    engine: Engine,
    id: u64,
}

impl TaskHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> Result<TaskState> {
        Ok(self.engine.store().read(self.id)?.state)
    }

    pub fn output(&self) -> Result<Option<Value>> {
        Ok(self.engine.store().read(self.id)?.output)
    }

    pub fn traceback(&self) -> Result<Option<String>> {
        Ok(self.engine.store().read(self.id)?.traceback)
    }

    pub fn logs(&self) -> Result<Vec<LogEntry>> {
        self.engine.store().read_logs(self.id)
    }

    /// Block until the task reaches a terminal state. Fails with
    /// `Timeout` when the deadline elapses first; the task is unaffected
    /// and `join` may be called again.
    pub async fn join(&self, timeout: Option<Duration>) -> Result<TaskState> {
        self.engine.store().wait_terminal(self.id, timeout).await
    }

    /// Fire-and-forget abort request. Returns as soon as the flag is
    /// set; never errors on an already-terminal task.
    pub fn abort(&self) -> Result<()> {
        self.engine.store().request_abort(self.id)
    }
}

impl std::fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task #{} <{}>", self.id, self.engine.store().read(self.id).map(|r| r.name).unwrap_or_default())
    }
}
