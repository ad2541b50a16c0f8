//! Per-task execution context.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::api::Engine;
use crate::capture::CaptureGuard;
use crate::error::Result;
use crate::registry::TaskDefinition;
use crate::schema;

/// Handed to a task body for the duration of one invocation.
///
/// Gives the body its validated input, a place to save output, scoped
/// log capture, cooperative abort checkpoints, and engine access so a
/// body may schedule and join sub-tasks.
#[derive(Clone)]
pub struct TaskContext {
    id: u64,
    input: Value,
    engine: Engine,
    def: Arc<TaskDefinition>,
    output: Arc<Mutex<Option<Value>>>,
    cancel: CancellationToken,
    capture: Arc<AtomicBool>,
}

impl TaskContext {
    pub(crate) fn new(
        id: u64,
        input: Value,
        engine: Engine,
        def: Arc<TaskDefinition>,
        output: Arc<Mutex<Option<Value>>>,
        cancel: CancellationToken,
        capture: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id,
            input,
            engine,
            def,
            output,
            cancel,
            capture,
        }
    }

    pub fn task_id(&self) -> u64 {
        self.id
    }

    /// The validated input payload, defaults applied and moments
    /// normalized.
    pub fn input(&self) -> &Value {
        &self.input
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Save the task's output. Validated against the output schema if
    /// one is declared, otherwise stored opaquely. May be called more
    /// than once; the last write wins. The value is committed to the
    /// store when the task completes successfully.
    pub fn save_output(&self, value: Value) -> Result<()> {
        let validated = schema::validate_output(self.def.outputs(), &value)?;
        *self.output.lock().unwrap_or_else(|e| e.into_inner()) = Some(validated);
        Ok(())
    }

    /// Start capturing logs emitted by this body. Events are persisted
    /// for the task while the returned guard is alive; capture stops on
    /// every exit path once the guard drops.
    pub fn capture_logs(&self) -> CaptureGuard {
        CaptureGuard::new(self.capture.clone())
    }

    /// Cooperative abort checkpoint. Bodies that poll this can wind down
    /// cleanly; bodies that never do are forcefully terminated after the
    /// pool's grace period.
    pub fn aborted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when an abort is requested. For bodies structured around
    /// `select!` rather than polling.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("id", &self.id)
            .field("task", &self.def.name())
            .finish_non_exhaustive()
    }
}
