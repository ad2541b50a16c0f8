//! Scoped capture of task-body logs.
//!
//! The worker runs each task body under its own `tracing` dispatcher
//! whose only layer is a [`CaptureLayer`]. Events are persisted as log
//! entries for the task, but only while a [`CaptureGuard`] is alive —
//! the sandbox's `capture_logs()` scope. Dropping the guard (on any exit
//! path, including panic and forceful abort) stops the capture.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::store::Store;

pub(crate) struct CaptureLayer {
    store: Store,
    task_id: u64,
    active: Arc<AtomicBool>,
}

impl CaptureLayer {
    pub(crate) fn new(store: Store, task_id: u64, active: Arc<AtomicBool>) -> Self {
        Self {
            store,
            task_id,
            active,
        }
    }
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let message = match visitor.message {
            Some(message) => message,
            None => return,
        };
        let level = event.metadata().level().to_string();
        // An append can only fail for a vanished record; drop the line.
        let _ = self.store.append_log(self.task_id, &level, &message);
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: Option<String>,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
        }
    }
}

/// Keeps log capture active for a task while it is alive.
#[must_use = "capture stops when the guard is dropped"]
pub struct CaptureGuard {
    active: Arc<AtomicBool>,
}

impl CaptureGuard {
    pub(crate) fn new(active: Arc<AtomicBool>) -> Self {
        active.store(true, Ordering::Release);
        Self { active }
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
    }
}
