use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use tokio::task::JoinError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing_subscriber::prelude::*;
use uuid::Uuid;

use crate::api::Engine;
use crate::capture::CaptureLayer;
use crate::config::PoolConfig;
use crate::store::{TaskRecord, TaskState};
use crate::worker::sandbox::TaskContext;

/// One worker: register, then poll the store for claimable tasks until
/// shutdown. Heartbeats are refreshed on every cycle, including while a
/// body is being supervised.
pub(crate) async fn worker_loop(engine: Engine, config: PoolConfig, shutdown: CancellationToken) {
    let store = engine.store().clone();
    let worker_id = match store.register_worker(&config.domain) {
        Ok(id) => id,
        Err(error) => {
            tracing::error!(domain = %config.domain, %error, "failed to register worker");
            return;
        }
    };

    let mut poll = tokio::time::interval(config.poll_interval());
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = poll.tick() => {}
        }
        store.worker_heartbeat(worker_id);
        match store.claim_next(&config.domain, worker_id) {
            Ok(Some(record)) => {
                store.set_worker_busy(worker_id, true);
                execute(&engine, worker_id, record, &config).await;
                store.set_worker_busy(worker_id, false);
            }
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(worker = %worker_id, %error, "claim attempt failed");
            }
        }
    }
    store.mark_worker_exited(worker_id);
    tracing::info!(worker = %worker_id, domain = %config.domain, "worker stopped");
}

/// Run one claimed task to a terminal state.
///
/// The body runs as its own tokio task under a log-capturing dispatcher.
/// The supervisor keeps heartbeats flowing, watches the abort flag, and
/// enforces the grace period: a body that has not yielded by the
/// deadline is forcefully terminated.
async fn execute(engine: &Engine, worker_id: Uuid, record: TaskRecord, config: &PoolConfig) {
    let store = engine.store().clone();
    let id = record.id;
    tracing::info!(task_id = id, task = %record.name, worker = %worker_id, "executing task");

    let def = match engine.registry().lookup(&record.name) {
        Ok(def) => def,
        Err(_) => {
            // Scheduled by a process with a richer registry than ours.
            finalize(
                id,
                store.mark_failed(
                    id,
                    &format!("no task named `{}` is registered in this process", record.name),
                ),
            );
            return;
        }
    };

    let capture = Arc::new(AtomicBool::new(false));
    let output = Arc::new(Mutex::new(None));
    let cancel = CancellationToken::new();
    let ctx = TaskContext::new(
        id,
        record.input.clone(),
        engine.clone(),
        def.clone(),
        output.clone(),
        cancel.clone(),
        capture.clone(),
    );

    let layer = CaptureLayer::new(store.clone(), id, capture);
    let dispatch = tracing::Dispatch::new(tracing_subscriber::registry().with(layer));
    let mut body = tokio::spawn(def.invoke(ctx).with_subscriber(dispatch));

    let mut ticks = tokio::time::interval(config.poll_interval());
    let mut abort_deadline: Option<Instant> = None;
    let outcome = loop {
        tokio::select! {
            outcome = &mut body => break outcome,
            _ = ticks.tick() => {
                store.worker_heartbeat(worker_id);
                if abort_deadline.is_none() && store.abort_requested(id).unwrap_or(false) {
                    tracing::info!(task_id = id, "abort requested, cancelling task body");
                    finalize(id, store.mark_aborting(id));
                    cancel.cancel();
                    abort_deadline = Some(Instant::now() + config.abort_grace());
                }
                if let Some(deadline) = abort_deadline {
                    if Instant::now() >= deadline {
                        tracing::warn!(task_id = id, "grace period elapsed, terminating task body");
                        body.abort();
                    }
                }
            }
        }
    };

    let aborting = abort_deadline.is_some();
    let state = match outcome {
        Ok(Ok(())) if aborting => {
            finalize(id, store.mark_aborted(id));
            TaskState::Aborted
        }
        Ok(Ok(())) => {
            let output = output.lock().unwrap_or_else(|e| e.into_inner()).take();
            finalize(id, store.mark_done(id, output));
            TaskState::Done
        }
        Ok(Err(_)) if aborting => {
            finalize(id, store.mark_aborted(id));
            TaskState::Aborted
        }
        Ok(Err(failure)) => {
            finalize(id, store.mark_failed(id, &failure.to_string()));
            TaskState::Failed
        }
        Err(join_error) if join_error.is_cancelled() => {
            finalize(id, store.mark_aborted(id));
            TaskState::Aborted
        }
        Err(join_error) => {
            finalize(
                id,
                store.mark_failed(id, &format!("panic: {}", panic_message(join_error))),
            );
            TaskState::Failed
        }
    };
    // A racing finalizer (reaper, another abort path) may have won; log
    // what the store actually recorded.
    let state = store.read(id).map(|r| r.state).unwrap_or(state);
    tracing::info!(task_id = id, state = %state, worker = %worker_id, "task finished");
}

fn finalize(id: u64, result: crate::error::Result<bool>) {
    if let Err(error) = result {
        tracing::error!(task_id = id, %error, "failed to record task transition");
    }
}

fn panic_message(error: JoinError) -> String {
    match error.try_into_panic() {
        Ok(payload) => {
            if let Some(message) = payload.downcast_ref::<&str>() {
                (*message).to_string()
            } else if let Some(message) = payload.downcast_ref::<String>() {
                message.clone()
            } else {
                "task body panicked".to_string()
            }
        }
        Err(_) => "task body cancelled".to_string(),
    }
}
