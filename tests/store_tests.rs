//! Store-level tests: claim linearizability under contention and the
//! full state-machine walk.

use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use drover::error::EngineError;
use drover::store::{Store, TaskState};

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_claims_never_double_dispatch() {
    let store = Store::in_memory();
    let total = 200;
    for _ in 0..total {
        store.insert_task("noop", "default", json!({})).unwrap();
    }

    let mut claimants = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        claimants.push(tokio::spawn(async move {
            let worker = Uuid::new_v4();
            let mut claimed = Vec::new();
            loop {
                match store.claim_next("default", worker).unwrap() {
                    Some(record) => {
                        claimed.push(record.id);
                        tokio::task::yield_now().await;
                    }
                    None => break,
                }
            }
            claimed
        }));
    }

    let mut all = Vec::new();
    for claimant in claimants {
        all.extend(claimant.await.unwrap());
    }
    all.sort_unstable();
    let before_dedup = all.len();
    all.dedup();

    assert_eq!(before_dedup, total, "every record claimed");
    assert_eq!(all.len(), total, "no record claimed twice");
}

#[test]
fn claims_are_fifo_by_id() {
    let store = Store::in_memory();
    let first = store.insert_task("noop", "default", json!({})).unwrap();
    let second = store.insert_task("noop", "default", json!({})).unwrap();

    let worker = Uuid::new_v4();
    assert_eq!(store.claim_next("default", worker).unwrap().unwrap().id, first);
    assert_eq!(store.claim_next("default", worker).unwrap().unwrap().id, second);
}

#[test]
fn full_lifecycle_walk() {
    let store = Store::in_memory();
    let worker = Uuid::new_v4();

    let id = store.insert_task("noop", "default", json!({"k": 1})).unwrap();
    let record = store.read(id).unwrap();
    assert_eq!(record.state, TaskState::Queued);
    assert!(record.started_at.is_none());

    let claimed = store.claim_next("default", worker).unwrap().unwrap();
    assert_eq!(claimed.state, TaskState::Running);
    assert_eq!(claimed.worker, Some(worker));
    assert!(claimed.started_at.is_some());

    assert!(store.mark_done(id, Some(json!({"out": true}))).unwrap());
    let record = store.read(id).unwrap();
    assert_eq!(record.state, TaskState::Done);
    assert_eq!(record.output, Some(json!({"out": true})));
    assert!(record.finished_at.is_some());
}

#[test]
fn abort_flow_for_running_task() {
    let store = Store::in_memory();
    let id = store.insert_task("noop", "default", json!({})).unwrap();
    store.claim_next("default", Uuid::new_v4()).unwrap();

    store.request_abort(id).unwrap();
    assert!(store.abort_requested(id).unwrap());
    assert_eq!(store.read(id).unwrap().state, TaskState::Running);

    assert!(store.mark_aborting(id).unwrap());
    assert_eq!(store.read(id).unwrap().state, TaskState::Aborting);

    // A task being aborted cannot be rescued into `done`.
    assert!(!store.mark_done(id, Some(json!(1))).unwrap());

    assert!(store.mark_aborted(id).unwrap());
    assert_eq!(store.read(id).unwrap().state, TaskState::Aborted);
    assert!(store.read(id).unwrap().output.is_none());
}

#[test]
fn abort_of_terminal_task_is_a_noop() {
    let store = Store::in_memory();
    let id = store.insert_task("noop", "default", json!({})).unwrap();
    store.claim_next("default", Uuid::new_v4()).unwrap();
    store.mark_done(id, None).unwrap();

    store.request_abort(id).unwrap();
    assert_eq!(store.read(id).unwrap().state, TaskState::Done);
    assert!(!store.abort_requested(id).unwrap());
}

#[tokio::test]
async fn wait_terminal_observes_abort_of_queued_task() {
    let store = Store::in_memory();
    let id = store.insert_task("noop", "default", json!({})).unwrap();

    let waiter = {
        let store = store.clone();
        tokio::spawn(async move { store.wait_terminal(id, Some(Duration::from_secs(5))).await })
    };
    // Give the waiter a chance to park before the state change.
    tokio::time::sleep(Duration::from_millis(20)).await;
    store.request_abort(id).unwrap();

    assert_eq!(waiter.await.unwrap().unwrap(), TaskState::Aborted);
}

#[test]
fn log_append_requires_known_task() {
    let store = Store::in_memory();
    assert!(matches!(
        store.append_log(7, "INFO", "orphan"),
        Err(EngineError::UnknownTaskId(7))
    ));
}

#[test]
fn logs_interleaved_with_state_changes_keep_order() {
    let store = Store::in_memory();
    let id = store.insert_task("noop", "default", json!({})).unwrap();
    store.claim_next("default", Uuid::new_v4()).unwrap();

    store.append_log(id, "INFO", "first").unwrap();
    store.append_log(id, "WARN", "second").unwrap();
    store.mark_done(id, None).unwrap();

    let logs = store.read_logs(id).unwrap();
    let messages: Vec<&str> = logs.iter().map(|l| l.message.as_str()).collect();
    assert_eq!(messages, vec!["first", "second"]);
    assert_eq!(logs[0].seq, 1);
    assert_eq!(logs[1].seq, 2);
}
