//! Durability tests: a journaled store reopened after a crash or clean
//! shutdown must reconstruct its state and resolve in-flight tasks.

mod demo_tasks;

use std::io::Write;

use serde_json::json;
use uuid::Uuid;

use demo_tasks::demo_registry;
use drover::api::{schedule, Engine};
use drover::store::{Store, TaskState};
use drover::testutils::WorkerFleet;

#[test]
fn reopen_preserves_terminal_records_logs_and_queue() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.journal");

    let (done_id, queued_id) = {
        let store = Store::open(&path).unwrap();
        let done_id = store.insert_task("noop", "default", json!({"k": 1})).unwrap();
        let queued_id = store.insert_task("noop", "batch", json!({})).unwrap();

        store.claim_next("default", Uuid::new_v4()).unwrap();
        store.append_log(done_id, "INFO", "working").unwrap();
        store.append_log(done_id, "INFO", "finished").unwrap();
        store.mark_done(done_id, Some(json!({"out": 1}))).unwrap();
        (done_id, queued_id)
    };

    let store = Store::open(&path).unwrap();

    let done = store.read(done_id).unwrap();
    assert_eq!(done.state, TaskState::Done);
    assert_eq!(done.output, Some(json!({"out": 1})));
    assert_eq!(done.input, json!({"k": 1}));
    let logs = store.read_logs(done_id).unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].message, "working");

    // The queued record survives and is still claimable.
    assert_eq!(store.read(queued_id).unwrap().state, TaskState::Queued);
    assert!(store.claim_next("batch", Uuid::new_v4()).unwrap().is_some());

    // Ids keep counting past the replayed maximum.
    let next = store.insert_task("noop", "default", json!({})).unwrap();
    assert!(next > queued_id);
}

#[test]
fn reopen_resolves_in_flight_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.journal");

    let (running_id, aborting_id) = {
        let store = Store::open(&path).unwrap();
        let running_id = store.insert_task("noop", "default", json!({})).unwrap();
        let aborting_id = store.insert_task("noop", "default", json!({})).unwrap();
        let worker = Uuid::new_v4();
        store.claim_next("default", worker).unwrap();
        store.claim_next("default", worker).unwrap();
        store.request_abort(aborting_id).unwrap();
        store.mark_aborting(aborting_id).unwrap();
        (running_id, aborting_id)
    };

    // Simulates a whole-process crash: nothing finalized the records.
    let store = Store::open(&path).unwrap();

    let running = store.read(running_id).unwrap();
    assert_eq!(running.state, TaskState::Failed);
    assert!(running.traceback.unwrap().contains("worker lost"));

    let aborting = store.read(aborting_id).unwrap();
    assert_eq!(aborting.state, TaskState::Aborted);
}

#[test]
fn reopen_survives_torn_tail() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.journal");

    let id = {
        let store = Store::open(&path).unwrap();
        store.insert_task("noop", "default", json!({})).unwrap()
    };
    {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap();
        file.write_all(b"{\"op\":\"log\",\"entry\":{\"task_i").unwrap();
    }

    let store = Store::open(&path).unwrap();
    assert_eq!(store.read(id).unwrap().state, TaskState::Queued);
    // The store keeps accepting writes after discarding the torn tail.
    store.append_log(id, "INFO", "still alive").unwrap();
}

#[tokio::test]
async fn journaled_engine_run_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.journal");

    let task_id = {
        let engine = Engine::new(Store::open(&path).unwrap(), demo_registry());
        let fleet = WorkerFleet::up(&engine);
        let t = schedule(&engine, "helloworld", json!({})).unwrap();
        t.join(None).await.unwrap();
        fleet.down().await;
        t.id()
    };

    let store = Store::open(&path).unwrap();
    let record = store.read(task_id).unwrap();
    assert_eq!(record.state, TaskState::Done);
    let logs = store.read_logs(task_id).unwrap();
    assert!(logs[0].message.contains("Hello world from Babar"));
}
