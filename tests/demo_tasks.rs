//! Demo task definitions shared by the integration tests, mirroring the
//! kinds of tasks a client process would register at startup.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use drover::api::{schedule, Engine};
use drover::error::TaskFailure;
use drover::registry::{Registry, TaskDefinition};
use drover::schema::{moment, number, string};
use drover::store::{Store, TaskState};

pub fn demo_engine() -> Engine {
    Engine::new(Store::in_memory(), demo_registry())
}

pub fn demo_registry() -> Arc<Registry> {
    let registry = Registry::builder()
        .task(TaskDefinition::new("helloworld", |task| async move {
            let _capture = task.capture_logs();
            tracing::info!("Hello world from Babar, at time {}", chrono::Utc::now());
            Ok(())
        }))
        .unwrap()
        .task(TaskDefinition::new("failing", |_task| async move {
            Err(TaskFailure::new("Oops"))
        }))
        .unwrap()
        .task(TaskDefinition::new("looping", |_task| async move {
            loop {
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        }))
        .unwrap()
        .task(TaskDefinition::new("panicking", |_task| async move {
            panic!("kaboom");
        }))
        .unwrap()
        .task(
            TaskDefinition::new("helloworld_2", |task| async move {
                let _capture = task.capture_logs();
                tracing::info!("Hello world from Celeste, at time {}", chrono::Utc::now());
                Ok(())
            })
            .with_domain("timeseries"),
        )
        .unwrap()
        .task(
            TaskDefinition::new("helloworld_with_inputs", |task| async move {
                let _capture = task.capture_logs();
                tracing::info!("Hello world from Babar, at time {}", chrono::Utc::now());
                tracing::info!("I got the following input dictionary : {}", task.input());
                // No output schema: the value is stored opaquely.
                task.save_output(json!(42))?;
                Ok(())
            })
            .with_domain("timeseries")
            .with_inputs([
                string("name").with_default("Celeste"),
                moment("birthdate").with_default("(date \"1920-5-20\")"),
            ]),
        )
        .unwrap()
        .task(
            TaskDefinition::new("also_with_outputs", |task| async move {
                let _capture = task.capture_logs();
                tracing::info!("Hello world from Babar, at time {}", chrono::Utc::now());
                tracing::info!("I got the following input dictionary : {}", task.input());

                // Run a task of our own and wait for it.
                let sub = schedule(
                    task.engine(),
                    "helloworld_with_inputs",
                    json!({"name": "John Doe"}),
                )?;
                let state = sub.join(None).await?;
                if state == TaskState::Failed {
                    tracing::info!("Oops. Task #{} failed.", sub.id());
                    return Ok(());
                }
                tracing::info!(
                    "Good job #{}. We got {:?} from you.",
                    sub.id(),
                    sub.output()?
                );

                task.save_output(json!({"computed": 42}))?;
                Ok(())
            })
            .with_domain("timeseries")
            .with_inputs([
                string("name").with_default("Celeste"),
                moment("birthdate").with_default("(date \"1920-5-20\")"),
            ])
            .with_outputs([number("computed")]),
        )
        .unwrap();
    Arc::new(registry.build())
}
