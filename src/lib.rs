pub mod api;
pub mod capture;
pub mod config;
pub mod error;
pub mod registry;
pub mod schema;
pub mod store;
pub mod testutils;
pub mod worker;

pub use api::{schedule, Engine, TaskHandle};
pub use error::{EngineError, Result, TaskFailure};
pub use registry::{Registry, TaskDefinition};
pub use store::{Store, TaskState};
pub use worker::{TaskContext, WorkerPool};
