//! Process-wide task registry.
//!
//! Tasks are declared once at startup through [`RegistryBuilder`]; the
//! resulting [`Registry`] is immutable and shared behind an `Arc`, so
//! lookups need no synchronization.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::{EngineError, Result, TaskFailure};
use crate::schema::FieldSpec;
use crate::worker::sandbox::TaskContext;

pub type TaskFuture = Pin<Box<dyn Future<Output = std::result::Result<(), TaskFailure>> + Send>>;
pub type TaskFn = Arc<dyn Fn(TaskContext) -> TaskFuture + Send + Sync>;

/// A named, domain-scoped task with typed input/output schemas.
///
/// An absent output schema means the task's output is serialized opaquely,
/// without field-level checks.
#[derive(Clone)]
pub struct TaskDefinition {
    name: String,
    domain: String,
    inputs: Vec<FieldSpec>,
    outputs: Option<Vec<FieldSpec>>,
    func: TaskFn,
}

impl TaskDefinition {
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), TaskFailure>> + Send + 'static,
    {
        Self {
            name: name.into(),
            domain: "default".to_string(),
            inputs: Vec::new(),
            outputs: None,
            func: Arc::new(move |ctx| Box::pin(func(ctx))),
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    pub fn with_inputs(mut self, inputs: impl IntoIterator<Item = FieldSpec>) -> Self {
        self.inputs = inputs.into_iter().collect();
        self
    }

    pub fn with_outputs(mut self, outputs: impl IntoIterator<Item = FieldSpec>) -> Self {
        self.outputs = Some(outputs.into_iter().collect());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn inputs(&self) -> &[FieldSpec] {
        &self.inputs
    }

    pub fn outputs(&self) -> Option<&[FieldSpec]> {
        self.outputs.as_deref()
    }

    pub(crate) fn invoke(&self, ctx: TaskContext) -> TaskFuture {
        (self.func)(ctx)
    }
}

impl fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("name", &self.name)
            .field("domain", &self.domain)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

/// Immutable mapping from task name to definition.
#[derive(Debug, Default)]
pub struct Registry {
    tasks: HashMap<String, Arc<TaskDefinition>>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<TaskDefinition>> {
        self.tasks
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownTask(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tasks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    tasks: HashMap<String, Arc<TaskDefinition>>,
}

impl RegistryBuilder {
    /// Add a task definition. Fails with `DuplicateTask` if the name is
    /// already registered.
    pub fn task(mut self, def: TaskDefinition) -> Result<Self> {
        if self.tasks.contains_key(def.name()) {
            return Err(EngineError::DuplicateTask(def.name().to_string()));
        }
        self.tasks.insert(def.name().to_string(), Arc::new(def));
        Ok(self)
    }

    pub fn build(self) -> Registry {
        Registry { tasks: self.tasks }
    }
}
