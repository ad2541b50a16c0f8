use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Queued,
    Running,
    Done,
    Failed,
    Aborting,
    Aborted,
}

impl TaskState {
    /// Terminal states never transition further.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Done | TaskState::Failed | TaskState::Aborted)
    }

    /// Valid transitions of the task state machine. Everything else is a
    /// stale write and gets ignored by the store.
    pub(crate) fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (*self, next),
            (Queued, Running)
                | (Queued, Aborted)
                | (Running, Done)
                | (Running, Failed)
                | (Running, Aborting)
                | (Running, Aborted)
                | (Aborting, Aborted)
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Queued => write!(f, "queued"),
            TaskState::Running => write!(f, "running"),
            TaskState::Done => write!(f, "done"),
            TaskState::Failed => write!(f, "failed"),
            TaskState::Aborting => write!(f, "aborting"),
            TaskState::Aborted => write!(f, "aborted"),
        }
    }
}

/// A persisted task execution request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: u64,
    pub name: String,
    pub domain: String,
    pub input: Value,
    pub output: Option<Value>,
    pub state: TaskState,
    pub worker: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub traceback: Option<String>,
    pub abort_requested: bool,
}

impl TaskRecord {
    pub fn new(id: u64, name: String, domain: String, input: Value) -> Self {
        Self {
            id,
            name,
            domain,
            input,
            output: None,
            state: TaskState::Queued,
            worker: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            traceback: None,
            abort_requested: false,
        }
    }
}

/// A captured log line, totally ordered per task by `seq`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub task_id: u64,
    pub seq: u64,
    pub level: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Idle,
    Busy,
    Dead,
    Exited,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::Idle => write!(f, "idle"),
            WorkerStatus::Busy => write!(f, "busy"),
            WorkerStatus::Dead => write!(f, "dead"),
            WorkerStatus::Exited => write!(f, "exited"),
        }
    }
}

/// Liveness record for one worker loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub id: Uuid,
    pub domain: String,
    pub pid: u32,
    pub status: WorkerStatus,
    pub last_heartbeat: DateTime<Utc>,
}

impl WorkerRecord {
    pub fn new(domain: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            domain,
            pid: std::process::id(),
            status: WorkerStatus::Idle,
            last_heartbeat: Utc::now(),
        }
    }

    pub fn is_alive(&self, timeout: chrono::Duration) -> bool {
        !matches!(self.status, WorkerStatus::Dead | WorkerStatus::Exited)
            && Utc::now() - self.last_heartbeat < timeout
    }
}
