//! Append-only mutation journal backing the durable store.
//!
//! Every task and log mutation is serialized as one JSON line and flushed
//! before the store acknowledges it, so the on-disk order matches the
//! observed order. Reopening a journal replays the lines; a torn final
//! line (crash mid-write) is tolerated and discarded.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::store::task::{LogEntry, TaskRecord, TaskState};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub(crate) enum JournalOp {
    Insert {
        record: TaskRecord,
    },
    Claim {
        id: u64,
        worker: Uuid,
        started_at: DateTime<Utc>,
    },
    Aborting {
        id: u64,
    },
    AbortRequested {
        id: u64,
    },
    Finish {
        id: u64,
        state: TaskState,
        finished_at: DateTime<Utc>,
        output: Option<Value>,
        traceback: Option<String>,
    },
    Log {
        entry: LogEntry,
    },
}

pub(crate) struct Journal {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl Journal {
    /// Open the journal for appending, creating it if absent.
    pub(crate) fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    /// Append one operation and flush it to the OS before returning.
    pub(crate) fn append(&mut self, op: &JournalOp) -> Result<()> {
        let line = serde_json::to_string(op)?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal").field("path", &self.path).finish()
    }
}

/// Read all replayable operations from a journal file.
///
/// Parsing stops at the first malformed line: anything past it is the
/// remnant of a torn write and cannot be trusted.
pub(crate) fn replay(path: &Path) -> Result<Vec<JournalOp>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let reader = BufReader::new(File::open(path)?);
    let mut ops = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<JournalOp>(&line) {
            Ok(op) => ops.push(op),
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    line = lineno + 1,
                    %error,
                    "discarding journal tail after malformed line"
                );
                break;
            }
        }
    }
    Ok(ops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn append_then_replay_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.journal");

        let record = TaskRecord::new(1, "hello".to_string(), "default".to_string(), json!({}));
        {
            let mut journal = Journal::open(&path).unwrap();
            journal
                .append(&JournalOp::Insert {
                    record: record.clone(),
                })
                .unwrap();
            journal
                .append(&JournalOp::Finish {
                    id: 1,
                    state: TaskState::Done,
                    finished_at: Utc::now(),
                    output: Some(json!(42)),
                    traceback: None,
                })
                .unwrap();
        }

        let ops = replay(&path).unwrap();
        assert_eq!(ops.len(), 2);
        assert!(matches!(&ops[0], JournalOp::Insert { record } if record.id == 1));
        assert!(
            matches!(&ops[1], JournalOp::Finish { state: TaskState::Done, output: Some(v), .. } if *v == json!(42))
        );
    }

    #[test]
    fn replay_discards_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.journal");

        let record = TaskRecord::new(1, "hello".to_string(), "default".to_string(), json!({}));
        {
            let mut journal = Journal::open(&path).unwrap();
            journal.append(&JournalOp::Insert { record }).unwrap();
        }
        // Simulate a crash mid-append.
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(b"{\"op\":\"finish\",\"id\":1,\"sta").unwrap();
        }

        let ops = replay(&path).unwrap();
        assert_eq!(ops.len(), 1);
    }

    #[test]
    fn replay_of_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ops = replay(&dir.path().join("absent.journal")).unwrap();
        assert!(ops.is_empty());
    }
}
