use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use shared::utils::{read_json, write_json_atomic};

use crate::task::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedTask {
    pub task: TaskId,
    pub error: String,
}

/// Persistent progress of a collection run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub completed: BTreeSet<TaskId>,
    pub failed: Vec<FailedTask>,
    #[serde(default)]
    pub date_range: Option<DateRange>,
    #[serde(default)]
    pub entities: Vec<String>,
}

impl Checkpoint {
    /// The checkpoint at `path`, empty when there is none yet.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        Ok(read_json(path)?.unwrap_or_default())
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        write_json_atomic(path, self)
    }

    pub fn complete(&mut self, task: TaskId) {
        self.failed.retain(|failed| failed.task != task);
        self.completed.insert(task);
    }

    pub fn fail(&mut self, task: TaskId, error: String) {
        self.failed.retain(|failed| failed.task != task);
        self.failed.push(FailedTask { task, error });
    }
}

struct Buffer {
    checkpoint: Checkpoint,
    unflushed: usize,
}

/// Checkpoint shared by the workers of one run, written every
/// `flush_every` updates and on [`CheckpointBuffer::flush`].
pub struct CheckpointBuffer {
    path: PathBuf,
    flush_every: usize,
    inner: Mutex<Buffer>,
}

impl CheckpointBuffer {
    pub fn new(
        path: PathBuf,
        checkpoint: Checkpoint,
        flush_every: usize,
    ) -> Self {
        Self {
            path,
            flush_every: flush_every.max(1),
            inner: Mutex::new(Buffer {
                checkpoint,
                unflushed: 0,
            }),
        }
    }

    pub fn complete(&self, task: TaskId) -> anyhow::Result<()> {
        self.update(|checkpoint| checkpoint.complete(task))
    }

    pub fn fail(&self, task: TaskId, error: String) -> anyhow::Result<()> {
        self.update(|checkpoint| checkpoint.fail(task, error))
    }

    fn update(&self, f: impl FnOnce(&mut Checkpoint)) -> anyhow::Result<()> {
        let mut buffer = self.lock()?;
        f(&mut buffer.checkpoint);
        buffer.unflushed += 1;

        if buffer.unflushed >= self.flush_every {
            self.write(&mut buffer)?;
        }
        Ok(())
    }

    pub fn flush(&self) -> anyhow::Result<()> {
        let mut buffer = self.lock()?;
        self.write(&mut buffer)
    }

    fn write(&self, buffer: &mut Buffer) -> anyhow::Result<()> {
        buffer.checkpoint.save(&self.path)?;
        tracing::debug!(
            updates = buffer.unflushed,
            completed = buffer.checkpoint.completed.len(),
            "Flushed checkpoint"
        );
        buffer.unflushed = 0;
        Ok(())
    }

    pub fn snapshot(&self) -> anyhow::Result<Checkpoint> {
        Ok(self.lock()?.checkpoint.clone())
    }

    fn lock(&self) -> anyhow::Result<std::sync::MutexGuard<'_, Buffer>> {
        self.inner
            .lock()
            .map_err(|_| anyhow::anyhow!("checkpoint buffer poisoned"))
    }
}
