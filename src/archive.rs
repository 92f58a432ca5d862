//! Finished tasks, kept in a bounded list and optionally mirrored to JSON.

use std::collections::VecDeque;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ArchiveError;
use crate::types::{LoopEvent, Task};

pub const ARCHIVE_FILE: &str = "tasks.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskOutcome {
    Completed,
    Cancelled,
    BudgetExhausted,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedTask {
    pub title: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: TaskOutcome,
    pub messages: Vec<LoopEvent>,
}

impl ArchivedTask {
    pub fn finish(task: &Task, outcome: TaskOutcome, messages: Vec<LoopEvent>) -> Self {
        Self {
            title: task.title.clone(),
            started_at: task.started_at,
            finished_at: Utc::now(),
            outcome,
            messages,
        }
    }
}

/// At most `capacity` archived tasks, oldest evicted first.
#[derive(Debug)]
pub struct TaskArchive {
    capacity: usize,
    entries: VecDeque<ArchivedTask>,
    path: Option<PathBuf>,
}

impl TaskArchive {
    /// Archive that lives only in memory.
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
            path: None,
        }
    }

    /// Load `path` if it exists; later inserts are written back to it.
    pub fn open(path: impl Into<PathBuf>, capacity: usize) -> Result<Self, ArchiveError> {
        let path = path.into();
        let mut archive = Self {
            path: Some(path.clone()),
            ..Self::in_memory(capacity)
        };
        for entry in load_entries(&path)? {
            archive.push(entry);
        }
        Ok(archive)
    }

    pub fn entries(&self) -> impl Iterator<Item = &ArchivedTask> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_vec(&self) -> Vec<ArchivedTask> {
        self.entries.iter().cloned().collect()
    }

    /// Insert a finished task and persist the archive when file-backed.
    pub async fn record(&mut self, entry: ArchivedTask) -> Result<(), ArchiveError> {
        self.push(entry);
        match &self.path {
            Some(path) => save_entries(path, &self.to_vec()).await,
            None => Ok(()),
        }
    }

    fn push(&mut self, entry: ArchivedTask) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }
}

fn load_entries(path: &Path) -> Result<Vec<ArchivedTask>, ArchiveError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = std::fs::File::open(path).map_err(|source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let reader = BufReader::new(file);
    Ok(serde_json::from_reader(reader)?)
}

async fn save_entries(path: &Path, entries: &[ArchivedTask]) -> Result<(), ArchiveError> {
    let io_err = |source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    };
    let json = serde_json::to_vec_pretty(entries)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    tokio::fs::write(path, json).await.map_err(io_err)
}
