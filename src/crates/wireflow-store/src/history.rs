//! Append-only JSONL journals for workflow evolution history
//!
//! Every workflow gets one history file at
//! `<root>/<workflowId>/history.jsonl`. Each line is a full evolution
//! record serialized as JSON; the file is append-only and flushed before an
//! append returns, so a reader never observes a partial batch.
//!
//! The record type is left generic: the engine owns the concrete evolution
//! record shape, this module owns the file discipline.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

const HISTORY_FILE: &str = "history.jsonl";

/// File-backed evolution journal rooted at a history directory.
#[derive(Debug, Clone)]
pub struct EvolutionHistory {
    root: PathBuf,
}

impl EvolutionHistory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of the journal for `workflow_id`.
    pub fn path_for(&self, workflow_id: &str) -> PathBuf {
        self.root.join(workflow_id).join(HISTORY_FILE)
    }

    /// Append one record to the workflow's journal, creating the directory
    /// on first use. The write is flushed before returning.
    pub async fn append<T: Serialize>(&self, workflow_id: &str, record: &T) -> Result<()> {
        let path = self.path_for(workflow_id);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }

        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        tracing::debug!(workflow_id, path = %path.display(), "appended evolution record");
        Ok(())
    }

    /// Read the workflow's journal. Absent file yields an empty list; blank
    /// lines are skipped; unparseable lines are skipped with a warning so a
    /// damaged tail never hides the rest of the journal.
    pub async fn read<T: DeserializeOwned>(&self, workflow_id: &str) -> Result<Vec<T>> {
        let path = self.path_for(workflow_id);
        if !path_exists(&path).await {
            return Ok(Vec::new());
        }

        let file = fs::File::open(&path).await?;
        let mut lines = BufReader::new(file).lines();
        let mut records = Vec::new();
        let mut line_no = 0usize;

        while let Some(line) = lines.next_line().await? {
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(&line) {
                Ok(record) => records.push(record),
                Err(error) => {
                    tracing::warn!(workflow_id, line_no, %error, "skipping malformed history line");
                }
            }
        }

        Ok(records)
    }
}

async fn path_exists(path: &Path) -> bool {
    fs::metadata(path).await.is_ok()
}
