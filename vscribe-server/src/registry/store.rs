//! Durable JSON snapshot for the task registry
//!
//! The whole registry persists as one JSON file under the temp root
//! (`temp/.task_history.json`). Writes are atomic: serialize to a sibling
//! temp file, then rename over the target. Loads tolerate a missing file;
//! a corrupt file is logged and treated as empty rather than wedging boot.

use crate::models::Task;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use vscribe_common::{Error, Result};

/// File name of the snapshot inside the temp root
pub const SNAPSHOT_FILE: &str = ".task_history.json";

/// Registry snapshot persistence
#[derive(Debug)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    /// Store rooted at the configured temp directory.
    pub fn new(temp_dir: &Path) -> Self {
        Self {
            path: temp_dir.join(SNAPSHOT_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all persisted tasks, keyed by id.
    pub fn load(&self) -> Result<HashMap<String, Task>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }

        let content = std::fs::read_to_string(&self.path)?;
        match serde_json::from_str::<Vec<Task>>(&content) {
            Ok(tasks) => {
                info!(count = tasks.len(), path = %self.path.display(), "Task history loaded");
                Ok(tasks.into_iter().map(|t| (t.id.clone(), t)).collect())
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Task history is corrupt, starting with an empty registry"
                );
                Ok(HashMap::new())
            }
        }
    }

    /// Persist all tasks atomically (temp file + rename).
    pub fn save(&self, tasks: &HashMap<String, Task>) -> Result<()> {
        let mut ordered: Vec<&Task> = tasks.values().collect();
        // Stable on-disk order keeps diffs and reloads deterministic.
        ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let json = serde_json::to_string_pretty(&ordered)
            .map_err(|e| Error::Internal(format!("serialize task history: {}", e)))?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json.as_bytes())?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
