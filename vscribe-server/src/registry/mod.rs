//! Task registry: single-owner actor with durable snapshots
//!
//! One spawned loop exclusively owns the task map. Every mutation flows
//! through it as a message, so updates to the same task are serialized, the
//! snapshot file has a single writer, and no lock is ever held across IO.
//! Readers receive cloned snapshots.

mod store;

pub use store::{SnapshotStore, SNAPSHOT_FILE};

use crate::models::{Task, TaskSource, TaskStatus, TaskSummary};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};
use vscribe_common::{Error, Result};

type Mutator = Box<dyn FnOnce(&mut Task) + Send>;

enum Command {
    Create {
        task: Task,
        reply: oneshot::Sender<Result<Task>>,
    },
    Update {
        id: String,
        mutator: Mutator,
        reply: oneshot::Sender<Result<Task>>,
    },
    Get {
        id: String,
        reply: oneshot::Sender<Option<Task>>,
    },
    List {
        reply: oneshot::Sender<Vec<TaskSummary>>,
    },
    Delete {
        id: String,
        reply: oneshot::Sender<Result<Task>>,
    },
    CountActive {
        reply: oneshot::Sender<usize>,
    },
}

/// Cloneable handle to the registry actor
#[derive(Clone)]
pub struct RegistryHandle {
    tx: mpsc::Sender<Command>,
}

impl RegistryHandle {
    /// Load the snapshot, sweep stale in-flight tasks from a previous run,
    /// persist the swept state, and spawn the owner loop.
    ///
    /// The sweep happens before the actor accepts any command, so no worker
    /// can observe (or pick up) a stale `processing`/`pending` task.
    pub fn open(temp_dir: &Path) -> Result<Self> {
        let store = SnapshotStore::new(temp_dir);
        let mut tasks = store.load()?;

        let swept = recover_on_boot(&mut tasks);
        if swept > 0 {
            info!(count = swept, "Marked in-flight tasks from previous run as failed");
            store.save(&tasks)?;
        }

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(run_actor(store, tasks, rx));
        Ok(Self { tx })
    }

    /// Create a task for `source`, persist it, and return the snapshot.
    pub async fn create(&self, source: TaskSource, request_id: String) -> Result<Task> {
        let task = Task::new(source, request_id);
        let (reply, rx) = oneshot::channel();
        self.send(Command::Create { task, reply }).await?;
        rx.await.map_err(|_| registry_gone())?
    }

    /// Atomically apply `mutator` to the task, bump `updated_at`, persist,
    /// and return the updated snapshot. Progress is clamped monotonic here,
    /// regardless of what the mutator wrote.
    pub async fn update<F>(&self, id: &str, mutator: F) -> Result<Task>
    where
        F: FnOnce(&mut Task) + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Update {
            id: id.to_string(),
            mutator: Box::new(mutator),
            reply,
        })
        .await?;
        rx.await.map_err(|_| registry_gone())?
    }

    pub async fn get(&self, id: &str) -> Result<Option<Task>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Get {
            id: id.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| registry_gone())
    }

    /// Task summaries, newest first.
    pub async fn list(&self) -> Result<Vec<TaskSummary>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::List { reply }).await?;
        rx.await.map_err(|_| registry_gone())
    }

    /// Remove the record. File cleanup is the caller's responsibility.
    pub async fn delete(&self, id: &str) -> Result<Task> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Delete {
            id: id.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| registry_gone())?
    }

    /// Number of tasks counted against the backlog limit
    /// (`pending` + `processing`).
    pub async fn count_active(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::CountActive { reply }).await?;
        rx.await.map_err(|_| registry_gone())
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.tx.send(command).await.map_err(|_| registry_gone())
    }
}

fn registry_gone() -> Error {
    Error::Internal("task registry is not running".to_string())
}

/// Boot recovery: every task that was in flight when the process died is
/// rewritten to `failed` with kind `stale_on_restart`.
fn recover_on_boot(tasks: &mut HashMap<String, Task>) -> usize {
    let mut swept = 0;
    for task in tasks.values_mut() {
        if matches!(
            task.status,
            TaskStatus::Processing | TaskStatus::Pending | TaskStatus::Uploaded
        ) {
            warn!(task_id = %task.id, status = ?task.status, "Sweeping stale task from previous run");
            task.fail(&Error::StaleOnRestart);
            task.updated_at = chrono::Utc::now();
            swept += 1;
        }
        // A stuck bilingual pass cannot survive a restart either.
        if task.translation_status == Some(crate::models::TranslationStatus::Processing) {
            task.translation_status = Some(crate::models::TranslationStatus::Failed);
        }
    }
    swept
}

async fn run_actor(
    store: SnapshotStore,
    mut tasks: HashMap<String, Task>,
    mut rx: mpsc::Receiver<Command>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Create { task, reply } => {
                let result = match tasks.entry(task.id.clone()) {
                    std::collections::hash_map::Entry::Occupied(_) => Err(Error::Internal(
                        format!("duplicate task id {}", task.id),
                    )),
                    std::collections::hash_map::Entry::Vacant(slot) => {
                        let snapshot = slot.insert(task).clone();
                        persist(&store, &tasks).map(|_| snapshot)
                    }
                };
                let _ = reply.send(result);
            }
            Command::Update { id, mutator, reply } => {
                let result = match tasks.get_mut(&id) {
                    None => Err(Error::NotFound(format!("task {}", id))),
                    Some(task) => {
                        let progress_before = task.progress;
                        mutator(task);
                        // Progress is monotonic no matter what the mutator did.
                        task.progress = task.progress.max(progress_before).min(100);
                        task.updated_at = chrono::Utc::now();
                        let snapshot = task.clone();
                        persist(&store, &tasks).map(|_| snapshot)
                    }
                };
                let _ = reply.send(result);
            }
            Command::Get { id, reply } => {
                let _ = reply.send(tasks.get(&id).cloned());
            }
            Command::List { reply } => {
                let mut summaries: Vec<TaskSummary> =
                    tasks.values().map(|t| t.summary()).collect();
                summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
                let _ = reply.send(summaries);
            }
            Command::Delete { id, reply } => {
                let result = match tasks.remove(&id) {
                    None => Err(Error::NotFound(format!("task {}", id))),
                    Some(removed) => persist(&store, &tasks).map(|_| removed),
                };
                let _ = reply.send(result);
            }
            Command::CountActive { reply } => {
                let count = tasks.values().filter(|t| t.status.is_active()).count();
                let _ = reply.send(count);
            }
        }
    }
}

fn persist(store: &SnapshotStore, tasks: &HashMap<String, Task>) -> Result<()> {
    store.save(tasks).map_err(|e| {
        error!(error = %e, "Failed to persist task history");
        e
    })
}
