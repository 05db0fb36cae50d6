//! Live task state.
//!
//! The registry maps task ids to handles and tracks which single task is
//! active. A handle owns the task's current [`TaskSnapshot`] behind a
//! short-hold lock, plus the per-task turn gate that serializes chat
//! pipelines (two turns on one task never interleave; turns on different
//! tasks run concurrently).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use melty_types::conversation::now_millis;
use melty_types::ids::TaskId;
use melty_types::task::{TaskPhase, TaskPreview, TaskSnapshot};

use crate::git::GitError;
use crate::llm::LlmError;
use crate::store::StoreError;

/// Errors from task operations.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("unknown task: {0}")]
    UnknownTask(TaskId),
    #[error("task {0} is not active")]
    NotActive(TaskId),
    #[error("task {0} is active; deactivate it before deleting")]
    DeleteWhileActive(TaskId),
    #[error("path is outside the workspace: {0}")]
    OutsideWorkspace(String),
    #[error("no repository found")]
    NoRepository,
    #[error(transparent)]
    Provider(#[from] LlmError),
    #[error(transparent)]
    Git(#[from] GitError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0}")]
    Internal(String),
}

/// One live task.
pub struct TaskHandle {
    state: RwLock<TaskSnapshot>,
    chat_gate: tokio::sync::Mutex<()>,
}

impl TaskHandle {
    pub(crate) fn new(snapshot: TaskSnapshot) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(snapshot),
            chat_gate: tokio::sync::Mutex::new(()),
        })
    }

    pub fn id(&self) -> TaskId {
        self.state.read().id
    }

    pub fn phase(&self) -> TaskPhase {
        self.state.read().phase
    }

    /// Copy of the full task state.
    pub fn snapshot(&self) -> TaskSnapshot {
        self.state.read().clone()
    }

    /// Listing shape, without cloning the whole conversation.
    pub fn preview(&self) -> TaskPreview {
        let state = self.state.read();
        TaskPreview {
            id: state.id,
            name: state.name.clone(),
            mode: state.mode,
            updated_at: state.updated_at,
            preview: state.conversation.preview_text().map(str::to_string),
        }
    }

    /// Move to a lifecycle phase. Does not touch `updated_at`; that tracks
    /// content changes only.
    pub(crate) fn set_phase(&self, phase: TaskPhase) {
        self.state.write().phase = phase;
    }

    /// Apply a content mutation, bump `updated_at`, return the new snapshot.
    pub(crate) fn mutate(&self, f: impl FnOnce(&mut TaskSnapshot)) -> TaskSnapshot {
        let mut state = self.state.write();
        f(&mut state);
        state.updated_at = now_millis();
        state.clone()
    }

    /// Take the per-task turn gate. Held across a whole chat pipeline.
    pub(crate) async fn begin_turn(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.chat_gate.lock().await
    }
}

/// All known tasks plus the at-most-one active id.
pub(crate) struct TaskRegistry {
    tasks: RwLock<HashMap<TaskId, Arc<TaskHandle>>>,
    active: RwLock<Option<TaskId>>,
}

impl TaskRegistry {
    pub(crate) fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            active: RwLock::new(None),
        }
    }

    pub(crate) fn insert(&self, handle: Arc<TaskHandle>) {
        self.tasks.write().insert(handle.id(), handle);
    }

    pub(crate) fn get(&self, id: TaskId) -> Result<Arc<TaskHandle>, TaskError> {
        self.tasks
            .read()
            .get(&id)
            .cloned()
            .ok_or(TaskError::UnknownTask(id))
    }

    pub(crate) fn remove(&self, id: TaskId) -> Option<Arc<TaskHandle>> {
        self.tasks.write().remove(&id)
    }

    pub(crate) fn active_id(&self) -> Option<TaskId> {
        *self.active.read()
    }

    pub(crate) fn set_active(&self, id: Option<TaskId>) {
        *self.active.write() = id;
    }

    pub(crate) fn active_handle(&self) -> Option<Arc<TaskHandle>> {
        let id = self.active_id()?;
        self.tasks.read().get(&id).cloned()
    }

    /// Previews for every known task, most recently updated first.
    pub(crate) fn previews(&self) -> Vec<TaskPreview> {
        let mut previews: Vec<TaskPreview> = self
            .tasks
            .read()
            .values()
            .map(|handle| handle.preview())
            .collect();
        previews.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        previews
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use melty_types::conversation::Conversation;
    use melty_types::task::TaskMode;

    fn handle(name: &str, updated_at: u64) -> Arc<TaskHandle> {
        TaskHandle::new(TaskSnapshot {
            id: TaskId::new(),
            name: name.to_string(),
            mode: TaskMode::Vanilla,
            phase: TaskPhase::Dehydrated,
            conversation: Conversation::new(),
            melty_files: Vec::new(),
            branch: None,
            created_at: updated_at,
            updated_at,
        })
    }

    #[test]
    fn test_registry_lookup() {
        let registry = TaskRegistry::new();
        let h = handle("one", 1);
        let id = h.id();
        registry.insert(h);

        assert_eq!(registry.get(id).unwrap().id(), id);
        assert!(matches!(
            registry.get(TaskId::new()),
            Err(TaskError::UnknownTask(_))
        ));
    }

    #[test]
    fn test_previews_most_recent_first() {
        let registry = TaskRegistry::new();
        registry.insert(handle("old", 10));
        registry.insert(handle("new", 20));

        let previews = registry.previews();
        assert_eq!(previews.len(), 2);
        assert_eq!(previews[0].name, "new");
        assert_eq!(previews[1].name, "old");
    }

    #[test]
    fn test_mutate_bumps_updated_at() {
        let h = handle("t", 0);
        let snap = h.mutate(|s| s.conversation.add_human("hi"));
        assert!(snap.updated_at > 0);
        assert_eq!(snap.conversation.len(), 1);
        // The handle kept the change.
        assert_eq!(h.snapshot().conversation.preview_text(), Some("hi"));
    }

    #[test]
    fn test_set_phase_leaves_updated_at() {
        let h = handle("t", 42);
        h.set_phase(TaskPhase::Active);
        let snap = h.snapshot();
        assert_eq!(snap.phase, TaskPhase::Active);
        assert_eq!(snap.updated_at, 42);
    }

    #[test]
    fn test_active_tracking() {
        let registry = TaskRegistry::new();
        let h = handle("a", 1);
        let id = h.id();
        registry.insert(h);

        assert!(registry.active_handle().is_none());
        registry.set_active(Some(id));
        assert_eq!(registry.active_id(), Some(id));
        assert_eq!(registry.active_handle().unwrap().id(), id);
        registry.set_active(None);
        assert!(registry.active_handle().is_none());
    }

    #[tokio::test]
    async fn test_turn_gate_is_exclusive() {
        let h = handle("gated", 1);
        let first = h.begin_turn().await;
        // A second lock attempt must not complete while the first is held.
        let second = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            h.begin_turn(),
        )
        .await;
        assert!(second.is_err());
        drop(first);
        let _now_free = h.begin_turn().await;
    }
}
