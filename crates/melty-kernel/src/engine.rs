//! The task engine.
//!
//! [`Engine`] composes the registry, store, workspace, repository handle,
//! model provider, and event sink into one facade the host dispatches into.
//! All collaborators are injected at construction; nothing here reaches for
//! globals.
//!
//! The chat pipeline lives in [`crate::chat`]; this file covers lifecycle,
//! focus-file management, and repository passthroughs.

use std::sync::Arc;

use parking_lot::Mutex;

use melty_types::conversation::{now_millis, Conversation};
use melty_types::ids::TaskId;
use melty_types::task::{TaskMode, TaskPhase, TaskPreview, TaskSnapshot};

use crate::events::EventSink;
use crate::git::{Git, GitError};
use crate::llm::LlmProvider;
use crate::store::{StoreError, TaskStore};
use crate::tasks::{TaskError, TaskHandle, TaskRegistry};
use crate::workspace::Workspace;

/// Store handle shared with the blocking pool.
#[derive(Clone)]
pub(crate) struct SharedStore {
    inner: Arc<Mutex<TaskStore>>,
}

impl SharedStore {
    fn new(store: TaskStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    pub(crate) async fn run<T, F>(&self, op: F) -> Result<T, TaskError>
    where
        T: Send + 'static,
        F: FnOnce(&TaskStore) -> Result<T, StoreError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || op(&inner.lock()))
            .await
            .map_err(|err| TaskError::Internal(format!("store task failed: {err}")))?
            .map_err(TaskError::from)
    }
}

pub struct Engine {
    pub(crate) registry: TaskRegistry,
    pub(crate) store: SharedStore,
    pub(crate) workspace: Workspace,
    pub(crate) git: Option<Git>,
    pub(crate) provider: Arc<dyn LlmProvider>,
    pub(crate) sink: Arc<dyn EventSink>,
    branch_prefix: String,
    /// Serializes activate/deactivate/delete. The single-active check and the
    /// `set_active` that commits it are separated by await points, so without
    /// this gate two concurrent activations could both pass the check.
    lifecycle: tokio::sync::Mutex<()>,
}

impl Engine {
    /// Build an engine, loading every persisted task in dehydrated form.
    pub fn new(
        store: TaskStore,
        workspace: Workspace,
        git: Option<Git>,
        provider: Arc<dyn LlmProvider>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, TaskError> {
        let registry = TaskRegistry::new();
        for snapshot in store.load_all()? {
            registry.insert(TaskHandle::new(snapshot));
        }
        tracing::info!(tasks = registry.len(), "loaded task store");
        Ok(Self {
            registry,
            store: SharedStore::new(store),
            workspace,
            git,
            provider,
            sink,
            branch_prefix: "melty".to_string(),
            lifecycle: tokio::sync::Mutex::new(()),
        })
    }

    pub fn with_branch_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.branch_prefix = prefix.into();
        self
    }

    pub(crate) fn git(&self) -> Result<&Git, TaskError> {
        self.git.as_ref().ok_or(TaskError::NoRepository)
    }

    pub(crate) async fn persist(&self, handle: &TaskHandle) -> Result<(), TaskError> {
        let snapshot = handle.snapshot();
        self.store.run(move |store| store.save(&snapshot)).await
    }

    pub(crate) async fn push_previews(&self) {
        self.sink.previews_changed(self.registry.previews()).await;
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Create a task in dehydrated form.
    pub async fn create_task(
        &self,
        name: &str,
        mode: TaskMode,
        files: Vec<String>,
    ) -> Result<TaskId, TaskError> {
        let mut melty_files = Vec::new();
        for file in files {
            if !self.workspace.accepts(&file) {
                return Err(TaskError::OutsideWorkspace(file));
            }
            if !melty_files.contains(&file) {
                melty_files.push(file);
            }
        }

        let now = now_millis();
        let snapshot = TaskSnapshot {
            id: TaskId::new(),
            name: name.to_string(),
            mode,
            phase: TaskPhase::Dehydrated,
            conversation: Conversation::new(),
            melty_files,
            branch: None,
            created_at: now,
            updated_at: now,
        };
        let id = snapshot.id;

        let stored = snapshot.clone();
        self.store.run(move |store| store.save(&stored)).await?;
        self.registry.insert(TaskHandle::new(snapshot));
        tracing::info!(task = %id.short(), name, mode = %mode, "created task");
        self.push_previews().await;
        Ok(id)
    }

    /// Delete a dehydrated task for good.
    pub async fn delete_task(&self, id: TaskId) -> Result<bool, TaskError> {
        let _gate = self.lifecycle.lock().await;
        let handle = self.registry.get(id)?;
        if self.registry.active_id() == Some(id) || handle.phase() != TaskPhase::Dehydrated {
            return Err(TaskError::DeleteWhileActive(id));
        }

        self.store.run(move |store| store.delete(id)).await?;
        self.registry.remove(id);
        handle.set_phase(TaskPhase::Deleted);
        tracing::info!(task = %id.short(), "deleted task");
        self.push_previews().await;
        Ok(true)
    }

    /// Hydrate a task: bind its branch and make it the single active task.
    ///
    /// Activating the already-active task is a no-op. Activating a second
    /// task deactivates the current one first. A branch-binding failure is
    /// reported and leaves the task dehydrated.
    pub async fn activate_task(&self, id: TaskId) -> Result<bool, TaskError> {
        let _gate = self.lifecycle.lock().await;
        let handle = self.registry.get(id)?;
        if self.registry.active_id() == Some(id) && handle.phase() == TaskPhase::Active {
            return Ok(true);
        }
        if let Some(current) = self.registry.active_id() {
            if current != id {
                self.deactivate_locked(current).await?;
            }
        }

        handle.set_phase(TaskPhase::Hydrating);
        self.sink.task_updated(handle.snapshot()).await;

        let branch = match &self.git {
            Some(git) => {
                let name = format!("{}/{}", self.branch_prefix, id.short());
                match git.ensure_branch(name.clone()).await {
                    Ok(()) => Some(name),
                    Err(err) => {
                        handle.set_phase(TaskPhase::Dehydrated);
                        self.sink.task_updated(handle.snapshot()).await;
                        return Err(err.into());
                    }
                }
            }
            None => {
                tracing::debug!(task = %id.short(), "no repository; skipping branch binding");
                None
            }
        };

        let snapshot = handle.mutate(|state| {
            state.phase = TaskPhase::Active;
            state.branch = branch.clone();
        });
        self.registry.set_active(Some(id));
        tracing::info!(task = %id.short(), branch = ?branch, "task activated");
        self.sink.task_updated(snapshot).await;
        Ok(true)
    }

    /// Persist and release the active task.
    ///
    /// Returns false when the task is not the active one. A persistence
    /// failure leaves the task active rather than half torn down.
    pub async fn deactivate_task(&self, id: TaskId) -> Result<bool, TaskError> {
        let _gate = self.lifecycle.lock().await;
        self.deactivate_locked(id).await
    }

    async fn deactivate_locked(&self, id: TaskId) -> Result<bool, TaskError> {
        let handle = self.registry.get(id)?;
        if self.registry.active_id() != Some(id) {
            return Ok(false);
        }

        handle.set_phase(TaskPhase::Deactivating);
        self.sink.task_updated(handle.snapshot()).await;

        if let Err(err) = self.persist(&handle).await {
            handle.set_phase(TaskPhase::Active);
            self.sink.task_updated(handle.snapshot()).await;
            return Err(err);
        }

        handle.set_phase(TaskPhase::Dehydrated);
        self.registry.set_active(None);
        tracing::info!(task = %id.short(), "task deactivated");
        self.sink.task_updated(handle.snapshot()).await;
        self.push_previews().await;
        Ok(true)
    }

    pub fn get_active_task(&self) -> Option<TaskSnapshot> {
        self.registry.active_handle().map(|handle| handle.snapshot())
    }

    pub fn list_task_previews(&self) -> Vec<TaskPreview> {
        self.registry.previews()
    }

    // =========================================================================
    // Focus files
    // =========================================================================

    pub fn list_melty_files(&self, id: TaskId) -> Result<Vec<String>, TaskError> {
        Ok(self.registry.get(id)?.snapshot().melty_files)
    }

    /// Add a workspace-relative path to the task's focus list. Adding a
    /// path already present is a no-op.
    pub async fn add_melty_file(&self, id: TaskId, path: String) -> Result<Vec<String>, TaskError> {
        let handle = self.registry.get(id)?;
        if !self.workspace.accepts(&path) {
            return Err(TaskError::OutsideWorkspace(path));
        }
        if handle.snapshot().melty_files.contains(&path) {
            return Ok(handle.snapshot().melty_files);
        }

        let snapshot = handle.mutate(|state| {
            if !state.melty_files.contains(&path) {
                state.melty_files.push(path.clone());
            }
        });
        self.persist(&handle).await?;
        self.sink.task_updated(snapshot.clone()).await;
        Ok(snapshot.melty_files)
    }

    /// Remove a path from the task's focus list. Dropping an absent path is
    /// a no-op.
    pub async fn drop_melty_file(&self, id: TaskId, path: &str) -> Result<Vec<String>, TaskError> {
        let handle = self.registry.get(id)?;
        if !handle.snapshot().melty_files.iter().any(|p| p == path) {
            return Ok(handle.snapshot().melty_files);
        }

        let snapshot = handle.mutate(|state| {
            state.melty_files.retain(|p| p != path);
        });
        self.persist(&handle).await?;
        self.sink.task_updated(snapshot.clone()).await;
        Ok(snapshot.melty_files)
    }

    pub async fn list_workspace_files(&self) -> Result<Vec<String>, TaskError> {
        self.workspace
            .list_files()
            .await
            .map_err(|err| TaskError::Internal(format!("workspace walk failed: {err}")))
    }

    // =========================================================================
    // Repository passthroughs
    // =========================================================================

    pub async fn latest_commit(&self) -> Result<Option<String>, TaskError> {
        Ok(self.git()?.latest_commit().await?)
    }

    /// Undo the head commit, but only when `commit_id` still names it.
    pub async fn undo_latest_commit(&self, commit_id: &str) -> Result<bool, TaskError> {
        match self.git()?.undo_last_commit(commit_id.to_string()).await {
            Ok(()) => Ok(true),
            Err(err @ GitError::StaleUndo { .. }) => {
                tracing::warn!(commit = commit_id, "refused stale undo");
                Err(err.into())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn create_pull_request(&self) -> Result<String, TaskError> {
        Ok(self.git()?.create_pull_request().await?)
    }

    /// Config problems as user-facing strings; a missing repository is
    /// itself a problem, not an error.
    pub async fn git_config_errors(&self) -> Vec<String> {
        match &self.git {
            Some(git) => git.config_errors().await,
            None => vec!["no repository found".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::recording::RecordingSink;
    use crate::events::NullSink;
    use crate::llm::ScriptedProvider;
    use git2::Repository;

    fn engine_at(
        dir: &std::path::Path,
        git: Option<Git>,
        sink: Arc<dyn EventSink>,
    ) -> Engine {
        Engine::new(
            TaskStore::in_memory().unwrap(),
            Workspace::new(dir),
            git,
            Arc::new(ScriptedProvider::echoing()),
            sink,
        )
        .unwrap()
    }

    fn init_repo(dir: &std::path::Path, with_commit: bool) -> Git {
        let repo = Repository::init(dir).unwrap();
        {
            let mut config = repo.config().unwrap();
            config.set_str("user.name", "Test User").unwrap();
            config.set_str("user.email", "test@example.com").unwrap();
        }
        drop(repo);
        let git = Git::open(dir, "origin").unwrap();
        if with_commit {
            std::fs::write(dir.join("README.md"), "seed\n").unwrap();
            let repo = crate::git::GitRepo::open(dir, "origin").unwrap();
            repo.commit_local_changes("init").unwrap();
        }
        git
    }

    #[tokio::test]
    async fn test_create_lists_and_pushes_previews() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::new());
        let engine = engine_at(dir.path(), None, sink.clone());

        let id = engine
            .create_task("refactor", TaskMode::Vanilla, vec!["src/lib.rs".into()])
            .await
            .unwrap();

        let previews = engine.list_task_previews();
        assert_eq!(previews.len(), 1);
        assert_eq!(previews[0].id, id);
        assert_eq!(previews[0].name, "refactor");
        assert_eq!(sink.preview_updates(), 1);
    }

    #[tokio::test]
    async fn test_create_rejects_escaping_file() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_at(dir.path(), None, Arc::new(NullSink));
        let err = engine
            .create_task("bad", TaskMode::Coder, vec!["../etc/passwd".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::OutsideWorkspace(_)));
        assert!(engine.list_task_previews().is_empty());
    }

    #[tokio::test]
    async fn test_activate_without_repo_skips_branch() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_at(dir.path(), None, Arc::new(NullSink));
        let id = engine
            .create_task("chat", TaskMode::Vanilla, vec![])
            .await
            .unwrap();

        assert!(engine.activate_task(id).await.unwrap());
        let active = engine.get_active_task().unwrap();
        assert_eq!(active.id, id);
        assert_eq!(active.phase, TaskPhase::Active);
        assert_eq!(active.branch, None);
    }

    #[tokio::test]
    async fn test_activate_binds_branch_from_task_id() {
        let dir = tempfile::tempdir().unwrap();
        let git = init_repo(dir.path(), true);
        let engine = engine_at(dir.path(), Some(git.clone()), Arc::new(NullSink));
        let id = engine
            .create_task("feature", TaskMode::Coder, vec![])
            .await
            .unwrap();

        assert!(engine.activate_task(id).await.unwrap());
        let expected = format!("melty/{}", id.short());
        assert_eq!(
            engine.get_active_task().unwrap().branch.as_deref(),
            Some(expected.as_str())
        );
        assert_eq!(git.current_branch().await.unwrap(), Some(expected));
    }

    #[tokio::test]
    async fn test_activation_failure_leaves_task_dehydrated() {
        let dir = tempfile::tempdir().unwrap();
        // Unborn HEAD: branch binding cannot succeed.
        let git = init_repo(dir.path(), false);
        let engine = engine_at(dir.path(), Some(git), Arc::new(NullSink));
        let id = engine
            .create_task("doomed", TaskMode::Coder, vec![])
            .await
            .unwrap();

        assert!(engine.activate_task(id).await.is_err());
        assert!(engine.get_active_task().is_none());
        let preview_phase = engine.registry.get(id).unwrap().phase();
        assert_eq!(preview_phase, TaskPhase::Dehydrated);
    }

    #[tokio::test]
    async fn test_second_activation_displaces_first() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_at(dir.path(), None, Arc::new(NullSink));
        let first = engine
            .create_task("one", TaskMode::Vanilla, vec![])
            .await
            .unwrap();
        let second = engine
            .create_task("two", TaskMode::Vanilla, vec![])
            .await
            .unwrap();

        engine.activate_task(first).await.unwrap();
        engine.activate_task(second).await.unwrap();

        assert_eq!(engine.get_active_task().unwrap().id, second);
        assert_eq!(
            engine.registry.get(first).unwrap().phase(),
            TaskPhase::Dehydrated
        );
    }

    #[tokio::test]
    async fn test_concurrent_activations_keep_one_active() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(engine_at(dir.path(), None, Arc::new(NullSink)));
        let a = engine
            .create_task("one", TaskMode::Vanilla, vec![])
            .await
            .unwrap();
        let b = engine
            .create_task("two", TaskMode::Vanilla, vec![])
            .await
            .unwrap();

        let ta = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.activate_task(a).await }
        });
        let tb = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.activate_task(b).await }
        });
        ta.await.unwrap().unwrap();
        tb.await.unwrap().unwrap();

        // Exactly one task holds the Active phase, and it is the active id.
        let active = engine.get_active_task().unwrap();
        let active_phases = [a, b]
            .iter()
            .filter(|id| engine.registry.get(**id).unwrap().phase() == TaskPhase::Active)
            .count();
        assert_eq!(active_phases, 1);
        assert_eq!(engine.registry.get(active.id).unwrap().phase(), TaskPhase::Active);

        // The displaced task is dehydrated, so it can still be deleted.
        let loser = if active.id == a { b } else { a };
        assert_eq!(
            engine.registry.get(loser).unwrap().phase(),
            TaskPhase::Dehydrated
        );
        assert!(engine.delete_task(loser).await.unwrap());
    }

    #[tokio::test]
    async fn test_activate_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::new());
        let engine = engine_at(dir.path(), None, sink.clone());
        let id = engine
            .create_task("same", TaskMode::Vanilla, vec![])
            .await
            .unwrap();

        engine.activate_task(id).await.unwrap();
        let pushes_after_first = sink.events().len();
        engine.activate_task(id).await.unwrap();
        assert_eq!(sink.events().len(), pushes_after_first);
    }

    #[tokio::test]
    async fn test_deactivate_non_active_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_at(dir.path(), None, Arc::new(NullSink));
        let id = engine
            .create_task("idle", TaskMode::Vanilla, vec![])
            .await
            .unwrap();
        assert!(!engine.deactivate_task(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_active_task_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_at(dir.path(), None, Arc::new(NullSink));
        let id = engine
            .create_task("busy", TaskMode::Vanilla, vec![])
            .await
            .unwrap();
        engine.activate_task(id).await.unwrap();

        let err = engine.delete_task(id).await.unwrap_err();
        assert!(matches!(err, TaskError::DeleteWhileActive(_)));
        assert_eq!(engine.list_task_previews().len(), 1);
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let git = init_repo(dir.path(), true);
        let engine = engine_at(dir.path(), Some(git), Arc::new(NullSink));

        let id = engine
            .create_task("T1", TaskMode::Coder, vec![])
            .await
            .unwrap();
        assert!(engine.activate_task(id).await.unwrap());
        assert!(engine.get_active_task().unwrap().branch.is_some());
        assert!(engine.deactivate_task(id).await.unwrap());
        assert!(engine.get_active_task().is_none());
        assert!(engine.delete_task(id).await.unwrap());
        assert!(engine.list_task_previews().is_empty());
        assert!(matches!(
            engine.delete_task(id).await,
            Err(TaskError::UnknownTask(_))
        ));
    }

    #[tokio::test]
    async fn test_melty_file_add_drop() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::new());
        let engine = engine_at(dir.path(), None, sink.clone());
        let id = engine
            .create_task("files", TaskMode::Coder, vec!["a.rs".into()])
            .await
            .unwrap();

        let files = engine.add_melty_file(id, "b.rs".into()).await.unwrap();
        assert_eq!(files, vec!["a.rs", "b.rs"]);

        // Duplicate add is a no-op and pushes nothing new.
        let before = sink.events().len();
        let files = engine.add_melty_file(id, "b.rs".into()).await.unwrap();
        assert_eq!(files, vec!["a.rs", "b.rs"]);
        assert_eq!(sink.events().len(), before);

        assert!(matches!(
            engine.add_melty_file(id, "/abs/path".into()).await,
            Err(TaskError::OutsideWorkspace(_))
        ));

        let files = engine.drop_melty_file(id, "a.rs").await.unwrap();
        assert_eq!(files, vec!["b.rs"]);
        // Dropping an absent path changes nothing.
        let files = engine.drop_melty_file(id, "zzz.rs").await.unwrap();
        assert_eq!(files, vec!["b.rs"]);
    }

    #[tokio::test]
    async fn test_git_methods_without_repo() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_at(dir.path(), None, Arc::new(NullSink));

        let err = engine.latest_commit().await.unwrap_err();
        assert_eq!(err.to_string(), "no repository found");
        assert_eq!(
            engine.git_config_errors().await,
            vec!["no repository found".to_string()]
        );
    }

    #[tokio::test]
    async fn test_undo_passthrough_stale_refusal() {
        let dir = tempfile::tempdir().unwrap();
        let git = init_repo(dir.path(), true);
        let engine = engine_at(dir.path(), Some(git.clone()), Arc::new(NullSink));

        std::fs::write(dir.path().join("x.txt"), "x").unwrap();
        git.commit_local_changes("second".into()).await.unwrap();
        let head = git.latest_commit().await.unwrap().unwrap();

        let stale = "0123456789012345678901234567890123456789";
        assert!(engine.undo_latest_commit(stale).await.is_err());
        assert_eq!(git.latest_commit().await.unwrap().unwrap(), head);
        assert!(engine.undo_latest_commit(&head).await.unwrap());
    }
}
