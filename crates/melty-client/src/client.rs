//! Typed facade over the bridge, UI side.
//!
//! A [`MeltyClient`] owns the caller and a background pump that reads the
//! transport: result frames resolve their pending calls, pushes fan out to
//! broadcast subscribers. When the transport closes, the pump rejects
//! whatever was still pending and exits.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use melty_rpc::{CallError, Caller, Transport};
use melty_types::protocol::{
    ActivateTask, AddMeltyFile, ChatMessage, CreatePullRequest, CreateTask, DeactivateTask,
    DeleteTask, DropMeltyFile, Envelope, GetActiveTask, GetAssistantDescription,
    GetGitConfigErrors, GetLatestCommit, GetVSCodeTheme, ListMeltyFiles, ListTaskPreviews,
    ListWorkspaceFiles, Notification, UndoLatestCommit,
};
use melty_types::{TaskId, TaskMode, TaskPreview, TaskSnapshot};

/// Pushes buffered per subscriber before a slow reader starts lagging.
const PUSH_BUFFER: usize = 256;

/// Client handle for one bridge connection.
///
/// Calls go out through the caller; a spawned pump routes everything coming
/// back. Dropping the client aborts the pump.
pub struct MeltyClient {
    caller: Arc<Caller>,
    pushes: broadcast::Sender<Notification>,
    pump: JoinHandle<()>,
}

impl MeltyClient {
    /// Attach to a transport and start the read pump.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let caller = Caller::new(Arc::clone(&transport));
        let (pushes, _) = broadcast::channel(PUSH_BUFFER);
        let pump = tokio::spawn(pump(transport, Arc::clone(&caller), pushes.clone()));
        Self {
            caller,
            pushes,
            pump,
        }
    }

    /// Subscribe to host pushes. A receiver sees every push from the moment
    /// it subscribes; falling behind lags the receiver, never the pump.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.pushes.subscribe()
    }

    /// Calls still awaiting resolution.
    pub fn pending_count(&self) -> usize {
        self.caller.pending_count()
    }

    pub async fn create_task(
        &self,
        name: impl Into<String>,
        task_mode: TaskMode,
        files: Vec<String>,
    ) -> Result<TaskId, CallError> {
        self.caller
            .call(CreateTask {
                name: name.into(),
                task_mode,
                files,
            })
            .await
    }

    pub async fn delete_task(&self, task_id: TaskId) -> Result<bool, CallError> {
        self.caller.call(DeleteTask { task_id }).await
    }

    pub async fn activate_task(&self, task_id: TaskId) -> Result<bool, CallError> {
        self.caller.call(ActivateTask { task_id }).await
    }

    pub async fn deactivate_task(&self, task_id: TaskId) -> Result<bool, CallError> {
        self.caller.call(DeactivateTask { task_id }).await
    }

    pub async fn list_task_previews(&self) -> Result<Vec<TaskPreview>, CallError> {
        self.caller.call(ListTaskPreviews {}).await
    }

    pub async fn get_active_task(&self) -> Result<Option<TaskSnapshot>, CallError> {
        self.caller.call(GetActiveTask {}).await
    }

    pub async fn chat_message(
        &self,
        task_id: TaskId,
        text: impl Into<String>,
    ) -> Result<TaskSnapshot, CallError> {
        self.caller
            .call(ChatMessage {
                task_id,
                text: text.into(),
            })
            .await
    }

    pub async fn list_melty_files(&self, task_id: TaskId) -> Result<Vec<String>, CallError> {
        self.caller.call(ListMeltyFiles { task_id }).await
    }

    pub async fn list_workspace_files(&self) -> Result<Vec<String>, CallError> {
        self.caller.call(ListWorkspaceFiles {}).await
    }

    pub async fn add_melty_file(
        &self,
        task_id: TaskId,
        file_path: impl Into<String>,
    ) -> Result<Vec<String>, CallError> {
        self.caller
            .call(AddMeltyFile {
                task_id,
                file_path: file_path.into(),
            })
            .await
    }

    pub async fn drop_melty_file(
        &self,
        task_id: TaskId,
        file_path: impl Into<String>,
    ) -> Result<Vec<String>, CallError> {
        self.caller
            .call(DropMeltyFile {
                task_id,
                file_path: file_path.into(),
            })
            .await
    }

    pub async fn get_latest_commit(&self) -> Result<Option<String>, CallError> {
        self.caller.call(GetLatestCommit {}).await
    }

    pub async fn undo_latest_commit(
        &self,
        commit_id: impl Into<String>,
    ) -> Result<bool, CallError> {
        self.caller
            .call(UndoLatestCommit {
                commit_id: commit_id.into(),
            })
            .await
    }

    pub async fn create_pull_request(&self) -> Result<String, CallError> {
        self.caller.call(CreatePullRequest {}).await
    }

    pub async fn get_git_config_errors(&self) -> Result<Vec<String>, CallError> {
        self.caller.call(GetGitConfigErrors {}).await
    }

    pub async fn get_assistant_description(&self) -> Result<String, CallError> {
        self.caller.call(GetAssistantDescription {}).await
    }

    pub async fn get_vscode_theme(&self) -> Result<String, CallError> {
        self.caller.call(GetVSCodeTheme {}).await
    }
}

impl Drop for MeltyClient {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

async fn pump(
    transport: Arc<dyn Transport>,
    caller: Arc<Caller>,
    pushes: broadcast::Sender<Notification>,
) {
    loop {
        match transport.recv().await {
            Some(Envelope::Result(frame)) => caller.resolve(frame),
            Some(Envelope::Push(notification)) => {
                // send only fails when nobody is subscribed.
                let _ = pushes.send(notification);
            }
            Some(Envelope::Call(frame)) => {
                tracing::warn!(
                    method = %frame.method,
                    id = frame.id,
                    "unexpected call from host, dropping"
                );
            }
            None => {
                caller.fail_all("stream ended");
                break;
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
