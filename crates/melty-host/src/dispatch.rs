//! Typed request dispatch.
//!
//! The single [`RequestHandler`] behind the responder. Every method the
//! bridge accepts is matched exhaustively; adding a method without a
//! handler arm is a compile error, not a runtime surprise.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use melty_kernel::{Engine, TaskError};
use melty_rpc::RequestHandler;
use melty_types::protocol::Request;

use crate::config::HostConfig;

pub struct HostHandler {
    engine: Arc<Engine>,
    assistant_description: String,
    theme: String,
}

impl HostHandler {
    pub fn new(engine: Arc<Engine>, config: &HostConfig) -> Self {
        Self {
            engine,
            assistant_description: config.assistant_description.clone(),
            theme: config.theme.clone(),
        }
    }
}

fn reply<T: Serialize>(value: T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|err| err.to_string())
}

fn finish<T: Serialize>(result: Result<T, TaskError>) -> Result<Value, String> {
    match result {
        Ok(value) => reply(value),
        Err(err) => Err(err.to_string()),
    }
}

#[async_trait]
impl RequestHandler for HostHandler {
    async fn handle(&self, request: Request) -> Result<Value, String> {
        match request {
            Request::CreateTask(p) => {
                finish(self.engine.create_task(&p.name, p.task_mode, p.files).await)
            }
            Request::DeleteTask(p) => finish(self.engine.delete_task(p.task_id).await),
            Request::ActivateTask(p) => finish(self.engine.activate_task(p.task_id).await),
            Request::DeactivateTask(p) => finish(self.engine.deactivate_task(p.task_id).await),
            Request::ListTaskPreviews(_) => reply(self.engine.list_task_previews()),
            Request::GetActiveTask(_) => reply(self.engine.get_active_task()),
            Request::ChatMessage(p) => finish(self.engine.chat_message(p.task_id, &p.text).await),
            Request::ListMeltyFiles(p) => finish(self.engine.list_melty_files(p.task_id)),
            Request::ListWorkspaceFiles(_) => finish(self.engine.list_workspace_files().await),
            Request::AddMeltyFile(p) => {
                finish(self.engine.add_melty_file(p.task_id, p.file_path).await)
            }
            Request::DropMeltyFile(p) => {
                finish(self.engine.drop_melty_file(p.task_id, &p.file_path).await)
            }
            Request::GetLatestCommit(_) => finish(self.engine.latest_commit().await),
            Request::UndoLatestCommit(p) => {
                finish(self.engine.undo_latest_commit(&p.commit_id).await)
            }
            Request::CreatePullRequest(_) => finish(self.engine.create_pull_request().await),
            Request::GetGitConfigErrors(_) => reply(self.engine.git_config_errors().await),
            Request::GetAssistantDescription(_) => reply(&self.assistant_description),
            Request::GetVSCodeTheme(_) => reply(&self.theme),
        }
    }
}
