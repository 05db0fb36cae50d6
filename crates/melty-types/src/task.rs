//! Task data model: modes, lifecycle phases, snapshots, previews.

use serde::{Deserialize, Serialize};

use crate::conversation::Conversation;
use crate::ids::TaskId;

/// Assistant behavior for a task.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskMode {
    /// Replies may carry changesets that get committed to the task branch.
    Coder,
    /// Plain conversation, no repository writes.
    Vanilla,
}

/// Where a task sits in its lifecycle.
///
/// ```text
/// Dehydrated ──▶ Hydrating ──▶ Active ──▶ Deactivating ──▶ Dehydrated
///      │
///      └──▶ Deleted (terminal, only from Dehydrated)
/// ```
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskPhase {
    /// Persisted form only; no live resources.
    Dehydrated,
    /// Being loaded and bound to its branch.
    Hydrating,
    /// Live: conversation loop and branch bound.
    Active,
    /// Being persisted and released.
    Deactivating,
    /// Gone. Terminal.
    Deleted,
}

/// An immutable copy of full task state, taken at a point in time.
///
/// Snapshots are what travels on the wire: every progress push and the
/// `getActiveTask` / `chatMessage` results carry one. They are plain values,
/// detached from the live task the moment they are taken. The same shape is
/// what the store persists as a task's dehydrated form.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    /// The task's id.
    pub id: TaskId,
    /// Human-given name.
    pub name: String,
    /// Assistant behavior.
    pub mode: TaskMode,
    /// Lifecycle phase at snapshot time.
    pub phase: TaskPhase,
    /// The transcript so far.
    pub conversation: Conversation,
    /// Workspace-relative paths the assistant is told to focus on.
    pub melty_files: Vec<String>,
    /// Branch bound at activation, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// When the task was created (Unix millis).
    pub created_at: u64,
    /// When the task last changed (Unix millis).
    pub updated_at: u64,
}

/// The listing shape for task pickers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPreview {
    /// The task's id.
    pub id: TaskId,
    /// Human-given name.
    pub name: String,
    /// Assistant behavior.
    pub mode: TaskMode,
    /// When the task last changed (Unix millis).
    pub updated_at: u64,
    /// Text of the latest turn, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

impl TaskSnapshot {
    /// Reduce to the listing shape.
    pub fn preview(&self) -> TaskPreview {
        TaskPreview {
            id: self.id,
            name: self.name.clone(),
            mode: self.mode,
            updated_at: self.updated_at,
            preview: self.conversation.preview_text().map(str::to_string),
        }
    }
}
