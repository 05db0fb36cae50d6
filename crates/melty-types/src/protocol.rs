//! Wire protocol: envelopes, typed requests, push notifications.
//!
//! Three envelope shapes travel over the transport, discriminated by a
//! `type` field:
//!
//! ```text
//! call    {"type": "rpc",         "id": 7, "method": "createTask", "params": {...}}
//! result  {"type": "rpcResponse", "id": 7, "method": "createTask", "result": ...}
//!         {"type": "rpcResponse", "id": 7, "method": "createTask", "error": "..."}
//! push    {"type": "taskUpdate",  "task": {...}}
//! ```
//!
//! Method names map to strongly-typed request/reply pairs through [`RpcCall`];
//! the dispatch side decodes into the [`Request`] union and matches
//! exhaustively. Adding a method means adding a params struct, a line in
//! [`rpc_methods!`], and a match arm, all checked at compile time.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::TaskId;
use crate::task::{TaskMode, TaskPreview, TaskSnapshot};

/// `type` tag of a call envelope.
pub const CALL_TYPE: &str = "rpc";
/// `type` tag of a result envelope.
pub const RESULT_TYPE: &str = "rpcResponse";

/// Errors from encoding or decoding wire frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown method '{0}'")]
    UnknownMethod(String),
    #[error("bad params for '{method}': {source}")]
    BadParams {
        method: &'static str,
        source: serde_json::Error,
    },
    #[error("frame has no 'type' field")]
    MissingType,
    #[error("unrecognized push frame '{name}': {source}")]
    UnrecognizedPush {
        name: String,
        source: serde_json::Error,
    },
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

// =============================================================================
// Envelopes
// =============================================================================

/// A request traveling UI → host (or host → UI; the bridge is symmetric).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallFrame {
    /// Connection-local monotonic id, never reused.
    pub id: u64,
    /// Wire method name.
    pub method: String,
    /// Method params as sent.
    #[serde(default = "empty_params")]
    pub params: Value,
}

fn empty_params() -> Value {
    Value::Object(serde_json::Map::new())
}

impl CallFrame {
    /// Build a call frame from a typed request.
    pub fn typed<T: RpcCall>(id: u64, request: &T) -> Result<Self, ProtocolError> {
        Ok(Self {
            id,
            method: T::METHOD.to_string(),
            params: serde_json::to_value(request)?,
        })
    }
}

/// The resolution of exactly one call. Exactly one of `result` / `error`
/// is present.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResultFrame {
    /// Echo of the call's method, for logs.
    pub method: String,
    /// Id of the call this resolves.
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResultFrame {
    /// A successful resolution.
    pub fn ok(id: u64, method: impl Into<String>, result: Value) -> Self {
        Self {
            method: method.into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// A failed resolution.
    pub fn err(id: u64, method: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            id,
            result: None,
            error: Some(error.into()),
        }
    }

    /// Collapse into the call's outcome. A frame with neither field counts
    /// as a null success.
    pub fn into_outcome(self) -> Result<Value, String> {
        match self.error {
            Some(message) => Err(message),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Host → UI fire-and-forget frames. The `type` field carries the
/// notification name directly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Notification {
    /// Fresh snapshot of one task's state.
    TaskUpdate { task: TaskSnapshot },
    /// The task list changed.
    TaskPreviewsUpdate { previews: Vec<TaskPreview> },
    /// Global status line; `None` clears it.
    StatusUpdate { message: Option<String> },
    /// A failure the user should see immediately.
    ErrorPrompt { message: String },
}

impl Notification {
    /// The wire name in the `type` field.
    pub fn name(&self) -> &'static str {
        match self {
            Notification::TaskUpdate { .. } => "taskUpdate",
            Notification::TaskPreviewsUpdate { .. } => "taskPreviewsUpdate",
            Notification::StatusUpdate { .. } => "statusUpdate",
            Notification::ErrorPrompt { .. } => "errorPrompt",
        }
    }
}

/// One decoded wire message.
#[derive(Clone, Debug, PartialEq)]
pub enum Envelope {
    Call(CallFrame),
    Result(ResultFrame),
    Push(Notification),
}

impl Envelope {
    /// Encode for the transport, tagging call/result frames.
    pub fn to_value(&self) -> Result<Value, ProtocolError> {
        match self {
            Envelope::Call(frame) => tag_frame(serde_json::to_value(frame)?, CALL_TYPE),
            Envelope::Result(frame) => tag_frame(serde_json::to_value(frame)?, RESULT_TYPE),
            Envelope::Push(notification) => Ok(serde_json::to_value(notification)?),
        }
    }

    /// Decode from the transport. Frames whose `type` is neither `rpc` nor
    /// `rpcResponse` are treated as pushes; an unknown push name comes back
    /// as [`ProtocolError::UnrecognizedPush`] so the consumer can log and
    /// keep reading.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?
            .to_string();
        match tag.as_str() {
            CALL_TYPE => Ok(Envelope::Call(serde_json::from_value(value)?)),
            RESULT_TYPE => Ok(Envelope::Result(serde_json::from_value(value)?)),
            _ => serde_json::from_value(value)
                .map(Envelope::Push)
                .map_err(|source| ProtocolError::UnrecognizedPush { name: tag, source }),
        }
    }
}

fn tag_frame(mut value: Value, tag: &str) -> Result<Value, ProtocolError> {
    match value.as_object_mut() {
        Some(map) => {
            map.insert("type".to_string(), Value::String(tag.to_string()));
            Ok(value)
        }
        None => Err(ProtocolError::MissingType),
    }
}

// =============================================================================
// Typed method surface
// =============================================================================

/// Binds a params type to its wire method name and reply type.
pub trait RpcCall: Serialize + DeserializeOwned + Send + 'static {
    /// Wire method name.
    const METHOD: &'static str;
    /// What a successful result decodes to.
    type Reply: Serialize + DeserializeOwned + Send + 'static;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTask {
    pub name: String,
    pub task_mode: TaskMode,
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteTask {
    pub task_id: TaskId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivateTask {
    pub task_id: TaskId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeactivateTask {
    pub task_id: TaskId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ListTaskPreviews {}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GetActiveTask {}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub task_id: TaskId,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMeltyFiles {
    pub task_id: TaskId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ListWorkspaceFiles {}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMeltyFile {
    pub task_id: TaskId,
    pub file_path: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropMeltyFile {
    pub task_id: TaskId,
    pub file_path: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GetLatestCommit {}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoLatestCommit {
    pub commit_id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreatePullRequest {}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GetGitConfigErrors {}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GetAssistantDescription {}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GetVSCodeTheme {}

macro_rules! rpc_methods {
    ($( $method:literal => $variant:ident($params:ty) -> $reply:ty ),+ $(,)?) => {
        $(
            impl RpcCall for $params {
                const METHOD: &'static str = $method;
                type Reply = $reply;
            }
        )+

        /// Every request the bridge accepts, decoded and typed.
        #[derive(Clone, Debug, PartialEq)]
        pub enum Request {
            $( $variant($params), )+
        }

        impl Request {
            /// Decode a call's method and params into a typed request.
            pub fn parse(method: &str, params: Value) -> Result<Self, ProtocolError> {
                let params = if params.is_null() { empty_params() } else { params };
                match method {
                    $(
                        $method => serde_json::from_value(params)
                            .map(Request::$variant)
                            .map_err(|source| ProtocolError::BadParams {
                                method: $method,
                                source,
                            }),
                    )+
                    other => Err(ProtocolError::UnknownMethod(other.to_string())),
                }
            }

            /// The wire method name.
            pub fn method(&self) -> &'static str {
                match self {
                    $( Request::$variant(_) => $method, )+
                }
            }
        }
    };
}

rpc_methods! {
    "createTask" => CreateTask(CreateTask) -> TaskId,
    "deleteTask" => DeleteTask(DeleteTask) -> bool,
    "activateTask" => ActivateTask(ActivateTask) -> bool,
    "deactivateTask" => DeactivateTask(DeactivateTask) -> bool,
    "listTaskPreviews" => ListTaskPreviews(ListTaskPreviews) -> Vec<TaskPreview>,
    "getActiveTask" => GetActiveTask(GetActiveTask) -> Option<TaskSnapshot>,
    "chatMessage" => ChatMessage(ChatMessage) -> TaskSnapshot,
    "listMeltyFiles" => ListMeltyFiles(ListMeltyFiles) -> Vec<String>,
    "listWorkspaceFiles" => ListWorkspaceFiles(ListWorkspaceFiles) -> Vec<String>,
    "addMeltyFile" => AddMeltyFile(AddMeltyFile) -> Vec<String>,
    "dropMeltyFile" => DropMeltyFile(DropMeltyFile) -> Vec<String>,
    "getLatestCommit" => GetLatestCommit(GetLatestCommit) -> Option<String>,
    "undoLatestCommit" => UndoLatestCommit(UndoLatestCommit) -> bool,
    "createPullRequest" => CreatePullRequest(CreatePullRequest) -> String,
    "getGitConfigErrors" => GetGitConfigErrors(GetGitConfigErrors) -> Vec<String>,
    "getAssistantDescription" => GetAssistantDescription(GetAssistantDescription) -> String,
    "getVSCodeTheme" => GetVSCodeTheme(GetVSCodeTheme) -> String,
}

// =============================================================================
// Tests
// =============================================================================
