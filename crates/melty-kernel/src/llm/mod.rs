//! Assistant model abstraction.
//!
//! The task engine talks to a model through [`LlmProvider`] and nothing
//! else. Providers stream text deltas; a provider that can only produce a
//! whole reply at once gets streaming for free from the trait default.

mod scripted;

pub use scripted::ScriptedProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use melty_types::conversation::{Conversation, JouleAuthor};

/// Role of a message sent to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A message in a model request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// What the engine hands a provider: system prompt plus history.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub messages: Vec<Message>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            system: None,
            messages,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Build a request from a conversation. Error joules are internal
    /// bookkeeping and never reach the model.
    pub fn from_conversation(conversation: &Conversation) -> Self {
        let messages = conversation
            .joules
            .iter()
            .filter_map(|joule| match joule.author {
                JouleAuthor::Human => Some(Message::user(&joule.text)),
                JouleAuthor::Bot => Some(Message::assistant(&joule.text)),
                JouleAuthor::Error => None,
            })
            .collect();
        Self::new(messages)
    }

    /// Content of the most recent user message, if any.
    pub fn last_user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

/// One step of a streaming reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A fragment of reply text, in order.
    Delta(String),
    /// The reply finished cleanly.
    Done,
    /// The reply died mid-stream. Terminal.
    Failed(String),
}

/// Errors from model providers.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("provider not available: {0}")]
    Unavailable(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("api error: {0}")]
    ApiError(String),
}

pub type LlmResult<T> = Result<T, LlmError>;

/// A model backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name, e.g. "scripted".
    fn name(&self) -> &str;

    /// Produce a whole reply.
    async fn complete(&self, request: CompletionRequest) -> LlmResult<String>;

    /// Produce a reply as ordered [`StreamEvent`]s. The default completes
    /// the whole reply and emits it as a single delta.
    async fn stream(&self, request: CompletionRequest) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(16);
        match self.complete(request).await {
            Ok(text) => {
                let _ = tx.send(StreamEvent::Delta(text)).await;
                let _ = tx.send(StreamEvent::Done).await;
            }
            Err(err) => {
                let _ = tx.send(StreamEvent::Failed(err.to_string())).await;
            }
        }
        rx
    }
}
