//! A deterministic provider with canned replies.
//!
//! Drives the engine in tests and stands in for a real model when the host
//! runs without a backend. Replies are consumed in order; an echoing
//! instance falls back to repeating the last user message once the script
//! runs out.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{CompletionRequest, LlmError, LlmProvider, LlmResult, StreamEvent};

enum Script {
    Reply(Vec<String>),
    Failure(String),
}

pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    echo_when_empty: bool,
}

impl ScriptedProvider {
    /// Empty script; exhausting it is an error.
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            echo_when_empty: false,
        }
    }

    /// Empty script that echoes the user once exhausted.
    pub fn echoing() -> Self {
        Self {
            echo_when_empty: true,
            ..Self::new()
        }
    }

    /// Queue a reply delivered as a single delta.
    pub fn with_reply(self, text: impl Into<String>) -> Self {
        self.scripts.lock().push_back(Script::Reply(vec![text.into()]));
        self
    }

    /// Queue a reply delivered as the given deltas, in order.
    pub fn with_chunks<I, S>(self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let chunks = chunks.into_iter().map(Into::into).collect();
        self.scripts.lock().push_back(Script::Reply(chunks));
        self
    }

    /// Queue a mid-stream failure.
    pub fn with_failure(self, message: impl Into<String>) -> Self {
        self.scripts
            .lock()
            .push_back(Script::Failure(message.into()));
        self
    }

    /// Replies not yet consumed.
    pub fn remaining(&self) -> usize {
        self.scripts.lock().len()
    }

    fn next_script(&self, request: &CompletionRequest) -> Script {
        if let Some(script) = self.scripts.lock().pop_front() {
            return script;
        }
        if self.echo_when_empty {
            let heard = request.last_user_text().unwrap_or("nothing");
            Script::Reply(vec![format!("I heard: {heard}")])
        } else {
            Script::Failure("scripted provider ran out of replies".to_string())
        }
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> LlmResult<String> {
        match self.next_script(&request) {
            Script::Reply(chunks) => Ok(chunks.concat()),
            Script::Failure(message) => Err(LlmError::ApiError(message)),
        }
    }

    async fn stream(&self, request: CompletionRequest) -> mpsc::Receiver<StreamEvent> {
        let script = self.next_script(&request);
        let events: Vec<StreamEvent> = match script {
            Script::Reply(chunks) => chunks
                .into_iter()
                .map(StreamEvent::Delta)
                .chain(std::iter::once(StreamEvent::Done))
                .collect(),
            Script::Failure(message) => vec![StreamEvent::Failed(message)],
        };
        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            let _ = tx.send(event).await;
        }
        rx
    }
}
