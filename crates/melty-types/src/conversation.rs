//! Conversation model.
//!
//! A conversation is an append-only sequence of joules (turns). Human joules
//! arrive whole; bot joules may stream in as a partial joule that grows with
//! each fragment and is finalized once the reply is complete.
//!
//! # Example
//!
//! ```ignore
//! let mut conv = Conversation::new();
//! conv.add_human("rename the struct");
//! conv.begin_bot();
//! conv.extend_bot("Renaming");
//! conv.extend_bot(" now.");
//! conv.complete_bot(None, None);
//! ```

use serde::{Deserialize, Serialize};

use crate::changeset::Changeset;

/// Current Unix time in milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Who produced a joule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JouleAuthor {
    /// The human driving the task.
    Human,
    /// The assistant.
    Bot,
    /// A failure recorded into the transcript.
    Error,
}

/// One conversation turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Joule {
    /// Who produced this turn.
    pub author: JouleAuthor,
    /// The turn's text. Grows fragment by fragment for a streaming bot turn.
    pub text: String,
    /// File modifications produced by this turn (bot turns in coder mode).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changeset: Option<Changeset>,
    /// Commit created from the changeset, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    /// False while a bot turn is still streaming.
    pub complete: bool,
    /// When the turn was started (Unix millis).
    pub created_at: u64,
}

impl Joule {
    /// A complete human turn.
    pub fn human(text: impl Into<String>) -> Self {
        Self {
            author: JouleAuthor::Human,
            text: text.into(),
            changeset: None,
            commit: None,
            complete: true,
            created_at: now_millis(),
        }
    }

    /// An empty partial bot turn, ready to stream into.
    pub fn bot_partial() -> Self {
        Self {
            author: JouleAuthor::Bot,
            text: String::new(),
            changeset: None,
            commit: None,
            complete: false,
            created_at: now_millis(),
        }
    }

    /// A complete error turn.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            author: JouleAuthor::Error,
            text: message.into(),
            changeset: None,
            commit: None,
            complete: true,
            created_at: now_millis(),
        }
    }

    /// Is this a bot turn still being streamed?
    pub fn is_partial_bot(&self) -> bool {
        self.author == JouleAuthor::Bot && !self.complete
    }
}

/// An append-only sequence of joules.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// The turns, oldest first.
    pub joules: Vec<Joule>,
}

impl Conversation {
    /// Create an empty conversation.
    pub fn new() -> Self {
        Self { joules: Vec::new() }
    }

    /// Number of turns.
    pub fn len(&self) -> usize {
        self.joules.len()
    }

    /// True when no turns have been recorded.
    pub fn is_empty(&self) -> bool {
        self.joules.is_empty()
    }

    /// The most recent turn, if any.
    pub fn last(&self) -> Option<&Joule> {
        self.joules.last()
    }

    /// Text of the most recent turn, for list previews.
    pub fn preview_text(&self) -> Option<&str> {
        self.joules.last().map(|j| j.text.as_str())
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Append a complete human turn.
    pub fn add_human(&mut self, text: impl Into<String>) {
        self.joules.push(Joule::human(text));
    }

    /// Append a complete error turn.
    pub fn add_error(&mut self, message: impl Into<String>) {
        self.joules.push(Joule::error(message));
    }

    /// Start a partial bot turn. If one is already open it is left as is.
    pub fn begin_bot(&mut self) {
        if !self.joules.last().is_some_and(Joule::is_partial_bot) {
            self.joules.push(Joule::bot_partial());
        }
    }

    /// Extend the open partial bot turn with a text fragment.
    ///
    /// Starts a partial turn first if none is open, so a fragment is never
    /// lost.
    pub fn extend_bot(&mut self, fragment: &str) {
        self.begin_bot();
        if let Some(last) = self.joules.last_mut() {
            last.text.push_str(fragment);
        }
    }

    /// Finalize the open partial bot turn.
    ///
    /// Attaches the changeset and commit hash, if any, and marks the turn
    /// complete. Without an open partial turn this appends an empty complete
    /// bot turn, so the transcript always records that a reply happened.
    pub fn complete_bot(&mut self, changeset: Option<Changeset>, commit: Option<String>) {
        self.begin_bot();
        if let Some(last) = self.joules.last_mut() {
            last.changeset = changeset;
            last.commit = commit;
            last.complete = true;
        }
    }
}
