//! Outbound event seam.
//!
//! The engine reports state changes through [`EventSink`] without knowing
//! who is listening. The host forwards these to the connected editor; tests
//! record them; [`NullSink`] swallows them.
//!
//! Sink calls are awaited at the point of the state change, so a sink that
//! writes to an ordered channel observes events in cause order.

use async_trait::async_trait;

use melty_types::task::{TaskPreview, TaskSnapshot};

#[async_trait]
pub trait EventSink: Send + Sync {
    /// A task's snapshot changed (conversation grew, phase moved, ...).
    async fn task_updated(&self, snapshot: TaskSnapshot);

    /// The preview list changed (task created, deleted, renamed, chatted).
    async fn previews_changed(&self, previews: Vec<TaskPreview>);

    /// The transient status line changed. `None` clears it.
    async fn status_changed(&self, message: Option<String>);
}

/// Sink that drops everything.
pub struct NullSink;

#[async_trait]
impl EventSink for NullSink {
    async fn task_updated(&self, _snapshot: TaskSnapshot) {}
    async fn previews_changed(&self, _previews: Vec<TaskPreview>) {}
    async fn status_changed(&self, _message: Option<String>) {}
}
