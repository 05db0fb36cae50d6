//! Engine events forwarded to the connected editor.
//!
//! The sink is awaited at each state change and the notifier shares the
//! responder's transport, so pushes enter the outbound stream before the
//! result of the call that caused them.

use std::sync::Arc;

use async_trait::async_trait;

use melty_kernel::EventSink;
use melty_rpc::Notifier;
use melty_types::task::{TaskPreview, TaskSnapshot};

pub struct NotifierSink {
    notifier: Arc<Notifier>,
}

impl NotifierSink {
    pub fn new(notifier: Arc<Notifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl EventSink for NotifierSink {
    async fn task_updated(&self, snapshot: TaskSnapshot) {
        self.notifier.task_update(snapshot).await;
    }

    async fn previews_changed(&self, previews: Vec<TaskPreview>) {
        self.notifier.task_previews(previews).await;
    }

    async fn status_changed(&self, message: Option<String>) {
        self.notifier.status(message).await;
    }
}
