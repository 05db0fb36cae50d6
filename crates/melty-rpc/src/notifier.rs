//! Push channel from host to UI.
//!
//! At most one UI target is attached at a time; attaching a new one
//! replaces the old (an editor reload swaps its connection in). Pushes are
//! fire-and-forget: with no target attached they are counted and dropped,
//! never queued, since a freshly attached UI re-syncs through
//! `getActiveTask` / `listTaskPreviews` anyway.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use melty_types::protocol::{Envelope, Notification};
use melty_types::task::{TaskPreview, TaskSnapshot};

use crate::transport::Transport;

/// Single-target push gate.
#[derive(Default)]
pub struct Notifier {
    target: RwLock<Option<Arc<dyn Transport>>>,
    dropped: AtomicU64,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the UI target, replacing any previous one.
    pub fn attach(&self, target: Arc<dyn Transport>) {
        let replaced = self.target.write().replace(target).is_some();
        if replaced {
            tracing::info!("notifier target replaced");
        } else {
            tracing::info!("notifier target attached");
        }
    }

    /// Drop the current target, if any.
    pub fn detach(&self) {
        if self.target.write().take().is_some() {
            tracing::info!("notifier target detached");
        }
    }

    pub fn is_attached(&self) -> bool {
        self.target.read().is_some()
    }

    /// Pushes dropped because no target was attached.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Send one notification to the attached target, if any.
    pub async fn notify(&self, notification: Notification) {
        let target = self.target.read().clone();
        match target {
            Some(target) => {
                if target.send(Envelope::Push(notification)).await.is_err() {
                    tracing::warn!("push target closed; detaching");
                    self.detach();
                }
            }
            None => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    name = notification.name(),
                    "push dropped, no target attached"
                );
            }
        }
    }

    // ── Typed conveniences ──────────────────────────────────────────────────

    pub async fn task_update(&self, task: TaskSnapshot) {
        self.notify(Notification::TaskUpdate { task }).await;
    }

    pub async fn task_previews(&self, previews: Vec<TaskPreview>) {
        self.notify(Notification::TaskPreviewsUpdate { previews })
            .await;
    }

    /// Set or clear the global status line.
    pub async fn status(&self, message: Option<String>) {
        self.notify(Notification::StatusUpdate { message }).await;
    }

    pub async fn error_prompt(&self, message: impl Into<String>) {
        self.notify(Notification::ErrorPrompt {
            message: message.into(),
        })
        .await;
    }
}
