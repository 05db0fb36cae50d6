//! Responder side of the bridge: decode calls, run handlers, send results.
//!
//! The serve loop reads one envelope at a time and spawns a task per call,
//! so a slow handler never blocks the read loop or other calls. Handler
//! outcomes become result frames on the same transport the notifier pushes
//! through; because a handler's pushes are enqueued before the handler
//! returns and its result frame is enqueued after, every progress push
//! reaches the UI before the resolution does.
//!
//! Failure handling:
//! - unknown method → error result, loop unaffected
//! - handler error → error result carrying the message, loop unaffected
//! - certain well-known failures additionally raise an `errorPrompt` push
//!   so the user sees them without opening a transcript

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use melty_types::protocol::{Envelope, Notification, ProtocolError, Request, ResultFrame};

use crate::transport::Transport;

/// What a dispatch table looks like to the serve loop.
///
/// Implementations match exhaustively over [`Request`] and return the
/// serialized reply, or a human-readable failure message that becomes the
/// result frame's `error`.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, request: Request) -> Result<Value, String>;
}

/// Failures the user should be confronted with, not just logged.
fn warrants_prompt(error: &str) -> bool {
    error.contains("no repository found")
}

/// Serves one connection until the peer hangs up or `shutdown` fires.
pub struct Responder<H> {
    transport: Arc<dyn Transport>,
    handler: Arc<H>,
}

impl<H: RequestHandler> Responder<H> {
    pub fn new(transport: Arc<dyn Transport>, handler: Arc<H>) -> Self {
        Self { transport, handler }
    }

    /// Read envelopes and dispatch calls until the connection ends.
    pub async fn serve(&self, shutdown: CancellationToken) {
        loop {
            let envelope = tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("responder shutting down");
                    break;
                }
                maybe = self.transport.recv() => match maybe {
                    Some(envelope) => envelope,
                    None => {
                        tracing::info!("peer closed the connection");
                        break;
                    }
                },
            };

            match envelope {
                Envelope::Call(frame) => {
                    let transport = Arc::clone(&self.transport);
                    let handler = Arc::clone(&self.handler);
                    tokio::spawn(async move {
                        handle_call(transport, handler, frame.id, frame.method, frame.params)
                            .await;
                    });
                }
                Envelope::Result(frame) => {
                    tracing::debug!(id = frame.id, "ignoring result frame on responder side");
                }
                Envelope::Push(notification) => {
                    tracing::debug!(name = notification.name(), "ignoring inbound push");
                }
            }
        }
    }
}

async fn handle_call<H: RequestHandler>(
    transport: Arc<dyn Transport>,
    handler: Arc<H>,
    id: u64,
    method: String,
    params: Value,
) {
    tracing::debug!(id, method = %method, "handling call");

    let outcome = match Request::parse(&method, params) {
        Ok(request) => handler.handle(request).await,
        Err(err @ ProtocolError::UnknownMethod(_)) => {
            tracing::warn!(id, method = %method, "call to unknown method");
            Err(err.to_string())
        }
        Err(err) => {
            tracing::warn!(id, method = %method, error = %err, "undecodable call params");
            Err(err.to_string())
        }
    };

    let frame = match outcome {
        Ok(result) => ResultFrame::ok(id, &method, result),
        Err(message) => {
            tracing::warn!(id, method = %method, error = %message, "handler failed");
            if warrants_prompt(&message) {
                let prompt = Envelope::Push(Notification::ErrorPrompt {
                    message: message.clone(),
                });
                if transport.send(prompt).await.is_err() {
                    return;
                }
            }
            ResultFrame::err(id, &method, message)
        }
    };

    if transport.send(Envelope::Result(frame)).await.is_err() {
        tracing::debug!(id, "connection gone before result could be sent");
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::channel_pair;
    use melty_types::protocol::CallFrame;
    use serde_json::json;
    use std::time::Duration;

    /// Handler that sleeps on demand and fails on demand.
    struct ScriptedHandler;

    #[async_trait]
    impl RequestHandler for ScriptedHandler {
        async fn handle(&self, request: Request) -> Result<Value, String> {
            match request {
                Request::GetAssistantDescription(_) => Ok(json!("a test assistant")),
                Request::GetLatestCommit(_) => {
                    // Slow on purpose: lets fast calls overtake it.
                    tokio::time::sleep(Duration::from_millis(80)).await;
                    Ok(json!("abc123"))
                }
                Request::CreatePullRequest(_) => Err("no repository found".to_string()),
                Request::GetVSCodeTheme(_) => Err("theme service offline".to_string()),
                _ => Ok(Value::Null),
            }
        }
    }

    fn start_responder() -> (Arc<crate::transport::ChannelTransport>, CancellationToken) {
        let (ui, host) = channel_pair();
        let shutdown = CancellationToken::new();
        let responder = Responder::new(
            host as Arc<dyn Transport>,
            Arc::new(ScriptedHandler),
        );
        let token = shutdown.clone();
        tokio::spawn(async move { responder.serve(token).await });
        (ui, shutdown)
    }

    fn call(id: u64, method: &str) -> Envelope {
        Envelope::Call(CallFrame {
            id,
            method: method.to_string(),
            params: json!({}),
        })
    }

    async fn next_result(ui: &crate::transport::ChannelTransport) -> ResultFrame {
        loop {
            match ui.recv().await.expect("connection open") {
                Envelope::Result(frame) => return frame,
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_known_method_resolves() {
        let (ui, _shutdown) = start_responder();
        ui.send(call(1, "getAssistantDescription")).await.unwrap();
        let frame = next_result(&ui).await;
        assert_eq!(frame.id, 1);
        assert_eq!(frame.result, Some(json!("a test assistant")));
    }

    #[tokio::test]
    async fn test_unknown_method_resolves_with_error() {
        let (ui, _shutdown) = start_responder();
        ui.send(call(2, "makeCoffee")).await.unwrap();
        let frame = next_result(&ui).await;
        assert_eq!(frame.id, 2);
        let error = frame.error.unwrap();
        assert!(error.contains("unknown method"), "got: {error}");
        assert!(error.contains("makeCoffee"), "got: {error}");

        // The loop survives: a following call still works.
        ui.send(call(3, "getAssistantDescription")).await.unwrap();
        assert_eq!(next_result(&ui).await.id, 3);
    }

    #[tokio::test]
    async fn test_handler_failure_is_isolated() {
        let (ui, _shutdown) = start_responder();
        ui.send(call(4, "getVSCodeTheme")).await.unwrap();
        let frame = next_result(&ui).await;
        assert_eq!(frame.error.as_deref(), Some("theme service offline"));

        ui.send(call(5, "getAssistantDescription")).await.unwrap();
        assert_eq!(next_result(&ui).await.id, 5);
    }

    #[tokio::test]
    async fn test_slow_handler_does_not_block_fast_one() {
        let (ui, _shutdown) = start_responder();
        ui.send(call(6, "getLatestCommit")).await.unwrap();
        ui.send(call(7, "getAssistantDescription")).await.unwrap();

        // The fast call finishes first even though it was sent second.
        let first = next_result(&ui).await;
        assert_eq!(first.id, 7);
        let second = next_result(&ui).await;
        assert_eq!(second.id, 6);
    }

    #[tokio::test]
    async fn test_well_known_failure_raises_prompt_before_result() {
        let (ui, _shutdown) = start_responder();
        ui.send(call(8, "createPullRequest")).await.unwrap();

        match ui.recv().await.unwrap() {
            Envelope::Push(Notification::ErrorPrompt { message }) => {
                assert_eq!(message, "no repository found");
            }
            other => panic!("expected errorPrompt first, got {:?}", other),
        }
        let frame = next_result(&ui).await;
        assert_eq!(frame.error.as_deref(), Some("no repository found"));
    }

    #[tokio::test]
    async fn test_shutdown_stops_the_loop() {
        let (ui, shutdown) = start_responder();
        shutdown.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        // The loop dropped its transport end, so new calls have nowhere to go.
        assert!(
            ui.send(call(9, "getAssistantDescription")).await.is_err(),
            "responder kept its transport end after shutdown"
        );
    }
}
