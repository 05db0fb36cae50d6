//! Caller side of the bridge: id allocation and pending-call correlation.
//!
//! Every outgoing call gets a connection-local monotonic id and a one-shot
//! resolution slot registered **before** the frame is handed to the
//! transport, so a fast peer can never respond into a missing slot. Each
//! slot resolves exactly once: with the peer's result, with the peer's
//! error string, with a timeout, or in bulk when the connection is torn
//! down. A result frame that matches no slot is logged and dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;

use melty_types::protocol::{CallFrame, Envelope, ProtocolError, ResultFrame, RpcCall};

use crate::transport::{Transport, TransportError};

/// How a call can fail.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// The peer resolved the call with an error string.
    #[error("{0}")]
    Rejected(String),
    /// The frame never left this side.
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    /// The connection died while the call was pending.
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    /// No resolution within the deadline.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
    /// The request could not be encoded.
    #[error("encode: {0}")]
    Encode(ProtocolError),
    /// The peer's result did not decode as the expected reply type.
    #[error("decode {method} reply: {source}")]
    Decode {
        method: &'static str,
        source: serde_json::Error,
    },
}

impl CallError {
    /// The error string a rejected call carried, if that is what this is.
    pub fn rejection(&self) -> Option<&str> {
        match self {
            CallError::Rejected(message) => Some(message),
            _ => None,
        }
    }
}

type Pending = oneshot::Sender<Result<Value, CallError>>;

/// Issues calls and routes result frames back to their callers.
///
/// The caller owns no read loop; whoever reads the connection feeds result
/// frames in through [`Caller::resolve`].
pub struct Caller {
    transport: Arc<dyn Transport>,
    next_id: AtomicU64,
    pending: DashMap<u64, Pending>,
}

impl Caller {
    pub fn new(transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
        })
    }

    /// Number of calls awaiting resolution.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Issue a typed call and wait for its resolution.
    pub async fn call<T: RpcCall>(&self, request: T) -> Result<T::Reply, CallError> {
        let (_id, rx) = self.dispatch(&request).await?;
        match rx.await {
            Ok(outcome) => Self::decode::<T>(outcome?),
            Err(_) => Err(CallError::ConnectionLost(
                "resolution slot dropped".to_string(),
            )),
        }
    }

    /// Issue a typed call with a deadline. On expiry the pending slot is
    /// removed, so a late result frame is dropped as unmatched.
    pub async fn call_with_timeout<T: RpcCall>(
        &self,
        request: T,
        deadline: Duration,
    ) -> Result<T::Reply, CallError> {
        let (id, rx) = self.dispatch(&request).await?;
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(outcome)) => Self::decode::<T>(outcome?),
            Ok(Err(_)) => Err(CallError::ConnectionLost(
                "resolution slot dropped".to_string(),
            )),
            Err(_) => {
                self.pending.remove(&id);
                Err(CallError::Timeout(deadline))
            }
        }
    }

    /// Route an incoming result frame to its pending slot.
    ///
    /// A frame with no matching slot is dropped with a warning; it can never
    /// resolve another call or disturb the connection.
    pub fn resolve(&self, frame: ResultFrame) {
        let id = frame.id;
        match self.pending.remove(&id) {
            Some((_, slot)) => {
                let outcome = frame.into_outcome().map_err(CallError::Rejected);
                // A failed send just means the call timed out in between.
                let _ = slot.send(outcome);
            }
            None => {
                tracing::warn!(id, method = %frame.method, "result for unknown call, dropping");
            }
        }
    }

    /// Reject every pending call. Called on transport teardown.
    pub fn fail_all(&self, reason: &str) {
        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        let count = ids.len();
        for id in ids {
            if let Some((_, slot)) = self.pending.remove(&id) {
                let _ = slot.send(Err(CallError::ConnectionLost(reason.to_string())));
            }
        }
        if count > 0 {
            tracing::warn!(count, reason, "rejected pending calls");
        }
    }

    async fn dispatch<T: RpcCall>(
        &self,
        request: &T,
    ) -> Result<(u64, oneshot::Receiver<Result<Value, CallError>>), CallError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = CallFrame::typed(id, request).map_err(CallError::Encode)?;
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        if let Err(err) = self.transport.send(Envelope::Call(frame)).await {
            self.pending.remove(&id);
            return Err(CallError::Transport(err));
        }
        Ok((id, rx))
    }

    fn decode<T: RpcCall>(value: Value) -> Result<T::Reply, CallError> {
        serde_json::from_value(value).map_err(|source| CallError::Decode {
            method: T::METHOD,
            source,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
