//! Transports: how envelopes physically move between the two sides.
//!
//! The bridge never cares what carries its frames. Everything above this
//! module talks to [`Transport`]; below it live two implementations:
//!
//! - [`channel_pair`] — an in-process duplex pair for tests and same-process
//!   embedding.
//! - [`LineTransport`] — newline-delimited JSON over any async reader/writer
//!   pair (the host binary uses stdin/stdout).
//!
//! Both preserve send order: every frame handed to `send` leaves in the
//! order it was enqueued, which is what the push-before-result ordering
//! guarantee rests on.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncBufRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, mpsc};

use melty_types::protocol::{Envelope, ProtocolError};

/// Errors from moving frames.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
    #[error("encode: {0}")]
    Encode(#[from] ProtocolError),
}

/// One end of a duplex envelope pipe.
///
/// `recv` is single-consumer: exactly one read loop per end.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Enqueue an envelope for the other side. FIFO per end.
    async fn send(&self, envelope: Envelope) -> Result<(), TransportError>;

    /// Next envelope from the other side; `None` once the peer is gone.
    async fn recv(&self) -> Option<Envelope>;
}

// =============================================================================
// In-process pair
// =============================================================================

/// In-process transport end backed by unbounded channels.
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Envelope>,
    rx: Mutex<mpsc::UnboundedReceiver<Envelope>>,
}

/// Two connected ends. Frames sent on one side arrive on the other, in
/// order.
pub fn channel_pair() -> (Arc<ChannelTransport>, Arc<ChannelTransport>) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    let a = Arc::new(ChannelTransport {
        tx: a_tx,
        rx: Mutex::new(b_rx),
    });
    let b = Arc::new(ChannelTransport {
        tx: b_tx,
        rx: Mutex::new(a_rx),
    });
    (a, b)
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        self.tx.send(envelope).map_err(|_| TransportError::Closed)
    }

    async fn recv(&self) -> Option<Envelope> {
        self.rx.lock().await.recv().await
    }
}

// =============================================================================
// Line-delimited JSON
// =============================================================================

/// Newline-delimited JSON over an async reader/writer pair.
///
/// A reader task decodes each line into an [`Envelope`]; lines that do not
/// decode are logged and skipped so one malformed frame never kills the
/// connection. A writer task owns the write half and drains an internal
/// queue, so `send` never blocks on the peer.
pub struct LineTransport {
    out_tx: mpsc::UnboundedSender<Envelope>,
    in_rx: Mutex<mpsc::UnboundedReceiver<Envelope>>,
}

impl LineTransport {
    /// Spawn the reader and writer tasks and hand back the transport.
    pub fn spawn<R, W>(reader: R, writer: W) -> Arc<Self>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(writer, out_rx));
        tokio::spawn(read_loop(reader, in_tx));

        Arc::new(Self {
            out_tx,
            in_rx: Mutex::new(in_rx),
        })
    }
}

#[async_trait]
impl Transport for LineTransport {
    async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        self.out_tx
            .send(envelope)
            .map_err(|_| TransportError::Closed)
    }

    async fn recv(&self) -> Option<Envelope> {
        self.in_rx.lock().await.recv().await
    }
}

async fn write_loop<W>(mut writer: W, mut out_rx: mpsc::UnboundedReceiver<Envelope>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(envelope) = out_rx.recv().await {
        let value = match envelope.to_value() {
            Ok(value) => value,
            Err(err) => {
                tracing::error!(error = %err, "dropping unencodable outbound frame");
                continue;
            }
        };
        let mut line = value.to_string();
        line.push('\n');
        if let Err(err) = writer.write_all(line.as_bytes()).await {
            tracing::warn!(error = %err, "write side closed, stopping writer");
            break;
        }
        if let Err(err) = writer.flush().await {
            tracing::warn!(error = %err, "flush failed, stopping writer");
            break;
        }
    }
}

async fn read_loop<R>(reader: R, in_tx: mpsc::UnboundedSender<Envelope>)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let envelope = serde_json::from_str(line)
                    .map_err(ProtocolError::from)
                    .and_then(Envelope::from_value);
                match envelope {
                    Ok(envelope) => {
                        if in_tx.send(envelope).is_err() {
                            break;
                        }
                    }
                    Err(ProtocolError::UnrecognizedPush { name, source }) => {
                        tracing::warn!(name = %name, error = %source, "skipping unknown push frame");
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "skipping undecodable frame");
                    }
                }
            }
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(error = %err, "read side failed, stopping reader");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use melty_types::protocol::{CallFrame, Notification, ResultFrame};
    use serde_json::json;

    #[tokio::test]
    async fn test_channel_pair_roundtrip() {
        let (a, b) = channel_pair();
        a.send(Envelope::Result(ResultFrame::ok(1, "m", json!(true))))
            .await
            .unwrap();
        let got = b.recv().await.unwrap();
        assert!(matches!(got, Envelope::Result(f) if f.id == 1));
    }

    #[tokio::test]
    async fn test_channel_pair_preserves_order() {
        let (a, b) = channel_pair();
        for i in 0..10 {
            a.send(Envelope::Result(ResultFrame::ok(i, "m", json!(i))))
                .await
                .unwrap();
        }
        for i in 0..10 {
            match b.recv().await.unwrap() {
                Envelope::Result(frame) => assert_eq!(frame.id, i),
                other => panic!("unexpected frame: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_channel_recv_none_after_peer_drop() {
        let (a, b) = channel_pair();
        drop(a);
        assert!(b.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_line_transport_roundtrip() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_io);
        let (server_read, server_write) = tokio::io::split(server_io);

        let client = LineTransport::spawn(tokio::io::BufReader::new(client_read), client_write);
        let server = LineTransport::spawn(tokio::io::BufReader::new(server_read), server_write);

        client
            .send(Envelope::Call(CallFrame {
                id: 9,
                method: "getLatestCommit".into(),
                params: json!({}),
            }))
            .await
            .unwrap();
        match server.recv().await.unwrap() {
            Envelope::Call(frame) => {
                assert_eq!(frame.id, 9);
                assert_eq!(frame.method, "getLatestCommit");
            }
            other => panic!("unexpected frame: {:?}", other),
        }

        server
            .send(Envelope::Push(Notification::StatusUpdate { message: None }))
            .await
            .unwrap();
        match client.recv().await.unwrap() {
            Envelope::Push(Notification::StatusUpdate { message }) => assert!(message.is_none()),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_line_transport_skips_garbage_lines() {
        let (mut raw, peer_io) = tokio::io::duplex(4096);
        let (peer_read, peer_write) = tokio::io::split(peer_io);
        let peer = LineTransport::spawn(tokio::io::BufReader::new(peer_read), peer_write);

        tokio::io::AsyncWriteExt::write_all(
            &mut raw,
            b"not json at all\n{\"type\":\"weirdFrame\",\"x\":1}\n{\"type\":\"statusUpdate\",\"message\":null}\n",
        )
        .await
        .unwrap();

        // Only the well-formed, recognized frame comes through.
        match peer.recv().await.unwrap() {
            Envelope::Push(Notification::StatusUpdate { message }) => assert!(message.is_none()),
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}
