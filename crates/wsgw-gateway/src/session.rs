//! Per-connection session: reader task and relay loop.
//!
//! Each accepted connection runs two tasks: a dedicated reader whose sole
//! job is to pull frames off the socket and hand them over, and the relay
//! loop, which multiplexes four independently-paced events — outbound
//! message available, inbound message available, terminal read error, and
//! cancellation — handling each to completion before the next wait. No
//! priority exists among the four; callers must not assume one.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, close_code};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{GatewayError, GatewayResult};
use crate::id::ConnectionId;
use crate::registry::{
    ConnectionRegistry, OUTBOUND_QUEUE_CAPACITY, RegistryGuard, SessionCloser, SessionHandle,
};
use crate::sink::MessageSink;

/// Deadline for a single outbound write to the client socket.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Why the client socket stopped being readable.
#[derive(Debug)]
enum SocketClosed {
    /// Clean closure (code 1000, or stream end after a bare close frame).
    Normal,
    /// Peer is going away (code 1001), e.g. a browser tab closing.
    GoingAway,
    /// Everything else: protocol violations, unexpected frames, read
    /// failures, abrupt disconnects.
    Other(String),
}

impl SocketClosed {
    fn classify(frame: Option<CloseFrame>) -> Self {
        match frame {
            None => SocketClosed::Normal,
            Some(frame) if frame.code == close_code::NORMAL => SocketClosed::Normal,
            Some(frame) if frame.code == close_code::AWAY => SocketClosed::GoingAway,
            Some(frame) => SocketClosed::Other(format!("close code {}", frame.code)),
        }
    }
}

/// Run one session to completion.
///
/// The session is registered before the first frame moves and removed
/// unconditionally when the relay loop returns, whichever of the four
/// events ended it and even if message handling panicked.
pub(crate) async fn run(
    socket: WebSocket,
    id: ConnectionId,
    registry: Arc<ConnectionRegistry>,
    sink: Arc<dyn MessageSink>,
    shutdown: CancellationToken,
) -> GatewayResult<()> {
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(OUTBOUND_QUEUE_CAPACITY);
    // Capacity 1: the reader stalls until the relay loop consumes.
    let (inbound_tx, mut inbound_rx) = mpsc::channel::<String>(1);
    let (read_err_tx, read_err_rx) = oneshot::channel::<SocketClosed>();

    let closer = SessionCloser::new(shutdown.child_token());
    registry
        .insert(id.clone(), SessionHandle::new(outbound_tx, closer.clone()))
        .await;
    let mut guard = RegistryGuard::new(id.clone(), Arc::clone(&registry));

    let (mut ws_tx, ws_rx) = socket.split();
    let reader = tokio::spawn(read_loop(ws_rx, inbound_tx, read_err_tx, id.clone()));

    let result = relay_loop(
        &mut ws_tx,
        &mut outbound_rx,
        &mut inbound_rx,
        read_err_rx,
        &closer,
        sink.as_ref(),
        &id,
    )
    .await;

    // Removal precedes the disconnected notification issued by our caller.
    guard.cleanup().await;

    // Close the transport. An evicted slow consumer gets told why; both
    // sends are best-effort since the peer may already be gone.
    let frame = if closer.was_evicted() {
        warn!(connection_id = %id, "closing slow consumer");
        CloseFrame {
            code: close_code::POLICY,
            reason: Utf8Bytes::from_static("connection too slow to keep up with messages"),
        }
    } else {
        CloseFrame {
            code: close_code::NORMAL,
            reason: Utf8Bytes::from_static(""),
        }
    };
    let _ = timeout(WRITE_TIMEOUT, ws_tx.send(Message::Close(Some(frame)))).await;

    // The reader cannot be woken from a pending read directly; dropping its
    // half of the socket, together with the write half above, is what tears
    // the transport down and unblocks it.
    reader.abort();

    result
}

/// The four-way wait at the heart of a session.
async fn relay_loop(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    outbound_rx: &mut mpsc::Receiver<String>,
    inbound_rx: &mut mpsc::Receiver<String>,
    mut read_err_rx: oneshot::Receiver<SocketClosed>,
    closer: &SessionCloser,
    sink: &dyn MessageSink,
    id: &ConnectionId,
) -> GatewayResult<()> {
    loop {
        tokio::select! {
            maybe_msg = outbound_rx.recv() => {
                match maybe_msg {
                    Some(msg) => write_with_deadline(ws_tx, msg).await?,
                    // The registry holds the sender for the session's whole
                    // lifetime; this only fires after removal.
                    None => return Ok(()),
                }
            }
            maybe_msg = inbound_rx.recv() => {
                match maybe_msg {
                    Some(msg) => {
                        // Fire-and-forget: sink failures go to the logs,
                        // never back to the transport.
                        if let Err(err) = sink.on_message(&msg, id).await {
                            warn!(
                                connection_id = %id,
                                error = %err,
                                "message sink rejected inbound message"
                            );
                        }
                    }
                    None => return Ok(()),
                }
            }
            _ = &mut read_err_rx => {
                // Client-initiated closure is not an error at this level;
                // the reader already logged the classification.
                return Ok(());
            }
            _ = closer.cancelled() => {
                return Err(GatewayError::Cancelled);
            }
        }
    }
}

async fn write_with_deadline(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    msg: String,
) -> GatewayResult<()> {
    match timeout(WRITE_TIMEOUT, ws_tx.send(Message::Text(msg.into()))).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(GatewayError::Transport(err)),
        Err(_) => Err(GatewayError::WriteTimeout(WRITE_TIMEOUT)),
    }
}

/// Reader task: pull one frame at a time off the socket and hand it to the
/// session until the socket stops being readable.
async fn read_loop(
    mut ws_rx: SplitStream<WebSocket>,
    inbound: mpsc::Sender<String>,
    terminal: oneshot::Sender<SocketClosed>,
    id: ConnectionId,
) {
    let closed = loop {
        match ws_rx.next().await {
            Some(Ok(Message::Text(text))) => {
                // Synchronous handoff: stall until the relay loop consumes.
                if inbound.send(text.as_str().to_string()).await.is_err() {
                    break SocketClosed::Other("relay loop stopped".to_string());
                }
            }
            Some(Ok(Message::Close(frame))) => break SocketClosed::classify(frame),
            // Only text frames are legal on this gateway.
            Some(Ok(Message::Binary(_))) => {
                break SocketClosed::Other("unexpected binary frame".to_string());
            }
            // Ping/pong are answered by the protocol layer.
            Some(Ok(_)) => {}
            Some(Err(err)) => break SocketClosed::Other(err.to_string()),
            None => break SocketClosed::Other("socket closed without close handshake".to_string()),
        }
    };

    match &closed {
        SocketClosed::Normal => {
            info!(connection_id = %id, reason = "normal closure", "client closed connection");
        }
        SocketClosed::GoingAway => {
            info!(connection_id = %id, reason = "going away", "client closed connection");
        }
        SocketClosed::Other(detail) => {
            error!(connection_id = %id, detail = %detail, "read error");
        }
    }

    // Delivery never blocks; if the relay loop has already returned,
    // teardown owns the transport close and this signal has no audience.
    let _ = terminal.send(closed);
}
