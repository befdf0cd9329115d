//! Concurrency-safe registry of live connection sessions.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, GatewayResult};
use crate::id::ConnectionId;

/// Outbound queue capacity per session. A session whose client cannot drain
/// this many pending messages is treated as a slow consumer and evicted.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 16;

/// Capability to force-close a session's transport.
///
/// Cancelling the token terminates the session's relay loop, whose teardown
/// closes the socket. The eviction flag lets teardown tell a slow-consumer
/// eviction (policy-violation close frame) apart from plain shutdown.
#[derive(Clone)]
pub(crate) struct SessionCloser {
    token: CancellationToken,
    evicted: Arc<AtomicBool>,
}

impl SessionCloser {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self {
            token,
            evicted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Force-close the session because its client is too slow to keep up.
    pub(crate) fn close_slow(&self) {
        self.evicted.store(true, Ordering::Relaxed);
        self.token.cancel();
    }

    pub(crate) async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub(crate) fn was_evicted(&self) -> bool {
        self.evicted.load(Ordering::Relaxed)
    }
}

/// Handle to one live session, as stored in the registry.
///
/// The outbound sender is the only part of a session mutated concurrently
/// (by push callers); everything else belongs to the relay loop.
#[derive(Clone)]
pub(crate) struct SessionHandle {
    outbound: mpsc::Sender<String>,
    closer: SessionCloser,
}

impl SessionHandle {
    pub(crate) fn new(outbound: mpsc::Sender<String>, closer: SessionCloser) -> Self {
        Self { outbound, closer }
    }
}

/// Mapping from connection identifier to live session handle.
///
/// Created once per gateway process. Entries are added when a session's
/// relay loop starts and removed unconditionally when it returns, via
/// [`RegistryGuard`]. Membership mutations are linearized by the guard; a
/// lookup never observes a session mid-construction.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, SessionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) async fn insert(&self, id: ConnectionId, handle: SessionHandle) {
        let mut connections = self.connections.write().await;
        connections.insert(id.clone(), handle);
        drop(connections);
        info!(connection_id = %id, "registered connection");
    }

    /// Delete the entry for `id`; a no-op if the entry is already gone.
    pub async fn remove(&self, id: &ConnectionId) {
        let mut connections = self.connections.write().await;
        if connections.remove(id).is_some() {
            drop(connections);
            info!(connection_id = %id, "removed connection");
        } else {
            debug!(connection_id = %id, "removal of unknown connection ignored");
        }
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Enqueue `msg` onto the outbound queue of the session registered
    /// under `id`.
    ///
    /// The lock covers only the map lookup: the handle is copied out under
    /// the read guard and the enqueue happens after release, so in-flight
    /// deliveries never extend the registry's critical section.
    ///
    /// A full outbound queue means the client cannot keep up; the session is
    /// evicted rather than stalling the caller or other sessions. Every
    /// enqueue outcome other than a missing entry counts as success — the
    /// message is delivered to the session's queue, not necessarily to the
    /// wire.
    pub(crate) async fn send_to(&self, id: &ConnectionId, msg: String) -> GatewayResult<()> {
        let handle = {
            let connections = self.connections.read().await;
            connections.get(id).cloned()
        };

        let Some(handle) = handle else {
            return Err(GatewayError::ConnectionNotFound);
        };

        match handle.outbound.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(connection_id = %id, "outbound queue full, evicting slow consumer");
                handle.closer.close_slow();
                Ok(())
            }
            Err(TrySendError::Closed(_)) => {
                // The session is already tearing down; its entry follows.
                debug!(connection_id = %id, "enqueue raced with session teardown");
                Ok(())
            }
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard removing a session from the registry.
///
/// `Drop` spawns the removal, so cleanup also runs when the relay future is
/// dropped mid-poll or a panic unwinds through message handling. Call
/// [`RegistryGuard::cleanup`] on the ordinary exit path to make removal
/// complete before the disconnected notification goes out.
pub(crate) struct RegistryGuard {
    id: ConnectionId,
    registry: Arc<ConnectionRegistry>,
    cleaned: bool,
}

impl RegistryGuard {
    pub(crate) fn new(id: ConnectionId, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            id,
            registry,
            cleaned: false,
        }
    }

    pub(crate) async fn cleanup(&mut self) {
        if !self.cleaned {
            self.registry.remove(&self.id).await;
            self.cleaned = true;
        }
    }
}

impl Drop for RegistryGuard {
    fn drop(&mut self) {
        if !self.cleaned {
            let registry = Arc::clone(&self.registry);
            let id = self.id.clone();
            tokio::spawn(async move {
                registry.remove(&id).await;
            });
            self.cleaned = true;
        }
    }
}
