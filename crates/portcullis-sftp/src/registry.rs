//! Connection tracking for coordinated shutdown.
//!
//! Every authenticated connection is registered here with its cancel token
//! and an opaque close handle. Shutdown drains a consistent snapshot of the
//! map and tears the connections down concurrently, so handling tasks that
//! unregister themselves while shutdown runs cannot corrupt the iteration.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use portcullis_core::{CancelCause, CancelToken};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{Error, Result};

/// Opaque identity of one connection, stable for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Allocates a fresh identity.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Close operation over the underlying transport handle.
///
/// The registry never inspects the connection itself; it only asks the
/// handle to go away during shutdown.
#[async_trait]
pub trait ConnectionControl: Send + Sync {
    /// Asks the transport to close the connection.
    ///
    /// # Errors
    ///
    /// Failures are reported for logging; shutdown continues regardless.
    async fn close(&self) -> Result<()>;
}

struct ConnectionRecord {
    token: CancelToken,
    control: Arc<dyn ConnectionControl>,
}

/// Registry of live connections.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, ConnectionRecord>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a connection.
    ///
    /// # Errors
    ///
    /// Fails when `id` is already registered; identities are unique for a
    /// connection's lifetime.
    pub async fn register(
        &self,
        id: ConnectionId,
        token: CancelToken,
        control: Arc<dyn ConnectionControl>,
    ) -> Result<()> {
        let mut connections = self.connections.lock().await;
        if connections.contains_key(&id) {
            return Err(Error::Connection(format!(
                "connection {id} is already registered"
            )));
        }
        connections.insert(id, ConnectionRecord { token, control });
        debug!(%id, active = connections.len(), "connection registered");
        Ok(())
    }

    /// Removes a connection. Safe to call repeatedly or for an unknown id.
    pub async fn unregister(&self, id: ConnectionId) {
        let mut connections = self.connections.lock().await;
        if connections.remove(&id).is_some() {
            debug!(%id, active = connections.len(), "connection unregistered");
        }
    }

    /// Number of currently registered connections.
    pub async fn active(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Closes and cancels every registered connection, concurrently.
    ///
    /// Takes a snapshot under the lock, then for each record invokes the
    /// handle's close operation and cancels its token with `cause`.
    /// Returns only after every record has completed the sequence. There is
    /// no timeout: a close that never finishes blocks shutdown visibly
    /// instead of being silently abandoned.
    pub async fn close_all(&self, cause: CancelCause) {
        let drained: Vec<(ConnectionId, ConnectionRecord)> = {
            let mut connections = self.connections.lock().await;
            connections.drain().collect()
        };

        if drained.is_empty() {
            return;
        }
        info!(count = drained.len(), %cause, "closing all connections");

        let mut closing = JoinSet::new();
        for (id, record) in drained {
            closing.spawn(async move {
                if let Err(err) = record.control.close().await {
                    warn!(%id, error = %err, "failed to close connection handle");
                }
                record.token.cancel(cause);
                id
            });
        }

        while let Some(outcome) = closing.join_next().await {
            match outcome {
                Ok(id) => debug!(%id, "connection close sequence finished"),
                Err(err) => warn!(error = %err, "connection close task failed"),
            }
        }
    }
}
