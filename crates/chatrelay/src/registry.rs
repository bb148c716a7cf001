use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::mpsc;

/// Handle held in the registry, used to push outbound text to a connection.
#[derive(Clone, Debug)]
pub struct ConnHandle {
    /// Process-unique connection id.
    pub id: u64,
    /// Chat lines to forward as text frames.
    pub tx: mpsc::Sender<String>,
    /// Final diagnostic slot. Capacity one and never shared with chat
    /// lines, so a backed-up line queue cannot swallow it.
    pub terminate: mpsc::Sender<String>,
    /// Instant when this connection was admitted.
    pub admitted_at: Instant,
}

/// Receiving side of a [`ConnHandle`], owned by the connection task.
#[derive(Debug)]
pub struct Mailbox {
    /// Chat lines in arrival order.
    pub lines: mpsc::Receiver<String>,
    /// At most one diagnostic; the task sends it and closes.
    pub terminate: mpsc::Receiver<String>,
}

impl ConnHandle {
    /// Create a handle for connection `id` with a line queue of `buffer`.
    #[must_use]
    pub fn channel(id: u64, buffer: usize) -> (Self, Mailbox) {
        let (tx, lines) = mpsc::channel(buffer);
        let (terminate, terminate_rx) = mpsc::channel(1);
        let handle = Self {
            id,
            tx,
            terminate,
            admitted_at: Instant::now(),
        };
        (
            handle,
            Mailbox {
                lines,
                terminate: terminate_rx,
            },
        )
    }
}

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a fresh connection id.
#[must_use]
pub fn next_conn_id() -> u64 {
    NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed)
}

/// Concurrent key → connection table.
///
/// Authenticated connections are keyed by the raw token they presented, so a
/// token holds at most one live session. Open connections are keyed by
/// [`open_key`].
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: DashMap<String, ConnHandle>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `key`, returning the displaced handle.
    ///
    /// Dropping the returned handle closes the displaced connection's
    /// channel, which ends that connection's task.
    #[must_use]
    pub fn register(&self, key: String, handle: ConnHandle) -> Option<ConnHandle> {
        self.entries.insert(key, handle)
    }

    /// Remove the entry for `key` if present.
    pub fn unregister(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Remove the entry for `key` only if it still belongs to connection `id`.
    pub fn remove_if(&self, key: &str, id: u64) -> bool {
        self.entries.remove_if(key, |_k, v| v.id == id).is_some()
    }

    /// Point-in-time copy of every entry.
    ///
    /// No shard lock is held once this returns, so callers may register and
    /// unregister freely while walking the result.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, ConnHandle)> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Drop every entry, closing each connection's delivery channel.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Look up a connection handle by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<ConnHandle> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Registry key for a connection admitted without a token.
#[must_use]
pub fn open_key(id: u64) -> String {
    format!("conn-{id}")
}
