//! Per-client-connection state: pipeline ordering and reusable upstream
//! sessions.
//!
//! A [`ClientConnection`] is created once per accepted client connection and
//! reaches every request read from it. Requests forwarded on the same
//! connection draw tickets from its [`PipelineSequencer`] in arrival order; a
//! deferred response may only start once every earlier ticket has been handed
//! off. Requests on different client connections never wait for each other.
use std::{
    collections::BTreeSet,
    fmt,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use scc::HashMap;
use tokio::sync::{Mutex, MutexGuard, watch};

use crate::{
    core::{resolver::ResolvedTarget, rule::Scheme},
    ports::upstream::UpstreamChannel,
};

/// Unique identifier for a client connection
pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Default)]
struct SequencerState {
    /// Lowest ticket not yet handed off.
    serving: u64,
    /// Tickets handed off out of order, waiting for `serving` to reach them.
    released: BTreeSet<u64>,
}

/// Hands out tickets in arrival order and lets each ticket proceed only
/// after all earlier ones were handed off.
#[derive(Clone)]
pub struct PipelineSequencer {
    next_ticket: Arc<AtomicU64>,
    state: Arc<watch::Sender<SequencerState>>,
}

impl PipelineSequencer {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SequencerState::default());
        Self {
            next_ticket: Arc::new(AtomicU64::new(0)),
            state: Arc::new(state),
        }
    }

    /// Take the next ticket.
    pub fn issue(&self) -> Turn {
        Turn {
            ticket: self.next_ticket.fetch_add(1, Ordering::SeqCst),
            sequencer: self.clone(),
            released: false,
        }
    }

    /// Lowest ticket that has not been handed off yet.
    pub fn serving(&self) -> u64 {
        self.state.borrow().serving
    }

    fn release(&self, ticket: u64) {
        self.state.send_modify(|state| {
            state.released.insert(ticket);
            while state.released.remove(&state.serving) {
                state.serving += 1;
            }
        });
    }
}

impl Default for PipelineSequencer {
    fn default() -> Self {
        Self::new()
    }
}

/// A ticket in the pipeline order. Dropping it releases its slot, so an
/// abandoned request never stalls the ones behind it.
pub struct Turn {
    ticket: u64,
    sequencer: PipelineSequencer,
    released: bool,
}

impl Turn {
    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    /// Wait until every earlier ticket has been handed off.
    pub async fn wait(&self) {
        let mut rx = self.sequencer.state.subscribe();
        // The sender lives as long as `self.sequencer`, so this cannot fail.
        let _ = rx.wait_for(|state| state.serving >= self.ticket).await;
    }

    /// Let the next ticket proceed.
    pub fn hand_off(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.sequencer.release(self.ticket);
        }
    }
}

impl Drop for Turn {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Turn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Turn")
            .field("ticket", &self.ticket)
            .field("released", &self.released)
            .finish()
    }
}

/// Identity of a reusable upstream connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UpstreamKey {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

impl From<&ResolvedTarget> for UpstreamKey {
    fn from(target: &ResolvedTarget) -> Self {
        Self {
            scheme: target.scheme,
            host: target.host.clone(),
            port: target.port,
        }
    }
}

/// A keep-alive upstream connection owned by one client connection.
///
/// The channel sits behind a FIFO mutex: whoever holds the guard is the only
/// writer on the socket.
pub struct UpstreamSession {
    key: UpstreamKey,
    channel: Mutex<Option<Box<dyn UpstreamChannel>>>,
}

impl UpstreamSession {
    fn new(key: UpstreamKey) -> Self {
        Self {
            key,
            channel: Mutex::new(None),
        }
    }

    pub fn key(&self) -> &UpstreamKey {
        &self.key
    }

    /// Queue for exclusive use of the channel.
    pub async fn lock(&self) -> MutexGuard<'_, Option<Box<dyn UpstreamChannel>>> {
        self.channel.lock().await
    }
}

struct ConnectionInner {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    sequencer: PipelineSequencer,
    sessions: HashMap<UpstreamKey, Arc<UpstreamSession>>,
}

/// Handle to one client connection's processing lineage. Cheap to clone.
#[derive(Clone)]
pub struct ClientConnection {
    inner: Arc<ConnectionInner>,
}

impl ClientConnection {
    pub fn new(peer: Option<SocketAddr>) -> Self {
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(connection.id = id, peer = ?peer, "client connection registered");
        Self {
            inner: Arc::new(ConnectionInner {
                id,
                peer,
                sequencer: PipelineSequencer::new(),
                sessions: HashMap::new(),
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.inner.peer
    }

    pub fn sequencer(&self) -> &PipelineSequencer {
        &self.inner.sequencer
    }

    /// The session for `key`, created on first use.
    pub async fn session(&self, key: UpstreamKey) -> Arc<UpstreamSession> {
        if let Some(entry) = self.inner.sessions.get_async(&key).await {
            return entry.get().clone();
        }
        let session = Arc::new(UpstreamSession::new(key.clone()));
        match self.inner.sessions.insert_async(key, session.clone()).await {
            Ok(()) => session,
            Err((key, _)) => self
                .inner
                .sessions
                .get_async(&key)
                .await
                .map(|entry| entry.get().clone())
                .unwrap_or(session),
        }
    }

    /// Number of distinct upstreams this connection has talked to.
    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.peer)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    #[tokio::test]
    async fn test_tickets_in_order() {
        let seq = PipelineSequencer::new();
        let a = seq.issue();
        let b = seq.issue();
        assert_eq!(a.ticket(), 0);
        assert_eq!(b.ticket(), 1);

        // `b` must wait while `a` is outstanding.
        assert!(timeout(Duration::from_millis(50), b.wait()).await.is_err());

        a.wait().await;
        a.hand_off();
        assert_eq!(seq.serving(), 1);
        timeout(Duration::from_millis(50), b.wait())
            .await
            .expect("second ticket should proceed after hand-off");
    }

    #[tokio::test]
    async fn test_out_of_order_release() {
        let seq = PipelineSequencer::new();
        let a = seq.issue();
        let b = seq.issue();
        let c = seq.issue();

        b.hand_off();
        assert_eq!(seq.serving(), 0);
        a.hand_off();
        assert_eq!(seq.serving(), 2);
        c.wait().await;
    }

    #[tokio::test]
    async fn test_dropped_turn_releases() {
        let seq = PipelineSequencer::new();
        let a = seq.issue();
        let b = seq.issue();
        drop(a);
        timeout(Duration::from_millis(50), b.wait())
            .await
            .expect("dropped ticket must not block later ones");
    }

    #[tokio::test]
    async fn test_connections_are_independent() {
        let one = ClientConnection::new(None);
        let two = ClientConnection::new(None);
        assert_ne!(one.id(), two.id());

        let _held = one.sequencer().issue();
        let other = two.sequencer().issue();
        timeout(Duration::from_millis(50), other.wait())
            .await
            .expect("tickets on another connection are not ordered");
    }

    #[tokio::test]
    async fn test_session_reused_per_key() {
        let conn = ClientConnection::new(None);
        let key = UpstreamKey {
            scheme: Scheme::Http,
            host: "up".into(),
            port: 80,
        };
        let first = conn.session(key.clone()).await;
        let second = conn.session(key).await;
        assert!(Arc::ptr_eq(&first, &second));

        let _other = conn
            .session(UpstreamKey {
                scheme: Scheme::Https,
                host: "up".into(),
                port: 443,
            })
            .await;
        assert_eq!(conn.session_count(), 2);
    }
}
