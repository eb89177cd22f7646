//! Established secure sessions and the session table.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::RwLock;

use crate::address::ResolvedAddress;
use crate::config::ReliabilityConfig;
use crate::peer::PeerIdentity;

/// Unique identifier for an established session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Mutable per-session transport parameters.
#[derive(Debug, Clone, Copy)]
struct SessionParams {
    address: ResolvedAddress,
    reliability: ReliabilityConfig,
}

#[derive(Debug)]
struct SessionInner {
    id: SessionId,
    peer: PeerIdentity,
    defunct: AtomicBool,
    params: Mutex<SessionParams>,
}

/// Handle to an established secure session.
///
/// Cheap to clone; all clones observe the same liveness flag, so a session
/// marked defunct through one handle reports dead through every other.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    inner: Arc<SessionInner>,
}

impl SessionHandle {
    /// Create a handle for a freshly established session.
    pub fn new(
        id: SessionId,
        peer: PeerIdentity,
        address: ResolvedAddress,
        reliability: ReliabilityConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id,
                peer,
                defunct: AtomicBool::new(false),
                params: Mutex::new(SessionParams {
                    address,
                    reliability,
                }),
            }),
        }
    }

    /// The session identifier.
    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    /// The peer this session is established with.
    pub fn peer(&self) -> PeerIdentity {
        self.inner.peer
    }

    /// Whether the underlying transport session is still authoritative.
    pub fn is_live(&self) -> bool {
        !self.inner.defunct.load(Ordering::SeqCst)
    }

    /// Mark the session as no longer authoritative, pending replacement or
    /// cleanup. Distinct from removal: existing holders keep their handle.
    pub fn mark_defunct(&self) {
        self.inner.defunct.store(true, Ordering::SeqCst);
        tracing::debug!(session = %self.inner.id, peer = %self.inner.peer, "Session marked defunct");
    }

    /// The peer address this session currently targets.
    pub fn address(&self) -> ResolvedAddress {
        self.inner.params.lock().expect("session lock poisoned").address
    }

    /// The reliability parameters in effect for this session.
    pub fn reliability(&self) -> ReliabilityConfig {
        self.inner
            .params
            .lock()
            .expect("session lock poisoned")
            .reliability
    }

    /// Update the peer address, and the reliability parameters when the
    /// discovery result advertised them.
    pub fn update_address(&self, address: ResolvedAddress, reliability: Option<ReliabilityConfig>) {
        let mut params = self.inner.params.lock().expect("session lock poisoned");
        params.address = address;
        if let Some(reliability) = reliability {
            params.reliability = reliability;
        }
    }
}

impl PartialEq for SessionHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for SessionHandle {}

/// Table of established sessions, keyed by peer identity.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<PeerIdentity, SessionHandle>,
    next_id: u64,
}

/// Session table shared between the setup manager and its embedder.
pub type SharedSessionTable = Arc<RwLock<SessionTable>>;

impl SessionTable {
    /// Create an empty session table.
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            next_id: 1,
        }
    }

    /// Allocate an identifier for a new session.
    pub fn allocate_id(&mut self) -> SessionId {
        let id = self.next_id;
        self.next_id += 1;
        SessionId(id)
    }

    /// Find a live session for a peer. Matching is exact node id plus
    /// fabric index; defunct entries are never returned.
    pub fn find_existing(&self, peer: &PeerIdentity) -> Option<SessionHandle> {
        self.sessions
            .get(peer)
            .filter(|session| session.is_live())
            .cloned()
    }

    /// Insert a session, replacing any entry for the same peer.
    ///
    /// A previous live session is marked defunct before being replaced, so
    /// two live sessions never exist for one peer identity.
    pub fn insert(&mut self, session: SessionHandle) {
        let peer = session.peer();
        if let Some(previous) = self.sessions.get(&peer) {
            if previous.is_live() && previous != &session {
                tracing::debug!(
                    peer = %peer,
                    old = %previous.id(),
                    new = %session.id(),
                    "Replacing live session"
                );
                previous.mark_defunct();
            }
        }
        self.sessions.insert(peer, session);
    }

    /// Push a freshly resolved address into every live session matching the
    /// peer identity. Returns the number of sessions updated.
    pub fn update_address(
        &mut self,
        peer: PeerIdentity,
        address: ResolvedAddress,
        reliability: Option<ReliabilityConfig>,
    ) -> usize {
        match self.sessions.get(&peer) {
            Some(session) if session.is_live() => {
                session.update_address(address, reliability);
                tracing::debug!(peer = %peer, address = %address, "Session address updated");
                1
            }
            _ => 0,
        }
    }

    /// Remove the entry for a peer.
    pub fn remove(&mut self, peer: &PeerIdentity) -> Option<SessionHandle> {
        self.sessions.remove(peer)
    }

    /// Drop all defunct entries. Returns the number removed.
    pub fn remove_defunct(&mut self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| session.is_live());
        before - self.sessions.len()
    }

    /// Number of cached sessions, live or defunct.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Identifier of a message exchange on an established session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExchangeId(pub u32);

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exchange-{}", self.0)
    }
}

/// Messaging-layer handle delivered to success callbacks together with the
/// session. Allocates exchange identifiers; its messaging semantics live
/// outside this crate.
#[derive(Debug)]
pub struct ExchangeManager {
    next_exchange: AtomicU32,
}

impl ExchangeManager {
    /// Create an exchange manager.
    pub fn new() -> Self {
        Self {
            next_exchange: AtomicU32::new(1),
        }
    }

    /// Allocate the next exchange identifier.
    pub fn allocate_exchange(&self) -> ExchangeId {
        ExchangeId(self.next_exchange.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ExchangeManager {
    fn default() -> Self {
        Self::new()
    }
}

/// State needed to resume a previous secure session without a full handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumptionRecord {
    /// Opaque resumption identifier agreed during the prior handshake.
    pub resumption_id: [u8; 16],
}

/// Persistent store of session resumption state.
pub trait ResumptionStore: Send + Sync {
    /// Fetch the resumption record for a peer, if one was saved.
    fn find_resumption(&self, peer: &PeerIdentity) -> Option<ResumptionRecord>;

    /// Save the resumption record agreed during a handshake.
    fn save_resumption(&self, peer: PeerIdentity, record: ResumptionRecord);
}

/// In-memory resumption store.
#[derive(Default)]
pub struct MemoryResumptionStore {
    records: Mutex<HashMap<PeerIdentity, ResumptionRecord>>,
}

impl MemoryResumptionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResumptionStore for MemoryResumptionStore {
    fn find_resumption(&self, peer: &PeerIdentity) -> Option<ResumptionRecord> {
        self.records
            .lock()
            .expect("resumption store lock poisoned")
            .get(peer)
            .copied()
    }

    fn save_resumption(&self, peer: PeerIdentity, record: ResumptionRecord) {
        self.records
            .lock()
            .expect("resumption store lock poisoned")
            .insert(peer, record);
    }
}
