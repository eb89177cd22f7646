//! Session setup manager.
//!
//! Owns every in-flight [`SessionSetup`], routes collaborator completions to
//! the instance that submitted the request, and acts as the release
//! delegate: when an instance reports [`Disposition::Release`] the manager
//! removes it from the registry, strictly after that instance's final
//! callback fan-out.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};

use crate::callbacks::{FailureCallback, SuccessCallback};
use crate::error::SetupResult;
use crate::event::{EventReceiver, EventSender, SetupEvent, SetupEventKind, SetupId};
use crate::peer::PeerIdentity;
use crate::session::{ExchangeManager, SessionHandle, SharedSessionTable};
use crate::setup::{Collaborators, Disposition, SessionSetup};

/// Outcome delivered by [`SessionSetupManager::connect_awaitable`].
pub type ConnectOutcome = SetupResult<(Arc<ExchangeManager>, SessionHandle)>;

/// Factory and registry for session setup instances.
///
/// At most one connect-mode instance exists per peer identity; additional
/// connect requests for a peer with an operation in flight are queued onto
/// the existing instance. Address-update-only instances are registered by
/// [`SetupId`] but never indexed by peer, so one may coexist with a
/// connect-mode instance for the same peer.
pub struct SessionSetupManager {
    collaborators: Collaborators,
    setups: HashMap<SetupId, SessionSetup>,
    peer_index: HashMap<PeerIdentity, SetupId>,
    next_setup_id: u64,
    event_tx: EventSender,
    event_rx: Option<EventReceiver>,
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: Option<mpsc::Receiver<()>>,
}

impl SessionSetupManager {
    /// Create a manager around a collaborator bundle.
    ///
    /// The bundle is cloned into every instance the manager creates; an
    /// incomplete bundle makes every instance inert, so connects against it
    /// are programming errors.
    pub fn new(collaborators: Collaborators) -> Self {
        debug_assert!(collaborators.validate(), "incomplete collaborator bundle");

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        Self {
            collaborators,
            setups: HashMap::new(),
            peer_index: HashMap::new(),
            next_setup_id: 1,
            event_tx,
            event_rx: Some(event_rx),
            shutdown_tx,
            shutdown_rx: Some(shutdown_rx),
        }
    }

    /// The sender collaborators post completions on.
    pub fn event_sender(&self) -> EventSender {
        self.event_tx.clone()
    }

    /// Sender for external shutdown signals to [`run`](Self::run).
    pub fn shutdown_handle(&self) -> mpsc::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// The shared session table, for embedders that also establish sessions
    /// through other paths.
    pub fn session_table(&self) -> Option<SharedSessionTable> {
        self.collaborators.session_table.clone()
    }

    /// Number of live setup instances, both modes.
    pub fn pending_setups(&self) -> usize {
        self.setups.len()
    }

    /// Check whether a connect-mode setup is in flight for a peer.
    pub fn has_in_flight(&self, peer: &PeerIdentity) -> bool {
        self.peer_index.contains_key(peer)
    }

    fn allocate_id(&mut self) -> SetupId {
        let id = self.next_setup_id;
        self.next_setup_id += 1;
        SetupId(id)
    }

    /// Request a secure session with a peer.
    ///
    /// The callback pair lands on the in-flight instance for the peer when
    /// one exists; callers never bypass an operation already under way.
    /// Otherwise a fresh instance takes the pair, and its first act is the
    /// cached-session reuse check, so a live session still short-circuits
    /// with no I/O.
    pub async fn connect_to_peer(
        &mut self,
        peer: PeerIdentity,
        on_success: SuccessCallback,
        on_failure: FailureCallback,
    ) {
        if let Some(&id) = self.peer_index.get(&peer) {
            if let Some(setup) = self.setups.get_mut(&id) {
                let disposition = setup.connect(on_success, on_failure).await;
                self.apply(id, disposition);
                return;
            }
            // Index invariant broken; fall through and rebuild.
            tracing::warn!(peer = %peer, id = %id, "Stale peer index entry");
            self.peer_index.remove(&peer);
        }

        let id = self.allocate_id();
        let mut setup = SessionSetup::new(id, peer, self.collaborators.clone(), self.event_tx.clone());
        let disposition = setup.connect(on_success, on_failure).await;

        match disposition {
            Disposition::Retain => {
                self.setups.insert(id, setup);
                self.peer_index.insert(peer, id);
            }
            Disposition::Release => {
                tracing::debug!(id = %id, peer = %peer, "Session setup released before registration");
            }
        }
    }

    /// Request a secure session and await the outcome on a channel.
    ///
    /// Convenience wrapper over [`connect_to_peer`](Self::connect_to_peer)
    /// for callers that prefer a future to a callback pair.
    pub async fn connect_awaitable(
        &mut self,
        peer: PeerIdentity,
    ) -> oneshot::Receiver<ConnectOutcome> {
        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(Mutex::new(Some(tx)));
        let failure_slot = slot.clone();

        self.connect_to_peer(
            peer,
            Box::new(move |exchange, session| {
                if let Some(sender) = slot.lock().ok().and_then(|mut s| s.take()) {
                    let _ = sender.send(Ok((exchange, session)));
                }
            }),
            Box::new(move |_, error| {
                if let Some(sender) = failure_slot.lock().ok().and_then(|mut s| s.take()) {
                    let _ = sender.send(Err(error));
                }
            }),
        )
        .await;

        rx
    }

    /// Refresh the cached address of a peer's live sessions without
    /// attempting a handshake.
    ///
    /// Creates an address-update-only instance; its resolver outcome never
    /// produces callbacks. `Err` means the lookup was rejected
    /// synchronously and no instance was kept.
    pub fn refresh_peer_address(&mut self, peer: PeerIdentity) -> SetupResult<()> {
        let id = self.allocate_id();
        let mut setup = SessionSetup::for_address_update(
            id,
            peer,
            self.collaborators.clone(),
            self.event_tx.clone(),
        );

        match setup.perform_address_update() {
            Ok(()) => {
                tracing::debug!(id = %id, peer = %peer, "Address refresh started");
                self.setups.insert(id, setup);
                Ok(())
            }
            Err(error) => {
                tracing::debug!(id = %id, peer = %peer, error = %error, "Address refresh rejected");
                Err(error)
            }
        }
    }

    /// Route one collaborator completion to its setup instance.
    pub async fn dispatch(&mut self, event: SetupEvent) {
        let Some(setup) = self.setups.get_mut(&event.id) else {
            // Completion for an instance that was already released; the
            // only such source is a collaborator racing a synchronous
            // failure path.
            tracing::debug!(id = %event.id, peer = %event.peer, "Event for released setup ignored");
            return;
        };

        let disposition = match event.kind {
            SetupEventKind::AddressResolved(result) => setup.handle_address_resolved(result).await,
            SetupEventKind::ResolutionFailed(reason) => setup.handle_resolution_failed(reason),
            SetupEventKind::SessionEstablished {
                session,
                resumption,
            } => setup.handle_session_established(session, resumption).await,
            SetupEventKind::EstablishmentFailed(error) => {
                setup.handle_establishment_error(error)
            }
        };

        self.apply(event.id, disposition);
    }

    /// Drain collaborator completions until shutdown is signalled.
    pub async fn run(&mut self) {
        let Some(mut event_rx) = self.event_rx.take() else {
            tracing::warn!("Setup manager run() called twice");
            return;
        };
        let Some(mut shutdown_rx) = self.shutdown_rx.take() else {
            return;
        };

        tracing::info!("Session setup manager running");

        loop {
            tokio::select! {
                Some(event) = event_rx.recv() => {
                    self.dispatch(event).await;
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!(in_flight = self.setups.len(), "Session setup manager shutting down");
                    self.fail_remaining();
                    break;
                }
            }
        }
    }

    /// Fail every queued caller on shutdown.
    fn fail_remaining(&mut self) {
        let ids: Vec<SetupId> = self.setups.keys().copied().collect();
        for id in ids {
            if let Some(setup) = self.setups.get_mut(&id) {
                let disposition = setup.handle_shutdown();
                self.apply(id, disposition);
            }
        }
    }

    fn apply(&mut self, id: SetupId, disposition: Disposition) {
        if disposition == Disposition::Release {
            if let Some(setup) = self.setups.remove(&id) {
                if !setup.is_for_address_update() {
                    self.peer_index.remove(&setup.peer_id());
                }
                tracing::debug!(id = %id, peer = %setup.peer_id(), "Session setup released");
            }
        }
    }
}
