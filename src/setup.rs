//! Session setup orchestrator.
//!
//! A [`SessionSetup`] is a per-peer, single-use state machine that resolves
//! the peer's address, drives the secure channel handshake, fans the result
//! out to every caller that queued while the operation was in flight, and
//! then asks its owner to release it. Instances are created and owned by
//! [`SessionSetupManager`](crate::manager::SessionSetupManager); all methods
//! run on the manager's single loop, so there is no locking here.

use std::fmt;
use std::sync::Arc;

use crate::address::ResolvedAddress;
use crate::callbacks::{FailureCallback, PendingCallbacks, SuccessCallback};
use crate::config::ReliabilityConfig;
use crate::error::{SetupError, SetupResult};
use crate::establisher::{EstablishParams, SessionEstablisher};
use crate::event::{EventSender, SetupId};
use crate::fabric::{FabricTable, GroupKeyProvider};
use crate::peer::PeerIdentity;
use crate::resolver::{AddressResolver, LookupResult};
use crate::session::{
    ExchangeManager, ResumptionRecord, ResumptionStore, SessionHandle, SharedSessionTable,
};

/// State of a session setup instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SetupState {
    /// Construction failed validation; the instance is inert.
    Uninitialized,
    /// An address must be looked up before anything else.
    #[default]
    NeedsAddress,
    /// A resolution request is outstanding.
    ResolvingAddress,
    /// An address is known but no handshake has started.
    HasAddress,
    /// A handshake attempt is outstanding.
    Connecting,
    /// A secure session has been established and is held.
    SecureConnected,
}

impl SetupState {
    /// Check whether construction validation passed.
    pub fn is_initialized(&self) -> bool {
        !matches!(self, SetupState::Uninitialized)
    }

    /// Check whether a resolver or establisher request is outstanding.
    pub fn has_outstanding_request(&self) -> bool {
        matches!(self, SetupState::ResolvingAddress | SetupState::Connecting)
    }
}

impl fmt::Display for SetupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupState::Uninitialized => write!(f, "uninitialized"),
            SetupState::NeedsAddress => write!(f, "needs_address"),
            SetupState::ResolvingAddress => write!(f, "resolving_address"),
            SetupState::HasAddress => write!(f, "has_address"),
            SetupState::Connecting => write!(f, "connecting"),
            SetupState::SecureConnected => write!(f, "secure_connected"),
        }
    }
}

/// Collaborator references a setup instance needs.
///
/// The session table, exchange manager, resolver, establisher, fabric table,
/// and group key provider are required; the resumption store and the
/// reliability override are optional. Construction of a [`SessionSetup`]
/// from a bundle with a required collaborator missing yields an
/// [`Uninitialized`](SetupState::Uninitialized) instance.
#[derive(Default, Clone)]
pub struct Collaborators {
    pub(crate) session_table: Option<SharedSessionTable>,
    pub(crate) exchange_manager: Option<Arc<ExchangeManager>>,
    pub(crate) resolver: Option<Arc<dyn AddressResolver>>,
    pub(crate) establisher: Option<Arc<dyn SessionEstablisher>>,
    pub(crate) fabric_table: Option<Arc<FabricTable>>,
    pub(crate) group_keys: Option<Arc<dyn GroupKeyProvider>>,
    pub(crate) resumption: Option<Arc<dyn ResumptionStore>>,
    pub(crate) reliability: Option<ReliabilityConfig>,
}

impl Collaborators {
    /// Create an empty bundle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the shared session table.
    pub fn with_session_table(mut self, table: SharedSessionTable) -> Self {
        self.session_table = Some(table);
        self
    }

    /// Set the exchange manager handed to success callbacks.
    pub fn with_exchange_manager(mut self, exchange: Arc<ExchangeManager>) -> Self {
        self.exchange_manager = Some(exchange);
        self
    }

    /// Set the address resolver.
    pub fn with_resolver(mut self, resolver: Arc<dyn AddressResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Set the establisher pool.
    pub fn with_establisher(mut self, establisher: Arc<dyn SessionEstablisher>) -> Self {
        self.establisher = Some(establisher);
        self
    }

    /// Set the fabric table.
    pub fn with_fabric_table(mut self, fabrics: Arc<FabricTable>) -> Self {
        self.fabric_table = Some(fabrics);
        self
    }

    /// Set the group key provider.
    pub fn with_group_keys(mut self, keys: Arc<dyn GroupKeyProvider>) -> Self {
        self.group_keys = Some(keys);
        self
    }

    /// Set the optional resumption store.
    pub fn with_resumption_store(mut self, store: Arc<dyn ResumptionStore>) -> Self {
        self.resumption = Some(store);
        self
    }

    /// Override the default reliability parameters used for handshakes.
    pub fn with_reliability(mut self, reliability: ReliabilityConfig) -> Self {
        self.reliability = Some(reliability);
        self
    }

    /// Check that every required collaborator is present.
    pub fn validate(&self) -> bool {
        self.session_table.is_some()
            && self.exchange_manager.is_some()
            && self.resolver.is_some()
            && self.establisher.is_some()
            && self.fabric_table.is_some()
            && self.group_keys.is_some()
    }

    fn activate(self) -> Option<ActiveCollaborators> {
        Some(ActiveCollaborators {
            session_table: self.session_table?,
            exchange_manager: self.exchange_manager?,
            resolver: self.resolver?,
            establisher: self.establisher?,
            fabric_table: self.fabric_table?,
            group_keys: self.group_keys?,
            resumption: self.resumption,
            reliability: self.reliability.unwrap_or_default(),
        })
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("session_table", &self.session_table.is_some())
            .field("exchange_manager", &self.exchange_manager.is_some())
            .field("resolver", &self.resolver.is_some())
            .field("establisher", &self.establisher.is_some())
            .field("fabric_table", &self.fabric_table.is_some())
            .field("group_keys", &self.group_keys.is_some())
            .field("resumption", &self.resumption.is_some())
            .field("reliability", &self.reliability)
            .finish()
    }
}

/// Validated collaborator bundle. Present exactly when the instance is
/// initialized.
#[derive(Clone)]
struct ActiveCollaborators {
    session_table: SharedSessionTable,
    exchange_manager: Arc<ExchangeManager>,
    resolver: Arc<dyn AddressResolver>,
    establisher: Arc<dyn SessionEstablisher>,
    fabric_table: Arc<FabricTable>,
    group_keys: Arc<dyn GroupKeyProvider>,
    resumption: Option<Arc<dyn ResumptionStore>>,
    reliability: ReliabilityConfig,
}

/// What the owner must do with the instance after a call returns.
///
/// `Release` is the delegate-mediated destruction contract: the owning
/// manager removes the instance from its registry, strictly after the final
/// callback fan-out inside the call that returned it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Keep the instance; an operation is still in flight or it is idle.
    Retain,
    /// Remove the instance; it has delivered its final outcome.
    Release,
}

/// Per-peer, single-use session setup state machine.
pub struct SessionSetup {
    id: SetupId,
    peer: PeerIdentity,
    state: SetupState,
    collaborators: Option<ActiveCollaborators>,
    pending: PendingCallbacks,
    resolved: Option<ResolvedAddress>,
    session: Option<SessionHandle>,
    for_address_update: bool,
    establisher_held: bool,
    events: EventSender,
}

impl SessionSetup {
    /// Create a connect-mode setup instance.
    pub fn new(
        id: SetupId,
        peer: PeerIdentity,
        collaborators: Collaborators,
        events: EventSender,
    ) -> Self {
        Self::build(id, peer, collaborators, events, false)
    }

    /// Create an address-update-only setup instance. Its only operation is
    /// [`perform_address_update`](Self::perform_address_update); connect
    /// callbacks are never registered on it.
    pub fn for_address_update(
        id: SetupId,
        peer: PeerIdentity,
        collaborators: Collaborators,
        events: EventSender,
    ) -> Self {
        Self::build(id, peer, collaborators, events, true)
    }

    fn build(
        id: SetupId,
        peer: PeerIdentity,
        collaborators: Collaborators,
        events: EventSender,
        for_address_update: bool,
    ) -> Self {
        let collaborators = collaborators.activate();
        let state = if collaborators.is_some() {
            SetupState::NeedsAddress
        } else {
            tracing::warn!(id = %id, peer = %peer, "Required collaborator missing, setup inert");
            SetupState::Uninitialized
        };

        Self {
            id,
            peer,
            state,
            collaborators,
            pending: PendingCallbacks::new(),
            resolved: None,
            session: None,
            for_address_update,
            establisher_held: false,
            events,
        }
    }

    /// The correlation id of this instance.
    pub fn id(&self) -> SetupId {
        self.id
    }

    /// The peer this instance targets.
    pub fn peer_id(&self) -> PeerIdentity {
        self.peer
    }

    /// Current state.
    pub fn state(&self) -> SetupState {
        self.state
    }

    /// Whether construction validation passed.
    pub fn is_initialized(&self) -> bool {
        self.state.is_initialized()
    }

    /// Whether this instance exists solely to refresh a cached session's
    /// address.
    pub fn is_for_address_update(&self) -> bool {
        self.for_address_update
    }

    /// Number of callers awaiting the in-flight operation.
    pub fn pending_callers(&self) -> usize {
        self.pending.len()
    }

    /// The address the peer resolved to, once known.
    pub fn resolved_address(&self) -> Option<ResolvedAddress> {
        self.resolved
    }

    fn ctx(&self) -> &ActiveCollaborators {
        // connect/perform_address_update assert initialization up front, so
        // this is unreachable on an Uninitialized instance.
        self.collaborators
            .as_ref()
            .expect("collaborators validated at construction")
    }

    fn transition_to(&mut self, new_state: SetupState) {
        tracing::debug!(
            id = %self.id,
            peer = %self.peer,
            from = %self.state,
            to = %new_state,
            "Setup state transition"
        );
        self.state = new_state;
    }

    /// Request a secure session with the peer.
    ///
    /// A live cached or held session is delivered to `on_success` without
    /// further I/O. Otherwise the callback pair is queued; the first caller
    /// kicks off address resolution, later callers ride the in-flight
    /// operation. A synchronous resolution-submit failure fails every
    /// queued caller, this one included, and the instance asks to be
    /// released.
    ///
    /// # Panics
    ///
    /// Calling this on an uninitialized instance, or on an
    /// address-update-only instance, is a programming error and panics.
    pub async fn connect(
        &mut self,
        on_success: SuccessCallback,
        on_failure: FailureCallback,
    ) -> Disposition {
        assert!(
            self.state.is_initialized(),
            "connect on uninitialized session setup for {}",
            self.peer
        );
        assert!(
            !self.for_address_update,
            "connect on address-update-only session setup for {}",
            self.peer
        );

        // Held-session fast path.
        if self.state == SetupState::SecureConnected {
            match self.session.clone() {
                Some(session) if session.is_live() => {
                    tracing::debug!(
                        id = %self.id,
                        peer = %self.peer,
                        session = %session.id(),
                        "Reusing held secure session"
                    );
                    on_success(self.ctx().exchange_manager.clone(), session);
                    return Disposition::Retain;
                }
                _ => {
                    self.session = None;
                    self.transition_to(SetupState::NeedsAddress);
                }
            }
        }

        match self.state {
            SetupState::NeedsAddress => self.connect_from_idle(on_success, on_failure).await,
            SetupState::ResolvingAddress | SetupState::HasAddress | SetupState::Connecting => {
                self.pending.enqueue(on_success, on_failure);
                tracing::debug!(
                    id = %self.id,
                    peer = %self.peer,
                    state = %self.state,
                    waiting = self.pending.len(),
                    "Caller queued on in-flight setup"
                );
                Disposition::Retain
            }
            SetupState::Uninitialized | SetupState::SecureConnected => {
                unreachable!("handled above")
            }
        }
    }

    async fn connect_from_idle(
        &mut self,
        on_success: SuccessCallback,
        on_failure: FailureCallback,
    ) -> Disposition {
        // Opportunistic reuse: a session may have appeared since this
        // instance was created, e.g. established by the peer's own connect.
        let table = self.ctx().session_table.clone();
        if let Some(existing) = table.read().await.find_existing(&self.peer) {
            tracing::debug!(
                id = %self.id,
                peer = %self.peer,
                session = %existing.id(),
                "Attached to existing secure session"
            );
            on_success(self.ctx().exchange_manager.clone(), existing);
            // Nothing is queued and nothing is in flight; no reason to
            // keep the instance around.
            return Disposition::Release;
        }

        if !self.ctx().fabric_table.contains(self.peer.fabric_index) {
            self.pending.enqueue(on_success, on_failure);
            self.fail_pending(SetupError::UnknownFabric(self.peer.fabric_index));
            return Disposition::Release;
        }

        self.pending.enqueue(on_success, on_failure);
        match self.start_resolution() {
            Ok(()) => Disposition::Retain,
            Err(error) => {
                self.fail_pending(error);
                Disposition::Release
            }
        }
    }

    /// Kick off resolution for an address-update-only instance.
    ///
    /// On `Err` the lookup was rejected synchronously and the owner must
    /// release the instance; no callbacks are involved in this mode.
    ///
    /// # Panics
    ///
    /// Calling this on an uninitialized or connect-mode instance panics.
    pub fn perform_address_update(&mut self) -> SetupResult<()> {
        assert!(
            self.state.is_initialized(),
            "perform_address_update on uninitialized session setup for {}",
            self.peer
        );
        assert!(
            self.for_address_update,
            "perform_address_update on connect-mode session setup for {}",
            self.peer
        );
        debug_assert_eq!(self.state, SetupState::NeedsAddress);

        self.start_resolution()
    }

    fn start_resolution(&mut self) -> SetupResult<()> {
        let resolver = self.ctx().resolver.clone();
        tracing::debug!(id = %self.id, peer = %self.peer, "Submitting address lookup");
        resolver.start_lookup(self.id, self.peer, self.events.clone())?;
        self.transition_to(SetupState::ResolvingAddress);
        Ok(())
    }

    /// The resolver found an address for the peer.
    pub async fn handle_address_resolved(&mut self, result: LookupResult) -> Disposition {
        debug_assert_eq!(
            self.state,
            SetupState::ResolvingAddress,
            "address resolved while {}",
            self.state
        );

        let address = ResolvedAddress::from_lookup(&result);
        tracing::debug!(id = %self.id, peer = %self.peer, address = %address, "Peer address resolved");

        if self.for_address_update {
            let table = self.ctx().session_table.clone();
            let updated = table
                .write()
                .await
                .update_address(self.peer, address, result.reliability);
            tracing::debug!(
                id = %self.id,
                peer = %self.peer,
                sessions = updated,
                "Cached session address refreshed"
            );
            return Disposition::Release;
        }

        self.resolved = Some(address);
        self.transition_to(SetupState::HasAddress);

        match self.start_establishment(address) {
            Ok(()) => Disposition::Retain,
            Err(error) => {
                self.fail_pending(error);
                Disposition::Release
            }
        }
    }

    /// The resolver gave up on the peer.
    pub fn handle_resolution_failed(&mut self, reason: SetupError) -> Disposition {
        debug_assert_eq!(
            self.state,
            SetupState::ResolvingAddress,
            "resolution failed while {}",
            self.state
        );

        if self.for_address_update {
            // No callbacks exist in this mode; the refresh just did not
            // happen.
            tracing::debug!(id = %self.id, peer = %self.peer, error = %reason, "Address refresh failed");
            return Disposition::Release;
        }

        self.fail_pending(reason);
        Disposition::Release
    }

    fn start_establishment(&mut self, address: ResolvedAddress) -> SetupResult<()> {
        let (establisher, params) = {
            let ctx = self.ctx();
            let params = EstablishParams {
                peer: self.peer,
                address,
                reliability: ctx.reliability,
                group_key: ctx.group_keys.ipk_for(self.peer.fabric_index),
                resumption: ctx
                    .resumption
                    .as_ref()
                    .and_then(|store| store.find_resumption(&self.peer)),
            };
            (ctx.establisher.clone(), params)
        };

        tracing::debug!(
            id = %self.id,
            peer = %self.peer,
            address = %address,
            resumable = params.resumption.is_some(),
            "Starting secure channel establishment"
        );
        establisher.establish_session(self.id, params, self.events.clone())?;
        self.establisher_held = true;
        self.transition_to(SetupState::Connecting);
        Ok(())
    }

    /// The establisher completed a handshake.
    pub async fn handle_session_established(
        &mut self,
        session: SessionHandle,
        resumption: Option<ResumptionRecord>,
    ) -> Disposition {
        debug_assert_eq!(
            self.state,
            SetupState::Connecting,
            "session established while {}",
            self.state
        );

        self.release_establisher();
        self.transition_to(SetupState::SecureConnected);

        let (table, exchange, store) = {
            let ctx = self.ctx();
            (
                ctx.session_table.clone(),
                ctx.exchange_manager.clone(),
                ctx.resumption.clone(),
            )
        };

        if let (Some(store), Some(record)) = (store, resumption) {
            store.save_resumption(self.peer, record);
        }

        // A stale session for the same peer is marked defunct inside insert,
        // never silently overwritten.
        table.write().await.insert(session.clone());
        self.session = Some(session.clone());

        tracing::info!(
            id = %self.id,
            peer = %self.peer,
            session = %session.id(),
            callers = self.pending.len(),
            "Secure session established"
        );

        self.pending.notify_success(&exchange, &session);
        Disposition::Release
    }

    /// The establisher failed the handshake.
    pub fn handle_establishment_error(&mut self, error: SetupError) -> Disposition {
        debug_assert_eq!(
            self.state,
            SetupState::Connecting,
            "establishment error while {}",
            self.state
        );

        self.release_establisher();
        self.fail_pending(error);
        Disposition::Release
    }

    /// The owning manager is shutting down; fail any waiting callers and
    /// release held resources.
    pub(crate) fn handle_shutdown(&mut self) -> Disposition {
        self.release_establisher();
        if !self.pending.is_empty() {
            self.fail_pending(SetupError::Shutdown);
        }
        Disposition::Release
    }

    fn release_establisher(&mut self) {
        if self.establisher_held {
            self.establisher_held = false;
            self.ctx().establisher.release(self.id);
        }
    }

    fn fail_pending(&mut self, error: SetupError) {
        tracing::warn!(
            id = %self.id,
            peer = %self.peer,
            callers = self.pending.len(),
            error = %error,
            "Session setup failed"
        );
        self.pending.notify_failure(self.peer, error);
    }
}
