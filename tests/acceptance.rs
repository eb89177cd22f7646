//! Acceptance tests for session setup orchestration.
//!
//! These tests drive the manager with mock resolver and establisher
//! collaborators and verify:
//! 1. Callers queued on one in-flight operation share a single lookup and
//!    a single handshake, and are notified in FIFO order
//! 2. Resolution failure fans out to every queued caller
//! 3. A live cached session is reused without any I/O
//! 4. Link-local interface retention reaches the establish parameters
//! 5. Address-update-only setups refresh the table and never handshake
//! 6. A stale session is marked defunct before being replaced
//! 7. Establisher pool release happens exactly once per attempt
//! 8. Connect-mode and address-update-mode setups coexist for one peer

use std::sync::{Arc, Mutex};

use tokio::sync::RwLock;

use session_setup::{
    AddressResolver, Collaborators, EstablishParams, EventSender, ExchangeManager, FabricIndex,
    FabricInfo, FabricTable, GroupKey, InterfaceId, LookupResult, MemoryResumptionStore, NodeId,
    PeerIdentity, ReliabilityConfig, ResolvedAddress, ResumptionRecord, ResumptionStore,
    SessionEstablisher, SessionHandle, SessionId, SessionSetupManager, SessionTable, SetupError,
    SetupEvent, SetupEventKind, SetupId, SharedSessionTable, SuccessCallback,
};

/// Resolver mock: records submissions, optionally rejects them.
#[derive(Default)]
struct MockResolver {
    calls: Mutex<Vec<(SetupId, PeerIdentity)>>,
    reject: Mutex<bool>,
}

impl MockResolver {
    fn calls(&self) -> Vec<(SetupId, PeerIdentity)> {
        self.calls.lock().unwrap().clone()
    }

    fn set_reject(&self, reject: bool) {
        *self.reject.lock().unwrap() = reject;
    }
}

impl AddressResolver for MockResolver {
    fn start_lookup(
        &self,
        id: SetupId,
        peer: PeerIdentity,
        _events: EventSender,
    ) -> Result<(), SetupError> {
        if *self.reject.lock().unwrap() {
            return Err(SetupError::LookupSubmitFailed {
                peer,
                reason: "lookup table full".to_string(),
            });
        }
        self.calls.lock().unwrap().push((id, peer));
        Ok(())
    }
}

/// Establisher mock: records attempts and pool releases.
#[derive(Default)]
struct MockEstablisher {
    calls: Mutex<Vec<(SetupId, EstablishParams)>>,
    released: Mutex<Vec<SetupId>>,
    reject: Mutex<bool>,
}

impl MockEstablisher {
    fn calls(&self) -> Vec<(SetupId, EstablishParams)> {
        self.calls.lock().unwrap().clone()
    }

    fn released(&self) -> Vec<SetupId> {
        self.released.lock().unwrap().clone()
    }

    fn set_reject(&self, reject: bool) {
        *self.reject.lock().unwrap() = reject;
    }
}

impl SessionEstablisher for MockEstablisher {
    fn establish_session(
        &self,
        id: SetupId,
        params: EstablishParams,
        _events: EventSender,
    ) -> Result<(), SetupError> {
        if *self.reject.lock().unwrap() {
            return Err(SetupError::EstablisherBusy("pool exhausted".to_string()));
        }
        self.calls.lock().unwrap().push((id, params));
        Ok(())
    }

    fn release(&self, id: SetupId) {
        self.released.lock().unwrap().push(id);
    }
}

type Log = Arc<Mutex<Vec<String>>>;

struct Harness {
    manager: SessionSetupManager,
    resolver: Arc<MockResolver>,
    establisher: Arc<MockEstablisher>,
    table: SharedSessionTable,
    resumption: Arc<MemoryResumptionStore>,
    log: Log,
}

impl Harness {
    fn new() -> Self {
        let table: SharedSessionTable = Arc::new(RwLock::new(SessionTable::new()));
        let resolver = Arc::new(MockResolver::default());
        let establisher = Arc::new(MockEstablisher::default());
        let resumption = Arc::new(MemoryResumptionStore::new());

        let mut fabrics = FabricTable::new();
        fabrics.add_fabric(
            FabricIndex(1),
            FabricInfo {
                fabric_id: 0xF00D,
                label: "test-fabric".to_string(),
            },
        );

        let keys = StaticKeysForFabricOne::provider();

        let collaborators = Collaborators::new()
            .with_session_table(table.clone())
            .with_exchange_manager(Arc::new(ExchangeManager::new()))
            .with_resolver(resolver.clone())
            .with_establisher(establisher.clone())
            .with_fabric_table(Arc::new(fabrics))
            .with_group_keys(keys)
            .with_resumption_store(resumption.clone());

        Self {
            manager: SessionSetupManager::new(collaborators),
            resolver,
            establisher,
            table,
            resumption,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn entries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn callbacks(
        &self,
        tag: &'static str,
    ) -> (SuccessCallback, session_setup::FailureCallback) {
        let ok_log = self.log.clone();
        let err_log = self.log.clone();
        (
            Box::new(move |_, session| {
                ok_log.lock().unwrap().push(format!("{tag}:ok:{}", session.id()));
            }),
            Box::new(move |_, error| {
                err_log.lock().unwrap().push(format!("{tag}:err:{error}"));
            }),
        )
    }

    async fn connect(&mut self, peer: PeerIdentity, tag: &'static str) {
        let (ok, err) = self.callbacks(tag);
        self.manager.connect_to_peer(peer, ok, err).await;
    }

    /// Complete the outstanding lookup for the given submission.
    async fn resolve(&mut self, call: (SetupId, PeerIdentity), result: LookupResult) {
        self.manager
            .dispatch(SetupEvent {
                id: call.0,
                peer: call.1,
                kind: SetupEventKind::AddressResolved(result),
            })
            .await;
    }

    async fn fail_resolution(&mut self, call: (SetupId, PeerIdentity), reason: &str) {
        self.manager
            .dispatch(SetupEvent {
                id: call.0,
                peer: call.1,
                kind: SetupEventKind::ResolutionFailed(SetupError::PeerNotResolved {
                    peer: call.1,
                    reason: reason.to_string(),
                }),
            })
            .await;
    }

    /// Complete the outstanding handshake with a fresh session.
    async fn establish(
        &mut self,
        call: (SetupId, PeerIdentity),
        session: SessionHandle,
        resumption: Option<ResumptionRecord>,
    ) {
        self.manager
            .dispatch(SetupEvent {
                id: call.0,
                peer: call.1,
                kind: SetupEventKind::SessionEstablished { session, resumption },
            })
            .await;
    }

    async fn fail_establishment(&mut self, call: (SetupId, PeerIdentity), reason: &str) {
        self.manager
            .dispatch(SetupEvent {
                id: call.0,
                peer: call.1,
                kind: SetupEventKind::EstablishmentFailed(SetupError::EstablishmentFailed(
                    reason.to_string(),
                )),
            })
            .await;
    }

    fn new_session(&self, id: u64, peer: PeerIdentity, ip: &str) -> SessionHandle {
        SessionHandle::new(
            SessionId(id),
            peer,
            ResolvedAddress::new(ip.parse().unwrap(), 5540),
            ReliabilityConfig::default(),
        )
    }
}

/// Group keys provisioned for the test fabric.
struct StaticKeysForFabricOne;

impl StaticKeysForFabricOne {
    fn provider() -> Arc<session_setup::StaticGroupKeys> {
        let keys = session_setup::StaticGroupKeys::new();
        keys.insert(FabricIndex(1), GroupKey([7u8; 16]));
        Arc::new(keys)
    }
}

fn peer(node: u64) -> PeerIdentity {
    PeerIdentity::new(NodeId(node), FabricIndex(1))
}

fn global_lookup() -> LookupResult {
    LookupResult::new("2001:db8::10".parse().unwrap(), 5540)
}

#[tokio::test]
async fn queued_callers_share_one_operation_fifo() {
    let mut harness = Harness::new();
    let p = peer(1);

    harness.connect(p, "cb1").await;
    harness.connect(p, "cb2").await;
    harness.connect(p, "cb3").await;

    // One in-flight setup, exactly one lookup submitted.
    let calls = harness.resolver.calls();
    assert_eq!(calls.len(), 1);
    assert!(harness.manager.has_in_flight(&p));
    assert_eq!(harness.manager.pending_setups(), 1);

    harness.resolve(calls[0], global_lookup()).await;

    // Exactly one handshake attempt for the three callers.
    let attempts = harness.establisher.calls();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].1.peer, p);

    let session = harness.new_session(10, p, "10.0.0.1");
    harness.establish(calls[0], session.clone(), None).await;

    assert_eq!(
        harness.entries(),
        vec!["cb1:ok:session-10", "cb2:ok:session-10", "cb3:ok:session-10"]
    );

    // Session registered, setup released.
    assert_eq!(
        harness.table.read().await.find_existing(&p),
        Some(session)
    );
    assert_eq!(harness.manager.pending_setups(), 0);
    assert!(!harness.manager.has_in_flight(&p));
}

#[tokio::test]
async fn resolution_failure_fans_out_and_releases() {
    let mut harness = Harness::new();
    let p = peer(2);

    harness.connect(p, "cb1").await;
    harness.connect(p, "cb2").await;

    let calls = harness.resolver.calls();
    assert_eq!(calls.len(), 1);

    harness.fail_resolution(calls[0], "not found").await;

    let entries = harness.entries();
    assert_eq!(entries.len(), 2);
    assert!(entries[0].starts_with("cb1:err:"));
    assert!(entries[1].starts_with("cb2:err:"));
    assert!(entries[0].contains("not found"));

    // No handshake was attempted and the instance is gone.
    assert!(harness.establisher.calls().is_empty());
    assert_eq!(harness.manager.pending_setups(), 0);
}

#[tokio::test]
async fn cached_live_session_short_circuits() {
    let mut harness = Harness::new();
    let p = peer(3);

    let cached = harness.new_session(42, p, "10.0.0.3");
    harness.table.write().await.insert(cached.clone());

    harness.connect(p, "cb1").await;

    assert_eq!(harness.entries(), vec!["cb1:ok:session-42"]);
    assert!(harness.resolver.calls().is_empty());
    assert!(harness.establisher.calls().is_empty());
    assert_eq!(harness.manager.pending_setups(), 0);
}

#[tokio::test]
async fn defunct_cached_session_triggers_fresh_setup() {
    let mut harness = Harness::new();
    let p = peer(4);

    let stale = harness.new_session(1, p, "10.0.0.4");
    harness.table.write().await.insert(stale.clone());
    stale.mark_defunct();

    harness.connect(p, "cb1").await;

    // Dead cache entry must not satisfy the connect.
    assert!(harness.entries().is_empty());
    assert_eq!(harness.resolver.calls().len(), 1);
}

#[tokio::test]
async fn link_local_interface_reaches_establish_params() {
    let mut harness = Harness::new();
    let p = peer(5);

    harness.connect(p, "cb1").await;
    let calls = harness.resolver.calls();

    let lookup = LookupResult::new("fe80::5".parse().unwrap(), 5540)
        .with_interface(Some(InterfaceId(9)));
    harness.resolve(calls[0], lookup).await;

    let attempts = harness.establisher.calls();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].1.address.interface, Some(InterfaceId(9)));
    // Provisioned fabric key is threaded through.
    assert_eq!(attempts[0].1.group_key, Some(GroupKey([7u8; 16])));
}

#[tokio::test]
async fn global_address_drops_reporting_interface() {
    let mut harness = Harness::new();
    let p = peer(6);

    harness.connect(p, "cb1").await;
    let calls = harness.resolver.calls();

    let lookup = global_lookup().with_interface(Some(InterfaceId(9)));
    harness.resolve(calls[0], lookup).await;

    let attempts = harness.establisher.calls();
    assert_eq!(attempts[0].1.address.interface, None);
}

#[tokio::test]
async fn address_update_refreshes_without_handshake() {
    let mut harness = Harness::new();
    let p = peer(7);

    let session = harness.new_session(1, p, "10.0.0.7");
    harness.table.write().await.insert(session.clone());

    harness.manager.refresh_peer_address(p).unwrap();
    let calls = harness.resolver.calls();
    assert_eq!(calls.len(), 1);

    let advertised = ReliabilityConfig::default()
        .with_idle_retransmit(std::time::Duration::from_secs(2));
    let lookup = LookupResult::new("10.0.0.99".parse().unwrap(), 5541)
        .with_reliability(Some(advertised));
    harness.resolve(calls[0], lookup).await;

    // Address and advertised parameters pushed into the cached session.
    assert_eq!(session.address().socket_addr(), "10.0.0.99:5541".parse().unwrap());
    assert_eq!(session.reliability(), advertised);

    // No handshake, no callbacks, instance released.
    assert!(harness.establisher.calls().is_empty());
    assert!(harness.entries().is_empty());
    assert_eq!(harness.manager.pending_setups(), 0);
}

#[tokio::test]
async fn address_update_failure_is_silent() {
    let mut harness = Harness::new();
    let p = peer(8);

    harness.manager.refresh_peer_address(p).unwrap();
    let calls = harness.resolver.calls();

    harness.fail_resolution(calls[0], "gone").await;

    assert!(harness.entries().is_empty());
    assert_eq!(harness.manager.pending_setups(), 0);
}

#[tokio::test]
async fn stale_session_marked_defunct_before_replacement() {
    let mut harness = Harness::new();
    let p = peer(9);

    harness.connect(p, "cb1").await;
    let calls = harness.resolver.calls();
    harness.resolve(calls[0], global_lookup()).await;

    // A session for the same peer appears while the handshake is in flight
    // (for instance established from the peer's side).
    let old = harness.new_session(1, p, "10.0.0.9");
    harness.table.write().await.insert(old.clone());

    let new = harness.new_session(2, p, "10.0.0.9");
    harness.establish(calls[0], new.clone(), None).await;

    assert!(!old.is_live());
    assert!(new.is_live());
    assert_eq!(harness.table.read().await.find_existing(&p), Some(new));
}

#[tokio::test]
async fn establishment_failure_fans_out_and_releases_pool() {
    let mut harness = Harness::new();
    let p = peer(10);

    harness.connect(p, "cb1").await;
    harness.connect(p, "cb2").await;
    let calls = harness.resolver.calls();
    harness.resolve(calls[0], global_lookup()).await;

    harness.fail_establishment(calls[0], "bad credentials").await;

    let entries = harness.entries();
    assert_eq!(entries.len(), 2);
    assert!(entries[0].contains("cb1:err:"));
    assert!(entries[1].contains("cb2:err:"));
    assert!(entries[0].contains("bad credentials"));

    // Pool slot returned exactly once, instance released.
    assert_eq!(harness.establisher.released(), vec![calls[0].0]);
    assert_eq!(harness.manager.pending_setups(), 0);
}

#[tokio::test]
async fn pool_released_once_on_success() {
    let mut harness = Harness::new();
    let p = peer(11);

    harness.connect(p, "cb1").await;
    let calls = harness.resolver.calls();
    harness.resolve(calls[0], global_lookup()).await;

    let session = harness.new_session(3, p, "10.0.0.11");
    harness.establish(calls[0], session, None).await;

    assert_eq!(harness.establisher.released(), vec![calls[0].0]);
}

#[tokio::test]
async fn lookup_submit_failure_fails_caller_immediately() {
    let mut harness = Harness::new();
    harness.resolver.set_reject(true);
    let p = peer(12);

    harness.connect(p, "cb1").await;

    let entries = harness.entries();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].starts_with("cb1:err:"));
    assert_eq!(harness.manager.pending_setups(), 0);
}

#[tokio::test]
async fn establisher_submit_failure_fails_queued_callers() {
    let mut harness = Harness::new();
    let p = peer(13);

    harness.connect(p, "cb1").await;
    let calls = harness.resolver.calls();

    harness.establisher.set_reject(true);
    harness.resolve(calls[0], global_lookup()).await;

    let entries = harness.entries();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].starts_with("cb1:err:"));
    // Nothing was acquired, so nothing is returned to the pool.
    assert!(harness.establisher.released().is_empty());
    assert_eq!(harness.manager.pending_setups(), 0);
}

#[tokio::test]
async fn connect_and_update_instances_coexist_for_one_peer() {
    let mut harness = Harness::new();
    let p = peer(14);

    harness.connect(p, "cb1").await;
    harness.manager.refresh_peer_address(p).unwrap();

    assert_eq!(harness.manager.pending_setups(), 2);

    let calls = harness.resolver.calls();
    assert_eq!(calls.len(), 2);
    let (connect_call, update_call) = (calls[0], calls[1]);
    assert_ne!(connect_call.0, update_call.0);

    // The update completes with a new address; the connect keeps going.
    harness
        .resolve(update_call, LookupResult::new("10.0.0.50".parse().unwrap(), 5540))
        .await;
    assert_eq!(harness.manager.pending_setups(), 1);
    assert!(harness.manager.has_in_flight(&p));

    harness.resolve(connect_call, global_lookup()).await;
    let session = harness.new_session(5, p, "10.0.0.14");
    harness.establish(connect_call, session, None).await;

    assert_eq!(harness.entries(), vec!["cb1:ok:session-5"]);
    assert_eq!(harness.manager.pending_setups(), 0);
}

#[tokio::test]
async fn resumption_record_saved_after_establishment() {
    let mut harness = Harness::new();
    let p = peer(15);

    harness.connect(p, "cb1").await;
    let calls = harness.resolver.calls();
    harness.resolve(calls[0], global_lookup()).await;

    let record = ResumptionRecord {
        resumption_id: [3u8; 16],
    };
    let session = harness.new_session(6, p, "10.0.0.15");
    harness.establish(calls[0], session, Some(record)).await;

    assert_eq!(harness.resumption.find_resumption(&p), Some(record));

    // A later connect for the same peer offers the stored record.
    harness.table.write().await.remove(&p);
    harness.connect(p, "cb2").await;
    let calls = harness.resolver.calls();
    harness.resolve(calls[1], global_lookup()).await;

    let attempts = harness.establisher.calls();
    assert_eq!(attempts.last().unwrap().1.resumption, Some(record));
}

#[tokio::test]
async fn run_loop_drives_events_end_to_end() {
    // Same flow as queued_callers_share_one_operation_fifo, but through
    // run() with events posted on the manager's channel.
    let mut harness = Harness::new();
    let p = peer(16);

    let rx = harness.manager.connect_awaitable(p).await;
    let calls = harness.resolver.calls();
    assert_eq!(calls.len(), 1);

    let events = harness.manager.event_sender();
    let shutdown = harness.manager.shutdown_handle();
    let session = harness.new_session(7, p, "10.0.0.16");

    events
        .send(SetupEvent {
            id: calls[0].0,
            peer: p,
            kind: SetupEventKind::AddressResolved(global_lookup()),
        })
        .unwrap();
    events
        .send(SetupEvent {
            id: calls[0].0,
            peer: p,
            kind: SetupEventKind::SessionEstablished {
                session: session.clone(),
                resumption: None,
            },
        })
        .unwrap();

    let runner = async {
        harness.manager.run().await;
        harness
    };
    let outcome = async move {
        let outcome = rx.await.expect("outcome delivered");
        shutdown.send(()).await.unwrap();
        outcome
    };

    let (harness, outcome) = tokio::join!(runner, outcome);
    let (_, delivered) = outcome.expect("connect succeeds");
    assert_eq!(delivered, session);
    assert_eq!(harness.manager.pending_setups(), 0);
}
