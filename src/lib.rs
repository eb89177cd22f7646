//! Operational session establishment for fabric-scoped peers.
//!
//! This crate provides the orchestration layer that turns "connect me to
//! peer P" into an established secure session, including:
//!
//! - Opportunistic reuse of already-established sessions
//! - Asynchronous address resolution with a DNS-backed adapter
//! - Secure channel handshake driving via a pluggable establisher
//! - Strict-FIFO fan-out of the outcome to every queued caller
//! - Address-update-only refresh of cached session addresses
//!
//! # Architecture
//!
//! Each in-flight setup is a single-use state machine owned by the manager.
//! Collaborators never call back directly; they post completions into the
//! manager's loop, which routes them by setup id:
//!
//! ```text
//! SessionSetupManager::run()
//! ├── SessionSetup (peer A, connect)      resolve → establish → fan out
//! ├── SessionSetup (peer B, connect)      resolve → establish → fan out
//! └── SessionSetup (peer A, addr update)  resolve → refresh table
//!          ▲                        │
//!          └── SetupEvent channel ◄─┘  (resolver / establisher completions)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use session_setup::{Collaborators, SessionSetupManager, PeerIdentity, NodeId, FabricIndex};
//!
//! let collaborators = Collaborators::new()
//!     .with_session_table(table)
//!     .with_exchange_manager(exchange)
//!     .with_resolver(resolver)
//!     .with_establisher(establisher)
//!     .with_fabric_table(fabrics)
//!     .with_group_keys(keys);
//!
//! let mut manager = SessionSetupManager::new(collaborators);
//! let peer = PeerIdentity::new(NodeId(0x1234), FabricIndex(1));
//! let outcome = manager.connect_awaitable(peer).await;
//! manager.run().await;
//! ```

pub mod address;
pub mod callbacks;
pub mod config;
pub mod error;
pub mod establisher;
pub mod event;
pub mod fabric;
pub mod manager;
pub mod peer;
pub mod resolver;
pub mod session;
pub mod setup;

// Re-export main types
pub use address::{InterfaceId, ResolvedAddress};
pub use callbacks::{FailureCallback, PendingCallbacks, SuccessCallback};
pub use config::{DnsConfig, ReliabilityConfig};
pub use error::{SetupError, SetupResult};
pub use establisher::{EstablishParams, SessionEstablisher};
pub use event::{EventSender, SetupEvent, SetupEventKind, SetupId};
pub use fabric::{FabricInfo, FabricTable, GroupKey, GroupKeyProvider, StaticGroupKeys};
pub use manager::{ConnectOutcome, SessionSetupManager};
pub use peer::{FabricIndex, NodeId, PeerIdentity};
pub use resolver::{AddressResolver, DnsAddressResolver, LookupResult};
pub use session::{
    ExchangeId, ExchangeManager, MemoryResumptionStore, ResumptionRecord, ResumptionStore,
    SessionHandle, SessionId, SessionTable, SharedSessionTable,
};
pub use setup::{Collaborators, Disposition, SessionSetup, SetupState};
