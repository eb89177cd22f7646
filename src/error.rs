//! Session setup error types.

use thiserror::Error;

use crate::peer::{FabricIndex, PeerIdentity};

/// Errors surfaced while establishing a session with a peer.
///
/// Every variant owns its payload so a single error can be cloned into each
/// queued failure callback during fan-out.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SetupError {
    /// The resolver rejected the lookup request synchronously.
    #[error("Lookup submit failed for {peer}: {reason}")]
    LookupSubmitFailed { peer: PeerIdentity, reason: String },

    /// Address resolution completed without finding the peer.
    #[error("Peer not resolved: {peer}: {reason}")]
    PeerNotResolved { peer: PeerIdentity, reason: String },

    /// The secure channel handshake failed.
    #[error("Session establishment failed: {0}")]
    EstablishmentFailed(String),

    /// No establisher could be acquired from the pool.
    #[error("No session establisher available: {0}")]
    EstablisherBusy(String),

    /// The peer's fabric is not present in the fabric table.
    #[error("Unknown fabric: {0}")]
    UnknownFabric(FabricIndex),

    /// The owning manager is shutting down.
    #[error("Shutting down")]
    Shutdown,
}

/// Result type for session setup operations.
pub type SetupResult<T> = Result<T, SetupError>;
