//! Secure channel establishment seam.

use crate::address::ResolvedAddress;
use crate::config::ReliabilityConfig;
use crate::error::SetupResult;
use crate::event::{EventSender, SetupId};
use crate::fabric::GroupKey;
use crate::peer::PeerIdentity;
use crate::session::ResumptionRecord;

/// Everything an establisher needs to run one handshake attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EstablishParams {
    /// The peer to authenticate against.
    pub peer: PeerIdentity,
    /// Where the peer was resolved to.
    pub address: ResolvedAddress,
    /// Reliability parameters for the handshake exchange.
    pub reliability: ReliabilityConfig,
    /// Identity protection key for the peer's fabric, if provisioned.
    pub group_key: Option<GroupKey>,
    /// Resumption state from a prior session, if stored.
    pub resumption: Option<ResumptionRecord>,
}

/// Pool of secure channel establishers.
///
/// `establish_session` returning `Ok` means the caller holds one pooled
/// establisher until it calls [`SessionEstablisher::release`], and exactly
/// one `SessionEstablished` or `EstablishmentFailed` event will be posted
/// for `id`. An `Err` is a synchronous-submission failure (for instance
/// pool exhaustion): nothing is held and no event follows.
pub trait SessionEstablisher: Send + Sync {
    /// Start a handshake attempt.
    fn establish_session(
        &self,
        id: SetupId,
        params: EstablishParams,
        events: EventSender,
    ) -> SetupResult<()>;

    /// Return the establisher acquired for `id` to the pool. Called exactly
    /// once per successful `establish_session`, on every outcome.
    fn release(&self, id: SetupId) {
        let _ = id;
    }
}
