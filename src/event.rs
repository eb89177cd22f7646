//! Events posted back into the setup manager's loop.

use std::fmt;

use tokio::sync::mpsc;

use crate::error::SetupError;
use crate::peer::PeerIdentity;
use crate::resolver::LookupResult;
use crate::session::{ResumptionRecord, SessionHandle};

/// Correlation key for one session setup instance.
///
/// Allocated by the manager; the resolver and establisher echo it back so
/// completions reach the instance that submitted the request, even when a
/// connect-mode and an address-update-mode setup coexist for one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SetupId(pub u64);

impl fmt::Display for SetupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "setup-{}", self.0)
    }
}

/// A completion delivered by a collaborator.
#[derive(Debug)]
pub struct SetupEvent {
    /// The setup instance the completion belongs to.
    pub id: SetupId,
    /// The peer the request was issued for.
    pub peer: PeerIdentity,
    /// What completed.
    pub kind: SetupEventKind,
}

/// The kinds of collaborator completions.
#[derive(Debug)]
pub enum SetupEventKind {
    /// The resolver found an address for the peer.
    AddressResolved(LookupResult),
    /// The resolver gave up on the peer.
    ResolutionFailed(SetupError),
    /// The establisher completed a handshake.
    SessionEstablished {
        /// The freshly established session.
        session: SessionHandle,
        /// Resumption state agreed during the handshake, if any.
        resumption: Option<ResumptionRecord>,
    },
    /// The establisher failed the handshake.
    EstablishmentFailed(SetupError),
}

/// Sender half collaborators use to post completions into the loop.
pub type EventSender = mpsc::UnboundedSender<SetupEvent>;

/// Receiver half drained by the manager.
pub type EventReceiver = mpsc::UnboundedReceiver<SetupEvent>;
