//! Peer address resolution.
//!
//! The orchestrator consumes resolution through the [`AddressResolver`]
//! seam: submission is synchronous, results come back as events on the
//! manager's loop. [`DnsAddressResolver`] is the bundled adapter mapping
//! peer identities to DNS hostnames.

use std::net::IpAddr;

use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

use crate::address::InterfaceId;
use crate::config::{DnsConfig, ReliabilityConfig};
use crate::error::{SetupError, SetupResult};
use crate::event::{EventSender, SetupEvent, SetupEventKind, SetupId};
use crate::peer::PeerIdentity;

/// What discovery reported for a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupResult {
    /// Resolved IP address.
    pub ip: IpAddr,
    /// Port the peer listens on.
    pub port: u16,
    /// Interface the answer arrived on, when the transport reports one.
    pub interface: Option<InterfaceId>,
    /// Reliability parameters the peer advertised alongside its address.
    pub reliability: Option<ReliabilityConfig>,
}

impl LookupResult {
    /// Create a result with no interface or advertised parameters.
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self {
            ip,
            port,
            interface: None,
            reliability: None,
        }
    }

    /// Set the reporting interface.
    pub fn with_interface(mut self, interface: Option<InterfaceId>) -> Self {
        self.interface = interface;
        self
    }

    /// Set the advertised reliability parameters.
    pub fn with_reliability(mut self, reliability: Option<ReliabilityConfig>) -> Self {
        self.reliability = reliability;
        self
    }
}

/// Asynchronous peer address resolver.
///
/// `start_lookup` returning `Ok` means exactly one `AddressResolved` or
/// `ResolutionFailed` event will eventually be posted for `id`. An `Err` is
/// the synchronous-submission failure: no event follows.
pub trait AddressResolver: Send + Sync {
    /// Submit a lookup for a peer.
    fn start_lookup(&self, id: SetupId, peer: PeerIdentity, events: EventSender)
        -> SetupResult<()>;
}

/// DNS-backed address resolver.
///
/// Resolves `<node-hex>.<fabric-index>.<base-domain>` via plain address
/// records. Deployments with service records that advertise ports or
/// retransmission intervals should supply their own [`AddressResolver`].
pub struct DnsAddressResolver {
    resolver: TokioAsyncResolver,
    config: DnsConfig,
}

impl DnsAddressResolver {
    /// Create a resolver with the system-default DNS configuration.
    pub fn new() -> Self {
        Self::with_config(DnsConfig::default())
    }

    /// Create a resolver with explicit lookup configuration.
    pub fn with_config(config: DnsConfig) -> Self {
        let resolver =
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
        Self { resolver, config }
    }

    /// The hostname a peer identity maps to.
    pub fn hostname_for(&self, peer: &PeerIdentity) -> String {
        format!(
            "{:016X}.{:02X}.{}",
            peer.node_id.0, peer.fabric_index.0, self.config.base_domain
        )
    }
}

impl Default for DnsAddressResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressResolver for DnsAddressResolver {
    fn start_lookup(
        &self,
        id: SetupId,
        peer: PeerIdentity,
        events: EventSender,
    ) -> SetupResult<()> {
        let hostname = self.hostname_for(&peer);
        let resolver = self.resolver.clone();
        let port = self.config.default_port;
        let lookup_timeout = self.config.lookup_timeout;

        tracing::debug!(id = %id, peer = %peer, hostname, "Submitting DNS lookup");

        tokio::spawn(async move {
            let outcome =
                tokio::time::timeout(lookup_timeout, resolver.lookup_ip(hostname.clone())).await;

            let kind = match outcome {
                Ok(Ok(response)) => match response.iter().next() {
                    Some(ip) => {
                        tracing::debug!(peer = %peer, ip = %ip, "DNS lookup resolved");
                        SetupEventKind::AddressResolved(LookupResult::new(ip, port))
                    }
                    None => SetupEventKind::ResolutionFailed(SetupError::PeerNotResolved {
                        peer,
                        reason: "no address records".to_string(),
                    }),
                },
                Ok(Err(error)) => {
                    tracing::warn!(peer = %peer, hostname, error = %error, "DNS lookup failed");
                    SetupEventKind::ResolutionFailed(SetupError::PeerNotResolved {
                        peer,
                        reason: error.to_string(),
                    })
                }
                Err(_) => SetupEventKind::ResolutionFailed(SetupError::PeerNotResolved {
                    peer,
                    reason: "lookup timed out".to_string(),
                }),
            };

            if events.send(SetupEvent { id, peer, kind }).is_err() {
                tracing::debug!(id = %id, peer = %peer, "Lookup completion dropped, manager gone");
            }
        });

        Ok(())
    }
}
