//! Resolved transport addresses.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use crate::resolver::LookupResult;

/// Identifier of a local network interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceId(pub u32);

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "if{}", self.0)
    }
}

/// Transport address a peer was resolved to.
///
/// The reporting interface is retained only for link-local addresses.
/// Off-link addresses must be routed normally rather than pinned to the
/// interface that happened to answer the discovery query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedAddress {
    /// IP address of the peer.
    pub ip: IpAddr,
    /// Port the peer listens on.
    pub port: u16,
    /// Interface the address was reported on, link-local only.
    pub interface: Option<InterfaceId>,
}

impl ResolvedAddress {
    /// Create an address with no bound interface.
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self {
            ip,
            port,
            interface: None,
        }
    }

    /// Build an address from a resolver result.
    ///
    /// Keeps the reporting interface only when the address is link-local.
    pub fn from_lookup(result: &LookupResult) -> Self {
        let interface = if is_link_local(&result.ip) {
            result.interface
        } else {
            None
        };

        Self {
            ip: result.ip,
            port: result.port,
            interface,
        }
    }

    /// The address as a socket address, ignoring any bound interface.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl fmt::Display for ResolvedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.interface {
            Some(interface) => write!(f, "{}%{}:{}", self.ip, interface, self.port),
            None => write!(f, "{}", self.socket_addr()),
        }
    }
}

/// Check whether an address is link-local (IPv6 fe80::/10, IPv4 169.254/16).
fn is_link_local(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => addr.is_link_local(),
        IpAddr::V6(addr) => (addr.segments()[0] & 0xffc0) == 0xfe80,
    }
}
