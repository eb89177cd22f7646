//! Session setup configuration.

use std::time::Duration;

/// Default retransmission interval while the peer is believed idle.
pub const DEFAULT_IDLE_RETRANSMIT: Duration = Duration::from_millis(500);

/// Default retransmission interval while the peer is believed active.
pub const DEFAULT_ACTIVE_RETRANSMIT: Duration = Duration::from_millis(300);

/// Default window after which an active peer is considered idle again.
pub const DEFAULT_ACTIVE_THRESHOLD: Duration = Duration::from_millis(4000);

/// Default port peers listen on for secure sessions.
pub const DEFAULT_SESSION_PORT: u16 = 5540;

/// Default timeout for a single address lookup.
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Default base domain for DNS-based peer lookups.
pub const DEFAULT_BASE_DOMAIN: &str = "_svc.local";

/// Reliable-messaging parameters negotiated for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReliabilityConfig {
    /// Retransmission interval while the peer is idle.
    pub idle_retransmit: Duration,
    /// Retransmission interval while the peer is active.
    pub active_retransmit: Duration,
    /// How long after the last exchange the peer counts as active.
    pub active_threshold: Duration,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            idle_retransmit: DEFAULT_IDLE_RETRANSMIT,
            active_retransmit: DEFAULT_ACTIVE_RETRANSMIT,
            active_threshold: DEFAULT_ACTIVE_THRESHOLD,
        }
    }
}

impl ReliabilityConfig {
    /// Create a configuration with explicit retransmission intervals.
    pub fn new(idle_retransmit: Duration, active_retransmit: Duration) -> Self {
        Self {
            idle_retransmit,
            active_retransmit,
            ..Default::default()
        }
    }

    /// Set the idle retransmission interval.
    pub fn with_idle_retransmit(mut self, interval: Duration) -> Self {
        self.idle_retransmit = interval;
        self
    }

    /// Set the active retransmission interval.
    pub fn with_active_retransmit(mut self, interval: Duration) -> Self {
        self.active_retransmit = interval;
        self
    }

    /// Set the active threshold.
    pub fn with_active_threshold(mut self, threshold: Duration) -> Self {
        self.active_threshold = threshold;
        self
    }
}

/// Configuration for the DNS-based address resolver adapter.
#[derive(Debug, Clone)]
pub struct DnsConfig {
    /// Base domain appended to per-peer hostnames.
    pub base_domain: String,
    /// Port assumed for peers discovered via plain address records.
    pub default_port: u16,
    /// Timeout for a single lookup.
    pub lookup_timeout: Duration,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            base_domain: DEFAULT_BASE_DOMAIN.to_string(),
            default_port: DEFAULT_SESSION_PORT,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }
}

impl DnsConfig {
    /// Set the base domain for peer hostnames.
    pub fn with_base_domain(mut self, domain: String) -> Self {
        self.base_domain = domain;
        self
    }

    /// Set the port assumed for discovered peers.
    pub fn with_default_port(mut self, port: u16) -> Self {
        self.default_port = port;
        self
    }

    /// Set the lookup timeout.
    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }
}
