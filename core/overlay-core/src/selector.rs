//! Endpoint selection for multi-homed peers
//!
//! A freshly discovered peer arrives with several candidate addresses: its
//! externally-visible address first, then whatever else it registered. Two
//! agents on the same LAN should talk directly rather than hairpin through
//! the outside world, so candidates that fall inside one of the host's own
//! networks are probed first; the public address is the fallback.
//!
//! ```text
//! for each local network (overlay device excluded):
//!     for each candidate inside that network:
//!         probe ──ok──► select
//! otherwise: first parseable candidate, unvalidated — the introduction
//! exchange that follows confirms reachability
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Read deadline for one liveness probe
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

// ============================================================================
// Local Networks
// ============================================================================

/// One IPv4 network attached to a host interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalNet {
    /// Interface name
    pub name: String,
    /// Interface address
    pub addr: Ipv4Addr,
    /// Interface netmask
    pub mask: Ipv4Addr,
}

impl LocalNet {
    /// The network base address
    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.addr) & u32::from(self.mask))
    }

    /// True when `ip` falls inside this network
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & u32::from(self.mask) == u32::from(self.network())
    }
}

// ============================================================================
// Liveness Probe
// ============================================================================

/// The liveness check run against a candidate endpoint
///
/// The production implementation opens a short-lived connected UDP socket,
/// sends one TEST message and waits [`PROBE_TIMEOUT`] for any byte back.
pub trait Probe {
    fn probe(&self, candidate: SocketAddr) -> bool;
}

// ============================================================================
// Selection
// ============================================================================

/// Pick the endpoint used to reach a peer
///
/// LAN-scoped candidates must pass the probe; if none does, the first
/// parseable candidate — the rendezvous-reported public address — is
/// accepted unconditionally. `None` only when no candidate parses at all.
pub fn select_endpoint(
    candidates: &[String],
    local_nets: &[LocalNet],
    probe: &dyn Probe,
) -> Option<SocketAddr> {
    for net in local_nets {
        for candidate in candidates {
            let addr: SocketAddr = match candidate.parse() {
                Ok(addr) => addr,
                Err(_) => continue,
            };
            let ip = match addr.ip() {
                IpAddr::V4(ip) => ip,
                IpAddr::V6(_) => continue,
            };
            if !net.contains(ip) {
                continue;
            }
            log::debug!(
                "probing candidate {} against network {}/{} ({})",
                addr,
                net.network(),
                net.mask,
                net.name
            );
            if probe.probe(addr) {
                return Some(addr);
            }
        }
    }

    candidates
        .iter()
        .find_map(|candidate| candidate.parse().ok())
}

// ============================================================================
// Tests
// ============================================================================
