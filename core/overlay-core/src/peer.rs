//! Peer registry and membership lifecycle
//!
//! One [`PeerRecord`] per known remote agent, keyed by the opaque id the
//! rendezvous service assigned it. The record moves through three states:
//!
//! ```text
//! (absent) ──view contains id──► unknown ──introduction──► handshaked
//!    ▲                                                         │
//!    └───────────────view no longer contains id────────────────┘
//! ```
//!
//! All operations here are pure with respect to I/O: the supervisor owns
//! the reconcile cadence and drives sockets and probes; the registry only
//! mutates its map and reports what the caller should do next. That keeps
//! every membership rule unit-testable against a scripted rendezvous view.

use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::ether::MacAddr;
use crate::wire::IntroPayload;

// ============================================================================
// Rendezvous View
// ============================================================================

/// One entry of the rendezvous view: a peer id and its candidate addresses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerObservation {
    /// Rendezvous-assigned peer identifier
    pub id: String,
    /// Candidate `ip:port` strings; the first is the peer's
    /// externally-visible address
    pub addresses: Vec<String>,
}

// ============================================================================
// Peer Record
// ============================================================================

/// Registry entry for one remote agent
#[derive(Debug, Clone)]
pub struct PeerRecord {
    /// Rendezvous-assigned identifier, primary key
    pub id: String,
    /// True until the remote has completed an introduction with us
    pub unknown: bool,
    /// True after a successful introduction in either direction
    pub handshaked: bool,
    /// Candidate UDP endpoints reported by rendezvous, ordered, deduped
    pub known_addresses: Vec<String>,
    /// The selected UDP endpoint currently used to reach this peer
    pub endpoint: Option<SocketAddr>,
    /// The peer's overlay IPv4, learned from its introduction
    pub peer_virtual_ip: Option<Ipv4Addr>,
    /// The peer's overlay MAC, learned from its introduction; routing key
    /// for outbound frames
    pub peer_virtual_mac: Option<MacAddr>,
    /// Reserved for a relay fallback; never consulted
    pub forwarder: Option<SocketAddr>,
    /// Reserved for a relay fallback; never consulted
    pub proxy_id: u32,
}

impl PeerRecord {
    fn new(id: &str) -> PeerRecord {
        PeerRecord {
            id: id.to_string(),
            unknown: true,
            handshaked: false,
            known_addresses: Vec::new(),
            endpoint: None,
            peer_virtual_ip: None,
            peer_virtual_mac: None,
            forwarder: None,
            proxy_id: 0,
        }
    }
}

// ============================================================================
// Peer Registry
// ============================================================================

/// The set of known remote agents, keyed by peer id
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<String, PeerRecord>,
}

impl PeerRegistry {
    /// Create an empty registry
    pub fn new() -> PeerRegistry {
        PeerRegistry {
            peers: HashMap::new(),
        }
    }

    /// Number of known peers
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// True when no peers are known
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Look up a record by peer id
    pub fn get(&self, id: &str) -> Option<&PeerRecord> {
        self.peers.get(id)
    }

    /// The current set of record ids
    pub fn ids(&self) -> HashSet<String> {
        self.peers.keys().cloned().collect()
    }

    /// Remove every record whose id no longer appears in the view
    ///
    /// Returns the number of purged records. Afterwards the record-id set
    /// equals the set of non-empty ids in the view.
    pub fn purge(&mut self, view: &[PeerObservation]) -> usize {
        let live: HashSet<&str> = view.iter().map(|obs| obs.id.as_str()).collect();
        let before = self.peers.len();
        self.peers.retain(|id, _| {
            let keep = live.contains(id.as_str());
            if !keep {
                log::debug!("peer {} left the rendezvous view, removing", id);
            }
            keep
        });
        before - self.peers.len()
    }

    /// Fold the rendezvous view into the registry
    ///
    /// New non-empty ids are inserted as `unknown` records and returned so
    /// the caller can ask the rendezvous service for their addresses.
    /// Addresses are unioned into `known_addresses`; entries equal to `""`
    /// or `"0"` are ignored.
    pub fn merge(&mut self, view: &[PeerObservation]) -> Vec<String> {
        let mut discovered = Vec::new();

        for obs in view {
            if obs.id.is_empty() {
                continue;
            }

            let record = self.peers.entry(obs.id.clone()).or_insert_with(|| {
                log::info!("adding new peer {}", obs.id);
                discovered.push(obs.id.clone());
                PeerRecord::new(&obs.id)
            });

            for addr in &obs.addresses {
                if addr.is_empty() || addr == "0" {
                    continue;
                }
                if !record.known_addresses.iter().any(|known| known == addr) {
                    log::info!("peer {}: new address {}", record.id, addr);
                    record.known_addresses.push(addr.clone());
                }
            }
        }

        discovered
    }

    /// Records awaiting endpoint selection: empty endpoint, non-empty
    /// candidate list. Returned as owned pairs so the caller can probe
    /// without holding a registry lock.
    pub fn unresolved(&self) -> Vec<(String, Vec<String>)> {
        self.peers
            .values()
            .filter(|record| record.endpoint.is_none() && !record.known_addresses.is_empty())
            .map(|record| (record.id.clone(), record.known_addresses.clone()))
            .collect()
    }

    /// Store a selected endpoint on a record
    ///
    /// Returns false if the record disappeared or already has an endpoint
    /// (a concurrent introduction won the race).
    pub fn set_endpoint(&mut self, id: &str, endpoint: SocketAddr) -> bool {
        match self.peers.get_mut(id) {
            Some(record) if record.endpoint.is_none() => {
                log::debug!("peer {}: endpoint {}", id, endpoint);
                record.endpoint = Some(endpoint);
                true
            }
            _ => false,
        }
    }

    /// Peers we still owe an introduction: `unknown` with an endpoint
    pub fn pending_intros(&self) -> Vec<(String, SocketAddr)> {
        self.peers
            .values()
            .filter(|record| record.unknown)
            .filter_map(|record| record.endpoint.map(|ep| (record.id.clone(), ep)))
            .collect()
    }

    /// Apply an inbound introduction received from `source`
    ///
    /// Returns false — and mutates nothing — when the peer at `source` is
    /// already known; the caller drops the message silently. Otherwise the
    /// record is upserted: virtual IP and MAC filled, endpoint bound to
    /// `source`, `unknown` cleared, `handshaked` set. On a MAC collision
    /// the later handshake owns the MAC and the previous owner is demoted
    /// back to `unknown` with its virtual fields cleared.
    pub fn apply_intro(&mut self, source: SocketAddr, intro: &IntroPayload) -> bool {
        if self.is_known(source) {
            return false;
        }

        for record in self.peers.values_mut() {
            if record.id != intro.id && record.peer_virtual_mac == Some(intro.mac) {
                log::warn!(
                    "virtual MAC {} moved from peer {} to peer {}",
                    intro.mac,
                    record.id,
                    intro.id
                );
                record.peer_virtual_mac = None;
                record.peer_virtual_ip = None;
                record.handshaked = false;
                record.unknown = true;
            }
        }

        let record = self
            .peers
            .entry(intro.id.clone())
            .or_insert_with(|| PeerRecord::new(&intro.id));
        record.endpoint = Some(source);
        record.peer_virtual_ip = Some(intro.ip);
        record.peer_virtual_mac = Some(intro.mac);
        record.unknown = false;
        record.handshaked = true;

        log::info!(
            "peer {} handshaked: {} / {} via {}",
            intro.id,
            intro.mac,
            intro.ip,
            source
        );
        true
    }

    /// True when some record already claims `addr` and has completed an
    /// introduction
    pub fn is_known(&self, addr: SocketAddr) -> bool {
        self.peers
            .values()
            .any(|record| record.endpoint == Some(addr) && !record.unknown)
    }

    /// True when `addr` belongs to a handshaked record — gate for inbound
    /// data frames
    pub fn is_handshaked_source(&self, addr: SocketAddr) -> bool {
        self.peers
            .values()
            .any(|record| record.endpoint == Some(addr) && record.handshaked)
    }

    /// Routing lookup: the endpoint of the record owning `mac`
    ///
    /// `None` both for unknown MACs and for records without a selected
    /// endpoint; the caller drops the frame silently either way.
    pub fn endpoint_for_mac(&self, mac: MacAddr) -> Option<SocketAddr> {
        self.peers
            .values()
            .find(|record| record.peer_virtual_mac == Some(mac))
            .and_then(|record| record.endpoint)
    }
}

// ============================================================================
// Tests
// ============================================================================
