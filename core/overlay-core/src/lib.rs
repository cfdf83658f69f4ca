//! Overlay agent core
//!
//! This crate provides the protocol and state layer for the P2P layer-2
//! overlay agent:
//! - Wire message framing between agents
//! - Ethernet address and EtherType handling
//! - The peer registry and its membership lifecycle
//! - Endpoint selection for newly discovered peers
//!
//! Everything here is I/O-free: sockets, TAP devices and subprocesses live
//! in the `overlay-agent` crate. The only outward dependency is the
//! [`selector::Probe`] trait, which the agent implements with a real UDP
//! liveness check and tests implement with a script.

// ============================================================================
// Modules
// ============================================================================

/// Ethernet addresses and EtherType constants
pub mod ether;

/// Peer registry and membership lifecycle
pub mod peer;

/// Endpoint selection for multi-homed peers
pub mod selector;

/// On-wire message framing between agents
pub mod wire;

// ============================================================================
// Constants
// ============================================================================

/// Datagram payload cap shared by the endpoint and probe sockets.
/// Larger datagrams are truncated and flagged to the handler.
pub const RECV_BUF_LEN: usize = 4096;

// Re-export commonly used types
pub use ether::MacAddr;
pub use peer::{PeerObservation, PeerRecord, PeerRegistry};
pub use selector::{select_endpoint, LocalNet, Probe};
pub use wire::{IntroPayload, Message, MsgType, WireError};
