//! Overlay agent runtime
//!
//! Everything that touches the outside world lives here: the UDP datagram
//! endpoint, the TAP virtual interface, the rendezvous directory client,
//! the frame router joining them, and the periodic reconcile pass. The
//! binary in `main.rs` wires these together in the supervisor order and
//! runs the long-lived tasks; the modules themselves are importable so the
//! integration tests can assemble agents in-process.

pub mod ifaces;
pub mod keystore;
pub mod metrics;
pub mod reconcile;
pub mod rendezvous;
pub mod router;
pub mod tap;
pub mod udp;
