//! Rendezvous directory client
//!
//! The registry never talks to the directory's internals; it consumes the
//! [`Rendezvous`] contract below. [`DirectoryClient`] implements it over
//! UDP against a bootstrap node:
//!
//! ```text
//! Agent                                   Bootstrap
//!   │                                         │
//!   │─── Register { hash, port, addrs } ─────►│
//!   │◄── Assigned { id } ─────────────────────│
//!   │                                         │
//!   │─── Refresh { hash } ───────────────────►│   (each reconcile tick)
//!   │◄── View { peers } ──────────────────────│
//!   │                                         │
//!   │─── Resolve { id } ─────────────────────►│   (new peer discovered)
//!   │◄── Resolved { id, addresses } ──────────│
//! ```
//!
//! Messages are bincode-encoded, one per datagram. Registration is the
//! only blocking exchange and the only fatal one; after it a background
//! reader folds every response into the current view, which `peers()`
//! snapshots without touching the network.

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, UdpSocket};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use overlay_core::peer::PeerObservation;

// ============================================================================
// Constants
// ============================================================================

/// Default bootstrap node
pub const DEFAULT_BOOTSTRAP: &str = "dht.vptp.io:6881";

/// Registration attempts before giving up
const REGISTER_ATTEMPTS: u32 = 3;

/// Read deadline per registration attempt
const REGISTER_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Contract
// ============================================================================

/// What the reconcile pass consumes from the directory
pub trait Rendezvous: Send + Sync {
    /// Trigger a background fetch; the next `peers()` read reflects it
    fn refresh(&self);

    /// Snapshot of the current view
    fn peers(&self) -> Vec<PeerObservation>;

    /// Ask the service to resolve one peer's addresses more aggressively
    fn request_addresses(&self, id: &str);

    /// Our own id, as assigned by the service
    fn self_id(&self) -> String;
}

// ============================================================================
// Wire Messages
// ============================================================================

/// Directory protocol messages, one per datagram
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirectoryMessage {
    /// Join an overlay: hash, our datagram port, our local addresses
    Register {
        hash: String,
        port: u16,
        addresses: Vec<Ipv4Addr>,
    },
    /// Reply to Register: our assigned peer id
    Assigned { id: String },
    /// Request the current view for an overlay
    Refresh { hash: String },
    /// Reply to Refresh: the full membership view
    View { peers: Vec<PeerObservation> },
    /// Request one peer's addresses
    Resolve { id: String },
    /// Reply to Resolve
    Resolved { id: String, addresses: Vec<String> },
}

// ============================================================================
// Errors
// ============================================================================

/// Directory client failures; only registration surfaces them
#[derive(Debug)]
pub enum DirectoryError {
    Io(io::Error),
    Encode(String),
    /// No `Assigned` reply after all registration attempts
    NoAssignment,
}

impl fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectoryError::Io(e) => write!(f, "directory transport: {}", e),
            DirectoryError::Encode(e) => write!(f, "directory encoding: {}", e),
            DirectoryError::NoAssignment => {
                write!(f, "bootstrap node did not assign an id")
            }
        }
    }
}

impl std::error::Error for DirectoryError {}

impl From<io::Error> for DirectoryError {
    fn from(e: io::Error) -> DirectoryError {
        DirectoryError::Io(e)
    }
}

// ============================================================================
// Client
// ============================================================================

/// UDP directory client
pub struct DirectoryClient {
    socket: UdpSocket,
    hash: String,
    id: String,
    view: Arc<Mutex<Vec<PeerObservation>>>,
}

impl DirectoryClient {
    /// Register with the bootstrap node and obtain our peer id
    ///
    /// Blocks for up to `REGISTER_ATTEMPTS × REGISTER_TIMEOUT`; failure is
    /// fatal to agent startup.
    pub fn connect(
        bootstrap: &str,
        hash: &str,
        port: u16,
        addresses: Vec<Ipv4Addr>,
    ) -> Result<DirectoryClient, DirectoryError> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(bootstrap)?;
        socket.set_read_timeout(Some(REGISTER_TIMEOUT))?;

        let register = DirectoryMessage::Register {
            hash: hash.to_string(),
            port,
            addresses,
        };
        let encoded =
            bincode::serialize(&register).map_err(|e| DirectoryError::Encode(e.to_string()))?;

        let mut buf = [0u8; 2048];
        for attempt in 1..=REGISTER_ATTEMPTS {
            socket.send(&encoded)?;

            match socket.recv(&mut buf) {
                Ok(len) => match bincode::deserialize::<DirectoryMessage>(&buf[..len]) {
                    Ok(DirectoryMessage::Assigned { id }) => {
                        log::info!("directory assigned id {}", id);
                        socket.set_read_timeout(None)?;
                        return Ok(DirectoryClient {
                            socket,
                            hash: hash.to_string(),
                            id,
                            view: Arc::new(Mutex::new(Vec::new())),
                        });
                    }
                    Ok(other) => {
                        log::debug!("unexpected registration reply: {:?}", other);
                    }
                    Err(e) => {
                        log::debug!("registration reply decode: {}", e);
                    }
                },
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    log::warn!(
                        "registration attempt {}/{} timed out",
                        attempt,
                        REGISTER_ATTEMPTS
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(DirectoryError::NoAssignment)
    }

    /// Spawn the response reader that keeps the view current
    pub fn spawn_reader(&self) -> io::Result<thread::JoinHandle<()>> {
        let socket = self.socket.try_clone()?;
        let view = Arc::clone(&self.view);

        thread::Builder::new()
            .name("directory-rx".to_string())
            .spawn(move || {
                let mut buf = [0u8; 65535];
                loop {
                    let len = match socket.recv(&mut buf) {
                        Ok(len) => len,
                        Err(e) => {
                            log::error!("directory recv: {}", e);
                            continue;
                        }
                    };

                    match bincode::deserialize::<DirectoryMessage>(&buf[..len]) {
                        Ok(DirectoryMessage::View { peers }) => {
                            log::debug!("directory view: {} peers", peers.len());
                            *view.lock().expect("view lock poisoned") = peers;
                        }
                        Ok(DirectoryMessage::Resolved { id, addresses }) => {
                            log::debug!("directory resolved {}: {:?}", id, addresses);
                            let mut view = view.lock().expect("view lock poisoned");
                            match view.iter_mut().find(|obs| obs.id == id) {
                                Some(obs) => obs.addresses = addresses,
                                None => view.push(PeerObservation { id, addresses }),
                            }
                        }
                        Ok(other) => {
                            log::debug!("unexpected directory message: {:?}", other);
                        }
                        Err(e) => {
                            log::debug!("directory decode: {}", e);
                        }
                    }
                }
            })
    }

    fn send(&self, msg: &DirectoryMessage) {
        match bincode::serialize(msg) {
            Ok(encoded) => {
                if let Err(e) = self.socket.send(&encoded) {
                    log::error!("directory send: {}", e);
                }
            }
            Err(e) => log::error!("directory encode: {}", e),
        }
    }
}

impl Rendezvous for DirectoryClient {
    fn refresh(&self) {
        self.send(&DirectoryMessage::Refresh {
            hash: self.hash.clone(),
        });
    }

    fn peers(&self) -> Vec<PeerObservation> {
        self.view.lock().expect("view lock poisoned").clone()
    }

    fn request_addresses(&self, id: &str) {
        self.send(&DirectoryMessage::Resolve { id: id.to_string() });
    }

    fn self_id(&self) -> String {
        self.id.clone()
    }
}

// ============================================================================
// Tests
// ============================================================================
