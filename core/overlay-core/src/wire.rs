//! On-wire message framing between overlay agents
//!
//! Every datagram exchanged between agents is a fixed header followed by an
//! opaque payload:
//!
//! ```text
//! ┌──────────────┬──────────────┬──────────────┬──────────────────┐
//! │ type (2B BE) │ len  (2B BE) │ seq  (2B BE) │ payload (len B)  │
//! └──────────────┴──────────────┴──────────────┴──────────────────┘
//! ```
//!
//! Type values are part of the protocol and must be identical on every
//! agent in an overlay. The codec is pure: it performs no I/O and holds no
//! state, and `parse(serialize(m)) == m` for every well-formed message.

use std::fmt;
use std::net::Ipv4Addr;

use crate::ether::MacAddr;

// ============================================================================
// Constants
// ============================================================================

/// Size of the fixed message header in bytes
pub const HEADER_LEN: usize = 6;

/// Payload of every TEST message
pub const TEST_PAYLOAD: &[u8] = b"TEST";

// ============================================================================
// Message Types
// ============================================================================

/// Known wire message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MsgType {
    /// Introduction handshake carrying `"<id>,<mac>,<ip>"`
    Intro = 1,
    /// Liveness probe; echoed back by the receiver
    Test = 2,
    /// A complete Ethernet frame, unencrypted
    DataPlain = 3,
    /// Reserved for an AEAD-framed data variant; never produced
    DataEncrypted = 4,
}

impl MsgType {
    /// Map a raw header value to a known type
    pub fn from_u16(value: u16) -> Option<MsgType> {
        match value {
            1 => Some(MsgType::Intro),
            2 => Some(MsgType::Test),
            3 => Some(MsgType::DataPlain),
            4 => Some(MsgType::DataEncrypted),
            _ => None,
        }
    }
}

// ============================================================================
// Message
// ============================================================================

/// A framed wire message
///
/// `kind` is kept as the raw header value so that unrecognized types pass
/// through parsing and are dropped at dispatch, not treated as corruption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Raw message-type field
    pub kind: u16,
    /// Sequence/flags word reserved for the codec
    pub seq: u16,
    /// Opaque payload
    pub payload: Vec<u8>,
}

impl Message {
    /// Create an introduction message
    pub fn intro(payload: &str, seq: u16) -> Message {
        Message {
            kind: MsgType::Intro as u16,
            seq,
            payload: payload.as_bytes().to_vec(),
        }
    }

    /// Create a TEST probe message
    pub fn test() -> Message {
        Message {
            kind: MsgType::Test as u16,
            seq: 0,
            payload: TEST_PAYLOAD.to_vec(),
        }
    }

    /// Create a plain data message carrying a complete Ethernet frame
    pub fn data(frame: &[u8]) -> Message {
        Message {
            kind: MsgType::DataPlain as u16,
            seq: 0,
            payload: frame.to_vec(),
        }
    }

    /// The recognized message type, if any
    pub fn msg_type(&self) -> Option<MsgType> {
        MsgType::from_u16(self.kind)
    }

    /// Serialize to a single wire buffer
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&self.kind.to_be_bytes());
        buf.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.seq.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse a message from a received buffer
    ///
    /// Trailing bytes beyond the declared payload length are ignored — the
    /// receive path hands over a reused buffer slice.
    pub fn parse(buf: &[u8]) -> Result<Message, WireError> {
        if buf.len() < HEADER_LEN {
            return Err(WireError::MalformedHeader(buf.len()));
        }

        let kind = u16::from_be_bytes([buf[0], buf[1]]);
        let length = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        let seq = u16::from_be_bytes([buf[4], buf[5]]);

        if buf.len() < HEADER_LEN + length {
            return Err(WireError::TruncatedPayload {
                declared: length,
                available: buf.len() - HEADER_LEN,
            });
        }

        Ok(Message {
            kind,
            seq,
            payload: buf[HEADER_LEN..HEADER_LEN + length].to_vec(),
        })
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors produced by the framing codec
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Buffer shorter than the fixed header
    MalformedHeader(usize),
    /// Declared payload length exceeds the remaining bytes
    TruncatedPayload { declared: usize, available: usize },
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::MalformedHeader(len) => {
                write!(f, "malformed header: {} bytes, need {}", len, HEADER_LEN)
            }
            WireError::TruncatedPayload { declared, available } => {
                write!(
                    f,
                    "truncated payload: declared {} bytes, {} available",
                    declared, available
                )
            }
        }
    }
}

impl std::error::Error for WireError {}

// ============================================================================
// Introduction Payload
// ============================================================================

/// The handshake payload binding a peer id to its overlay MAC and IPv4
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntroPayload {
    /// Rendezvous-assigned peer identifier
    pub id: String,
    /// The peer's TAP interface MAC
    pub mac: MacAddr,
    /// The peer's overlay IPv4 address
    pub ip: Ipv4Addr,
}

impl IntroPayload {
    /// Render the `"<id>,<mac>,<ip>"` wire form
    pub fn encode(&self) -> String {
        format!("{},{},{}", self.id, self.mac, self.ip)
    }

    /// Parse the wire form; exactly two commas, valid MAC, dotted-quad IP
    pub fn parse(s: &str) -> Result<IntroPayload, IntroParseError> {
        let parts: Vec<&str> = s.split(',').collect();
        if parts.len() != 3 {
            return Err(IntroParseError::FieldCount(parts.len()));
        }

        let mac: MacAddr = parts[1]
            .parse()
            .map_err(|_| IntroParseError::BadMac(parts[1].to_string()))?;

        let ip: Ipv4Addr = parts[2]
            .parse()
            .map_err(|_| IntroParseError::BadIp(parts[2].to_string()))?;

        Ok(IntroPayload {
            id: parts[0].to_string(),
            mac,
            ip,
        })
    }
}

/// Errors parsing an introduction payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntroParseError {
    /// Wrong number of comma-separated fields
    FieldCount(usize),
    /// Second field is not a valid Ethernet address
    BadMac(String),
    /// Third field is not a dotted-quad IPv4 address
    BadIp(String),
}

impl fmt::Display for IntroParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntroParseError::FieldCount(n) => {
                write!(f, "introduction has {} fields, expected 3", n)
            }
            IntroParseError::BadMac(s) => write!(f, "invalid MAC in introduction: {:?}", s),
            IntroParseError::BadIp(s) => write!(f, "invalid IP in introduction: {:?}", s),
        }
    }
}

impl std::error::Error for IntroParseError {}

// ============================================================================
// Tests
// ============================================================================
