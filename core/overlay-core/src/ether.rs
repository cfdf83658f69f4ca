//! Ethernet addresses and EtherType constants
//!
//! The TAP read path tags every frame with its EtherType; the router keys
//! its demultiplexer on the constants below. `MacAddr` is the routing key
//! for outbound frames — the registry maps a peer's virtual MAC to the UDP
//! endpoint that reaches it.

use std::fmt;
use std::str::FromStr;

use ring::rand::{SecureRandom, SystemRandom};

// ============================================================================
// EtherType Constants
// ============================================================================

/// PARC Universal Packet
pub const ETH_P_PUP: u16 = 0x0200;
/// IPv4
pub const ETH_P_IP: u16 = 0x0800;
/// ARP — the overlay must carry ARP to function
pub const ETH_P_ARP: u16 = 0x0806;
/// Reverse ARP
pub const ETH_P_RARP: u16 = 0x8035;
/// 802.1q VLAN tag
pub const ETH_P_8021Q: u16 = 0x8100;
/// IPv6
pub const ETH_P_IPV6: u16 = 0x86DD;
/// PPPoE discovery stage
pub const ETH_P_PPPOE_DISC: u16 = 0x8863;
/// PPPoE session stage
pub const ETH_P_PPPOE_SESS: u16 = 0x8864;

/// Minimum Ethernet header: dst (6) + src (6) + EtherType (2)
pub const ETH_HEADER_LEN: usize = 14;

// ============================================================================
// MacAddr
// ============================================================================

/// A 48-bit Ethernet address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// The raw octets
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// True when the locally-administered bit is set on the first octet
    pub fn is_locally_administered(&self) -> bool {
        self.0[0] & 0x02 != 0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// Error parsing a colon-hex Ethernet address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacParseError(pub String);

impl fmt::Display for MacParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid Ethernet address: {:?}", self.0)
    }
}

impl std::error::Error for MacParseError {}

impl FromStr for MacAddr {
    type Err = MacParseError;

    fn from_str(s: &str) -> Result<MacAddr, MacParseError> {
        let mut octets = [0u8; 6];
        let mut count = 0;

        for part in s.split(':') {
            if count == 6 || part.len() != 2 {
                return Err(MacParseError(s.to_string()));
            }
            octets[count] =
                u8::from_str_radix(part, 16).map_err(|_| MacParseError(s.to_string()))?;
            count += 1;
        }

        if count != 6 {
            return Err(MacParseError(s.to_string()));
        }
        Ok(MacAddr(octets))
    }
}

/// Generate a locally-administered MAC for the TAP device
///
/// The first octet is fixed to `0x06`, the canonical locally-administered
/// value used across the overlay; the remaining five octets are random.
pub fn generate_mac() -> MacAddr {
    let rng = SystemRandom::new();
    let mut buf = [0u8; 6];
    rng.fill(&mut buf).expect("SystemRandom failed");
    buf[0] = 0x06;
    MacAddr(buf)
}

/// Extract the destination MAC from an Ethernet frame
///
/// Returns `None` for frames shorter than the Ethernet header.
pub fn dst_mac(frame: &[u8]) -> Option<MacAddr> {
    if frame.len() < ETH_HEADER_LEN {
        return None;
    }
    let mut octets = [0u8; 6];
    octets.copy_from_slice(&frame[..6]);
    Some(MacAddr(octets))
}

// ============================================================================
// Tests
// ============================================================================
