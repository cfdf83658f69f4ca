//! TAP virtual interface adapter
//!
//! Opens the clone device `/dev/net/tun` in TAP mode with packet info
//! enabled, so every read and write carries a 4-byte prefix:
//!
//! ```text
//! ┌────────────┬───────────────────┬──────────────────────┐
//! │ flags (2B) │ EtherType (2B BE) │ Ethernet frame       │
//! └────────────┴───────────────────┴──────────────────────┘
//! ```
//!
//! The kernel sets `TUN_PKT_STRIP` in the flags when a frame did not fit
//! the read buffer. Reads are single-threaded; writes may come from any
//! thread (one frame per write, never interleaved).
//!
//! Address, MAC and link state are configured by shelling out to the
//! host's ip tool, which is the only supported configuration path.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::net::Ipv4Addr;
use std::os::unix::io::AsRawFd;
use std::process::Command;

use overlay_core::ether::MacAddr;

// ============================================================================
// Constants
// ============================================================================

const TUNSETIFF: libc::c_ulong = 0x4004_54ca;
const IFF_TAP: i16 = 0x0002;
const TUN_PKT_STRIP: u16 = 0x0001;
const IFNAMSIZ: usize = 16;

/// Packet-info prefix on every TAP read and write
const PI_LEN: usize = 4;

/// Largest frame accepted from the kernel in one read
const FRAME_BUF_LEN: usize = 4096;

/// Prefix of generated device names
const DEVICE_PREFIX: &str = "vptp";

// ============================================================================
// Errors
// ============================================================================

/// TAP setup failures; all of them are fatal to the agent
#[derive(Debug)]
pub enum TapError {
    /// Opening or binding the clone device failed
    Open(io::Error),
    /// A network-config tool invocation failed
    DeviceConfig { step: &'static str, detail: String },
}

impl fmt::Display for TapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TapError::Open(e) => write!(f, "failed to open TAP device: {}", e),
            TapError::DeviceConfig { step, detail } => {
                write!(f, "device configuration failed at {}: {}", step, detail)
            }
        }
    }
}

impl std::error::Error for TapError {}

// ============================================================================
// Frames
// ============================================================================

/// One frame read from the TAP device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapFrame {
    /// EtherType from the packet-info prefix
    pub proto: u16,
    /// Frame did not fit the read buffer
    pub truncated: bool,
    /// The Ethernet frame itself
    pub frame: Vec<u8>,
}

/// Where inbound overlay frames are written
///
/// Implemented by [`TapDevice`] in production and by an in-memory
/// collector in the integration tests.
pub trait FrameSink: Send + Sync {
    fn write_frame(&self, proto: u16, frame: &[u8]) -> io::Result<()>;
}

// ============================================================================
// TAP Device
// ============================================================================

#[repr(C)]
struct IfReq {
    ifr_name: [u8; IFNAMSIZ],
    ifr_flags: i16,
    _pad: [u8; 22],
}

/// An open TAP interface
#[derive(Debug)]
pub struct TapDevice {
    file: File,
    name: String,
}

impl TapDevice {
    /// Open a TAP interface with the given name
    pub fn open(name: &str) -> Result<TapDevice, TapError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/net/tun")
            .map_err(TapError::Open)?;

        let mut req = IfReq {
            ifr_name: [0u8; IFNAMSIZ],
            ifr_flags: IFF_TAP,
            _pad: [0u8; 22],
        };
        let name_bytes = name.as_bytes();
        if name_bytes.len() >= IFNAMSIZ {
            return Err(TapError::Open(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("device name too long: {:?}", name),
            )));
        }
        req.ifr_name[..name_bytes.len()].copy_from_slice(name_bytes);

        let rc = unsafe { libc::ioctl(file.as_raw_fd(), TUNSETIFF, &req) };
        if rc < 0 {
            return Err(TapError::Open(io::Error::last_os_error()));
        }

        log::info!("{} TAP device created", name);
        Ok(TapDevice {
            file,
            name: name.to_string(),
        })
    }

    /// The interface name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read one frame; blocks until the kernel has one
    pub fn read_frame(&self) -> io::Result<TapFrame> {
        let mut buf = [0u8; PI_LEN + FRAME_BUF_LEN];
        let len = (&self.file).read(&mut buf)?;
        if len < PI_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "short TAP read",
            ));
        }

        let flags = u16::from_ne_bytes([buf[0], buf[1]]);
        let proto = u16::from_be_bytes([buf[2], buf[3]]);

        Ok(TapFrame {
            proto,
            truncated: flags & TUN_PKT_STRIP != 0,
            frame: buf[PI_LEN..len].to_vec(),
        })
    }

    /// Enqueue one frame to the kernel under the given EtherType
    pub fn write_frame(&self, proto: u16, frame: &[u8]) -> io::Result<()> {
        let mut buf = Vec::with_capacity(PI_LEN + frame.len());
        buf.extend_from_slice(&0u16.to_ne_bytes());
        buf.extend_from_slice(&proto.to_be_bytes());
        buf.extend_from_slice(frame);
        (&self.file).write_all(&buf)
    }

    /// Bring the interface up and assign its address and MAC
    ///
    /// Three ip-tool invocations: link-up, address-add with a `/24` mask,
    /// MAC assignment. Any non-zero exit is fatal.
    pub fn configure(&self, iptool: &str, ip: Ipv4Addr, mac: MacAddr) -> Result<(), TapError> {
        run_tool(iptool, &["link", "set", "dev", &self.name, "up"], "link-up")?;

        log::info!("setting {} on device {}", ip, self.name);
        let cidr = format!("{}/24", ip);
        run_tool(
            iptool,
            &["addr", "add", &cidr, "dev", &self.name],
            "addr-add",
        )?;

        log::info!("setting {} on device {}", mac, self.name);
        let mac_str = mac.to_string();
        run_tool(
            iptool,
            &["link", "set", "dev", &self.name, "address", &mac_str],
            "mac-assign",
        )?;

        Ok(())
    }
}

impl FrameSink for TapDevice {
    fn write_frame(&self, proto: u16, frame: &[u8]) -> io::Result<()> {
        TapDevice::write_frame(self, proto, frame)
    }
}

fn run_tool(iptool: &str, args: &[&str], step: &'static str) -> Result<(), TapError> {
    let status = Command::new(iptool)
        .args(args)
        .status()
        .map_err(|e| TapError::DeviceConfig {
            step,
            detail: e.to_string(),
        })?;

    if !status.success() {
        return Err(TapError::DeviceConfig {
            step,
            detail: format!("{} exited with {}", iptool, status),
        });
    }
    Ok(())
}

// ============================================================================
// Device Names
// ============================================================================

/// First `vptp<i>` name, `i` counting from 1, not already present on the
/// host
pub fn generate_device_name(existing: &[String]) -> String {
    let mut i = 1u32;
    loop {
        let name = format!("{}{}", DEVICE_PREFIX, i);
        if !existing.iter().any(|taken| *taken == name) {
            return name;
        }
        i += 1;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_generate_device_name_first_free() {
        assert_eq!(generate_device_name(&[]), "vptp1");
        assert_eq!(
            generate_device_name(&strings(&["eth0", "lo"])),
            "vptp1"
        );
    }

    #[test]
    fn test_generate_device_name_skips_taken() {
        assert_eq!(
            generate_device_name(&strings(&["vptp1", "vptp2"])),
            "vptp3"
        );
        assert_eq!(generate_device_name(&strings(&["vptp2"])), "vptp1");
    }

    #[test]
    fn test_open_rejects_overlong_name() {
        let err = TapDevice::open("a-device-name-way-beyond-ifnamsiz").unwrap_err();
        assert!(matches!(err, TapError::Open(_)));
    }

    #[test]
    fn test_config_error_display() {
        let err = TapError::DeviceConfig {
            step: "addr-add",
            detail: "exit status 2".to_string(),
        };
        assert_eq!(
            format!("{}", err),
            "device configuration failed at addr-add: exit status 2"
        );
    }
}
