//! Local interface discovery
//!
//! A single `getifaddrs` walk feeds three consumers: the global-unicast
//! address list registered with the rendezvous service, the local-network
//! list the endpoint selector probes against (with the overlay's own
//! device excluded), and the interface-name set used when generating a
//! fresh TAP device name.

use std::ffi::CStr;
use std::net::Ipv4Addr;

use overlay_core::selector::LocalNet;

// ============================================================================
// Enumeration
// ============================================================================

/// One IPv4 address attached to a host interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfaceAddr {
    /// Interface name
    pub name: String,
    /// Interface IPv4 address
    pub addr: Ipv4Addr,
    /// Interface netmask
    pub mask: Ipv4Addr,
}

/// Enumerate every IPv4 interface address on the host
#[cfg(unix)]
pub fn enumerate() -> Vec<IfaceAddr> {
    let mut out = Vec::new();

    unsafe {
        let mut ifaddrs: *mut libc::ifaddrs = std::ptr::null_mut();
        if libc::getifaddrs(&mut ifaddrs) != 0 {
            log::error!("failed to retrieve network interfaces");
            return out;
        }

        let mut current = ifaddrs;
        while !current.is_null() {
            let ifa = &*current;

            if !ifa.ifa_addr.is_null() && (*ifa.ifa_addr).sa_family as i32 == libc::AF_INET {
                let name = CStr::from_ptr(ifa.ifa_name).to_string_lossy().into_owned();
                let addr = ipv4_of(ifa.ifa_addr);
                // Interfaces without a netmask get host scope
                let mask = if ifa.ifa_netmask.is_null() {
                    Ipv4Addr::new(255, 255, 255, 255)
                } else {
                    ipv4_of(ifa.ifa_netmask)
                };
                out.push(IfaceAddr { name, addr, mask });
            }

            current = ifa.ifa_next;
        }

        libc::freeifaddrs(ifaddrs);
    }

    out
}

/// Every interface name on the host, across all address families
#[cfg(unix)]
pub fn interface_names() -> Vec<String> {
    let mut names: Vec<String> = Vec::new();

    unsafe {
        let mut ifaddrs: *mut libc::ifaddrs = std::ptr::null_mut();
        if libc::getifaddrs(&mut ifaddrs) != 0 {
            log::error!("failed to retrieve network interfaces");
            return names;
        }

        let mut current = ifaddrs;
        while !current.is_null() {
            let ifa = &*current;
            let name = CStr::from_ptr(ifa.ifa_name).to_string_lossy().into_owned();
            if !names.contains(&name) {
                names.push(name);
            }
            current = ifa.ifa_next;
        }

        libc::freeifaddrs(ifaddrs);
    }

    names
}

unsafe fn ipv4_of(sa: *const libc::sockaddr) -> Ipv4Addr {
    let sin = sa as *const libc::sockaddr_in;
    let bytes = (*sin).sin_addr.s_addr.to_ne_bytes();
    Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3])
}

// ============================================================================
// Derived Views
// ============================================================================

/// Addresses worth advertising to the rendezvous service
///
/// Keeps global-unicast addresses (private ranges included); loopback,
/// link-local, multicast, broadcast and unspecified are logged and
/// skipped.
pub fn global_unicast(ifaces: &[IfaceAddr]) -> Vec<Ipv4Addr> {
    let mut saved = Vec::new();

    for iface in ifaces {
        let ip = iface.addr;
        let kind = if ip.is_loopback() {
            "loopback"
        } else if ip.is_link_local() {
            "link-local"
        } else if ip.is_multicast() {
            "multicast"
        } else if ip.is_broadcast() {
            "broadcast"
        } else if ip.is_unspecified() {
            "unspecified"
        } else {
            "global unicast"
        };

        if kind == "global unicast" {
            log::info!("interface {}: {} ({}), saving", iface.name, ip, kind);
            saved.push(ip);
        } else {
            log::debug!("interface {}: {} ({}), ignoring", iface.name, ip, kind);
        }
    }

    log::info!("{} local addresses saved", saved.len());
    saved
}

/// Networks the endpoint selector may probe, excluding the overlay device
pub fn local_nets(ifaces: &[IfaceAddr], exclude_device: &str) -> Vec<LocalNet> {
    ifaces
        .iter()
        .filter(|iface| iface.name != exclude_device)
        .filter(|iface| !iface.addr.is_loopback())
        .map(|iface| LocalNet {
            name: iface.name.clone(),
            addr: iface.addr,
            mask: iface.mask,
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn iface(name: &str, addr: &str, mask: &str) -> IfaceAddr {
        IfaceAddr {
            name: name.to_string(),
            addr: addr.parse().unwrap(),
            mask: mask.parse().unwrap(),
        }
    }

    #[test]
    fn test_global_unicast_filters_special_ranges() {
        let ifaces = vec![
            iface("lo", "127.0.0.1", "255.0.0.0"),
            iface("eth0", "192.168.1.10", "255.255.255.0"),
            iface("eth1", "169.254.12.7", "255.255.0.0"),
            iface("wan0", "203.0.113.9", "255.255.255.0"),
        ];

        let saved = global_unicast(&ifaces);
        assert_eq!(
            saved,
            vec![
                "192.168.1.10".parse::<Ipv4Addr>().unwrap(),
                "203.0.113.9".parse::<Ipv4Addr>().unwrap()
            ]
        );
    }

    #[test]
    fn test_local_nets_excludes_overlay_device_and_loopback() {
        let ifaces = vec![
            iface("lo", "127.0.0.1", "255.0.0.0"),
            iface("eth0", "192.168.1.10", "255.255.255.0"),
            iface("vptp1", "10.10.0.1", "255.255.255.0"),
        ];

        let nets = local_nets(&ifaces, "vptp1");
        assert_eq!(nets.len(), 1);
        assert_eq!(nets[0].name, "eth0");
        assert!(nets[0].contains("192.168.1.99".parse().unwrap()));
    }

    #[test]
    fn test_enumerate_includes_loopback() {
        // Every test host has a loopback interface
        let ifaces = enumerate();
        assert!(ifaces.iter().any(|i| i.addr.is_loopback()));
    }

    #[test]
    fn test_interface_names_nonempty() {
        assert!(!interface_names().is_empty());
    }
}
