//! Frame router
//!
//! The two pumps joined at the peer registry:
//!
//! ```text
//! TAP ──read_frame──► demux by EtherType ──dst MAC lookup──► UDP send
//! UDP ──recv──► wire parse ──┬── INTRO ──► registry upsert + reply
//!                            ├── TEST ───► echo
//!                            └── DATA ───► handshake check ──► TAP write
//! ```
//!
//! Policy drops (unknown EtherType, unknown destination MAC, INTRO from a
//! known peer, DATA from an unintroduced source) are debug-logged and
//! never surface as errors.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::{Arc, RwLock};

use overlay_core::ether;
use overlay_core::peer::PeerRegistry;
use overlay_core::wire::{IntroPayload, Message, MsgType};

use crate::metrics::Metrics;
use crate::tap::{FrameSink, TapDevice};
use crate::udp::UdpEndpoint;

// ============================================================================
// Shared Context
// ============================================================================

/// Everything the pumps share; cloned into each long-lived thread
#[derive(Clone)]
pub struct RouterCtx {
    /// The peer registry, single writer / many readers
    pub registry: Arc<RwLock<PeerRegistry>>,
    /// The agent's datagram socket
    pub udp: Arc<UdpEndpoint>,
    /// Where inbound overlay frames are written
    pub sink: Arc<dyn FrameSink>,
    /// Process counters
    pub metrics: Arc<Metrics>,
    /// Our own introduction, replied to inbound INTROs
    pub local_intro: IntroPayload,
}

impl RouterCtx {
    fn registry_read(&self) -> std::sync::RwLockReadGuard<'_, PeerRegistry> {
        self.registry.read().expect("registry lock poisoned")
    }

    fn registry_write(&self) -> std::sync::RwLockWriteGuard<'_, PeerRegistry> {
        self.registry.write().expect("registry lock poisoned")
    }
}

// ============================================================================
// TAP → Network
// ============================================================================

/// Read frames from the TAP device forever
///
/// Read errors are logged and the loop continues; truncated frames are
/// noted and still forwarded.
pub fn tap_loop(tap: Arc<TapDevice>, ctx: RouterCtx) {
    loop {
        let frame = match tap.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("TAP read: {}", e);
                continue;
            }
        };
        if frame.truncated {
            log::debug!("truncated TAP frame");
        }
        handle_tap_frame(&ctx, frame.proto, &frame.frame);
    }
}

/// Demultiplex one outbound frame by EtherType
pub fn handle_tap_frame(ctx: &RouterCtx, proto: u16, frame: &[u8]) {
    match proto {
        ether::ETH_P_IP | ether::ETH_P_ARP => {
            forward_frame(ctx, frame);
        }
        ether::ETH_P_PUP => log::debug!("PARC universal packet"),
        ether::ETH_P_RARP => log::debug!("RARP packet"),
        ether::ETH_P_8021Q => log::debug!("802.1q packet"),
        ether::ETH_P_IPV6 => log::debug!("IPv6 packet"),
        ether::ETH_P_PPPOE_DISC | ether::ETH_P_PPPOE_SESS => log::debug!("PPPoE packet"),
        other => {
            log::debug!("dropping frame with EtherType {:#06x}", other);
            ctx.metrics.frames_dropped_total.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Send one frame to the peer owning its destination MAC
///
/// Returns the number of bytes sent; zero — with no error — when the MAC
/// is unknown or its record has no endpoint yet.
pub fn forward_frame(ctx: &RouterCtx, frame: &[u8]) -> usize {
    let dst = match ether::dst_mac(frame) {
        Some(mac) => mac,
        None => {
            log::debug!("dropping runt frame ({} bytes)", frame.len());
            ctx.metrics.frames_dropped_total.fetch_add(1, Ordering::Relaxed);
            return 0;
        }
    };

    let endpoint = ctx.registry_read().endpoint_for_mac(dst);
    match endpoint {
        Some(endpoint) => match ctx.udp.send(&Message::data(frame), endpoint) {
            Ok(sent) => {
                ctx.metrics.frames_forwarded_total.fetch_add(1, Ordering::Relaxed);
                sent
            }
            Err(e) => {
                log::error!("forward to {}: {}", endpoint, e);
                0
            }
        },
        None => {
            ctx.metrics.frames_dropped_total.fetch_add(1, Ordering::Relaxed);
            0
        }
    }
}

// ============================================================================
// Network → TAP
// ============================================================================

/// Handle one received datagram; the `UdpEndpoint::listen` handler
pub fn handle_datagram(ctx: &RouterCtx, src: SocketAddr, truncated: bool, data: &[u8]) {
    ctx.metrics.datagrams_received_total.fetch_add(1, Ordering::Relaxed);
    if truncated {
        log::debug!("datagram from {} was truncated", src);
    }

    let msg = match Message::parse(data) {
        Ok(msg) => msg,
        Err(e) => {
            log::error!("datagram from {}: {}", src, e);
            return;
        }
    };

    match msg.msg_type() {
        Some(MsgType::Intro) => handle_intro(ctx, src, &msg),
        Some(MsgType::Test) => {
            if let Err(e) = ctx.udp.send(&Message::test(), src) {
                log::error!("TEST echo to {}: {}", src, e);
            }
        }
        Some(MsgType::DataPlain) => handle_data(ctx, src, &msg),
        _ => {
            log::error!("unknown message type {} from {}", msg.kind, src);
        }
    }
}

fn handle_intro(ctx: &RouterCtx, src: SocketAddr, msg: &Message) {
    if ctx.registry_read().is_known(src) {
        log::debug!("introduction from already-known {}", src);
        return;
    }

    let text = match std::str::from_utf8(&msg.payload) {
        Ok(text) => text,
        Err(_) => {
            log::error!("non-UTF8 introduction from {}", src);
            return;
        }
    };
    let intro = match IntroPayload::parse(text) {
        Ok(intro) => intro,
        Err(e) => {
            log::error!("introduction from {}: {}", src, e);
            return;
        }
    };
    log::debug!("introduction received from {} ({})", intro.id, src);

    // apply_intro re-checks knownness under the write lock, keeping the
    // unknown-check atomic with the upsert when the receive path fans out
    if !ctx.registry_write().apply_intro(src, &intro) {
        return;
    }
    ctx.metrics.intros_received_total.fetch_add(1, Ordering::Relaxed);

    let reply = Message::intro(&ctx.local_intro.encode(), 0);
    match ctx.udp.send(&reply, src) {
        Ok(_) => {
            ctx.metrics.intros_sent_total.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => log::error!("introduction reply to {}: {}", src, e),
    }
}

fn handle_data(ctx: &RouterCtx, src: SocketAddr, msg: &Message) {
    if !ctx.registry_read().is_handshaked_source(src) {
        log::debug!("data from unintroduced {} dropped", src);
        ctx.metrics.frames_dropped_total.fetch_add(1, Ordering::Relaxed);
        return;
    }

    if let Err(e) = ctx.sink.write_frame(ether::ETH_P_ARP, &msg.payload) {
        log::error!("TAP write: {}", e);
    }
}
