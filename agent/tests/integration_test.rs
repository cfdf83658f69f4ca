//! Integration tests for the overlay agent
//!
//! Each test assembles one or two in-process agents: a real UDP endpoint
//! and router wired to an in-memory frame sink instead of a TAP device,
//! driven by a scripted rendezvous view. Frames and handshakes flow over
//! loopback exactly as they would between hosts.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use overlay_core::ether::{self, MacAddr};
use overlay_core::peer::{PeerObservation, PeerRegistry};
use overlay_core::selector::LocalNet;
use overlay_core::wire::{IntroPayload, Message};

use overlay_agent::metrics::Metrics;
use overlay_agent::reconcile::reconcile_pass;
use overlay_agent::rendezvous::Rendezvous;
use overlay_agent::router::{self, RouterCtx};
use overlay_agent::tap::FrameSink;
use overlay_agent::udp::{TestProbe, UdpEndpoint};

// ============================================================================
// Test Fixtures
// ============================================================================

/// Frame sink standing in for the TAP device
#[derive(Default)]
struct CollectorSink {
    frames: Mutex<Vec<(u16, Vec<u8>)>>,
}

impl CollectorSink {
    fn frames(&self) -> Vec<(u16, Vec<u8>)> {
        self.frames.lock().unwrap().clone()
    }
}

impl FrameSink for CollectorSink {
    fn write_frame(&self, proto: u16, frame: &[u8]) -> io::Result<()> {
        self.frames.lock().unwrap().push((proto, frame.to_vec()));
        Ok(())
    }
}

/// Rendezvous contract backed by a scripted view
struct ScriptedRendezvous {
    id: String,
    view: Mutex<Vec<PeerObservation>>,
}

impl ScriptedRendezvous {
    fn new(id: &str) -> ScriptedRendezvous {
        ScriptedRendezvous {
            id: id.to_string(),
            view: Mutex::new(Vec::new()),
        }
    }

    fn set_view(&self, view: Vec<PeerObservation>) {
        *self.view.lock().unwrap() = view;
    }
}

impl Rendezvous for ScriptedRendezvous {
    fn refresh(&self) {}

    fn peers(&self) -> Vec<PeerObservation> {
        self.view.lock().unwrap().clone()
    }

    fn request_addresses(&self, _id: &str) {}

    fn self_id(&self) -> String {
        self.id.clone()
    }
}

/// One in-process agent: router context, receive thread, collector sink
struct TestAgent {
    ctx: RouterCtx,
    sink: Arc<CollectorSink>,
    mac: MacAddr,
    addr: SocketAddr,
}

fn spawn_agent(id: &str, mac: &str, ip: &str) -> TestAgent {
    let udp = Arc::new(UdpEndpoint::bind().unwrap());
    let port = udp.port().unwrap();
    let sink = Arc::new(CollectorSink::default());
    let mac: MacAddr = mac.parse().unwrap();

    let ctx = RouterCtx {
        registry: Arc::new(RwLock::new(PeerRegistry::new())),
        udp: Arc::clone(&udp),
        sink: sink.clone(),
        metrics: Arc::new(Metrics::new()),
        local_intro: IntroPayload {
            id: id.to_string(),
            mac,
            ip: ip.parse().unwrap(),
        },
    };

    {
        let ctx = ctx.clone();
        let udp = Arc::clone(&udp);
        thread::spawn(move || {
            udp.listen(|_len, src, truncated, bytes| {
                router::handle_datagram(&ctx, src, truncated, bytes);
            });
        });
    }

    TestAgent {
        ctx,
        sink,
        mac,
        addr: format!("127.0.0.1:{}", port).parse().unwrap(),
    }
}

fn observation(id: &str, addr: SocketAddr) -> PeerObservation {
    PeerObservation {
        id: id.to_string(),
        addresses: vec![addr.to_string()],
    }
}

fn loopback_net() -> Vec<LocalNet> {
    vec![LocalNet {
        name: "lo".to_string(),
        addr: "127.0.0.1".parse().unwrap(),
        mask: "255.0.0.0".parse().unwrap(),
    }]
}

/// Minimal ARP-shaped Ethernet frame between two overlay MACs
fn ethernet_frame(dst: MacAddr, src: MacAddr, ether_type: u16) -> Vec<u8> {
    let mut frame = Vec::with_capacity(42);
    frame.extend_from_slice(&dst.octets());
    frame.extend_from_slice(&src.octets());
    frame.extend_from_slice(&ether_type.to_be_bytes());
    frame.extend_from_slice(&[0u8; 28]);
    frame
}

fn wait_until<F: Fn() -> bool>(timeout: Duration, cond: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    false
}

fn handshake(a: &TestAgent, b: &TestAgent, rendezvous_a: &ScriptedRendezvous) {
    rendezvous_a.set_view(vec![observation(&b.ctx.local_intro.id, b.addr)]);
    let view = rendezvous_a.peers();
    reconcile_pass(&a.ctx, rendezvous_a, &view, &loopback_net(), &TestProbe);

    assert!(
        wait_until(Duration::from_secs(2), || {
            let a_done = a
                .ctx
                .registry
                .read()
                .unwrap()
                .get(&b.ctx.local_intro.id)
                .map(|r| r.handshaked)
                .unwrap_or(false);
            let b_done = b
                .ctx
                .registry
                .read()
                .unwrap()
                .get(&a.ctx.local_intro.id)
                .map(|r| r.handshaked)
                .unwrap_or(false);
            a_done && b_done
        }),
        "handshake did not complete"
    );
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_mutual_handshake() {
    let a = spawn_agent("peer-a", "06:aa:00:00:00:01", "10.10.0.1");
    let b = spawn_agent("peer-b", "06:bb:00:00:00:02", "10.10.0.2");
    let rendezvous_a = ScriptedRendezvous::new("peer-a");

    rendezvous_a.set_view(vec![observation("peer-b", b.addr)]);
    let view = rendezvous_a.peers();
    let summary = reconcile_pass(&a.ctx, &rendezvous_a, &view, &loopback_net(), &TestProbe);

    assert_eq!(summary.discovered, 1);
    assert_eq!(summary.new_endpoints, 1);
    assert_eq!(summary.intros_sent, 1);

    assert!(wait_until(Duration::from_secs(2), || {
        a.ctx
            .registry
            .read()
            .unwrap()
            .get("peer-b")
            .map(|r| r.handshaked)
            .unwrap_or(false)
    }));

    // Both sides know each other, with the configured MACs
    let a_registry = a.ctx.registry.read().unwrap();
    let record_b = a_registry.get("peer-b").unwrap();
    assert!(!record_b.unknown);
    assert_eq!(record_b.peer_virtual_mac, Some(b.mac));
    assert_eq!(record_b.peer_virtual_ip, Some("10.10.0.2".parse().unwrap()));
    drop(a_registry);

    let b_registry = b.ctx.registry.read().unwrap();
    let record_a = b_registry.get("peer-a").unwrap();
    assert!(record_a.handshaked);
    assert_eq!(record_a.peer_virtual_mac, Some(a.mac));
    drop(b_registry);

    // A stable view makes the next pass a no-op
    let view = rendezvous_a.peers();
    let second = reconcile_pass(&a.ctx, &rendezvous_a, &view, &loopback_net(), &TestProbe);
    assert_eq!(second.purged, 0);
    assert_eq!(second.discovered, 0);
    assert_eq!(second.new_endpoints, 0);
    assert_eq!(second.intros_sent, 0);
}

#[test]
fn test_arp_frames_cross_the_overlay() {
    let a = spawn_agent("arp-a", "06:aa:00:00:01:01", "10.11.0.1");
    let b = spawn_agent("arp-b", "06:bb:00:00:01:02", "10.11.0.2");
    let rendezvous_a = ScriptedRendezvous::new("arp-a");
    handshake(&a, &b, &rendezvous_a);

    // Host behind A ARPs for B's virtual IP
    let request = ethernet_frame(b.mac, a.mac, ether::ETH_P_ARP);
    router::handle_tap_frame(&a.ctx, ether::ETH_P_ARP, &request);

    assert!(wait_until(Duration::from_secs(2), || !b.sink.frames().is_empty()));
    let delivered = b.sink.frames();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, ether::ETH_P_ARP);
    assert_eq!(delivered[0].1, request);

    // B's host replies
    let reply = ethernet_frame(a.mac, b.mac, ether::ETH_P_ARP);
    router::handle_tap_frame(&b.ctx, ether::ETH_P_ARP, &reply);

    assert!(wait_until(Duration::from_secs(2), || !a.sink.frames().is_empty()));
    assert_eq!(a.sink.frames()[0].1, reply);
}

#[test]
fn test_departed_peer_is_purged_and_unroutable() {
    let a = spawn_agent("purge-a", "06:aa:00:00:02:01", "10.12.0.1");
    let b = spawn_agent("purge-b", "06:bb:00:00:02:02", "10.12.0.2");
    let rendezvous_a = ScriptedRendezvous::new("purge-a");
    handshake(&a, &b, &rendezvous_a);

    // Rendezvous stops reporting B; two reconcile cycles pass
    rendezvous_a.set_view(vec![]);
    for _ in 0..2 {
        let view = rendezvous_a.peers();
        reconcile_pass(&a.ctx, &rendezvous_a, &view, &loopback_net(), &TestProbe);
    }

    assert!(a.ctx.registry.read().unwrap().is_empty());

    // Frames to B's MAC now drop silently
    let frame = ethernet_frame(b.mac, a.mac, ether::ETH_P_IP);
    let sent = router::forward_frame(&a.ctx, &frame);
    assert_eq!(sent, 0);

    thread::sleep(Duration::from_millis(200));
    assert!(b.sink.frames().is_empty());
}

#[test]
fn test_malformed_introduction_is_rejected_without_reply() {
    let a = spawn_agent("mal-a", "06:aa:00:00:03:01", "10.13.0.1");

    let scratch = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    scratch
        .set_read_timeout(Some(Duration::from_millis(500)))
        .unwrap();

    let bad = Message::intro("id-x,not-a-mac,10.0.0.2", 0);
    scratch.send_to(&bad.serialize(), a.addr).unwrap();

    // No reply and no registry mutation
    let mut buf = [0u8; 128];
    assert!(scratch.recv_from(&mut buf).is_err());
    assert!(a.ctx.registry.read().unwrap().is_empty());
}

#[test]
fn test_data_from_unintroduced_source_is_dropped() {
    let a = spawn_agent("gate-a", "06:aa:00:00:04:01", "10.14.0.1");

    let scratch = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let frame = ethernet_frame(a.mac, "06:cc:00:00:04:09".parse().unwrap(), ether::ETH_P_IP);
    scratch
        .send_to(&Message::data(&frame).serialize(), a.addr)
        .unwrap();

    thread::sleep(Duration::from_millis(300));
    assert!(a.sink.frames().is_empty());
}

#[test]
fn test_unknown_destination_mac_sends_nothing() {
    let a = spawn_agent("drop-a", "06:aa:00:00:05:01", "10.15.0.1");

    let frame = ethernet_frame(
        "06:de:ad:be:ef:00".parse().unwrap(),
        a.mac,
        ether::ETH_P_IP,
    );
    let sent = router::forward_frame(&a.ctx, &frame);

    assert_eq!(sent, 0);
    assert_eq!(
        a.ctx
            .metrics
            .frames_dropped_total
            .load(std::sync::atomic::Ordering::Relaxed),
        1
    );
}

#[test]
fn test_test_message_is_echoed() {
    let a = spawn_agent("echo-a", "06:aa:00:00:06:01", "10.16.0.1");

    let scratch = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    scratch
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    scratch.send_to(&Message::test().serialize(), a.addr).unwrap();

    let mut buf = [0u8; 128];
    let (len, _) = scratch.recv_from(&mut buf).unwrap();
    let reply = Message::parse(&buf[..len]).unwrap();
    assert_eq!(reply, Message::test());
}
