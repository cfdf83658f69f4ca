//! Overlay agent entry point
//!
//! Supervises the whole agent: parses the command line, opens and
//! configures the TAP device, binds the datagram endpoint, registers with
//! the rendezvous directory, then runs the long-lived tasks — the datagram
//! receive loop, the TAP read loop, the directory response reader and the
//! reconcile ticker — until an interrupt arrives.

use std::net::Ipv4Addr;
use std::path::Path;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::Duration;

use serde::Deserialize;

use overlay_core::ether::{self, MacAddr};
use overlay_core::peer::PeerRegistry;
use overlay_core::wire::IntroPayload;

use overlay_agent::ifaces;
use overlay_agent::keystore::KeyStore;
use overlay_agent::metrics::Metrics;
use overlay_agent::reconcile::reconcile_pass;
use overlay_agent::rendezvous::{DirectoryClient, Rendezvous, DEFAULT_BOOTSTRAP};
use overlay_agent::router::{self, RouterCtx};
use overlay_agent::tap::{self, TapDevice};
use overlay_agent::udp::{TestProbe, UdpEndpoint};

// ============================================================================
// Constants
// ============================================================================

/// Wait after a directory refresh so replies can land
const REFRESH_SETTLE: Duration = Duration::from_secs(2);

/// Idle time after a reconcile pass
const RECONCILE_IDLE: Duration = Duration::from_secs(3);

/// Default network mask
const DEFAULT_MASK: &str = "255.255.255.0";

/// Default network-config tool; the config file may override it
const DEFAULT_IPTOOL: &str = "/sbin/ip";

/// Well-known config file locations, tried in order
const CONFIG_PATHS: &[&str] = &["/etc/vptp/agent.yaml", "agent.yaml"];

// ============================================================================
// Shutdown
// ============================================================================

/// Process-wide shutdown flag, set by the SIGINT/SIGTERM handler
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn signal_handler(_sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::Relaxed);
}

/// Sleep in short slices so an interrupt is honored promptly
fn idle(duration: Duration) {
    let step = Duration::from_millis(100);
    let mut remaining = duration;
    while !SHUTDOWN.load(Ordering::Relaxed) && remaining > Duration::ZERO {
        let slice = remaining.min(step);
        thread::sleep(slice);
        remaining = remaining.saturating_sub(slice);
    }
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Deserialize, Default)]
struct AgentConfig {
    iptool: Option<String>,
}

fn load_config(path: &str) -> Result<AgentConfig, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: AgentConfig = serde_yaml::from_str(&contents)?;
    log::info!("loaded config from {}", path);
    Ok(config)
}

fn parse_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn usage() {
    println!("USAGE: vptp-agent [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("  -ip <addr>        IP address for the overlay interface (required)");
    println!("  -mask <mask>      Network mask (default {})", DEFAULT_MASK);
    println!("  -mac <addr>       MAC address for the TAP interface (generated if absent)");
    println!("  -dev <name>       TAP interface name (generated if absent)");
    println!("  -hash <hash>      Overlay identifier");
    println!("  -dht <addr>       Rendezvous bootstrap address (default {})", DEFAULT_BOOTSTRAP);
    println!("  -keyfile <path>   YAML file containing crypto keys");
    println!("  -key <key>        Crypto key (overrides keyfile)");
    println!("  -ttl <secs>       Validity of the supplied key");
    println!("  -direct <addr>    Reserved");
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();

    let ip_arg = match parse_arg(&args, "-ip") {
        Some(ip) => ip,
        None => {
            usage();
            process::exit(1);
        }
    };
    let ip: Ipv4Addr = match ip_arg.parse() {
        Ok(ip) => ip,
        Err(_) => {
            log::error!("invalid IP address: {}", ip_arg);
            usage();
            process::exit(1);
        }
    };

    let mask_arg = parse_arg(&args, "-mask").unwrap_or_else(|| DEFAULT_MASK.to_string());
    let mask: Ipv4Addr = match mask_arg.parse() {
        Ok(mask) => mask,
        Err(_) => {
            log::error!("invalid network mask: {}", mask_arg);
            usage();
            process::exit(1);
        }
    };

    // Bad user-supplied MAC is fatal; an absent one is generated
    let mac: MacAddr = match parse_arg(&args, "-mac") {
        Some(mac_arg) => mac_arg.parse()?,
        None => {
            let mac = ether::generate_mac();
            log::info!("generated MAC for TAP device: {}", mac);
            mac
        }
    };

    let hash = parse_arg(&args, "-hash").unwrap_or_else(|| "none".to_string());
    let bootstrap = parse_arg(&args, "-dht").unwrap_or_else(|| DEFAULT_BOOTSTRAP.to_string());
    if parse_arg(&args, "-direct").is_some() {
        log::warn!("-direct is reserved and ignored");
    }

    let mut keystore = match parse_arg(&args, "-keyfile") {
        Some(path) => KeyStore::load(&path)?,
        None => KeyStore::default(),
    };
    if let Some(key) = parse_arg(&args, "-key") {
        let ttl = parse_arg(&args, "-ttl")
            .and_then(|t| t.parse().ok())
            .unwrap_or(0);
        keystore.push_override(key, ttl);
    }

    // Config file may override the network-config tool
    let mut config = AgentConfig::default();
    for path in CONFIG_PATHS {
        if Path::new(path).exists() {
            match load_config(path) {
                Ok(loaded) => {
                    config = loaded;
                    break;
                }
                Err(e) => log::warn!("failed to load {}: {}", path, e),
            }
        }
    }
    let iptool = config.iptool.unwrap_or_else(|| DEFAULT_IPTOOL.to_string());

    log::info!("overlay agent starting...");
    log::info!("  IP:     {}/{}", ip, mask);
    log::info!("  MAC:    {}", mac);
    log::info!("  Hash:   {}", hash);
    log::info!("  DHT:    {}", bootstrap);
    log::info!("  iptool: {}", iptool);
    if let Some(active) = keystore.active() {
        log::info!("  key:    {} chars, ttl {}s", active.key.len(), active.ttl);
    }

    // Discover host addresses before the overlay device exists
    let host_ifaces = ifaces::enumerate();
    let local_ips = ifaces::global_unicast(&host_ifaces);

    let device = parse_arg(&args, "-dev")
        .unwrap_or_else(|| tap::generate_device_name(&ifaces::interface_names()));

    let tap = Arc::new(TapDevice::open(&device)?);
    tap.configure(&iptool, ip, mac)?;

    let udp = Arc::new(UdpEndpoint::bind()?);
    let port = udp.port()?;
    log::info!("started UDP listener at port {}", port);

    let directory = DirectoryClient::connect(&bootstrap, &hash, port, local_ips)?;
    directory.spawn_reader()?;

    let ctx = RouterCtx {
        registry: Arc::new(RwLock::new(PeerRegistry::new())),
        udp: Arc::clone(&udp),
        sink: tap.clone(),
        metrics: Arc::new(Metrics::new()),
        local_intro: IntroPayload {
            id: directory.self_id(),
            mac,
            ip,
        },
    };

    // Datagram receive loop
    {
        let ctx = ctx.clone();
        let udp = Arc::clone(&udp);
        thread::Builder::new()
            .name("datagram-rx".to_string())
            .spawn(move || {
                udp.listen(|_len, src, truncated, bytes| {
                    router::handle_datagram(&ctx, src, truncated, bytes);
                });
            })?;
    }

    // TAP read loop
    {
        let ctx = ctx.clone();
        let tap = Arc::clone(&tap);
        thread::Builder::new()
            .name("tap-rx".to_string())
            .spawn(move || router::tap_loop(tap, ctx))?;
    }

    unsafe {
        libc::signal(
            libc::SIGINT,
            signal_handler as *const () as libc::sighandler_t,
        );
        libc::signal(
            libc::SIGTERM,
            signal_handler as *const () as libc::sighandler_t,
        );
    }

    // Reconcile ticker
    let probe = TestProbe;
    loop {
        if SHUTDOWN.load(Ordering::Relaxed) {
            log::info!("interrupt received, exiting");
            process::exit(0);
        }

        directory.refresh();
        idle(REFRESH_SETTLE);

        let view = directory.peers();
        let local_nets = ifaces::local_nets(&ifaces::enumerate(), tap.name());
        let summary = reconcile_pass(&ctx, &directory, &view, &local_nets, &probe);
        log::debug!(
            "reconcile: purged={} discovered={} endpoints={} intros={} [{}]",
            summary.purged,
            summary.discovered,
            summary.new_endpoints,
            summary.intros_sent,
            ctx.metrics.summary()
        );

        idle(RECONCILE_IDLE);
    }
}
