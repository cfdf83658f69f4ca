//! UDP datagram endpoint
//!
//! One socket per agent, bound to an ephemeral port that is handed to the
//! rendezvous service at registration. Sends are safe from any thread; the
//! receive loop is single-reader and blocks forever, absorbing per-datagram
//! errors so one bad packet never takes the data plane down.

use std::io;
use std::net::{SocketAddr, UdpSocket};

use overlay_core::selector::{Probe, PROBE_TIMEOUT};
use overlay_core::wire::Message;
use overlay_core::RECV_BUF_LEN;

// ============================================================================
// Endpoint
// ============================================================================

/// The agent's datagram socket
pub struct UdpEndpoint {
    socket: UdpSocket,
}

impl UdpEndpoint {
    /// Bind to `0.0.0.0` on an ephemeral port
    pub fn bind() -> io::Result<UdpEndpoint> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        Ok(UdpEndpoint { socket })
    }

    /// The kernel-chosen port
    pub fn port(&self) -> io::Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    /// Serialize and transmit one message as a single datagram
    ///
    /// Returns the number of bytes sent.
    pub fn send(&self, msg: &Message, addr: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(&msg.serialize(), addr)
    }

    /// Blocking receive loop
    ///
    /// The handler is invoked with `(byte_count, source, truncated, bytes)`
    /// for every received datagram. Payloads are capped at
    /// [`RECV_BUF_LEN`]; longer datagrams are cut there and flagged. A
    /// datagram of exactly [`RECV_BUF_LEN`] bytes is delivered intact and
    /// not flagged — the buffer keeps one sentinel byte past the cap to
    /// tell the two apart. Receive errors are logged and the loop
    /// continues; this function does not return.
    pub fn listen<H>(&self, mut handler: H)
    where
        H: FnMut(usize, SocketAddr, bool, &[u8]),
    {
        let mut buf = [0u8; RECV_BUF_LEN + 1];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((len, src)) => {
                    let truncated = len > RECV_BUF_LEN;
                    if truncated {
                        log::debug!("datagram from {} truncated at {} bytes", src, RECV_BUF_LEN);
                    }
                    let len = len.min(RECV_BUF_LEN);
                    handler(len, src, truncated, &buf[..len]);
                }
                Err(e) => {
                    log::error!("datagram recv: {}", e);
                }
            }
        }
    }
}

// ============================================================================
// Liveness Probe
// ============================================================================

/// Production [`Probe`]: one TEST message on a short-lived connected socket
///
/// Any byte back within [`PROBE_TIMEOUT`] passes; a deadline or transport
/// error fails.
pub struct TestProbe;

impl Probe for TestProbe {
    fn probe(&self, candidate: SocketAddr) -> bool {
        let socket = match UdpSocket::bind("0.0.0.0:0") {
            Ok(socket) => socket,
            Err(e) => {
                log::error!("probe socket bind: {}", e);
                return false;
            }
        };
        if let Err(e) = socket.connect(candidate) {
            log::debug!("probe connect {}: {}", candidate, e);
            return false;
        }
        if let Err(e) = socket.send(&Message::test().serialize()) {
            log::debug!("probe send {}: {}", candidate, e);
            return false;
        }
        if let Err(e) = socket.set_read_timeout(Some(PROBE_TIMEOUT)) {
            log::error!("probe deadline: {}", e);
            return false;
        }

        let mut buf = [0u8; RECV_BUF_LEN];
        match socket.recv(&mut buf) {
            Ok(len) => len > 0,
            Err(e) => {
                log::debug!("probe {} no reply: {}", candidate, e);
                false
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_bind_chooses_ephemeral_port() {
        let endpoint = UdpEndpoint::bind().unwrap();
        assert_ne!(endpoint.port().unwrap(), 0);
    }

    #[test]
    fn test_send_returns_bytes_sent() {
        let endpoint = UdpEndpoint::bind().unwrap();
        let sink = UdpSocket::bind("127.0.0.1:0").unwrap();
        let msg = Message::test();

        let sent = endpoint.send(&msg, sink.local_addr().unwrap()).unwrap();
        assert_eq!(sent, msg.serialize().len());
    }

    #[test]
    fn test_probe_succeeds_against_echo() {
        // A minimal responder standing in for a remote agent's TEST echo
        let responder = UdpSocket::bind("127.0.0.1:0").unwrap();
        let target = responder.local_addr().unwrap();
        thread::spawn(move || {
            let mut buf = [0u8; RECV_BUF_LEN];
            if let Ok((_, src)) = responder.recv_from(&mut buf) {
                let _ = responder.send_to(&Message::test().serialize(), src);
            }
        });

        assert!(TestProbe.probe(target));
    }

    #[test]
    fn test_probe_fails_on_silence() {
        // Bound but mute: the probe must give up at its deadline. The mute
        // socket stays alive for the whole wait.
        let mute = UdpSocket::bind("127.0.0.1:0").unwrap();
        let target = mute.local_addr().unwrap();

        let started = std::time::Instant::now();
        assert!(!TestProbe.probe(target));
        assert!(started.elapsed() >= PROBE_TIMEOUT - Duration::from_millis(50));
        drop(mute);
    }

    #[test]
    fn test_listen_truncation_boundary() {
        let endpoint = UdpEndpoint::bind().unwrap();
        let port = endpoint.port().unwrap();
        let received: std::sync::Arc<std::sync::Mutex<Vec<(usize, bool)>>> =
            std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));

        let seen = received.clone();
        thread::spawn(move || {
            endpoint.listen(move |len, _src, truncated, bytes| {
                assert_eq!(len, bytes.len());
                seen.lock().unwrap().push((len, truncated));
            });
        });

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        let dest = format!("127.0.0.1:{}", port);
        // Exactly the cap: intact, not flagged
        sender.send_to(&vec![0u8; RECV_BUF_LEN], &dest).unwrap();
        // One past the cap: cut and flagged
        sender.send_to(&vec![0u8; RECV_BUF_LEN + 1], &dest).unwrap();

        thread::sleep(Duration::from_millis(300));
        let seen = received.lock().unwrap();
        assert_eq!(seen.as_slice(), &[(RECV_BUF_LEN, false), (RECV_BUF_LEN, true)]);
    }
}
