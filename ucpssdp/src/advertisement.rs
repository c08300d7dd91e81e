//! Listener des annonces SSDP multicast (`ssdp:alive` / `ssdp:byebye` /
//! `ssdp:update`).

use std::io;
use std::net::UdpSocket;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::SystemTime;

use crossbeam_channel::Sender;
use tracing::{debug, info, trace, warn};

use crate::codec::{SsdpCodec, StartLine};
use crate::headers::SsdpSource;
use crate::socket::{self, SsdpFamily};
use crate::{SSDP_ALIVE, SSDP_BYEBYE, SSDP_UPDATE, SsdpMessage};

/// Listener d'annonces : un thread de réception par famille d'adresses.
///
/// La livraison vers le sink est fire-and-forget (canal non borné) : un
/// consommateur lent ne bloque jamais la réception multicast.
pub struct SsdpAdvertisementListener {
    family: SsdpFamily,
    socket: Arc<UdpSocket>,
    sink: Sender<SsdpMessage>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SsdpAdvertisementListener {
    /// Bind the multicast socket. The receive thread starts on [`start`].
    ///
    /// [`start`]: SsdpAdvertisementListener::start
    pub fn new(family: SsdpFamily, sink: Sender<SsdpMessage>) -> io::Result<Self> {
        let socket = socket::advertisement_socket(family)?;
        info!(
            "✅ SSDP advertisement listener bound on {}",
            socket.local_addr()?
        );
        Ok(Self {
            family,
            socket: Arc::new(socket),
            sink,
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
        })
    }

    pub fn family(&self) -> SsdpFamily {
        self.family
    }

    /// Spawn the receive loop. Idempotent.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        self.stop.store(false, Ordering::SeqCst);
        let socket = Arc::clone(&self.socket);
        let sink = self.sink.clone();
        let stop = Arc::clone(&self.stop);
        let handle = thread::Builder::new()
            .name("ssdp-advertisement".into())
            .spawn(move || receive_loop(socket, sink, stop))
            .expect("failed to spawn ssdp-advertisement thread");
        self.handle = Some(handle);
    }

    /// Stop the receive loop and join it. Idempotent; the blocked receive is
    /// woken immediately instead of waiting out its read timeout.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        socket::wake(&self.socket, self.family);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SsdpAdvertisementListener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive_loop(socket: Arc<UdpSocket>, sink: Sender<SsdpMessage>, stop: Arc<AtomicBool>) {
    let mut codec = SsdpCodec::new();
    let mut buf = [0u8; 8192];
    loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        match socket.recv_from(&mut buf) {
            Ok((n, from)) => {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                let received_at = SystemTime::now();
                let decoded = codec.decode(
                    &buf[..n],
                    from,
                    SsdpSource::Advertisement,
                    received_at,
                );
                let (start_line, headers) = match decoded {
                    Ok(decoded) => decoded,
                    Err(e) => {
                        trace!("SSDP advertisement from {} dropped: {}", from, e);
                        continue;
                    }
                };

                if start_line != StartLine::Notify {
                    // M-SEARCH from another control point, or a stray
                    // unicast response; not ours to handle.
                    trace!("ignoring non-NOTIFY datagram from {}", from);
                    continue;
                }

                let message = match headers.nts() {
                    Some(nts) if nts.eq_ignore_ascii_case(SSDP_ALIVE) => {
                        SsdpMessage::Alive(headers)
                    }
                    Some(nts) if nts.eq_ignore_ascii_case(SSDP_BYEBYE) => {
                        SsdpMessage::ByeBye(headers)
                    }
                    Some(nts) if nts.eq_ignore_ascii_case(SSDP_UPDATE) => {
                        SsdpMessage::Update(headers)
                    }
                    Some(nts) => {
                        trace!("unknown NTS value from {}: {}", from, nts);
                        continue;
                    }
                    None => {
                        trace!("NOTIFY from {} without NTS header, dropped", from);
                        continue;
                    }
                };

                debug!("📥 SSDP advertisement from {}", from);
                if sink.send(message).is_err() {
                    debug!("advertisement sink closed, stopping receive loop");
                    break;
                }
            }
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                // Read timeout, re-check the stop flag.
                continue;
            }
            Err(e) => {
                warn!("❌ SSDP advertisement read error: {}", e);
            }
        }
    }
}
