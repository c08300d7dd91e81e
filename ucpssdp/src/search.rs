//! Envoi des M-SEARCH et collecte des réponses unicast.

use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::SystemTime;

use crossbeam_channel::Sender;
use tracing::{debug, info, trace, warn};

use crate::codec::{self, SsdpCodec, StartLine};
use crate::headers::{SsdpHeaders, SsdpSource};
use crate::socket::{self, SsdpFamily};
use crate::{SSDP_MX, SSDP_ST_ALL, SsdpMessage};

/// Listener de recherche : socket éphémère, envoi M-SEARCH, réception des
/// réponses `HTTP/1.1 200 OK` en tâche de fond.
pub struct SsdpSearchListener {
    family: SsdpFamily,
    socket: Arc<UdpSocket>,
    sink: Sender<SsdpMessage>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SsdpSearchListener {
    pub fn new(family: SsdpFamily, sink: Sender<SsdpMessage>) -> io::Result<Self> {
        let socket = socket::search_socket(family)?;
        info!("✅ SSDP search listener bound on {}", socket.local_addr()?);
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

    /// Spawn the response receive loop. Idempotent.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        self.stop.store(false, Ordering::SeqCst);
        let socket = Arc::clone(&self.socket);
        let sink = self.sink.clone();
        let stop = Arc::clone(&self.stop);
        let handle = thread::Builder::new()
            .name("ssdp-search".into())
            .spawn(move || receive_loop(socket, sink, stop))
            .expect("failed to spawn ssdp-search thread");
        self.handle = Some(handle);
    }

    /// Multicast an M-SEARCH for `st` (default `ssdp:all`).
    ///
    /// Responses arrive asynchronously on the sink; devices answer within
    /// `mx` seconds.
    pub fn search(&self, st: Option<&str>, mx: Option<u32>) -> io::Result<()> {
        let st = st.unwrap_or(SSDP_ST_ALL);
        let mx = mx.unwrap_or(SSDP_MX);
        let packet = codec::build_search_packet(st, mx, None);
        let target = self.family.multicast_target();
        match self.socket.send_to(&packet, target) {
            Ok(_) => {
                info!("📤 M-SEARCH sent (ST={}, MX={})", st, mx);
                Ok(())
            }
            Err(e) => {
                warn!("❌ failed to send M-SEARCH: {}", e);
                Err(e)
            }
        }
    }

    /// Directed M-SEARCH to a single device. The HOST header keeps the
    /// standard multicast target, many device stacks ignore the request
    /// otherwise.
    pub fn search_unicast(
        &self,
        target: SocketAddr,
        st: Option<&str>,
        mx: Option<u32>,
    ) -> io::Result<()> {
        let st = st.unwrap_or(SSDP_ST_ALL);
        let mx = mx.unwrap_or(SSDP_MX);
        let packet = codec::build_search_packet(st, mx, None);
        self.socket.send_to(&packet, target).map(|_| {
            info!("📤 M-SEARCH sent to {} (ST={})", target, st);
        })
    }

    /// Stop the receive loop and join it. Idempotent.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        socket::wake(&self.socket, self.family);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SsdpSearchListener {
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
                let decoded = codec.decode(&buf[..n], from, SsdpSource::Search, received_at);
                let (start_line, headers) = match decoded {
                    Ok(decoded) => decoded,
                    Err(e) => {
                        trace!("search response from {} dropped: {}", from, e);
                        continue;
                    }
                };

                if start_line != StartLine::SearchResponse {
                    trace!("ignoring non-response datagram from {}", from);
                    continue;
                }

                if !response_is_usable(&headers) {
                    debug!("unusable search response from {}, dropped", from);
                    continue;
                }

                debug!("📥 search response from {}", from);
                if sink.send(SsdpMessage::SearchResponse(headers)).is_err() {
                    debug!("search sink closed, stopping receive loop");
                    break;
                }
            }
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => {
                warn!("❌ SSDP search read error: {}", e);
            }
        }
    }
}

/// A search response is only forwarded when its LOCATION could plausibly be
/// fetched: present, http(s), and not pointing at loopback or at an
/// unscoped link-local address.
fn response_is_usable(headers: &SsdpHeaders) -> bool {
    match headers.location() {
        Some(location) => location_is_routable(location),
        None => false,
    }
}

/// True when a LOCATION URL points somewhere a description fetch could
/// actually reach.
pub fn location_is_routable(location: &str) -> bool {
    let Ok(parsed) = url::Url::parse(location) else {
        return false;
    };
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return false;
    }
    let Some(host) = parsed.host_str() else {
        return false;
    };
    // Zone IDs do not survive Url parsing; a '%' means the sender scoped
    // the address itself.
    let bare = host.trim_matches(|c| c == '[' || c == ']');
    if bare.contains('%') {
        return true;
    }
    match bare.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => !v4.is_loopback(),
        Ok(IpAddr::V6(v6)) => {
            let link_local = (v6.segments()[0] & 0xffc0) == 0xfe80;
            !v6.is_loopback() && !link_local
        }
        // Hostname: let the description fetch resolve it.
        Err(_) => true,
    }
}
