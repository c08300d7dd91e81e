//! Construction des sockets SSDP (multicast et recherche).

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use serde::Serialize;
use tracing::{debug, warn};

use crate::{SSDP_MULTICAST_ADDR, SSDP_MULTICAST_ADDR_V6, SSDP_PORT};

/// Read timeout on every SSDP socket; bounds how long a stopped listener can
/// keep its thread alive after the wake datagram got lost.
pub(crate) const SOCKET_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Famille d'adresses sur laquelle un listener est lié.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SsdpFamily {
    V4,
    V6,
}

impl SsdpFamily {
    /// The SSDP multicast group of this family.
    pub fn multicast_group(&self) -> IpAddr {
        match self {
            SsdpFamily::V4 => IpAddr::V4(SSDP_MULTICAST_ADDR.parse().unwrap()),
            SsdpFamily::V6 => IpAddr::V6(SSDP_MULTICAST_ADDR_V6.parse().unwrap()),
        }
    }

    /// `group:1900`, the destination of outgoing M-SEARCH requests.
    pub fn multicast_target(&self) -> SocketAddr {
        SocketAddr::new(self.multicast_group(), SSDP_PORT)
    }

    fn any_addr(&self) -> IpAddr {
        match self {
            SsdpFamily::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            SsdpFamily::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }

    fn loopback(&self) -> IpAddr {
        match self {
            SsdpFamily::V4 => IpAddr::V4(Ipv4Addr::LOCALHOST),
            SsdpFamily::V6 => IpAddr::V6(Ipv6Addr::LOCALHOST),
        }
    }

    /// Family of a peer address.
    pub fn of(addr: &SocketAddr) -> SsdpFamily {
        match addr {
            SocketAddr::V4(_) => SsdpFamily::V4,
            SocketAddr::V6(_) => SsdpFamily::V6,
        }
    }
}

/// Socket du listener d'annonces : bind sur le port 1900 avec SO_REUSEADDR,
/// et join du groupe multicast sur chaque interface non-loopback.
pub fn advertisement_socket(family: SsdpFamily) -> io::Result<UdpSocket> {
    let domain = match family {
        SsdpFamily::V4 => Domain::IPV4,
        SsdpFamily::V6 => Domain::IPV6,
    };
    let raw = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    raw.set_reuse_address(true)?;
    let bind_addr = SocketAddr::new(family.any_addr(), SSDP_PORT);
    raw.bind(&bind_addr.into())?;

    let socket: UdpSocket = raw.into();
    socket.set_read_timeout(Some(SOCKET_READ_TIMEOUT))?;

    match family {
        SsdpFamily::V4 => {
            socket.set_multicast_loop_v4(true)?; // utile en dev local
            let group: Ipv4Addr = SSDP_MULTICAST_ADDR.parse().unwrap();
            let mut joined = 0;
            for iface in get_if_addrs::get_if_addrs()? {
                if let IpAddr::V4(ipv4) = iface.ip() {
                    if !ipv4.is_loopback() {
                        match socket.join_multicast_v4(&group, &ipv4) {
                            Ok(()) => {
                                joined += 1;
                                debug!("SSDP: joined {} on {}", group, ipv4);
                            }
                            Err(e) => {
                                warn!("SSDP: failed to join {} on {}: {}", group, ipv4, e);
                            }
                        }
                    }
                }
            }
            if joined == 0 {
                // Last resort: let the kernel pick the interface.
                socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
            }
        }
        SsdpFamily::V6 => {
            let group: Ipv6Addr = SSDP_MULTICAST_ADDR_V6.parse().unwrap();
            // get_if_addrs exposes no interface index, so join on the
            // default interface (0).
            socket.join_multicast_v6(&group, 0)?;
        }
    }

    Ok(socket)
}

/// Socket de recherche : port éphémère, jamais 1900.
pub fn search_socket(family: SsdpFamily) -> io::Result<UdpSocket> {
    let domain = match family {
        SsdpFamily::V4 => Domain::IPV4,
        SsdpFamily::V6 => Domain::IPV6,
    };
    let raw = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    raw.set_reuse_address(true)?;
    let bind_addr = SocketAddr::new(family.any_addr(), 0);
    raw.bind(&bind_addr.into())?;

    let socket: UdpSocket = raw.into();
    socket.set_read_timeout(Some(SOCKET_READ_TIMEOUT))?;
    Ok(socket)
}

/// Réveille un receive bloqué en envoyant un datagramme vide sur la boucle
/// locale vers le port de la socket. Le listener vérifie son flag d'arrêt
/// dès le réveil.
pub(crate) fn wake(socket: &UdpSocket, family: SsdpFamily) {
    if let Ok(local) = socket.local_addr() {
        let target = SocketAddr::new(family.loopback(), local.port());
        if let Err(e) = socket.send_to(&[], target) {
            debug!("SSDP: wake datagram to {} failed: {}", target, e);
        }
    }
}
