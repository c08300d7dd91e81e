//! Petits utilitaires réseau partagés par l'eventing et le fetch de
//! descriptions.

use std::io;
use std::net::{IpAddr, UdpSocket};

use url::Url;

/// Resolve a possibly relative URL against the description URL it came from.
///
/// Absolute URLs are returned as-is; anything unparsable falls back to the
/// raw value rather than failing the whole description.
pub fn resolve_url(base: &str, candidate: &str) -> String {
    if candidate.starts_with("http://") || candidate.starts_with("https://") {
        return candidate.to_string();
    }
    match Url::parse(base).and_then(|b| b.join(candidate)) {
        Ok(resolved) => resolved.to_string(),
        Err(_) => candidate.to_string(),
    }
}

/// `(host, port)` of an http(s) URL, defaulting the port per scheme.
pub fn parse_host_port(url: &str) -> Option<(String, u16)> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_string();
    let port = parsed.port_or_known_default()?;
    Some((host, port))
}

/// `host:port` form usable as an HTTP HOST header value.
pub fn host_header(url: &str) -> Option<String> {
    let (host, port) = parse_host_port(url)?;
    Some(format!("{}:{}", host, port))
}

/// Local IP this machine would use to reach `remote_host:remote_port`.
///
/// Connecting a throwaway UDP socket assigns the right source address
/// without sending any traffic.
pub fn local_ip_for(remote_host: &str, remote_port: u16) -> io::Result<IpAddr> {
    let is_ipv6 = remote_host.contains(':') && !remote_host.contains('.');
    let target = if is_ipv6 {
        format!(
            "[{}]:{}",
            remote_host.trim_matches(|c| c == '[' || c == ']'),
            remote_port
        )
    } else {
        format!("{}:{}", remote_host, remote_port)
    };
    let bind_addr = if is_ipv6 { "[::]:0" } else { "0.0.0.0:0" };
    let socket = UdpSocket::bind(bind_addr)?;
    socket.connect(&target)?;
    Ok(socket.local_addr()?.ip())
}

/// Format an IP for URL embedding (IPv6 gets brackets).
pub fn format_ip(ip: &IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{}]", v6),
    }
}
