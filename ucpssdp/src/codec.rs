//! Codec SSDP : datagramme brut -> [`SsdpHeaders`], et sérialisation des
//! M-SEARCH sortants.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::net::SocketAddr;
use std::time::SystemTime;

use thiserror::Error;
use tracing::trace;

use crate::headers::{SsdpHeaders, SsdpSource};
use crate::{SSDP_MULTICAST_ADDR, SSDP_PORT};

/// Nombre d'entrées au-delà duquel le cache de décodage est vidé.
const DECODE_CACHE_MAX: usize = 256;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("empty datagram")]
    Empty,
    #[error("unsupported SSDP start line: {0:?}")]
    UnsupportedStartLine(String),
    #[error("datagram has no header section")]
    NoHeaders,
}

/// Start line of an SSDP datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartLine {
    /// `NOTIFY * HTTP/1.1` - multicast advertisement.
    Notify,
    /// `HTTP/1.1 200 OK` - unicast response to one of our M-SEARCH.
    SearchResponse,
    /// `M-SEARCH * HTTP/1.1` - another control point searching; ignored.
    MSearch,
}

#[derive(Clone)]
struct CachedDecode {
    start_line: StartLine,
    /// (original casing, value) in wire order
    entries: Vec<(String, String)>,
}

/// Décodeur SSDP avec cache borné.
///
/// Beaucoup de devices retransmettent leurs annonces à l'identique, octet
/// pour octet ; le cache évite de re-parser ces datagrammes. Le cache
/// appartient à l'instance, jamais à un état global du process.
pub struct SsdpCodec {
    cache: HashMap<u64, CachedDecode>,
}

impl SsdpCodec {
    pub fn new() -> Self {
        Self {
            cache: HashMap::new(),
        }
    }

    /// Decode a raw datagram into classified headers.
    ///
    /// Non-strict: duplicate headers coalesce last-wins, malformed header
    /// lines are skipped. Only an unrecognized start line is an error.
    pub fn decode(
        &mut self,
        raw: &[u8],
        remote: SocketAddr,
        source: SsdpSource,
        received_at: SystemTime,
    ) -> Result<(StartLine, SsdpHeaders), DecodeError> {
        if raw.is_empty() {
            return Err(DecodeError::Empty);
        }

        let key = hash_datagram(raw);
        if let Some(cached) = self.cache.get(&key) {
            // Cache hit: identical bytes, only the receipt metadata is new.
            let mut headers = SsdpHeaders::new(received_at, source, remote);
            for (name, value) in &cached.entries {
                headers.insert(name, value);
            }
            return Ok((cached.start_line, headers));
        }

        let text = String::from_utf8_lossy(raw);
        let mut lines = text.lines();
        let first_line = lines.next().ok_or(DecodeError::Empty)?.trim();
        let start_line = classify_start_line(first_line)
            .ok_or_else(|| DecodeError::UnsupportedStartLine(first_line.to_string()))?;

        if !text.contains('\n') {
            return Err(DecodeError::NoHeaders);
        }

        let mut headers = SsdpHeaders::new(received_at, source, remote);
        let mut entries = Vec::new();
        for line in lines {
            let line = line.trim();
            if line.is_empty() {
                // Empty line marks end of headers
                break;
            }
            // Split on first ':' only (values may contain ':')
            let Some(colon) = line.find(':') else {
                trace!("skipping header line without colon: {:?}", line);
                continue;
            };
            let (name, value_with_colon) = line.split_at(colon);
            let name = name.trim();
            let value = value_with_colon[1..].trim();
            if name.is_empty() {
                trace!("skipping malformed header line: {:?}", line);
                continue;
            }
            headers.insert(name, value);
            entries.push((name.to_string(), value.to_string()));
        }

        if self.cache.len() >= DECODE_CACHE_MAX {
            self.cache.clear();
        }
        self.cache.insert(
            key,
            CachedDecode {
                start_line,
                entries,
            },
        );

        Ok((start_line, headers))
    }
}

impl Default for SsdpCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn classify_start_line(line: &str) -> Option<StartLine> {
    let upper = line.to_ascii_uppercase();
    if upper.starts_with("NOTIFY ") {
        Some(StartLine::Notify)
    } else if upper.starts_with("HTTP/") && upper.contains(" 200") {
        Some(StartLine::SearchResponse)
    } else if upper.starts_with("M-SEARCH ") {
        Some(StartLine::MSearch)
    } else {
        None
    }
}

fn hash_datagram(raw: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    raw.hash(&mut hasher);
    hasher.finish()
}

/// Build an M-SEARCH request.
///
/// `host` is the value for the HOST header; for directed (unicast) searches
/// this stays the standard multicast target, many device stacks ignore the
/// request otherwise.
pub fn build_search_packet(st: &str, mx: u32, host: Option<&str>) -> Vec<u8> {
    let mx = mx.max(1); // MX doit être >= 1
    let default_host = format!("{}:{}", SSDP_MULTICAST_ADDR, SSDP_PORT);
    let host = host.unwrap_or(&default_host);
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {}\r\n\
         ST: {}\r\n\
         USER-AGENT: ucpssdp SSDP Client\r\n\
         \r\n",
        host, mx, st
    )
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const ALIVE: &[u8] = b"NOTIFY * HTTP/1.1\r\n\
        HOST: 239.255.255.250:1900\r\n\
        CACHE-CONTROL: max-age=1800\r\n\
        LOCATION: http://10.0.0.5:1400/desc.xml\r\n\
        NT: upnp:rootdevice\r\n\
        NTS: ssdp:alive\r\n\
        SERVER: Linux UPnP/1.0 Sonos/70.3\r\n\
        USN: uuid:abc::upnp:rootdevice\r\n\
        \r\n";

    fn remote() -> SocketAddr {
        "10.0.0.5:1900".parse().unwrap()
    }

    #[test]
    fn decodes_an_alive_notify() {
        let mut codec = SsdpCodec::new();
        let (start, headers) = codec
            .decode(ALIVE, remote(), SsdpSource::Advertisement, SystemTime::now())
            .unwrap();
        assert_eq!(start, StartLine::Notify);
        assert_eq!(headers.nts(), Some("ssdp:alive"));
        assert_eq!(headers.udn(), Some("uuid:abc"));
        assert_eq!(headers.location(), Some("http://10.0.0.5:1400/desc.xml"));
        assert_eq!(headers.max_age(), 1800);
    }

    #[test]
    fn decodes_a_search_response() {
        let raw = b"HTTP/1.1 200 OK\r\n\
            CACHE-CONTROL: max-age=120\r\n\
            ST: ssdp:all\r\n\
            USN: uuid:abc::urn:schemas-upnp-org:service:X:1\r\n\
            LOCATION: http://10.0.0.5:1400/desc.xml\r\n\
            \r\n";
        let mut codec = SsdpCodec::new();
        let (start, headers) = codec
            .decode(raw, remote(), SsdpSource::Search, SystemTime::now())
            .unwrap();
        assert_eq!(start, StartLine::SearchResponse);
        assert_eq!(headers.st(), Some("ssdp:all"));
        assert_eq!(headers.source(), SsdpSource::Search);
    }

    #[test]
    fn rejects_garbage() {
        let mut codec = SsdpCodec::new();
        let err = codec
            .decode(
                b"GET / HTTP/1.1\r\n\r\n",
                remote(),
                SsdpSource::Advertisement,
                SystemTime::now(),
            )
            .unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedStartLine(_)));

        let err = codec
            .decode(b"", remote(), SsdpSource::Advertisement, SystemTime::now())
            .unwrap_err();
        assert!(matches!(err, DecodeError::Empty));
    }

    #[test]
    fn skips_malformed_header_lines() {
        let raw = b"NOTIFY * HTTP/1.1\r\n\
            this line has no colon\r\n\
            NTS: ssdp:alive\r\n\
            USN: uuid:abc\r\n\
            \r\n";
        let mut codec = SsdpCodec::new();
        let (_, headers) = codec
            .decode(raw, remote(), SsdpSource::Advertisement, SystemTime::now())
            .unwrap();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers.nts(), Some("ssdp:alive"));
    }

    #[test]
    fn cache_hit_restamps_receipt_metadata() {
        let mut codec = SsdpCodec::new();
        let t0 = SystemTime::now();
        let (_, first) = codec
            .decode(ALIVE, remote(), SsdpSource::Advertisement, t0)
            .unwrap();
        let t1 = t0 + Duration::from_secs(30);
        let other: SocketAddr = "10.0.0.9:1900".parse().unwrap();
        let (_, second) = codec
            .decode(ALIVE, other, SsdpSource::Advertisement, t1)
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(second.received_at(), t1);
        assert_eq!(second.remote(), other);
    }

    #[test]
    fn search_packet_contains_required_headers() {
        let packet = build_search_packet("ssdp:all", 0, None);
        let text = String::from_utf8(packet).unwrap();
        assert!(text.starts_with("M-SEARCH * HTTP/1.1\r\n"));
        assert!(text.contains("HOST: 239.255.255.250:1900\r\n"));
        assert!(text.contains("MAN: \"ssdp:discover\"\r\n"));
        assert!(text.contains("MX: 1\r\n")); // clamped up from 0
        assert!(text.contains("ST: ssdp:all\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }
}
