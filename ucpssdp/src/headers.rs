//! Map de headers SSDP insensible à la casse.
//!
//! Les devices UPnP émettent les mêmes headers avec des casses différentes
//! (`Location`, `LOCATION`, `location`). Les lookups normalisent la clé une
//! seule fois ; la casse d'origine est conservée pour l'affichage.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::SystemTime;

use serde::Serialize;

use crate::{MAX_AGE, SSDP_ST_ROOTDEVICE};

/// Origin of a decoded SSDP message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SsdpSource {
    /// Multicast NOTIFY received by the advertisement listener.
    Advertisement,
    /// Unicast response to one of our M-SEARCH requests.
    Search,
}

/// Decoded SSDP headers plus receipt metadata.
///
/// Receipt metadata (`received_at`, `source`, `remote`) lives in dedicated
/// fields rather than magic header keys, so header comparison can never
/// accidentally include it.
#[derive(Debug, Clone)]
pub struct SsdpHeaders {
    /// lower-cased name -> (original casing, value)
    entries: HashMap<String, (String, String)>,
    /// insertion order of lower-cased names
    order: Vec<String>,
    received_at: SystemTime,
    source: SsdpSource,
    remote: SocketAddr,
}

impl SsdpHeaders {
    pub fn new(received_at: SystemTime, source: SsdpSource, remote: SocketAddr) -> Self {
        Self {
            entries: HashMap::new(),
            order: Vec::new(),
            received_at,
            source,
            remote,
        }
    }

    /// Insert a header, replacing any previous value (last wins). The original
    /// casing of the latest insertion is the one kept for display.
    pub fn insert(&mut self, name: &str, value: &str) {
        let key = name.trim().to_ascii_lowercase();
        if key.is_empty() {
            return;
        }
        if !self.entries.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.entries
            .insert(key, (name.trim().to_string(), value.trim().to_string()));
    }

    /// Lookup by name, any casing. Normalizes the key exactly once.
    pub fn get(&self, name: &str) -> Option<&str> {
        let key = name.to_ascii_lowercase();
        self.entries.get(&key).map(|(_, value)| value.as_str())
    }

    /// Lookup with an already lower-cased key, skipping normalization.
    pub fn get_lower(&self, lower_name: &str) -> Option<&str> {
        self.entries.get(lower_name).map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    /// Iterate `(original name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.order.iter().filter_map(|key| {
            self.entries
                .get(key)
                .map(|(name, value)| (name.as_str(), value.as_str()))
        })
    }

    /// Iterate `(lower-cased name, value)` pairs in insertion order.
    pub fn iter_lower(&self) -> impl Iterator<Item = (&str, &str)> {
        self.order.iter().filter_map(|key| {
            self.entries
                .get(key)
                .map(|(_, value)| (key.as_str(), value.as_str()))
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn received_at(&self) -> SystemTime {
        self.received_at
    }

    pub fn source(&self) -> SsdpSource {
        self.source
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn usn(&self) -> Option<&str> {
        self.get_lower("usn")
    }

    /// The `uuid:...` portion of USN, when present.
    pub fn udn(&self) -> Option<&str> {
        let usn = self.usn()?;
        let start = usn.to_ascii_lowercase().find("uuid:")?;
        let tail = &usn[start..];
        match tail.find("::") {
            Some(end) => Some(&tail[..end]),
            None => Some(tail),
        }
    }

    pub fn location(&self) -> Option<&str> {
        self.get_lower("location")
    }

    pub fn nt(&self) -> Option<&str> {
        self.get_lower("nt")
    }

    pub fn nts(&self) -> Option<&str> {
        self.get_lower("nts")
    }

    pub fn st(&self) -> Option<&str> {
        self.get_lower("st")
    }

    pub fn server(&self) -> Option<&str> {
        self.get_lower("server")
    }

    pub fn boot_id(&self) -> Option<&str> {
        self.get_lower("bootid.upnp.org")
    }

    pub fn config_id(&self) -> Option<&str> {
        self.get_lower("configid.upnp.org")
    }

    /// Device- or service type this message refers to: ST for search
    /// responses, NT for advertisements, root device as fallback.
    pub fn device_or_service_type(&self) -> &str {
        self.st()
            .or_else(|| self.nt())
            .unwrap_or(SSDP_ST_ROOTDEVICE)
    }

    /// max-age parsed from CACHE-CONTROL, falling back to the SSDP default.
    pub fn max_age(&self) -> u32 {
        self.parsed_max_age().unwrap_or(MAX_AGE)
    }

    /// max-age parsed from CACHE-CONTROL, `None` when absent or unparsable.
    pub fn parsed_max_age(&self) -> Option<u32> {
        let value = self.get_lower("cache-control")?;
        let lower = value.to_ascii_lowercase();
        let idx = lower.find("max-age")?;
        let after_key = &value[idx + 7..];
        let after_eq = after_key.trim_start().trim_start_matches('=').trim_start();
        let digits: String = after_eq
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits.parse::<u32>().ok()
    }
}

impl PartialEq for SsdpHeaders {
    /// Header-only equality, casing ignored. Receipt metadata never takes
    /// part in the comparison.
    fn eq(&self, other: &Self) -> bool {
        if self.entries.len() != other.entries.len() {
            return false;
        }
        self.entries
            .iter()
            .all(|(key, (_, value))| other.get_lower(key) == Some(value.as_str()))
    }
}
