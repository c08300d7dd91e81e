//! Tracker des devices SSDP : la vue canonique, dédupliquée, des devices
//! annoncés sur le réseau.
//!
//! Le tracker est la seule structure légitimement partagée entre plusieurs
//! [`DiscoveryPoint`](crate::discovery::DiscoveryPoint) : sur une machine
//! multi-homed ou dual-stack, le même device physique est annoncé sur
//! plusieurs interfaces et ne doit produire qu'un seul enregistrement.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use crossbeam_channel::Receiver;
use tracing::{debug, trace};
use ucpssdp::search::location_is_routable;
use ucpssdp::{SsdpFamily, SsdpHeaders, SsdpMessage};

use crate::Udn;
use crate::events::EventBus;
use crate::identity::udn_from_headers;
use crate::model::{DeviceEvent, DeviceLocation, DeviceSnapshot};

/// Headers excluded from change detection. They vary per address family or
/// retransmission without representing a real device-state change.
const IGNORED_HEADERS: [&str; 3] = ["cache-control", "date", "host"];

/// Un device connu : identité UDN, localisations actives, et les derniers
/// headers vus par type de device/service.
#[derive(Debug, Clone)]
pub struct SsdpDevice {
    udn: Udn,
    locations: HashMap<String, DeviceLocation>,
    last_seen: SystemTime,
    server: Option<String>,
    search_headers: HashMap<String, SsdpHeaders>,
    advertisement_headers: HashMap<String, SsdpHeaders>,
}

impl SsdpDevice {
    fn new(udn: Udn, seen_at: SystemTime) -> Self {
        Self {
            udn,
            locations: HashMap::new(),
            last_seen: seen_at,
            server: None,
            search_headers: HashMap::new(),
            advertisement_headers: HashMap::new(),
        }
    }

    pub fn udn(&self) -> &Udn {
        &self.udn
    }

    /// Known locations. A pure read: looking at them never drops anything.
    pub fn locations(&self) -> impl Iterator<Item = &DeviceLocation> {
        self.locations.values()
    }

    pub fn last_seen(&self) -> SystemTime {
        self.last_seen
    }

    /// The device stays valid as long as its freshest location does.
    pub fn valid_to(&self) -> Option<SystemTime> {
        self.locations.values().map(|loc| loc.valid_to).max()
    }

    /// Refresh from a header set: the location learned from exactly these
    /// headers gets an expiry derived from exactly these headers.
    fn refresh(&mut self, headers: &SsdpHeaders) {
        if let Some(location) = headers.location() {
            let valid_to =
                headers.received_at() + Duration::from_secs(headers.max_age() as u64);
            self.locations.insert(
                location.to_string(),
                DeviceLocation {
                    url: location.to_string(),
                    family: SsdpFamily::of(&headers.remote()),
                    valid_to,
                },
            );
        }
        self.last_seen = headers.received_at();
        if let Some(server) = headers.server() {
            self.server = Some(server.to_string());
        }
    }

    fn knows_type(&self, dst: &str) -> bool {
        self.advertisement_headers.contains_key(dst) || self.search_headers.contains_key(dst)
    }

    fn snapshot(&self) -> DeviceSnapshot {
        let mut locations: Vec<DeviceLocation> = self.locations.values().cloned().collect();
        locations.sort_by(|a, b| a.url.cmp(&b.url));
        let mut types_seen: Vec<String> = self
            .advertisement_headers
            .keys()
            .chain(self.search_headers.keys())
            .cloned()
            .collect();
        types_seen.sort();
        types_seen.dedup();
        DeviceSnapshot {
            udn: self.udn.clone(),
            locations,
            last_seen: self.last_seen,
            types_seen,
            server: self.server.clone(),
        }
    }
}

/// Did any change-relevant header move between two sightings?
///
/// Only headers present in both sets are compared, and the excluded headers
/// stay excluded by policy; do not add them back.
fn same_headers_differ(current: &SsdpHeaders, incoming: &SsdpHeaders) -> bool {
    for (name, current_value) in current.iter_lower() {
        if IGNORED_HEADERS.contains(&name) {
            continue;
        }
        match incoming.get_lower(name) {
            Some(new_value) if new_value != current_value => {
                trace!(
                    "header {} changed from {:?} to {:?}",
                    name, current_value, new_value
                );
                return true;
            }
            _ => {}
        }
    }
    false
}

fn valid_advertisement_headers(headers: &SsdpHeaders) -> bool {
    headers.udn().is_some()
        && headers.nt().is_some()
        && headers.nts().is_some()
        && headers.location().is_some_and(location_is_routable)
}

fn valid_byebye_headers(headers: &SsdpHeaders) -> bool {
    // byebye carries no usable LOCATION on many stacks; identity suffices.
    headers.udn().is_some() && headers.nt().is_some() && headers.nts().is_some()
}

fn valid_search_headers(headers: &SsdpHeaders) -> bool {
    headers.udn().is_some()
        && headers.st().is_some()
        && headers.location().is_some_and(location_is_routable)
}

#[derive(Default)]
struct TrackerInner {
    devices: HashMap<Udn, SsdpDevice>,
    /// Earliest expiry across all devices; purge is a no-op before then.
    next_valid_to: Option<SystemTime>,
}

impl TrackerInner {
    fn note_valid_to(&mut self, valid_to: Option<SystemTime>) {
        if let Some(valid_to) = valid_to {
            match self.next_valid_to {
                Some(next) if next <= valid_to => {}
                _ => self.next_valid_to = Some(valid_to),
            }
        }
    }

    fn purge(&mut self, now: SystemTime, events: &mut Vec<DeviceEvent>) {
        if let Some(next) = self.next_valid_to {
            if next > now {
                return;
            }
        }
        let mut stale = Vec::new();
        let mut next: Option<SystemTime> = None;
        for (udn, device) in self.devices.iter_mut() {
            device.locations.retain(|_, loc| loc.valid_to > now);
            match device.valid_to() {
                None => stale.push(udn.clone()),
                Some(valid_to) => match next {
                    Some(n) if n <= valid_to => {}
                    _ => next = Some(valid_to),
                },
            }
        }
        self.next_valid_to = next;
        for udn in stale {
            if let Some(device) = self.devices.remove(&udn) {
                debug!("purging expired device {}", udn);
                events.push(DeviceEvent::Removed(device.snapshot()));
            }
        }
    }
}

/// Machine à états de la découverte : map UDN -> [`SsdpDevice`] sous mutex,
/// mutations sérialisées, événements diffusés hors verrou.
pub struct SsdpDeviceTracker {
    inner: Mutex<TrackerInner>,
    bus: EventBus<DeviceEvent>,
}

impl SsdpDeviceTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TrackerInner::default()),
            bus: EventBus::new(),
        }
    }

    /// Receive lifecycle events. Each subscriber gets its own channel; a
    /// misbehaving one is pruned without affecting the rest.
    pub fn subscribe(&self) -> Receiver<DeviceEvent> {
        self.bus.subscribe()
    }

    /// Route a listener message to the matching handler.
    pub fn apply(&self, message: &SsdpMessage) {
        match message {
            SsdpMessage::Alive(headers) => self.on_alive(headers),
            SsdpMessage::ByeBye(headers) => self.on_byebye(headers),
            SsdpMessage::Update(headers) => self.on_update(headers),
            SsdpMessage::SearchResponse(headers) => self.on_search_response(headers),
        }
    }

    pub fn on_alive(&self, headers: &SsdpHeaders) {
        if !valid_advertisement_headers(headers) {
            debug!("invalid alive advertisement dropped: {:?}", headers.usn());
            return;
        }
        self.see(headers, false, false);
    }

    /// `ssdp:update` always propagates, per protocol: BOOTID bumps matter
    /// even when nothing else moved.
    pub fn on_update(&self, headers: &SsdpHeaders) {
        if !valid_advertisement_headers(headers) {
            debug!("invalid update advertisement dropped: {:?}", headers.usn());
            return;
        }
        self.see(headers, false, true);
    }

    pub fn on_search_response(&self, headers: &SsdpHeaders) {
        if !valid_search_headers(headers) {
            debug!("invalid search response dropped: {:?}", headers.usn());
            return;
        }
        self.see(headers, true, false);
    }

    fn see(&self, headers: &SsdpHeaders, from_search: bool, always_propagate: bool) {
        let Some(udn) = udn_from_headers(headers) else {
            return;
        };
        let dst = headers.device_or_service_type().to_string();

        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock().unwrap();
            inner.purge(headers.received_at(), &mut events);

            let is_new_device = !inner.devices.contains_key(&udn);
            let device = inner
                .devices
                .entry(udn.clone())
                .or_insert_with(|| SsdpDevice::new(udn.clone(), headers.received_at()));

            let is_new_service = !device.knows_type(&dst);
            if is_new_service {
                debug!("see new service {} on {}", dst, device.udn);
            }

            let changed = always_propagate
                || is_new_device
                || is_new_service
                || device
                    .advertisement_headers
                    .get(&dst)
                    .is_some_and(|current| same_headers_differ(current, headers))
                || device
                    .search_headers
                    .get(&dst)
                    .is_some_and(|current| same_headers_differ(current, headers));

            device.refresh(headers);
            if from_search {
                device.search_headers.insert(dst, headers.clone());
            } else {
                device.advertisement_headers.insert(dst, headers.clone());
            }

            let valid_to = device.valid_to();
            if is_new_device {
                debug!("see new device {}", device.udn);
                events.push(DeviceEvent::Added(device.snapshot()));
            } else if changed {
                events.push(DeviceEvent::Updated(device.snapshot()));
            }
            inner.note_valid_to(valid_to);
        }

        self.broadcast(events);
    }

    /// `ssdp:byebye`: drop the matching location; the device itself only
    /// goes away once no location is left.
    pub fn on_byebye(&self, headers: &SsdpHeaders) {
        if !valid_byebye_headers(headers) {
            debug!("invalid byebye advertisement dropped: {:?}", headers.usn());
            return;
        }
        let Some(udn) = udn_from_headers(headers) else {
            return;
        };

        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock().unwrap();
            let Some(device) = inner.devices.get_mut(&udn) else {
                // Second byebye for the same device, already gone.
                return;
            };

            let dropped = match headers.location() {
                Some(location) => device.locations.remove(location).is_some(),
                None => {
                    let family = SsdpFamily::of(&headers.remote());
                    let before = device.locations.len();
                    device.locations.retain(|_, loc| loc.family != family);
                    before != device.locations.len()
                }
            };

            if device.locations.is_empty() {
                if let Some(device) = inner.devices.remove(&udn) {
                    debug!("device {} said byebye, removed", udn);
                    events.push(DeviceEvent::Removed(device.snapshot()));
                }
            } else if dropped {
                // Still reachable through another path.
                debug!("device {} dropped one location, others remain", udn);
                events.push(DeviceEvent::Updated(device.snapshot()));
            }
        }

        self.broadcast(events);
    }

    /// Drop every device/location whose advertised max-age has elapsed,
    /// firing `Removed` for each device found stale.
    pub fn purge_expired(&self) {
        self.purge_expired_at(SystemTime::now());
    }

    pub fn purge_expired_at(&self, now: SystemTime) {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock().unwrap();
            // Bypass the low-water fast path on explicit calls.
            inner.next_valid_to = Some(now);
            inner.purge(now, &mut events);
        }
        self.broadcast(events);
    }

    /// Snapshot of all tracked devices. Consistent at call time, no side
    /// effects.
    pub fn devices(&self) -> Vec<DeviceSnapshot> {
        let inner = self.inner.lock().unwrap();
        inner.devices.values().map(SsdpDevice::snapshot).collect()
    }

    pub fn get(&self, udn: &Udn) -> Option<DeviceSnapshot> {
        let inner = self.inner.lock().unwrap();
        inner.devices.get(udn).map(SsdpDevice::snapshot)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn broadcast(&self, events: Vec<DeviceEvent>) {
        for event in events {
            self.bus.broadcast(event);
        }
    }
}

impl Default for SsdpDeviceTracker {
    fn default() -> Self {
        Self::new()
    }
}
