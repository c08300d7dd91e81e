//! Modèles publics exposés par le control point.

use std::time::SystemTime;

use serde::Serialize;
use ucpssdp::SsdpFamily;

use crate::Udn;

/// Une URL de description connue pour un device, avec la famille d'adresses
/// par laquelle elle a été apprise et sa propre date d'expiration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceLocation {
    pub url: String,
    pub family: SsdpFamily,
    pub valid_to: SystemTime,
}

/// Immutable view of a tracked device, carried by [`DeviceEvent`]s.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSnapshot {
    pub udn: Udn,
    pub locations: Vec<DeviceLocation>,
    pub last_seen: SystemTime,
    /// Every ST/NT this device was seen under.
    pub types_seen: Vec<String>,
    /// Last SERVER header observed, when any.
    pub server: Option<String>,
}

impl DeviceSnapshot {
    /// Any still-listed location URL, preferring the most recently refreshed.
    pub fn location(&self) -> Option<&str> {
        self.locations
            .iter()
            .max_by_key(|loc| loc.valid_to)
            .map(|loc| loc.url.as_str())
    }
}

/// Lifecycle events broadcast by the device tracker.
#[derive(Debug, Clone, Serialize)]
pub enum DeviceEvent {
    Added(DeviceSnapshot),
    Updated(DeviceSnapshot),
    Removed(DeviceSnapshot),
}

impl DeviceEvent {
    pub fn device(&self) -> &DeviceSnapshot {
        match self {
            DeviceEvent::Added(d) | DeviceEvent::Updated(d) | DeviceEvent::Removed(d) => d,
        }
    }
}

/// One decoded GENA NOTIFY, dispatched to the owning subscription.
#[derive(Debug, Clone, Serialize)]
pub struct UpnpEvent {
    pub service_id: String,
    pub sid: String,
    pub seq: Option<u32>,
    /// Changed state variables, in document order.
    pub state_variables: Vec<(String, String)>,
}
