//! # ucpcontrol - UPnP control point runtime
//!
//! Découverte des devices UPnP du réseau local (tracker SSDP multi-interface)
//! et gestion du cycle de vie des abonnements GENA (SUBSCRIBE / renouvellement
//! / NOTIFY entrants).
//!
//! Deux sous-systèmes indépendants :
//!
//! - [`DiscoveryPoint`] + [`SsdpDeviceTracker`] : vue canonique et dédupliquée
//!   des devices annoncés, avec expiration par `max-age` et événements
//!   added / updated / removed.
//! - [`UpnpEventManager`] : abonnements aux services UPnP, renouvellement
//!   autonome avant expiration, dispatch des NOTIFY vers les abonnés.

mod events;

pub mod description;
pub mod discovery;
pub mod errors;
pub mod eventing;
pub mod identity;
pub mod model;
pub mod net;
pub mod requester;
pub mod tracker;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use description::{DeviceDescription, ServiceDescription, fetch_description};
pub use discovery::DiscoveryPoint;
pub use errors::{ControlPointError, DescriptionError, EventingError, TransportError};
pub use eventing::{NotifyDisposition, SubscriptionEvent, UpnpEventManager};
pub use identity::udn_from_usn;
pub use model::{DeviceEvent, DeviceLocation, DeviceSnapshot, UpnpEvent};
pub use requester::{HttpResponse, UpnpRequester, UreqRequester};
pub use tracker::{SsdpDevice, SsdpDeviceTracker};

/// UDN normalisé (ex: "uuid:xxxx", en minuscules) identifiant un device.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Udn(pub String);

impl std::fmt::Display for Udn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub(crate) const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);
