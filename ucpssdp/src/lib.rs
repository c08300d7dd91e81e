//! # ucpssdp - Simple Service Discovery Protocol, côté control point
//!
//! Ce crate implémente la partie SSDP d'un control point UPnP : décodage des
//! datagrammes NOTIFY / réponses M-SEARCH, envoi des M-SEARCH, et les deux
//! listeners (annonces multicast et recherches unicast).
//!
//! ## Fonctionnalités
//!
//! - ✅ Décodage non strict des datagrammes SSDP (headers insensibles à la casse)
//! - ✅ Cache de décodage borné (les devices retransmettent des paquets identiques)
//! - ✅ Listener d'annonces `ssdp:alive` / `ssdp:byebye` / `ssdp:update`
//! - ✅ Envoi M-SEARCH multicast ou unicast et collecte des réponses
//! - ✅ Arrêt propre : les sockets bloquées sont réveillées immédiatement
//!
//! ## Règle importante
//!
//! Le control point ne doit **jamais** binder le port UDP 1900 pour ses
//! recherches : si un device SSDP tourne sur la même machine, le kernel
//! répartirait les datagrammes entre les deux sockets et des réponses
//! seraient perdues. Seul le listener d'annonces rejoint le groupe multicast
//! sur le port 1900 (avec `SO_REUSEADDR`) ; les M-SEARCH partent d'un port
//! éphémère.

pub mod advertisement;
pub mod codec;
pub mod headers;
pub mod search;
pub mod socket;

pub use advertisement::SsdpAdvertisementListener;
pub use codec::{DecodeError, SsdpCodec, StartLine};
pub use headers::{SsdpHeaders, SsdpSource};
pub use search::SsdpSearchListener;
pub use socket::SsdpFamily;

/// Adresse multicast SSDP IPv4
pub const SSDP_MULTICAST_ADDR: &str = "239.255.255.250";

/// Adresse multicast SSDP IPv6 (link-local)
pub const SSDP_MULTICAST_ADDR_V6: &str = "FF02::C";

/// Port SSDP
pub const SSDP_PORT: u16 = 1900;

/// Durée de validité par défaut des annonces (en secondes)
pub const MAX_AGE: u32 = 1800;

/// Délai d'attente M-SEARCH par défaut (header MX, en secondes)
pub const SSDP_MX: u32 = 4;

/// Search target couvrant tous les devices
pub const SSDP_ST_ALL: &str = "ssdp:all";

/// Search target des root devices
pub const SSDP_ST_ROOTDEVICE: &str = "upnp:rootdevice";

/// Valeurs du header NTS
pub const SSDP_ALIVE: &str = "ssdp:alive";
pub const SSDP_BYEBYE: &str = "ssdp:byebye";
pub const SSDP_UPDATE: &str = "ssdp:update";

/// Message SSDP décodé et classifié, tel que transmis au device tracker.
#[derive(Debug, Clone)]
pub enum SsdpMessage {
    Alive(SsdpHeaders),
    ByeBye(SsdpHeaders),
    Update(SsdpHeaders),
    SearchResponse(SsdpHeaders),
}

impl SsdpMessage {
    /// Headers portés par le message, quel que soit son type.
    pub fn headers(&self) -> &SsdpHeaders {
        match self {
            SsdpMessage::Alive(h)
            | SsdpMessage::ByeBye(h)
            | SsdpMessage::Update(h)
            | SsdpMessage::SearchResponse(h) => h,
        }
    }
}
