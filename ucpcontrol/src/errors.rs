use thiserror::Error;

/// Socket/HTTP failure while talking to a device.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("http request failed: {0}")]
    Http(String),
    #[error("cannot build request: {0}")]
    InvalidRequest(String),
}

/// Failure while fetching or parsing a device description document.
#[derive(Error, Debug)]
pub enum DescriptionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("description fetch returned HTTP {0}")]
    HttpStatus(u16),
    #[error("description body is empty")]
    EmptyBody,
    #[error("invalid description XML: {0}")]
    Xml(String),
}

/// Failure of an explicit subscribe/unsubscribe call.
///
/// Renewal failures are not surfaced through this type: the manager retries
/// them itself and broadcasts [`SubscriptionEvent::Expired`] when it gives
/// up.
///
/// [`SubscriptionEvent::Expired`]: crate::eventing::SubscriptionEvent
#[derive(Error, Debug)]
pub enum EventingError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("device refused SUBSCRIBE for {service_id} (HTTP {status})")]
    SubscriptionRejected { service_id: String, status: u16 },
    #[error("SUBSCRIBE response for {0} carried no SID")]
    MissingSid(String),
    #[error("service {0} does not support eventing")]
    EventingNotSupported(String),
    #[error("no active subscription for service {0}")]
    NotSubscribed(String),
}

/// Top-level control point error.
#[derive(Error, Debug)]
pub enum ControlPointError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Description(#[from] DescriptionError),
    #[error(transparent)]
    Eventing(#[from] EventingError),
    #[error("discovery point is not started")]
    NotStarted,
}
