//! Eventing GENA : cycle de vie des abonnements (SUBSCRIBE, renouvellement,
//! UNSUBSCRIBE) et dispatch des NOTIFY entrants.
//!
//! Le manager possède trois fils d'exécution : l'accepteur HTTP des NOTIFY,
//! le worker qui planifie les renouvellements, et un thread détaché par
//! renouvellement en cours pour qu'un device lent n'en bloque aucun autre.

use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{debug, info, warn};
use xmltree::Element;

use crate::description::{ServiceDescription, xml_children};
use crate::errors::{EventingError, TransportError};
use crate::events::EventBus;
use crate::model::UpnpEvent;
use crate::net::{format_ip, host_header, local_ip_for, parse_host_port};
use crate::requester::UpnpRequester;

/// Default subscription lease requested from devices.
pub const DEFAULT_SUBSCRIPTION_TIMEOUT: Duration = Duration::from_secs(1800);

const MAX_RENEWAL_ATTEMPTS: u32 = 3;
const WORKER_LOOP_INTERVAL_MILLIS: u64 = 250;
const HTTP_READ_TIMEOUT_SECS: u64 = 5;
const RETRY_DELAY_SECS: u64 = 15;
const BACKLOG_TTL: Duration = Duration::from_secs(5);
const NOTIFY_PATH: &str = "/notify";

/// Events broadcast to consumers of [`UpnpEventManager::subscribe_events`].
#[derive(Debug, Clone)]
pub enum SubscriptionEvent {
    /// A NOTIFY matched an active subscription.
    PropertyChange(UpnpEvent),
    /// Renewals kept failing and the subscription was abandoned.
    Expired { service_id: String, sid: String },
}

/// Outcome reported to the device for one inbound NOTIFY.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyDisposition {
    /// Accepted (also for unknown SIDs: dropped locally, but the device
    /// must not see an error for its in-flight events).
    Ok,
    /// Not even a well-formed event request.
    BadRequest,
    /// NT/NTS/SID preconditions not met.
    PreconditionFailed,
}

impl NotifyDisposition {
    fn status(self) -> (u16, &'static str) {
        match self {
            NotifyDisposition::Ok => (200, "OK"),
            NotifyDisposition::BadRequest => (400, "Bad Request"),
            NotifyDisposition::PreconditionFailed => (412, "Precondition Failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubscriptionState {
    Active,
    Renewing,
}

#[derive(Debug, Clone)]
struct Subscription {
    service_id: String,
    event_sub_url: String,
    callback_url: String,
    sid: String,
    timeout: Duration,
    expires_at: Instant,
    renew_at: Instant,
    attempts: u32,
    state: SubscriptionState,
}

#[derive(Default)]
struct SubscriptionTable {
    by_sid: HashMap<String, Subscription>,
    sid_by_service: HashMap<String, String>,
}

struct BacklogEntry {
    stored_at: Instant,
    seq: Option<u32>,
    body: Vec<u8>,
}

struct EventingInner {
    requester: Arc<dyn UpnpRequester>,
    table: Mutex<SubscriptionTable>,
    /// NOTIFYs whose SID is not known yet, kept only while a SUBSCRIBE is
    /// in flight. Some devices fire events before answering SUBSCRIBE.
    backlog: Mutex<HashMap<String, BacklogEntry>>,
    pending_subscribes: AtomicUsize,
    bus: EventBus<SubscriptionEvent>,
    stop: AtomicBool,
    callback_port: u16,
}

/// Gestionnaire des abonnements GENA d'un control point.
pub struct UpnpEventManager {
    inner: Arc<EventingInner>,
    worker: Option<JoinHandle<()>>,
    http: Option<JoinHandle<()>>,
    listener_addr: SocketAddr,
}

impl UpnpEventManager {
    /// Bind the NOTIFY listener and launch the renewal worker.
    pub fn spawn(requester: Arc<dyn UpnpRequester>) -> io::Result<Self> {
        let listener = TcpListener::bind("0.0.0.0:0")?;
        let listener_addr = listener.local_addr()?;
        info!("✅ UPnP event listener bound on {}", listener_addr);

        let inner = Arc::new(EventingInner {
            requester,
            table: Mutex::new(SubscriptionTable::default()),
            backlog: Mutex::new(HashMap::new()),
            pending_subscribes: AtomicUsize::new(0),
            bus: EventBus::new(),
            stop: AtomicBool::new(false),
            callback_port: listener_addr.port(),
        });

        let http = {
            let inner = Arc::clone(&inner);
            thread::Builder::new()
                .name("upnp-notify-http".into())
                .spawn(move || run_http_listener(listener, inner))?
        };

        let (outcome_tx, outcome_rx) = unbounded::<RenewalOutcome>();
        let worker = {
            let inner = Arc::clone(&inner);
            thread::Builder::new()
                .name("upnp-event-worker".into())
                .spawn(move || run_worker(inner, outcome_tx, outcome_rx))?
        };

        Ok(Self {
            inner,
            worker: Some(worker),
            http: Some(http),
            listener_addr,
        })
    }

    /// Port the NOTIFY listener accepts callbacks on.
    pub fn callback_port(&self) -> u16 {
        self.listener_addr.port()
    }

    /// Receive property-change and expiry events.
    pub fn subscribe_events(&self) -> Receiver<SubscriptionEvent> {
        self.inner.bus.subscribe()
    }

    /// SUBSCRIBE to a service's eventing endpoint.
    ///
    /// On success the SID issued by the device is recorded and its renewal
    /// scheduled; on failure nothing is recorded. A service without an
    /// eventSubURL is an explicit "not supported" outcome, not a transport
    /// failure.
    pub fn subscribe(
        &self,
        service: &ServiceDescription,
        timeout: Option<Duration>,
    ) -> Result<String, EventingError> {
        let service_id = service.key();
        let Some(event_sub_url) = service.event_sub_url.clone() else {
            return Err(EventingError::EventingNotSupported(service_id));
        };
        let requested = timeout.unwrap_or(DEFAULT_SUBSCRIPTION_TIMEOUT);

        let callback_url = self
            .inner
            .callback_url(&event_sub_url)
            .map_err(TransportError::Io)?;

        debug!(
            service = service_id.as_str(),
            callback = callback_url.as_str(),
            "subscribing"
        );

        // Backlog NOTIFYs that beat the SUBSCRIBE response.
        self.inner.pending_subscribes.fetch_add(1, Ordering::SeqCst);
        let outcome = raw_subscribe(
            self.inner.requester.as_ref(),
            &event_sub_url,
            &callback_url,
            requested,
        );
        let result = match outcome {
            Ok((sid, effective)) => {
                let now = Instant::now();
                let subscription = Subscription {
                    service_id: service_id.clone(),
                    event_sub_url,
                    callback_url,
                    sid: sid.clone(),
                    timeout: effective,
                    expires_at: now + effective,
                    renew_at: now + renewal_delay(effective),
                    attempts: 0,
                    state: SubscriptionState::Active,
                };
                {
                    let mut table = self.inner.table.lock().unwrap();
                    if let Some(old_sid) = table
                        .sid_by_service
                        .insert(service_id.clone(), sid.clone())
                    {
                        table.by_sid.remove(&old_sid);
                    }
                    table.by_sid.insert(sid.clone(), subscription);
                }
                info!(
                    service = service_id.as_str(),
                    sid = sid.as_str(),
                    "subscribed (timeout {}s)",
                    effective.as_secs()
                );
                self.inner.replay_backlog(&sid);
                Ok(sid)
            }
            Err(RawSubscribeFailure::Transport(e)) => Err(EventingError::Transport(e)),
            Err(RawSubscribeFailure::Rejected(status)) => {
                Err(EventingError::SubscriptionRejected { service_id, status })
            }
            Err(RawSubscribeFailure::MissingSid) => Err(EventingError::MissingSid(service_id)),
        };
        self.inner.pending_subscribes.fetch_sub(1, Ordering::SeqCst);
        result
    }

    /// Drop the subscription for a service. The UNSUBSCRIBE is best-effort:
    /// the local record goes away even when the device is unreachable,
    /// otherwise the renewal timer would leak.
    pub fn unsubscribe(&self, service_id: &str) -> Result<(), EventingError> {
        let removed = {
            let mut table = self.inner.table.lock().unwrap();
            let sid = table
                .sid_by_service
                .remove(service_id)
                .ok_or_else(|| EventingError::NotSubscribed(service_id.to_string()))?;
            table.by_sid.remove(&sid)
        };
        if let Some(subscription) = removed {
            send_unsubscribe(self.inner.requester.as_ref(), &subscription);
        }
        Ok(())
    }

    /// Force every active subscription to renew on the next worker tick.
    pub fn renew_all(&self) {
        let now = Instant::now();
        let mut table = self.inner.table.lock().unwrap();
        for subscription in table.by_sid.values_mut() {
            if subscription.state == SubscriptionState::Active {
                subscription.renew_at = now;
            }
        }
    }

    /// SID currently held for a service, if any.
    pub fn sid_for(&self, service_id: &str) -> Option<String> {
        let table = self.inner.table.lock().unwrap();
        table.sid_by_service.get(service_id).cloned()
    }

    /// `(service_id, sid)` of every live subscription.
    pub fn subscriptions(&self) -> Vec<(String, String)> {
        let table = self.inner.table.lock().unwrap();
        table
            .by_sid
            .values()
            .map(|s| (s.service_id.clone(), s.sid.clone()))
            .collect()
    }

    /// Feed one inbound NOTIFY. Called by the HTTP listener; exposed so a
    /// collocated HTTP server can route event callbacks here itself.
    pub fn handle_notify(
        &self,
        nt: Option<&str>,
        nts: Option<&str>,
        sid: Option<&str>,
        seq: Option<u32>,
        body: &[u8],
    ) -> NotifyDisposition {
        self.inner.handle_notify(nt, nts, sid, seq, body)
    }

    /// Best-effort unsubscribe-all, then stop every thread. In-flight
    /// renewal calls are abandoned; their late outcomes find no record to
    /// mutate.
    pub fn shutdown(&mut self) {
        if self.inner.stop.swap(true, Ordering::SeqCst) {
            return;
        }
        let drained: Vec<Subscription> = {
            let mut table = self.inner.table.lock().unwrap();
            table.sid_by_service.clear();
            table.by_sid.drain().map(|(_, sub)| sub).collect()
        };
        for subscription in &drained {
            send_unsubscribe(self.inner.requester.as_ref(), subscription);
        }
        // Wake the accept loop so it observes the stop flag.
        let _ = TcpStream::connect(("127.0.0.1", self.listener_addr.port()));
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.http.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for UpnpEventManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl EventingInner {
    /// Callback URL a device of this event endpoint can reach us on.
    fn callback_url(&self, event_sub_url: &str) -> io::Result<String> {
        let (host, port) = parse_host_port(event_sub_url).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot extract host from {event_sub_url}"),
            )
        })?;
        let local_ip = local_ip_for(&host, port)?;
        Ok(format!(
            "http://{}:{}{}",
            format_ip(&local_ip),
            self.callback_port,
            NOTIFY_PATH
        ))
    }

    fn handle_notify(
        &self,
        nt: Option<&str>,
        nts: Option<&str>,
        sid: Option<&str>,
        seq: Option<u32>,
        body: &[u8],
    ) -> NotifyDisposition {
        let (Some(nt), Some(nts)) = (nt, nts) else {
            return NotifyDisposition::BadRequest;
        };
        if nt != "upnp:event" || nts != "upnp:propchange" {
            return NotifyDisposition::PreconditionFailed;
        }
        let Some(sid) = sid else {
            return NotifyDisposition::PreconditionFailed;
        };

        self.dispatch_notify(sid, seq, body);
        NotifyDisposition::Ok
    }

    fn dispatch_notify(&self, sid: &str, seq: Option<u32>, body: &[u8]) {
        let service_id = {
            let table = self.table.lock().unwrap();
            table.by_sid.get(sid).map(|s| s.service_id.clone())
        };

        let Some(service_id) = service_id else {
            if self.pending_subscribes.load(Ordering::SeqCst) > 0 {
                debug!("storing NOTIFY in backlog for SID {}", sid);
                self.backlog.lock().unwrap().insert(
                    sid.to_string(),
                    BacklogEntry {
                        stored_at: Instant::now(),
                        seq,
                        body: body.to_vec(),
                    },
                );
            } else {
                debug!("dropping NOTIFY for unknown SID {}", sid);
            }
            return;
        };

        match parse_property_set(body) {
            Ok(state_variables) => {
                debug!(
                    service = service_id.as_str(),
                    changes = state_variables.len(),
                    "dispatching NOTIFY"
                );
                self.bus.broadcast(SubscriptionEvent::PropertyChange(UpnpEvent {
                    service_id,
                    sid: sid.to_string(),
                    seq,
                    state_variables,
                }));
            }
            Err(err) => {
                warn!(
                    service = service_id.as_str(),
                    error = err.as_str(),
                    "discarding NOTIFY with unparsable body"
                );
            }
        }
    }

    fn replay_backlog(&self, sid: &str) {
        let entry = self.backlog.lock().unwrap().remove(sid);
        if let Some(entry) = entry {
            debug!("re-playing backlogged NOTIFY for SID {}", sid);
            self.dispatch_notify(sid, entry.seq, &entry.body);
        }
    }

    fn purge_backlog(&self) {
        let now = Instant::now();
        self.backlog
            .lock()
            .unwrap()
            .retain(|_, entry| now.duration_since(entry.stored_at) < BACKLOG_TTL);
    }
}

// ---------------------------------------------------------------------------
// SUBSCRIBE / UNSUBSCRIBE wire calls
// ---------------------------------------------------------------------------

enum RawSubscribeFailure {
    Transport(TransportError),
    Rejected(u16),
    MissingSid,
}

/// Initial SUBSCRIBE: CALLBACK + NT. Returns the SID and the lease granted
/// by the device (which may be shorter than requested).
fn raw_subscribe(
    requester: &dyn UpnpRequester,
    event_sub_url: &str,
    callback_url: &str,
    timeout: Duration,
) -> Result<(String, Duration), RawSubscribeFailure> {
    let host = host_header(event_sub_url).ok_or_else(|| {
        RawSubscribeFailure::Transport(TransportError::InvalidRequest(format!(
            "cannot extract host from {event_sub_url}"
        )))
    })?;
    let callback = format!("<{}>", callback_url);
    let timeout_header = format_timeout(timeout);
    let response = requester
        .http_request(
            "SUBSCRIBE",
            event_sub_url,
            &[
                ("HOST", host.as_str()),
                ("CALLBACK", callback.as_str()),
                ("NT", "upnp:event"),
                ("TIMEOUT", timeout_header.as_str()),
            ],
            None,
        )
        .map_err(RawSubscribeFailure::Transport)?;

    if response.status != 200 {
        return Err(RawSubscribeFailure::Rejected(response.status));
    }
    let sid = response
        .header("sid")
        .filter(|s| !s.is_empty())
        .map(String::from)
        .ok_or(RawSubscribeFailure::MissingSid)?;
    let effective = parse_timeout_header(response.header("timeout")).unwrap_or(timeout);
    Ok((sid, effective))
}

struct RenewedLease {
    new_sid: Option<String>,
    effective: Duration,
}

/// Renewal SUBSCRIBE: SID + TIMEOUT, no CALLBACK.
fn renew_request(
    requester: &dyn UpnpRequester,
    event_sub_url: &str,
    sid: &str,
    timeout: Duration,
) -> Result<RenewedLease> {
    let host = host_header(event_sub_url).context("cannot extract host for renewal")?;
    let timeout_header = format_timeout(timeout);
    let response = requester.http_request(
        "SUBSCRIBE",
        event_sub_url,
        &[
            ("HOST", host.as_str()),
            ("SID", sid),
            ("TIMEOUT", timeout_header.as_str()),
        ],
        None,
    )?;
    if response.status != 200 {
        bail!("SUBSCRIBE renewal returned HTTP {}", response.status);
    }
    // Devices should echo the SID; some hand out a fresh one instead.
    let new_sid = response
        .header("sid")
        .filter(|s| !s.is_empty() && *s != sid)
        .map(String::from);
    let effective = parse_timeout_header(response.header("timeout")).unwrap_or(timeout);
    Ok(RenewedLease { new_sid, effective })
}

fn send_unsubscribe(requester: &dyn UpnpRequester, subscription: &Subscription) {
    let Some(host) = host_header(&subscription.event_sub_url) else {
        return;
    };
    match requester.http_request(
        "UNSUBSCRIBE",
        &subscription.event_sub_url,
        &[("HOST", host.as_str()), ("SID", subscription.sid.as_str())],
        None,
    ) {
        Ok(response) if response.is_success() => {
            debug!(
                service = subscription.service_id.as_str(),
                "unsubscribed"
            );
        }
        Ok(response) => {
            warn!(
                service = subscription.service_id.as_str(),
                status = response.status,
                "UNSUBSCRIBE returned non-success status"
            );
        }
        Err(err) => {
            warn!(
                service = subscription.service_id.as_str(),
                error = %err,
                "UNSUBSCRIBE request failed"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Renewal worker
// ---------------------------------------------------------------------------

enum RenewalResult {
    Renewed(RenewedLease),
    /// Renewal failed but a fresh SUBSCRIBE obtained a replacement SID.
    Replaced { sid: String, effective: Duration },
    Failed(String),
}

struct RenewalOutcome {
    sid: String,
    result: RenewalResult,
}

fn run_worker(
    inner: Arc<EventingInner>,
    outcome_tx: Sender<RenewalOutcome>,
    outcome_rx: Receiver<RenewalOutcome>,
) {
    loop {
        if inner.stop.load(Ordering::SeqCst) {
            break;
        }
        while let Ok(outcome) = outcome_rx.try_recv() {
            apply_renewal_outcome(&inner, outcome);
        }
        schedule_due_renewals(&inner, &outcome_tx);
        inner.purge_backlog();
        thread::sleep(Duration::from_millis(WORKER_LOOP_INTERVAL_MILLIS));
    }
}

fn schedule_due_renewals(inner: &Arc<EventingInner>, outcome_tx: &Sender<RenewalOutcome>) {
    let now = Instant::now();
    let due: Vec<Subscription> = {
        let mut table = inner.table.lock().unwrap();
        table
            .by_sid
            .values_mut()
            .filter(|s| s.state == SubscriptionState::Active && s.renew_at <= now)
            .map(|s| {
                s.state = SubscriptionState::Renewing;
                s.clone()
            })
            .collect()
    };

    for subscription in due {
        let requester = Arc::clone(&inner.requester);
        let outcome_tx = outcome_tx.clone();
        let spawned = thread::Builder::new()
            .name("upnp-renewal".into())
            .spawn(move || {
                let result = match renew_request(
                    requester.as_ref(),
                    &subscription.event_sub_url,
                    &subscription.sid,
                    subscription.timeout,
                ) {
                    Ok(lease) => RenewalResult::Renewed(lease),
                    Err(err) => {
                        // Devices drop SIDs across reboots; a fresh
                        // SUBSCRIBE recovers where the renewal cannot.
                        warn!(
                            service = subscription.service_id.as_str(),
                            error = %err,
                            "renewal failed, falling back to fresh SUBSCRIBE"
                        );
                        match raw_subscribe(
                            requester.as_ref(),
                            &subscription.event_sub_url,
                            &subscription.callback_url,
                            subscription.timeout,
                        ) {
                            Ok((sid, effective)) => RenewalResult::Replaced { sid, effective },
                            Err(RawSubscribeFailure::Transport(e)) => {
                                RenewalResult::Failed(format!("{err}; resubscribe: {e}"))
                            }
                            Err(RawSubscribeFailure::Rejected(status)) => RenewalResult::Failed(
                                format!("{err}; resubscribe rejected with HTTP {status}"),
                            ),
                            Err(RawSubscribeFailure::MissingSid) => RenewalResult::Failed(
                                format!("{err}; resubscribe response carried no SID"),
                            ),
                        }
                    }
                };
                // A send after shutdown just gets dropped.
                let _ = outcome_tx.send(RenewalOutcome {
                    sid: subscription.sid,
                    result,
                });
            });
        if let Err(err) = spawned {
            warn!("failed to spawn renewal thread: {}", err);
        }
    }
}

fn apply_renewal_outcome(inner: &Arc<EventingInner>, outcome: RenewalOutcome) {
    let mut expired: Option<(String, String)> = None;
    {
        let mut table = inner.table.lock().unwrap();
        // Unsubscribed (or shut down) while the call was in flight: the
        // abandoned outcome must not resurrect any state.
        let Some(mut subscription) = table.by_sid.remove(&outcome.sid) else {
            return;
        };
        let now = Instant::now();
        match outcome.result {
            RenewalResult::Renewed(lease) => {
                if let Some(new_sid) = lease.new_sid {
                    debug!(
                        service = subscription.service_id.as_str(),
                        "device switched SID on renewal"
                    );
                    subscription.sid = new_sid;
                }
                subscription.timeout = lease.effective;
                subscription.expires_at = now + lease.effective;
                subscription.renew_at = now + renewal_delay(lease.effective);
                subscription.attempts = 0;
                subscription.state = SubscriptionState::Active;
                debug!(
                    service = subscription.service_id.as_str(),
                    "subscription renewed"
                );
                table
                    .sid_by_service
                    .insert(subscription.service_id.clone(), subscription.sid.clone());
                table
                    .by_sid
                    .insert(subscription.sid.clone(), subscription);
            }
            RenewalResult::Replaced { sid, effective } => {
                subscription.sid = sid;
                subscription.timeout = effective;
                subscription.expires_at = now + effective;
                subscription.renew_at = now + renewal_delay(effective);
                subscription.attempts = 0;
                subscription.state = SubscriptionState::Active;
                info!(
                    service = subscription.service_id.as_str(),
                    sid = subscription.sid.as_str(),
                    "re-subscribed with a fresh SID"
                );
                table
                    .sid_by_service
                    .insert(subscription.service_id.clone(), subscription.sid.clone());
                table
                    .by_sid
                    .insert(subscription.sid.clone(), subscription);
            }
            RenewalResult::Failed(reason) => {
                subscription.attempts += 1;
                // Capped retries, and no retrying past the lease end.
                if subscription.attempts >= MAX_RENEWAL_ATTEMPTS
                    || now >= subscription.expires_at
                {
                    warn!(
                        service = subscription.service_id.as_str(),
                        error = reason.as_str(),
                        "giving up on subscription after {} attempts",
                        subscription.attempts
                    );
                    table.sid_by_service.remove(&subscription.service_id);
                    expired = Some((subscription.service_id, subscription.sid));
                } else {
                    warn!(
                        service = subscription.service_id.as_str(),
                        error = reason.as_str(),
                        attempt = subscription.attempts,
                        "renewal attempt failed, will retry"
                    );
                    subscription.state = SubscriptionState::Active;
                    subscription.renew_at = now + Duration::from_secs(RETRY_DELAY_SECS);
                    table
                        .by_sid
                        .insert(subscription.sid.clone(), subscription);
                }
            }
        }
    }
    if let Some((service_id, sid)) = expired {
        inner
            .bus
            .broadcast(SubscriptionEvent::Expired { service_id, sid });
    }
}

/// Renew well before the lease runs out: at 80% of the granted timeout.
fn renewal_delay(timeout: Duration) -> Duration {
    Duration::from_secs((timeout.as_secs() * 4 / 5).max(1))
}

fn format_timeout(timeout: Duration) -> String {
    format!("Second-{}", timeout.as_secs())
}

/// Parse a `TIMEOUT: Second-<n>` header. `Second-infinite` (and anything
/// unparsable) yields `None`, keeping the requested lease.
fn parse_timeout_header(raw: Option<&str>) -> Option<Duration> {
    let value = raw?;
    let lower = value.trim().to_ascii_lowercase();
    let idx = lower.find("second-")?;
    let number = &lower[idx + 7..];
    number.parse::<u64>().ok().map(Duration::from_secs)
}

/// Decode a UPnP property set body into `(variable, value)` pairs.
fn parse_property_set(body: &[u8]) -> Result<Vec<(String, String)>, String> {
    // Some devices pad the body with trailing whitespace or NULs.
    let end = body
        .iter()
        .rposition(|b| !matches!(b, b' ' | b'\t' | b'\r' | b'\n' | 0))
        .map(|i| i + 1)
        .unwrap_or(0);
    let trimmed = &body[..end];
    if trimmed.is_empty() {
        return Err("empty body".to_string());
    }
    let root = Element::parse(std::io::Cursor::new(trimmed)).map_err(|e| e.to_string())?;
    if root.name != "propertyset" {
        return Err(format!("unexpected root element <{}>", root.name));
    }
    let mut changes = Vec::new();
    for property in xml_children(&root) {
        if property.name != "property" {
            continue;
        }
        for variable in xml_children(property) {
            let value = variable
                .get_text()
                .map(|cow| cow.into_owned())
                .unwrap_or_default();
            changes.push((variable.name.clone(), value));
        }
    }
    Ok(changes)
}

// ---------------------------------------------------------------------------
// Inbound NOTIFY HTTP listener
// ---------------------------------------------------------------------------

fn run_http_listener(listener: TcpListener, inner: Arc<EventingInner>) {
    for stream in listener.incoming() {
        if inner.stop.load(Ordering::SeqCst) {
            break;
        }
        match stream {
            Ok(mut stream) => {
                if let Err(err) = stream
                    .set_read_timeout(Some(Duration::from_secs(HTTP_READ_TIMEOUT_SECS)))
                {
                    warn!("failed to set read timeout on notify connection: {}", err);
                }
                match read_http_request(&mut stream) {
                    Ok(request) => {
                        if request.method != "NOTIFY" {
                            let _ = write_http_response(&mut stream, 405, "Method Not Allowed");
                            continue;
                        }
                        let seq = request
                            .headers
                            .get("seq")
                            .and_then(|v| v.trim().parse::<u32>().ok());
                        let disposition = inner.handle_notify(
                            request.headers.get("nt").map(String::as_str),
                            request.headers.get("nts").map(String::as_str),
                            request.headers.get("sid").map(String::as_str),
                            seq,
                            &request.body,
                        );
                        let (status, message) = disposition.status();
                        let _ = write_http_response(&mut stream, status, message);
                    }
                    Err(err) => {
                        warn!("failed to parse incoming notify request: {}", err);
                        let _ = write_http_response(&mut stream, 400, "Bad Request");
                    }
                }
            }
            Err(err) => {
                warn!("incoming notify connection failed: {}", err);
            }
        }
    }
    debug!("notify listener stopped");
}

struct HttpRequest {
    method: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

fn read_http_request(stream: &mut TcpStream) -> io::Result<HttpRequest> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut request_line = String::new();
    if reader.read_line(&mut request_line)? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "missing request line",
        ));
    }

    let request_line = request_line.trim_end_matches(['\r', '\n']);
    let method = request_line
        .split_whitespace()
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing method"))?
        .to_ascii_uppercase();

    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        let len = reader.read_line(&mut line)?;
        if len == 0 {
            break;
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        if let Some((name, value)) = trimmed.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body)?;

    Ok(HttpRequest {
        method,
        headers,
        body,
    })
}

fn write_http_response(stream: &mut TcpStream, status: u16, message: &str) -> io::Result<()> {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        status, message
    );
    stream.write_all(response.as_bytes())
}
