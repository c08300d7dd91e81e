//! Orchestration de la découverte : une paire de listeners SSDP par adresse
//! locale, fan-in vers un tracker partagé ou privé.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{debug, info};
use ucpssdp::{SsdpAdvertisementListener, SsdpFamily, SsdpMessage, SsdpSearchListener};

use crate::errors::{ControlPointError, TransportError};
use crate::model::DeviceEvent;
use crate::tracker::SsdpDeviceTracker;

/// Un point de découverte : un listener d'annonces + un listener de
/// recherche sur une famille d'adresses, alimentant un [`SsdpDeviceTracker`].
///
/// Sur un hôte dual-stack, créer un point par famille avec
/// [`DiscoveryPoint::with_tracker`] et le même tracker : le même device vu
/// en IPv4 et en IPv6 ne produit qu'un enregistrement.
pub struct DiscoveryPoint {
    family: SsdpFamily,
    tracker: Arc<SsdpDeviceTracker>,
    advertisement: Option<SsdpAdvertisementListener>,
    search: Option<SsdpSearchListener>,
    fan_in: Option<JoinHandle<()>>,
    sink: Option<Sender<SsdpMessage>>,
}

impl DiscoveryPoint {
    /// Discovery point with its own private tracker.
    pub fn new(family: SsdpFamily) -> Self {
        Self::with_tracker(family, Arc::new(SsdpDeviceTracker::new()))
    }

    /// Discovery point feeding a shared tracker (multi-interface setups).
    pub fn with_tracker(family: SsdpFamily, tracker: Arc<SsdpDeviceTracker>) -> Self {
        Self {
            family,
            tracker,
            advertisement: None,
            search: None,
            fan_in: None,
            sink: None,
        }
    }

    pub fn family(&self) -> SsdpFamily {
        self.family
    }

    pub fn tracker(&self) -> Arc<SsdpDeviceTracker> {
        Arc::clone(&self.tracker)
    }

    /// Receive device lifecycle events from the tracker.
    pub fn subscribe(&self) -> Receiver<DeviceEvent> {
        self.tracker.subscribe()
    }

    /// Bind the sockets and start the listeners. Idempotent.
    ///
    /// Starting never triggers an M-SEARCH by itself: purely passive,
    /// advertisement-only discovery is a supported mode. Call [`search`]
    /// when an active sweep is wanted.
    ///
    /// [`search`]: DiscoveryPoint::search
    pub fn start(&mut self) -> io::Result<()> {
        if self.fan_in.is_some() {
            return Ok(());
        }

        let (tx, rx) = unbounded::<SsdpMessage>();
        let mut advertisement = SsdpAdvertisementListener::new(self.family, tx.clone())?;
        let mut search = SsdpSearchListener::new(self.family, tx.clone())?;
        advertisement.start();
        search.start();

        let tracker = Arc::clone(&self.tracker);
        let fan_in = thread::Builder::new()
            .name("ssdp-fan-in".into())
            .spawn(move || {
                // One consumer: per-socket arrival order is preserved and
                // tracker mutations stay serialized per event.
                while let Ok(message) = rx.recv() {
                    tracker.apply(&message);
                }
                debug!("ssdp fan-in drained, exiting");
            })?;

        self.advertisement = Some(advertisement);
        self.search = Some(search);
        self.fan_in = Some(fan_in);
        self.sink = Some(tx);
        info!("✅ discovery started ({:?})", self.family);
        Ok(())
    }

    /// Stop both listeners, release the sockets and join every thread.
    /// Idempotent; safe to call on a never-started point.
    pub fn stop(&mut self) {
        if let Some(mut listener) = self.advertisement.take() {
            listener.stop();
        }
        if let Some(mut listener) = self.search.take() {
            listener.stop();
        }
        // Closing our sender lets the fan-in thread drain what already
        // arrived, then exit.
        self.sink.take();
        if let Some(handle) = self.fan_in.take() {
            let _ = handle.join();
        }
    }

    /// Trigger a fresh M-SEARCH without restarting anything.
    pub fn search(&self, st: Option<&str>) -> Result<(), ControlPointError> {
        match &self.search {
            Some(listener) => listener
                .search(st, None)
                .map_err(|e| TransportError::Io(e).into()),
            None => Err(ControlPointError::NotStarted),
        }
    }

    /// Directed M-SEARCH to one device.
    pub fn search_unicast(
        &self,
        target: SocketAddr,
        st: Option<&str>,
    ) -> Result<(), ControlPointError> {
        match &self.search {
            Some(listener) => listener
                .search_unicast(target, st, None)
                .map_err(|e| TransportError::Io(e).into()),
            None => Err(ControlPointError::NotStarted),
        }
    }
}

impl Drop for DiscoveryPoint {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_before_start_is_a_noop() {
        let mut point = DiscoveryPoint::new(SsdpFamily::V4);
        point.stop();
        point.stop();
    }

    #[test]
    fn search_requires_start() {
        let point = DiscoveryPoint::new(SsdpFamily::V4);
        assert!(matches!(
            point.search(None),
            Err(ControlPointError::NotStarted)
        ));
    }

    #[test]
    fn trackers_are_shared_between_points() {
        let tracker = Arc::new(SsdpDeviceTracker::new());
        let a = DiscoveryPoint::with_tracker(SsdpFamily::V4, Arc::clone(&tracker));
        let b = DiscoveryPoint::with_tracker(SsdpFamily::V6, Arc::clone(&tracker));
        assert!(Arc::ptr_eq(&a.tracker(), &b.tracker()));
    }
}
