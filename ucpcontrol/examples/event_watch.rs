// examples/event_watch.rs
//
// Demo du cycle complet découverte -> description -> abonnement GENA :
//   - découverte SSDP pendant quelques secondes
//   - fetch de la description du premier device trouvé
//   - SUBSCRIBE sur son premier service eventé
//   - affichage continu des variables d'état reçues par NOTIFY
//
// Build et run (depuis la racine du workspace) :
//   cargo run --example event_watch
//
// Ctrl-C pour quitter (l'UNSUBSCRIBE part au drop du manager).

use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ucpcontrol::eventing::SubscriptionEvent;
use ucpcontrol::{DiscoveryPoint, UpnpEventManager, UreqRequester, fetch_description};
use ucpssdp::SsdpFamily;

fn main() -> io::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let mut point = DiscoveryPoint::new(SsdpFamily::V4);
    point.start()?;
    if let Err(err) = point.search(None) {
        eprintln!("M-SEARCH failed: {err}");
    }

    println!("Waiting 5 seconds for SSDP discovery...");
    thread::sleep(Duration::from_secs(5));

    let devices = point.tracker().devices();
    if devices.is_empty() {
        println!("No devices discovered. Make sure your devices are on and reachable.");
        return Ok(());
    }
    println!("\nDiscovered devices:");
    for (idx, device) in devices.iter().enumerate() {
        println!(
            "  [{}] {} @ {}",
            idx,
            device.udn,
            device.location().unwrap_or("<no location>")
        );
    }

    let requester = Arc::new(UreqRequester::new(Duration::from_secs(5)));

    // Premier device avec une description exploitable et un service eventé.
    let mut chosen = None;
    'devices: for device in &devices {
        let Some(location) = device.location() else {
            continue;
        };
        match fetch_description(requester.as_ref(), location) {
            Ok(description) => {
                for service in &description.services {
                    if service.event_sub_url.is_some() {
                        println!(
                            "\nSubscribing to {} on {}",
                            service.service_type,
                            description.friendly_name.as_deref().unwrap_or("<unnamed>")
                        );
                        chosen = Some(service.clone());
                        break 'devices;
                    }
                }
            }
            Err(err) => eprintln!("description fetch failed for {location}: {err}"),
        }
    }
    let Some(service) = chosen else {
        println!("No evented service found.");
        return Ok(());
    };

    let manager = UpnpEventManager::spawn(requester)?;
    let events = manager.subscribe_events();
    match manager.subscribe(&service, None) {
        Ok(sid) => println!("Subscribed, SID {sid}"),
        Err(err) => {
            eprintln!("subscribe failed: {err}");
            return Ok(());
        }
    }

    for event in events {
        match event {
            SubscriptionEvent::PropertyChange(change) => {
                for (name, value) in &change.state_variables {
                    println!("{}: {} = {}", change.service_id, name, value);
                }
            }
            SubscriptionEvent::Expired { service_id, .. } => {
                println!("subscription to {service_id} expired, exiting");
                break;
            }
        }
    }

    Ok(())
}
