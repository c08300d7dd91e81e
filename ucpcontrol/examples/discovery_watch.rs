// examples/discovery_watch.rs
//
// Observe la découverte SSDP en continu :
//   - un DiscoveryPoint IPv4 avec son tracker privé
//   - un M-SEARCH initial, puis écoute passive des annonces
//   - chaque événement added/updated/removed est affiché en JSON
//
// Build et run (depuis la racine du workspace) :
//   cargo run --example discovery_watch
//
// Ctrl-C pour quitter.

use std::io;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use ucpcontrol::DiscoveryPoint;
use ucpssdp::SsdpFamily;

fn main() -> io::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    println!("Starting SSDP discovery watch...");

    let mut point = DiscoveryPoint::new(SsdpFamily::V4);
    let events = point.subscribe();
    point.start()?;

    // Un sweep actif pour peupler la vue tout de suite; la découverte
    // continuerait aussi sans, au fil des annonces.
    if let Err(err) = point.search(None) {
        eprintln!("initial M-SEARCH failed: {err}");
    }

    loop {
        match events.recv_timeout(Duration::from_secs(30)) {
            Ok(event) => match serde_json::to_string_pretty(&event) {
                Ok(json) => println!("{json}"),
                Err(err) => eprintln!("cannot serialize event: {err}"),
            },
            Err(RecvTimeoutError::Timeout) => {
                // Personne n'a parlé depuis un moment : fait le ménage.
                point.tracker().purge_expired();
                println!(
                    "-- {} device(s) tracked --",
                    point.tracker().devices().len()
                );
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    Ok(())
}
