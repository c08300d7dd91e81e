use std::time::{Duration, SystemTime};

use ucpcontrol::model::DeviceEvent;
use ucpcontrol::tracker::SsdpDeviceTracker;
use ucpcontrol::Udn;
use ucpssdp::{SsdpHeaders, SsdpSource};

/// Construit un jeu de headers d'annonce comme le codec le ferait.
fn advertisement(
    usn: &str,
    location: &str,
    max_age: u32,
    received_at: SystemTime,
    remote: &str,
) -> SsdpHeaders {
    let mut headers = SsdpHeaders::new(
        received_at,
        SsdpSource::Advertisement,
        remote.parse().unwrap(),
    );
    headers.insert("HOST", "239.255.255.250:1900");
    headers.insert("NTS", "ssdp:alive");
    headers.insert("NT", nt_of(usn));
    headers.insert("USN", usn);
    headers.insert("LOCATION", location);
    headers.insert("CACHE-CONTROL", &format!("max-age={}", max_age));
    headers.insert("SERVER", "Linux UPnP/1.0 Acme/1.0");
    headers
}

fn byebye(usn: &str, location: Option<&str>, remote: &str) -> SsdpHeaders {
    let mut headers = SsdpHeaders::new(
        SystemTime::now(),
        SsdpSource::Advertisement,
        remote.parse().unwrap(),
    );
    headers.insert("HOST", "239.255.255.250:1900");
    headers.insert("NTS", "ssdp:byebye");
    headers.insert("NT", nt_of(usn));
    headers.insert("USN", usn);
    if let Some(location) = location {
        headers.insert("LOCATION", location);
    }
    headers
}

fn search_response(usn: &str, st: &str, location: &str, remote: &str) -> SsdpHeaders {
    let mut headers = SsdpHeaders::new(
        SystemTime::now(),
        SsdpSource::Search,
        remote.parse().unwrap(),
    );
    headers.insert("CACHE-CONTROL", "max-age=1800");
    headers.insert("ST", st);
    headers.insert("USN", usn);
    headers.insert("LOCATION", location);
    headers.insert("SERVER", "Linux UPnP/1.0 Acme/1.0");
    headers
}

fn nt_of(usn: &str) -> &str {
    usn.split_once("::").map(|(_, nt)| nt).unwrap_or("upnp:rootdevice")
}

const LOCATION_V4: &str = "http://10.0.0.5:1400/desc.xml";
const LOCATION_V6: &str = "http://[fd00::5]:1400/desc.xml";

#[test]
fn alive_creates_one_device_with_one_location() {
    let tracker = SsdpDeviceTracker::new();
    let events = tracker.subscribe();

    let received_at = SystemTime::now();
    tracker.on_alive(&advertisement(
        "uuid:abc::upnp:rootdevice",
        LOCATION_V4,
        1800,
        received_at,
        "10.0.0.5:1900",
    ));

    assert_eq!(tracker.len(), 1);
    let device = tracker.get(&Udn("uuid:abc".to_string())).unwrap();
    assert_eq!(device.locations.len(), 1);
    assert_eq!(device.locations[0].url, LOCATION_V4);
    assert_eq!(
        device.locations[0].valid_to,
        received_at + Duration::from_secs(1800)
    );

    match events.try_recv() {
        Ok(DeviceEvent::Added(snapshot)) => assert_eq!(snapshot.udn.0, "uuid:abc"),
        other => panic!("expected Added, got {:?}", other),
    }
    assert!(events.try_recv().is_err());
}

#[test]
fn one_record_across_sources_targets_and_families() {
    let tracker = SsdpDeviceTracker::new();

    tracker.on_alive(&advertisement(
        "uuid:abc::upnp:rootdevice",
        LOCATION_V4,
        1800,
        SystemTime::now(),
        "10.0.0.5:1900",
    ));
    // Same device answering a search under an embedded service target.
    tracker.on_search_response(&search_response(
        "uuid:abc::urn:schemas-upnp-org:service:AVTransport:1",
        "urn:schemas-upnp-org:service:AVTransport:1",
        LOCATION_V4,
        "10.0.0.5:53210",
    ));
    // Same device advertised over IPv6.
    tracker.on_alive(&advertisement(
        "uuid:ABC::upnp:rootdevice",
        LOCATION_V6,
        1800,
        SystemTime::now(),
        "[fd00::5]:1900",
    ));

    assert_eq!(tracker.len(), 1);
    let device = tracker.get(&Udn("uuid:abc".to_string())).unwrap();
    assert_eq!(device.locations.len(), 2);
    assert!(device
        .types_seen
        .contains(&"upnp:rootdevice".to_string()));
    assert!(device
        .types_seen
        .contains(&"urn:schemas-upnp-org:service:AVTransport:1".to_string()));
}

#[test]
fn identical_alive_refresh_is_silent() {
    let tracker = SsdpDeviceTracker::new();
    let events = tracker.subscribe();

    tracker.on_alive(&advertisement(
        "uuid:abc::upnp:rootdevice",
        LOCATION_V4,
        1800,
        SystemTime::now(),
        "10.0.0.5:1900",
    ));
    assert!(matches!(events.try_recv(), Ok(DeviceEvent::Added(_))));

    // Byte-identical retransmission: refresh timestamps, say nothing.
    tracker.on_alive(&advertisement(
        "uuid:abc::upnp:rootdevice",
        LOCATION_V4,
        1800,
        SystemTime::now(),
        "10.0.0.5:1900",
    ));
    assert!(events.try_recv().is_err());
}

#[test]
fn excluded_headers_do_not_count_as_changes() {
    let tracker = SsdpDeviceTracker::new();
    let events = tracker.subscribe();

    let mut first = advertisement(
        "uuid:abc::upnp:rootdevice",
        LOCATION_V4,
        1800,
        SystemTime::now(),
        "10.0.0.5:1900",
    );
    first.insert("DATE", "Mon, 01 Jan 2024 10:00:00 GMT");
    tracker.on_alive(&first);
    assert!(matches!(events.try_recv(), Ok(DeviceEvent::Added(_))));

    // Cache-Control, Date and Host wobble per retransmission; ignored by
    // policy.
    let mut second = advertisement(
        "uuid:abc::upnp:rootdevice",
        LOCATION_V4,
        900,
        SystemTime::now(),
        "10.0.0.5:1900",
    );
    second.insert("DATE", "Mon, 01 Jan 2024 10:00:30 GMT");
    second.insert("HOST", "[FF02::C]:1900");
    tracker.on_alive(&second);
    assert!(events.try_recv().is_err());

    // A real header move does propagate.
    let mut third = advertisement(
        "uuid:abc::upnp:rootdevice",
        LOCATION_V4,
        1800,
        SystemTime::now(),
        "10.0.0.5:1900",
    );
    third.insert("SERVER", "Linux UPnP/1.0 Acme/2.0");
    tracker.on_alive(&third);
    assert!(matches!(events.try_recv(), Ok(DeviceEvent::Updated(_))));
}

#[test]
fn update_always_propagates() {
    let tracker = SsdpDeviceTracker::new();
    let events = tracker.subscribe();

    let alive = advertisement(
        "uuid:abc::upnp:rootdevice",
        LOCATION_V4,
        1800,
        SystemTime::now(),
        "10.0.0.5:1900",
    );
    tracker.on_alive(&alive);
    assert!(matches!(events.try_recv(), Ok(DeviceEvent::Added(_))));

    let mut update = advertisement(
        "uuid:abc::upnp:rootdevice",
        LOCATION_V4,
        1800,
        SystemTime::now(),
        "10.0.0.5:1900",
    );
    update.insert("NTS", "ssdp:update");
    update.insert("BOOTID.UPNP.ORG", "7");
    tracker.on_update(&update);
    assert!(matches!(events.try_recv(), Ok(DeviceEvent::Updated(_))));
}

#[test]
fn byebye_of_only_location_removes_the_device_once() {
    let tracker = SsdpDeviceTracker::new();
    let events = tracker.subscribe();

    tracker.on_alive(&advertisement(
        "uuid:abc::upnp:rootdevice",
        LOCATION_V4,
        1800,
        SystemTime::now(),
        "10.0.0.5:1900",
    ));
    assert!(matches!(events.try_recv(), Ok(DeviceEvent::Added(_))));

    tracker.on_byebye(&byebye(
        "uuid:abc::upnp:rootdevice",
        Some(LOCATION_V4),
        "10.0.0.5:1900",
    ));
    match events.try_recv() {
        Ok(DeviceEvent::Removed(snapshot)) => assert_eq!(snapshot.udn.0, "uuid:abc"),
        other => panic!("expected Removed, got {:?}", other),
    }
    assert!(tracker.is_empty());

    // Second byebye for a device already gone: nothing fires.
    tracker.on_byebye(&byebye(
        "uuid:abc::upnp:rootdevice",
        Some(LOCATION_V4),
        "10.0.0.5:1900",
    ));
    assert!(events.try_recv().is_err());
}

#[test]
fn byebye_with_surviving_location_keeps_the_device() {
    let tracker = SsdpDeviceTracker::new();
    let events = tracker.subscribe();

    tracker.on_alive(&advertisement(
        "uuid:abc::upnp:rootdevice",
        LOCATION_V4,
        1800,
        SystemTime::now(),
        "10.0.0.5:1900",
    ));
    tracker.on_alive(&advertisement(
        "uuid:abc::upnp:rootdevice",
        LOCATION_V6,
        1800,
        SystemTime::now(),
        "[fd00::5]:1900",
    ));
    while events.try_recv().is_ok() {}

    // The IPv6 path says goodbye; the device stays alive through IPv4.
    tracker.on_byebye(&byebye("uuid:abc::upnp:rootdevice", None, "[fd00::5]:1900"));

    match events.try_recv() {
        Ok(DeviceEvent::Updated(snapshot)) => {
            assert_eq!(snapshot.locations.len(), 1);
            assert_eq!(snapshot.locations[0].url, LOCATION_V4);
        }
        other => panic!("expected Updated, got {:?}", other),
    }
    assert_eq!(tracker.len(), 1);
}

#[test]
fn reading_devices_never_purges() {
    let tracker = SsdpDeviceTracker::new();

    // Expired an hour ago.
    tracker.on_alive(&advertisement(
        "uuid:abc::upnp:rootdevice",
        LOCATION_V4,
        1800,
        SystemTime::now() - Duration::from_secs(5400),
        "10.0.0.5:1900",
    ));

    for _ in 0..3 {
        let devices = tracker.devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].locations.len(), 1);
    }
}

#[test]
fn explicit_purge_reports_expired_devices() {
    let tracker = SsdpDeviceTracker::new();
    let events = tracker.subscribe();

    tracker.on_alive(&advertisement(
        "uuid:fresh::upnp:rootdevice",
        "http://10.0.0.6:1400/desc.xml",
        1800,
        SystemTime::now(),
        "10.0.0.6:1900",
    ));
    // Refreshed an hour and a half ago, max-age long gone.
    tracker.on_alive(&advertisement(
        "uuid:old::upnp:rootdevice",
        LOCATION_V4,
        1800,
        SystemTime::now() - Duration::from_secs(5400),
        "10.0.0.5:1900",
    ));
    while events.try_recv().is_ok() {}

    tracker.purge_expired();

    match events.try_recv() {
        Ok(DeviceEvent::Removed(snapshot)) => assert_eq!(snapshot.udn.0, "uuid:old"),
        other => panic!("expected Removed, got {:?}", other),
    }
    assert!(events.try_recv().is_err());
    assert_eq!(tracker.len(), 1);
    assert!(tracker.get(&Udn("uuid:fresh".to_string())).is_some());
}

#[test]
fn malformed_input_fails_soft() {
    let tracker = SsdpDeviceTracker::new();
    let events = tracker.subscribe();

    // No USN at all.
    let mut no_usn = SsdpHeaders::new(
        SystemTime::now(),
        SsdpSource::Advertisement,
        "10.0.0.5:1900".parse().unwrap(),
    );
    no_usn.insert("NTS", "ssdp:alive");
    no_usn.insert("NT", "upnp:rootdevice");
    no_usn.insert("LOCATION", LOCATION_V4);
    tracker.on_alive(&no_usn);

    // Loopback location, useless for a description fetch.
    tracker.on_alive(&advertisement(
        "uuid:abc::upnp:rootdevice",
        "http://127.0.0.1:1400/desc.xml",
        1800,
        SystemTime::now(),
        "10.0.0.5:1900",
    ));

    assert!(tracker.is_empty());
    assert!(events.try_recv().is_err());
}
