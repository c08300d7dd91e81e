use ucpssdp::SsdpHeaders;

use crate::Udn;

/// Extract the normalized UDN (`uuid:...`, lower-cased) from a USN header
/// value. Embedded device/service suffixes after `::` are stripped.
pub fn udn_from_usn(usn: &str) -> Option<Udn> {
    let lower = usn.trim().to_ascii_lowercase();
    let idx = lower.find("uuid:")?;
    let sub = &lower[idx..];
    match sub.find("::") {
        Some(end) => Some(Udn(sub[..end].to_string())),
        None => Some(Udn(sub.to_string())),
    }
}

pub fn udn_from_headers(headers: &SsdpHeaders) -> Option<Udn> {
    udn_from_usn(headers.usn()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_device_and_service_suffixes() {
        assert_eq!(
            udn_from_usn("uuid:ABC-123::upnp:rootdevice"),
            Some(Udn("uuid:abc-123".to_string()))
        );
        assert_eq!(
            udn_from_usn("uuid:abc-123::urn:schemas-upnp-org:service:AVTransport:1"),
            Some(Udn("uuid:abc-123".to_string()))
        );
    }

    #[test]
    fn bare_uuid_usn() {
        assert_eq!(
            udn_from_usn("  uuid:abc-123  "),
            Some(Udn("uuid:abc-123".to_string()))
        );
    }

    #[test]
    fn rejects_usn_without_uuid() {
        assert_eq!(udn_from_usn("urn:schemas-upnp-org:device:Basic:1"), None);
        assert_eq!(udn_from_usn(""), None);
    }

    #[test]
    fn same_udn_regardless_of_search_target() {
        let a = udn_from_usn("uuid:abc::upnp:rootdevice").unwrap();
        let b = udn_from_usn("uuid:abc::urn:schemas-upnp-org:device:X:1").unwrap();
        let c = udn_from_usn("uuid:ABC").unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
    }
}
