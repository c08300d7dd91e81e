//! Fetch et parsing minimal des descriptions de device.
//!
//! Le cœur n'a besoin que de l'identité du device et de la liste de ses
//! services avec leurs URLs de contrôle/eventing ; le modèle objet complet
//! (actions typées, variables d'état) est hors périmètre.

use std::io::Cursor;

use tracing::debug;
use xmltree::{Element, XMLNode};

use crate::errors::DescriptionError;
use crate::net::resolve_url;
use crate::requester::UpnpRequester;

/// One `<service>` entry of a description document, URLs resolved absolute.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceDescription {
    pub service_type: String,
    pub service_id: Option<String>,
    pub control_url: Option<String>,
    pub event_sub_url: Option<String>,
}

impl ServiceDescription {
    /// Stable key for this service inside its device.
    pub fn key(&self) -> String {
        self.service_id
            .clone()
            .unwrap_or_else(|| self.service_type.clone())
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeviceDescription {
    pub location: String,
    pub udn: Option<String>,
    pub device_type: Option<String>,
    pub friendly_name: Option<String>,
    pub manufacturer: Option<String>,
    pub model_name: Option<String>,
    /// Services of the root device and of every embedded device.
    pub services: Vec<ServiceDescription>,
}

impl DeviceDescription {
    pub fn service_by_type(&self, fragment: &str) -> Option<&ServiceDescription> {
        let fragment = fragment.to_ascii_lowercase();
        self.services
            .iter()
            .find(|s| s.service_type.to_ascii_lowercase().contains(&fragment))
    }
}

/// GET + parse a description document.
///
/// Empty or malformed bodies come back as [`DescriptionError`], never as a
/// raw XML panic.
pub fn fetch_description(
    requester: &dyn UpnpRequester,
    location: &str,
) -> Result<DeviceDescription, DescriptionError> {
    debug!("fetching description at {}", location);
    let response = requester.http_request("GET", location, &[], None)?;
    if response.status != 200 {
        return Err(DescriptionError::HttpStatus(response.status));
    }
    parse_description(location, &response.body)
}

pub fn parse_description(
    location: &str,
    body: &[u8],
) -> Result<DeviceDescription, DescriptionError> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(DescriptionError::EmptyBody);
    }
    let root = Element::parse(Cursor::new(body))
        .map_err(|e| DescriptionError::Xml(e.to_string()))?;
    let device = root
        .get_child("device")
        .ok_or_else(|| DescriptionError::Xml("missing <device> element".to_string()))?;

    let mut description = DeviceDescription {
        location: location.to_string(),
        udn: child_text(device, "UDN"),
        device_type: child_text(device, "deviceType"),
        friendly_name: child_text(device, "friendlyName"),
        manufacturer: child_text(device, "manufacturer"),
        model_name: child_text(device, "modelName"),
        services: Vec::new(),
    };
    collect_services(device, location, &mut description.services);
    Ok(description)
}

/// Walk serviceList entries of this device and of embedded devices.
fn collect_services(device: &Element, location: &str, out: &mut Vec<ServiceDescription>) {
    if let Some(service_list) = device.get_child("serviceList") {
        for service in xml_children(service_list) {
            if service.name != "service" {
                continue;
            }
            let Some(service_type) = child_text(service, "serviceType") else {
                continue;
            };
            out.push(ServiceDescription {
                service_type,
                service_id: child_text(service, "serviceId"),
                control_url: child_text(service, "controlURL")
                    .map(|u| resolve_url(location, &u)),
                event_sub_url: child_text(service, "eventSubURL")
                    .map(|u| resolve_url(location, &u)),
            });
        }
    }
    if let Some(device_list) = device.get_child("deviceList") {
        for embedded in xml_children(device_list) {
            if embedded.name == "device" {
                collect_services(embedded, location, out);
            }
        }
    }
}

/// Helper to iterate over XML element children (filters out non-element nodes)
pub(crate) fn xml_children(element: &Element) -> impl Iterator<Item = &Element> {
    element.children.iter().filter_map(|node| match node {
        XMLNode::Element(elem) => Some(elem),
        _ => None,
    })
}

pub(crate) fn child_text(element: &Element, name: &str) -> Option<String> {
    xml_children(element)
        .find(|child| child.name == name)
        .and_then(|child| child.get_text().map(|cow| cow.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTION: &str = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <device>
    <deviceType>urn:schemas-upnp-org:device:MediaRenderer:1</deviceType>
    <friendlyName>Living Room</friendlyName>
    <manufacturer>Acme</manufacturer>
    <modelName>Player One</modelName>
    <UDN>uuid:abc-123</UDN>
    <serviceList>
      <service>
        <serviceType>urn:schemas-upnp-org:service:AVTransport:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:AVTransport</serviceId>
        <controlURL>/MediaRenderer/AVTransport/Control</controlURL>
        <eventSubURL>/MediaRenderer/AVTransport/Event</eventSubURL>
      </service>
      <service>
        <serviceType>urn:schemas-upnp-org:service:ConnectionManager:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:ConnectionManager</serviceId>
        <controlURL>/MediaRenderer/ConnectionManager/Control</controlURL>
      </service>
    </serviceList>
    <deviceList>
      <device>
        <deviceType>urn:schemas-upnp-org:device:Embedded:1</deviceType>
        <serviceList>
          <service>
            <serviceType>urn:schemas-upnp-org:service:RenderingControl:1</serviceType>
            <eventSubURL>http://10.0.0.5:1400/rc/event</eventSubURL>
          </service>
        </serviceList>
      </device>
    </deviceList>
  </device>
</root>"#;

    #[test]
    fn parses_a_renderer_description() {
        let parsed =
            parse_description("http://10.0.0.5:1400/desc.xml", DESCRIPTION.as_bytes()).unwrap();
        assert_eq!(parsed.udn.as_deref(), Some("uuid:abc-123"));
        assert_eq!(parsed.friendly_name.as_deref(), Some("Living Room"));
        assert_eq!(parsed.services.len(), 3);

        let avt = parsed.service_by_type("avtransport").unwrap();
        assert_eq!(
            avt.event_sub_url.as_deref(),
            Some("http://10.0.0.5:1400/MediaRenderer/AVTransport/Event")
        );
        assert_eq!(avt.key(), "urn:upnp-org:serviceId:AVTransport");

        // ConnectionManager exposes no eventSubURL: that is a capability
        // fact, not an error.
        let cm = parsed.service_by_type("connectionmanager").unwrap();
        assert_eq!(cm.event_sub_url, None);

        // embedded device services are collected too
        let rc = parsed.service_by_type("renderingcontrol").unwrap();
        assert_eq!(
            rc.event_sub_url.as_deref(),
            Some("http://10.0.0.5:1400/rc/event")
        );
        assert_eq!(rc.key(), "urn:schemas-upnp-org:service:RenderingControl:1");
    }

    #[test]
    fn empty_body_is_a_typed_error() {
        let err = parse_description("http://10.0.0.5/d.xml", b"  \n ").unwrap_err();
        assert!(matches!(err, DescriptionError::EmptyBody));
    }

    #[test]
    fn malformed_xml_is_a_typed_error() {
        let err = parse_description("http://10.0.0.5/d.xml", b"<root><device>").unwrap_err();
        assert!(matches!(err, DescriptionError::Xml(_)));

        let err = parse_description("http://10.0.0.5/d.xml", b"<root></root>").unwrap_err();
        assert!(matches!(err, DescriptionError::Xml(_)));
    }
}
