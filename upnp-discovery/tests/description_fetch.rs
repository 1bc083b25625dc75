use std::time::Duration;

use mockito::Server;
use upnp_discovery::{DescriptionFetcher, DescriptionSource, DiscoveryError};

const DESCRIPTION: &str = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <device>
    <deviceType>urn:upnp:device:ohm:1</deviceType>
    <friendlyName>Living Room</friendlyName>
    <UDN>uuid:ohm-0042</UDN>
    <serviceList>
      <service>
        <serviceType>urn:upnp:service:tvcontrol:1</serviceType>
        <serviceId>urn:upnp:serviceId:tvcontrol1</serviceId>
        <controlURL>upnp/control/tvcontrol1</controlURL>
        <eventSubURL>upnp/event/tvcontrol1</eventSubURL>
      </service>
    </serviceList>
  </device>
</root>"#;

fn fetcher() -> DescriptionFetcher {
    DescriptionFetcher::new(Duration::from_secs(5)).unwrap()
}

#[test]
fn fetch_parses_and_resolves_relative_urls() {
    let mut server = Server::new();
    server
        .mock("GET", "/dev/description.xml")
        .with_status(200)
        .with_header("content-type", "text/xml")
        .with_body(DESCRIPTION)
        .create();

    let location = format!("{}/dev/description.xml", server.url());
    let description = fetcher().fetch(&location).unwrap();

    assert_eq!(description.device.udn, "uuid:ohm-0042");
    let service = description
        .find_service("urn:upnp:service:tvcontrol:1")
        .unwrap();
    assert_eq!(
        service.control_url,
        format!("{}/dev/upnp/control/tvcontrol1", server.url())
    );
    assert_eq!(
        service.event_url,
        format!("{}/dev/upnp/event/tvcontrol1", server.url())
    );
}

#[test]
fn fetch_text_reports_content_type() {
    let mut server = Server::new();
    server
        .mock("GET", "/desc.xml")
        .with_status(200)
        .with_header("content-type", "text/xml; charset=utf-8")
        .with_body("<root/>")
        .create();

    let (body, content_type) = fetcher()
        .fetch_text(&format!("{}/desc.xml", server.url()))
        .unwrap();

    assert_eq!(body, "<root/>");
    assert_eq!(content_type, "text/xml; charset=utf-8");
}

#[test]
fn error_status_is_surfaced() {
    let mut server = Server::new();
    server.mock("GET", "/missing.xml").with_status(404).create();

    let err = fetcher()
        .fetch(&format!("{}/missing.xml", server.url()))
        .unwrap_err();

    assert_eq!(err, DiscoveryError::HttpStatus(404));
}

#[test]
fn unparseable_body_is_parse_error() {
    let mut server = Server::new();
    server
        .mock("GET", "/broken.xml")
        .with_status(200)
        .with_body("<root><device>")
        .create();

    let err = fetcher()
        .fetch(&format!("{}/broken.xml", server.url()))
        .unwrap_err();

    assert!(matches!(err, DiscoveryError::ParseError(_)));
}
