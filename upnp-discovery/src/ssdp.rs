//! SSDP (Simple Service Discovery Protocol) message codec
//!
//! Decodes the datagrams a control point receives (advertisements and search
//! responses) and encodes the M-SEARCH requests it sends. Socket handling is
//! left to the caller.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

/// IPv4 SSDP multicast group
pub const SSDP_MULTICAST_V4: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);

/// IPv6 link-local SSDP multicast group (`FF02::C`)
pub const SSDP_MULTICAST_V6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xc);

/// IPv6 site-local SSDP multicast group (`FF05::C`), used for ULA/GUA addresses
pub const SSDP_MULTICAST_V6_SITE: Ipv6Addr = Ipv6Addr::new(0xff05, 0, 0, 0, 0, 0, 0, 0xc);

/// Well-known SSDP port
pub const SSDP_PORT: u16 = 1900;

/// Search target matching every device and service
pub const SSDP_ALL: &str = "ssdp:all";

/// Largest datagram the codec expects to see
pub const MAX_DATAGRAM: usize = 2500;

/// Destination of IPv4 M-SEARCH requests
pub fn multicast_v4() -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(SSDP_MULTICAST_V4, SSDP_PORT))
}

/// Destination of IPv6 M-SEARCH requests
pub fn multicast_v6() -> SocketAddr {
    SocketAddr::V6(SocketAddrV6::new(SSDP_MULTICAST_V6, SSDP_PORT, 0, 0))
}

/// Fields shared by advertisements and search responses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Description URL; absent on `ssdp:byebye`
    pub location: Option<String>,
    /// Notification type (`NT`) or search target (`ST`)
    pub target: String,
    /// Unique service name
    pub usn: String,
    /// Product tokens from the `SERVER` header
    pub server: Option<String>,
    /// `max-age` from `CACHE-CONTROL`, in seconds
    pub max_age: Option<u32>,
}

impl Advertisement {
    /// Device UDN, the part of the USN before any `::` suffix
    pub fn udn(&self) -> &str {
        self.usn.split("::").next().unwrap_or(&self.usn)
    }
}

/// A decoded SSDP datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SsdpMessage {
    /// `NOTIFY` with `NTS: ssdp:alive`
    Alive(Advertisement),
    /// `NOTIFY` with `NTS: ssdp:byebye`
    ByeBye(Advertisement),
    /// Unicast `HTTP/1.1 200 OK` answer to an M-SEARCH
    SearchResponse(Advertisement),
    /// An M-SEARCH from another control point
    Search { target: String, mx: u32 },
}

/// Decode an SSDP datagram, returning `None` for anything malformed or unknown
pub fn parse_message(text: &str) -> Option<SsdpMessage> {
    let mut lines = text.lines();
    let start = lines.next()?.trim();

    let mut headers = Headers::default();
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        headers.absorb(line);
    }

    if start.starts_with("NOTIFY") {
        let advertisement = headers.advertisement(headers.nt.clone()?)?;
        match headers.nts.as_deref() {
            Some(nts) if nts.eq_ignore_ascii_case("ssdp:alive") => {
                advertisement.location.as_ref()?;
                Some(SsdpMessage::Alive(advertisement))
            }
            Some(nts) if nts.eq_ignore_ascii_case("ssdp:byebye") => {
                Some(SsdpMessage::ByeBye(advertisement))
            }
            _ => None,
        }
    } else if start.starts_with("HTTP/") {
        if start.split_whitespace().nth(1) != Some("200") {
            return None;
        }
        let advertisement = headers.advertisement(headers.st.clone()?)?;
        advertisement.location.as_ref()?;
        Some(SsdpMessage::SearchResponse(advertisement))
    } else if start.starts_with("M-SEARCH") {
        Some(SsdpMessage::Search {
            target: headers.st?,
            mx: headers.mx.unwrap_or(0),
        })
    } else {
        None
    }
}

/// Encode an M-SEARCH request for `target`, allowing devices `mx` seconds to answer
pub fn build_search(target: &str, mx: u32, host: SocketAddr, user_agent: &str) -> String {
    let host = match host {
        SocketAddr::V4(addr) => addr.to_string(),
        SocketAddr::V6(addr) => format!("[{}]:{}", addr.ip(), addr.port()),
    };
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {}\r\n\
         ST: {}\r\n\
         USER-AGENT: {}\r\n\
         \r\n",
        host, mx, target, user_agent
    )
}

/// Whether a search response for `st` answers a search for `target`
pub fn target_matches(target: &str, st: &str) -> bool {
    target.eq_ignore_ascii_case(SSDP_ALL) || target == st
}

#[derive(Debug, Default)]
struct Headers {
    location: Option<String>,
    nt: Option<String>,
    nts: Option<String>,
    st: Option<String>,
    usn: Option<String>,
    server: Option<String>,
    max_age: Option<u32>,
    mx: Option<u32>,
}

impl Headers {
    fn absorb(&mut self, line: &str) {
        if let Some(value) = extract_header_value(line, "LOCATION:") {
            self.location = Some(value);
        } else if let Some(value) = extract_header_value(line, "NTS:") {
            self.nts = Some(value);
        } else if let Some(value) = extract_header_value(line, "NT:") {
            self.nt = Some(value);
        } else if let Some(value) = extract_header_value(line, "ST:") {
            self.st = Some(value);
        } else if let Some(value) = extract_header_value(line, "USN:") {
            self.usn = Some(value);
        } else if let Some(value) = extract_header_value(line, "SERVER:") {
            self.server = Some(value);
        } else if let Some(value) = extract_header_value(line, "CACHE-CONTROL:") {
            self.max_age = parse_max_age(&value);
        } else if let Some(value) = extract_header_value(line, "MX:") {
            self.mx = value.parse().ok();
        }
    }

    fn advertisement(&self, target: String) -> Option<Advertisement> {
        Some(Advertisement {
            location: self.location.clone(),
            target,
            usn: self.usn.clone()?,
            server: self.server.clone(),
            max_age: self.max_age,
        })
    }
}

/// Pull `max-age=N` out of a `CACHE-CONTROL` value
fn parse_max_age(value: &str) -> Option<u32> {
    value.split(',').find_map(|directive| {
        let (name, secs) = directive.split_once('=')?;
        if name.trim().eq_ignore_ascii_case("max-age") {
            secs.trim().parse().ok()
        } else {
            None
        }
    })
}

/// Extract header value from a line like "HEADER: value"
fn extract_header_value(line: &str, header: &str) -> Option<String> {
    if line.len() > header.len()
        && line.is_char_boundary(header.len())
        && line[..header.len()].eq_ignore_ascii_case(header)
    {
        Some(line[header.len()..].trim().to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_parse_alive_notify() {
        let datagram = "NOTIFY * HTTP/1.1\r\n\
            HOST: 239.255.255.250:1900\r\n\
            CACHE-CONTROL: max-age=1800\r\n\
            LOCATION: http://192.168.1.20:49152/description.xml\r\n\
            NT: urn:upnp:device:ohm:1\r\n\
            NTS: ssdp:alive\r\n\
            SERVER: Linux/4.9 UPnP/1.0 ohm/1.0\r\n\
            USN: uuid:ohm-0001::urn:upnp:device:ohm:1\r\n\
            \r\n";

        match parse_message(datagram) {
            Some(SsdpMessage::Alive(adv)) => {
                assert_eq!(adv.location.as_deref(), Some("http://192.168.1.20:49152/description.xml"));
                assert_eq!(adv.target, "urn:upnp:device:ohm:1");
                assert_eq!(adv.udn(), "uuid:ohm-0001");
                assert_eq!(adv.max_age, Some(1800));
                assert_eq!(adv.server.as_deref(), Some("Linux/4.9 UPnP/1.0 ohm/1.0"));
            }
            other => panic!("expected alive, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_byebye_without_location() {
        let datagram = "NOTIFY * HTTP/1.1\r\n\
            NT: urn:upnp:device:ohm:1\r\n\
            NTS: ssdp:byebye\r\n\
            USN: uuid:ohm-0001::urn:upnp:device:ohm:1\r\n\
            \r\n";

        match parse_message(datagram) {
            Some(SsdpMessage::ByeBye(adv)) => {
                assert_eq!(adv.location, None);
                assert_eq!(adv.udn(), "uuid:ohm-0001");
            }
            other => panic!("expected byebye, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_search_response_case_insensitive() {
        let datagram = "HTTP/1.1 200 OK\r\n\
            cache-control: max-age = 900\r\n\
            location: http://10.0.0.7:80/desc.xml\r\n\
            st: uuid:ohm-0002\r\n\
            usn: uuid:ohm-0002\r\n\
            \r\n";

        match parse_message(datagram) {
            Some(SsdpMessage::SearchResponse(adv)) => {
                assert_eq!(adv.target, "uuid:ohm-0002");
                assert_eq!(adv.udn(), "uuid:ohm-0002");
                assert_eq!(adv.max_age, Some(900));
            }
            other => panic!("expected search response, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_msearch() {
        let datagram = "M-SEARCH * HTTP/1.1\r\n\
            HOST: 239.255.255.250:1900\r\n\
            MAN: \"ssdp:discover\"\r\n\
            MX: 3\r\n\
            ST: ssdp:all\r\n\
            \r\n";

        assert_eq!(
            parse_message(datagram),
            Some(SsdpMessage::Search {
                target: "ssdp:all".to_string(),
                mx: 3
            })
        );
    }

    #[rstest]
    #[case::empty("")]
    #[case::garbage("This is not a valid SSDP response\r\nSome random text\r\n")]
    #[case::error_status("HTTP/1.1 500 Internal Server Error\r\nST: x\r\nUSN: y\r\nLOCATION: http://h/\r\n\r\n")]
    #[case::response_missing_location("HTTP/1.1 200 OK\r\nST: x\r\nUSN: uuid:y\r\n\r\n")]
    #[case::alive_missing_location("NOTIFY * HTTP/1.1\r\nNT: x\r\nNTS: ssdp:alive\r\nUSN: uuid:y\r\n\r\n")]
    #[case::notify_missing_usn("NOTIFY * HTTP/1.1\r\nNT: x\r\nNTS: ssdp:byebye\r\n\r\n")]
    #[case::unknown_nts("NOTIFY * HTTP/1.1\r\nNT: x\r\nNTS: ssdp:update\r\nUSN: uuid:y\r\n\r\n")]
    fn test_rejects_malformed(#[case] datagram: &str) {
        assert_eq!(parse_message(datagram), None);
    }

    #[test]
    fn test_build_search_v4() {
        let request = build_search("urn:upnp:device:ohm:1", 5, multicast_v4(), "upnp-sdk/0.2 UPnP/1.0");
        assert!(request.starts_with("M-SEARCH * HTTP/1.1\r\n"));
        assert!(request.contains("HOST: 239.255.255.250:1900\r\n"));
        assert!(request.contains("MAN: \"ssdp:discover\"\r\n"));
        assert!(request.contains("MX: 5\r\n"));
        assert!(request.contains("ST: urn:upnp:device:ohm:1\r\n"));
        assert!(request.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_build_search_v6_brackets_host() {
        let request = build_search(SSDP_ALL, 2, multicast_v6(), "ua");
        assert!(request.contains("HOST: [ff02::c]:1900\r\n"));
    }

    #[test]
    fn test_build_search_round_trips_through_parser() {
        let request = build_search("uuid:abc", 4, multicast_v4(), "ua");
        assert_eq!(
            parse_message(&request),
            Some(SsdpMessage::Search {
                target: "uuid:abc".to_string(),
                mx: 4
            })
        );
    }

    #[test]
    fn test_target_matches() {
        assert!(target_matches("ssdp:all", "uuid:x"));
        assert!(target_matches("uuid:x", "uuid:x"));
        assert!(!target_matches("uuid:x", "uuid:y"));
    }

    #[test]
    fn test_extract_header_value_empty_value() {
        assert_eq!(extract_header_value("LOCATION: ", "LOCATION:"), Some("".to_string()));
        assert_eq!(extract_header_value("LOCATION:", "LOCATION:"), None);
        assert_eq!(extract_header_value("LOCATIONS: value", "LOCATION:"), None);
    }

    #[test]
    fn test_nts_is_not_mistaken_for_nt() {
        let mut headers = Headers::default();
        headers.absorb("NTS: ssdp:alive");
        headers.absorb("NT: upnp:rootdevice");
        assert_eq!(headers.nts.as_deref(), Some("ssdp:alive"));
        assert_eq!(headers.nt.as_deref(), Some("upnp:rootdevice"));
    }
}
