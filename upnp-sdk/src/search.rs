//! SSDP search and advertisement dispatch

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use upnp_discovery::ssdp::{self, SsdpMessage};
use upnp_discovery::Advertisement;

use crate::error::{Result, UpnpError};
use crate::event::{Discovery, DiscoveryOrigin, Event, SearchId, SearchTimeout};
use crate::handle::{Handle, SearchEntry};
use crate::sdk::SdkInner;
use crate::thread_pool::Priority;

/// Lifetime assumed when an advertisement carries no `max-age`
const DEFAULT_EXPIRES: u32 = 1800;

impl SdkInner {
    pub(crate) fn search_async(self: &Arc<Self>, handle: Handle, mx: u32, target: &str) -> Result<SearchId> {
        let runtime = self.running()?;
        self.check_client(handle)?;
        if target.is_empty() {
            return Err(UpnpError::invalid_param("search target is empty"));
        }
        let mx = if mx < 1 { self.config.default_search_mx } else { mx };

        let id = self.next_search_id();
        let weak = Arc::downgrade(self);
        let timer = runtime
            .timer
            .schedule(Duration::from_secs(u64::from(mx)), Priority::Medium, move || {
                if let Some(inner) = weak.upgrade() {
                    inner.close_search(id);
                }
            })?;

        {
            let mut handles = self.handles.write();
            match handles.client_mut(handle) {
                Some(client) => client.searches.push(SearchEntry {
                    id,
                    target: target.to_string(),
                    timer: Some(timer),
                }),
                None => {
                    runtime.timer.cancel(timer);
                    return Err(UpnpError::InvalidHandle);
                }
            }
        }

        let user_agent = &self.config.user_agent;
        if let Err(e) = runtime
            .miniserver
            .send_search(target, mx, user_agent, self.config.search_destination_v4)
        {
            self.remove_search(id);
            runtime.timer.cancel(timer);
            return Err(e);
        }
        if runtime.addresses.ip_v6.is_some() {
            if let Err(e) = runtime
                .miniserver
                .send_search(target, mx, user_agent, ssdp::multicast_v6())
            {
                tracing::debug!(%target, "IPv6 M-SEARCH not sent: {}", e);
            }
        }

        tracing::debug!(search = %id, %target, mx, "Search started");
        Ok(id)
    }

    /// Decode an inbound SSDP datagram and report it to the client
    pub(crate) fn handle_datagram(&self, data: &[u8], source: SocketAddr) {
        let Ok(text) = std::str::from_utf8(data) else {
            tracing::debug!(%source, "Ignoring non-UTF-8 SSDP datagram");
            return;
        };
        let Some(message) = ssdp::parse_message(text) else {
            tracing::trace!(%source, "Ignoring unrecognized SSDP datagram");
            return;
        };

        let (callback, event) = {
            let handles = self.handles.read();
            let Some((_, client)) = handles.find_client() else {
                return;
            };
            let event = match message {
                SsdpMessage::Alive(ad) => {
                    Event::DiscoveryFound(discovery(ad, DiscoveryOrigin::Advertisement, source, None))
                }
                SsdpMessage::ByeBye(ad) => {
                    Event::DiscoveryByeBye(discovery(ad, DiscoveryOrigin::Advertisement, source, None))
                }
                SsdpMessage::SearchResponse(ad) => {
                    let Some(search) = client
                        .searches
                        .iter()
                        .find(|s| ssdp::target_matches(&s.target, &ad.target))
                    else {
                        tracing::debug!(%source, st = %ad.target, "Search response with no pending search");
                        return;
                    };
                    let id = search.id;
                    Event::DiscoveryFound(discovery(ad, DiscoveryOrigin::SearchResult, source, Some(id)))
                }
                SsdpMessage::Search { .. } => return,
            };
            (Arc::clone(&client.callback), event)
        };

        callback(event);
    }

    fn remove_search(&self, id: SearchId) -> Option<SearchEntry> {
        let mut handles = self.handles.write();
        let (_, client) = handles.find_client_mut()?;
        let index = client.searches.iter().position(|s| s.id == id)?;
        Some(client.searches.remove(index))
    }

    fn close_search(&self, id: SearchId) {
        let Some(entry) = self.remove_search(id) else {
            return;
        };
        let Some(callback) = self.client_callback() else {
            return;
        };
        tracing::debug!(search = %id, target = %entry.target, "Search timed out");
        callback(Event::DiscoveryTimeout(SearchTimeout {
            search_id: id,
            target: entry.target,
        }));
    }
}

fn discovery(
    ad: Advertisement,
    origin: DiscoveryOrigin,
    source: SocketAddr,
    search_id: Option<SearchId>,
) -> Discovery {
    let device_id = ad.udn().to_string();
    let device_type = ad.target.contains(":device:").then(|| ad.target.clone());
    let service_type = ad.target.contains(":service:").then(|| ad.target.clone());

    Discovery {
        origin,
        device_id,
        device_type,
        service_type,
        location: ad.location,
        expires: ad.max_age.unwrap_or(DEFAULT_EXPIRES),
        server: ad.server,
        usn: ad.usn,
        source,
        search_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advertisement(target: &str, max_age: Option<u32>) -> Advertisement {
        Advertisement {
            location: Some("http://10.0.0.7:80/desc.xml".to_string()),
            target: target.to_string(),
            usn: format!("uuid:0123-abcd::{}", target),
            server: Some("Linux/5.4 UPnP/1.0 widget/2".to_string()),
            max_age,
        }
    }

    #[test]
    fn test_device_advertisement_fields() {
        let source: SocketAddr = "10.0.0.7:1900".parse().unwrap();
        let found = discovery(
            advertisement("urn:schemas-upnp-org:device:tvdevice:1", Some(100)),
            DiscoveryOrigin::Advertisement,
            source,
            None,
        );

        assert_eq!(found.device_id, "uuid:0123-abcd");
        assert_eq!(found.device_type.as_deref(), Some("urn:schemas-upnp-org:device:tvdevice:1"));
        assert_eq!(found.service_type, None);
        assert_eq!(found.expires, 100);
        assert_eq!(found.source, source);
    }

    #[test]
    fn test_service_result_defaults_expiry() {
        let found = discovery(
            advertisement("urn:schemas-upnp-org:service:tvcontrol:1", None),
            DiscoveryOrigin::SearchResult,
            "10.0.0.7:1900".parse().unwrap(),
            Some(SearchId(3)),
        );

        assert_eq!(found.service_type.as_deref(), Some("urn:schemas-upnp-org:service:tvcontrol:1"));
        assert_eq!(found.device_type, None);
        assert_eq!(found.expires, DEFAULT_EXPIRES);
        assert_eq!(found.search_id, Some(SearchId(3)));
    }
}
