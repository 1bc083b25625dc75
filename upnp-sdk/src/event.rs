//! Events delivered to client callbacks

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::UpnpError;
use crate::Timeout;

/// Callback registered with [`Sdk::register_client`](crate::Sdk::register_client)
pub type ClientCallback = Arc<dyn Fn(Event) + Send + Sync>;

/// One-shot completion handler of an async operation
pub type Completion = Box<dyn FnOnce(Event) + Send>;

/// Correlates search results and timeouts with the search that caused them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SearchId(pub(crate) u64);

impl fmt::Display for SearchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "search-{}", self.0)
    }
}

/// Whether a device was heard unprompted or in reply to a search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryOrigin {
    Advertisement,
    SearchResult,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    pub origin: DiscoveryOrigin,
    /// UDN of the advertising device
    pub device_id: String,
    pub device_type: Option<String>,
    pub service_type: Option<String>,
    /// Description URL; absent on bye-bye
    pub location: Option<String>,
    /// Advertisement lifetime in seconds
    pub expires: u32,
    pub server: Option<String>,
    pub usn: String,
    pub source: SocketAddr,
    /// Set on search results that answer an outstanding search
    pub search_id: Option<SearchId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchTimeout {
    pub search_id: SearchId,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionComplete {
    /// Response body on success
    pub result: Result<String, UpnpError>,
    pub control_url: String,
    pub action_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateVarComplete {
    /// Current value on success
    pub result: Result<String, UpnpError>,
    pub control_url: String,
    pub var_name: String,
}

/// A GENA property-change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventNotification {
    pub sid: String,
    pub event_key: u32,
    pub changed_variables: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionEvent {
    pub result: Result<(), UpnpError>,
    pub sid: String,
    pub publisher_url: String,
    pub timeout: Timeout,
}

/// Everything the SDK reports upward
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    DiscoveryFound(Discovery),
    DiscoveryByeBye(Discovery),
    DiscoveryTimeout(SearchTimeout),
    ActionComplete(ActionComplete),
    GetVarComplete(StateVarComplete),
    EventReceived(EventNotification),
    SubscribeComplete(SubscriptionEvent),
    UnsubscribeComplete(SubscriptionEvent),
    RenewComplete(SubscriptionEvent),
    AutoRenewalFailed(SubscriptionEvent),
    SubscriptionExpired(SubscriptionEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    DiscoveryFound,
    DiscoveryByeBye,
    DiscoveryTimeout,
    ActionComplete,
    GetVarComplete,
    EventReceived,
    SubscribeComplete,
    UnsubscribeComplete,
    RenewComplete,
    AutoRenewalFailed,
    SubscriptionExpired,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::DiscoveryFound(_) => EventKind::DiscoveryFound,
            Event::DiscoveryByeBye(_) => EventKind::DiscoveryByeBye,
            Event::DiscoveryTimeout(_) => EventKind::DiscoveryTimeout,
            Event::ActionComplete(_) => EventKind::ActionComplete,
            Event::GetVarComplete(_) => EventKind::GetVarComplete,
            Event::EventReceived(_) => EventKind::EventReceived,
            Event::SubscribeComplete(_) => EventKind::SubscribeComplete,
            Event::UnsubscribeComplete(_) => EventKind::UnsubscribeComplete,
            Event::RenewComplete(_) => EventKind::RenewComplete,
            Event::AutoRenewalFailed(_) => EventKind::AutoRenewalFailed,
            Event::SubscriptionExpired(_) => EventKind::SubscriptionExpired,
        }
    }

    /// The error carried by a completion event, if any
    pub fn error(&self) -> Option<&UpnpError> {
        match self {
            Event::ActionComplete(e) => e.result.as_ref().err(),
            Event::GetVarComplete(e) => e.result.as_ref().err(),
            Event::SubscribeComplete(e)
            | Event::UnsubscribeComplete(e)
            | Event::RenewComplete(e)
            | Event::AutoRenewalFailed(e)
            | Event::SubscriptionExpired(e) => e.result.as_ref().err(),
            _ => None,
        }
    }
}
