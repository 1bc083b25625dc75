//! # UPnP SDK
//!
//! The core of a UPnP control point: a handle table, prioritized worker
//! pools, a timer, an HTTP/SSDP miniserver and the async dispatch of GENA
//! subscriptions and SOAP control requests.
//!
//! ## Overview
//!
//! Everything hangs off an [`Sdk`] value. [`Sdk::init`] starts three worker
//! pools (send, receive, miniserver), the timer loop and the miniserver;
//! [`Sdk::finish`] stops them again. In between, a single client session is
//! registered with a callback that receives every [`Event`]: discovery
//! results, NOTIFY property changes and the completions of async calls.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use upnp_sdk::{Event, Sdk, SdkConfig, Timeout};
//!
//! let sdk = Sdk::new(SdkConfig::default())?;
//! sdk.init(None, 0)?;
//! let handle = sdk.register_client(|event| {
//!     if let Event::EventReceived(notification) = event {
//!         for (name, value) in notification.changed_variables {
//!             println!("{} = {}", name, value);
//!         }
//!     }
//! })?;
//!
//! let (sid, granted) = sdk.subscribe(handle, "http://192.168.1.20:1400/event", Timeout::Seconds(1800))?;
//! println!("{} granted for {}", sid, granted);
//! ```
//!
//! ## Threading
//!
//! - Callbacks run on pool threads, never on the caller's thread.
//! - Outbound network exchanges run on the send pool; inbound datagrams and
//!   connections are handled on the receive pool.
//! - The miniserver loop and the timer loop each occupy one persistent thread.
//! - No lock is held while a callback runs or while waiting on the network.

mod control;
mod gena;
mod search;
mod web;

pub mod config;
pub mod error;
pub mod event;
pub mod handle;
pub mod logging;
pub mod miniserver;
pub mod sdk;
pub mod thread_pool;
pub mod timer;
pub mod transport;

// Re-export main types for convenience
pub use config::{PoolConfig, SdkConfig};
pub use error::{Result, UpnpError};
pub use event::{
    ActionComplete, ClientCallback, Completion, Discovery, DiscoveryOrigin, Event, EventKind,
    EventNotification, SearchId, SearchTimeout, StateVarComplete, SubscriptionEvent,
};
pub use handle::{ClientInfo, DeviceInfo, Handle, HandleInfo, HandleTable};
pub use logging::{init_logging, init_logging_from_env, LoggingError, LoggingMode};
pub use miniserver::{BoundPorts, Dispatcher, MiniServer, Phase, StartOptions};
pub use sdk::{Sdk, SdkState};
pub use thread_pool::{JobId, PoolError, PoolHandle, PoolStats, Priority, ThreadPool};
pub use timer::{Timer, TimerId};
pub use transport::{ActionRequest, ControlTransport, EventingTransport, Transports};

// Re-export commonly used types from dependencies
pub use soap_client::{SoapError, SubscriptionTimeout as Timeout};
pub use upnp_discovery::{Description, DescriptionFetcher, DeviceDescription, ServiceDescription};
