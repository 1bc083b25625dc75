//! SSDP and device-description support for UPnP control points
//!
//! This crate holds the wire-facing collaborators of the SDK core:
//!
//! - [`ssdp`] decodes advertisements and search responses and encodes
//!   M-SEARCH requests.
//! - [`device`] parses description documents into device and service
//!   records with absolute control and event URLs.
//! - [`fetch`] downloads description documents over HTTP.
//!
//! ```no_run
//! use upnp_discovery::{DescriptionFetcher, DescriptionSource};
//! use std::time::Duration;
//!
//! let fetcher = DescriptionFetcher::new(Duration::from_secs(5))?;
//! let description = fetcher.fetch("http://192.168.1.20:49152/description.xml")?;
//! for service in &description.device.services {
//!     println!("{} -> {}", service.service_id, service.control_url);
//! }
//! # Ok::<(), upnp_discovery::DiscoveryError>(())
//! ```

mod error;
pub mod device;
pub mod fetch;
pub mod ssdp;

pub use device::{Description, DeviceDescription, ServiceDescription};
pub use error::{DiscoveryError, Result};
pub use fetch::{DescriptionFetcher, DescriptionSource};
pub use ssdp::{Advertisement, SsdpMessage};
