//! # UPnP control point
//!
//! Tracks the devices of one profile on the network, keeps their evented
//! variables current, and sends them actions by device number.
//!
//! ```rust,ignore
//! use upnp_ctrlpt::{ControlPoint, ControlPointConfig, StateUpdate};
//! use upnp_sdk::SdkConfig;
//!
//! let control_point = ControlPoint::start(SdkConfig::default(), ControlPointConfig::default(), |update| {
//!     if let StateUpdate::VariableChanged { udn, name, value, .. } = update {
//!         println!("{}: {} = {}", udn, name, value);
//!     }
//! })?;
//!
//! control_point.print_list();
//! control_point.power_on(1)?;
//! control_point.stop()?;
//! ```
//!
//! Discovery results are downloaded, filtered by device type and subscribed
//! before they appear in the [`DeviceRegistry`]. A periodic check ages each
//! advertisement, searches again for devices about to lapse and drops the
//! ones that did.

mod actions;
mod control_point;
mod handler;

pub mod config;
pub mod error;
pub mod ops;
pub mod registry;
pub mod state_update;

pub use actions::{AccessPoint, ProprietaryCommand, CONTROL_SERVICE};
pub use config::ControlPointConfig;
pub use control_point::ControlPoint;
pub use error::{CtrlPointError, Result};
pub use handler::EventHandler;
pub use ops::{ControlPointOps, SdkOps};
pub use registry::{AddOutcome, DeviceNode, DeviceRegistry, DiscoveredDevice, ServiceState, VerifyReport};
pub use state_update::{StateUpdate, StateUpdateCallback};
