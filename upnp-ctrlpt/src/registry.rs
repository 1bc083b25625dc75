//! The list of devices the control point tracks
//!
//! Devices live in insertion order under one mutex. Every network call
//! (subscribe, unsubscribe, search) happens with the mutex released, so a
//! slow device never stalls lookups or event handling for the others.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use upnp_discovery::{Description, ServiceDescription};

use crate::config::ControlPointConfig;
use crate::error::{CtrlPointError, Result};
use crate::ops::ControlPointOps;
use crate::state_update::{StateUpdate, StateUpdateCallback};

/// Upper bound on the MX of a renewal search
const MAX_RENEWAL_MX: i64 = 120;

/// One tracked service of a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceState {
    pub service_id: String,
    pub service_type: String,
    pub control_url: String,
    pub event_url: String,
    /// Set while a subscription is active
    pub sid: Option<String>,
    /// Tracked variables with their last known (truncated) values
    pub variables: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceNode {
    pub udn: String,
    pub device_type: String,
    pub friendly_name: String,
    /// Description document URL
    pub location: String,
    pub base_url: String,
    /// Seconds until the advertisement lapses
    pub advr_timeout: i64,
    /// Indexed like the configured service types
    pub services: Vec<Option<ServiceState>>,
}

impl DeviceNode {
    pub fn service(&self, index: usize) -> Option<&ServiceState> {
        self.services.get(index).and_then(|s| s.as_ref())
    }

    fn sids(&self) -> impl Iterator<Item = &str> {
        self.services
            .iter()
            .flatten()
            .filter_map(|s| s.sid.as_deref())
    }
}

/// What discovery learned about a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub udn: String,
    pub device_type: String,
    pub friendly_name: String,
    pub location: String,
    pub base_url: String,
    pub services: Vec<ServiceDescription>,
}

impl DiscoveredDevice {
    /// Pick the device of `device_type` from a description, or the root
    /// device when none matches
    pub fn from_description(description: &Description, device_type: &str) -> Self {
        let device = description
            .device
            .find_device(device_type)
            .unwrap_or(&description.device);
        Self {
            udn: device.udn.clone(),
            device_type: device.device_type.clone(),
            friendly_name: device.friendly_name.clone(),
            location: description.location.clone(),
            base_url: description.base_url.clone(),
            services: device.services.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    /// Already known; only the advertisement timeout was updated
    Refreshed,
    /// Not of the tracked device type
    Ignored,
}

/// Result of one advertisement-timeout tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub expired: Vec<String>,
    pub renewing: Vec<String>,
}

pub struct DeviceRegistry {
    config: Arc<ControlPointConfig>,
    ops: Arc<dyn ControlPointOps>,
    state_update: StateUpdateCallback,
    devices: Mutex<Vec<DeviceNode>>,
    /// Serializes variable notifications so each SID's updates arrive in order
    delivery: Mutex<()>,
}

impl DeviceRegistry {
    pub fn new(
        config: Arc<ControlPointConfig>,
        ops: Arc<dyn ControlPointOps>,
        state_update: StateUpdateCallback,
    ) -> Self {
        Self {
            config,
            ops,
            state_update,
            devices: Mutex::new(Vec::new()),
            delivery: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ControlPointConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.devices.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.lock().is_empty()
    }

    pub fn contains(&self, udn: &str) -> bool {
        self.devices.lock().iter().any(|d| d.udn == udn)
    }

    /// UDNs in insertion order
    pub fn udns(&self) -> Vec<String> {
        self.devices.lock().iter().map(|d| d.udn.clone()).collect()
    }

    pub fn find(&self, udn: &str) -> Option<DeviceNode> {
        self.devices.lock().iter().find(|d| d.udn == udn).cloned()
    }

    /// Snapshot of the device at 1-based position `devnum`
    pub fn device(&self, devnum: usize) -> Result<DeviceNode> {
        let devices = self.devices.lock();
        devnum
            .checked_sub(1)
            .and_then(|i| devices.get(i))
            .cloned()
            .ok_or(CtrlPointError::InvalidDevice {
                devnum,
                count: devices.len(),
            })
    }

    /// Service `service` of device `devnum`, with the device's UDN
    pub fn service(&self, devnum: usize, service: usize) -> Result<(String, ServiceState)> {
        let device = self.device(devnum)?;
        let state = device
            .service(service)
            .cloned()
            .ok_or_else(|| CtrlPointError::NoService {
                udn: device.udn.clone(),
                service,
            })?;
        Ok((device.udn, state))
    }

    /// Update the advertisement timeout of a known device
    pub fn refresh_timeout(&self, udn: &str, expires: u32) -> bool {
        let mut devices = self.devices.lock();
        match devices.iter_mut().find(|d| d.udn == udn) {
            Some(device) => {
                device.advr_timeout = i64::from(expires);
                true
            }
            None => false,
        }
    }

    /// Track `device`, or refresh its timeout when already known
    ///
    /// New devices are subscribed to every configured service they offer
    /// before they become visible.
    pub fn add_or_refresh(&self, device: DiscoveredDevice, expires: u32) -> AddOutcome {
        if self.refresh_timeout(&device.udn, expires) {
            return AddOutcome::Refreshed;
        }
        if device.device_type != self.config.device_type {
            debug!(udn = %device.udn, device_type = %device.device_type, "Ignoring device of another type");
            return AddOutcome::Ignored;
        }

        let services = self.subscribe_services(&device);
        let node = DeviceNode {
            udn: device.udn,
            device_type: device.device_type,
            friendly_name: device.friendly_name,
            location: device.location,
            base_url: device.base_url,
            advr_timeout: i64::from(expires),
            services,
        };

        // Another thread may have added it while we were subscribing
        let duplicate = {
            let mut devices = self.devices.lock();
            match devices.iter_mut().find(|d| d.udn == node.udn) {
                Some(existing) => {
                    existing.advr_timeout = node.advr_timeout;
                    Some(node.clone())
                }
                None => {
                    devices.push(node.clone());
                    None
                }
            }
        };
        if let Some(node) = duplicate {
            self.unsubscribe_all(&node);
            return AddOutcome::Refreshed;
        }

        info!(udn = %node.udn, name = %node.friendly_name, "Device added");
        self.notify(StateUpdate::DeviceAdded { udn: node.udn });
        AddOutcome::Added
    }

    pub fn remove(&self, udn: &str) -> bool {
        let node = {
            let mut devices = self.devices.lock();
            match devices.iter().position(|d| d.udn == udn) {
                Some(pos) => devices.remove(pos),
                None => return false,
            }
        };
        self.tear_down(node);
        true
    }

    /// Drop every device; returns how many there were
    pub fn remove_all(&self) -> usize {
        let nodes = std::mem::take(&mut *self.devices.lock());
        let count = nodes.len();
        for node in nodes {
            self.tear_down(node);
        }
        count
    }

    /// Forget every device and search for the tracked type again
    pub fn refresh(&self) -> Result<()> {
        self.remove_all();
        self.ops
            .search(self.config.refresh_mx, &self.config.device_type)?;
        Ok(())
    }

    /// Age every advertisement by `incr` seconds
    ///
    /// Devices at or below zero are removed. Devices with less than two
    /// ticks left are searched for again so a live device answers before it
    /// lapses.
    pub fn verify_timeouts(&self, incr: i64) -> VerifyReport {
        let (expired, renewing) = {
            let mut devices = self.devices.lock();
            let mut expired = Vec::new();
            let mut renewing = Vec::new();
            let mut kept = Vec::with_capacity(devices.len());
            for mut node in devices.drain(..) {
                node.advr_timeout -= incr;
                if node.advr_timeout <= 0 {
                    expired.push(node);
                } else {
                    if node.advr_timeout < 2 * incr {
                        renewing.push(node.udn.clone());
                    }
                    kept.push(node);
                }
            }
            *devices = kept;
            (expired, renewing)
        };

        let mut report = VerifyReport::default();
        for node in expired {
            info!(udn = %node.udn, "Advertisement expired");
            report.expired.push(node.udn.clone());
            self.tear_down(node);
        }

        let mx = incr.clamp(1, MAX_RENEWAL_MX) as u32;
        for udn in renewing {
            debug!(udn = %udn, mx, "Advertisement about to lapse, searching again");
            if let Err(e) = self.ops.search(mx, &self.config.device_type) {
                warn!(udn = %udn, error = %e, "Renewal search failed");
            }
            report.renewing.push(udn);
        }
        report
    }

    /// Apply a property-change notification; returns how many tracked
    /// variables changed
    pub fn handle_event(&self, sid: &str, changed: &[(String, String)]) -> usize {
        let _ordered = self.delivery.lock();
        let updates = {
            let mut devices = self.devices.lock();
            let mut updates = Vec::new();
            let found = devices.iter_mut().find_map(|device| {
                let udn = &device.udn;
                device.services.iter_mut().enumerate().find_map(|(index, s)| match s {
                    Some(state) if state.sid.as_deref() == Some(sid) => {
                        Some((udn.clone(), index, state))
                    }
                    _ => None,
                })
            });
            if let Some((udn, index, state)) = found {
                for (name, value) in changed {
                    if let Some(slot) = state.variables.iter_mut().find(|(n, _)| n == name) {
                        slot.1 = truncate_chars(value, self.config.max_value_len);
                        updates.push(StateUpdate::VariableChanged {
                            udn: udn.clone(),
                            service: index,
                            name: name.clone(),
                            value: slot.1.clone(),
                        });
                    }
                }
            } else {
                debug!(sid, "Event for an unknown subscription");
            }
            updates
        };

        let count = updates.len();
        for update in updates {
            self.notify(update);
        }
        count
    }

    /// Record the SID now active on the service whose event URL is `event_url`
    pub fn handle_subscribe_update(&self, event_url: &str, sid: &str) -> bool {
        let mut devices = self.devices.lock();
        for device in devices.iter_mut() {
            for state in device.services.iter_mut().flatten() {
                if state.event_url == event_url {
                    debug!(udn = %device.udn, sid, "Subscription updated");
                    state.sid = Some(sid.to_string());
                    return true;
                }
            }
        }
        false
    }

    /// Forget `sid` after it was cancelled
    pub fn handle_unsubscribe(&self, sid: &str) -> bool {
        let mut devices = self.devices.lock();
        for state in devices.iter_mut().flat_map(|d| d.services.iter_mut().flatten()) {
            if state.sid.as_deref() == Some(sid) {
                state.sid = None;
                return true;
            }
        }
        false
    }

    /// Report a queried variable value for the service at `control_url`
    pub fn handle_get_var(&self, control_url: &str, var_name: &str, value: &str) -> bool {
        let target = {
            let devices = self.devices.lock();
            devices.iter().find_map(|device| {
                device
                    .services
                    .iter()
                    .position(|s| s.as_ref().is_some_and(|s| s.control_url == control_url))
                    .map(|index| (device.udn.clone(), index))
            })
        };
        match target {
            Some((udn, service)) => {
                self.notify(StateUpdate::GetVarComplete {
                    udn,
                    service,
                    name: var_name.to_string(),
                    value: value.to_string(),
                });
                true
            }
            None => false,
        }
    }

    /// Numbered UDN list, also logged
    pub fn print_list(&self) -> String {
        let udns = self.udns();
        let mut out = String::from("Device list:\n");
        for (i, udn) in udns.iter().enumerate() {
            out.push_str(&format!(" {:>3} -- {}\n", i + 1, udn));
        }
        info!("{}", out.trim_end());
        out
    }

    /// Fields, services and variables of device `devnum`, also logged
    pub fn print_device(&self, devnum: usize) -> Result<String> {
        let device = self.device(devnum)?;
        let mut out = format!(
            "Device {}:\n  UDN            = {}\n  DeviceType     = {}\n  FriendlyName   = {}\n  Location       = {}\n  BaseURL        = {}\n  AdvrTimeOut    = {}\n",
            devnum,
            device.udn,
            device.device_type,
            device.friendly_name,
            device.location,
            device.base_url,
            device.advr_timeout
        );
        for (index, service) in device.services.iter().enumerate() {
            let name = self
                .config
                .service_names
                .get(index)
                .map(String::as_str)
                .unwrap_or("?");
            match service {
                Some(state) => {
                    out.push_str(&format!(
                        "  Service {} ({})\n    ServiceId  = {}\n    ServiceType = {}\n    ControlURL = {}\n    EventURL   = {}\n    SID        = {}\n",
                        index,
                        name,
                        state.service_id,
                        state.service_type,
                        state.control_url,
                        state.event_url,
                        state.sid.as_deref().unwrap_or("-")
                    ));
                    for (var, value) in &state.variables {
                        out.push_str(&format!("    {:<10} = {}\n", var, value));
                    }
                }
                None => out.push_str(&format!("  Service {} ({}): not offered\n", index, name)),
            }
        }
        info!("{}", out.trim_end());
        Ok(out)
    }

    fn subscribe_services(&self, device: &DiscoveredDevice) -> Vec<Option<ServiceState>> {
        self.config
            .service_types
            .iter()
            .enumerate()
            .map(|(index, service_type)| {
                let desc = device
                    .services
                    .iter()
                    .find(|s| &s.service_type == service_type)?;
                let sid = match self.ops.subscribe(&desc.event_url, self.config.default_timeout) {
                    Ok((sid, granted)) => {
                        debug!(udn = %device.udn, sid = %sid, granted = %granted, "Subscribed");
                        Some(sid)
                    }
                    Err(e) => {
                        warn!(udn = %device.udn, event_url = %desc.event_url, error = %e, "Subscribe failed");
                        None
                    }
                };
                let variables = self
                    .config
                    .variable_names
                    .get(index)
                    .map(|names| names.iter().map(|n| (n.clone(), String::new())).collect())
                    .unwrap_or_default();
                Some(ServiceState {
                    service_id: desc.service_id.clone(),
                    service_type: desc.service_type.clone(),
                    control_url: desc.control_url.clone(),
                    event_url: desc.event_url.clone(),
                    sid,
                    variables,
                })
            })
            .collect()
    }

    fn unsubscribe_all(&self, node: &DeviceNode) {
        for sid in node.sids() {
            if let Err(e) = self.ops.unsubscribe(sid) {
                debug!(udn = %node.udn, sid, error = %e, "Unsubscribe failed");
            }
        }
    }

    fn tear_down(&self, node: DeviceNode) {
        self.unsubscribe_all(&node);
        info!(udn = %node.udn, "Device removed");
        self.notify(StateUpdate::DeviceRemoved { udn: node.udn });
    }

    fn notify(&self, update: StateUpdate) {
        (self.state_update)(update);
    }
}

fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use upnp_discovery::DeviceDescription;

    fn service(service_type: &str) -> ServiceDescription {
        ServiceDescription {
            service_type: service_type.to_string(),
            service_id: "urn:upnp:serviceId:tvcontrol1".to_string(),
            control_url: "http://10.0.0.5/control".to_string(),
            event_url: "http://10.0.0.5/event".to_string(),
        }
    }

    fn device(device_type: &str, udn: &str, embedded: Vec<DeviceDescription>) -> DeviceDescription {
        DeviceDescription {
            device_type: device_type.to_string(),
            udn: udn.to_string(),
            friendly_name: "Living room".to_string(),
            manufacturer: None,
            model_name: None,
            services: vec![service("urn:upnp:service:tvcontrol:1")],
            embedded,
        }
    }

    #[rstest]
    #[case("Channel", 5, "Chann")]
    #[case("42", 5, "42")]
    #[case("größe", 3, "grö")]
    #[case("", 5, "")]
    fn test_truncate_on_char_boundary(#[case] value: &str, #[case] max: usize, #[case] expected: &str) {
        assert_eq!(truncate_chars(value, max), expected);
    }

    #[test]
    fn test_discovered_device_prefers_matching_embedded_device() {
        let description = Description {
            location: "http://10.0.0.5/desc.xml".to_string(),
            base_url: "http://10.0.0.5/".to_string(),
            device: device(
                "urn:upnp:device:bridge:1",
                "uuid:bridge",
                vec![device("urn:upnp:device:ohm:1", "uuid:tv", Vec::new())],
            ),
        };

        let found = DiscoveredDevice::from_description(&description, "urn:upnp:device:ohm:1");
        assert_eq!(found.udn, "uuid:tv");
        assert_eq!(found.location, "http://10.0.0.5/desc.xml");
        assert_eq!(found.services.len(), 1);

        let fallback = DiscoveredDevice::from_description(&description, "urn:upnp:device:other:1");
        assert_eq!(fallback.udn, "uuid:bridge");
    }

    #[test]
    fn test_node_lists_active_sids() {
        let state = |sid: Option<&str>| ServiceState {
            service_id: String::new(),
            service_type: String::new(),
            control_url: String::new(),
            event_url: String::new(),
            sid: sid.map(str::to_string),
            variables: Vec::new(),
        };
        let node = DeviceNode {
            udn: "uuid:tv".to_string(),
            device_type: String::new(),
            friendly_name: String::new(),
            location: String::new(),
            base_url: String::new(),
            advr_timeout: 10,
            services: vec![Some(state(Some("uuid:sub-1"))), None, Some(state(None))],
        };
        assert_eq!(node.sids().collect::<Vec<_>>(), vec!["uuid:sub-1"]);
        assert!(node.service(1).is_none());
    }
}
