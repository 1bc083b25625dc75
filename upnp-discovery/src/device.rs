//! Device description parsing.
//!
//! This module turns a UPnP device description document into the handful of
//! fields a control point works with: device type, UDN, friendly name, base
//! URL, and per-service {service id, event URL, control URL}. Relative URLs
//! are resolved against `URLBase`, falling back to the document location.

use crate::error::{DiscoveryError, Result};
use serde::Deserialize;
use url::Url;

/// UPnP device description root element.
#[derive(Debug, Deserialize)]
struct Root {
    #[serde(rename = "URLBase")]
    url_base: Option<String>,
    device: RawDevice,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDevice {
    device_type: String,
    friendly_name: Option<String>,
    manufacturer: Option<String>,
    model_name: Option<String>,
    #[serde(rename = "UDN")]
    udn: String,
    service_list: Option<RawServiceList>,
    device_list: Option<RawDeviceList>,
}

#[derive(Debug, Deserialize)]
struct RawServiceList {
    #[serde(rename = "service", default)]
    services: Vec<RawService>,
}

#[derive(Debug, Deserialize)]
struct RawDeviceList {
    #[serde(rename = "device", default)]
    devices: Vec<RawDevice>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawService {
    service_type: String,
    service_id: String,
    #[serde(rename = "controlURL")]
    control_url: String,
    #[serde(rename = "eventSubURL")]
    event_sub_url: String,
}

/// A service advertised in a description, with absolute URLs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescription {
    pub service_type: String,
    pub service_id: String,
    pub control_url: String,
    pub event_url: String,
}

/// A (root or embedded) device from a description document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescription {
    pub device_type: String,
    pub udn: String,
    pub friendly_name: String,
    pub manufacturer: Option<String>,
    pub model_name: Option<String>,
    pub services: Vec<ServiceDescription>,
    pub embedded: Vec<DeviceDescription>,
}

impl DeviceDescription {
    /// Find a service of `service_type` on this device or any embedded device
    pub fn find_service(&self, service_type: &str) -> Option<&ServiceDescription> {
        self.services
            .iter()
            .find(|s| s.service_type == service_type)
            .or_else(|| self.embedded.iter().find_map(|d| d.find_service(service_type)))
    }

    /// Find the first device of `device_type`, searching depth-first
    pub fn find_device(&self, device_type: &str) -> Option<&DeviceDescription> {
        if self.device_type == device_type {
            return Some(self);
        }
        self.embedded.iter().find_map(|d| d.find_device(device_type))
    }
}

/// A parsed description document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Description {
    /// Where the document was fetched from
    pub location: String,
    /// Base against which relative URLs were resolved
    pub base_url: String,
    /// The root device
    pub device: DeviceDescription,
}

impl Description {
    /// Parse a description document fetched from `location`.
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::ParseError` if the XML is malformed or missing
    /// required fields, and `DiscoveryError::InvalidUrl` if a service URL
    /// cannot be resolved.
    pub fn parse(xml: &str, location: &str) -> Result<Self> {
        let root: Root = quick_xml::de::from_str(xml).map_err(|e| {
            DiscoveryError::ParseError(format!("Failed to parse device XML: {}", e))
        })?;

        let base_text = root
            .url_base
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .unwrap_or(location);
        let base = Url::parse(base_text)
            .map_err(|e| DiscoveryError::InvalidUrl(format!("{}: {}", base_text, e)))?;

        Ok(Self {
            location: location.to_string(),
            base_url: base.to_string(),
            device: convert(root.device, &base)?,
        })
    }

    /// Shorthand for `self.device.find_service`
    pub fn find_service(&self, service_type: &str) -> Option<&ServiceDescription> {
        self.device.find_service(service_type)
    }
}

fn convert(raw: RawDevice, base: &Url) -> Result<DeviceDescription> {
    let services = raw
        .service_list
        .map(|list| list.services)
        .unwrap_or_default()
        .into_iter()
        .map(|s| {
            Ok(ServiceDescription {
                control_url: resolve_url(base, &s.control_url)?,
                event_url: resolve_url(base, &s.event_sub_url)?,
                service_type: s.service_type.trim().to_string(),
                service_id: s.service_id.trim().to_string(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let embedded = raw
        .device_list
        .map(|list| list.devices)
        .unwrap_or_default()
        .into_iter()
        .map(|d| convert(d, base))
        .collect::<Result<Vec<_>>>()?;

    Ok(DeviceDescription {
        device_type: raw.device_type.trim().to_string(),
        udn: raw.udn.trim().to_string(),
        friendly_name: raw.friendly_name.unwrap_or_default().trim().to_string(),
        manufacturer: raw.manufacturer,
        model_name: raw.model_name,
        services,
        embedded,
    })
}

/// Resolve a possibly relative URL against `base`
pub fn resolve_url(base: &Url, relative: &str) -> Result<String> {
    base.join(relative.trim())
        .map(|u| u.to_string())
        .map_err(|e| DiscoveryError::InvalidUrl(format!("{}: {}", relative, e)))
}
