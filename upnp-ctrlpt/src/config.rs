//! Control-point profile: which devices to track and which variables to keep

use std::net::Ipv4Addr;
use std::time::Duration;

use upnp_sdk::Timeout;

use crate::error::{CtrlPointError, Result};

/// The device profile tracked by a [`ControlPoint`](crate::ControlPoint)
///
/// `service_types`, `service_names` and `variable_names` are parallel: entry
/// `i` of each describes service index `i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPointConfig {
    /// Only devices of this type are added to the registry
    pub device_type: String,

    pub service_types: Vec<String>,

    /// Short names used in diagnostics
    pub service_names: Vec<String>,

    /// State variables stored per service
    pub variable_names: Vec<Vec<String>>,

    /// Timeout requested when subscribing
    pub default_timeout: Timeout,

    /// Tick of the advertisement-timeout check
    pub timer_increment: Duration,

    /// MX of the search issued by `refresh`
    pub refresh_mx: u32,

    /// Stored variable values are truncated to this many characters
    pub max_value_len: usize,

    /// Address the SDK binds to; `None` picks the first usable interface
    pub host_ip: Option<Ipv4Addr>,

    /// Miniserver port; 0 picks one
    pub port: u16,
}

impl Default for ControlPointConfig {
    fn default() -> Self {
        Self {
            device_type: "urn:upnp:device:ohm:1".to_string(),
            service_types: vec!["urn:upnp:service:tvcontrol:1".to_string()],
            service_names: vec!["Control".to_string()],
            variable_names: vec![vec!["Power".to_string(), "Channel".to_string()]],
            default_timeout: Timeout::Seconds(1801),
            timer_increment: Duration::from_secs(30),
            refresh_mx: 5,
            max_value_len: 5,
            host_ip: None,
            port: 0,
        }
    }
}

impl ControlPointConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device_type(mut self, device_type: impl Into<String>) -> Self {
        self.device_type = device_type.into();
        self
    }

    /// Track one more service and the variables to keep for it
    pub fn with_service(
        mut self,
        service_type: impl Into<String>,
        name: impl Into<String>,
        variables: &[&str],
    ) -> Self {
        self.service_types.push(service_type.into());
        self.service_names.push(name.into());
        self.variable_names
            .push(variables.iter().map(|v| v.to_string()).collect());
        self
    }

    /// Drop every configured service
    pub fn without_services(mut self) -> Self {
        self.service_types.clear();
        self.service_names.clear();
        self.variable_names.clear();
        self
    }

    pub fn with_default_timeout(mut self, timeout: Timeout) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_timer_increment(mut self, increment: Duration) -> Self {
        self.timer_increment = increment;
        self
    }

    pub fn with_refresh_mx(mut self, mx: u32) -> Self {
        self.refresh_mx = mx;
        self
    }

    pub fn with_max_value_len(mut self, len: usize) -> Self {
        self.max_value_len = len;
        self
    }

    pub fn with_host_ip(mut self, host_ip: Ipv4Addr) -> Self {
        self.host_ip = Some(host_ip);
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn service_count(&self) -> usize {
        self.service_types.len()
    }

    /// Whether `name` is stored for service `service`
    pub fn tracks_variable(&self, service: usize, name: &str) -> bool {
        self.variable_names
            .get(service)
            .is_some_and(|names| names.iter().any(|n| n == name))
    }

    pub fn validate(&self) -> Result<()> {
        if self.device_type.is_empty() {
            return Err(CtrlPointError::Config("device_type must not be empty".into()));
        }
        let count = self.service_types.len();
        if self.service_names.len() != count || self.variable_names.len() != count {
            return Err(CtrlPointError::Config(format!(
                "{} service types but {} names and {} variable lists",
                count,
                self.service_names.len(),
                self.variable_names.len()
            )));
        }
        if self.timer_increment.as_secs() == 0 {
            return Err(CtrlPointError::Config(
                "timer_increment must be at least one second".into(),
            ));
        }
        if self.refresh_mx == 0 {
            return Err(CtrlPointError::Config("refresh_mx must be greater than 0".into()));
        }
        if self.max_value_len == 0 {
            return Err(CtrlPointError::Config("max_value_len must be greater than 0".into()));
        }
        if self.default_timeout == Timeout::Seconds(0) {
            return Err(CtrlPointError::Config("default_timeout must not be zero".into()));
        }
        Ok(())
    }
}
