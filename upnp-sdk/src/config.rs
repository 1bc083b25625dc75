//! Configuration types for the SDK core
//!
//! This module defines the knobs that control thread-pool sizing, the
//! maintenance timer, the miniserver start/stop handshake, and the eventing
//! defaults used by the async dispatch paths.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use crate::error::{Result, UpnpError};

/// Sizing of one worker pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Thread-name prefix for the pool's workers
    pub name: String,

    /// Workers kept alive while idle
    pub min_threads: usize,

    /// Upper bound on transient workers
    pub max_threads: usize,

    /// Queued jobs beyond which `submit` fails
    pub max_jobs_total: usize,

    /// How long a surplus idle worker waits before exiting
    pub idle_timeout: Duration,
}

impl PoolConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            min_threads: 2,
            max_threads: 12,
            max_jobs_total: 100,
            idle_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_threads(mut self, min: usize, max: usize) -> Self {
        self.min_threads = min;
        self.max_threads = max;
        self
    }

    pub fn with_max_jobs(mut self, max_jobs_total: usize) -> Self {
        self.max_jobs_total = max_jobs_total;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.max_threads == 0 {
            return Err(UpnpError::invalid_param(format!(
                "pool {}: max_threads must be greater than 0",
                self.name
            )));
        }
        if self.min_threads > self.max_threads {
            return Err(UpnpError::invalid_param(format!(
                "pool {}: min_threads must not exceed max_threads",
                self.name
            )));
        }
        if self.max_jobs_total == 0 {
            return Err(UpnpError::invalid_param(format!(
                "pool {}: max_jobs_total must be greater than 0",
                self.name
            )));
        }
        Ok(())
    }
}

/// Configuration for an [`Sdk`](crate::Sdk) instance
#[derive(Debug, Clone)]
pub struct SdkConfig {
    /// Capacity of the handle table, slot 0 included
    /// Default: 200
    pub max_handles: usize,

    /// Pool running subscribe/unsubscribe/renew/action jobs and timer callbacks
    pub send_pool: PoolConfig,

    /// Pool handling inbound SSDP datagrams and HTTP connections
    pub recv_pool: PoolConfig,

    /// Pool hosting the persistent miniserver loop
    pub miniserver_pool: PoolConfig,

    /// Interval of the periodic maintenance tick
    /// Default: 30 seconds
    pub maintenance_interval: Duration,

    /// How long `start` waits for the miniserver loop to report running
    /// Default: 10 seconds
    pub start_timeout: Duration,

    /// Interval between shutdown datagrams while stopping the miniserver
    /// Default: 50 milliseconds
    pub stop_resend_interval: Duration,

    /// MX used when a search asks for less than one second
    /// Default: 5
    pub default_search_mx: u32,

    /// Renew finite subscriptions automatically before they lapse
    /// Default: true
    pub auto_renew: bool,

    /// Lead time for automatic renewal
    /// Default: 10 seconds
    pub auto_renew_lead: Duration,

    /// Join the SSDP multicast group to receive advertisements
    /// Default: true
    pub enable_ssdp_multicast: bool,

    /// Open IPv6 listeners next to the IPv4 ones
    /// Default: false
    pub enable_ipv6: bool,

    /// Where IPv4 M-SEARCH requests are sent
    /// Default: 239.255.255.250:1900
    pub search_destination_v4: SocketAddr,

    /// First port tried for the HTTP listener when none is requested
    /// Default: 49152
    pub listen_port_base: u16,

    /// Largest accepted NOTIFY body in bytes
    /// Default: 16 KiB
    pub max_content_length: usize,

    /// Timeout for outbound HTTP requests and inbound request reads
    /// Default: 30 seconds
    pub http_timeout: Duration,

    /// Longest accepted virtual directory name
    /// Default: 255
    pub virtual_dir_name_limit: usize,

    /// Product tokens sent in `USER-AGENT` and `SERVER` headers
    pub user_agent: String,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            max_handles: 200,
            send_pool: PoolConfig::new("upnp-send"),
            recv_pool: PoolConfig::new("upnp-recv"),
            miniserver_pool: PoolConfig::new("upnp-miniserver").with_threads(1, 2),
            maintenance_interval: Duration::from_secs(30),
            start_timeout: Duration::from_secs(10),
            stop_resend_interval: Duration::from_millis(50),
            default_search_mx: 5,
            auto_renew: true,
            auto_renew_lead: Duration::from_secs(10),
            enable_ssdp_multicast: true,
            enable_ipv6: false,
            search_destination_v4: SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::new(239, 255, 255, 250),
                1900,
            )),
            listen_port_base: 49152,
            max_content_length: 16 * 1024,
            http_timeout: Duration::from_secs(30),
            virtual_dir_name_limit: 255,
            user_agent: format!("upnp-sdk/{} UPnP/1.0", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl SdkConfig {
    /// Create a new SdkConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for hosts without a multicast route, and for tests
    ///
    /// No multicast group is joined and no IPv6 sockets are opened.
    pub fn loopback_only() -> Self {
        Self {
            enable_ssdp_multicast: false,
            enable_ipv6: false,
            start_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    pub fn with_max_handles(mut self, max_handles: usize) -> Self {
        self.max_handles = max_handles;
        self
    }

    pub fn with_send_pool(mut self, pool: PoolConfig) -> Self {
        self.send_pool = pool;
        self
    }

    pub fn with_recv_pool(mut self, pool: PoolConfig) -> Self {
        self.recv_pool = pool;
        self
    }

    pub fn with_miniserver_pool(mut self, pool: PoolConfig) -> Self {
        self.miniserver_pool = pool;
        self
    }

    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    pub fn with_default_search_mx(mut self, mx: u32) -> Self {
        self.default_search_mx = mx;
        self
    }

    pub fn with_auto_renew(mut self, auto_renew: bool) -> Self {
        self.auto_renew = auto_renew;
        self
    }

    pub fn with_auto_renew_lead(mut self, lead: Duration) -> Self {
        self.auto_renew_lead = lead;
        self
    }

    pub fn with_ssdp_multicast(mut self, enabled: bool) -> Self {
        self.enable_ssdp_multicast = enabled;
        self
    }

    pub fn with_ipv6(mut self, enabled: bool) -> Self {
        self.enable_ipv6 = enabled;
        self
    }

    pub fn with_search_destination(mut self, destination: SocketAddr) -> Self {
        self.search_destination_v4 = destination;
        self
    }

    pub fn with_max_content_length(mut self, bytes: usize) -> Self {
        self.max_content_length = bytes;
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<()> {
        if self.max_handles < 2 {
            return Err(UpnpError::invalid_param(
                "max_handles must leave room for at least one handle besides slot 0",
            ));
        }

        self.send_pool.validate()?;
        self.recv_pool.validate()?;
        self.miniserver_pool.validate()?;

        if self.maintenance_interval == Duration::ZERO {
            return Err(UpnpError::invalid_param(
                "maintenance_interval must be greater than 0",
            ));
        }

        if self.start_timeout == Duration::ZERO {
            return Err(UpnpError::invalid_param("start_timeout must be greater than 0"));
        }

        if self.stop_resend_interval == Duration::ZERO {
            return Err(UpnpError::invalid_param(
                "stop_resend_interval must be greater than 0",
            ));
        }

        if self.default_search_mx == 0 {
            return Err(UpnpError::invalid_param("default_search_mx must be at least 1"));
        }

        if self.max_content_length == 0 {
            return Err(UpnpError::invalid_param(
                "max_content_length must be greater than 0",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SdkConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_handles, 200);
        assert_eq!(config.maintenance_interval, Duration::from_secs(30));
        assert_eq!(config.listen_port_base, 49152);
        assert!(config.user_agent.contains("UPnP/1.0"));
    }

    #[test]
    fn test_loopback_preset() {
        let config = SdkConfig::loopback_only();
        assert!(config.validate().is_ok());
        assert!(!config.enable_ssdp_multicast);
        assert!(!config.enable_ipv6);
    }

    #[test]
    fn test_builder_methods() {
        let config = SdkConfig::new()
            .with_max_handles(8)
            .with_default_search_mx(2)
            .with_auto_renew(false)
            .with_send_pool(PoolConfig::new("send").with_threads(1, 3).with_max_jobs(4));

        assert_eq!(config.max_handles, 8);
        assert_eq!(config.default_search_mx, 2);
        assert!(!config.auto_renew);
        assert_eq!(config.send_pool.max_threads, 3);
        assert_eq!(config.send_pool.max_jobs_total, 4);
    }

    #[test]
    fn test_invalid_configurations() {
        assert!(SdkConfig::new().with_max_handles(1).validate().is_err());
        assert!(SdkConfig::new().with_default_search_mx(0).validate().is_err());
        assert!(SdkConfig::new()
            .with_recv_pool(PoolConfig::new("recv").with_threads(4, 2))
            .validate()
            .is_err());
        assert!(SdkConfig::new()
            .with_maintenance_interval(Duration::ZERO)
            .validate()
            .is_err());
    }
}
