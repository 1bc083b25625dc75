//! Error types for the control-point layer

use thiserror::Error;
use upnp_discovery::DiscoveryError;
use upnp_sdk::UpnpError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CtrlPointError {
    #[error(transparent)]
    Sdk(#[from] UpnpError),

    #[error("Description error: {0}")]
    Description(#[from] DiscoveryError),

    /// Device numbers are 1-based positions in the registry
    #[error("Invalid device number {devnum} ({count} devices known)")]
    InvalidDevice { devnum: usize, count: usize },

    #[error("Device {udn} has no service #{service}")]
    NoService { udn: String, service: usize },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<CtrlPointError> for UpnpError {
    fn from(err: CtrlPointError) -> Self {
        match err {
            CtrlPointError::Sdk(e) => e,
            CtrlPointError::Description(e) => e.into(),
            other => UpnpError::InvalidParam(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, CtrlPointError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sdk_errors_pass_through() {
        let err: UpnpError = CtrlPointError::Sdk(UpnpError::InvalidHandle).into();
        assert_eq!(err, UpnpError::InvalidHandle);
    }

    #[test]
    fn test_lookup_errors_become_invalid_param() {
        let err: UpnpError = CtrlPointError::InvalidDevice { devnum: 3, count: 1 }.into();
        assert_eq!(err.code(), -101);
        assert!(err.to_string().contains("Invalid device number 3"));
    }
}
