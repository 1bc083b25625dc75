//! Error types for the SDK core

use soap_client::SoapError;
use thiserror::Error;
use upnp_discovery::DiscoveryError;

use crate::thread_pool::PoolError;

/// Errors reported by SDK entry points and carried in completion events
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpnpError {
    #[error("SDK is not initialized")]
    NotInitialized,

    #[error("SDK is already initialized")]
    AlreadyInitialized,

    #[error("Invalid handle")]
    InvalidHandle,

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("No free handles")]
    OutOfHandles,

    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("A session of this kind is already registered")]
    AlreadyRegistered,

    #[error("Socket error: {0}")]
    SocketError(String),

    #[error("Bind error: {0}")]
    BindError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Network timeout")]
    NetworkTimeout,

    /// Non-success HTTP status, or the UPnP error code of a SOAP fault
    #[error("Protocol error {code}: {message}")]
    ProtocolError { code: u16, message: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Initialization failed: {0}")]
    InitFailed(String),
}

impl UpnpError {
    /// Stable integer code for the error kind
    pub fn code(&self) -> i32 {
        match self {
            UpnpError::InvalidHandle => -100,
            UpnpError::InvalidParam(_) => -101,
            UpnpError::OutOfHandles => -102,
            UpnpError::OutOfMemory(_) => -104,
            UpnpError::InitFailed(_) => -105,
            UpnpError::InvalidUrl(_) => -108,
            UpnpError::ProtocolError { .. } => -111,
            UpnpError::NotInitialized => -116,
            UpnpError::AlreadyRegistered => -120,
            UpnpError::AlreadyInitialized => -121,
            UpnpError::BindError(_) => -203,
            UpnpError::NetworkTimeout => -207,
            UpnpError::SocketError(_) => -208,
            UpnpError::InternalError(_) => -911,
        }
    }

    pub(crate) fn invalid_param(what: impl Into<String>) -> Self {
        UpnpError::InvalidParam(what.into())
    }
}

impl From<SoapError> for UpnpError {
    fn from(err: SoapError) -> Self {
        match err {
            SoapError::Network(msg) => UpnpError::SocketError(msg),
            SoapError::Timeout => UpnpError::NetworkTimeout,
            SoapError::InvalidUrl(msg) => UpnpError::InvalidUrl(msg),
            SoapError::Status(code) => UpnpError::ProtocolError {
                code,
                message: "HTTP error status".to_string(),
            },
            SoapError::Fault(code) => UpnpError::ProtocolError {
                code,
                message: "SOAP fault".to_string(),
            },
            SoapError::Parse(msg) => UpnpError::ProtocolError { code: 0, message: msg },
        }
    }
}

impl From<DiscoveryError> for UpnpError {
    fn from(err: DiscoveryError) -> Self {
        match err {
            DiscoveryError::NetworkError(msg) => UpnpError::SocketError(msg),
            DiscoveryError::HttpStatus(code) => {
                UpnpError::InvalidUrl(format!("server answered HTTP {}", code))
            }
            DiscoveryError::ParseError(msg) => UpnpError::ProtocolError { code: 0, message: msg },
            DiscoveryError::InvalidUrl(msg) => UpnpError::InvalidUrl(msg),
            DiscoveryError::Timeout => UpnpError::NetworkTimeout,
        }
    }
}

impl From<PoolError> for UpnpError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::ShuttingDown => UpnpError::NotInitialized,
            PoolError::QueueFull(queued) => {
                UpnpError::OutOfMemory(format!("job queue full ({} queued)", queued))
            }
            PoolError::Spawn(msg) => UpnpError::InternalError(msg),
        }
    }
}

/// Convenience Result type alias for SDK operations
pub type Result<T> = std::result::Result<T, UpnpError>;
