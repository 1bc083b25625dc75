//! Error types for discovery and description handling.

use std::fmt;

/// Error type for discovery operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    /// Network-related errors (socket creation, HTTP requests, etc.)
    NetworkError(String),
    /// The description server answered with a non-success status
    HttpStatus(u16),
    /// Parsing errors (XML, SSDP message, etc.)
    ParseError(String),
    /// A URL in a message or description could not be resolved
    InvalidUrl(String),
    /// Operation timed out waiting for a response
    Timeout,
}

impl fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            DiscoveryError::HttpStatus(code) => write!(f, "HTTP status {}", code),
            DiscoveryError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            DiscoveryError::InvalidUrl(msg) => write!(f, "Invalid URL: {}", msg),
            DiscoveryError::Timeout => write!(f, "Operation timed out"),
        }
    }
}

impl std::error::Error for DiscoveryError {}

/// Convenience Result type alias for discovery operations.
pub type Result<T> = std::result::Result<T, DiscoveryError>;
