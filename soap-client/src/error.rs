//! Error types for the SOAP client

use thiserror::Error;

/// Errors that can occur during SOAP and GENA communication
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SoapError {
    /// Network or HTTP transport error
    #[error("Network/HTTP error: {0}")]
    Network(String),

    /// The peer did not answer within the request timeout
    #[error("Request timed out")]
    Timeout,

    /// The target URL could not be used
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Non-success HTTP status that carried no SOAP fault
    #[error("HTTP status {0}")]
    Status(u16),

    /// XML parsing error
    #[error("XML parsing error: {0}")]
    Parse(String),

    /// SOAP fault returned by the server
    #[error("SOAP fault: error code {0}")]
    Fault(u16),
}

impl From<ureq::Error> for SoapError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(code, _) => SoapError::Status(code),
            ureq::Error::Transport(transport) => match transport.kind() {
                ureq::ErrorKind::InvalidUrl | ureq::ErrorKind::UnknownScheme => {
                    SoapError::InvalidUrl(transport.to_string())
                }
                ureq::ErrorKind::Io if transport.to_string().contains("timed out") => {
                    SoapError::Timeout
                }
                _ => SoapError::Network(transport.to_string()),
            },
        }
    }
}
