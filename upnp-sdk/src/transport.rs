//! Outbound protocol seams
//!
//! The dispatch layer only needs three exchanges with a remote device:
//! GENA subscription management, SOAP control and state-variable queries.
//! They are expressed as traits so tests can substitute scripted peers;
//! the production implementation is [`SoapClient`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use soap_client::{SoapClient, SoapError};

use crate::Timeout;

/// GENA subscription exchanges
pub trait EventingTransport: Send + Sync {
    /// Subscribe, returning the SID and the timeout granted by the publisher
    fn subscribe(
        &self,
        event_url: &str,
        callback_url: &str,
        timeout: Timeout,
    ) -> Result<(String, Timeout), SoapError>;

    /// Renew `sid`, returning the newly granted timeout
    fn renew(&self, event_url: &str, sid: &str, timeout: Timeout) -> Result<Timeout, SoapError>;

    fn unsubscribe(&self, event_url: &str, sid: &str) -> Result<(), SoapError>;
}

/// SOAP control exchanges
pub trait ControlTransport: Send + Sync {
    /// Post an action and return the raw response body
    fn send_action(
        &self,
        control_url: &str,
        service_type: &str,
        request: &ActionRequest,
    ) -> Result<String, SoapError>;

    /// Query the current value of a state variable
    fn query_state_variable(&self, control_url: &str, var_name: &str) -> Result<String, SoapError>;
}

impl EventingTransport for SoapClient {
    fn subscribe(
        &self,
        event_url: &str,
        callback_url: &str,
        timeout: Timeout,
    ) -> Result<(String, Timeout), SoapError> {
        SoapClient::subscribe(self, event_url, callback_url, timeout)
            .map(|response| (response.sid, response.timeout))
    }

    fn renew(&self, event_url: &str, sid: &str, timeout: Timeout) -> Result<Timeout, SoapError> {
        self.renew_subscription(event_url, sid, timeout)
    }

    fn unsubscribe(&self, event_url: &str, sid: &str) -> Result<(), SoapError> {
        SoapClient::unsubscribe(self, event_url, sid)
    }
}

impl ControlTransport for SoapClient {
    fn send_action(
        &self,
        control_url: &str,
        service_type: &str,
        request: &ActionRequest,
    ) -> Result<String, SoapError> {
        SoapClient::send_action(self, control_url, service_type, &request.name, &request.body)
    }

    fn query_state_variable(&self, control_url: &str, var_name: &str) -> Result<String, SoapError> {
        SoapClient::query_state_variable(self, control_url, var_name)
    }
}

/// An action ready to be posted to a control URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRequest {
    /// Action name used in the `SOAPACTION` header
    pub name: String,
    /// Complete request body
    pub body: String,
}

impl ActionRequest {
    /// Build a SOAP envelope invoking `name` on `service_type` with `args`
    pub fn soap(service_type: &str, name: &str, args: &[(String, String)]) -> Self {
        Self {
            name: name.to_string(),
            body: soap_client::envelope(service_type, name, &soap_client::arguments(args)),
        }
    }

    /// Send `body` verbatim
    pub fn raw(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
        }
    }
}

/// The transports used by an [`Sdk`](crate::Sdk)
#[derive(Clone)]
pub struct Transports {
    pub eventing: Arc<dyn EventingTransport>,
    pub control: Arc<dyn ControlTransport>,
}

impl Transports {
    /// SOAP/GENA over HTTP with the given read timeout
    pub fn soap(http_timeout: Duration) -> Self {
        let client = Arc::new(SoapClient::with_timeout(http_timeout));
        Self {
            eventing: client.clone(),
            control: client,
        }
    }
}

impl fmt::Debug for Transports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transports").finish_non_exhaustive()
    }
}
