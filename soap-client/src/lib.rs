//! Private SOAP client for UPnP control points
//!
//! This crate provides the blocking HTTP collaborators a control point needs:
//! SOAP action invocation (with the `M-POST` fallback some devices demand),
//! state-variable queries, and GENA event subscriptions using the
//! SUBSCRIBE/UNSUBSCRIBE methods. Every call takes the full URL advertised in
//! the device description.

mod error;

pub use error::SoapError;

use std::fmt;
use std::time::Duration;
use xmltree::Element;

/// Namespace of the SOAP envelope
pub const SOAP_ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";

/// Service type used by the `QueryStateVariable` control action
pub const CONTROL_NS: &str = "urn:schemas-upnp-org:control-1-0";

const CONTENT_TYPE: &str = "text/xml; charset=\"utf-8\"";

/// Subscription duration as carried in the GENA `TIMEOUT` header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionTimeout {
    /// `Second-<n>`
    Seconds(u32),
    /// `Second-infinite`
    Infinite,
}

impl SubscriptionTimeout {
    /// Parse a `TIMEOUT` header value such as `Second-1800` or `Second-infinite`
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let rest = value
            .get(..7)
            .filter(|prefix| prefix.eq_ignore_ascii_case("Second-"))
            .map(|_| &value[7..])?;
        if rest.eq_ignore_ascii_case("infinite") {
            Some(SubscriptionTimeout::Infinite)
        } else {
            rest.parse::<u32>().ok().map(SubscriptionTimeout::Seconds)
        }
    }

    /// Number of seconds, or `None` for an infinite subscription
    pub fn as_secs(&self) -> Option<u32> {
        match self {
            SubscriptionTimeout::Seconds(secs) => Some(*secs),
            SubscriptionTimeout::Infinite => None,
        }
    }
}

impl fmt::Display for SubscriptionTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionTimeout::Seconds(secs) => write!(f, "Second-{}", secs),
            SubscriptionTimeout::Infinite => write!(f, "Second-infinite"),
        }
    }
}

/// Response from a UPnP subscription request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionResponse {
    /// Subscription ID returned by the device
    pub sid: String,
    /// Actual timeout granted by the device
    pub timeout: SubscriptionTimeout,
}

/// Build a SOAP envelope around an action element
pub fn envelope(service_type: &str, action: &str, payload: &str) -> String {
    format!(
        r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="{ns}" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">
  <s:Body>
    <u:{action} xmlns:u="{service_type}">{payload}</u:{action}>
  </s:Body>
</s:Envelope>"#,
        ns = SOAP_ENVELOPE_NS,
        action = action,
        service_type = service_type,
        payload = payload
    )
}

/// Render `(name, value)` pairs as action argument elements
pub fn arguments(args: &[(String, String)]) -> String {
    args.iter()
        .map(|(name, value)| format!("<{name}>{}</{name}>", escape(value), name = name))
        .collect()
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// A minimal SOAP client for UPnP device communication
#[derive(Debug, Clone)]
pub struct SoapClient {
    agent: ureq::Agent,
}

impl SoapClient {
    /// Create a new SOAP client with default configuration
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    /// Create a client whose reads give up after `read_timeout`
    pub fn with_timeout(read_timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout_connect(Duration::from_secs(5))
                .timeout_read(read_timeout)
                .build(),
        }
    }

    /// Send a raw action body to a control URL and return the response body
    ///
    /// The request is a `POST` carrying `SOAPACTION: "<service_type>#<action>"`.
    /// A device that answers `405 Method Not Allowed` is retried once with
    /// `M-POST` and the extension-framework `MAN` header.
    pub fn send_action(
        &self,
        control_url: &str,
        service_type: &str,
        action: &str,
        body: &str,
    ) -> Result<String, SoapError> {
        let soap_action = format!("\"{}#{}\"", service_type, action);

        let response = match self.post(control_url, &soap_action, body) {
            Err(ureq::Error::Status(405, _)) => {
                tracing::debug!(url = control_url, "POST not allowed, retrying as M-POST");
                self.agent
                    .request("M-POST", control_url)
                    .set("Content-Type", CONTENT_TYPE)
                    .set("MAN", &format!("\"{}\"; ns=01", SOAP_ENVELOPE_NS))
                    .set("01-SOAPACTION", &soap_action)
                    .send_string(body)
            }
            other => other,
        };

        match response {
            Ok(response) => response
                .into_string()
                .map_err(|e| SoapError::Network(e.to_string())),
            Err(ureq::Error::Status(code, response)) => {
                let text = response.into_string().unwrap_or_default();
                Err(fault_or_status(code, &text))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Send a SOAP action and return the parsed `<action>Response` element
    pub fn call(
        &self,
        control_url: &str,
        service_type: &str,
        action: &str,
        payload: &str,
    ) -> Result<Element, SoapError> {
        let body = envelope(service_type, action, payload);
        let xml_text = self.send_action(control_url, service_type, action, &body)?;

        let xml = Element::parse(xml_text.as_bytes())
            .map_err(|e| SoapError::Parse(e.to_string()))?;

        self.extract_response(&xml, action)
    }

    /// Query the current value of a state variable
    pub fn query_state_variable(
        &self,
        control_url: &str,
        var_name: &str,
    ) -> Result<String, SoapError> {
        let payload = format!("<u:varName>{}</u:varName>", escape(var_name));
        let response = self.call(control_url, CONTROL_NS, "QueryStateVariable", &payload)?;

        Ok(response
            .get_child("return")
            .and_then(|r| r.get_text())
            .map(|t| t.into_owned())
            .unwrap_or_default())
    }

    /// Subscribe to UPnP events published at `event_url`
    ///
    /// # Arguments
    /// * `event_url` - Absolute event subscription URL of the service
    /// * `callback_url` - URL where events should be sent
    /// * `timeout` - Requested subscription duration
    ///
    /// # Returns
    /// A `SubscriptionResponse` containing the SID and the granted timeout
    pub fn subscribe(
        &self,
        event_url: &str,
        callback_url: &str,
        timeout: SubscriptionTimeout,
    ) -> Result<SubscriptionResponse, SoapError> {
        let response = self
            .agent
            .request("SUBSCRIBE", event_url)
            .set("CALLBACK", &format!("<{}>", callback_url))
            .set("NT", "upnp:event")
            .set("TIMEOUT", &timeout.to_string())
            .call()?;

        let sid = response
            .header("SID")
            .filter(|sid| !sid.is_empty())
            .ok_or_else(|| SoapError::Parse("Missing SID header in SUBSCRIBE response".to_string()))?
            .to_string();

        // Fall back to the requested timeout when the header is absent or malformed
        let granted = response
            .header("TIMEOUT")
            .and_then(SubscriptionTimeout::parse)
            .unwrap_or(timeout);

        Ok(SubscriptionResponse {
            sid,
            timeout: granted,
        })
    }

    /// Renew an existing UPnP subscription
    ///
    /// # Returns
    /// The timeout granted by the device
    pub fn renew_subscription(
        &self,
        event_url: &str,
        sid: &str,
        timeout: SubscriptionTimeout,
    ) -> Result<SubscriptionTimeout, SoapError> {
        let response = self
            .agent
            .request("SUBSCRIBE", event_url)
            .set("SID", sid)
            .set("TIMEOUT", &timeout.to_string())
            .call()?;

        Ok(response
            .header("TIMEOUT")
            .and_then(SubscriptionTimeout::parse)
            .unwrap_or(timeout))
    }

    /// Cancel a UPnP subscription
    pub fn unsubscribe(&self, event_url: &str, sid: &str) -> Result<(), SoapError> {
        self.agent
            .request("UNSUBSCRIBE", event_url)
            .set("SID", sid)
            .call()?;

        Ok(())
    }

    fn post(
        &self,
        url: &str,
        soap_action: &str,
        body: &str,
    ) -> Result<ureq::Response, ureq::Error> {
        self.agent
            .post(url)
            .set("Content-Type", CONTENT_TYPE)
            .set("SOAPACTION", soap_action)
            .send_string(body)
    }

    fn extract_response(&self, xml: &Element, action: &str) -> Result<Element, SoapError> {
        let body = xml
            .get_child("Body")
            .ok_or_else(|| SoapError::Parse("Missing SOAP Body".to_string()))?;

        if let Some(fault) = body.get_child("Fault") {
            return Err(SoapError::Fault(fault_code(fault)));
        }

        let response_name = format!("{}Response", action);
        body.get_child(response_name.as_str())
            .cloned()
            .ok_or_else(|| SoapError::Parse(format!("Missing {} element", response_name)))
    }
}

impl Default for SoapClient {
    fn default() -> Self {
        Self::new()
    }
}

fn fault_code(fault: &Element) -> u16 {
    fault
        .get_child("detail")
        .and_then(|d| d.get_child("UPnPError").or_else(|| d.get_child("UpnPError")))
        .and_then(|e| e.get_child("errorCode"))
        .and_then(|c| c.get_text())
        .and_then(|t| t.trim().parse::<u16>().ok())
        .unwrap_or(500)
}

/// Map an error reply to a SOAP fault when its body carries one
fn fault_or_status(status: u16, body: &str) -> SoapError {
    Element::parse(body.as_bytes())
        .ok()
        .and_then(|xml| xml.get_child("Body").and_then(|b| b.get_child("Fault")).map(fault_code))
        .map(SoapError::Fault)
        .unwrap_or(SoapError::Status(status))
}
