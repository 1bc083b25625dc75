//! Exercises the client against mock HTTP peers

use mockito::{Matcher, Server};
use soap_client::{SoapClient, SoapError, SubscriptionTimeout};

const SERVICE: &str = "urn:upnp:service:tvcontrol:1";

#[test]
fn test_send_action_posts_body_with_soapaction() {
    let mut server = Server::new();
    let mock = server
        .mock("POST", "/upnp/control/tvcontrol1")
        .match_header("SOAPACTION", "\"urn:upnp:service:tvcontrol:1#PowerOn\"")
        .match_body("<payload/>")
        .with_status(200)
        .with_body("done")
        .create();

    let client = SoapClient::new();
    let url = format!("{}/upnp/control/tvcontrol1", server.url());
    let body = client.send_action(&url, SERVICE, "PowerOn", "<payload/>").unwrap();

    assert_eq!(body, "done");
    mock.assert();
}

#[test]
fn test_send_action_falls_back_to_mpost_on_405() {
    let mut server = Server::new();
    let post = server
        .mock("POST", "/control")
        .with_status(405)
        .create();
    let mpost = server
        .mock("M-POST", "/control")
        .match_header("MAN", Matcher::Regex("ns=01".to_string()))
        .match_header("01-SOAPACTION", "\"urn:upnp:service:tvcontrol:1#PowerOff\"")
        .with_status(200)
        .with_body("retried")
        .create();

    let client = SoapClient::new();
    let url = format!("{}/control", server.url());
    let body = client.send_action(&url, SERVICE, "PowerOff", "{}").unwrap();

    assert_eq!(body, "retried");
    post.assert();
    mpost.assert();
}

#[test]
fn test_call_maps_soap_fault_in_error_reply() {
    let mut server = Server::new();
    let fault = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
        <s:Body><s:Fault><detail><UPnPError><errorCode>402</errorCode></UPnPError></detail></s:Fault></s:Body>
    </s:Envelope>"#;
    server
        .mock("POST", "/control")
        .with_status(500)
        .with_body(fault)
        .create();

    let client = SoapClient::new();
    let url = format!("{}/control", server.url());
    let err = client.call(&url, SERVICE, "SetChannel", "").unwrap_err();

    assert_eq!(err, SoapError::Fault(402));
}

#[test]
fn test_query_state_variable_returns_value() {
    let mut server = Server::new();
    let reply = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
        <s:Body>
            <u:QueryStateVariableResponse xmlns:u="urn:schemas-upnp-org:control-1-0">
                <return>7</return>
            </u:QueryStateVariableResponse>
        </s:Body>
    </s:Envelope>"#;
    server
        .mock("POST", "/control")
        .match_header(
            "SOAPACTION",
            "\"urn:schemas-upnp-org:control-1-0#QueryStateVariable\"",
        )
        .match_body(Matcher::Regex("<u:varName>Channel</u:varName>".to_string()))
        .with_status(200)
        .with_body(reply)
        .create();

    let client = SoapClient::new();
    let url = format!("{}/control", server.url());
    assert_eq!(client.query_state_variable(&url, "Channel").unwrap(), "7");
}

#[test]
fn test_subscribe_reads_sid_and_granted_timeout() {
    let mut server = Server::new();
    let mock = server
        .mock("SUBSCRIBE", "/event")
        .match_header("NT", "upnp:event")
        .match_header("CALLBACK", "<http://10.0.0.2:49152/>")
        .match_header("TIMEOUT", "Second-1801")
        .with_status(200)
        .with_header("SID", "uuid:sub-1")
        .with_header("TIMEOUT", "Second-300")
        .create();

    let client = SoapClient::new();
    let url = format!("{}/event", server.url());
    let response = client
        .subscribe(&url, "http://10.0.0.2:49152/", SubscriptionTimeout::Seconds(1801))
        .unwrap();

    assert_eq!(response.sid, "uuid:sub-1");
    assert_eq!(response.timeout, SubscriptionTimeout::Seconds(300));
    mock.assert();
}

#[test]
fn test_subscribe_without_sid_is_parse_error() {
    let mut server = Server::new();
    server.mock("SUBSCRIBE", "/event").with_status(200).create();

    let client = SoapClient::new();
    let url = format!("{}/event", server.url());
    let err = client
        .subscribe(&url, "http://10.0.0.2:49152/", SubscriptionTimeout::Infinite)
        .unwrap_err();

    assert!(matches!(err, SoapError::Parse(_)));
}

#[test]
fn test_renew_keeps_requested_timeout_without_header() {
    let mut server = Server::new();
    server
        .mock("SUBSCRIBE", "/event")
        .match_header("SID", "uuid:sub-1")
        .with_status(200)
        .create();

    let client = SoapClient::new();
    let url = format!("{}/event", server.url());
    let granted = client
        .renew_subscription(&url, "uuid:sub-1", SubscriptionTimeout::Seconds(60))
        .unwrap();

    assert_eq!(granted, SubscriptionTimeout::Seconds(60));
}

#[test]
fn test_unsubscribe_rejected_sid_reports_status() {
    let mut server = Server::new();
    server
        .mock("UNSUBSCRIBE", "/event")
        .match_header("SID", "uuid:gone")
        .with_status(412)
        .create();

    let client = SoapClient::new();
    let url = format!("{}/event", server.url());
    assert_eq!(
        client.unsubscribe(&url, "uuid:gone").unwrap_err(),
        SoapError::Status(412)
    );
}
