//! Scripted transports and SDK fixtures for integration tests

#![allow(dead_code)]

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver};
use parking_lot::Mutex;
use upnp_sdk::{
    ActionRequest, ControlTransport, Event, EventKind, EventingTransport, Handle, Sdk, SdkConfig,
    SoapError, Timeout, Transports,
};

pub const EVENT_URL: &str = "http://127.0.0.1:9/upnp/event/tvcontrol1";

/// Records every exchange and answers from a script
pub struct MockTransport {
    grant: Mutex<Timeout>,
    fail_renew: AtomicBool,
    next_sid: AtomicUsize,
    pub subscribes: Mutex<Vec<(String, String, Timeout)>>,
    pub renewals: AtomicUsize,
    pub unsubscribes: Mutex<Vec<String>>,
    pub actions: Mutex<Vec<(String, String)>>,
}

impl MockTransport {
    pub fn granting(grant: Timeout) -> Arc<Self> {
        Arc::new(Self {
            grant: Mutex::new(grant),
            fail_renew: AtomicBool::new(false),
            next_sid: AtomicUsize::new(0),
            subscribes: Mutex::new(Vec::new()),
            renewals: AtomicUsize::new(0),
            unsubscribes: Mutex::new(Vec::new()),
            actions: Mutex::new(Vec::new()),
        })
    }

    pub fn fail_renewals(&self) {
        self.fail_renew.store(true, Ordering::SeqCst);
    }

    pub fn transports(self: &Arc<Self>) -> Transports {
        Transports {
            eventing: self.clone(),
            control: self.clone(),
        }
    }
}

impl EventingTransport for MockTransport {
    fn subscribe(
        &self,
        event_url: &str,
        callback_url: &str,
        timeout: Timeout,
    ) -> Result<(String, Timeout), SoapError> {
        self.subscribes
            .lock()
            .push((event_url.to_string(), callback_url.to_string(), timeout));
        let n = self.next_sid.fetch_add(1, Ordering::SeqCst) + 1;
        Ok((format!("uuid:sub-{}", n), *self.grant.lock()))
    }

    fn renew(&self, _event_url: &str, _sid: &str, timeout: Timeout) -> Result<Timeout, SoapError> {
        self.renewals.fetch_add(1, Ordering::SeqCst);
        if self.fail_renew.load(Ordering::SeqCst) {
            Err(SoapError::Status(412))
        } else {
            Ok(timeout)
        }
    }

    fn unsubscribe(&self, _event_url: &str, sid: &str) -> Result<(), SoapError> {
        self.unsubscribes.lock().push(sid.to_string());
        Ok(())
    }
}

impl ControlTransport for MockTransport {
    fn send_action(
        &self,
        control_url: &str,
        _service_type: &str,
        request: &ActionRequest,
    ) -> Result<String, SoapError> {
        self.actions
            .lock()
            .push((control_url.to_string(), request.name.clone()));
        if control_url.contains("broken") {
            Err(SoapError::Fault(401))
        } else {
            Ok(format!("<u:{}Response/>", request.name))
        }
    }

    fn query_state_variable(&self, _control_url: &str, var_name: &str) -> Result<String, SoapError> {
        match var_name {
            "Power" => Ok("1".to_string()),
            _ => Err(SoapError::Fault(404)),
        }
    }
}

/// An SDK running on loopback with scripted transports
pub fn start(config: SdkConfig, mock: &Arc<MockTransport>) -> Sdk {
    let sdk = Sdk::with_transports(config, mock.transports()).unwrap();
    sdk.init(Some(Ipv4Addr::LOCALHOST), 0).unwrap();
    sdk
}

/// Register a client whose events land in the returned channel
pub fn client(sdk: &Sdk) -> (Handle, Receiver<Event>) {
    let (tx, rx) = channel::unbounded();
    let handle = sdk
        .register_client(move |event| {
            let _ = tx.send(event);
        })
        .unwrap();
    (handle, rx)
}

/// Wait for the next event of `kind`, skipping others
pub fn next_event(rx: &Receiver<Event>, kind: EventKind) -> Event {
    loop {
        let event = rx
            .recv_timeout(Duration::from_secs(5))
            .unwrap_or_else(|_| panic!("no {:?} event within 5s", kind));
        if event.kind() == kind {
            return event;
        }
    }
}

/// Channel-backed completion for async calls
pub fn completion() -> (impl FnOnce(Event) + Send + 'static, Receiver<Event>) {
    let (tx, rx) = channel::unbounded();
    (
        move |event| {
            let _ = tx.send(event);
        },
        rx,
    )
}
