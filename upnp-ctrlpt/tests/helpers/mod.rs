//! Scripted network seams and fixtures for control-point tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver};
use parking_lot::Mutex;
use upnp_ctrlpt::{
    ControlPointConfig, ControlPointOps, DeviceRegistry, DiscoveredDevice, StateUpdate,
    StateUpdateCallback,
};
use upnp_discovery::{Description, DescriptionSource, DeviceDescription, DiscoveryError, ServiceDescription};
use upnp_sdk::{
    ActionComplete, ActionRequest, Completion, ControlTransport, Event, EventingTransport,
    SoapError, StateVarComplete, Timeout, Transports, UpnpError,
};

pub const DEVICE_TYPE: &str = "urn:upnp:device:ohm:1";
pub const SERVICE_TYPE: &str = "urn:upnp:service:tvcontrol:1";
pub const HOST: &str = "http://127.0.0.1:9";

pub fn event_url(udn: &str) -> String {
    format!("{}/{}/event", HOST, udn.trim_start_matches("uuid:"))
}

pub fn control_url(udn: &str) -> String {
    format!("{}/{}/control", HOST, udn.trim_start_matches("uuid:"))
}

fn control_service(udn: &str) -> ServiceDescription {
    ServiceDescription {
        service_type: SERVICE_TYPE.to_string(),
        service_id: "urn:upnp:serviceId:tvcontrol1".to_string(),
        control_url: control_url(udn),
        event_url: event_url(udn),
    }
}

/// A device of the tracked type offering the control service
pub fn discovered(udn: &str) -> DiscoveredDevice {
    DiscoveredDevice {
        udn: udn.to_string(),
        device_type: DEVICE_TYPE.to_string(),
        friendly_name: format!("TV {}", udn),
        location: format!("{}/{}/desc.xml", HOST, udn.trim_start_matches("uuid:")),
        base_url: format!("{}/", HOST),
        services: vec![control_service(udn)],
    }
}

pub fn description(udn: &str) -> Description {
    Description {
        location: format!("{}/{}/desc.xml", HOST, udn.trim_start_matches("uuid:")),
        base_url: format!("{}/", HOST),
        device: DeviceDescription {
            device_type: DEVICE_TYPE.to_string(),
            udn: udn.to_string(),
            friendly_name: format!("TV {}", udn),
            manufacturer: Some("Acme".to_string()),
            model_name: None,
            services: vec![control_service(udn)],
            embedded: Vec::new(),
        },
    }
}

/// Records every call and answers from a script
#[derive(Default)]
pub struct MockOps {
    next_sid: AtomicUsize,
    slow: Mutex<Option<(String, Duration)>>,
    pub subscribes: Mutex<Vec<String>>,
    pub unsubscribes: Mutex<Vec<String>>,
    pub searches: Mutex<Vec<(u32, String)>>,
    pub actions: Mutex<Vec<(String, ActionRequest)>>,
    pub var_queries: Mutex<Vec<(String, String)>>,
}

impl MockOps {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Subscribing to URLs containing `pattern` blocks for `delay`
    pub fn slow_down(&self, pattern: &str, delay: Duration) {
        *self.slow.lock() = Some((pattern.to_string(), delay));
    }
}

impl ControlPointOps for MockOps {
    fn subscribe(&self, event_url: &str, timeout: Timeout) -> upnp_sdk::Result<(String, Timeout)> {
        self.subscribes.lock().push(event_url.to_string());
        let delay = self
            .slow
            .lock()
            .as_ref()
            .filter(|(pattern, _)| event_url.contains(pattern.as_str()))
            .map(|(_, delay)| *delay);
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if event_url.contains("broken") {
            return Err(UpnpError::ProtocolError {
                code: 412,
                message: "Precondition Failed".to_string(),
            });
        }
        let n = self.next_sid.fetch_add(1, Ordering::SeqCst) + 1;
        Ok((format!("uuid:sub-{}", n), timeout))
    }

    fn unsubscribe(&self, sid: &str) -> upnp_sdk::Result<()> {
        self.unsubscribes.lock().push(sid.to_string());
        Ok(())
    }

    fn search(&self, mx: u32, target: &str) -> upnp_sdk::Result<()> {
        self.searches.lock().push((mx, target.to_string()));
        Ok(())
    }

    fn send_action(
        &self,
        control_url: &str,
        _service_type: &str,
        request: ActionRequest,
        completion: Completion,
    ) -> upnp_sdk::Result<()> {
        let action_name = request.name.clone();
        self.actions.lock().push((control_url.to_string(), request));
        completion(Event::ActionComplete(ActionComplete {
            result: Ok(format!("<u:{}Response/>", action_name)),
            control_url: control_url.to_string(),
            action_name,
        }));
        Ok(())
    }

    fn get_var(&self, control_url: &str, var_name: &str, completion: Completion) -> upnp_sdk::Result<()> {
        self.var_queries
            .lock()
            .push((control_url.to_string(), var_name.to_string()));
        completion(Event::GetVarComplete(StateVarComplete {
            result: Ok("1".to_string()),
            control_url: control_url.to_string(),
            var_name: var_name.to_string(),
        }));
        Ok(())
    }
}

/// Scripted GENA and SOAP transports for a real SDK
#[derive(Default)]
pub struct MockTransport {
    next_sid: AtomicUsize,
    pub subscribes: Mutex<Vec<String>>,
    pub unsubscribes: Mutex<Vec<String>>,
    pub actions: Mutex<Vec<(String, String, String)>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
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
        _callback_url: &str,
        timeout: Timeout,
    ) -> Result<(String, Timeout), SoapError> {
        self.subscribes.lock().push(event_url.to_string());
        let n = self.next_sid.fetch_add(1, Ordering::SeqCst) + 1;
        Ok((format!("uuid:sub-{}", n), timeout))
    }

    fn renew(&self, _event_url: &str, _sid: &str, timeout: Timeout) -> Result<Timeout, SoapError> {
        Ok(timeout)
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
        self.actions.lock().push((
            control_url.to_string(),
            request.name.clone(),
            request.body.clone(),
        ));
        Ok(format!("<u:{}Response/>", request.name))
    }

    fn query_state_variable(&self, _control_url: &str, var_name: &str) -> Result<String, SoapError> {
        match var_name {
            "Power" => Ok("1".to_string()),
            _ => Err(SoapError::Fault(404)),
        }
    }
}

/// Descriptions served by location
#[derive(Default)]
pub struct MockDescriptions {
    documents: Mutex<HashMap<String, Description>>,
    pub fetches: AtomicUsize,
}

impl MockDescriptions {
    pub fn serving(descriptions: &[Description]) -> Arc<Self> {
        let source = Self::default();
        for description in descriptions {
            source
                .documents
                .lock()
                .insert(description.location.clone(), description.clone());
        }
        Arc::new(source)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl DescriptionSource for MockDescriptions {
    fn fetch(&self, location: &str) -> upnp_discovery::Result<Description> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.documents
            .lock()
            .get(location)
            .cloned()
            .ok_or(DiscoveryError::HttpStatus(404))
    }
}

/// State updates collected in order
#[derive(Clone, Default)]
pub struct Updates(Arc<Mutex<Vec<StateUpdate>>>);

impl Updates {
    pub fn callback(&self) -> StateUpdateCallback {
        let updates = self.0.clone();
        Arc::new(move |update| updates.lock().push(update))
    }

    pub fn take(&self) -> Vec<StateUpdate> {
        std::mem::take(&mut *self.0.lock())
    }
}

pub fn registry_with(config: ControlPointConfig, ops: &Arc<MockOps>) -> (Arc<DeviceRegistry>, Updates) {
    let updates = Updates::default();
    let registry = DeviceRegistry::new(Arc::new(config), ops.clone(), updates.callback());
    (Arc::new(registry), updates)
}

pub fn registry(ops: &Arc<MockOps>) -> (Arc<DeviceRegistry>, Updates) {
    registry_with(ControlPointConfig::default(), ops)
}

/// Channel-backed state-update callback
pub fn update_channel() -> (impl Fn(StateUpdate) + Send + Sync + 'static, Receiver<StateUpdate>) {
    let (tx, rx) = channel::unbounded();
    (
        move |update| {
            let _ = tx.send(update);
        },
        rx,
    )
}

/// Wait for the first update `accept` returns true for
pub fn wait_for(rx: &Receiver<StateUpdate>, accept: impl Fn(&StateUpdate) -> bool) -> StateUpdate {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        let update = rx
            .recv_timeout(left)
            .unwrap_or_else(|_| panic!("no matching state update within 5s"));
        if accept(&update) {
            return update;
        }
    }
}

/// Poll `condition` for up to five seconds
pub fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    condition()
}
