//! The network operations the registry issues, and their SDK implementation

use std::sync::{Arc, OnceLock, Weak};

use upnp_sdk::{ActionRequest, Completion, Handle, Sdk, Timeout, UpnpError};

/// Blocking or fire-and-forget calls made on behalf of the registry
///
/// The registry never holds its lock while one of these runs.
pub trait ControlPointOps: Send + Sync {
    /// Subscribe to `event_url`, returning the SID and granted timeout
    fn subscribe(&self, event_url: &str, timeout: Timeout) -> upnp_sdk::Result<(String, Timeout)>;

    fn unsubscribe(&self, sid: &str) -> upnp_sdk::Result<()>;

    /// Start a search whose results arrive as discovery events
    fn search(&self, mx: u32, target: &str) -> upnp_sdk::Result<()>;

    fn send_action(
        &self,
        control_url: &str,
        service_type: &str,
        request: ActionRequest,
        completion: Completion,
    ) -> upnp_sdk::Result<()>;

    fn get_var(&self, control_url: &str, var_name: &str, completion: Completion) -> upnp_sdk::Result<()>;
}

/// [`ControlPointOps`] backed by a client session of an [`Sdk`]
///
/// Holds the SDK weakly: the SDK owns the client callback, which owns the
/// registry, which owns this.
pub struct SdkOps {
    sdk: Weak<Sdk>,
    handle: OnceLock<Handle>,
}

impl SdkOps {
    pub fn new(sdk: &Arc<Sdk>) -> Self {
        Self {
            sdk: Arc::downgrade(sdk),
            handle: OnceLock::new(),
        }
    }

    /// Bind to the client handle once it is registered
    pub fn attach(&self, handle: Handle) {
        let _ = self.handle.set(handle);
    }

    fn session(&self) -> upnp_sdk::Result<(Arc<Sdk>, Handle)> {
        let sdk = self.sdk.upgrade().ok_or(UpnpError::NotInitialized)?;
        let handle = *self.handle.get().ok_or(UpnpError::InvalidHandle)?;
        Ok((sdk, handle))
    }
}

impl ControlPointOps for SdkOps {
    fn subscribe(&self, event_url: &str, timeout: Timeout) -> upnp_sdk::Result<(String, Timeout)> {
        let (sdk, handle) = self.session()?;
        sdk.subscribe(handle, event_url, timeout)
    }

    fn unsubscribe(&self, sid: &str) -> upnp_sdk::Result<()> {
        let (sdk, handle) = self.session()?;
        sdk.unsubscribe(handle, sid)
    }

    fn search(&self, mx: u32, target: &str) -> upnp_sdk::Result<()> {
        let (sdk, handle) = self.session()?;
        sdk.search_async(handle, mx, target).map(|_| ())
    }

    fn send_action(
        &self,
        control_url: &str,
        service_type: &str,
        request: ActionRequest,
        completion: Completion,
    ) -> upnp_sdk::Result<()> {
        let (sdk, handle) = self.session()?;
        sdk.send_action_async(handle, control_url, service_type, None, request, completion)
    }

    fn get_var(&self, control_url: &str, var_name: &str, completion: Completion) -> upnp_sdk::Result<()> {
        let (sdk, handle) = self.session()?;
        sdk.get_var_status_async(handle, control_url, var_name, completion)
    }
}
