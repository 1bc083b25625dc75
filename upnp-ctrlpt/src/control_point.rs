//! Lifecycle of a control point on top of one SDK instance

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use upnp_discovery::{DescriptionFetcher, DescriptionSource};
use upnp_sdk::{Handle, Sdk, SdkConfig, SdkState, TimerId, UpnpError};

use crate::config::ControlPointConfig;
use crate::error::Result;
use crate::handler::EventHandler;
use crate::ops::{ControlPointOps, SdkOps};
use crate::registry::DeviceRegistry;
use crate::state_update::StateUpdate;

/// A running control point: an initialized SDK, a registered client and a
/// registry kept fresh by a periodic timeout check
///
/// Dropping a running control point stops it.
pub struct ControlPoint {
    pub(crate) sdk: Arc<Sdk>,
    pub(crate) ops: Arc<dyn ControlPointOps>,
    pub(crate) registry: Arc<DeviceRegistry>,
    pub(crate) handler: Arc<EventHandler>,
    handle: Handle,
    timer: Mutex<Option<TimerId>>,
    running: AtomicBool,
}

impl std::fmt::Debug for ControlPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlPoint")
            .field("handle", &self.handle)
            .field("devices", &self.registry.len())
            .field("running", &self.running.load(Ordering::SeqCst))
            .finish()
    }
}

impl ControlPoint {
    /// Initialize a new SDK and start tracking devices
    ///
    /// `state_update` runs on SDK worker threads.
    pub fn start<F>(sdk_config: SdkConfig, config: ControlPointConfig, state_update: F) -> Result<Self>
    where
        F: Fn(StateUpdate) + Send + Sync + 'static,
    {
        let descriptions = Arc::new(DescriptionFetcher::new(sdk_config.http_timeout)?);
        let sdk = Arc::new(Sdk::new(sdk_config)?);
        Self::start_with(sdk, config, descriptions, state_update)
    }

    /// Start on an existing, uninitialized SDK
    pub fn start_with<F>(
        sdk: Arc<Sdk>,
        config: ControlPointConfig,
        descriptions: Arc<dyn DescriptionSource>,
        state_update: F,
    ) -> Result<Self>
    where
        F: Fn(StateUpdate) + Send + Sync + 'static,
    {
        config.validate()?;
        sdk.init(config.host_ip, config.port)?;

        let result = Self::bring_up(sdk.clone(), Arc::new(config), descriptions, Arc::new(state_update));
        if result.is_err() && sdk.state() == SdkState::Running {
            let _ = sdk.finish();
        }
        result
    }

    fn bring_up(
        sdk: Arc<Sdk>,
        config: Arc<ControlPointConfig>,
        descriptions: Arc<dyn DescriptionSource>,
        state_update: Arc<dyn Fn(StateUpdate) + Send + Sync>,
    ) -> Result<Self> {
        let sdk_ops = Arc::new(SdkOps::new(&sdk));
        let ops: Arc<dyn ControlPointOps> = sdk_ops.clone();
        let registry = Arc::new(DeviceRegistry::new(config.clone(), ops.clone(), state_update));
        let handler = Arc::new(EventHandler::new(registry.clone(), ops.clone(), descriptions));

        let callback = handler.clone();
        let handle = sdk.register_client(move |event| callback.handle(event))?;
        sdk_ops.attach(handle);

        // From here on, dropping the control point unwinds everything
        let control_point = Self {
            sdk,
            ops,
            registry,
            handler,
            handle,
            timer: Mutex::new(None),
            running: AtomicBool::new(true),
        };

        control_point.registry.refresh()?;

        let registry = control_point.registry.clone();
        let increment = config.timer_increment.as_secs() as i64;
        let id = control_point
            .sdk
            .schedule_periodic(config.timer_increment, move || {
                registry.verify_timeouts(increment);
            })?;
        *control_point.timer.lock() = Some(id);

        info!(
            handle = %handle,
            device_type = %config.device_type,
            "Control point started"
        );
        Ok(control_point)
    }

    /// Cancel the timeout check, drop every device, and shut the SDK down
    pub fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(UpnpError::NotInitialized.into());
        }
        if let Some(id) = self.timer.lock().take() {
            if let Err(e) = self.sdk.cancel_timer(id) {
                debug!(error = %e, "Failed to cancel timeout check");
            }
        }
        let removed = self.registry.remove_all();
        if let Err(e) = self.sdk.unregister_client(self.handle) {
            warn!(error = %e, "Failed to unregister client");
        }
        self.sdk.finish()?;
        info!(removed, "Control point stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Forget every device and search again
    pub fn refresh(&self) -> Result<()> {
        self.registry.refresh()
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn sdk(&self) -> &Sdk {
        &self.sdk
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn print_list(&self) -> String {
        self.registry.print_list()
    }

    pub fn print_device(&self, devnum: usize) -> Result<String> {
        self.registry.print_device(devnum)
    }
}

impl Drop for ControlPoint {
    fn drop(&mut self) {
        if self.is_running() {
            if let Err(e) = self.stop() {
                warn!(error = %e, "Control point did not stop cleanly");
            }
        }
    }
}
