//! SOAP control dispatch
//!
//! Actions and state-variable queries run on the send pool. Once a job is
//! queued its completion is called exactly once, with the transport error in
//! the event when the exchange fails.

use std::sync::Arc;

use crate::error::{Result, UpnpError};
use crate::event::{ActionComplete, Completion, Event, StateVarComplete};
use crate::handle::Handle;
use crate::sdk::SdkInner;
use crate::transport::ActionRequest;

impl SdkInner {
    pub(crate) fn send_action_async(
        self: &Arc<Self>,
        handle: Handle,
        control_url: &str,
        service_type: &str,
        device_udn: Option<&str>,
        request: ActionRequest,
        completion: Completion,
    ) -> Result<()> {
        let runtime = self.running()?;
        self.check_client(handle)?;
        if device_udn.is_some() {
            return Err(UpnpError::invalid_param(
                "device UDN is not supported, address services by URL",
            ));
        }
        if control_url.is_empty() || service_type.is_empty() || request.name.is_empty() {
            return Err(UpnpError::invalid_param(
                "control url, service type and action name are required",
            ));
        }

        let weak = Arc::downgrade(self);
        let control_url = control_url.to_string();
        let service_type = service_type.to_string();
        self.submit_send(&runtime, move || {
            let result = match weak.upgrade() {
                Some(inner) => inner
                    .transports
                    .control
                    .send_action(&control_url, &service_type, &request)
                    .map_err(UpnpError::from),
                None => Err(UpnpError::NotInitialized),
            };
            if let Err(e) = &result {
                tracing::debug!(url = %control_url, action = %request.name, "Action failed: {}", e);
            }
            completion(Event::ActionComplete(ActionComplete {
                result,
                control_url,
                action_name: request.name,
            }));
        })
    }

    pub(crate) fn get_var_status_async(
        self: &Arc<Self>,
        handle: Handle,
        control_url: &str,
        var_name: &str,
        completion: Completion,
    ) -> Result<()> {
        let runtime = self.running()?;
        self.check_client(handle)?;
        if control_url.is_empty() || var_name.is_empty() {
            return Err(UpnpError::invalid_param(
                "control url and variable name are required",
            ));
        }

        let weak = Arc::downgrade(self);
        let control_url = control_url.to_string();
        let var_name = var_name.to_string();
        self.submit_send(&runtime, move || {
            let result = match weak.upgrade() {
                Some(inner) => inner
                    .transports
                    .control
                    .query_state_variable(&control_url, &var_name)
                    .map_err(UpnpError::from),
                None => Err(UpnpError::NotInitialized),
            };
            completion(Event::GetVarComplete(StateVarComplete {
                result,
                control_url,
                var_name,
            }));
        })
    }
}
