//! Routes SDK events into the device registry

use std::sync::Arc;

use tracing::{debug, info, warn};
use upnp_discovery::DescriptionSource;
use upnp_sdk::{Discovery, Event, SubscriptionEvent};

use crate::ops::ControlPointOps;
use crate::registry::{DeviceRegistry, DiscoveredDevice};

/// The client callback of a control point
pub struct EventHandler {
    registry: Arc<DeviceRegistry>,
    ops: Arc<dyn ControlPointOps>,
    descriptions: Arc<dyn DescriptionSource>,
}

impl EventHandler {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        ops: Arc<dyn ControlPointOps>,
        descriptions: Arc<dyn DescriptionSource>,
    ) -> Self {
        Self {
            registry,
            ops,
            descriptions,
        }
    }

    pub fn handle(&self, event: Event) {
        match event {
            Event::DiscoveryFound(found) => self.on_discovery(found),
            Event::DiscoveryByeBye(gone) => {
                if self.registry.remove(&gone.device_id) {
                    debug!(udn = %gone.device_id, "Removed after bye-bye");
                }
            }
            Event::DiscoveryTimeout(timeout) => {
                debug!(search = %timeout.search_id, target = %timeout.target, "Search finished");
            }
            Event::EventReceived(notification) => {
                self.registry
                    .handle_event(&notification.sid, &notification.changed_variables);
            }
            Event::SubscribeComplete(update) | Event::RenewComplete(update) => match update.result {
                Ok(()) => {
                    self.registry
                        .handle_subscribe_update(&update.publisher_url, &update.sid);
                }
                Err(e) => warn!(sid = %update.sid, error = %e, "Subscription request failed"),
            },
            Event::UnsubscribeComplete(update) => match update.result {
                Ok(()) => {
                    self.registry.handle_unsubscribe(&update.sid);
                }
                Err(e) => warn!(sid = %update.sid, error = %e, "Unsubscribe failed"),
            },
            Event::GetVarComplete(complete) => match complete.result {
                Ok(value) => {
                    self.registry
                        .handle_get_var(&complete.control_url, &complete.var_name, &value);
                }
                Err(e) => warn!(var = %complete.var_name, error = %e, "Variable query failed"),
            },
            Event::AutoRenewalFailed(lapsed) | Event::SubscriptionExpired(lapsed) => {
                self.resubscribe(lapsed)
            }
            Event::ActionComplete(complete) => match complete.result {
                Ok(body) => info!(action = %complete.action_name, response = %body, "Action complete"),
                Err(e) => warn!(action = %complete.action_name, error = %e, "Action failed"),
            },
        }
    }

    fn on_discovery(&self, found: Discovery) {
        // Repeat advertisements only extend the timeout
        if self.registry.refresh_timeout(&found.device_id, found.expires) {
            return;
        }
        let Some(location) = found.location.as_deref() else {
            debug!(udn = %found.device_id, "Discovery without a location");
            return;
        };
        match self.descriptions.fetch(location) {
            Ok(description) => {
                let device =
                    DiscoveredDevice::from_description(&description, &self.registry.config().device_type);
                self.registry.add_or_refresh(device, found.expires);
            }
            Err(e) => warn!(location, error = %e, "Failed to download description"),
        }
    }

    fn resubscribe(&self, lapsed: SubscriptionEvent) {
        let timeout = self.registry.config().default_timeout;
        match self.ops.subscribe(&lapsed.publisher_url, timeout) {
            Ok((sid, granted)) => {
                info!(old = %lapsed.sid, new = %sid, granted = %granted, "Resubscribed");
                self.registry
                    .handle_subscribe_update(&lapsed.publisher_url, &sid);
            }
            Err(e) => warn!(url = %lapsed.publisher_url, error = %e, "Resubscribe failed"),
        }
    }
}
