//! GENA subscription management
//!
//! Every subscription the client holds is recorded under its SID together
//! with the event URL and the timeout the publisher granted. A finite
//! subscription always has one pending timer: an automatic renewal shortly
//! before it lapses, or an expiry notice when auto-renewal is off.
//!
//! The async variants validate up front, then run the synchronous path on
//! the send pool and report its outcome through the completion.

use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::error::{Result, UpnpError};
use crate::event::{ClientCallback, Completion, Event, SubscriptionEvent};
use crate::handle::{ClientInfo, ClientSubscription, Handle};
use crate::sdk::{Runtime, SdkInner};
use crate::thread_pool::Priority;
use crate::timer::TimerId;
use crate::Timeout;

fn validate_event_url(event_url: &str) -> Result<()> {
    if event_url.is_empty() {
        return Err(UpnpError::invalid_param("event url is empty"));
    }
    let url = Url::parse(event_url).map_err(|e| UpnpError::InvalidUrl(format!("{}: {}", event_url, e)))?;
    if url.host_str().is_none() {
        return Err(UpnpError::InvalidUrl(format!("{}: missing host", event_url)));
    }
    Ok(())
}

fn validate_timeout(timeout: Timeout) -> Result<()> {
    if timeout == Timeout::Seconds(0) {
        return Err(UpnpError::invalid_param("subscription timeout must be greater than 0"));
    }
    Ok(())
}

/// Delay before renewing a subscription granted for `secs` seconds
pub(crate) fn renewal_delay(secs: u32, lead: Duration) -> Duration {
    let full = Duration::from_secs(u64::from(secs));
    full.saturating_sub(lead).max(full / 2)
}

impl SdkInner {
    pub(crate) fn subscribe(
        self: &Arc<Self>,
        handle: Handle,
        event_url: &str,
        timeout: Timeout,
    ) -> Result<(String, Timeout)> {
        let runtime = self.running()?;
        self.check_client(handle)?;
        validate_event_url(event_url)?;
        validate_timeout(timeout)?;

        let callback_url = runtime.callback_url()?;
        // Held until the SID is recorded so an early initial NOTIFY can wait
        let _in_flight = self.begin_subscribe();
        let (sid, granted) = self
            .transports
            .eventing
            .subscribe(event_url, &callback_url, timeout)?;

        let recorded = {
            let mut handles = self.handles.write();
            match handles.client_mut(handle) {
                Some(client) => {
                    let timer = self.schedule_subscription_timer(&runtime, &sid, granted);
                    client.subscriptions.insert(
                        sid.clone(),
                        ClientSubscription {
                            event_url: event_url.to_string(),
                            timeout: granted,
                            timer,
                        },
                    );
                    true
                }
                None => false,
            }
        };

        if !recorded {
            // The client went away while the request was in flight
            if let Err(e) = self.transports.eventing.unsubscribe(event_url, &sid) {
                tracing::debug!(%sid, "Unsubscribing orphaned subscription failed: {}", e);
            }
            return Err(UpnpError::InvalidHandle);
        }

        tracing::info!(%sid, url = %event_url, timeout = %granted, "Subscribed");
        Ok((sid, granted))
    }

    pub(crate) fn subscribe_async(
        self: &Arc<Self>,
        handle: Handle,
        event_url: &str,
        timeout: Timeout,
        completion: Completion,
    ) -> Result<()> {
        let runtime = self.running()?;
        self.check_client(handle)?;
        validate_event_url(event_url)?;
        validate_timeout(timeout)?;

        let weak = Arc::downgrade(self);
        let event_url = event_url.to_string();
        self.submit_send(&runtime, move || {
            let outcome = match weak.upgrade() {
                Some(inner) => inner.subscribe(handle, &event_url, timeout),
                None => Err(UpnpError::NotInitialized),
            };
            let event = match outcome {
                Ok((sid, granted)) => SubscriptionEvent {
                    result: Ok(()),
                    sid,
                    publisher_url: event_url,
                    timeout: granted,
                },
                Err(e) => SubscriptionEvent {
                    result: Err(e),
                    sid: String::new(),
                    publisher_url: event_url,
                    timeout,
                },
            };
            completion(Event::SubscribeComplete(event));
        })
    }

    pub(crate) fn unsubscribe(&self, handle: Handle, sid: &str) -> Result<()> {
        let runtime = self.running()?;
        let subscription = self.take_client_subscription(handle, sid)?;
        if let Some(timer) = subscription.timer {
            runtime.timer.cancel(timer);
        }

        self.transports
            .eventing
            .unsubscribe(&subscription.event_url, sid)?;
        tracing::info!(%sid, "Unsubscribed");
        Ok(())
    }

    pub(crate) fn unsubscribe_async(
        self: &Arc<Self>,
        handle: Handle,
        sid: &str,
        completion: Completion,
    ) -> Result<()> {
        let runtime = self.running()?;
        self.subscription_url(handle, sid)?;

        let weak = Arc::downgrade(self);
        let sid = sid.to_string();
        self.submit_send(&runtime, move || {
            let result = match weak.upgrade() {
                Some(inner) => inner.unsubscribe(handle, &sid),
                None => Err(UpnpError::NotInitialized),
            };
            completion(Event::UnsubscribeComplete(SubscriptionEvent {
                result,
                sid,
                publisher_url: String::new(),
                timeout: Timeout::Seconds(0),
            }));
        })
    }

    pub(crate) fn renew(self: &Arc<Self>, handle: Handle, sid: &str, timeout: Timeout) -> Result<Timeout> {
        let runtime = self.running()?;
        let event_url = self.subscription_url(handle, sid)?;
        validate_timeout(timeout)?;

        match self.transports.eventing.renew(&event_url, sid, timeout) {
            Ok(granted) => {
                let mut handles = self.handles.write();
                if let Some(subscription) = handles
                    .client_mut(handle)
                    .and_then(|client| client.subscriptions.get_mut(sid))
                {
                    if let Some(timer) = subscription.timer.take() {
                        runtime.timer.cancel(timer);
                    }
                    subscription.timeout = granted;
                    subscription.timer = self.schedule_subscription_timer(&runtime, sid, granted);
                }
                tracing::debug!(%sid, timeout = %granted, "Subscription renewed");
                Ok(granted)
            }
            Err(e) => {
                if let Ok(subscription) = self.take_client_subscription(handle, sid) {
                    if let Some(timer) = subscription.timer {
                        runtime.timer.cancel(timer);
                    }
                }
                tracing::warn!(%sid, "Renewal failed, subscription dropped: {}", e);
                Err(e.into())
            }
        }
    }

    pub(crate) fn renew_async(
        self: &Arc<Self>,
        handle: Handle,
        sid: &str,
        timeout: Timeout,
        completion: Completion,
    ) -> Result<()> {
        let runtime = self.running()?;
        let event_url = self.subscription_url(handle, sid)?;
        validate_timeout(timeout)?;

        let weak = Arc::downgrade(self);
        let sid = sid.to_string();
        self.submit_send(&runtime, move || {
            let outcome = match weak.upgrade() {
                Some(inner) => inner.renew(handle, &sid, timeout),
                None => Err(UpnpError::NotInitialized),
            };
            let (result, timeout) = match outcome {
                Ok(granted) => (Ok(()), granted),
                Err(e) => (Err(e), timeout),
            };
            completion(Event::RenewComplete(SubscriptionEvent {
                result,
                sid,
                publisher_url: event_url,
                timeout,
            }));
        })
    }

    /// Cancel the timers of a departing client and drop its subscriptions
    ///
    /// Publishers are told best-effort; failures are only logged.
    pub(crate) fn release_client(&self, runtime: &Runtime, client: ClientInfo) {
        for search in &client.searches {
            if let Some(timer) = search.timer {
                runtime.timer.cancel(timer);
            }
        }

        for (sid, subscription) in client.subscriptions {
            if let Some(timer) = subscription.timer {
                runtime.timer.cancel(timer);
            }
            if let Err(e) = self
                .transports
                .eventing
                .unsubscribe(&subscription.event_url, &sid)
            {
                tracing::debug!(%sid, "Unsubscribe during client teardown failed: {}", e);
            }
        }
    }

    fn subscription_url(&self, handle: Handle, sid: &str) -> Result<String> {
        let handles = self.handles.read();
        let client = handles.client(handle).ok_or(UpnpError::InvalidHandle)?;
        client
            .subscriptions
            .get(sid)
            .map(|s| s.event_url.clone())
            .ok_or_else(|| UpnpError::invalid_param(format!("unknown SID {:?}", sid)))
    }

    fn take_client_subscription(&self, handle: Handle, sid: &str) -> Result<ClientSubscription> {
        let mut handles = self.handles.write();
        let client = handles.client_mut(handle).ok_or(UpnpError::InvalidHandle)?;
        client
            .subscriptions
            .remove(sid)
            .ok_or_else(|| UpnpError::invalid_param(format!("unknown SID {:?}", sid)))
    }

    /// Remove `sid` from whichever client holds it
    fn take_subscription(&self, sid: &str) -> Option<(ClientCallback, ClientSubscription)> {
        let mut handles = self.handles.write();
        let (_, client) = handles.find_client_mut()?;
        let subscription = client.subscriptions.remove(sid)?;
        Some((Arc::clone(&client.callback), subscription))
    }

    /// Arm the renewal or expiry timer for a subscription granted `granted`
    fn schedule_subscription_timer(
        self: &Arc<Self>,
        runtime: &Runtime,
        sid: &str,
        granted: Timeout,
    ) -> Option<TimerId> {
        let secs = granted.as_secs()?;
        let weak = Arc::downgrade(self);
        let sid = sid.to_string();

        let scheduled = if self.config.auto_renew {
            let delay = renewal_delay(secs, self.config.auto_renew_lead);
            runtime.timer.schedule(delay, Priority::Medium, move || {
                if let Some(inner) = weak.upgrade() {
                    inner.auto_renew(&sid);
                }
            })
        } else {
            let delay = Duration::from_secs(u64::from(secs));
            runtime.timer.schedule(delay, Priority::Medium, move || {
                if let Some(inner) = weak.upgrade() {
                    inner.expire_subscription(&sid);
                }
            })
        };

        match scheduled {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!("Subscription timer not armed: {}", e);
                None
            }
        }
    }

    fn auto_renew(self: &Arc<Self>, sid: &str) {
        let Ok(runtime) = self.running() else {
            return;
        };
        let (event_url, timeout) = {
            let handles = self.handles.read();
            let Some(subscription) = handles
                .find_client()
                .and_then(|(_, client)| client.subscriptions.get(sid))
            else {
                return;
            };
            (subscription.event_url.clone(), subscription.timeout)
        };

        match self.transports.eventing.renew(&event_url, sid, timeout) {
            Ok(granted) => {
                let mut handles = self.handles.write();
                if let Some(subscription) = handles
                    .find_client_mut()
                    .and_then(|(_, client)| client.subscriptions.get_mut(sid))
                {
                    subscription.timeout = granted;
                    subscription.timer = self.schedule_subscription_timer(&runtime, sid, granted);
                }
                tracing::debug!(%sid, timeout = %granted, "Subscription auto-renewed");
            }
            Err(e) => {
                tracing::warn!(%sid, "Auto-renewal failed: {}", e);
                if let Some((callback, subscription)) = self.take_subscription(sid) {
                    callback(Event::AutoRenewalFailed(SubscriptionEvent {
                        result: Err(e.into()),
                        sid: sid.to_string(),
                        publisher_url: subscription.event_url,
                        timeout: subscription.timeout,
                    }));
                }
            }
        }
    }

    fn expire_subscription(&self, sid: &str) {
        if let Some((callback, subscription)) = self.take_subscription(sid) {
            tracing::info!(%sid, "Subscription expired");
            callback(Event::SubscriptionExpired(SubscriptionEvent {
                result: Ok(()),
                sid: sid.to_string(),
                publisher_url: subscription.event_url,
                timeout: subscription.timeout,
            }));
        }
    }
}
