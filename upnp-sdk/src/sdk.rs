//! SDK lifecycle and entry points
//!
//! [`Sdk`] owns everything a control point needs at runtime: the handle
//! table, three worker pools, the timer loop and the miniserver. All of it
//! is created by [`Sdk::init`] and torn down by [`Sdk::finish`]; every other
//! entry point fails with [`UpnpError::NotInitialized`] outside that window.
//!
//! Locks are never held across network calls. Entry points validate under
//! the handle-table lock, release it, and only then talk to the network or
//! queue a job.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use if_addrs::IfAddr;
use parking_lot::{Condvar, Mutex, RwLock};
use upnp_discovery::DescriptionFetcher;

use crate::config::SdkConfig;
use crate::error::{Result, UpnpError};
use crate::event::{ClientCallback, Event, SearchId};
use crate::handle::{ClientInfo, DeviceInfo, Handle, HandleInfo, HandleTable};
use crate::logging;
use crate::miniserver::{Dispatcher, MiniServer, StartOptions};
use crate::thread_pool::{PoolHandle, Priority, ThreadPool};
use crate::timer::{Timer, TimerId};
use crate::transport::{ActionRequest, Transports};
use crate::web::WebServer;
use crate::Timeout;

/// Process-level state of an [`Sdk`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdkState {
    Uninitialized,
    Initializing,
    Running,
    ShuttingDown,
}

/// Local addresses the miniserver is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Addresses {
    pub(crate) ip_v4: Ipv4Addr,
    pub(crate) ip_v6: Option<Ipv6Addr>,
}

/// Resources that exist only while the SDK is running
///
/// Field order is drop order: the timer and miniserver must go before the
/// pools hosting them.
pub(crate) struct Runtime {
    pub(crate) timer: Timer,
    pub(crate) miniserver: MiniServer,
    pub(crate) miniserver_pool: ThreadPool,
    pub(crate) recv_pool: ThreadPool,
    pub(crate) send_pool: ThreadPool,
    pub(crate) addresses: Addresses,
}

impl Runtime {
    /// Base URL that publishers should send NOTIFY requests to
    pub(crate) fn callback_url(&self) -> Result<String> {
        let port = self
            .miniserver
            .ports()
            .map(|p| p.http_v4)
            .ok_or(UpnpError::NotInitialized)?;
        Ok(format!("http://{}:{}/", self.addresses.ip_v4, port))
    }
}

struct Lifecycle {
    state: SdkState,
    runtime: Option<Arc<Runtime>>,
}

enum BindTarget<'a> {
    Address(Option<Ipv4Addr>),
    Interface(Option<&'a str>),
}

pub(crate) struct SdkInner {
    pub(crate) config: SdkConfig,
    pub(crate) transports: Transports,
    fetcher: DescriptionFetcher,
    /// Serializes `init` and `finish`
    init_lock: Mutex<()>,
    lifecycle: RwLock<Lifecycle>,
    pub(crate) handles: RwLock<HandleTable>,
    pub(crate) web: WebServer,
    next_search_id: AtomicU64,
    /// Subscribes between sending SUBSCRIBE and recording the SID
    subscribing: Mutex<usize>,
    subscribe_settled: Condvar,
}

/// Marks a subscribe in flight until dropped
pub(crate) struct SubscribeInFlight<'a> {
    inner: &'a SdkInner,
}

impl Drop for SubscribeInFlight<'_> {
    fn drop(&mut self) {
        let mut subscribing = self.inner.subscribing.lock();
        *subscribing = subscribing.saturating_sub(1);
        self.inner.subscribe_settled.notify_all();
    }
}

/// A UPnP control-point stack
///
/// `Sdk` is the single context object holding what would otherwise be
/// process-wide state. Only one client session can be registered at a time.
///
/// # Example
///
/// ```rust,ignore
/// use upnp_sdk::{Event, Sdk, SdkConfig};
///
/// let sdk = Sdk::new(SdkConfig::default())?;
/// sdk.init(None, 0)?;
///
/// let handle = sdk.register_client(|event| match event {
///     Event::DiscoveryFound(found) => println!("{} at {:?}", found.device_id, found.location),
///     other => println!("{:?}", other.kind()),
/// })?;
///
/// sdk.search_async(handle, 5, "ssdp:all")?;
/// // ...
/// sdk.unregister_client(handle)?;
/// sdk.finish()?;
/// ```
pub struct Sdk {
    inner: Arc<SdkInner>,
}

impl std::fmt::Debug for Sdk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sdk").field("state", &self.state()).finish()
    }
}

impl Sdk {
    /// Create an SDK talking SOAP/GENA over HTTP
    pub fn new(config: SdkConfig) -> Result<Self> {
        let transports = Transports::soap(config.http_timeout);
        Self::with_transports(config, transports)
    }

    /// Create an SDK with custom protocol transports
    pub fn with_transports(config: SdkConfig, transports: Transports) -> Result<Self> {
        config.validate()?;
        let fetcher = DescriptionFetcher::new(config.http_timeout)?;

        Ok(Self {
            inner: Arc::new(SdkInner {
                handles: RwLock::new(HandleTable::new(config.max_handles)),
                web: WebServer::new(
                    config.max_content_length,
                    config.virtual_dir_name_limit,
                    config.user_agent.clone(),
                ),
                config,
                transports,
                fetcher,
                init_lock: Mutex::new(()),
                lifecycle: RwLock::new(Lifecycle {
                    state: SdkState::Uninitialized,
                    runtime: None,
                }),
                next_search_id: AtomicU64::new(1),
                subscribing: Mutex::new(0),
                subscribe_settled: Condvar::new(),
            }),
        })
    }

    pub fn config(&self) -> &SdkConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SdkState {
        self.inner.lifecycle.read().state
    }

    /// Start the SDK on `host_ip`, or on the first usable interface when `None`
    ///
    /// `port` 0 picks the first free port from `listen_port_base`.
    ///
    /// # Errors
    ///
    /// `AlreadyInitialized` unless uninitialized. Any failure while starting
    /// undoes everything started so far and reports the first error.
    pub fn init(&self, host_ip: Option<Ipv4Addr>, port: u16) -> Result<()> {
        self.inner.init(BindTarget::Address(host_ip), port)
    }

    /// Start the SDK on the named interface, or the first usable one when `None`
    pub fn init_interface(&self, if_name: Option<&str>, port: u16) -> Result<()> {
        self.inner.init(BindTarget::Interface(if_name), port)
    }

    /// Unregister any client, stop all threads and release all sockets
    pub fn finish(&self) -> Result<()> {
        self.inner.finish()
    }

    /// Register the control point; `callback` receives every [`Event`] for it
    pub fn register_client<F>(&self, callback: F) -> Result<Handle>
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        self.inner.register_client(Arc::new(callback))
    }

    pub fn unregister_client(&self, handle: Handle) -> Result<()> {
        self.inner.unregister_client(handle)
    }

    /// Register a root device session; at most one may exist
    pub fn register_root_device<F>(&self, description_url: &str, callback: F) -> Result<Handle>
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        self.inner.register_root_device(description_url, Arc::new(callback))
    }

    pub fn unregister_root_device(&self, handle: Handle) -> Result<()> {
        self.inner.unregister_root_device(handle)
    }

    /// Send an M-SEARCH for `target`
    ///
    /// Results arrive as `DiscoveryFound` events tagged with the returned id;
    /// after `mx` seconds a `DiscoveryTimeout` closes the search.
    pub fn search_async(&self, handle: Handle, mx: u32, target: &str) -> Result<SearchId> {
        self.inner.search_async(handle, mx, target)
    }

    /// Subscribe to `event_url`, returning the SID and the granted timeout
    pub fn subscribe(&self, handle: Handle, event_url: &str, timeout: Timeout) -> Result<(String, Timeout)> {
        self.inner.subscribe(handle, event_url, timeout)
    }

    /// Subscribe on the send pool; `completion` receives `SubscribeComplete`
    pub fn subscribe_async<F>(&self, handle: Handle, event_url: &str, timeout: Timeout, completion: F) -> Result<()>
    where
        F: FnOnce(Event) + Send + 'static,
    {
        self.inner
            .subscribe_async(handle, event_url, timeout, Box::new(completion))
    }

    pub fn unsubscribe(&self, handle: Handle, sid: &str) -> Result<()> {
        self.inner.unsubscribe(handle, sid)
    }

    /// Unsubscribe on the send pool; `completion` receives `UnsubscribeComplete`
    pub fn unsubscribe_async<F>(&self, handle: Handle, sid: &str, completion: F) -> Result<()>
    where
        F: FnOnce(Event) + Send + 'static,
    {
        self.inner.unsubscribe_async(handle, sid, Box::new(completion))
    }

    /// Renew `sid`, returning the newly granted timeout
    pub fn renew(&self, handle: Handle, sid: &str, timeout: Timeout) -> Result<Timeout> {
        self.inner.renew(handle, sid, timeout)
    }

    /// Renew on the send pool; `completion` receives `RenewComplete`
    pub fn renew_async<F>(&self, handle: Handle, sid: &str, timeout: Timeout, completion: F) -> Result<()>
    where
        F: FnOnce(Event) + Send + 'static,
    {
        self.inner
            .renew_async(handle, sid, timeout, Box::new(completion))
    }

    /// Post `request` to `control_url` on the send pool
    ///
    /// `completion` receives exactly one `ActionComplete`. Devices are
    /// addressed by URL only, so `device_udn` must be `None`.
    pub fn send_action_async<F>(
        &self,
        handle: Handle,
        control_url: &str,
        service_type: &str,
        device_udn: Option<&str>,
        request: ActionRequest,
        completion: F,
    ) -> Result<()>
    where
        F: FnOnce(Event) + Send + 'static,
    {
        self.inner.send_action_async(
            handle,
            control_url,
            service_type,
            device_udn,
            request,
            Box::new(completion),
        )
    }

    /// Query a state variable on the send pool; `completion` receives `GetVarComplete`
    pub fn get_var_status_async<F>(
        &self,
        handle: Handle,
        control_url: &str,
        var_name: &str,
        completion: F,
    ) -> Result<()>
    where
        F: FnOnce(Event) + Send + 'static,
    {
        self.inner
            .get_var_status_async(handle, control_url, var_name, Box::new(completion))
    }

    /// Run `job` on the send pool every `interval` until cancelled or finished
    pub fn schedule_periodic<F>(&self, interval: Duration, job: F) -> Result<TimerId>
    where
        F: Fn() + Send + Sync + 'static,
    {
        if interval.is_zero() {
            return Err(UpnpError::invalid_param("interval must be greater than 0"));
        }
        let runtime = self.inner.running()?;
        Ok(runtime.timer.schedule_periodic(interval, Priority::Medium, job)?)
    }

    pub fn cancel_timer(&self, id: TimerId) -> Result<()> {
        self.inner.running()?.timer.cancel(id);
        Ok(())
    }

    /// HTTP port of the miniserver
    pub fn server_port(&self) -> Option<u16> {
        self.inner.running().ok()?.miniserver.ports().map(|p| p.http_v4)
    }

    pub fn server_port6(&self) -> Option<u16> {
        self.inner.running().ok()?.miniserver.ports()?.http_v6
    }

    pub fn server_ip_address(&self) -> Option<Ipv4Addr> {
        self.inner.running().ok().map(|r| r.addresses.ip_v4)
    }

    pub fn server_ip6_address(&self) -> Option<Ipv6Addr> {
        self.inner.running().ok()?.addresses.ip_v6
    }

    pub fn add_virtual_dir(&self, name: &str) -> Result<()> {
        self.inner.running()?;
        self.inner.web.add_virtual_dir(name)
    }

    pub fn remove_virtual_dir(&self, name: &str) -> Result<()> {
        self.inner.running()?;
        self.inner.web.remove_virtual_dir(name)
    }

    pub fn remove_all_virtual_dirs(&self) -> Result<()> {
        self.inner.running()?;
        self.inner.web.remove_all_virtual_dirs();
        Ok(())
    }

    pub fn is_virtual_dir(&self, path: &str) -> bool {
        self.inner.running().is_ok() && self.inner.web.is_virtual_dir(path)
    }

    pub fn enable_webserver(&self, enabled: bool) -> Result<()> {
        self.inner.running()?;
        self.inner.web.set_enabled(enabled);
        Ok(())
    }

    pub fn is_webserver_enabled(&self) -> bool {
        self.inner.running().is_ok() && self.inner.web.is_enabled()
    }

    /// Largest NOTIFY body accepted by the miniserver
    pub fn set_max_content_length(&self, bytes: usize) -> Result<()> {
        self.inner.running()?;
        if bytes == 0 {
            return Err(UpnpError::invalid_param("max content length must be greater than 0"));
        }
        self.inner.web.set_max_content_length(bytes);
        Ok(())
    }

    /// Fetch a document, returning its body and content type
    pub fn download_url_item(&self, url: &str) -> Result<(String, String)> {
        self.inner.running()?;
        if url.is_empty() {
            return Err(UpnpError::invalid_param("url is empty"));
        }
        Ok(self.inner.fetcher.fetch_text(url)?)
    }

    /// Live handles, for diagnostics
    pub fn handle_count(&self) -> usize {
        self.inner.handles.read().live()
    }
}

impl Drop for Sdk {
    fn drop(&mut self) {
        if self.state() == SdkState::Running {
            if let Err(e) = self.finish() {
                tracing::warn!("SDK teardown on drop failed: {}", e);
            }
        }
    }
}

impl SdkInner {
    /// The runtime, or `NotInitialized` outside `Running`
    pub(crate) fn running(&self) -> Result<Arc<Runtime>> {
        let lifecycle = self.lifecycle.read();
        match (lifecycle.state, &lifecycle.runtime) {
            (SdkState::Running, Some(runtime)) => Ok(Arc::clone(runtime)),
            _ => Err(UpnpError::NotInitialized),
        }
    }

    /// Fail unless `handle` is a registered client
    pub(crate) fn check_client(&self, handle: Handle) -> Result<()> {
        self.handles
            .read()
            .client(handle)
            .map(|_| ())
            .ok_or(UpnpError::InvalidHandle)
    }

    /// Callback of the registered client, if any
    pub(crate) fn client_callback(&self) -> Option<ClientCallback> {
        self.handles
            .read()
            .find_client()
            .map(|(_, client)| Arc::clone(&client.callback))
    }

    pub(crate) fn next_search_id(&self) -> SearchId {
        SearchId(self.next_search_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Queue `job` on the send pool at medium priority
    pub(crate) fn submit_send(&self, runtime: &Runtime, job: impl FnOnce() + Send + 'static) -> Result<()> {
        runtime.send_pool.submit(Priority::Medium, job)?;
        Ok(())
    }

    fn init(self: &Arc<Self>, target: BindTarget<'_>, port: u16) -> Result<()> {
        let _init = self.init_lock.lock();
        {
            let mut lifecycle = self.lifecycle.write();
            if lifecycle.state != SdkState::Uninitialized {
                return Err(UpnpError::AlreadyInitialized);
            }
            lifecycle.state = SdkState::Initializing;
        }

        let result = self.bring_up(target, port);
        if let Err(e) = &result {
            let mut lifecycle = self.lifecycle.write();
            if lifecycle.state == SdkState::Initializing {
                lifecycle.state = SdkState::Uninitialized;
            }
            tracing::error!("SDK initialization failed: {}", e);
        }
        result
    }

    fn bring_up(self: &Arc<Self>, target: BindTarget<'_>, port: u16) -> Result<()> {
        if let Err(e) = logging::init_logging_from_env() {
            tracing::debug!("Using the existing tracing subscriber: {}", e);
        }

        self.handles.write().clear();

        // Until the runtime is published, a failure unwinds by dropping these
        // in reverse order
        let init_failed = |e: crate::thread_pool::PoolError| UpnpError::InitFailed(e.to_string());
        let send_pool = ThreadPool::new(self.config.send_pool.clone()).map_err(init_failed)?;
        let recv_pool = ThreadPool::new(self.config.recv_pool.clone()).map_err(init_failed)?;
        let miniserver_pool =
            ThreadPool::new(self.config.miniserver_pool.clone()).map_err(init_failed)?;
        let timer = Timer::start(&send_pool.handle()).map_err(init_failed)?;

        let addresses = resolve_addresses(&target, self.config.enable_ipv6)?;
        schedule_maintenance(&timer, &self.config, [&send_pool, &recv_pool, &miniserver_pool])?;

        let runtime = Arc::new(Runtime {
            timer,
            miniserver: MiniServer::new(),
            miniserver_pool,
            recv_pool,
            send_pool,
            addresses,
        });

        {
            let mut lifecycle = self.lifecycle.write();
            lifecycle.runtime = Some(Arc::clone(&runtime));
            lifecycle.state = SdkState::Running;
        }

        let options = StartOptions {
            bind_ip_v4: addresses.ip_v4,
            bind_ip_v6: addresses.ip_v6,
            http_port_v4: port,
            http_port_v6: 0,
            listen_port_base: self.config.listen_port_base,
            ssdp_multicast: self.config.enable_ssdp_multicast,
            start_timeout: self.config.start_timeout,
            stop_resend_interval: self.config.stop_resend_interval,
        };
        let dispatcher = Arc::new(SdkDispatch {
            inner: Arc::downgrade(self),
        });

        match runtime
            .miniserver
            .start(&options, &runtime.miniserver_pool.handle(), dispatcher)
        {
            Ok(ports) => {
                self.web.set_enabled(true);
                tracing::info!(
                    ip = %addresses.ip_v4,
                    port = ports.http_v4,
                    "UPnP SDK initialized"
                );
                Ok(())
            }
            Err(e) => {
                drop(runtime);
                self.tear_down();
                Err(e)
            }
        }
    }

    fn finish(&self) -> Result<()> {
        let _init = self.init_lock.lock();
        if self.lifecycle.read().state != SdkState::Running {
            return Err(UpnpError::NotInitialized);
        }
        self.tear_down();
        tracing::info!("UPnP SDK finished");
        Ok(())
    }

    /// Release everything `bring_up` created; the caller holds `init_lock`
    fn tear_down(&self) {
        let runtime = {
            let mut lifecycle = self.lifecycle.write();
            lifecycle.state = SdkState::ShuttingDown;
            lifecycle.runtime.take()
        };

        let client = {
            let mut handles = self.handles.write();
            let client = handles.find_client().map(|(handle, _)| handle);
            client.and_then(|handle| match handles.free(handle) {
                Ok(HandleInfo::Client(info)) => Some(info),
                _ => None,
            })
        };

        if let Some(runtime) = runtime {
            if let Some(client) = client {
                self.release_client(&runtime, client);
            }
            runtime.timer.shutdown();
            runtime.miniserver.stop();
            self.web.set_enabled(false);
            runtime.miniserver_pool.shutdown();
            runtime.recv_pool.shutdown();
            runtime.send_pool.shutdown();
        }

        self.web.remove_all_virtual_dirs();
        self.handles.write().clear();
        self.lifecycle.write().state = SdkState::Uninitialized;
    }

    fn register_client(&self, callback: ClientCallback) -> Result<Handle> {
        self.running()?;
        let mut handles = self.handles.write();
        if handles.client_registered {
            return Err(UpnpError::AlreadyRegistered);
        }
        let handle = handles.allocate(HandleInfo::Client(ClientInfo::new(callback)))?;
        handles.client_registered = true;

        tracing::info!(%handle, "Client registered");
        Ok(handle)
    }

    fn unregister_client(&self, handle: Handle) -> Result<()> {
        let runtime = self.running()?;
        let client = {
            let mut handles = self.handles.write();
            if handles.client(handle).is_none() {
                return Err(UpnpError::InvalidHandle);
            }
            let info = handles.free(handle)?;
            handles.client_registered = false;
            info
        };

        if let HandleInfo::Client(client) = client {
            self.release_client(&runtime, client);
        }
        tracing::info!(%handle, "Client unregistered");
        Ok(())
    }

    fn register_root_device(&self, description_url: &str, callback: ClientCallback) -> Result<Handle> {
        self.running()?;
        if description_url.is_empty() {
            return Err(UpnpError::invalid_param("description url is empty"));
        }

        let mut handles = self.handles.write();
        if handles.device_registered_v4 {
            return Err(UpnpError::AlreadyRegistered);
        }
        let handle = handles.allocate(HandleInfo::Device(DeviceInfo::new(description_url, callback)))?;
        handles.device_registered_v4 = true;

        tracing::info!(%handle, url = %description_url, "Root device registered");
        Ok(handle)
    }

    fn unregister_root_device(&self, handle: Handle) -> Result<()> {
        self.running()?;
        let mut handles = self.handles.write();
        if !matches!(handles.get(handle), Some(HandleInfo::Device(_))) {
            return Err(UpnpError::InvalidHandle);
        }
        handles.free(handle)?;
        handles.device_registered_v4 = false;
        Ok(())
    }

    pub(crate) fn begin_subscribe(&self) -> SubscribeInFlight<'_> {
        *self.subscribing.lock() += 1;
        SubscribeInFlight { inner: self }
    }

    fn subscriber(&self, sid: &str) -> Option<ClientCallback> {
        self.handles
            .read()
            .find_client()
            .filter(|(_, client)| client.subscriptions.contains_key(sid))
            .map(|(_, client)| Arc::clone(&client.callback))
    }

    /// Callback for a NOTIFY on `sid`
    ///
    /// The initial event (key 0) can overtake the SUBSCRIBE response, so an
    /// unknown SID waits, up to the HTTP timeout, for subscribes in flight
    /// to record theirs.
    fn notify_target(&self, sid: &str, event_key: u32) -> Option<ClientCallback> {
        if let Some(callback) = self.subscriber(sid) {
            return Some(callback);
        }
        if event_key != 0 {
            return None;
        }

        let deadline = Instant::now() + self.config.http_timeout;
        {
            let mut subscribing = self.subscribing.lock();
            while *subscribing > 0 {
                if self
                    .subscribe_settled
                    .wait_until(&mut subscribing, deadline)
                    .timed_out()
                {
                    break;
                }
            }
        }
        self.subscriber(sid)
    }

    fn serve_http(&self, stream: TcpStream) {
        self.web
            .serve_connection(stream, self.config.http_timeout, |sid, event_key| {
                self.notify_target(sid, event_key)
            });
    }
}

/// Hands inbound miniserver traffic to the receive pool
struct SdkDispatch {
    inner: Weak<SdkInner>,
}

impl SdkDispatch {
    fn recv_pool(&self) -> Option<PoolHandle> {
        let inner = self.inner.upgrade()?;
        let runtime = inner.running().ok()?;
        Some(runtime.recv_pool.handle())
    }
}

impl Dispatcher for SdkDispatch {
    fn on_datagram(&self, data: Vec<u8>, source: SocketAddr) {
        let Some(pool) = self.recv_pool() else {
            return;
        };
        let weak = self.inner.clone();
        let queued = pool.submit(Priority::Medium, move || {
            if let Some(inner) = weak.upgrade() {
                inner.handle_datagram(&data, source);
            }
        });
        if let Err(e) = queued {
            tracing::debug!(%source, "Dropping SSDP datagram: {}", e);
        }
    }

    fn on_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let Some(pool) = self.recv_pool() else {
            return;
        };
        let weak = self.inner.clone();
        let queued = pool.submit(Priority::High, move || {
            if let Some(inner) = weak.upgrade() {
                inner.serve_http(stream);
            }
        });
        if let Err(e) = queued {
            tracing::warn!(%peer, "Dropping HTTP connection: {}", e);
        }
    }
}

fn schedule_maintenance(timer: &Timer, config: &SdkConfig, pools: [&ThreadPool; 3]) -> Result<()> {
    let pools: Vec<PoolHandle> = pools.iter().map(|p| p.handle()).collect();
    timer.schedule_periodic(config.maintenance_interval, Priority::Low, move || {
        for pool in &pools {
            let stats = pool.stats();
            tracing::debug!(
                pool = %pool.name(),
                workers = stats.workers,
                idle = stats.idle_workers,
                queued = stats.queued(),
                completed = stats.completed,
                "Pool maintenance tick"
            );
        }
    })?;
    Ok(())
}

fn resolve_addresses(target: &BindTarget<'_>, enable_ipv6: bool) -> Result<Addresses> {
    if let BindTarget::Address(Some(ip)) = target {
        if ip.is_loopback() || !enable_ipv6 {
            return Ok(Addresses {
                ip_v4: *ip,
                ip_v6: None,
            });
        }
    }

    let interfaces = if_addrs::get_if_addrs()
        .map_err(|e| UpnpError::InitFailed(format!("cannot list network interfaces: {}", e)))?;

    let name = match target {
        BindTarget::Interface(Some(name)) => {
            if !interfaces.iter().any(|i| i.name == *name) {
                return Err(UpnpError::invalid_param(format!("unknown interface {}", name)));
            }
            Some(name.to_string())
        }
        BindTarget::Address(Some(ip)) => interfaces
            .iter()
            .find(|i| i.ip() == IpAddr::V4(*ip))
            .map(|i| i.name.clone()),
        _ => interfaces
            .iter()
            .find(|i| !i.is_loopback() && matches!(i.addr, IfAddr::V4(_)))
            .map(|i| i.name.clone()),
    };

    let on_interface = |i: &&if_addrs::Interface| name.as_deref().map_or(true, |n| i.name == n);

    let ip_v4 = match target {
        BindTarget::Address(Some(ip)) => Some(*ip),
        _ if name.is_none() => None,
        _ => interfaces.iter().filter(on_interface).find_map(|i| match &i.addr {
            IfAddr::V4(v4) => Some(v4.ip),
            IfAddr::V6(_) => None,
        }),
    }
    .ok_or_else(|| UpnpError::InitFailed("no interface with an IPv4 address".to_string()))?;

    let ip_v6 = if enable_ipv6 && name.is_some() {
        interfaces.iter().filter(on_interface).find_map(|i| match &i.addr {
            IfAddr::V6(v6) => Some(v6.ip),
            IfAddr::V4(_) => None,
        })
    } else {
        None
    };

    Ok(Addresses { ip_v4, ip_v6 })
}
