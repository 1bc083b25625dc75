//! MiniServer: inbound SSDP and HTTP multiplexer
//!
//! One persistent pool job owns the whole socket set and waits on all of it
//! at once with `tokio::select!` on a current-thread runtime. Inbound
//! datagrams and accepted connections are handed to a [`Dispatcher`]; the
//! loop itself never parses or answers anything.
//!
//! `start` blocks until the loop reports `Running` (or the start deadline
//! passes). `stop` sends a `ShutDown` datagram to the loop's loopback stop
//! socket until the loop reports `Idle`.

mod sockets;

use std::future;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use upnp_discovery::ssdp::{self, MAX_DATAGRAM};

use crate::error::{Result, UpnpError};
use crate::thread_pool::PoolHandle;
use sockets::SocketSet;

/// Sentinel datagram that terminates the loop
const SHUTDOWN_SENTINEL: &[u8] = b"ShutDown";

/// Largest datagram on the stop socket that is inspected for the sentinel
const MAX_STOP_DATAGRAM: usize = 25;

/// Receiver of inbound traffic; called on the loop thread, so implementations
/// should hand work off rather than block
pub trait Dispatcher: Send + Sync + 'static {
    fn on_datagram(&self, data: Vec<u8>, source: SocketAddr);

    /// `stream` is in blocking mode
    fn on_connection(&self, stream: std::net::TcpStream, peer: SocketAddr);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Starting,
    Running,
    Stopping,
}

/// Addresses and ports for one run of the server
#[derive(Debug, Clone)]
pub struct StartOptions {
    pub bind_ip_v4: Ipv4Addr,
    /// IPv6 sockets are opened only when set
    pub bind_ip_v6: Option<Ipv6Addr>,
    /// 0 picks the first free port from `listen_port_base`
    pub http_port_v4: u16,
    pub http_port_v6: u16,
    pub listen_port_base: u16,
    pub ssdp_multicast: bool,
    pub start_timeout: Duration,
    pub stop_resend_interval: Duration,
}

/// Ports bound by a running server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundPorts {
    pub http_v4: u16,
    pub http_v6: Option<u16>,
    /// Source port of outgoing M-SEARCH requests
    pub ssdp_request_v4: u16,
    pub stop: u16,
}

struct Control {
    phase: Phase,
    /// Bumped by every `start`, so a loop from an abandoned start cannot
    /// touch the state of a later one
    generation: u64,
    ports: Option<BoundPorts>,
    search_v4: Option<UdpSocket>,
    search_v6: Option<UdpSocket>,
    stop_resend_interval: Duration,
}

struct Shared {
    control: Mutex<Control>,
    changed: Condvar,
}

impl Shared {
    fn mark_running(&self, generation: u64) -> bool {
        let mut control = self.control.lock();
        if control.generation != generation || control.phase != Phase::Starting {
            return false;
        }
        control.phase = Phase::Running;
        self.changed.notify_all();
        true
    }
}

/// Resets the phase to `Idle` when the loop exits for any reason
struct LoopExit {
    shared: Arc<Shared>,
    generation: u64,
}

impl Drop for LoopExit {
    fn drop(&mut self) {
        let mut control = self.shared.control.lock();
        if control.generation == self.generation {
            control.phase = Phase::Idle;
            control.ports = None;
            control.search_v4 = None;
            control.search_v6 = None;
        }
        self.shared.changed.notify_all();
    }
}

pub struct MiniServer {
    shared: Arc<Shared>,
}

impl Default for MiniServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MiniServer {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                control: Mutex::new(Control {
                    phase: Phase::Idle,
                    generation: 0,
                    ports: None,
                    search_v4: None,
                    search_v6: None,
                    stop_resend_interval: Duration::from_millis(50),
                }),
                changed: Condvar::new(),
            }),
        }
    }

    pub fn phase(&self) -> Phase {
        self.shared.control.lock().phase
    }

    /// Ports of the running server
    pub fn ports(&self) -> Option<BoundPorts> {
        self.shared.control.lock().ports
    }

    /// Open the socket set and run the loop as a persistent job on `pool`
    ///
    /// Fails with `InternalError` if the server is not idle or the loop does
    /// not report running within `options.start_timeout`.
    pub fn start(
        &self,
        options: &StartOptions,
        pool: &PoolHandle,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<BoundPorts> {
        let generation = {
            let mut control = self.shared.control.lock();
            if control.phase != Phase::Idle {
                return Err(UpnpError::InternalError(format!(
                    "miniserver is {:?}, expected Idle",
                    control.phase
                )));
            }
            control.phase = Phase::Starting;
            control.generation += 1;
            control.stop_resend_interval = options.stop_resend_interval;
            control.generation
        };

        match self.launch(options, pool, dispatcher, generation) {
            Ok(ports) => {
                tracing::info!(
                    http_port = ports.http_v4,
                    http_port_v6 = ?ports.http_v6,
                    "MiniServer running"
                );
                Ok(ports)
            }
            Err(e) => {
                let mut control = self.shared.control.lock();
                if control.generation == generation {
                    control.phase = Phase::Idle;
                    control.ports = None;
                    control.search_v4 = None;
                    control.search_v6 = None;
                    // A loop that starts late must not claim this run
                    control.generation += 1;
                }
                tracing::error!("MiniServer failed to start: {}", e);
                Err(e)
            }
        }
    }

    fn launch(
        &self,
        options: &StartOptions,
        pool: &PoolHandle,
        dispatcher: Arc<dyn Dispatcher>,
        generation: u64,
    ) -> Result<BoundPorts> {
        let sockets = SocketSet::open(options)?;
        let ports = sockets.ports()?;
        let search_v4 = sockets
            .ssdp_req_v4
            .try_clone()
            .map_err(|e| UpnpError::SocketError(e.to_string()))?;
        let search_v6 = sockets
            .ssdp_req_v6
            .as_ref()
            .map(UdpSocket::try_clone)
            .transpose()
            .map_err(|e| UpnpError::SocketError(e.to_string()))?;

        {
            let mut control = self.shared.control.lock();
            control.ports = Some(ports);
            control.search_v4 = Some(search_v4);
            control.search_v6 = search_v6;
        }

        let shared = Arc::clone(&self.shared);
        pool.submit_persistent(move || serve(sockets, dispatcher, shared, generation))
            .map_err(|e| UpnpError::InternalError(format!("cannot host miniserver loop: {}", e)))?;

        let mut control = self.shared.control.lock();
        self.shared.changed.wait_while_for(
            &mut control,
            |c| c.generation == generation && c.phase == Phase::Starting,
            options.start_timeout,
        );

        if control.generation == generation && control.phase == Phase::Running {
            Ok(ports)
        } else {
            Err(UpnpError::InternalError(
                "miniserver loop did not reach Running".to_string(),
            ))
        }
    }

    /// Signal the loop to exit and wait until it has released its sockets
    ///
    /// A no-op unless the server is running.
    pub fn stop(&self) {
        let sender = match UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)) {
            Ok(socket) => socket,
            Err(e) => {
                tracing::error!("Cannot open socket to stop miniserver: {}", e);
                return;
            }
        };

        let mut control = self.shared.control.lock();
        if control.phase != Phase::Running {
            return;
        }
        let Some(stop_port) = control.ports.map(|p| p.stop) else {
            return;
        };
        control.phase = Phase::Stopping;
        let interval = control.stop_resend_interval;
        let target = SocketAddr::from((Ipv4Addr::LOCALHOST, stop_port));

        while control.phase == Phase::Stopping {
            MutexGuard::unlocked(&mut control, || {
                if let Err(e) = sender.send_to(SHUTDOWN_SENTINEL, target) {
                    tracing::debug!("Shutdown datagram not sent: {}", e);
                }
            });
            self.shared.changed.wait_for(&mut control, interval);
        }
        tracing::info!("MiniServer stopped");
    }

    /// Send an M-SEARCH for `target` to `destination` from the request socket
    pub fn send_search(
        &self,
        target: &str,
        mx: u32,
        user_agent: &str,
        destination: SocketAddr,
    ) -> Result<()> {
        let control = self.shared.control.lock();
        if control.phase != Phase::Running {
            return Err(UpnpError::InternalError("miniserver is not running".to_string()));
        }

        let socket = match destination {
            SocketAddr::V4(_) => control.search_v4.as_ref(),
            SocketAddr::V6(_) => control.search_v6.as_ref(),
        }
        .ok_or_else(|| UpnpError::SocketError(format!("no search socket for {}", destination)))?;

        let request = ssdp::build_search(target, mx, destination, user_agent);
        socket
            .send_to(request.as_bytes(), destination)
            .map_err(|e| UpnpError::SocketError(format!("M-SEARCH to {}: {}", destination, e)))?;

        tracing::debug!(%target, mx, %destination, "Sent M-SEARCH");
        Ok(())
    }
}

impl Drop for MiniServer {
    fn drop(&mut self) {
        self.stop();
    }
}

struct LoopSockets {
    stop: tokio::net::UdpSocket,
    http_v4: tokio::net::TcpListener,
    http_v6: Option<tokio::net::TcpListener>,
    ssdp_v4: Option<tokio::net::UdpSocket>,
    ssdp_req_v4: tokio::net::UdpSocket,
    ssdp_v6: Option<tokio::net::UdpSocket>,
    ssdp_req_v6: Option<tokio::net::UdpSocket>,
}

impl LoopSockets {
    /// Must be called inside the runtime
    fn adopt(set: SocketSet) -> io::Result<Self> {
        let udp = tokio::net::UdpSocket::from_std;
        Ok(Self {
            stop: udp(set.stop)?,
            http_v4: tokio::net::TcpListener::from_std(set.http_v4)?,
            http_v6: set.http_v6.map(tokio::net::TcpListener::from_std).transpose()?,
            ssdp_v4: set.ssdp_v4.map(udp).transpose()?,
            ssdp_req_v4: udp(set.ssdp_req_v4)?,
            ssdp_v6: set.ssdp_v6.map(udp).transpose()?,
            ssdp_req_v6: set.ssdp_req_v6.map(udp).transpose()?,
        })
    }
}

fn serve(sockets: SocketSet, dispatcher: Arc<dyn Dispatcher>, shared: Arc<Shared>, generation: u64) {
    let _exit = LoopExit {
        shared: Arc::clone(&shared),
        generation,
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_io().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Failed to create runtime for miniserver: {}", e);
            return;
        }
    };

    runtime.block_on(async move {
        let sockets = match LoopSockets::adopt(sockets) {
            Ok(sockets) => sockets,
            Err(e) => {
                tracing::error!("Failed to register miniserver sockets: {}", e);
                return;
            }
        };
        if !shared.mark_running(generation) {
            tracing::debug!("Abandoned miniserver start, exiting");
            return;
        }
        run_loop(&sockets, dispatcher.as_ref()).await;
    });
}

async fn run_loop(sockets: &LoopSockets, dispatcher: &dyn Dispatcher) {
    let mut stop_buf = [0u8; 64];
    let mut multicast_v4 = vec![0u8; MAX_DATAGRAM];
    let mut unicast_v4 = vec![0u8; MAX_DATAGRAM];
    let mut multicast_v6 = vec![0u8; MAX_DATAGRAM];
    let mut unicast_v6 = vec![0u8; MAX_DATAGRAM];

    loop {
        tokio::select! {
            received = sockets.stop.recv_from(&mut stop_buf) => match received {
                Ok((len, from)) if is_shutdown(&stop_buf[..len], from) => break,
                Ok(_) => {}
                Err(e) => tracing::warn!("Stop socket error: {}", e),
            },
            accepted = sockets.http_v4.accept() => hand_off_connection(accepted, dispatcher),
            accepted = accept_optional(sockets.http_v6.as_ref()) => {
                hand_off_connection(accepted, dispatcher)
            }
            received = recv_optional(sockets.ssdp_v4.as_ref(), &mut multicast_v4) => {
                hand_off_datagram(received, &multicast_v4, dispatcher)
            }
            received = sockets.ssdp_req_v4.recv_from(&mut unicast_v4) => {
                hand_off_datagram(received, &unicast_v4, dispatcher)
            }
            received = recv_optional(sockets.ssdp_v6.as_ref(), &mut multicast_v6) => {
                hand_off_datagram(received, &multicast_v6, dispatcher)
            }
            received = recv_optional(sockets.ssdp_req_v6.as_ref(), &mut unicast_v6) => {
                hand_off_datagram(received, &unicast_v6, dispatcher)
            }
        }
    }

    tracing::debug!("MiniServer loop received shutdown");
}

fn is_shutdown(datagram: &[u8], from: SocketAddr) -> bool {
    from.ip().is_loopback()
        && datagram.len() <= MAX_STOP_DATAGRAM
        && datagram
            .windows(SHUTDOWN_SENTINEL.len())
            .any(|w| w == SHUTDOWN_SENTINEL)
}

async fn recv_optional(
    socket: Option<&tokio::net::UdpSocket>,
    buf: &mut [u8],
) -> io::Result<(usize, SocketAddr)> {
    match socket {
        Some(socket) => socket.recv_from(buf).await,
        None => future::pending().await,
    }
}

async fn accept_optional(
    listener: Option<&tokio::net::TcpListener>,
) -> io::Result<(tokio::net::TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => future::pending().await,
    }
}

fn hand_off_datagram(
    received: io::Result<(usize, SocketAddr)>,
    buf: &[u8],
    dispatcher: &dyn Dispatcher,
) {
    match received {
        Ok((len, source)) => dispatcher.on_datagram(buf[..len].to_vec(), source),
        Err(e) => tracing::debug!("SSDP receive failed: {}", e),
    }
}

fn hand_off_connection(
    accepted: io::Result<(tokio::net::TcpStream, SocketAddr)>,
    dispatcher: &dyn Dispatcher,
) {
    let (stream, peer) = match accepted {
        Ok(accepted) => accepted,
        Err(e) => {
            tracing::warn!("HTTP accept failed: {}", e);
            return;
        }
    };

    match stream.into_std().and_then(|s| s.set_nonblocking(false).map(|_| s)) {
        Ok(stream) => dispatcher.on_connection(stream, peer),
        Err(e) => tracing::warn!(%peer, "Dropping HTTP connection: {}", e),
    }
}
