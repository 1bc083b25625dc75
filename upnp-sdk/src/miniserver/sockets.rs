//! Socket set owned by the miniserver loop
//!
//! Sockets are opened as blocking-free std sockets on the caller's thread and
//! converted to tokio sockets inside the loop's runtime. Every socket closes
//! on drop, so a failure halfway through [`SocketSet::open`] releases the
//! ones already opened.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6, TcpListener, UdpSocket};

use socket2::{Domain, Protocol, Socket, Type};
use upnp_discovery::ssdp::{SSDP_MULTICAST_V4, SSDP_MULTICAST_V6, SSDP_PORT};

use super::{BoundPorts, StartOptions};
use crate::error::{Result, UpnpError};

/// Multicast TTL for outgoing M-SEARCH requests
const SEARCH_TTL: u32 = 4;

pub(crate) struct SocketSet {
    pub(crate) stop: UdpSocket,
    pub(crate) http_v4: TcpListener,
    pub(crate) http_v6: Option<TcpListener>,
    pub(crate) ssdp_v4: Option<UdpSocket>,
    pub(crate) ssdp_req_v4: UdpSocket,
    pub(crate) ssdp_v6: Option<UdpSocket>,
    pub(crate) ssdp_req_v6: Option<UdpSocket>,
}

impl SocketSet {
    pub(crate) fn open(options: &StartOptions) -> Result<Self> {
        let stop = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0))
            .map_err(|e| UpnpError::SocketError(format!("stop socket: {}", e)))?;

        let http_v4 = bind_http(
            SocketAddr::from((options.bind_ip_v4, options.http_port_v4)),
            options.listen_port_base,
        )?;

        let ssdp_v4 = if options.ssdp_multicast {
            Some(multicast_listener_v4(options.bind_ip_v4).map_err(|e| {
                UpnpError::BindError(format!("SSDP multicast {}: {}", SSDP_PORT, e))
            })?)
        } else {
            None
        };

        let ssdp_req_v4 = request_socket_v4(options.bind_ip_v4)
            .map_err(|e| UpnpError::SocketError(format!("SSDP request socket: {}", e)))?;

        let (http_v6, ssdp_v6, ssdp_req_v6) = match options.bind_ip_v6 {
            Some(ip) => {
                let http = bind_http(
                    SocketAddr::from((ip, options.http_port_v6)),
                    options.listen_port_base,
                )?;
                let listener = if options.ssdp_multicast {
                    Some(multicast_listener_v6().map_err(|e| {
                        UpnpError::BindError(format!("SSDP multicast v6 {}: {}", SSDP_PORT, e))
                    })?)
                } else {
                    None
                };
                let request = UdpSocket::bind(SocketAddrV6::new(ip, 0, 0, 0))
                    .map_err(|e| UpnpError::SocketError(format!("SSDP v6 request socket: {}", e)))?;
                (Some(http), listener, Some(request))
            }
            None => (None, None, None),
        };

        let set = Self {
            stop,
            http_v4,
            http_v6,
            ssdp_v4,
            ssdp_req_v4,
            ssdp_v6,
            ssdp_req_v6,
        };
        set.set_nonblocking()
            .map_err(|e| UpnpError::SocketError(e.to_string()))?;
        Ok(set)
    }

    pub(crate) fn ports(&self) -> Result<BoundPorts> {
        let port = |addr: io::Result<SocketAddr>| {
            addr.map(|a| a.port())
                .map_err(|e| UpnpError::SocketError(e.to_string()))
        };

        Ok(BoundPorts {
            http_v4: port(self.http_v4.local_addr())?,
            http_v6: self
                .http_v6
                .as_ref()
                .map(|l| port(l.local_addr()))
                .transpose()?,
            ssdp_request_v4: port(self.ssdp_req_v4.local_addr())?,
            stop: port(self.stop.local_addr())?,
        })
    }

    fn set_nonblocking(&self) -> io::Result<()> {
        self.stop.set_nonblocking(true)?;
        self.http_v4.set_nonblocking(true)?;
        self.ssdp_req_v4.set_nonblocking(true)?;
        if let Some(listener) = &self.http_v6 {
            listener.set_nonblocking(true)?;
        }
        for socket in [&self.ssdp_v4, &self.ssdp_v6, &self.ssdp_req_v6].into_iter().flatten() {
            socket.set_nonblocking(true)?;
        }
        Ok(())
    }
}

/// Bind the HTTP listener, walking upward from `port_base` when no port is requested
fn bind_http(addr: SocketAddr, port_base: u16) -> Result<TcpListener> {
    if addr.port() != 0 {
        return TcpListener::bind(addr)
            .map_err(|e| UpnpError::BindError(format!("HTTP listener {}: {}", addr, e)));
    }

    let mut last_error = None;
    for port in port_base..=u16::MAX {
        let candidate = SocketAddr::new(addr.ip(), port);
        match TcpListener::bind(candidate) {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => last_error = Some(e),
            Err(e) => {
                return Err(UpnpError::BindError(format!("HTTP listener {}: {}", candidate, e)))
            }
        }
    }

    Err(UpnpError::BindError(format!(
        "no free HTTP port from {}: {}",
        port_base,
        last_error.map(|e| e.to_string()).unwrap_or_default()
    )))
}

fn reusable_udp(domain: Domain) -> io::Result<Socket> {
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(any(target_os = "linux", target_os = "macos", target_os = "freebsd"))]
    socket.set_reuse_port(true)?;
    Ok(socket)
}

fn multicast_listener_v4(interface: Ipv4Addr) -> io::Result<UdpSocket> {
    let socket = reusable_udp(Domain::IPV4)?;
    socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, SSDP_PORT)).into())?;
    socket.set_multicast_loop_v4(true)?;
    socket.join_multicast_v4(&SSDP_MULTICAST_V4, &interface)?;
    Ok(socket.into())
}

fn multicast_listener_v6() -> io::Result<UdpSocket> {
    let socket = reusable_udp(Domain::IPV6)?;
    socket.set_only_v6(true)?;
    socket.bind(&SocketAddr::from((Ipv6Addr::UNSPECIFIED, SSDP_PORT)).into())?;
    socket.join_multicast_v6(&SSDP_MULTICAST_V6, 0)?;
    Ok(socket.into())
}

fn request_socket_v4(interface: Ipv4Addr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.bind(&SocketAddr::from((interface, 0)).into())?;
    socket.set_multicast_ttl_v4(SEARCH_TTL)?;
    if let Err(e) = socket.set_multicast_if_v4(&interface) {
        tracing::debug!(%interface, "Could not pin multicast interface: {}", e);
    }
    Ok(socket.into())
}
