//! HTTP side of the miniserver
//!
//! Connections accepted by the miniserver loop are served here, one request
//! per connection, on the receive pool. `NOTIFY` requests carrying GENA
//! property sets are answered and then delivered to the subscribing client.
//! The SDK has no content provider, so `GET` and `HEAD` only ever produce an
//! error status.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use xmltree::{Element, XMLNode};

use crate::error::{Result, UpnpError};
use crate::event::{ClientCallback, Event, EventNotification};

/// Upper bound on the request line plus headers
const MAX_HEAD: usize = 8 * 1024;

/// Unread input discarded before closing a connection
const MAX_DRAIN: u64 = 64 * 1024;
const LINGER: Duration = Duration::from_millis(200);

/// Webserver switch, virtual directories and request limits
#[derive(Debug)]
pub(crate) struct WebServer {
    enabled: AtomicBool,
    virtual_dirs: RwLock<Vec<String>>,
    max_content_length: AtomicUsize,
    name_limit: usize,
    server_header: String,
}

impl WebServer {
    pub(crate) fn new(max_content_length: usize, name_limit: usize, server_header: String) -> Self {
        Self {
            enabled: AtomicBool::new(false),
            virtual_dirs: RwLock::new(Vec::new()),
            max_content_length: AtomicUsize::new(max_content_length),
            name_limit,
            server_header,
        }
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub(crate) fn set_max_content_length(&self, bytes: usize) {
        self.max_content_length.store(bytes, Ordering::SeqCst);
    }

    /// Register `name`, adding a leading `/` when missing; duplicates are accepted
    pub(crate) fn add_virtual_dir(&self, name: &str) -> Result<()> {
        let dir = normalize_dir(name);
        if dir.len() <= 1 {
            return Err(UpnpError::invalid_param("virtual directory name is empty"));
        }
        if dir.len() > self.name_limit {
            return Err(UpnpError::invalid_param(format!(
                "virtual directory name longer than {} bytes",
                self.name_limit
            )));
        }

        let mut dirs = self.virtual_dirs.write();
        if !dirs.contains(&dir) {
            dirs.push(dir);
        }
        Ok(())
    }

    pub(crate) fn remove_virtual_dir(&self, name: &str) -> Result<()> {
        let dir = normalize_dir(name);
        let mut dirs = self.virtual_dirs.write();
        let position = dirs
            .iter()
            .position(|d| *d == dir)
            .ok_or_else(|| UpnpError::invalid_param(format!("no virtual directory {}", dir)))?;
        dirs.remove(position);
        Ok(())
    }

    pub(crate) fn remove_all_virtual_dirs(&self) {
        self.virtual_dirs.write().clear();
    }

    /// Whether `path` lies inside a registered virtual directory
    pub(crate) fn is_virtual_dir(&self, path: &str) -> bool {
        self.virtual_dirs.read().iter().any(|dir| {
            path.strip_prefix(dir.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/') || dir.ends_with('/'))
        })
    }

    /// Serve one request on `stream`
    ///
    /// `lookup` maps a SID and event key to the callback of the client
    /// holding that subscription.
    pub(crate) fn serve_connection<F>(&self, mut stream: TcpStream, read_timeout: Duration, lookup: F)
    where
        F: Fn(&str, u32) -> Option<ClientCallback>,
    {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        if let Err(e) = stream.set_read_timeout(Some(read_timeout)) {
            tracing::debug!(%peer, "Cannot set read timeout: {}", e);
        }

        let outcome = match read_request(&mut stream, self.max_content_length.load(Ordering::SeqCst)) {
            Ok(request) => self.route(request, &lookup),
            Err(RequestError::Io(e)) => {
                tracing::debug!(%peer, "Dropping HTTP connection: {}", e);
                return;
            }
            Err(RequestError::Status(status)) => Outcome::reply(status),
        };

        if let Err(e) = self.write_status(&mut stream, outcome.status) {
            tracing::debug!(%peer, "Failed to write HTTP response: {}", e);
        }
        linger(stream);

        if let Some((callback, notification)) = outcome.delivery {
            callback(Event::EventReceived(notification));
        }
    }

    fn route<F>(&self, request: Request, lookup: &F) -> Outcome
    where
        F: Fn(&str, u32) -> Option<ClientCallback>,
    {
        match request.method.as_str() {
            "NOTIFY" => route_notify(request, lookup),
            "GET" | "HEAD" if self.is_enabled() => {
                tracing::debug!(path = %request.path, "No content provider for request");
                Outcome::reply(Status::NOT_FOUND)
            }
            "GET" | "HEAD" => Outcome::reply(Status::FORBIDDEN),
            _ => Outcome::reply(Status::NOT_IMPLEMENTED),
        }
    }

    fn write_status(&self, stream: &mut TcpStream, status: Status) -> io::Result<()> {
        let response = format!(
            "HTTP/1.1 {} {}\r\nSERVER: {}\r\nCONTENT-LENGTH: 0\r\nCONNECTION: close\r\n\r\n",
            status.code, status.reason, self.server_header
        );
        stream.write_all(response.as_bytes())?;
        stream.flush()
    }
}

/// Half-close and discard unread input so the peer sees the response, not a reset
fn linger(mut stream: TcpStream) {
    let _ = stream.shutdown(Shutdown::Write);
    let _ = stream.set_read_timeout(Some(LINGER));
    let _ = io::copy(&mut Read::by_ref(&mut stream).take(MAX_DRAIN), &mut io::sink());
}

fn normalize_dir(name: &str) -> String {
    if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Status {
    code: u16,
    reason: &'static str,
}

impl Status {
    const OK: Status = Status { code: 200, reason: "OK" };
    const BAD_REQUEST: Status = Status { code: 400, reason: "Bad Request" };
    const FORBIDDEN: Status = Status { code: 403, reason: "Forbidden" };
    const NOT_FOUND: Status = Status { code: 404, reason: "Not Found" };
    const LENGTH_REQUIRED: Status = Status { code: 411, reason: "Length Required" };
    const PRECONDITION_FAILED: Status = Status { code: 412, reason: "Precondition Failed" };
    const PAYLOAD_TOO_LARGE: Status = Status { code: 413, reason: "Request Entity Too Large" };
    const NOT_IMPLEMENTED: Status = Status { code: 501, reason: "Not Implemented" };
}

struct Outcome {
    status: Status,
    delivery: Option<(ClientCallback, EventNotification)>,
}

impl Outcome {
    fn reply(status: Status) -> Self {
        Self { status, delivery: None }
    }
}

#[derive(Debug)]
struct Request {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Request {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

enum RequestError {
    Io(io::Error),
    Status(Status),
}

impl From<io::Error> for RequestError {
    fn from(err: io::Error) -> Self {
        RequestError::Io(err)
    }
}

fn read_request(stream: &mut impl Read, max_body: usize) -> std::result::Result<Request, RequestError> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Err(RequestError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before request head",
            )));
        }
        buf.extend_from_slice(&chunk[..n]);

        let mut headers = [httparse::EMPTY_HEADER; 32];
        let mut parsed = httparse::Request::new(&mut headers);
        let head_len = match parsed.parse(&buf) {
            Ok(httparse::Status::Complete(len)) => len,
            Ok(httparse::Status::Partial) if buf.len() < MAX_HEAD => continue,
            Ok(httparse::Status::Partial) | Err(_) => {
                return Err(RequestError::Status(Status::BAD_REQUEST))
            }
        };

        let method = parsed.method.unwrap_or_default().to_ascii_uppercase();
        let path = parsed.path.unwrap_or_default().to_string();
        let headers: Vec<(String, String)> = parsed
            .headers
            .iter()
            .map(|h| {
                (
                    h.name.to_string(),
                    String::from_utf8_lossy(h.value).trim().to_string(),
                )
            })
            .collect();

        let mut request = Request {
            method,
            path,
            headers,
            body: Vec::new(),
        };

        if request.method == "NOTIFY" {
            let length = request
                .header("Content-Length")
                .ok_or(RequestError::Status(Status::LENGTH_REQUIRED))?
                .parse::<usize>()
                .map_err(|_| RequestError::Status(Status::BAD_REQUEST))?;
            if length > max_body {
                return Err(RequestError::Status(Status::PAYLOAD_TOO_LARGE));
            }

            let mut body = buf.split_off(head_len);
            body.truncate(length);
            if body.len() < length {
                let already = body.len();
                body.resize(length, 0);
                stream.read_exact(&mut body[already..])?;
            }
            request.body = body;
        }

        return Ok(request);
    }
}

fn route_notify<F>(request: Request, lookup: &F) -> Outcome
where
    F: Fn(&str, u32) -> Option<ClientCallback>,
{
    let (Some(nt), Some(nts)) = (request.header("NT"), request.header("NTS")) else {
        return Outcome::reply(Status::BAD_REQUEST);
    };
    if nt != "upnp:event" || nts != "upnp:propchange" {
        return Outcome::reply(Status::PRECONDITION_FAILED);
    }
    let Some(sid) = request.header("SID").filter(|s| !s.is_empty()) else {
        return Outcome::reply(Status::PRECONDITION_FAILED);
    };

    let event_key = request
        .header("SEQ")
        .and_then(|seq| seq.parse::<u32>().ok())
        .unwrap_or(0);

    let Some(callback) = lookup(sid, event_key) else {
        tracing::debug!(%sid, event_key, "NOTIFY for unknown subscription");
        return Outcome::reply(Status::PRECONDITION_FAILED);
    };

    let body = String::from_utf8_lossy(&request.body);
    match parse_property_set(&body) {
        Ok(changed_variables) => Outcome {
            status: Status::OK,
            delivery: Some((
                callback,
                EventNotification {
                    sid: sid.to_string(),
                    event_key,
                    changed_variables,
                },
            )),
        },
        Err(e) => {
            tracing::warn!(%sid, "Malformed property set: {}", e);
            Outcome::reply(Status::BAD_REQUEST)
        }
    }
}

/// Extract `(variable, value)` pairs from a GENA `propertyset` document
pub(crate) fn parse_property_set(xml: &str) -> std::result::Result<Vec<(String, String)>, String> {
    let root = Element::parse(xml.as_bytes()).map_err(|e| e.to_string())?;
    if root.name != "propertyset" {
        return Err(format!("unexpected root element {}", root.name));
    }

    let variables = root
        .children
        .iter()
        .filter_map(XMLNode::as_element)
        .filter(|property| property.name == "property")
        .flat_map(|property| property.children.iter().filter_map(XMLNode::as_element))
        .map(|variable| {
            let value = variable
                .get_text()
                .map(|t| t.trim().to_string())
                .unwrap_or_default();
            (variable.name.clone(), value)
        })
        .collect();

    Ok(variables)
}
