//! HTTP packet model and incremental framing (C8), plus the HTTP server/
//! client wrappers that drive a framer from TCP events (C9).
//!
//! Grounded on `cnetpp::http::HttpPacket`/`HttpHeaders`
//! (`examples/original_source/src/cnetpp/http/http_packet.h`) for the data
//! model, and `cnetpp::http::HttpBase`
//! (`examples/original_source/src/cnetpp/http/http_base.h`) for the
//! `id -> HttpConnection` map pattern (mutex-guarded, built on a TCP
//! server/client rather than owning sockets itself).

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::config::{HttpOptions, TcpClientOptions, TcpServerOptions};
use crate::connection::{Callbacks, ConnectionId, StreamConnection};
use crate::error::{Error, Result};
use crate::tcp::{ConnectionHandle, TcpClient, TcpServer};

/// HTTP version, restricted to the three values the wire format actually
/// uses (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    /// `HTTP/0.9` — no headers, connection always closes after the body.
    Http09,
    /// `HTTP/1.0`.
    Http10,
    /// `HTTP/1.1` — default, keeps the connection alive unless told otherwise.
    Http11,
}

impl Version {
    fn as_str(self) -> &'static str {
        match self {
            Version::Http09 => "HTTP/0.9",
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "HTTP/0.9" => Some(Version::Http09),
            "HTTP/1.0" => Some(Version::Http10),
            "HTTP/1.1" => Some(Version::Http11),
            _ => None,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request methods the parser accepts (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Trace,
    Connect,
}

impl Method {
    fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Connect => "CONNECT",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::Get),
            "POST" => Some(Method::Post),
            "PUT" => Some(Method::Put),
            "DELETE" => Some(Method::Delete),
            "HEAD" => Some(Method::Head),
            "OPTIONS" => Some(Method::Options),
            "TRACE" => Some(Method::Trace),
            "CONNECT" => Some(Method::Connect),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ordered `(name, value)` header list: case-insensitive lookup,
/// duplicates preserved in insertion order, indexed access (spec §9
/// supplemented `GetAt`/`Count`/`Has`, grounded on `HttpHeaders`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    entries: Vec<(String, String)>,
}

impl HeaderList {
    /// An empty header list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the first header named `name` (case-insensitive), or
    /// append if absent.
    pub fn set(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            entry.1 = value.into();
        } else {
            self.entries.push((name.to_string(), value.into()));
        }
        self
    }

    /// Append a header, even if one with the same name already exists.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries.push((name.into(), value.into()));
        self
    }

    /// The first value for `name` (case-insensitive), if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `name`, in insertion order.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// `true` iff a header named `name` exists (case-insensitive).
    pub fn has(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Remove every header named `name`. Returns `true` if any were removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.entries.len() != before
    }

    /// Number of header entries (counting duplicates separately).
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// The `(name, value)` pair at `index`, in insertion order.
    pub fn get_at(&self, index: usize) -> Option<(&str, &str)> {
        self.entries.get(index).map(|(n, v)| (n.as_str(), v.as_str()))
    }

    fn append_to_string(&self, out: &mut String) {
        for (name, value) in &self.entries {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
    }
}

/// Request-specific fields (spec §3).
#[derive(Debug, Clone)]
pub struct RequestLine {
    pub method: Method,
    pub uri: String,
}

/// Response-specific fields (spec §3).
#[derive(Debug, Clone)]
pub struct StatusLine {
    pub status: u16,
}

/// The request/response half not carried by [`HttpPacket`]'s common fields.
#[derive(Debug, Clone)]
pub enum PacketKind {
    Request(RequestLine),
    Response(StatusLine),
}

/// An HTTP request or response: version, headers, body, plus the
/// request/response-specific start-line fields (spec §3).
#[derive(Debug, Clone)]
pub struct HttpPacket {
    pub version: Version,
    pub headers: HeaderList,
    pub body: Vec<u8>,
    pub kind: PacketKind,
}

impl HttpPacket {
    /// A request shell with placeholder method/uri, ready to be populated
    /// by the parser or built up by a client.
    pub fn new_request(method: Method, uri: impl Into<String>) -> Self {
        Self {
            version: Version::Http11,
            headers: HeaderList::new(),
            body: Vec::new(),
            kind: PacketKind::Request(RequestLine {
                method,
                uri: uri.into(),
            }),
        }
    }

    /// A response shell with the given status, ready to be populated by
    /// the parser or built up by a server.
    pub fn new_response(status: u16) -> Self {
        Self {
            version: Version::Http11,
            headers: HeaderList::new(),
            body: Vec::new(),
            kind: PacketKind::Response(StatusLine { status }),
        }
    }

    /// `Content-Length`, parsed from the headers if present.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("Content-Length")?.trim().parse().ok()
    }

    /// `true` iff `Transfer-Encoding: chunked` is present.
    pub fn is_chunked(&self) -> bool {
        self.headers
            .get("Transfer-Encoding")
            .map(|v| v.eq_ignore_ascii_case("chunked"))
            .unwrap_or(false)
    }

    /// Whether the connection should stay open after this packet (spec
    /// §4.8.2): false iff the version is below 1.1 and no
    /// `Connection: keep-alive` header is present, or a `Connection: close`
    /// header is present.
    pub fn keep_alive(&self) -> bool {
        if let Some(v) = self.headers.get("Connection") {
            if v.eq_ignore_ascii_case("close") {
                return false;
            }
            if v.eq_ignore_ascii_case("keep-alive") {
                return true;
            }
        }
        self.version == Version::Http11
    }

    fn start_line(&self) -> String {
        match &self.kind {
            PacketKind::Request(r) => format!("{} {} {}", r.method, r.uri, self.version),
            PacketKind::Response(s) => {
                format!("{} {} {}", self.version, s.status, reason_phrase(s.status))
            }
        }
    }

    /// Serialize to the wire format (spec §4.8.1): start-line, headers,
    /// blank line, body verbatim.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.start_line();
        out.push_str("\r\n");
        self.headers.append_to_string(&mut out);
        out.push_str("\r\n");
        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }

    fn start_line_is_request(line: &str) -> Option<(Method, String, Version)> {
        let mut parts = line.splitn(3, ' ');
        let method = Method::parse(parts.next()?)?;
        let uri = parts.next()?.to_string();
        let version = Version::parse(parts.next()?)?;
        Some((method, uri, version))
    }

    fn start_line_is_response(line: &str) -> Option<(Version, u16)> {
        let mut parts = line.splitn(3, ' ');
        let version = Version::parse(parts.next()?)?;
        let status: u16 = parts.next()?.parse().ok()?;
        let _reason = parts.next();
        Some((version, status))
    }

    /// Parse a start-line plus header block (without the trailing blank
    /// line) into a fresh packet, inferring request vs response from the
    /// first token. Returns a [`Error::Protocol`] for anything the parser
    /// can't make sense of (spec §4.8.3).
    fn parse_headers(block: &str) -> Result<Self> {
        let mut lines = block.split("\r\n");
        let start = lines
            .next()
            .ok_or_else(|| Error::protocol("empty header block"))?;

        let mut packet = if let Some((method, uri, version)) = Self::start_line_is_request(start) {
            let mut p = HttpPacket::new_request(method, uri);
            p.version = version;
            p
        } else if let Some((version, status)) = Self::start_line_is_response(start) {
            let mut p = HttpPacket::new_response(status);
            p.version = version;
            p
        } else {
            return Err(Error::protocol(format!("malformed start line: {start:?}")));
        };

        for line in lines {
            if line.is_empty() {
                continue;
            }
            match line.split_once(':') {
                Some((name, value)) => {
                    packet.headers.add(name.trim(), value.trim());
                }
                None => return Err(Error::protocol(format!("malformed header line: {line:?}"))),
            }
        }
        Ok(packet)
    }
}

/// Status code → reason phrase, the common IANA-registered subset
/// (100-101, 200-206, 300-307, 400-417, 500-505) per SPEC_FULL §9 — not the
/// full registry, since the spec only asks for a static table.
fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        305 => "Use Proxy",
        307 => "Temporary Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        416 => "Range Not Satisfiable",
        417 => "Expectation Failed",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        _ => "Unknown",
    }
}

/// Framing state machine driven by each `received` event (spec §4.8.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FramerState {
    WaitingHeaders,
    WaitingBody,
    WaitingChunkSize,
    WaitingChunkData { remaining: usize },
    WaitingChunkTrailer,
}

/// The incremental HTTP decoder attached to one HTTP connection.
pub struct Framer {
    state: FramerState,
    packet: Option<HttpPacket>,
    body: Vec<u8>,
    /// Hard ceiling on an assembling body (spec §9 supplemented feature,
    /// `HttpOptions::max_body_size`). `0` disables the check.
    max_body_size: usize,
}

impl Framer {
    /// A framer primed to wait for the first start line, sized per
    /// `options`.
    pub fn new(options: &HttpOptions) -> Self {
        Self {
            state: FramerState::WaitingHeaders,
            packet: None,
            body: Vec::with_capacity(options.initial_body_capacity),
            max_body_size: options.max_body_size,
        }
    }

    fn exceeds_max_body(&self, candidate_len: usize) -> bool {
        self.max_body_size != 0 && candidate_len > self.max_body_size
    }

    /// Drive the state machine over whatever bytes are newly readable in
    /// `recv_buffer`, invoking `on_complete` once per fully assembled
    /// packet. Runs until the buffer is starved or framing fails. A
    /// protocol error aborts framing and is returned to the caller, which
    /// per spec §4.8.3 should schedule a hard close.
    pub fn drive(
        &mut self,
        recv_buffer: &mut crate::ring_buffer::RingBuffer,
        mut on_complete: impl FnMut(HttpPacket),
    ) -> Result<()> {
        loop {
            match self.state {
                FramerState::WaitingHeaders => {
                    let header_block_len = match recv_buffer.find(b"\r\n\r\n") {
                        Some(prefix) => prefix.len(),
                        None => return Ok(()),
                    };
                    let block = recv_buffer
                        .read(header_block_len)
                        .expect("find() guarantees this many bytes are readable");
                    recv_buffer
                        .read(4)
                        .expect("the 4-byte \\r\\n\\r\\n terminator found by find()");
                    let block_str = String::from_utf8(block)
                        .map_err(|e| Error::protocol(format!("non-UTF-8 header block: {e}")))?;
                    let packet = HttpPacket::parse_headers(&block_str)?;
                    self.packet = Some(packet);
                    self.body.clear();
                    self.state = FramerState::WaitingBody;
                }
                FramerState::WaitingBody => {
                    let packet = self.packet.as_ref().expect("set entering WaitingBody");
                    if let Some(cl) = packet.content_length() {
                        if self.exceeds_max_body(cl) {
                            return Err(Error::protocol(format!(
                                "Content-Length {cl} exceeds max_body_size {}",
                                self.max_body_size
                            )));
                        }
                        if recv_buffer.len() < cl {
                            return Ok(());
                        }
                        self.body = recv_buffer.read(cl).expect("length checked above");
                        self.finish_packet(&mut on_complete);
                    } else if packet.is_chunked() {
                        self.state = FramerState::WaitingChunkSize;
                    } else {
                        self.finish_packet(&mut on_complete);
                    }
                }
                FramerState::WaitingChunkSize => {
                    let line_len = match recv_buffer.find(b"\r\n") {
                        Some(prefix) => prefix.len(),
                        None => return Ok(()),
                    };
                    let line = recv_buffer.read(line_len).expect("found above");
                    recv_buffer.read(2).expect("the \\r\\n terminator found above");
                    let line_str = std::str::from_utf8(&line)
                        .map_err(|e| Error::protocol(format!("non-UTF-8 chunk size: {e}")))?;
                    let size = usize::from_str_radix(line_str.trim(), 16)
                        .map_err(|e| Error::protocol(format!("bad chunk size {line_str:?}: {e}")))?;
                    self.state = if size == 0 {
                        FramerState::WaitingChunkTrailer
                    } else {
                        FramerState::WaitingChunkData { remaining: size }
                    };
                }
                FramerState::WaitingChunkData { remaining } => {
                    if self.exceeds_max_body(self.body.len() + remaining) {
                        return Err(Error::protocol(format!(
                            "chunked body exceeds max_body_size {}",
                            self.max_body_size
                        )));
                    }
                    if recv_buffer.len() < remaining + 2 {
                        return Ok(());
                    }
                    let chunk = recv_buffer.read(remaining).expect("length checked above");
                    recv_buffer
                        .read(2)
                        .expect("the chunk's trailing \\r\\n, length checked above");
                    self.body.extend_from_slice(&chunk);
                    self.state = FramerState::WaitingChunkSize;
                }
                FramerState::WaitingChunkTrailer => {
                    let trailer_len = match recv_buffer.find(b"\r\n") {
                        Some(prefix) => prefix.len(),
                        None => return Ok(()),
                    };
                    recv_buffer.read(trailer_len).expect("found above");
                    recv_buffer.read(2).expect("the \\r\\n terminator found above");
                    self.finish_packet(&mut on_complete);
                }
            }
        }
    }

    fn finish_packet(&mut self, on_complete: &mut impl FnMut(HttpPacket)) {
        let mut packet = self.packet.take().expect("set entering WaitingBody");
        packet.body = std::mem::take(&mut self.body);
        on_complete(packet);
        self.state = FramerState::WaitingHeaders;
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new(&HttpOptions::default())
    }
}

/// One HTTP-level connection: the underlying TCP connection id, its
/// framer, and (for a client) the queue of requests awaiting a response.
struct HttpConnection {
    framer: Framer,
}

/// Callbacks at the HTTP level, mirroring [`Callbacks`] but operating on
/// assembled [`HttpPacket`]s instead of raw bytes.
#[derive(Clone)]
pub struct HttpCallbacks {
    /// Fires once a full request/response has been framed.
    pub received: Option<Arc<dyn Fn(ConnectionId, HttpPacket) -> bool + Send + Sync>>,
    /// Fires once, when the underlying TCP connection completes its
    /// handshake (or is accepted).
    pub connected: Option<Arc<dyn Fn(ConnectionId) -> bool + Send + Sync>>,
    /// Fires once, as the underlying TCP connection closes.
    pub closed: Option<Arc<dyn Fn(ConnectionId) + Send + Sync>>,
}

impl Default for HttpCallbacks {
    fn default() -> Self {
        Self {
            received: None,
            connected: None,
            closed: None,
        }
    }
}

/// Shared `id -> HttpConnection` map (spec §4.9), mutex-guarded since
/// shards with different ids reach it concurrently.
struct HttpConnectionMap {
    by_id: Mutex<HashMap<ConnectionId, HttpConnection>>,
    options: HttpOptions,
}

impl HttpConnectionMap {
    fn new(options: HttpOptions) -> Self {
        Self {
            by_id: Mutex::new(HashMap::new()),
            options,
        }
    }

    fn insert(&self, id: ConnectionId) {
        self.by_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                id,
                HttpConnection {
                    framer: Framer::new(&self.options),
                },
            );
    }

    fn remove(&self, id: ConnectionId) {
        self.by_id.lock().unwrap_or_else(|e| e.into_inner()).remove(&id);
    }

    fn with_framer<R>(&self, id: ConnectionId, f: impl FnOnce(&mut Framer) -> R) -> Option<R> {
        let mut guard = self.by_id.lock().unwrap_or_else(|e| e.into_inner());
        guard.get_mut(&id).map(|conn| f(&mut conn.framer))
    }
}

fn tcp_callbacks(http: Arc<HttpConnectionMap>, callbacks: HttpCallbacks) -> Callbacks {
    let map_connected = http.clone();
    let user_connected = callbacks.connected.clone();
    let connected = Arc::new(move |conn: &mut StreamConnection| -> bool {
        map_connected.insert(conn.id());
        match &user_connected {
            Some(cb) => cb(conn.id()),
            None => true,
        }
    });

    let map_received = http.clone();
    let user_received = callbacks.received.clone();
    let received = Arc::new(move |conn: &mut StreamConnection| -> bool {
        let id = conn.id();
        let mut rejected = false;
        let outcome = map_received.with_framer(id, |framer| {
            framer.drive(conn.recv_buffer_mut(), |packet| {
                if let Some(cb) = &user_received {
                    if !cb(id, packet) {
                        rejected = true;
                    }
                }
            })
        });
        if rejected {
            return false;
        }
        match outcome {
            Some(Ok(())) => true,
            Some(Err(e)) => {
                warn!(error = %e, "HTTP framing error, closing connection");
                false
            }
            None => true,
        }
    });

    let map_closed = http;
    let user_closed = callbacks.closed.clone();
    let closed = Arc::new(move |conn: &mut StreamConnection| -> bool {
        let id = conn.id();
        map_closed.remove(id);
        if let Some(cb) = &user_closed {
            cb(id);
        }
        true
    });

    Callbacks {
        connected: Some(connected),
        received: Some(received),
        sent: None,
        closed: Some(closed),
    }
}

/// An HTTP server: wraps a [`TcpServer`] and maintains the
/// `id -> HttpConnection` framing map (spec §4.9, C9).
pub struct HttpServer {
    tcp: TcpServer,
    options: HttpOptions,
}

impl HttpServer {
    /// Bind and start accepting HTTP connections.
    pub fn launch(
        center: Arc<crate::reactor::EventCenter>,
        local_endpoint: SocketAddr,
        tcp_options: TcpServerOptions,
        http_options: HttpOptions,
        callbacks: HttpCallbacks,
    ) -> Result<Self> {
        let http_map = Arc::new(HttpConnectionMap::new(http_options));
        let tcp = TcpServer::launch(center, local_endpoint, tcp_options, tcp_callbacks(http_map, callbacks))?;
        Ok(Self {
            tcp,
            options: http_options,
        })
    }

    /// The bound local address.
    pub fn local_endpoint(&self) -> SocketAddr {
        self.tcp.local_endpoint()
    }

    /// The options this server was launched with.
    pub fn options(&self) -> HttpOptions {
        self.options
    }

    /// Serialize `packet` and forward it to the TCP send path for `id`.
    pub fn send(&self, id: ConnectionId, packet: &HttpPacket) -> Result<()> {
        send_via(self.tcp.connection(id), packet)
    }

    /// Stop accepting new connections.
    pub fn shutdown(&self) -> Result<()> {
        self.tcp.shutdown()
    }
}

/// An HTTP client: wraps a [`TcpClient`] and maintains its own
/// `id -> HttpConnection` framing map (spec §4.9, C9).
pub struct HttpClient {
    tcp: TcpClient,
    options: HttpOptions,
}

impl HttpClient {
    /// Bind this client to an event center.
    pub fn new(center: Arc<crate::reactor::EventCenter>, http_options: HttpOptions) -> Self {
        Self {
            tcp: TcpClient::new(center),
            options: http_options,
        }
    }

    /// Connect to `remote_endpoint`; HTTP framing starts once the TCP
    /// handshake completes.
    pub fn connect(
        &self,
        remote_endpoint: SocketAddr,
        tcp_options: TcpClientOptions,
        callbacks: HttpCallbacks,
    ) -> ConnectionId {
        let http_map = Arc::new(HttpConnectionMap::new(self.options));
        self.tcp
            .connect(remote_endpoint, tcp_options, tcp_callbacks(http_map, callbacks))
    }

    /// Serialize `packet` and forward it to the TCP send path for `id`.
    pub fn send(&self, id: ConnectionId, packet: &HttpPacket) -> Result<()> {
        send_via(self.tcp.connection(id), packet)
    }

    /// Post a soft-remove for `id` to its owning shard.
    pub fn async_close(&self, id: ConnectionId) -> Result<()> {
        self.tcp.async_close(id)
    }
}

fn send_via(handle: Option<ConnectionHandle>, packet: &HttpPacket) -> Result<()> {
    match handle {
        Some(h) => h.send(&packet.to_bytes()),
        None => Err(Error::network("no live connection for this id")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring_buffer::RingBuffer;

    #[test]
    fn serializes_request_start_line_and_headers() {
        let mut req = HttpPacket::new_request(Method::Get, "/");
        req.headers.set("Host", "example.com");
        let bytes = req.to_bytes();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("GET / HTTP/1.1\r\n"));
        assert!(text.contains("Host: example.com\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn reason_phrase_known_and_unknown() {
        assert_eq!(reason_phrase(200), "OK");
        assert_eq!(reason_phrase(404), "Not Found");
        assert_eq!(reason_phrase(999), "Unknown");
    }

    fn drive_all(bytes: &[u8]) -> Vec<HttpPacket> {
        let mut buf = RingBuffer::new(bytes.len().max(16));
        assert!(buf.write(bytes));
        let mut framer = Framer::new(&HttpOptions::default());
        let mut out = Vec::new();
        framer.drive(&mut buf, |p| out.push(p)).unwrap();
        out
    }

    #[test]
    fn parses_chunked_response() {
        // S2.
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";
        let packets = drive_all(raw);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].body, b"Wikipedia");
        match &packets[0].kind {
            PacketKind::Response(s) => assert_eq!(s.status, 200),
            _ => panic!("expected response"),
        }
    }

    #[test]
    fn parses_content_length_response() {
        // S3.
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n1234567890";
        let packets = drive_all(raw);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].body, b"1234567890");
    }

    #[test]
    fn malformed_start_line_is_a_protocol_error() {
        let mut buf = RingBuffer::new(64);
        buf.write(b"not a start line\r\n\r\n");
        let mut framer = Framer::new(&HttpOptions::default());
        let result = framer.drive(&mut buf, |_| {});
        assert!(result.is_err());
    }

    #[test]
    fn content_length_over_max_body_size_is_a_protocol_error() {
        let mut buf = RingBuffer::new(64);
        buf.write(b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\n");
        let options = HttpOptions {
            max_body_size: 100,
            ..HttpOptions::default()
        };
        let mut framer = Framer::new(&options);
        let result = framer.drive(&mut buf, |_| {});
        assert!(result.is_err());
    }

    #[test]
    fn header_list_lookup_is_case_insensitive_and_preserves_duplicates() {
        let mut headers = HeaderList::new();
        headers.add("X-Foo", "1");
        headers.add("x-foo", "2");
        assert_eq!(headers.get("X-FOO"), Some("1"));
        assert_eq!(headers.get_all("x-foo"), vec!["1", "2"]);
        assert_eq!(headers.count(), 2);
        assert!(headers.has("x-foo"));
    }

    #[test]
    fn keep_alive_defaults_by_version() {
        let mut req10 = HttpPacket::new_request(Method::Get, "/");
        req10.version = Version::Http10;
        assert!(!req10.keep_alive());

        let req11 = HttpPacket::new_request(Method::Get, "/");
        assert!(req11.keep_alive());

        let mut closed = HttpPacket::new_request(Method::Get, "/");
        closed.headers.set("Connection", "close");
        assert!(!closed.keep_alive());
    }
}
