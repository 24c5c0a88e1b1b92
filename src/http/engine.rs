//! Embedded non-blocking HTTP/1.1 engine.
//!
//! # Responsibilities
//! - Adopt sockets handed over by the demultiplexer
//! - Read and parse request heads without ever blocking the tick
//! - Dispatch each request exactly once through a [`RequestSink`]
//! - Write queued responses with partial-write tracking
//! - Keep-alive handling and idle-connection reaping
//!
//! The engine knows nothing about handles, plugins, or fixed pages;
//! everything above the wire lives behind the sink.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::unix::fs::FileExt;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Buf, Bytes, BytesMut};

use crate::config::schema::HttpConfig;
use crate::http::response::{OutboundResponse, ResponseBody};

/// Global atomic counter for connection IDs.
/// Relaxed ordering is sufficient since we only need uniqueness.
static CONN_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for an engine connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(u64);

impl ConnId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONN_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Upward interface from the engine to the resource layer.
///
/// `on_connection_start` and `on_connection_end` are called exactly once
/// per connection. `on_request` is called once per parsed request; the
/// response arrives later through `take_response`, polled every tick
/// while the connection awaits one.
pub trait RequestSink {
    fn on_connection_start(&mut self, conn: ConnId, peer: SocketAddr);
    fn on_connection_end(&mut self, conn: ConnId);
    fn on_request(&mut self, conn: ConnId, method: &str, url: &str);
    fn take_response(&mut self, conn: ConnId) -> Option<OutboundResponse>;
}

const MAX_HEADERS: usize = 32;
const READ_CHUNK: usize = 4096;
const FILE_CHUNK: usize = 8192;

/// Per-connection protocol position.
#[derive(Debug)]
enum ConnState {
    /// Accumulating the request line and headers.
    ReadingHead,
    /// Discarding a request body we do not route.
    DrainingBody { remaining: u64 },
    /// Request dispatched; waiting for the sink to produce a response.
    AwaitingResponse,
    /// Writing a response to the socket.
    Writing(WriteState),
}

#[derive(Debug)]
struct WriteState {
    head: Bytes,
    head_sent: usize,
    body: ResponseBody,
    body_sent: u64,
}

struct EngineConnection {
    id: ConnId,
    stream: TcpStream,
    peer: SocketAddr,
    buf: BytesMut,
    state: ConnState,
    keep_alive: bool,
    idle_ticks: u32,
}

enum ReadOutcome {
    Data,
    WouldBlock,
    Closed,
    Failed(io::Error),
}

enum StepOutcome {
    Keep,
    Close,
}

/// The embedded HTTP server. Owns every adopted connection.
pub struct HttpEngine {
    config: HttpConfig,
    connections: Vec<EngineConnection>,
}

impl HttpEngine {
    pub fn new(config: HttpConfig) -> Self {
        Self {
            config,
            connections: Vec::new(),
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Register a demultiplexed socket as a new HTTP connection. The
    /// socket arrives tuned and non-blocking with its byte stream
    /// untouched.
    pub fn adopt(&mut self, stream: TcpStream, peer: SocketAddr, sink: &mut dyn RequestSink) {
        if self.connections.len() >= self.config.max_connections {
            tracing::warn!(
                peer_addr = %peer,
                max_connections = self.config.max_connections,
                "Connection limit reached, dropping adopted socket"
            );
            return;
        }

        let id = ConnId::new();
        self.connections.push(EngineConnection {
            id,
            stream,
            peer,
            buf: BytesMut::with_capacity(READ_CHUNK),
            state: ConnState::ReadingHead,
            keep_alive: false,
            idle_ticks: 0,
        });

        tracing::debug!(connection_id = %id, peer_addr = %peer, "HTTP connection adopted");
        sink.on_connection_start(id, peer);
    }

    /// One iteration of engine work: progress every connection as far
    /// as its socket allows, then reap the finished ones. Scanned in
    /// reverse index order so removal stays cursor-safe.
    pub fn pump(&mut self, sink: &mut dyn RequestSink) {
        for i in (0..self.connections.len()).rev() {
            let outcome = {
                let conn = &mut self.connections[i];
                Self::step_connection(conn, &self.config, sink)
            };

            if matches!(outcome, StepOutcome::Close) {
                self.remove_connection(i, sink);
            }
        }
    }

    /// Close every connection, emitting end notifications. Teardown path.
    pub fn close_all(&mut self, sink: &mut dyn RequestSink) {
        for i in (0..self.connections.len()).rev() {
            self.remove_connection(i, sink);
        }
    }

    fn remove_connection(&mut self, index: usize, sink: &mut dyn RequestSink) {
        let conn = self.connections.remove(index);
        let _ = conn.stream.shutdown(Shutdown::Both);
        tracing::debug!(connection_id = %conn.id, peer_addr = %conn.peer, "HTTP connection closed");
        sink.on_connection_end(conn.id);
    }

    /// Advance one connection until its socket stalls. Returns whether
    /// the connection survives this tick.
    fn step_connection(
        conn: &mut EngineConnection,
        config: &HttpConfig,
        sink: &mut dyn RequestSink,
    ) -> StepOutcome {
        let mut made_progress = false;
        let mut progressed = true;

        while progressed {
            progressed = false;

            match conn.state {
                ConnState::ReadingHead => {
                    match read_into_buffer(conn) {
                        ReadOutcome::Data => progressed = true,
                        ReadOutcome::WouldBlock => {}
                        ReadOutcome::Closed => return StepOutcome::Close,
                        ReadOutcome::Failed(e) => {
                            tracing::debug!(connection_id = %conn.id, error = %e, "HTTP read error");
                            return StepOutcome::Close;
                        }
                    }

                    match parse_head(&conn.buf) {
                        HeadOutcome::Incomplete => {
                            if conn.buf.len() > config.max_header_bytes {
                                tracing::warn!(
                                    connection_id = %conn.id,
                                    peer_addr = %conn.peer,
                                    "Request head exceeds size budget"
                                );
                                write_bare_error(conn, 431, "Request Header Fields Too Large");
                                return StepOutcome::Close;
                            }
                        }
                        HeadOutcome::Malformed(reason) => {
                            tracing::warn!(
                                connection_id = %conn.id,
                                peer_addr = %conn.peer,
                                reason,
                                "Malformed HTTP request"
                            );
                            write_bare_error(conn, 400, "Bad Request");
                            return StepOutcome::Close;
                        }
                        HeadOutcome::Request(head) => {
                            if head.consumed > config.max_header_bytes {
                                tracing::warn!(
                                    connection_id = %conn.id,
                                    peer_addr = %conn.peer,
                                    "Request head exceeds size budget"
                                );
                                write_bare_error(conn, 431, "Request Header Fields Too Large");
                                return StepOutcome::Close;
                            }
                            conn.buf.advance(head.consumed);
                            conn.keep_alive = head.keep_alive;

                            tracing::debug!(
                                connection_id = %conn.id,
                                method = %head.method,
                                url = %head.url,
                                "HTTP request received"
                            );
                            sink.on_request(conn.id, &head.method, &head.url);

                            conn.state = if head.content_length > 0 {
                                ConnState::DrainingBody {
                                    remaining: head.content_length,
                                }
                            } else {
                                ConnState::AwaitingResponse
                            };
                            progressed = true;
                        }
                    }
                }

                ConnState::DrainingBody { remaining } => {
                    let mut remaining = remaining;

                    let buffered = remaining.min(conn.buf.len() as u64);
                    if buffered > 0 {
                        conn.buf.advance(buffered as usize);
                        remaining -= buffered;
                        progressed = true;
                    }

                    if remaining > 0 {
                        match read_into_buffer(conn) {
                            ReadOutcome::Data => progressed = true,
                            ReadOutcome::WouldBlock => {}
                            ReadOutcome::Closed => return StepOutcome::Close,
                            ReadOutcome::Failed(e) => {
                                tracing::debug!(connection_id = %conn.id, error = %e, "HTTP read error");
                                return StepOutcome::Close;
                            }
                        }
                    }

                    conn.state = if remaining == 0 {
                        progressed = true;
                        ConnState::AwaitingResponse
                    } else {
                        ConnState::DrainingBody { remaining }
                    };
                }

                ConnState::AwaitingResponse => {
                    if let Some(outbound) = sink.take_response(conn.id) {
                        let head = render_head(&outbound, conn.keep_alive, &config.server_header);
                        conn.state = ConnState::Writing(WriteState {
                            head,
                            head_sent: 0,
                            body: outbound.body,
                            body_sent: 0,
                        });
                        progressed = true;
                    }
                }

                ConnState::Writing(ref mut write) => match write_progress(&mut conn.stream, write) {
                    WriteOutcome::Done => {
                        if conn.keep_alive {
                            conn.state = ConnState::ReadingHead;
                            progressed = true;
                        } else {
                            return StepOutcome::Close;
                        }
                    }
                    WriteOutcome::Stalled(wrote_any) => {
                        if wrote_any {
                            made_progress = true;
                        }
                    }
                    WriteOutcome::Failed(e) => {
                        tracing::debug!(connection_id = %conn.id, error = %e, "HTTP write error");
                        return StepOutcome::Close;
                    }
                },
            }

            if progressed {
                made_progress = true;
            }
        }

        if made_progress {
            conn.idle_ticks = 0;
        } else {
            conn.idle_ticks += 1;
            if config.idle_timeout_ticks > 0 && conn.idle_ticks > config.idle_timeout_ticks {
                tracing::debug!(
                    connection_id = %conn.id,
                    peer_addr = %conn.peer,
                    "HTTP connection idle timeout"
                );
                return StepOutcome::Close;
            }
        }

        StepOutcome::Keep
    }
}

/// A parsed request head.
struct ParsedHead {
    method: String,
    url: String,
    content_length: u64,
    keep_alive: bool,
    consumed: usize,
}

enum HeadOutcome {
    Incomplete,
    Malformed(&'static str),
    Request(ParsedHead),
}

fn parse_head(buf: &[u8]) -> HeadOutcome {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut request = httparse::Request::new(&mut headers);

    let consumed = match request.parse(buf) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => return HeadOutcome::Incomplete,
        Err(_) => return HeadOutcome::Malformed("unparseable request head"),
    };

    let method = match request.method {
        Some(m) => m.to_string(),
        None => return HeadOutcome::Malformed("missing method"),
    };
    let url = match request.path {
        Some(p) => p.to_string(),
        None => return HeadOutcome::Malformed("missing url"),
    };
    let version = request.version.unwrap_or(1);

    let mut content_length = 0u64;
    let mut connection_close = false;
    let mut connection_keep_alive = false;

    for header in request.headers.iter() {
        if header.name.eq_ignore_ascii_case("content-length") {
            let value = std::str::from_utf8(header.value).unwrap_or("");
            content_length = match value.trim().parse() {
                Ok(n) => n,
                Err(_) => return HeadOutcome::Malformed("bad content-length"),
            };
        } else if header.name.eq_ignore_ascii_case("transfer-encoding") {
            // The single-handler surface never routes bodies, so the
            // engine does not implement chunked framing.
            return HeadOutcome::Malformed("chunked bodies unsupported");
        } else if header.name.eq_ignore_ascii_case("connection") {
            let value = std::str::from_utf8(header.value).unwrap_or("");
            if value.eq_ignore_ascii_case("close") {
                connection_close = true;
            } else if value.eq_ignore_ascii_case("keep-alive") {
                connection_keep_alive = true;
            }
        }
    }

    let keep_alive = match version {
        0 => connection_keep_alive,
        _ => !connection_close,
    };

    HeadOutcome::Request(ParsedHead {
        method,
        url,
        content_length,
        keep_alive,
        consumed,
    })
}

fn read_into_buffer(conn: &mut EngineConnection) -> ReadOutcome {
    let mut chunk = [0u8; READ_CHUNK];
    match conn.stream.read(&mut chunk) {
        Ok(0) => ReadOutcome::Closed,
        Ok(n) => {
            conn.buf.extend_from_slice(&chunk[..n]);
            ReadOutcome::Data
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => ReadOutcome::WouldBlock,
        Err(e) if e.kind() == io::ErrorKind::Interrupted => ReadOutcome::WouldBlock,
        Err(e) => ReadOutcome::Failed(e),
    }
}

enum WriteOutcome {
    Done,
    /// Socket buffer full; true when at least some bytes went out.
    Stalled(bool),
    Failed(io::Error),
}

fn write_progress(stream: &mut TcpStream, write: &mut WriteState) -> WriteOutcome {
    let mut wrote_any = false;

    while write.head_sent < write.head.len() {
        match stream.write(&write.head[write.head_sent..]) {
            Ok(0) => return WriteOutcome::Failed(io::ErrorKind::WriteZero.into()),
            Ok(n) => {
                write.head_sent += n;
                wrote_any = true;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                return WriteOutcome::Stalled(wrote_any)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return WriteOutcome::Failed(e),
        }
    }

    loop {
        match &write.body {
            ResponseBody::Buffer(bytes) => {
                if write.body_sent >= bytes.len() as u64 {
                    return WriteOutcome::Done;
                }
                match stream.write(&bytes[write.body_sent as usize..]) {
                    Ok(0) => return WriteOutcome::Failed(io::ErrorKind::WriteZero.into()),
                    Ok(n) => {
                        write.body_sent += n as u64;
                        wrote_any = true;
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        return WriteOutcome::Stalled(wrote_any)
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => return WriteOutcome::Failed(e),
                }
            }
            ResponseBody::File { file, len } => {
                if write.body_sent >= *len {
                    return WriteOutcome::Done;
                }
                let want = (*len - write.body_sent).min(FILE_CHUNK as u64) as usize;
                let mut chunk = [0u8; FILE_CHUNK];
                let read = match file.read_at(&mut chunk[..want], write.body_sent) {
                    Ok(0) => return WriteOutcome::Failed(io::ErrorKind::UnexpectedEof.into()),
                    Ok(n) => n,
                    Err(e) => return WriteOutcome::Failed(e),
                };
                match stream.write(&chunk[..read]) {
                    Ok(0) => return WriteOutcome::Failed(io::ErrorKind::WriteZero.into()),
                    Ok(n) => {
                        // A short write is fine: the next attempt
                        // re-reads from the advanced offset.
                        write.body_sent += n as u64;
                        wrote_any = true;
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        return WriteOutcome::Stalled(wrote_any)
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => return WriteOutcome::Failed(e),
                }
            }
        }
    }
}

/// Best-effort one-shot error reply for protocol violations. The
/// connection closes right after, so a short write is tolerated.
fn write_bare_error(conn: &mut EngineConnection, status: u16, reason: &str) {
    let reply = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        status, reason
    );
    let _ = conn.stream.write(reply.as_bytes());
}

fn render_head(outbound: &OutboundResponse, keep_alive: bool, server_header: &str) -> Bytes {
    let mut head = String::with_capacity(256);
    head.push_str(&format!(
        "HTTP/1.1 {} {}\r\n",
        outbound.status,
        status_text(outbound.status)
    ));
    if !server_header.is_empty() {
        head.push_str(&format!("Server: {}\r\n", server_header));
    }
    head.push_str(&format!("Content-Length: {}\r\n", outbound.body.len()));
    head.push_str(if keep_alive {
        "Connection: keep-alive\r\n"
    } else {
        "Connection: close\r\n"
    });
    for (name, value) in &outbound.headers {
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    head.push_str("\r\n");
    Bytes::from(head.into_bytes())
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "OK",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::response::ResponseData;
    use std::collections::HashMap;
    use std::net::TcpListener;
    use std::time::Duration;

    #[test]
    fn connection_id_unique() {
        let id1 = ConnId::new();
        let id2 = ConnId::new();
        assert_ne!(id1, id2);
    }

    /// Sink that answers every request with a canned response.
    #[derive(Default)]
    struct CannedSink {
        started: Vec<ConnId>,
        ended: Vec<ConnId>,
        requests: Vec<(ConnId, String, String)>,
        outbox: HashMap<ConnId, OutboundResponse>,
        reply_status: u16,
        reply_body: &'static str,
    }

    impl RequestSink for CannedSink {
        fn on_connection_start(&mut self, conn: ConnId, _peer: SocketAddr) {
            self.started.push(conn);
        }

        fn on_connection_end(&mut self, conn: ConnId) {
            self.ended.push(conn);
        }

        fn on_request(&mut self, conn: ConnId, method: &str, url: &str) {
            self.requests.push((conn, method.to_string(), url.to_string()));
            let response = ResponseData::from_string(self.reply_body);
            self.outbox.insert(conn, response.to_outbound(self.reply_status));
        }

        fn take_response(&mut self, conn: ConnId) -> Option<OutboundResponse> {
            self.outbox.remove(&conn)
        }
    }

    fn adopted_pair(engine: &mut HttpEngine, sink: &mut CannedSink) -> TcpStream {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, peer) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        engine.adopt(server, peer, sink);
        client
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();
        client
    }

    fn read_reply(client: &mut TcpStream, engine: &mut HttpEngine, sink: &mut CannedSink) -> String {
        let mut collected = Vec::new();
        let mut chunk = [0u8; 1024];
        for _ in 0..100 {
            engine.pump(sink);
            match client.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    collected.extend_from_slice(&chunk[..n]);
                    if collected.windows(4).any(|w| w == b"\r\n\r\n") {
                        // Head complete; a couple more pumps flush the body.
                        engine.pump(sink);
                        if let Ok(n) = client.read(&mut chunk) {
                            collected.extend_from_slice(&chunk[..n]);
                        }
                        break;
                    }
                }
                Err(_) => {}
            }
        }
        String::from_utf8_lossy(&collected).to_string()
    }

    #[test]
    fn request_is_dispatched_and_answered() {
        let mut engine = HttpEngine::new(HttpConfig::default());
        let mut sink = CannedSink {
            reply_status: 200,
            reply_body: "ok",
            ..Default::default()
        };
        let mut client = adopted_pair(&mut engine, &mut sink);
        assert_eq!(sink.started.len(), 1);

        client
            .write_all(b"GET /hello HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
            .unwrap();

        let reply = read_reply(&mut client, &mut engine, &mut sink);
        assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"), "reply: {reply}");
        assert!(reply.ends_with("ok"), "reply: {reply}");

        assert_eq!(sink.requests.len(), 1);
        assert_eq!(sink.requests[0].1, "GET");
        assert_eq!(sink.requests[0].2, "/hello");

        // Connection: close means the engine reaps the connection.
        engine.pump(&mut sink);
        assert_eq!(sink.ended.len(), 1);
        assert_eq!(engine.connection_count(), 0);
    }

    #[test]
    fn keep_alive_serves_sequential_requests() {
        let mut engine = HttpEngine::new(HttpConfig::default());
        let mut sink = CannedSink {
            reply_status: 200,
            reply_body: "first",
            ..Default::default()
        };
        let mut client = adopted_pair(&mut engine, &mut sink);

        client
            .write_all(b"GET /a HTTP/1.1\r\nHost: x\r\n\r\n")
            .unwrap();
        let reply = read_reply(&mut client, &mut engine, &mut sink);
        assert!(reply.contains("Connection: keep-alive"), "reply: {reply}");
        assert_eq!(engine.connection_count(), 1);

        sink.reply_body = "second";
        client
            .write_all(b"GET /b HTTP/1.1\r\nHost: x\r\n\r\n")
            .unwrap();
        let reply = read_reply(&mut client, &mut engine, &mut sink);
        assert!(reply.ends_with("second"), "reply: {reply}");
        assert_eq!(sink.requests.len(), 2);
    }

    #[test]
    fn adoption_respects_connection_limit() {
        let config = HttpConfig {
            max_connections: 1,
            ..Default::default()
        };
        let mut engine = HttpEngine::new(config);
        let mut sink = CannedSink::default();

        let _first = adopted_pair(&mut engine, &mut sink);
        let _second = adopted_pair(&mut engine, &mut sink);

        assert_eq!(engine.connection_count(), 1);
        assert_eq!(sink.started.len(), 1);
    }

    #[test]
    fn oversized_head_is_rejected() {
        let config = HttpConfig {
            max_header_bytes: 512,
            ..Default::default()
        };
        let mut engine = HttpEngine::new(config);
        let mut sink = CannedSink::default();
        let mut client = adopted_pair(&mut engine, &mut sink);

        let huge = format!("GET / HTTP/1.1\r\nX-Pad: {}\r\n\r\n", "a".repeat(2048));
        client.write_all(huge.as_bytes()).unwrap();

        let reply = read_reply(&mut client, &mut engine, &mut sink);
        assert!(reply.starts_with("HTTP/1.1 431"), "reply: {reply}");
        assert!(sink.requests.is_empty());
    }
}
