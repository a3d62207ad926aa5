//! Per-connection session state.
//!
//! A `Session` is the data half of a connection: the parse state for
//! the inbound message, the outbound byte queue, and the counters the
//! dispatcher consults. The I/O half lives in [`crate::proto::conn`],
//! and the transitions between the two are decided by
//! [`crate::proto::flow`].

use std::collections::VecDeque;

use bytes::Bytes;
use tracing::info;

use crate::header::{HeaderMap, HeaderParser};
use crate::negotiate;
use crate::proto::line::{RequestLine, StatusLine};
use crate::status::reason;

/// Where a session currently is in its message exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Server: waiting for a request line.
    Request,
    /// Client: waiting for a status line.
    Status,
    /// Absorbing header lines.
    Header,
    /// Reading the declared message body.
    Content,
    /// A complete message is being dispatched.
    Processing,
    /// A protocol error reply is draining.
    Error,
    /// Terminal; no further I/O is started.
    Shutdown,
}

/// Per-connection state for one HTTP/1.1 session.
#[derive(Debug)]
pub struct Session {
    pub(crate) phase: Phase,
    /// The inbound request line (server role).
    pub request: RequestLine,
    /// The inbound status line (client role).
    pub status: StatusLine,
    /// Inbound header block, possibly still incomplete.
    pub inbound: HeaderParser,
    /// Body bytes received so far.
    pub content: Vec<u8>,
    /// Declared `Content-Length`; 0 if absent.
    pub(crate) content_length: usize,
    /// Headers accumulated for the next server reply.
    pub outbound: HeaderMap,
    /// Chosen value per negotiated request header.
    pub negotiated: HeaderMap,
    outbound_queue: VecDeque<Bytes>,
    pub(crate) close_after_send: bool,
    requests: u64,
    replies: u64,
    errors: u64,
    pub(crate) free: bool,
    peer: String,
}

impl Session {
    /// Creates a session for a server-role connection.
    pub fn server(peer: impl Into<String>) -> Session {
        Session::new(Phase::Request, peer)
    }

    /// Creates a session for a client-role connection.
    pub fn client(peer: impl Into<String>) -> Session {
        Session::new(Phase::Status, peer)
    }

    fn new(phase: Phase, peer: impl Into<String>) -> Session {
        Session {
            phase,
            request: RequestLine::default(),
            status: StatusLine::default(),
            inbound: HeaderParser::new(),
            content: Vec::new(),
            content_length: 0,
            outbound: HeaderMap::new(),
            negotiated: HeaderMap::new(),
            outbound_queue: VecDeque::new(),
            close_after_send: false,
            requests: 0,
            replies: 0,
            errors: 0,
            free: false,
            peer: peer.into(),
        }
    }

    /// The current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The peer label this session was constructed with.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Requests seen (server) or sent (client) on this session.
    pub fn requests(&self) -> u64 {
        self.requests
    }

    /// Replies enqueued on this session.
    pub fn replies(&self) -> u64 {
        self.replies
    }

    /// Transport and parse errors observed on this session.
    pub fn errors(&self) -> u64 {
        self.errors
    }

    /// Total number of messages that have passed through the session.
    ///
    /// The dispatcher samples this before and after invoking a handler
    /// to learn whether the handler replied.
    pub fn queries(&self) -> u64 {
        self.requests + self.replies
    }

    /// Declared body bytes not yet received.
    pub fn remaining(&self) -> usize {
        self.content_length.saturating_sub(self.content.len())
    }

    /// Whether the session has been recycled into a reusable state.
    pub fn is_free(&self) -> bool {
        self.free
    }

    pub(crate) fn bump_requests(&mut self) {
        self.requests += 1;
    }

    pub(crate) fn bump_errors(&mut self) {
        self.errors += 1;
    }

    pub(crate) fn queued_writes(&self) -> usize {
        self.outbound_queue.len()
    }

    pub(crate) fn pop_outbound(&mut self) -> Option<Bytes> {
        self.outbound_queue.pop_front()
    }

    /// Clears per-exchange state so the next message on the same
    /// connection starts from scratch. Counters and the outbound queue
    /// survive.
    pub(crate) fn reset_exchange(&mut self) {
        self.request = RequestLine::default();
        self.status = StatusLine::default();
        self.inbound.reset();
        self.content.clear();
        self.content_length = 0;
        self.negotiated = HeaderMap::new();
    }

    /// Runs content negotiation for every `(header, offers)` pair.
    ///
    /// The chosen value is recorded in [`Session::negotiated`], the
    /// header name is appended to the outbound `Vary`, and for
    /// `Accept` the choice also becomes the outbound `Content-Type`.
    /// Returns false if any pair produced no acceptable value.
    pub fn negotiate(&mut self, negotiations: &[(String, String)]) -> bool {
        let mut ok = true;
        for (header, offers) in negotiations {
            let client = self.inbound.headers.get(header).unwrap_or("");
            match negotiate::negotiate(client, offers) {
                Some(choice) => {
                    if header.eq_ignore_ascii_case("Accept") {
                        self.outbound.set("Content-Type", &choice);
                    }
                    self.negotiated.set(header, &choice);
                }
                None => ok = false,
            }
            self.outbound.append("Vary", header);
        }
        ok
    }

    /// True if `methods` contains anything beyond OPTIONS and TRACE,
    /// the methods that alone should not provoke a 405.
    pub fn trigger_405(methods: &[String]) -> bool {
        methods
            .iter()
            .any(|m| !m.eq_ignore_ascii_case("OPTIONS") && !m.eq_ignore_ascii_case("TRACE"))
    }

    /// Enqueues a reply with no headers beyond the computed ones.
    pub fn reply(&mut self, code: u16, body: impl AsRef<[u8]>) {
        self.reply_with(code, body.as_ref(), &HeaderMap::new());
    }

    /// Assembles and enqueues a reply.
    ///
    /// The effective header set is the session's outbound headers with
    /// `extra` layered on top, plus a computed `Content-Length`. The
    /// reply version is always HTTP/1.1. Codes of 400 and above force
    /// `Connection: close` and drain-then-close; interim and 204
    /// replies with an empty body omit `Content-Length`.
    pub fn reply_with(&mut self, code: u16, body: &[u8], extra: &HeaderMap) {
        let mut headers = self.outbound.clone();
        for (name, value) in extra.iter() {
            headers.set(name, value);
        }

        let headerless = (code < 200 || code == 204) && body.is_empty();
        if !headerless {
            let mut buf = itoa::Buffer::new();
            headers.set("Content-Length", buf.format(body.len()));
        }
        debug_assert!(
            !(code < 200 || code == 204) || body.is_empty(),
            "1xx and 204 replies must not carry a body",
        );

        if code >= 400 {
            headers.set("Connection", "close");
            self.close_after_send = true;
        } else if code >= 200 && self.wants_close() {
            headers.set("Connection", "close");
            self.close_after_send = true;
        }

        let mut wire = String::new();
        wire.push_str(&StatusLine::new(code).assemble());
        wire.push_str(&headers.assemble());
        wire.push_str("\r\n");
        let mut wire = wire.into_bytes();
        wire.extend_from_slice(body);

        self.outbound_queue.push_back(Bytes::from(wire));
        self.replies += 1;

        let line = self.log_message(code, body.len());
        info!(target: "httplet::access", peer = %self.peer, "{}", line);
    }

    /// Whether the inbound request asked for the connection to close.
    fn wants_close(&self) -> bool {
        self.inbound
            .headers
            .get("Connection")
            .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("close")))
            .unwrap_or(false)
    }

    /// Enqueues a canonical error reply.
    ///
    /// The body is a small markdown document built from the status
    /// code's reason phrase. A non-empty `allow` set is serialized as
    /// an `Allow` header, sorted case-insensitively.
    pub fn error_reply(&mut self, code: u16, allow: &[String]) {
        let mut extra = HeaderMap::new();
        extra.set("Content-Type", "text/markdown");
        if !allow.is_empty() {
            let mut methods: Vec<&str> = allow.iter().map(|s| s.as_str()).collect();
            methods.sort_by(|a, b| a.to_ascii_lowercase().cmp(&b.to_ascii_lowercase()));
            methods.dedup();
            extra.set("Allow", &methods.join(","));
        }
        let body = format!(
            "# {}\n\nAn error occurred while processing your request. That's all I know.\n",
            reason(code)
        );
        self.reply_with(code, body.as_bytes(), &extra);
    }

    /// Serializes and enqueues a client request; the assembler mirror
    /// of [`Session::reply_with`].
    pub fn enqueue_request(
        &mut self,
        method: &str,
        target: &str,
        headers: &HeaderMap,
        body: &[u8],
    ) {
        let line = RequestLine::new(method, target);

        let mut headers = headers.clone();
        headers.set_default("User-Agent", crate::IDENTIFIER);
        if !body.is_empty() {
            let mut buf = itoa::Buffer::new();
            headers.set("Content-Length", buf.format(body.len()));
        }

        let mut wire = String::new();
        wire.push_str(&line.assemble());
        wire.push_str(&headers.assemble());
        wire.push_str("\r\n");
        let mut wire = wire.into_bytes();
        wire.extend_from_slice(body);

        self.outbound_queue.push_back(Bytes::from(wire));
        self.requests += 1;
    }

    /// The canonical access-log record for one reply: JSON with keys
    /// in case-insensitively sorted order.
    pub fn log_message(&self, code: u16, length: usize) -> String {
        let mut map = serde_json::Map::new();
        map.insert("length".to_owned(), length.into());
        map.insert("method".to_owned(), self.request.method.clone().into());
        map.insert("protocol".to_owned(), self.request.protocol().into());
        map.insert(
            "resource".to_owned(),
            self.request.target.as_str().to_owned().into(),
        );
        map.insert("status".to_owned(), code.into());
        for name in &["user-agent", "referer"] {
            if let Some(value) = self.inbound.headers.get(name) {
                map.insert((*name).to_owned(), value.to_owned().into());
            }
        }
        serde_json::Value::Object(map).to_string()
    }
}
