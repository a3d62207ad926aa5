//! The server role: servlet dispatch and method policing.

mod servlet;

pub use self::servlet::Servlet;

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tracing::{debug, trace};

use crate::proto::{Connection, Processor};
use crate::session::{Phase, Session};
use crate::Result;

/// The default cap on inbound message bodies: 12 MiB.
pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 12 * 1024 * 1024;

/// The method universe consulted when building `Allow` sets.
const KNOWN_METHODS: [&str; 9] = [
    "GET", "HEAD", "POST", "PUT", "DELETE", "OPTIONS", "TRACE", "CONNECT", "PATCH",
];

/// A server-role processor: owns a set of servlets and dispatches
/// complete requests to them.
///
/// Processors are explicit instances; two servers in one process keep
/// fully separate servlet sets.
#[derive(Debug)]
pub struct ServerProcessor {
    servlets: Mutex<Vec<Arc<Servlet>>>,
    max_content_length: usize,
}

impl Default for ServerProcessor {
    fn default() -> ServerProcessor {
        ServerProcessor::new()
    }
}

impl ServerProcessor {
    /// A processor with no servlets and the default body cap.
    pub fn new() -> ServerProcessor {
        ServerProcessor {
            servlets: Mutex::new(Vec::new()),
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
        }
    }

    /// Overrides the inbound body cap.
    pub fn max_content_length(mut self, bytes: usize) -> ServerProcessor {
        self.max_content_length = bytes;
        self
    }

    /// Adds a servlet to this processor's set. Dispatch considers
    /// servlets in registration order.
    pub fn register(&self, servlet: Servlet) -> &Self {
        self.servlets.lock().unwrap().push(Arc::new(servlet));
        self
    }

    /// Accepts TCP connections forever, one spawned session each.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = listener
                .accept()
                .await
                .map_err(crate::error::Error::new_accept)?;
            trace!(%peer, "accepted connection");
            let processor = self.clone();
            tokio::spawn(async move {
                let session = Session::server(peer.to_string());
                let mut conn = Connection::new(stream, processor, session);
                if let Err(err) = conn.drive().await {
                    debug!(%peer, "connection error: {}", err);
                }
            });
        }
    }

    /// Accepts Unix-domain connections forever.
    #[cfg(unix)]
    pub async fn serve_unix(self: Arc<Self>, listener: UnixListener) -> Result<()> {
        loop {
            let (stream, _) = listener
                .accept()
                .await
                .map_err(crate::error::Error::new_accept)?;
            let processor = self.clone();
            tokio::spawn(async move {
                let session = Session::server("unix");
                let mut conn = Connection::new(stream, processor, session);
                if let Err(err) = conn.drive().await {
                    debug!("connection error: {}", err);
                }
            });
        }
    }

    /// Serves one session over stdin/stdout, for inetd-style use.
    pub async fn serve_stdio(self: Arc<Self>) -> Result<()> {
        let io = crate::common::io::stdio();
        let mut conn = Connection::new(io, self, Session::server("stdio"));
        conn.drive().await
    }

    /// Drives one already-established transport to completion and
    /// returns the finished session.
    pub async fn handle_connection<T>(self: Arc<Self>, io: T, peer: &str) -> Result<Session>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let mut conn = Connection::new(io, self, Session::server(peer));
        let result = conn.drive().await;
        result.map(|()| conn.into_session())
    }

    fn default_headers(&self, session: &mut Session) {
        session.outbound = crate::header::HeaderMap::new();
        session.outbound.set("Server", crate::IDENTIFIER);
    }
}

impl Processor for ServerProcessor {
    fn start(&self, session: &mut Session) -> Phase {
        // Defaults are applied per dispatch; before that, replies
        // (interim 100s, protocol errors) go out bare.
        session.outbound = crate::header::HeaderMap::new();
        Phase::Request
    }

    fn after_headers(&self, session: &mut Session) -> Phase {
        if session.inbound.headers.contains("Transfer-Encoding") {
            debug!("request with transfer-encoding, rejecting");
            session.error_reply(411, &[]);
            return Phase::Error;
        }

        session.content_length = session
            .inbound
            .headers
            .get("Content-Length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0);
        if session.content_length > self.max_content_length {
            debug!(
                declared = session.content_length,
                max = self.max_content_length,
                "payload too large"
            );
            session.error_reply(413, &[]);
            return Phase::Error;
        }

        if let Some(expect) = session.inbound.headers.get("Expect") {
            if expect.eq_ignore_ascii_case("100-continue") {
                session.reply(100, "");
            } else {
                debug!(expect, "unsupported expectation");
                session.error_reply(417, &[]);
                return Phase::Error;
            }
        }

        Phase::Content
    }

    fn handle(&self, session: &mut Session) {
        let path = session.request.target.path().to_owned();
        let method = session.request.method.clone();
        let servlets: Vec<Arc<Servlet>> = self.servlets.lock().unwrap().clone();

        let mut allowed: Vec<String> = Vec::new();
        let mut method_matched = false;
        let mut bad_negotiation = false;
        let mut ran_without_reply = false;

        for servlet in &servlets {
            if servlet.matches_method(&method) {
                method_matched = true;
            }
            let captures = match servlet.resource_captures(&path) {
                Some(captures) => captures,
                None => continue,
            };
            if servlet.matches_method(&method) {
                self.default_headers(session);
                if !session.negotiate(servlet.negotiations()) {
                    debug!(resource = %path, "content negotiation failed");
                    bad_negotiation = true;
                    continue;
                }
                let before = session.queries();
                servlet.invoke(session, &captures);
                if session.queries() != before {
                    trace!(resource = %path, method = %method, "handled");
                    return;
                }
                ran_without_reply = true;
            } else {
                for known in &KNOWN_METHODS {
                    if servlet.matches_method(known) && !allowed.iter().any(|m| m == known) {
                        allowed.push((*known).to_owned());
                    }
                }
            }
        }

        // A request method is supported when some servlet's method
        // pattern covers it or it belongs to the known universe;
        // everything else is not implemented at all.
        let method_supported =
            method_matched || KNOWN_METHODS.iter().any(|known| *known == method);

        self.default_headers(session);
        if ran_without_reply {
            // A servlet accepted the request and then stayed silent.
            debug!(resource = %path, "handler did not reply");
            session.error_reply(500, &[]);
        } else if !method_supported {
            session.error_reply(501, &[]);
        } else if bad_negotiation {
            session.error_reply(406, &[]);
        } else if Session::trigger_405(&allowed) {
            session.error_reply(405, &allowed);
        } else {
            session.error_reply(404, &[]);
        }
    }

    fn after_processing(&self, session: &mut Session) -> Phase {
        session.reset_exchange();
        Phase::Request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Captures;

    fn processor() -> ServerProcessor {
        ServerProcessor::new()
    }

    fn request(session: &mut Session, line: &str, headers: &[&str]) {
        session.request = crate::proto::line::RequestLine::parse(line);
        session.bump_requests();
        session.inbound.reset();
        for header in headers {
            assert!(session.inbound.absorb(header));
        }
        session.inbound.absorb("");
    }

    fn status_of(session: &mut Session) -> u16 {
        let wire = session.pop_outbound().expect("a reply was queued");
        let text = String::from_utf8_lossy(&wire).into_owned();
        text.split_whitespace().nth(1).unwrap().parse().unwrap()
    }

    #[test]
    fn dispatches_to_matching_servlet() {
        let p = processor();
        p.register(
            Servlet::new("/hello", |s: &mut Session, _: &Captures<'_>| {
                s.reply(200, "hi");
            })
            .unwrap(),
        );
        let mut s = Session::server("test");
        request(&mut s, "GET /hello HTTP/1.1", &[]);
        p.handle(&mut s);
        assert_eq!(status_of(&mut s), 200);
    }

    #[test]
    fn captures_reach_the_handler() {
        let p = processor();
        p.register(
            Servlet::new("/items/([0-9]+)", |s: &mut Session, caps: &Captures<'_>| {
                let id = caps[1].to_owned();
                s.reply(200, id);
            })
            .unwrap(),
        );
        let mut s = Session::server("test");
        request(&mut s, "GET /items/42 HTTP/1.1", &[]);
        p.handle(&mut s);
        let wire = s.pop_outbound().unwrap();
        assert!(String::from_utf8_lossy(&wire).ends_with("\r\n\r\n42"));
    }

    #[test]
    fn unknown_method_is_501() {
        let p = processor();
        p.register(Servlet::new("/", |s: &mut Session, _: &Captures<'_>| s.reply(200, "")).unwrap());
        let mut s = Session::server("test");
        request(&mut s, "FOO / HTTP/1.1", &["Host: x"]);
        p.handle(&mut s);
        assert_eq!(status_of(&mut s), 501);
    }

    #[test]
    fn wrong_method_on_known_resource_is_405() {
        let p = processor();
        p.register(
            Servlet::new("/hello", |s: &mut Session, _: &Captures<'_>| s.reply(200, "")).unwrap(),
        );
        let mut s = Session::server("test");
        request(&mut s, "POST /hello HTTP/1.1", &["Host: x"]);
        p.handle(&mut s);
        let wire = s.pop_outbound().unwrap();
        let text = String::from_utf8_lossy(&wire);
        assert!(text.starts_with("HTTP/1.1 405 "));
        assert!(text.contains("Allow: GET\r\n"));
    }

    #[test]
    fn options_only_match_is_404_not_405() {
        let p = processor();
        p.register(
            Servlet::new("/opt", |s: &mut Session, _: &Captures<'_>| s.reply(200, ""))
                .unwrap()
                .method("OPTIONS")
                .unwrap(),
        );
        let mut s = Session::server("test");
        request(&mut s, "GET /opt HTTP/1.1", &[]);
        p.handle(&mut s);
        assert_eq!(status_of(&mut s), 404);
    }

    #[test]
    fn unmatched_resource_is_404() {
        let p = processor();
        p.register(Servlet::new("/a", |s: &mut Session, _: &Captures<'_>| s.reply(200, "")).unwrap());
        let mut s = Session::server("test");
        request(&mut s, "GET /b HTTP/1.1", &[]);
        p.handle(&mut s);
        assert_eq!(status_of(&mut s), 404);
    }

    #[test]
    fn failed_negotiation_is_406() {
        let p = processor();
        p.register(
            Servlet::new("/", |s: &mut Session, _: &Captures<'_>| s.reply(200, ""))
                .unwrap()
                .negotiate("Accept", "text/plain, application/json;q=0.9"),
        );
        let mut s = Session::server("test");
        request(&mut s, "GET / HTTP/1.1", &["Accept: application/foo"]);
        p.handle(&mut s);
        assert_eq!(status_of(&mut s), 406);
    }

    #[test]
    fn successful_negotiation_sets_content_type_and_vary() {
        let p = processor();
        p.register(
            Servlet::new("/", |s: &mut Session, _: &Captures<'_>| {
                let body = "\"Hello\"";
                s.reply(200, body);
            })
            .unwrap()
            .negotiate("Accept", "text/plain, application/json;q=0.9"),
        );
        let mut s = Session::server("test");
        request(&mut s, "GET / HTTP/1.1", &["Accept: application/json"]);
        p.handle(&mut s);
        let wire = s.pop_outbound().unwrap();
        let text = String::from_utf8_lossy(&wire);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Type: application/json\r\n"));
        assert!(text.contains("Vary: Accept\r\n"));
        assert!(text.contains("Content-Length: 7\r\n"));
        assert!(text.ends_with("\r\n\r\n\"Hello\""));
    }

    #[test]
    fn silent_handler_is_500() {
        let p = processor();
        p.register(Servlet::new("/quiet", |_: &mut Session, _: &Captures<'_>| {}).unwrap());
        let mut s = Session::server("test");
        request(&mut s, "GET /quiet HTTP/1.1", &[]);
        p.handle(&mut s);
        assert_eq!(status_of(&mut s), 500);
    }

    #[test]
    fn first_matching_servlet_wins() {
        let p = processor();
        p.register(Servlet::new("/x", |s: &mut Session, _: &Captures<'_>| s.reply(201, "")).unwrap());
        p.register(Servlet::new("/x", |s: &mut Session, _: &Captures<'_>| s.reply(202, "")).unwrap());
        let mut s = Session::server("test");
        request(&mut s, "GET /x HTTP/1.1", &[]);
        p.handle(&mut s);
        assert_eq!(status_of(&mut s), 201);
        assert_eq!(s.queued_writes(), 0);
    }

    #[test]
    fn after_headers_rejects_transfer_encoding() {
        let p = processor();
        let mut s = Session::server("test");
        request(&mut s, "POST / HTTP/1.1", &["Transfer-Encoding: chunked"]);
        assert_eq!(p.after_headers(&mut s), Phase::Error);
        assert_eq!(status_of(&mut s), 411);
    }

    #[test]
    fn after_headers_rejects_oversized_bodies() {
        let p = processor().max_content_length(16);
        let mut s = Session::server("test");
        request(&mut s, "POST / HTTP/1.1", &["Content-Length: 17"]);
        assert_eq!(p.after_headers(&mut s), Phase::Error);
        assert_eq!(status_of(&mut s), 413);
    }

    #[test]
    fn after_headers_treats_garbage_length_as_zero() {
        let p = processor();
        let mut s = Session::server("test");
        request(&mut s, "POST / HTTP/1.1", &["Content-Length: banana"]);
        assert_eq!(p.after_headers(&mut s), Phase::Content);
        assert_eq!(s.remaining(), 0);
    }

    #[test]
    fn after_headers_sends_interim_100() {
        let p = processor();
        let mut s = Session::server("test");
        request(
            &mut s,
            "POST / HTTP/1.1",
            &["Expect: 100-continue", "Content-Length: 5"],
        );
        assert_eq!(p.after_headers(&mut s), Phase::Content);
        let wire = s.pop_outbound().unwrap();
        assert_eq!(&wire[..], b"HTTP/1.1 100 Continue\r\n\r\n" as &[u8]);
        assert_eq!(s.remaining(), 5);
    }

    #[test]
    fn after_headers_rejects_other_expectations() {
        let p = processor();
        let mut s = Session::server("test");
        request(&mut s, "POST / HTTP/1.1", &["Expect: 200-maybe"]);
        assert_eq!(p.after_headers(&mut s), Phase::Error);
        assert_eq!(status_of(&mut s), 417);
    }
}
