//! The client role: a queued request pipeline over one connection.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures_channel::oneshot;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tracing::{debug, trace};

use crate::header::HeaderMap;
use crate::proto::line::StatusLine;
use crate::proto::{Connection, Processor};
use crate::server::DEFAULT_MAX_CONTENT_LENGTH;
use crate::session::{Phase, Session};
use crate::{Error, Result};

struct PendingRequest {
    method: String,
    target: String,
    headers: HeaderMap,
    body: Vec<u8>,
}

type ReplyHandler = Box<dyn Fn(&mut Session) + Send + Sync>;

/// A client-role processor: a FIFO of requests to send down one
/// connection, and a handler invoked once per completed response.
///
/// Queued requests are pipelined: the next one is serialized as soon
/// as the previous response has been consumed, and the session shuts
/// down once the queue drains.
#[derive(Default)]
pub struct ClientProcessor {
    queue: Mutex<VecDeque<PendingRequest>>,
    handler: Mutex<Option<ReplyHandler>>,
}

impl ClientProcessor {
    /// A processor with an empty pipeline and no handler.
    pub fn new() -> ClientProcessor {
        ClientProcessor::default()
    }

    /// Appends a request to the pipeline. Chainable.
    pub fn query(
        &self,
        method: &str,
        target: &str,
        headers: HeaderMap,
        body: impl AsRef<[u8]>,
    ) -> &Self {
        self.queue.lock().unwrap().push_back(PendingRequest {
            method: method.to_owned(),
            target: target.to_owned(),
            headers,
            body: body.as_ref().to_vec(),
        });
        self
    }

    /// Registers the response handler, replacing any previous one.
    /// Chainable. The handler reads the response from the session:
    /// `session.status`, `session.inbound.headers`, `session.content`.
    pub fn then<H>(&self, handler: H) -> &Self
    where
        H: Fn(&mut Session) + Send + Sync + 'static,
    {
        *self.handler.lock().unwrap() = Some(Box::new(handler));
        self
    }

    /// Runs the queued pipeline over an established transport and
    /// returns the finished session.
    pub async fn run<T>(self: Arc<Self>, io: T, peer: &str) -> Result<Session>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let mut conn = Connection::new(io, self, Session::client(peer));
        let result = conn.drive().await;
        result.map(|()| conn.into_session())
    }

    /// Dials a TCP endpoint and runs the queued pipeline over it.
    pub async fn connect(self: Arc<Self>, addr: &str) -> Result<Session> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(Error::new_connect)?;
        self.run(stream, addr).await
    }

    /// Dials a Unix-domain socket and runs the queued pipeline.
    #[cfg(unix)]
    pub async fn connect_unix(self: Arc<Self>, path: &str) -> Result<Session> {
        let stream = UnixStream::connect(path)
            .await
            .map_err(Error::new_connect)?;
        self.run(stream, path).await
    }
}

impl std::fmt::Debug for ClientProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientProcessor")
            .field("queued", &self.queue.lock().unwrap().len())
            .finish()
    }
}

impl Processor for ClientProcessor {
    fn start(&self, session: &mut Session) -> Phase {
        match self.queue.lock().unwrap().pop_front() {
            Some(request) => {
                trace!(method = %request.method, target = %request.target, "sending request");
                session.enqueue_request(
                    &request.method,
                    &request.target,
                    &request.headers,
                    &request.body,
                );
                Phase::Status
            }
            None => Phase::Shutdown,
        }
    }

    fn after_headers(&self, session: &mut Session) -> Phase {
        session.content_length = session
            .inbound
            .headers
            .get("Content-Length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0);
        if session.content_length > DEFAULT_MAX_CONTENT_LENGTH {
            debug!(declared = session.content_length, "response too large");
            session.bump_errors();
            return Phase::Shutdown;
        }
        Phase::Content
    }

    fn handle(&self, session: &mut Session) {
        if let Some(handler) = &*self.handler.lock().unwrap() {
            handler(session);
        }
    }

    fn after_processing(&self, session: &mut Session) -> Phase {
        session.reset_exchange();
        if self.queue.lock().unwrap().is_empty() {
            Phase::Shutdown
        } else {
            // More requests queued: advance the pipeline.
            Phase::Status
        }
    }
}

/// One response, as captured by [`fetch`].
#[derive(Clone, Debug)]
pub struct FetchedResponse {
    /// The response status line.
    pub status: StatusLine,
    /// The response headers.
    pub headers: HeaderMap,
    /// The response body.
    pub body: Vec<u8>,
}

/// Issues a single request over `io` and awaits the response.
///
/// A convenience wrapper over [`ClientProcessor`] for the common
/// one-shot case.
pub async fn fetch<T>(
    io: T,
    method: &str,
    target: &str,
    headers: HeaderMap,
    body: impl AsRef<[u8]>,
) -> Result<FetchedResponse>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let (tx, rx) = oneshot::channel();
    let tx = Mutex::new(Some(tx));

    let processor = Arc::new(ClientProcessor::new());
    processor.query(method, target, headers, body).then(move |session| {
        if let Some(tx) = tx.lock().unwrap().take() {
            let _ = tx.send(FetchedResponse {
                status: session.status.clone(),
                headers: session.inbound.headers.clone(),
                body: session.content.clone(),
            });
        }
    });
    processor.run(io, "fetch").await?;
    rx.await.map_err(|_| Error::new_canceled())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_serializes_the_head_request() {
        let p = ClientProcessor::new();
        p.query("GET", "/a", HeaderMap::new(), "");
        let mut s = Session::client("test");
        assert_eq!(p.start(&mut s), Phase::Status);
        let wire = s.pop_outbound().unwrap();
        let text = String::from_utf8_lossy(&wire);
        assert!(text.starts_with("GET /a HTTP/1.1\r\n"));
        assert!(text.contains(&format!("User-Agent: {}\r\n", crate::IDENTIFIER)));
        assert_eq!(s.requests(), 1);
    }

    #[test]
    fn start_with_empty_queue_shuts_down() {
        let p = ClientProcessor::new();
        let mut s = Session::client("test");
        assert_eq!(p.start(&mut s), Phase::Shutdown);
    }

    #[test]
    fn request_body_gets_a_length() {
        let p = ClientProcessor::new();
        p.query("POST", "/data", HeaderMap::new(), "12345");
        let mut s = Session::client("test");
        p.start(&mut s);
        let wire = s.pop_outbound().unwrap();
        let text = String::from_utf8_lossy(&wire);
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(text.ends_with("\r\n\r\n12345"));
    }

    #[test]
    fn after_processing_advances_or_stops() {
        let p = ClientProcessor::new();
        p.query("GET", "/a", HeaderMap::new(), "");
        p.query("GET", "/b", HeaderMap::new(), "");
        let mut s = Session::client("test");
        p.start(&mut s);
        s.pop_outbound();
        assert_eq!(p.after_processing(&mut s), Phase::Status);
        p.start(&mut s);
        s.pop_outbound();
        assert_eq!(p.after_processing(&mut s), Phase::Shutdown);
    }

    #[test]
    fn handler_sees_the_response() {
        use std::sync::atomic::{AtomicU16, Ordering};
        let seen = Arc::new(AtomicU16::new(0));
        let p = ClientProcessor::new();
        let captured = seen.clone();
        p.then(move |session: &mut Session| {
            captured.store(session.status.code, Ordering::SeqCst);
        });
        let mut s = Session::client("test");
        s.status = StatusLine::new(204);
        p.handle(&mut s);
        assert_eq!(seen.load(Ordering::SeqCst), 204);
    }
}
