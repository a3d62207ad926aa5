//! The transport driver.
//!
//! `Connection` binds a session, a processor and a byte stream, and
//! obeys the instruction lists produced by [`super::flow`]. All I/O
//! is sequential, so the one-read/one-write-in-flight invariant holds
//! by construction.

use std::cmp;
use std::collections::VecDeque;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, trace};

use super::flow::{self, Action, Event};
use super::Processor;
use crate::error::{Error, Parse};
use crate::grammar;
use crate::session::{Phase, Session};
use crate::Result;

/// One connection: a session driven over an async byte stream.
///
/// The stream only needs to deliver and accept bytes and be closable;
/// TCP sockets, Unix sockets, in-memory pipes and the stdio pair all
/// qualify.
pub struct Connection<T, P> {
    io: BufReader<T>,
    session: Session,
    processor: Arc<P>,
    failure: Option<Error>,
}

impl<T, P> std::fmt::Debug for Connection<T, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("phase", &self.session.phase())
            .field("peer", &self.session.peer())
            .finish()
    }
}

impl<T, P> Connection<T, P>
where
    T: AsyncRead + AsyncWrite + Unpin,
    P: Processor,
{
    /// Binds a transport, a processor and a fresh session.
    pub fn new(io: T, processor: Arc<P>, session: Session) -> Connection<T, P> {
        Connection {
            io: BufReader::new(io),
            session,
            processor,
            failure: None,
        }
    }

    /// The session, for inspection after (or between) drives.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Consumes the connection, returning its session.
    pub fn into_session(self) -> Session {
        self.session
    }

    /// Runs the session to completion.
    ///
    /// Returns `Ok` when the connection ended cleanly (including after
    /// best-effort error replies); transport failures and, for the
    /// client role, unparsable responses surface as `Err` after the
    /// session has been recycled.
    pub async fn drive(&mut self) -> Result<()> {
        let mut pending: VecDeque<Action> =
            flow::step(&mut self.session, &*self.processor, Event::Start(true)).into();

        while let Some(action) = pending.pop_front() {
            if self.session.phase() == Phase::Shutdown && action != Action::Recycle {
                // Cancelled work; completions after shutdown are no-ops.
                continue;
            }
            let produced = match action {
                Action::ReadLine => self.read_line().await,
                Action::ReadContent => self.read_content().await,
                Action::Send => self.send().await,
                Action::Start => {
                    flow::step(&mut self.session, &*self.processor, Event::Start(false))
                }
                Action::Recycle => {
                    self.recycle().await;
                    break;
                }
            };
            pending.extend(produced);
        }

        match self.failure.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn read_line(&mut self) -> Vec<Action> {
        let mut raw = Vec::new();
        match self.io.read_until(b'\n', &mut raw).await {
            Ok(0) => {
                // EOF between requests is a keep-alive connection
                // closing gracefully; anywhere else the peer hung up
                // mid-message.
                if self.session.phase() == Phase::Request && raw.is_empty() {
                    debug!("read eof");
                    self.session.phase = Phase::Shutdown;
                    vec![Action::Recycle]
                } else {
                    self.failure.get_or_insert(Error::new_incomplete());
                    flow::step(&mut self.session, &*self.processor, Event::ReadError)
                }
            }
            Ok(n) => {
                trace!("read {} bytes", n);
                let was_status = self.session.phase() == Phase::Status;
                let errors_before = self.session.errors();
                // Not lossy: obs-text octets in header values must
                // reach the parser with their values intact.
                let line = grammar::decode_line(&raw);
                let actions =
                    flow::step(&mut self.session, &*self.processor, Event::Line(&line));
                if self.session.errors() > errors_before && self.failure.is_none() {
                    // Client-role parse failures have no wire to
                    // report on; surface them to the caller instead.
                    self.failure = Some(if was_status {
                        Parse::Status.into()
                    } else {
                        Parse::Header.into()
                    });
                }
                actions
            }
            Err(e) => {
                debug!("read error: {}", e);
                self.failure.get_or_insert(Error::new_io(e));
                flow::step(&mut self.session, &*self.processor, Event::ReadError)
            }
        }
    }

    async fn read_content(&mut self) -> Vec<Action> {
        let wanted = self.session.remaining();
        debug_assert!(wanted > 0);
        match self.io.fill_buf().await {
            Ok(buf) if buf.is_empty() => {
                self.failure.get_or_insert(Error::new_incomplete());
                flow::step(&mut self.session, &*self.processor, Event::ReadError)
            }
            Ok(buf) => {
                let n = cmp::min(buf.len(), wanted);
                self.session.content.extend_from_slice(&buf[..n]);
                self.io.consume(n);
                trace!("read {} content bytes", n);
                flow::step(&mut self.session, &*self.processor, Event::Data)
            }
            Err(e) => {
                debug!("read error: {}", e);
                self.failure.get_or_insert(Error::new_io(e));
                flow::step(&mut self.session, &*self.processor, Event::ReadError)
            }
        }
    }

    async fn send(&mut self) -> Vec<Action> {
        let buf = match self.session.pop_outbound() {
            Some(buf) => buf,
            None => return Vec::new(),
        };
        let result = async {
            self.io.write_all(&buf).await?;
            self.io.flush().await
        }
        .await;
        match result {
            Ok(()) => {
                trace!("flushed {} bytes", buf.len());
                flow::step(&mut self.session, &*self.processor, Event::Sent)
            }
            Err(e) => {
                debug!("write error: {}", e);
                self.failure.get_or_insert(Error::new_io(e));
                flow::step(&mut self.session, &*self.processor, Event::WriteError)
            }
        }
    }

    /// Releases the transport: shut down the write side, then let the
    /// descriptor close on drop. Shutdown failures are counted but
    /// otherwise ignored.
    async fn recycle(&mut self) {
        self.session.phase = Phase::Shutdown;
        if let Err(e) = self.io.shutdown().await {
            trace!("shutdown error (ignored): {}", e);
            self.session.bump_errors();
        }
        self.session.free = true;
        debug!(
            requests = self.session.requests(),
            replies = self.session.replies(),
            errors = self.session.errors(),
            "session recycled"
        );
    }
}
