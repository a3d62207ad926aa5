//! The control-flow state machine.
//!
//! `step` is a pure function from `(session state, event)` to an
//! ordered list of I/O actions; all reads, writes and recycling are
//! performed by the driver in [`super::conn`]. Keeping the transition
//! logic free of I/O makes every row of the table testable with plain
//! assertions.

use tracing::{debug, trace};

use super::Processor;
use crate::proto::line::{RequestLine, StatusLine};
use crate::session::{Phase, Session};

/// What happened since the last transition.
#[derive(Debug)]
pub(crate) enum Event<'a> {
    /// The connection was established (`true`), or the processor asked
    /// to advance to the next queued exchange (`false`).
    Start(bool),
    /// A read-until-delimiter completed with this line.
    Line(&'a str),
    /// A bounded content read completed; the bytes are already
    /// appended to the session's content buffer.
    Data,
    /// One queued outbound buffer was written.
    Sent,
    /// A read failed or hit EOF mid-message.
    ReadError,
    /// A write failed.
    WriteError,
}

/// One instruction for the transport driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Action {
    /// Release I/O resources and mark the session reusable.
    Recycle,
    /// Re-enter `Processor::start` for the next exchange.
    Start,
    /// Read one line, up to the next LF.
    ReadLine,
    /// Read up to the remaining declared content bytes.
    ReadContent,
    /// Write the next queued outbound buffer.
    Send,
}

/// Advances the session by one event and says what to do next.
///
/// Shutdown is terminal: events arriving afterwards (completions of
/// I/O that was in flight when the session went down) are no-ops.
pub(crate) fn step(session: &mut Session, processor: &dyn Processor, event: Event<'_>) -> Vec<Action> {
    if session.phase() == Phase::Shutdown {
        return Vec::new();
    }
    trace!(phase = ?session.phase(), event = ?event, "step");

    match event {
        Event::Start(initial) => start(session, processor, initial),
        Event::Line(line) => match session.phase() {
            Phase::Request => request_line(session, line),
            Phase::Status => status_line(session, line),
            Phase::Header => header_line(session, processor, line),
            _ => Vec::new(),
        },
        Event::Data => content(session, processor),
        Event::Sent => sent(session),
        Event::ReadError | Event::WriteError => {
            session.bump_errors();
            session.phase = Phase::Shutdown;
            vec![Action::Recycle]
        }
    }
}

fn start(session: &mut Session, processor: &dyn Processor, initial: bool) -> Vec<Action> {
    let next = processor.start(session);
    session.phase = next;
    trace!(initial, next = ?next, "session start");
    match next {
        Phase::Request => vec![Action::ReadLine],
        // Client role: a request was just serialized and queued.
        Phase::Status => vec![Action::Send, Action::ReadLine],
        // Client role with nothing left to send.
        Phase::Shutdown => vec![Action::Recycle],
        _ => Vec::new(),
    }
}

fn request_line(session: &mut Session, line: &str) -> Vec<Action> {
    let parsed = RequestLine::parse(line);
    if !parsed.is_valid() {
        debug!(line, "invalid request line");
        session.error_reply(400, &[]);
        session.phase = Phase::Error;
        return vec![Action::Send];
    }
    session.request = parsed;
    session.bump_requests();
    session.inbound.reset();
    session.phase = Phase::Header;
    vec![Action::ReadLine]
}

fn status_line(session: &mut Session, line: &str) -> Vec<Action> {
    let parsed = StatusLine::parse(line);
    if !parsed.is_valid() {
        debug!(line, "invalid status line");
        session.bump_errors();
        session.phase = Phase::Shutdown;
        return vec![Action::Recycle];
    }
    session.status = parsed;
    session.phase = Phase::Header;
    vec![Action::ReadLine]
}

fn header_line(session: &mut Session, processor: &dyn Processor, line: &str) -> Vec<Action> {
    if !session.inbound.absorb(line) {
        debug!(line, "malformed header line");
        if session.request.is_valid() {
            session.error_reply(400, &[]);
            session.phase = Phase::Error;
            return vec![Action::Send];
        }
        session.bump_errors();
        session.phase = Phase::Shutdown;
        return vec![Action::Recycle];
    }
    if !session.inbound.is_complete() {
        return vec![Action::ReadLine];
    }

    debug!(headers = session.inbound.headers.len(), "header block complete");
    let next = processor.after_headers(session);
    session.phase = next;
    // An interim 100 or an error reply may have been queued.
    let mut actions = Vec::new();
    if session.queued_writes() > 0 {
        actions.push(Action::Send);
    }
    match next {
        Phase::Content => {
            if session.remaining() > 0 {
                actions.push(Action::ReadContent);
            } else {
                actions.extend(process(session, processor));
            }
        }
        Phase::Shutdown => actions.push(Action::Recycle),
        // Error: the reply is draining; close_after_send finishes it.
        _ => {}
    }
    actions
}

fn content(session: &mut Session, processor: &dyn Processor) -> Vec<Action> {
    if session.remaining() > 0 {
        return vec![Action::ReadContent];
    }
    process(session, processor)
}

fn process(session: &mut Session, processor: &dyn Processor) -> Vec<Action> {
    session.phase = Phase::Processing;
    processor.handle(session);
    let next = processor.after_processing(session);
    session.phase = next;
    match next {
        Phase::Request => {
            // Server: reply (if any) drains while the next request is
            // awaited, unless the reply demanded a close.
            let mut actions = Vec::new();
            if session.queued_writes() > 0 {
                actions.push(Action::Send);
            }
            if !session.close_after_send {
                actions.push(Action::ReadLine);
            }
            actions
        }
        // Client: advance the pipeline to the next queued request.
        Phase::Status => vec![Action::Start],
        Phase::Shutdown => vec![Action::Recycle],
        _ => Vec::new(),
    }
}

fn sent(session: &mut Session) -> Vec<Action> {
    if session.queued_writes() > 0 {
        return vec![Action::Send];
    }
    if session.close_after_send {
        session.phase = Phase::Shutdown;
        return vec![Action::Recycle];
    }
    Vec::new()
}
