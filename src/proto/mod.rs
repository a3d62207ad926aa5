//! The HTTP/1.1 protocol engine: typed start lines, the per-session
//! control-flow state machine, and the transport driver that obeys it.

pub(crate) mod conn;
pub(crate) mod flow;
pub mod line;

pub use self::conn::Connection;

use crate::session::{Phase, Session};

/// The role-specific half of a session: a server dispatcher or a
/// client request queue.
///
/// The control-flow state machine calls back into the processor at
/// the four points where protocol semantics depend on the role; the
/// processor mutates the session (enqueues replies, parses lengths)
/// and answers with the phase to continue in.
pub trait Processor: Send + Sync + 'static {
    /// Called once when the connection starts, and again for each
    /// pipeline advancement. Returns the initial phase.
    fn start(&self, session: &mut Session) -> Phase;

    /// Called when the inbound header block completes. Returns the
    /// phase to continue in, typically `Content`.
    fn after_headers(&self, session: &mut Session) -> Phase;

    /// Called with a complete inbound message.
    fn handle(&self, session: &mut Session);

    /// Called after `handle`. Returns the phase for the next exchange.
    fn after_processing(&self, session: &mut Session) -> Phase;
}
