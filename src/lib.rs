#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(test, deny(rust_2018_idioms))]

//! # httplet
//!
//! httplet is an embeddable asynchronous HTTP/1.1 library: a server
//! and a client over anything that moves bytes.
//!
//! ## Design
//!
//! The core is a per-connection protocol engine. A [`Session`] holds
//! the parse state and outbound queue; a pure control-flow state
//! machine decides, for every completed read or write, which I/O to
//! issue next; a [`Processor`] supplies the role-specific semantics.
//! The server role dispatches to [`Servlet`]s matched by regular
//! expressions on the request path and method, with optional
//! q-value content negotiation; the client role pipelines a queue of
//! requests down one connection.
//!
//! Transports are ordinary `AsyncRead + AsyncWrite` streams: TCP
//! sockets, Unix-domain sockets, stdin/stdout (see
//! [`common::Duplex`]), or in-memory pipes in tests.
//!
//! ## A tiny server
//!
//! ```no_run
//! use std::sync::Arc;
//! use httplet::{ServerProcessor, Servlet, Session};
//!
//! # async fn run() -> httplet::Result<()> {
//! let processor = ServerProcessor::new();
//! processor.register(
//!     Servlet::new("/hello/(.*)", |session: &mut Session, caps: &regex::Captures<'_>| {
//!         let body = format!("hello, {}!", &caps[1]);
//!         session.reply(200, body);
//!     })?
//!     .describe("greets whatever follows /hello/"),
//! );
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await.unwrap();
//! Arc::new(processor).serve(listener).await
//! # }
//! ```
//!
//! ## Scope
//!
//! HTTP/1.1 only. No TLS (wrap the transport), no chunked transfer
//! encoding (requests carrying `Transfer-Encoding` are answered with
//! 411), no upgrades.

pub use crate::client::{fetch, ClientProcessor, FetchedResponse};
pub use crate::error::{Error, Result};
pub use crate::header::{HeaderMap, HeaderParser};
pub use crate::proto::line::{RequestLine, StatusLine};
pub use crate::proto::{Connection, Processor};
pub use crate::server::{ServerProcessor, Servlet};
pub use crate::session::{Phase, Session};
pub use crate::uri::Uri;

/// The library identifier, used for default `Server` and `User-Agent`
/// headers.
pub const IDENTIFIER: &str = concat!("httplet/", env!("CARGO_PKG_VERSION"));

pub mod client;
pub mod common;
mod error;
pub mod grammar;
pub mod header;
pub mod negotiate;
pub mod proto;
pub mod server;
pub mod session;
pub mod status;
pub mod uri;
