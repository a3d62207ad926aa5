//! Servlet descriptors.

use std::fmt;

use regex::{Captures, Regex};

use crate::error::Error;
use crate::session::Session;
use crate::Result;

type Handler = Box<dyn Fn(&mut Session, &Captures<'_>) + Send + Sync>;

/// An immutable binding of a resource pattern to a handler.
///
/// Both patterns are implicitly anchored: a servlet only matches when
/// its resource regex covers the whole decoded request path and its
/// method regex covers the whole method token. Capture groups from
/// the resource pattern are handed to the handler.
pub struct Servlet {
    resource: Regex,
    method: Regex,
    handler: Handler,
    negotiations: Vec<(String, String)>,
    description: String,
}

fn anchored(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{})$", pattern)).map_err(Error::new_servlet_pattern)
}

impl Servlet {
    /// Creates a servlet for `resource` with the default method
    /// pattern `GET`.
    pub fn new<H>(resource: &str, handler: H) -> Result<Servlet>
    where
        H: Fn(&mut Session, &Captures<'_>) + Send + Sync + 'static,
    {
        Ok(Servlet {
            resource: anchored(resource)?,
            method: anchored("GET")?,
            handler: Box::new(handler),
            negotiations: Vec::new(),
            description: String::new(),
        })
    }

    /// Replaces the method pattern, e.g. `"GET|HEAD"` or `"PUT"`.
    pub fn method(mut self, pattern: &str) -> Result<Servlet> {
        self.method = anchored(pattern)?;
        Ok(self)
    }

    /// Adds a content negotiation: when a request arrives, `offers`
    /// is negotiated against the named request header and the choice
    /// is recorded on the session before the handler runs.
    pub fn negotiate(mut self, header: &str, offers: &str) -> Servlet {
        self.negotiations.push((header.to_owned(), offers.to_owned()));
        self
    }

    /// Attaches a human-readable description.
    pub fn describe(mut self, text: &str) -> Servlet {
        self.description = text.to_owned();
        self
    }

    /// The attached description, or empty.
    pub fn description(&self) -> &str {
        &self.description
    }

    pub(crate) fn negotiations(&self) -> &[(String, String)] {
        &self.negotiations
    }

    pub(crate) fn resource_captures<'t>(&self, path: &'t str) -> Option<Captures<'t>> {
        self.resource.captures(path)
    }

    pub(crate) fn invoke(&self, session: &mut Session, captures: &Captures<'_>) {
        (self.handler)(session, captures);
    }

    pub(crate) fn matches_method(&self, method: &str) -> bool {
        self.method.is_match(method)
    }
}

impl fmt::Debug for Servlet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Servlet")
            .field("resource", &self.resource.as_str())
            .field("method", &self.method.as_str())
            .field("description", &self.description)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> impl Fn(&mut Session, &Captures<'_>) + Send + Sync {
        |_: &mut Session, _: &Captures<'_>| {}
    }

    #[test]
    fn patterns_are_anchored() {
        let servlet = Servlet::new("/hello", noop()).unwrap();
        assert!(servlet.resource_captures("/hello").is_some());
        assert!(servlet.resource_captures("/hello/world").is_none());
        assert!(servlet.resource_captures("prefix/hello").is_none());
        assert!(servlet.matches_method("GET"));
        assert!(!servlet.matches_method("GETX"));
    }

    #[test]
    fn method_pattern_alternation() {
        let servlet = Servlet::new("/x", noop()).unwrap().method("GET|POST").unwrap();
        assert!(servlet.matches_method("GET"));
        assert!(servlet.matches_method("POST"));
        assert!(!servlet.matches_method("PUT"));
    }

    #[test]
    fn resource_captures_are_exposed() {
        let servlet = Servlet::new("/items/([0-9]+)", noop()).unwrap();
        let caps = servlet.resource_captures("/items/42").unwrap();
        assert_eq!(&caps[1], "42");
    }

    #[test]
    fn bad_pattern_is_a_user_error() {
        let err = Servlet::new("(unclosed", noop()).unwrap_err();
        assert!(err.is_user());
    }
}
