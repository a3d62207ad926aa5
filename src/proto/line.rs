//! Typed request lines and status lines.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::grammar;
use crate::status::reason;
use crate::uri::Uri;

static REQUEST_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^({token}) (\S+) {version}$",
        token = grammar::TOKEN,
        version = grammar::HTTP_VERSION,
    ))
    .unwrap()
});

static STATUS_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^{version} ([0-9]{{3}})(?: (.*))?$",
        version = grammar::HTTP_VERSION,
    ))
    .unwrap()
});

/// A request line: `METHOD SP target SP HTTP/M.N`.
///
/// Parsing never fails outright; an instance that did not parse
/// carries `valid = false` and assembles to an unmistakable `FAIL`
/// sentinel, so misuse produces observable wire data instead of
/// undefined behavior.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestLine {
    /// The request method token.
    pub method: String,
    /// The request target.
    pub target: Uri,
    /// Protocol version as `(major, minor)`.
    pub version: (u8, u8),
    valid: bool,
}

impl Default for RequestLine {
    fn default() -> RequestLine {
        RequestLine {
            method: String::new(),
            target: "*".parse().expect("asterisk target"),
            version: (0, 0),
            valid: false,
        }
    }
}

impl RequestLine {
    /// Parses a request line, with or without its trailing CRLF.
    ///
    /// Versions below HTTP/1.0 are rejected.
    pub fn parse(line: &str) -> RequestLine {
        let line = grammar::trim_crlf(line);
        let caps = match REQUEST_LINE.captures(line) {
            Some(caps) => caps,
            None => return RequestLine::default(),
        };
        let target: Uri = match caps[2].parse() {
            Ok(uri) => uri,
            Err(_) => return RequestLine::default(),
        };
        let version = (
            caps[3].parse::<u8>().unwrap_or(0),
            caps[4].parse::<u8>().unwrap_or(0),
        );
        if version < (1, 0) {
            return RequestLine::default();
        }
        RequestLine {
            method: caps[1].to_owned(),
            target,
            version,
            valid: true,
        }
    }

    /// A fresh HTTP/1.1 request line, as the client assembler uses.
    pub fn new(method: &str, target: &str) -> RequestLine {
        let target: Uri = match target.parse() {
            Ok(uri) => uri,
            Err(_) => return RequestLine::default(),
        };
        if !grammar::is_token(method) {
            return RequestLine::default();
        }
        RequestLine {
            method: method.to_owned(),
            target,
            version: (1, 1),
            valid: true,
        }
    }

    /// Whether the line parsed (or was constructed) successfully.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// The protocol string, e.g. `HTTP/1.1`.
    pub fn protocol(&self) -> String {
        format!("HTTP/{}.{}", self.version.0, self.version.1)
    }

    /// Emits the canonical on-wire form, CRLF included.
    pub fn assemble(&self) -> String {
        if !self.valid {
            return "FAIL * HTTP/0.0\r\n".to_owned();
        }
        format!(
            "{} {} HTTP/{}.{}\r\n",
            self.method, self.target, self.version.0, self.version.1
        )
    }
}

impl fmt::Display for RequestLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(grammar::trim_crlf(&self.assemble()))
    }
}

/// A status line: `HTTP/M.N SP code SP reason`.
#[derive(Clone, Debug, PartialEq)]
pub struct StatusLine {
    /// Protocol version as `(major, minor)`.
    pub version: (u8, u8),
    /// The status code, 100-599.
    pub code: u16,
    /// The reason phrase; may be empty.
    pub reason: String,
    valid: bool,
}

impl Default for StatusLine {
    fn default() -> StatusLine {
        StatusLine {
            version: (0, 0),
            code: 0,
            reason: String::new(),
            valid: false,
        }
    }
}

impl StatusLine {
    /// Parses a status line, with or without its trailing CRLF.
    ///
    /// Only versions 1.0 and 1.1 and codes 100–599 are accepted, and
    /// the reason phrase may only contain `VCHAR`s and blanks.
    pub fn parse(line: &str) -> StatusLine {
        let line = grammar::trim_crlf(line);
        let caps = match STATUS_LINE.captures(line) {
            Some(caps) => caps,
            None => return StatusLine::default(),
        };
        let version = (
            caps[1].parse::<u8>().unwrap_or(0),
            caps[2].parse::<u8>().unwrap_or(0),
        );
        if version != (1, 0) && version != (1, 1) {
            return StatusLine::default();
        }
        let code: u16 = match caps[3].parse() {
            Ok(code) => code,
            Err(_) => return StatusLine::default(),
        };
        if !(100..=599).contains(&code) {
            return StatusLine::default();
        }
        let reason = caps.get(4).map(|m| m.as_str()).unwrap_or("");
        if !reason
            .bytes()
            .all(|b| grammar::is_vchar(b) || grammar::is_ows(b))
        {
            return StatusLine::default();
        }
        StatusLine {
            version,
            code,
            reason: reason.to_owned(),
            valid: true,
        }
    }

    /// A fresh HTTP/1.1 status line with the canonical reason phrase.
    pub fn new(code: u16) -> StatusLine {
        if !(100..=599).contains(&code) {
            return StatusLine::default();
        }
        StatusLine {
            version: (1, 1),
            code,
            reason: reason(code).to_owned(),
            valid: true,
        }
    }

    /// Whether the line parsed (or was constructed) successfully.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// The protocol string, e.g. `HTTP/1.1`.
    pub fn protocol(&self) -> String {
        format!("HTTP/{}.{}", self.version.0, self.version.1)
    }

    /// Emits the canonical on-wire form, CRLF included.
    pub fn assemble(&self) -> String {
        if !self.valid {
            return "HTTP/0.0 000 FAIL\r\n".to_owned();
        }
        format!(
            "HTTP/{}.{} {} {}\r\n",
            self.version.0, self.version.1, self.code, self.reason
        )
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(grammar::trim_crlf(&self.assemble()))
    }
}
