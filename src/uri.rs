//! Request-target URIs.
//!
//! Splitting follows the non-validating regular expression of
//! [RFC 3986 appendix B](https://tools.ietf.org/html/rfc3986#appendix-B);
//! each component is then percent-decoded, and a bad or truncated
//! escape invalidates the whole target.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Parse};

static SPLIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:([^:/?#]+):)?(?://([^/?#]*))?([^?#]*)(?:\?([^#]*))?(?:#(.*))?$").unwrap()
});

/// A parsed request target.
///
/// The original text is kept verbatim, so serializing a `Uri`
/// reproduces its input; the accessors expose the percent-decoded
/// components.
#[derive(Clone, Debug, PartialEq)]
pub struct Uri {
    raw: String,
    scheme: String,
    authority: String,
    path: String,
    query: String,
    fragment: String,
}

fn pct_decode(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            // A truncated escape invalidates the component.
            if i + 3 > bytes.len() {
                return None;
            }
            let hi = (bytes[i + 1] as char).to_digit(16)?;
            let lo = (bytes[i + 2] as char).to_digit(16)?;
            out.push((hi * 16 + lo) as u8);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

impl Uri {
    /// The percent-decoded scheme, or empty if absent.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// The percent-decoded authority, or empty if absent.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// The percent-decoded path. This is what the dispatcher matches
    /// servlet resource patterns against.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The percent-decoded query, or empty if absent.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// The percent-decoded fragment, or empty if absent.
    pub fn fragment(&self) -> &str {
        &self.fragment
    }

    /// The target exactly as it appeared on the wire.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for Uri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Uri, Error> {
        if s.is_empty() {
            return Err(Parse::Uri.into());
        }
        let caps = SPLIT.captures(s).ok_or(Parse::Uri)?;
        let part = |i: usize| caps.get(i).map(|m| m.as_str()).unwrap_or("");
        let decode = |i: usize| pct_decode(part(i)).ok_or(Parse::Uri);
        Ok(Uri {
            raw: s.to_owned(),
            scheme: decode(1)?,
            authority: decode(2)?,
            path: decode(3)?,
            query: decode(4)?,
            fragment: decode(5)?,
        })
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
