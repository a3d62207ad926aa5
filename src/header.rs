//! Header containers and the line-oriented header parser.

use std::cmp::Ordering;
use std::fmt;

use crate::grammar;

/// A mapping from field names to field values.
///
/// Field name comparison is ASCII case-insensitive, but a name is
/// stored exactly as first received. Entries are kept in
/// case-insensitive lexicographic order, so iteration and
/// serialization are deterministic.
#[derive(Clone, Default, PartialEq)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

fn cmp_ignore_case(a: &str, b: &str) -> Ordering {
    let mut bi = b.bytes();
    for ac in a.bytes() {
        match bi.next() {
            Some(bc) => match ac.to_ascii_lowercase().cmp(&bc.to_ascii_lowercase()) {
                Ordering::Equal => continue,
                other => return other,
            },
            None => return Ordering::Greater,
        }
    }
    if bi.next().is_some() {
        Ordering::Less
    } else {
        Ordering::Equal
    }
}

impl HeaderMap {
    /// An empty map.
    pub fn new() -> HeaderMap {
        HeaderMap::default()
    }

    /// Number of distinct field names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no fields are present.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, name: &str) -> Result<usize, usize> {
        self.entries
            .binary_search_by(|(k, _)| cmp_ignore_case(k, name))
    }

    /// Looks up a field value; the name is matched case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).ok().map(|i| self.entries[i].1.as_str())
    }

    /// True if the field is present, matched case-insensitively.
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_ok()
    }

    /// Appends a value to a field, creating the field if absent.
    ///
    /// An empty value is a no-op. Appending to a non-empty value joins
    /// the two with `", "`, the list separator of RFC 2616 §4.2.
    pub fn append(&mut self, name: &str, value: &str) {
        if value.is_empty() {
            return;
        }
        match self.position(name) {
            Ok(i) => {
                let slot = &mut self.entries[i].1;
                if slot.is_empty() {
                    slot.push_str(value);
                } else {
                    slot.push_str(", ");
                    slot.push_str(value);
                }
            }
            Err(i) => self
                .entries
                .insert(i, (name.to_owned(), value.to_owned())),
        }
    }

    /// Sets a field to exactly `value`, replacing any previous value.
    /// The stored name keeps the casing of the first insertion.
    pub fn set(&mut self, name: &str, value: &str) {
        match self.position(name) {
            Ok(i) => self.entries[i].1 = value.to_owned(),
            Err(i) => self
                .entries
                .insert(i, (name.to_owned(), value.to_owned())),
        }
    }

    /// Sets a field only if it is not already present.
    pub fn set_default(&mut self, name: &str, value: &str) {
        if let Err(i) = self.position(name) {
            self.entries
                .insert(i, (name.to_owned(), value.to_owned()));
        }
    }

    /// Removes a field, returning its value if it was present.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.position(name).ok().map(|i| self.entries.remove(i).1)
    }

    /// Iterates fields in case-insensitive lexicographic order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Serializes every field as `name: value CRLF`, in
    /// case-insensitive lexicographic name order.
    pub fn assemble(&self) -> String {
        let mut out = String::new();
        for (name, value) in self.iter() {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out
    }
}

impl fmt::Debug for HeaderMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(k, v)| (k, v)))
            .finish()
    }
}

/// `field-content`: every octet must be a `field-vchar` (which
/// includes `obs-text`) or interior whitespace.
fn is_field_content(value: &str) -> bool {
    value
        .bytes()
        .all(|b| grammar::is_field_vchar(b) || grammar::is_ows(b))
}

/// Line-oriented absorber for a header block.
///
/// Feed it physical lines one at a time; it handles obs-fold
/// continuations and repeated fields, and flips `complete` when the
/// empty line ending the block arrives.
#[derive(Clone, Debug, Default)]
pub struct HeaderParser {
    /// The fields absorbed so far.
    pub headers: HeaderMap,
    complete: bool,
    last_field: String,
}

impl HeaderParser {
    /// A parser with no absorbed lines.
    pub fn new() -> HeaderParser {
        HeaderParser::default()
    }

    /// True once the empty line ending the block has arrived.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// The most recently started field name, for continuations.
    pub fn last_field(&self) -> &str {
        &self.last_field
    }

    /// Absorbs one physical line, with or without its trailing CRLF.
    ///
    /// Returns false if the line matches neither a field line, a
    /// continuation line, nor the terminating empty line; the caller
    /// decides what lack of progress means.
    pub fn absorb(&mut self, line: &str) -> bool {
        let line = grammar::trim_crlf(line);

        if line.is_empty() {
            // End of the header block; not a field.
            self.complete = true;
            return true;
        }

        let bytes = line.as_bytes();
        if grammar::is_ows(bytes[0]) {
            // obs-fold: continuation of the previous field.
            if self.last_field.is_empty() {
                return false;
            }
            let value = line.trim_matches(|c| c == ' ' || c == '\t');
            if !is_field_content(value) {
                return false;
            }
            let name = self.last_field.clone();
            self.headers.append(&name, value);
            return true;
        }

        let colon = match line.find(':') {
            Some(i) => i,
            None => return false,
        };
        let name = &line[..colon];
        if !grammar::is_token(name) {
            return false;
        }
        let value = line[colon + 1..].trim_matches(|c| c == ' ' || c == '\t');
        if !is_field_content(value) {
            return false;
        }
        self.headers.append(name, value);
        self.last_field = name.to_owned();
        true
    }

    /// Clears the parser for the next message.
    pub fn reset(&mut self) {
        self.headers = HeaderMap::new();
        self.complete = false;
        self.last_field.clear();
    }
}
