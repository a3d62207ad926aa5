//! Character classes and grammar fragments from RFC 7230.
//!
//! The line parsers in this crate are built from these pieces rather
//! than from a full ABNF engine; the handful of rules HTTP/1.1 needs
//! are compact enough to inline.

/// `tchar`: any visible US-ASCII character allowed in a token
/// ([RFC 7230 §3.2.6](https://tools.ietf.org/html/rfc7230#section-3.2.6)).
#[inline]
pub fn is_tchar(b: u8) -> bool {
    match b {
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^' | b'_'
        | b'`' | b'|' | b'~' => true,
        b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z' => true,
        _ => false,
    }
}

/// `token = 1*tchar`
pub fn is_token(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(is_tchar)
}

/// `VCHAR`: any visible US-ASCII character.
#[inline]
pub fn is_vchar(b: u8) -> bool {
    (0x21..=0x7e).contains(&b)
}

/// `obs-text`: high-bit octets permitted in field values for
/// historical reasons.
#[inline]
pub fn is_obs_text(b: u8) -> bool {
    b >= 0x80
}

/// `field-vchar = VCHAR / obs-text`
#[inline]
pub fn is_field_vchar(b: u8) -> bool {
    is_vchar(b) || is_obs_text(b)
}

/// `OWS`: optional whitespace, a space or horizontal tab.
#[inline]
pub fn is_ows(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

/// Decodes one physical wire line for the text parsers.
///
/// Header values may legally carry `obs-text` octets, which are not
/// necessarily UTF-8. Well-formed UTF-8 passes through unchanged;
/// anything else falls back to a byte-for-byte decoding so every
/// `obs-text` octet survives as the U+0080..U+00FF code point with
/// its value, instead of being mangled into a replacement character.
pub(crate) fn decode_line(raw: &[u8]) -> std::borrow::Cow<'_, str> {
    match std::str::from_utf8(raw) {
        Ok(s) => std::borrow::Cow::Borrowed(s),
        Err(_) => std::borrow::Cow::Owned(raw.iter().map(|&b| char::from(b)).collect()),
    }
}

/// Regex fragment for `token`.
pub const TOKEN: &str = r"[!#$%&'*+\-.^_`|~0-9A-Za-z]+";

/// Regex fragment for `HTTP-version`, capturing major and minor digits.
pub const HTTP_VERSION: &str = r"HTTP/([0-9])\.([0-9])";

/// Strips one trailing CRLF (or bare LF) from a physical line.
pub(crate) fn trim_crlf(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens() {
        assert!(is_token("GET"));
        assert!(is_token("x-requested-with"));
        assert!(is_token("!#$%&'*+-.^_`|~09azAZ"));
        assert!(!is_token(""));
        assert!(!is_token("two words"));
        assert!(!is_token("naïve"));
        assert!(!is_token("semi;colon"));
    }

    #[test]
    fn field_vchars() {
        assert!(is_field_vchar(b'a'));
        assert!(is_field_vchar(b'~'));
        assert!(is_field_vchar(0x80));
        assert!(is_field_vchar(0xff));
        assert!(!is_field_vchar(b' '));
        assert!(!is_field_vchar(b'\x00'));
    }

    #[test]
    fn ows() {
        assert!(is_ows(b' '));
        assert!(is_ows(b'\t'));
        assert!(!is_ows(b'\n'));
    }

    #[test]
    fn token_fragment_matches_whole_tokens() {
        let re = regex::Regex::new(&format!("^{}$", TOKEN)).unwrap();
        assert!(re.is_match("GET"));
        assert!(re.is_match("M-SEARCH"));
        assert!(!re.is_match("bad token"));
        assert!(!re.is_match(""));
    }

    #[test]
    fn decode_line_passes_utf8_through() {
        assert_eq!(decode_line(b"Host: example.com"), "Host: example.com");
        assert_eq!(decode_line("X-Name: Jos\u{e9}".as_bytes()), "X-Name: Jos\u{e9}");
    }

    #[test]
    fn decode_line_preserves_obs_text_octets() {
        // A bare 0xE9 is not UTF-8; it must survive as U+00E9.
        assert_eq!(decode_line(b"X-Name: Jos\xE9"), "X-Name: Jos\u{e9}");
        assert_eq!(decode_line(b"\xFF\x80"), "\u{ff}\u{80}");
    }

    #[test]
    fn crlf_trimming() {
        assert_eq!(trim_crlf("GET / HTTP/1.1\r\n"), "GET / HTTP/1.1");
        assert_eq!(trim_crlf("GET / HTTP/1.1\n"), "GET / HTTP/1.1");
        assert_eq!(trim_crlf("GET / HTTP/1.1"), "GET / HTTP/1.1");
        assert_eq!(trim_crlf("\r\n"), "");
    }
}
