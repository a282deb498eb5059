//! URL path segment encoding.
//!
//! Every name that goes into a management API path is percent-encoded as a
//! single segment: the default vhost "/" must travel as `%2F`, and exchange
//! or queue names may contain any character.

/// Percent-encode a value so it can be used as one URL path segment.
///
/// Unreserved characters (`A-Z a-z 0-9 - . _ ~`) pass through unchanged;
/// every other byte of the UTF-8 encoding becomes `%XX`.
#[must_use]
pub fn encode_segment(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Decode a percent-encoded path segment.
///
/// Malformed escapes are kept literally. Used to read the properties key out
/// of a `Location` header.
#[must_use]
pub fn decode_segment(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && let Some(byte) = hex_pair(bytes[i + 1], bytes[i + 2])
        {
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_pair(hi: u8, lo: u8) -> Option<u8> {
    let hi = (hi as char).to_digit(16)?;
    let lo = (lo as char).to_digit(16)?;
    Some((hi * 16 + lo) as u8)
}
