//! Key encoding for durable counter records
//!
//! Key format: `counters/<namespace>/<name>`
//!
//! Both components are percent-encoded: bytes outside `[A-Za-z0-9_-]` become
//! `%XX`. Encoded components never contain `/` or `.`, so a namespace prefix
//! scan matches exactly that namespace and keys are safe as file paths.
//!
//! Examples:
//! - `counters/web/page_views`
//! - `counters/web/signup%2Eclick`

use crate::aggregation::CounterKey;

const COUNTER_PREFIX: &str = "counters/";

/// Encodes and decodes counter keys for key-value storage
pub struct CounterKeyEncoder;

impl CounterKeyEncoder {
    /// Encode a counter into its record key
    pub fn encode(namespace: &str, name: &str) -> String {
        let mut key = Self::namespace_prefix(namespace);
        escape_into(name, &mut key);
        key
    }

    /// Prefix shared by every counter of one namespace (ends with `/`)
    pub fn namespace_prefix(namespace: &str) -> String {
        let mut prefix = String::with_capacity(COUNTER_PREFIX.len() + namespace.len() + 1);
        prefix.push_str(COUNTER_PREFIX);
        escape_into(namespace, &mut prefix);
        prefix.push('/');
        prefix
    }

    /// Decode a record key back to its counter
    ///
    /// Returns `None` for anything that is not a well-formed counter key
    /// (including temporary files left next to records).
    pub fn decode(key: &str) -> Option<CounterKey> {
        let rest = key.strip_prefix(COUNTER_PREFIX)?;
        let (namespace, name) = rest.split_once('/')?;
        if name.contains('/') {
            return None;
        }
        Some(CounterKey::new(unescape(namespace)?, unescape(name)?))
    }

    /// Check if a key is a counter record key
    pub fn is_counter_key(key: &str) -> bool {
        Self::decode(key).is_some()
    }
}

fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

fn escape_into(component: &str, out: &mut String) {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    for &b in component.as_bytes() {
        if is_unreserved(b) {
            out.push(b as char);
        } else {
            out.push('%');
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 0x0f) as usize] as char);
        }
    }
}

fn unescape(component: &str) -> Option<String> {
    let bytes = component.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hi = hex_value(*bytes.get(i + 1)?)?;
                let lo = hex_value(*bytes.get(i + 2)?)?;
                out.push((hi << 4) | lo);
                i += 3;
            }
            b if is_unreserved(b) => {
                out.push(b);
                i += 1;
            }
            _ => return None,
        }
    }
    String::from_utf8(out).ok()
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'A'..=b'F' => Some(b - b'A' + 10),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}
