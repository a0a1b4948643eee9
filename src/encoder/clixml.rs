//! PowerShell CLIXML error stream decoding
//!
//! When PowerShell runs non-interactively its error stream arrives as
//! serialized objects:
//!
//! ```text
//! #< CLIXML
//! <Objs Version="1.1.0.1" xmlns="..."><S S="Error">line one_x000D__x000A_</S>...</Objs>
//! ```
//!
//! Only the `<S>` elements of the requested stream carry message text. Text
//! is XML-escaped and then additionally escaped as `_xHHHH_` UTF-16 units.
//! Several `<Objs>` documents may be concatenated.

use regex::{Captures, Regex};
use std::sync::OnceLock;

// The patterns below are constants; a failure to compile them is a bug caught by the tests.
#[allow(clippy::expect_used)]
fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("invalid built-in pattern"))
}

fn objs_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?s)<Objs\b.*?</Objs>")
}

fn string_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r#"(?s)<S\s+S="([^"]*)"\s*>(.*?)</S>"#)
}

fn entity_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"&(#x[0-9A-Fa-f]+|#[0-9]+|lt|gt|amp|quot|apos);")
}

fn utf16_escape_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"_x([0-9A-Fa-f]{4})_")
}

/// Extract the text of one stream (usually `"Error"`) from CLIXML output
///
/// Input that contains no `<Objs>` document is returned unchanged.
pub fn parse_clixml(data: &[u8], stream: &str) -> Vec<u8> {
    let text = String::from_utf8_lossy(data);
    let mut documents = objs_re().find_iter(&text).peekable();
    if documents.peek().is_none() {
        return data.to_vec();
    }

    let mut out = String::new();
    for document in documents {
        for caps in string_re().captures_iter(document.as_str()) {
            if &caps[1] != stream {
                continue;
            }
            out.push_str(&unescape_utf16(&unescape_xml(&caps[2])));
        }
    }
    out.into_bytes()
}

fn unescape_xml(text: &str) -> String {
    entity_re()
        .replace_all(text, |caps: &Captures<'_>| {
            let entity = &caps[1];
            let decoded = match entity {
                "lt" => Some('<'),
                "gt" => Some('>'),
                "amp" => Some('&'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => {
                    let code = match entity.strip_prefix("#x") {
                        Some(hex) => u32::from_str_radix(hex, 16).ok(),
                        None => entity[1..].parse().ok(),
                    };
                    code.and_then(char::from_u32)
                }
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}

// `_xHHHH_` escapes are UTF-16 code units, so surrogate pairs span two escapes.
fn unescape_utf16(text: &str) -> String {
    let mut units: Vec<u16> = Vec::with_capacity(text.len());
    let mut last = 0;
    for caps in utf16_escape_re().captures_iter(text) {
        let (Some(whole), Some(hex)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        units.extend(text[last..whole.start()].encode_utf16());
        match u16::from_str_radix(hex.as_str(), 16) {
            Ok(unit) => units.push(unit),
            Err(_) => units.extend(whole.as_str().encode_utf16()),
        }
        last = whole.end();
    }
    units.extend(text[last..].encode_utf16());
    String::from_utf16_lossy(&units)
}
