//! Payload extraction from the transport envelope.
//!
//! Message bodies arrive as a minimal XML wrapper whose single text node
//! holds the serialized JSON payload: `<string>{ raw json }</string>`.
//! The scanner walks the markup nodes looking for the first element with the
//! wrapper name, reads its text content, and deserializes it as a JSON
//! object. Anything malformed yields `Ok(None)` - "nothing to execute" - and
//! is the caller's cue to discard the message. Cancellation observed during
//! the scan is surfaced as `IntakeError::Cancelled`, distinct from a parse
//! failure, so the caller can abort instead of commit.

use log::error;
use serde_json::{Map, Value};

use crate::cancel::CancelFlag;
use crate::error::{IntakeError, Result};

/// Element name the transport wraps the payload in.
pub const WRAPPER_ELEMENT: &str = "string";

/// Extract the JSON payload from a message body.
///
/// Returns `Ok(None)` when no wrapper element is found or its content does
/// not deserialize into a JSON object; returns `Err(Cancelled)` when the
/// cancellation flag is observed mid-scan.
pub fn extract(body: &[u8], cancel: &CancelFlag) -> Result<Option<Map<String, Value>>> {
    let text = match std::str::from_utf8(body) {
        Ok(text) => text,
        Err(e) => {
            error!("Envelope is not valid UTF-8: {}", e);
            return Ok(None);
        }
    };

    let mut rest = text;
    loop {
        if cancel.is_cancelled() {
            return Err(IntakeError::Cancelled);
        }

        let Some(open) = rest.find('<') else {
            return Ok(None);
        };
        let after = &rest[open + 1..];
        let Some(close) = after.find('>') else {
            return Ok(None);
        };
        let tag = after[..close].trim();
        rest = &after[close + 1..];

        // Only opening elements are interesting; skip closers, declarations,
        // comments, and self-closing elements (which carry no text node).
        if tag.starts_with('/') || tag.starts_with('?') || tag.starts_with('!') || tag.ends_with('/') {
            continue;
        }
        let name = tag.split_whitespace().next().unwrap_or("");
        if name != WRAPPER_ELEMENT {
            continue;
        }

        // The text node runs to the next markup boundary.
        let end = rest.find('<').unwrap_or(rest.len());
        let content = unescape(&rest[..end]);

        return match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(record)) => Ok(Some(record)),
            Ok(other) => {
                error!("Envelope payload is not a JSON object: {}", other);
                Ok(None)
            }
            Err(e) => {
                error!("Failed to parse envelope payload: {}", e);
                Ok(None)
            }
        };
    }
}

/// Wrap a serialized payload in the transport envelope.
///
/// Producer-side counterpart of [`extract`], used when enqueuing.
pub fn wrap(payload: &str) -> String {
    format!("<{}>{}</{}>", WRAPPER_ELEMENT, escape(payload), WRAPPER_ELEMENT)
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
