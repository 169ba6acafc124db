//! Opaque payload rewrites.
//!
//! The request body format is owned by the host's serializer; the engine
//! performs exactly two rewrites on it: replacing the embedded `&ts=` token
//! during timestamp correction, and merging accumulated context data into
//! the head hit of a release. Context data lives in the `&c.` ... `&.c`
//! block of the body.

use std::collections::{HashMap, HashSet};

const CONTEXT_OPEN: &str = "&c.";
const CONTEXT_CLOSE: &str = "&.c";

/// Rewrite the embedded timestamp token from `old` to `new`.
///
/// Returns the payload unchanged when the token is absent.
pub fn replace_timestamp(payload: &str, old: i64, new: i64) -> String {
    payload.replacen(&format!("&ts={}", old), &format!("&ts={}", new), 1)
}

/// Merge context data pairs into the payload's context block.
///
/// A key already present in the block has its value replaced in place; new
/// keys are appended at the end of the block in sorted order so the rewrite
/// is deterministic. When the payload has no context block, one is appended.
pub fn merge_context_data(payload: &str, data: &HashMap<String, String>) -> String {
    if data.is_empty() {
        return payload.to_string();
    }

    let mut keys: Vec<&String> = data.keys().collect();
    keys.sort();

    if let Some(open) = payload.find(CONTEXT_OPEN) {
        let inner_start = open + CONTEXT_OPEN.len();
        if let Some(close_rel) = payload[inner_start..].find(CONTEXT_CLOSE) {
            let close = inner_start + close_rel;
            let mut replaced: HashSet<&str> = HashSet::new();
            let mut block = String::new();
            for pair in payload[inner_start..close].split('&').filter(|p| !p.is_empty()) {
                match pair.split_once('=') {
                    Some((key, _)) if data.contains_key(key) => {
                        block.push_str(&format!("&{}={}", key, data[key]));
                        replaced.insert(key);
                    }
                    _ => {
                        block.push('&');
                        block.push_str(pair);
                    }
                }
            }
            for key in &keys {
                if !replaced.contains(key.as_str()) {
                    block.push_str(&format!("&{}={}", key, data[key.as_str()]));
                }
            }

            let mut merged = String::with_capacity(payload.len() + block.len());
            merged.push_str(&payload[..inner_start]);
            merged.push_str(&block);
            merged.push_str(&payload[close..]);
            return merged;
        }
    }

    let serialized: String = keys
        .iter()
        .map(|k| format!("&{}={}", k, data[k.as_str()]))
        .collect();
    format!("{}{}{}{}", payload, CONTEXT_OPEN, serialized, CONTEXT_CLOSE)
}
