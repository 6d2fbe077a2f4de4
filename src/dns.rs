//! Minimal DNS wire helpers.
//!
//! The proxy forwards messages opaquely; it only needs the transaction ID
//! and, for log lines, the first question name.

/// Length of the fixed DNS header.
pub const HEADER_LEN: usize = 12;

/// Length of the transaction ID at the start of every message.
pub const ID_LEN: usize = 2;

/// Copy `template` with its transaction ID replaced by the one in `query`.
pub fn with_transaction_id(template: &[u8], query: &[u8]) -> Option<Vec<u8>> {
    if template.len() < ID_LEN || query.len() < ID_LEN {
        return None;
    }
    let mut response = template.to_vec();
    response[..ID_LEN].copy_from_slice(&query[..ID_LEN]);
    Some(response)
}

/// Extract the first question name, lowercased and dot-separated.
///
/// Returns `None` for truncated or compressed names; this is for logging only.
pub fn question_name(message: &[u8]) -> Option<String> {
    if message.len() < HEADER_LEN + 1 {
        return None;
    }

    let mut pos = HEADER_LEN;
    let mut labels = Vec::new();

    loop {
        let label_len = *message.get(pos)? as usize;
        if label_len == 0 {
            break;
        }
        if label_len >= 0xC0 {
            return None;
        }
        pos += 1;
        let label = message.get(pos..pos + label_len)?;
        labels.push(std::str::from_utf8(label).ok()?.to_ascii_lowercase());
        pos += label_len;
    }

    if labels.is_empty() {
        return Some(".".to_string());
    }
    Some(labels.join("."))
}
