//! `Cache-Control` parsing for upstream responses.

use reqwest::header::{CACHE_CONTROL, HeaderMap};

use crate::error::CacheError;

/// Extract the `max-age` directive (in seconds) from the response headers.
///
/// Every `Cache-Control` header line is considered. Directives are
/// comma-separated `name` or `name=value` tokens; names match
/// case-insensitively and the first `max-age` found wins.
pub fn max_age(headers: &HeaderMap) -> Result<u64, CacheError> {
    let mut seen_header = false;

    for value in headers.get_all(CACHE_CONTROL) {
        let Ok(value) = value.to_str() else {
            continue;
        };
        if value.trim().is_empty() {
            continue;
        }
        seen_header = true;

        if let Some(raw) = find_directive(value, "max-age") {
            return parse_seconds(raw);
        }
    }

    if seen_header {
        Err(CacheError::NoMaxAge)
    } else {
        Err(CacheError::Missing)
    }
}

/// Return the value of directive `name`, or `""` if it has no value.
fn find_directive<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header.split(',').find_map(|directive| {
        let directive = directive.trim();
        let (key, value) = match directive.split_once('=') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => (directive, ""),
        };
        key.eq_ignore_ascii_case(name).then_some(value)
    })
}

fn parse_seconds(raw: &str) -> Result<u64, CacheError> {
    let unquoted = raw
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(raw);

    unquoted
        .parse::<u64>()
        .map_err(|_| CacheError::InvalidMaxAge(raw.to_string()))
}
