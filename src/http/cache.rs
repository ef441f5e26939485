//! HTTP cache control module
//!
//! Provides `ETag` generation and conditional request handling
//! (`If-None-Match` and `If-Modified-Since`).

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::SystemTime;

use chrono::{DateTime, Utc};

/// Generate `ETag` using fast hashing
///
/// # Arguments
/// * `content` - File content
///
/// # Returns
/// Quoted `ETag` string, e.g., `"abc123def"`
pub fn generate_etag(content: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    let v = hasher.finish();
    format!("\"{v:x}\"")
}

/// Check if client's `If-None-Match` header matches the server's `ETag`
///
/// Supports:
/// - Single `ETag`: `"abc123"`
/// - Multiple `ETags`: `"abc123", "def456"`
/// - Wildcard: `*`
///
/// # Returns
/// Returns true if matched (should return 304), false otherwise
pub fn check_etag_match(if_none_match: Option<&str>, etag: &str) -> bool {
    if_none_match.is_some_and(|client_etag| {
        // Handle multiple ETags separated by comma
        client_etag
            .split(',')
            .any(|e| e.trim() == etag || e.trim() == "*")
    })
}

/// Format a filesystem timestamp as an RFC 7231 HTTP-date
/// (e.g., `Wed, 21 Oct 2015 07:28:00 GMT`), for `Last-Modified` headers
pub fn format_http_date(time: SystemTime) -> String {
    let datetime: DateTime<Utc> = time.into();
    datetime.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Check an `If-Modified-Since` header against a file's modification time
///
/// HTTP dates carry whole-second resolution, so the modification time is
/// truncated to seconds before comparison. An unparseable header is
/// ignored (returns false, full response sent).
///
/// # Returns
/// Returns true if the file has not been modified since the header date
/// (should return 304), false otherwise
pub fn check_not_modified(if_modified_since: Option<&str>, mtime: SystemTime) -> bool {
    let Some(header) = if_modified_since else {
        return false;
    };
    let Ok(since) = DateTime::parse_from_rfc2822(header) else {
        return false;
    };

    let mtime: DateTime<Utc> = mtime.into();
    mtime.timestamp() <= since.timestamp()
}
