//! Idempotency markers embedded in created issue bodies.
//!
//! A marker is `{signature-hash}-{item-index}`; it is written to the
//! write-ahead log before the create call and into the issue body as an
//! HTML comment, so a retry can find the issue even if the log is lost.

pub const MARKER_COMMENT_PREFIX: &str = "<!-- quill:task:";
pub const MARKER_COMMENT_SUFFIX: &str = " -->";

pub fn item_marker(signature_hash: &str, item_index: usize) -> String {
    format!("{signature_hash}-{item_index:02}")
}

pub fn marker_comment(marker: &str) -> String {
    format!("{MARKER_COMMENT_PREFIX}{marker}{MARKER_COMMENT_SUFFIX}")
}

/// Extracts every marker comment found in an issue body.
pub fn extract_markers(body: &str) -> Vec<String> {
    let mut markers = Vec::new();
    let mut cursor = body;
    while let Some(start) = cursor.find(MARKER_COMMENT_PREFIX) {
        let after_start = &cursor[start + MARKER_COMMENT_PREFIX.len()..];
        let Some(end) = after_start.find(MARKER_COMMENT_SUFFIX) else {
            break;
        };
        let marker = after_start[..end].trim();
        if !marker.is_empty() {
            markers.push(marker.to_string());
        }
        cursor = &after_start[end + MARKER_COMMENT_SUFFIX.len()..];
    }
    markers
}

/// The signature-hash portion of a marker, without the item index.
pub fn marker_signature_hash(marker: &str) -> Option<&str> {
    let (hash, index) = marker.rsplit_once('-')?;
    if hash.is_empty() || index.parse::<usize>().is_err() {
        return None;
    }
    Some(hash)
}
