//! Shared key generation for storage backends.
//!
//! Key format: `sessions/{session_id}/{request_id}/{sanitized_filename}.enc`.

use uuid::Uuid;

const MAX_FILENAME_CHARS: usize = 128;

/// Reduce an untrusted filename to a safe single path segment.
///
/// Directory components, control characters, and traversal sequences are dropped; any other
/// character outside `[A-Za-z0-9._-]` becomes `_`. The result is capped at 128 characters.
pub fn sanitize_filename(filename: &str) -> String {
    let without_controls: String = filename.chars().filter(|c| !c.is_control()).collect();
    let base = without_controls
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();

    let mut cleaned = base.replace("..", "");
    cleaned = cleaned
        .chars()
        .take(MAX_FILENAME_CHARS)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.trim_matches('_').is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Staging key for an encrypted upload.
pub fn temp_object_key(session_id: Uuid, request_id: Uuid, filename: &str) -> String {
    format!(
        "sessions/{}/{}/{}.enc",
        session_id,
        request_id,
        sanitize_filename(filename)
    )
}

/// Keys must be relative and free of traversal segments.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with('/')
        && !key.contains('\\')
        && !key.split('/').any(|segment| segment == ".." || segment == ".")
        && !key.chars().any(|c| c.is_control())
}
