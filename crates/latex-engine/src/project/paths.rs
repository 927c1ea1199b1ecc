//! Name validation for folder and file names supplied by clients

use std::path::PathBuf;

use crate::error::EngineError;

/// Validate a client-supplied name and turn it into a relative path
///
/// Names may contain `/` separators, but every segment must be a plain
/// name: no parent-directory segments, no absolute anchors, no control
/// characters, and no leading dash (the main file is passed to the
/// compiler on its command line).
pub fn validate_name(name: &str) -> Result<PathBuf, EngineError> {
    let reject = |reason: &str| {
        Err(EngineError::UnsafePath {
            name: name.escape_debug().to_string(),
            reason: reason.to_string(),
        })
    };

    if name.contains('\0') {
        return reject("null byte");
    }
    if name.chars().any(char::is_control) {
        return reject("control character");
    }
    if name.contains('\\') {
        return reject("backslash");
    }
    if name.starts_with('/') || has_drive_prefix(name) {
        return reject("absolute path");
    }

    let mut path = PathBuf::new();
    for segment in name.split('/') {
        match segment {
            ".." => return reject("parent directory segment"),
            "" | "." => continue,
            s if s.starts_with('-') => return reject("leading dash"),
            s => path.push(s),
        }
    }

    if path.as_os_str().is_empty() {
        return reject("empty name");
    }

    Ok(path)
}

fn has_drive_prefix(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
