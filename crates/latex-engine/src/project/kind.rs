//! File classification by extension

use serde::{Deserialize, Serialize};

/// What a project file is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    /// TeX sources, classes, styles and bibliography files
    Source,
    /// Images and included documents
    Asset,
    /// Plain data read by the document
    Data,
    /// Scripts used for generated content
    Script,
}

/// Every extension a project may contain
pub const ALLOWED_EXTENSIONS: &[(&str, FileKind)] = &[
    ("tex", FileKind::Source),
    ("cls", FileKind::Source),
    ("sty", FileKind::Source),
    ("bib", FileKind::Source),
    ("bst", FileKind::Source),
    ("pdf", FileKind::Asset),
    ("png", FileKind::Asset),
    ("jpg", FileKind::Asset),
    ("jpeg", FileKind::Asset),
    ("gif", FileKind::Asset),
    ("eps", FileKind::Asset),
    ("svg", FileKind::Asset),
    ("txt", FileKind::Data),
    ("dat", FileKind::Data),
    ("csv", FileKind::Data),
    ("lua", FileKind::Script),
    ("py", FileKind::Script),
    ("r", FileKind::Script),
];

/// Formats whose inline content is base64 encoded
const BINARY_FORMATS: &[&str] = &["pdf", "png", "jpg", "jpeg", "gif", "eps"];

/// Classify an extension (without the dot, any case)
pub fn classify(extension: &str) -> Option<FileKind> {
    let extension = extension.trim_start_matches('.').to_ascii_lowercase();
    ALLOWED_EXTENSIONS
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, kind)| *kind)
}

/// Whether inline content for this format is base64 encoded
pub fn is_binary_format(format: &str) -> bool {
    let format = format.trim_start_matches('.').to_ascii_lowercase();
    BINARY_FORMATS.contains(&format.as_str())
}

/// Supported extensions with a leading dot, in table order
pub fn supported_extensions() -> Vec<String> {
    ALLOWED_EXTENSIONS
        .iter()
        .map(|(ext, _)| format!(".{}", ext))
        .collect()
}
