//! Compiler log analysis
//!
//! Rerun and bibliography detection is substring matching against the
//! configured [`LogPatterns`]. Error extraction follows TeX's terminal
//! format: a line starting with `! ` followed, a few lines later, by the
//! `l.<line>` context marker.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::LogPatterns;

/// How far below a `! ` line to look for its `l.<n>` marker
const LOCATION_LOOKAHEAD: usize = 8;

lazy_static! {
    static ref LOCATION_RE: Regex = Regex::new(r"^l\.(\d+)\s?(.*)$").unwrap();
    static ref WARNING_LINE_RE: Regex =
        Regex::new(r"on input line (\d+)\.?").unwrap();
}

/// What one compiler pass's output asks for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogAnalysis {
    /// The compiler explicitly asked for another run
    pub rerun_requested: bool,
    /// Lines reporting unresolved references, in log order
    pub undefined_references: Vec<String>,
    /// Citations are unresolved or a bibliography tool was requested
    pub undefined_citations: bool,
}

impl LogAnalysis {
    /// Analyze one pass's output
    pub fn of(log: &str, patterns: &LogPatterns) -> Self {
        let contains_any =
            |list: &[String]| list.iter().any(|p| !p.is_empty() && log.contains(p.as_str()));

        let undefined_references = log
            .lines()
            .filter(|line| {
                patterns
                    .undefined_references
                    .iter()
                    .any(|p| !p.is_empty() && line.contains(p.as_str()))
            })
            .map(|line| line.trim().to_string())
            .collect();

        Self {
            rerun_requested: contains_any(&patterns.rerun_requests),
            undefined_references,
            undefined_citations: contains_any(&patterns.undefined_citations),
        }
    }

    pub fn has_undefined_references(&self) -> bool {
        !self.undefined_references.is_empty()
    }
}

/// Diagnostic severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// A message extracted from compiler output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Human-readable message
    pub message: String,
    /// Source line (1-indexed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    /// Source text around the error, as TeX printed it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub severity: Severity,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
            context: None,
            severity: Severity::Error,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(message)
        }
    }

    pub fn with_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        let context = context.into();
        if !context.trim().is_empty() {
            self.context = Some(context.trim().to_string());
        }
        self
    }
}

/// Extract TeX errors and LaTeX warnings from compiler output
///
/// The raw log is always kept alongside; this is only a structured view.
pub fn extract_diagnostics(log: &str) -> Vec<Diagnostic> {
    let lines: Vec<&str> = log.lines().collect();
    let mut diagnostics = Vec::new();

    for (index, line) in lines.iter().enumerate() {
        if let Some(message) = line.strip_prefix("! ") {
            let mut diagnostic = Diagnostic::error(message.trim());
            let location = lines
                .iter()
                .skip(index + 1)
                .take(LOCATION_LOOKAHEAD)
                .take_while(|l| !l.starts_with("! "))
                .find_map(|l| LOCATION_RE.captures(l));
            if let Some(caps) = location {
                if let Ok(n) = caps[1].parse() {
                    diagnostic = diagnostic.with_line(n);
                }
                diagnostic = diagnostic.with_context(&caps[2]);
            }
            diagnostics.push(diagnostic);
        } else if line.starts_with("LaTeX Warning:") || line.contains(" Warning: ") {
            let mut diagnostic = Diagnostic::warning(line.trim());
            if let Some(caps) = WARNING_LINE_RE.captures(line) {
                if let Ok(n) = caps[1].parse() {
                    diagnostic = diagnostic.with_line(n);
                }
            }
            diagnostics.push(diagnostic);
        }
    }

    diagnostics
}
