//! Static rejection of unsafe TeX constructs
//!
//! Every text file in the workspace is scanned, not only the main file:
//! `\input` reads any of them as TeX and `dofile` runs any of them as Lua.
//! Only base64-decoded binaries are skipped. Comments are scanned too: a
//! rule hit inside a comment is still rejected.

use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::materialize::Workspace;

/// Class of disallowed construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstructClass {
    /// Runs an arbitrary command (`\write18`, `\ShellEscape`, Lua `os.execute`)
    ShellEscape,
    /// Reads the output of a command (`\input{|cmd}`)
    PipedInput,
    /// Raw file streams (`\openin`, `\openout`)
    FileStream,
}

impl fmt::Display for ConstructClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstructClass::ShellEscape => write!(f, "shell-escape"),
            ConstructClass::PipedInput => write!(f, "piped-input"),
            ConstructClass::FileStream => write!(f, "file-stream"),
        }
    }
}

struct Rule {
    class: ConstructClass,
    pattern: Regex,
}

fn rule(class: ConstructClass, pattern: &str) -> Rule {
    Rule {
        class,
        pattern: Regex::new(pattern).expect("security rule pattern"),
    }
}

lazy_static! {
    static ref RULES: Vec<Rule> = vec![
        // \write18, \immediate\write18, \write 18, \write18{...}
        rule(ConstructClass::ShellEscape, r"\\write\s*\{?\s*18"),
        // shellesc package
        rule(ConstructClass::ShellEscape, r"\\ShellEscape\b"),
        // Lua process primitives inside \directlua or luacode
        rule(ConstructClass::ShellEscape, r"\bos\s*\.\s*(?:execute|spawn|exec)\b"),
        rule(ConstructClass::ShellEscape, r"\bio\s*\.\s*popen\b"),
        // \input|"cmd", \input{|"cmd"}, \input"|cmd", \@@input|"cmd"
        rule(ConstructClass::PipedInput, r#"\\(?:@@)?input\s*\{?\s*"?\s*\|"#),
        rule(ConstructClass::FileStream, r"\\open(?:in|out)(?:[^A-Za-z@]|$)"),
    ];
}

/// A disallowed construct found in a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub class: ConstructClass,
    /// The matched text
    pub construct: String,
    /// 1-indexed line number
    pub line: usize,
}

/// Scan one source text, returning the earliest disallowed construct
pub fn scan_source(text: &str) -> Option<Finding> {
    RULES
        .iter()
        .filter_map(|rule| rule.pattern.find(text).map(|m| (rule.class, m)))
        .min_by_key(|(_, m)| m.start())
        .map(|(class, m)| Finding {
            class,
            construct: m.as_str().trim_end().to_string(),
            line: text[..m.start()].matches('\n').count() + 1,
        })
}

/// Scan every text file in a workspace
///
/// Files are checked in materialization order and the first finding
/// rejects the whole request.
pub async fn validate_workspace(workspace: &Workspace) -> Result<(), EngineError> {
    let mut scanned = 0usize;
    for file in workspace.files().iter().filter(|f| !f.binary) {
        let bytes = tokio::fs::read(workspace.resolve(&file.relative_path)).await?;
        let text = String::from_utf8_lossy(&bytes);
        scanned += 1;

        if let Some(finding) = scan_source(&text) {
            let name = file.relative_path.to_string_lossy().to_string();
            warn!(
                file = %name,
                class = %finding.class,
                construct = %finding.construct,
                line = finding.line,
                "Disallowed construct detected"
            );
            return Err(EngineError::SecurityViolation {
                file: name,
                class: finding.class,
                construct: finding.construct,
                line: finding.line,
            });
        }
    }

    debug!(scanned, "Security validation passed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn class_of(text: &str) -> Option<ConstructClass> {
        scan_source(text).map(|f| f.class)
    }

    #[test]
    fn test_clean_document_passes() {
        let doc = r#"\documentclass{article}
\usepackage{graphicx}
\begin{document}
\input{chapters/intro}
\include{appendix}
Hello, World! \write\myfile{not a shell}
\end{document}"#;
        assert_eq!(scan_source(doc), None);
    }

    #[test]
    fn test_write18_variants() {
        assert_eq!(class_of(r"\write18{rm -rf /}"), Some(ConstructClass::ShellEscape));
        assert_eq!(
            class_of(r"\immediate\write18{curl evil}"),
            Some(ConstructClass::ShellEscape)
        );
        assert_eq!(class_of(r"\write 18 {ls}"), Some(ConstructClass::ShellEscape));
        assert_eq!(class_of(r"\write{18}"), Some(ConstructClass::ShellEscape));
    }

    #[test]
    fn test_other_command_execution() {
        assert_eq!(class_of(r"\ShellEscape{ls}"), Some(ConstructClass::ShellEscape));
        assert_eq!(
            class_of(r#"\directlua{os.execute("id")}"#),
            Some(ConstructClass::ShellEscape)
        );
        assert_eq!(
            class_of(r#"\directlua{local f = io.popen("id")}"#),
            Some(ConstructClass::ShellEscape)
        );
    }

    #[test]
    fn test_piped_input() {
        assert_eq!(class_of(r#"\input{|"cat /etc/passwd"}"#), Some(ConstructClass::PipedInput));
        assert_eq!(class_of(r#"\input|"ls""#), Some(ConstructClass::PipedInput));
        assert_eq!(class_of(r#"\@@input|"ls""#), Some(ConstructClass::PipedInput));
        assert_eq!(class_of(r#"\input"|cat /etc/passwd""#), Some(ConstructClass::PipedInput));
        assert_eq!(class_of(r#"\input{"|ls"}"#), Some(ConstructClass::PipedInput));
        assert_eq!(class_of(r#"\input{"chapter one"}"#), None);
    }

    #[test]
    fn test_file_streams() {
        assert_eq!(class_of(r"\openout\x=leak.txt"), Some(ConstructClass::FileStream));
        assert_eq!(class_of(r"\immediate\openin5=secret"), Some(ConstructClass::FileStream));
        assert_eq!(class_of(r"\openin"), Some(ConstructClass::FileStream));
        // Longer control sequence names are different commands
        assert_eq!(class_of(r"\openinghours"), None);
    }

    #[test]
    fn test_commented_construct_still_rejected() {
        assert_eq!(class_of("% \\write18{ls}"), Some(ConstructClass::ShellEscape));
    }

    #[test]
    fn test_reports_earliest_line() {
        let doc = "line one\n\\openout1=x\n\\write18{ls}\n";
        let finding = scan_source(doc).unwrap();
        assert_eq!(finding.class, ConstructClass::FileStream);
        assert_eq!(finding.line, 2);
    }

    proptest! {
        #[test]
        fn write18_detected_anywhere(
            before in "[a-zA-Z0-9 {}\\n]{0,200}",
            after in "[a-zA-Z0-9 {}\\n]{0,200}",
        ) {
            let doc = format!("{}\\immediate\\write18{{ls}}{}", before, after);
            prop_assert_eq!(class_of(&doc), Some(ConstructClass::ShellEscape));
        }

        #[test]
        fn plain_text_never_rejected(text in "[a-zA-Z0-9 .,;:!?\\n]{0,500}") {
            prop_assert_eq!(scan_source(&text), None);
        }
    }
}
