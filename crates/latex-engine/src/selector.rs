//! Compiler selection
//!
//! The choice is an ordered decision table over the main file and the
//! files it directly includes. The first matching rule wins:
//!
//! 1. system-font or multilingual packages/commands → xelatex
//! 2. embedded-scripting packages/commands → lualatex
//! 3. any non-ASCII character → xelatex
//! 4. otherwise → pdflatex

use std::fmt;
use std::path::{Component, Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::EngineError;
use crate::materialize::CompilationRequest;

/// A TeX engine front-end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compiler {
    /// Unicode engine with system font access
    Xelatex,
    /// Engine with embedded Lua scripting
    Lualatex,
    /// Default engine
    Pdflatex,
}

impl Compiler {
    pub const ALL: [Compiler; 3] = [Compiler::Pdflatex, Compiler::Xelatex, Compiler::Lualatex];

    /// Executable name
    pub fn command(&self) -> &'static str {
        match self {
            Compiler::Xelatex => "xelatex",
            Compiler::Lualatex => "lualatex",
            Compiler::Pdflatex => "pdflatex",
        }
    }
}

impl fmt::Display for Compiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command())
    }
}

impl std::str::FromStr for Compiler {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "xelatex" => Ok(Compiler::Xelatex),
            "lualatex" => Ok(Compiler::Lualatex),
            "pdflatex" => Ok(Compiler::Pdflatex),
            other => Err(format!("Unknown compiler: {}", other)),
        }
    }
}

/// Why a compiler was chosen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", content = "trigger", rename_all = "snake_case")]
pub enum SelectionReason {
    FontOrLanguagePackage(String),
    FontCommand(String),
    ScriptingPackage(String),
    ScriptingCommand(String),
    NonAsciiText,
    Default,
}

/// The selected compiler and the rule that selected it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub compiler: Compiler,
    pub reason: SelectionReason,
}

const UNICODE_PACKAGES: &[&str] = &[
    "fontspec",
    "xltxtra",
    "xunicode",
    "polyglossia",
    "xeCJK",
    "unicode-math",
];

const FONT_COMMANDS: &[&str] = &[
    "setmainfont",
    "setsansfont",
    "setmonofont",
    "setmathfont",
    "newfontfamily",
    "fontspec",
];

const SCRIPTING_PACKAGES: &[&str] = &["luacode", "luatextra", "luamplib"];

const SCRIPTING_COMMANDS: &[&str] = &["directlua", "luaexec"];

lazy_static! {
    static ref PACKAGE_RE: Regex =
        Regex::new(r"\\(?:usepackage|RequirePackage)\s*(?:\[[^\]]*\])?\s*\{([^}]*)\}").unwrap();
    static ref COMMAND_RE: Regex = Regex::new(r"\\([A-Za-z]+)").unwrap();
    static ref INCLUDE_RE: Regex =
        Regex::new(r"\\(?:input|include|subfile|includeonly)\s*\{([^}|]+)\}").unwrap();
    static ref IMPORT_RE: Regex =
        Regex::new(r"\\(?:import|subimport|inputfrom|includefrom)\s*\{([^}]*)\}\s*\{([^}|]+)\}").unwrap();
}

type RuleFn = fn(&Analysis) -> Option<SelectionReason>;

/// The decision table, in precedence order
const RULES: &[(Compiler, RuleFn)] = &[
    (Compiler::Xelatex, unicode_rule),
    (Compiler::Lualatex, scripting_rule),
    (Compiler::Xelatex, non_ascii_rule),
];

/// Facts extracted from the scanned sources
#[derive(Debug, Default)]
struct Analysis {
    packages: Vec<String>,
    commands: Vec<String>,
    non_ascii: bool,
}

impl Analysis {
    fn of(sources: &[&str]) -> Self {
        let mut analysis = Analysis::default();
        for source in sources {
            let text = strip_comments(source);
            for caps in PACKAGE_RE.captures_iter(&text) {
                analysis
                    .packages
                    .extend(caps[1].split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()));
            }
            analysis
                .commands
                .extend(COMMAND_RE.captures_iter(&text).map(|c| c[1].to_string()));
            analysis.non_ascii |= !text.chars().all(is_printable_ascii);
        }
        analysis
    }

    fn package(&self, names: &[&str]) -> Option<String> {
        self.packages
            .iter()
            .find(|p| names.contains(&p.as_str()))
            .cloned()
    }

    fn command(&self, names: &[&str]) -> Option<String> {
        self.commands
            .iter()
            .find(|c| names.contains(&c.as_str()))
            .map(|c| format!("\\{}", c))
    }
}

fn unicode_rule(a: &Analysis) -> Option<SelectionReason> {
    a.package(UNICODE_PACKAGES)
        .map(SelectionReason::FontOrLanguagePackage)
        .or_else(|| a.command(FONT_COMMANDS).map(SelectionReason::FontCommand))
}

fn scripting_rule(a: &Analysis) -> Option<SelectionReason> {
    a.package(SCRIPTING_PACKAGES)
        .map(SelectionReason::ScriptingPackage)
        .or_else(|| a.command(SCRIPTING_COMMANDS).map(SelectionReason::ScriptingCommand))
}

/// 7-bit printable characters plus the usual line and tab whitespace
fn is_printable_ascii(c: char) -> bool {
    c == ' ' || c.is_ascii_graphic() || matches!(c, '\t' | '\r' | '\n')
}

fn non_ascii_rule(a: &Analysis) -> Option<SelectionReason> {
    a.non_ascii.then_some(SelectionReason::NonAsciiText)
}

/// Drop `%` comments, keeping escaped `\%`
fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    for line in source.lines() {
        let mut escaped = false;
        for ch in line.chars() {
            if ch == '%' && !escaped {
                break;
            }
            escaped = ch == '\\' && !escaped;
            out.push(ch);
        }
        out.push('\n');
    }
    out
}

/// Select a compiler for a set of source texts (main file first)
pub fn select_for_sources(sources: &[&str]) -> Selection {
    let analysis = Analysis::of(sources);
    RULES
        .iter()
        .find_map(|(compiler, rule)| {
            rule(&analysis).map(|reason| Selection {
                compiler: *compiler,
                reason,
            })
        })
        .unwrap_or(Selection {
            compiler: Compiler::Pdflatex,
            reason: SelectionReason::Default,
        })
}

/// Files directly included by `source`, relative to the main file's folder
pub fn direct_includes(source: &str) -> Vec<PathBuf> {
    let text = strip_comments(source);
    let mut includes = Vec::new();

    for caps in INCLUDE_RE.captures_iter(&text) {
        for name in caps[1].split(',') {
            includes.push(with_tex_extension(Path::new(name.trim())));
        }
    }
    for caps in IMPORT_RE.captures_iter(&text) {
        let dir = Path::new(caps[1].trim());
        includes.push(with_tex_extension(&dir.join(caps[2].trim())));
    }

    includes
}

fn with_tex_extension(path: &Path) -> PathBuf {
    if path.extension().is_some() {
        path.to_path_buf()
    } else {
        path.with_extension("tex")
    }
}

/// Lexically resolve `relative` under `base`, refusing to leave `root`
fn resolve_within(root: &Path, base: &Path, relative: &Path) -> Option<PathBuf> {
    if relative.is_absolute() {
        return None;
    }
    let mut resolved = base.strip_prefix(root).ok()?.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() {
                    return None;
                }
            }
            _ => return None,
        }
    }
    Some(root.join(resolved))
}

/// Select the compiler for a materialized project
pub async fn select_compiler(request: &CompilationRequest) -> Result<Selection, EngineError> {
    let root = request.workspace.root();
    let main_path = request.workspace.resolve(&request.main_file);
    let main_bytes = tokio::fs::read(&main_path).await?;
    let main_text = String::from_utf8_lossy(&main_bytes).into_owned();

    let working_dir = request.working_dir();
    let mut texts = vec![main_text.clone()];
    for include in direct_includes(&main_text) {
        let Some(path) = resolve_within(root, &working_dir, &include) else {
            debug!(include = %include.display(), "Skipping include outside project");
            continue;
        };
        if let Ok(bytes) = tokio::fs::read(&path).await {
            texts.push(String::from_utf8_lossy(&bytes).into_owned());
        }
    }

    let sources: Vec<&str> = texts.iter().map(String::as_str).collect();
    let selection = select_for_sources(&sources);
    info!(
        compiler = %selection.compiler,
        reason = ?selection.reason,
        scanned = sources.len(),
        "Compiler selected"
    );
    Ok(selection)
}
