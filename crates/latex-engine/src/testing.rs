//! Test doubles for the process and network seams
//!
//! [`ScriptedRunner`] stands in for a TeX installation: it records every
//! invocation and answers from a script, optionally writing the PDF the
//! real compiler would have produced. [`StaticFetcher`] serves assets from
//! a fixed map.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::materialize::{AssetFetcher, FetchError};
use crate::runner::{Invocation, RunError, ToolOutput, ToolRunner};
use crate::selector::Compiler;

/// Bytes written as the fake compiler's output
pub const FAKE_PDF: &[u8] = b"%PDF-1.5\n% scripted\n%%EOF\n";

/// A scripted reply to one invocation
#[derive(Debug, Clone)]
pub enum Reply {
    /// Exit with this code and stdout; write `<job>.pdf` if `artifact` is set
    Exit {
        code: i32,
        stdout: String,
        artifact: bool,
    },
    /// Behave as if the program were not installed
    Missing,
    /// Behave as if the timeout expired
    Hang,
}

impl Reply {
    /// A clean compiler pass that writes a PDF
    pub fn compiled() -> Self {
        Reply::Exit {
            code: 0,
            stdout: "Output written on main.pdf (1 page, 1024 bytes).\n".to_string(),
            artifact: true,
        }
    }

    /// A compiler pass that writes a PDF and prints `log`
    pub fn compiled_with_log(log: impl Into<String>) -> Self {
        Reply::Exit {
            code: 0,
            stdout: log.into(),
            artifact: true,
        }
    }

    /// A failed run without output
    pub fn failed(code: i32, log: impl Into<String>) -> Self {
        Reply::Exit {
            code,
            stdout: log.into(),
            artifact: false,
        }
    }

    /// A successful auxiliary tool run
    pub fn ok() -> Self {
        Reply::Exit {
            code: 0,
            stdout: String::new(),
            artifact: false,
        }
    }
}

type Script = dyn Fn(&Invocation, usize) -> Reply + Send + Sync;

/// A [`ToolRunner`] that never spawns anything
pub struct ScriptedRunner {
    script: Box<Script>,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    /// Answer each invocation with `script(invocation, call_index)`
    pub fn new(script: impl Fn(&Invocation, usize) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Compilers compile cleanly, every other tool succeeds
    pub fn healthy() -> Self {
        Self::new(|inv, _| {
            if is_compiler(&inv.program) {
                Reply::compiled()
            } else {
                Reply::ok()
            }
        })
    }

    /// Every invocation so far, in order
    pub fn invocations(&self) -> Vec<Invocation> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Programs invoked so far, in order
    pub fn programs(&self) -> Vec<String> {
        self.invocations().into_iter().map(|i| i.program).collect()
    }

    /// Number of compiler passes run so far
    pub fn compiler_runs(&self) -> usize {
        self.programs().iter().filter(|p| is_compiler(p)).count()
    }
}

fn is_compiler(program: &str) -> bool {
    Compiler::ALL.iter().any(|c| c.command() == program)
}

#[async_trait]
impl ToolRunner for ScriptedRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutput, RunError> {
        let index = {
            let mut calls = self.calls.lock().map_err(|_| RunError::Io {
                program: invocation.program.clone(),
                source: std::io::Error::other("scripted runner poisoned"),
            })?;
            calls.push(invocation.clone());
            calls.len() - 1
        };

        match (self.script)(invocation, index) {
            Reply::Missing => Err(RunError::NotFound(invocation.program.clone())),
            Reply::Hang => Err(RunError::TimedOut {
                program: invocation.program.clone(),
                timeout: invocation.timeout,
            }),
            Reply::Exit {
                code,
                stdout,
                artifact,
            } => {
                if artifact {
                    let job = invocation
                        .args
                        .last()
                        .map(|main| main.trim_end_matches(".tex").to_string())
                        .unwrap_or_else(|| "main".to_string());
                    let target = invocation.working_dir.join(format!("{}.pdf", job));
                    std::fs::write(&target, FAKE_PDF).map_err(|source| RunError::Io {
                        program: invocation.program.clone(),
                        source,
                    })?;
                }
                Ok(ToolOutput {
                    exit_code: Some(code),
                    stdout,
                    stderr: String::new(),
                })
            }
        }
    }
}

/// An [`AssetFetcher`] backed by a fixed map; unknown URLs answer 404
#[derive(Default)]
pub struct StaticFetcher {
    assets: HashMap<String, Result<Vec<u8>, FetchError>>,
    requests: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.assets.insert(url.into(), Ok(bytes));
        self
    }

    pub fn with_error(mut self, url: impl Into<String>, error: FetchError) -> Self {
        self.assets.insert(url.into(), Err(error));
        self
    }

    /// URLs requested so far, in order
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AssetFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(url.to_string());
        }
        self.assets
            .get(url)
            .cloned()
            .unwrap_or(Err(FetchError::Status(404)))
    }
}
