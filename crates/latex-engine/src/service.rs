//! Request entry points
//!
//! [`Engine`] runs one request through the whole pipeline:
//! materialize, validate, select, orchestrate, collect. It holds only
//! read-only configuration and the two I/O seams, so a single instance is
//! shared by every concurrent request.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::collector::{self, CompilationResult};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::materialize::{materialize, AssetFetcher, CompilationRequest, HttpFetcher};
use crate::orchestrator::{OrchestrationReport, Orchestrator};
use crate::project::{self, ProjectTree};
use crate::runner::{Invocation, ProcessRunner, ToolRunner};
use crate::security;
use crate::selector::{self, Compiler, Selection};

/// The compilation engine
#[derive(Clone)]
pub struct Engine {
    config: Arc<EngineConfig>,
    runner: Arc<dyn ToolRunner>,
    fetcher: Arc<dyn AssetFetcher>,
}

impl Engine {
    /// Build an engine that spawns real tools and fetches over HTTP
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let fetcher = HttpFetcher::new(config.fetch_timeout(), config.max_asset_bytes)
            .map_err(|e| EngineError::Config(format!("HTTP client: {}", e)))?;
        Self::with_components(config, Arc::new(ProcessRunner), Arc::new(fetcher))
    }

    /// Build an engine with custom process and network seams
    pub fn with_components(
        config: EngineConfig,
        runner: Arc<dyn ToolRunner>,
        fetcher: Arc<dyn AssetFetcher>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            runner,
            fetcher,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Compile a project tree
    ///
    /// Never fails: every error becomes the matching outcome. Once the
    /// workspace exists it is handed to the collector on every path, and
    /// dropping this future mid-flight drops (and removes) it as well.
    pub async fn compile_project(&self, tree: &ProjectTree) -> CompilationResult {
        let start = Instant::now();

        let request = match materialize(tree, &self.config, self.fetcher.as_ref()).await {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, "Project rejected");
                return CompilationResult::from_error(&err);
            }
        };

        let result = match self.run(&request).await {
            Ok((selection, report)) => collector::collect(request, selection.reason, report).await,
            Err(Stopped { selection, error }) => {
                warn!(error = %error, outcome = %error.outcome(), "Compilation stopped");
                collector::discard(request, selection, &error)
            }
        };

        info!(
            outcome = %result.outcome,
            passes = result.passes,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Request finished"
        );
        result
    }

    /// Compile a single uploaded source file
    ///
    /// The file is materialized as `main.tex` in a one-file project named
    /// after the upload.
    pub async fn compile_single(&self, file_name: &str, source: &[u8]) -> CompilationResult {
        match single_file_tree(file_name, source) {
            Ok(tree) => self.compile_project(&tree).await,
            Err(err) => {
                warn!(file = %file_name, error = %err, "Upload rejected");
                CompilationResult::from_error(&err)
            }
        }
    }

    /// Compilers installed on this host, probed with `--version`
    pub async fn available_compilers(&self) -> Vec<Compiler> {
        let mut available = Vec::new();
        for compiler in Compiler::ALL {
            let probe = Invocation::new(
                compiler.command(),
                std::env::temp_dir(),
                self.config.probe_timeout(),
            )
            .arg("--version");

            match self.runner.run(&probe).await {
                Ok(output) if output.success() => available.push(compiler),
                Ok(output) => debug!(compiler = %compiler, exit_code = ?output.exit_code, "Probe failed"),
                Err(err) => debug!(compiler = %compiler, error = %err, "Compiler not available"),
            }
        }
        available
    }

    /// File extensions accepted in a project, with leading dots
    pub fn supported_extensions(&self) -> Vec<String> {
        project::supported_extensions()
    }

    async fn run(
        &self,
        request: &CompilationRequest,
    ) -> Result<(Selection, OrchestrationReport), Stopped> {
        security::validate_workspace(&request.workspace).await?;
        let selection = selector::select_compiler(request).await?;
        match Orchestrator::new(&self.config, self.runner.as_ref())
            .run(request, selection.compiler)
            .await
        {
            Ok(report) => Ok((selection, report)),
            Err(error) => Err(Stopped {
                selection: Some(selection),
                error,
            }),
        }
    }
}

/// An error that ended a request, with the compiler choice if one was made
struct Stopped {
    selection: Option<Selection>,
    error: EngineError,
}

impl From<EngineError> for Stopped {
    fn from(error: EngineError) -> Self {
        Self {
            selection: None,
            error,
        }
    }
}

fn single_file_tree(file_name: &str, source: &[u8]) -> Result<ProjectTree, EngineError> {
    let path = project::validate_name(file_name)?;
    let is_tex = path
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("tex"));
    if !is_tex {
        return Err(EngineError::UnsupportedExtension(
            "only .tex files can be compiled on their own".to_string(),
        ));
    }

    let text = std::str::from_utf8(source).map_err(|_| {
        EngineError::InvalidProject(format!("'{}' is not valid UTF-8 text", file_name))
    })?;
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "document".to_string());

    Ok(ProjectTree::single_file(stem, text))
}

/// Name of the PDF returned for an upload (`paper.tex` -> `paper.pdf`)
pub fn artifact_name_for(file_name: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "document".to_string());
    format!("{}.pdf", stem)
}
