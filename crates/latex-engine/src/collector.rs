//! Result collection
//!
//! Every request that got as far as a workspace ends here, whether it
//! converged, failed, or was stopped early by an error. The workspace is
//! consumed and removed before the result is returned.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::EngineError;
use crate::materialize::{CompilationRequest, Workspace};
use crate::orchestrator::{
    extract_diagnostics, BibliographyAttempt, Diagnostic, FailureKind, OrchestrationReport, State,
};
use crate::selector::{Compiler, Selection, SelectionReason};

/// How a request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    ValidationFailed,
    SecurityRejected,
    CompileFailed,
    Timeout,
    InternalError,
}

impl Outcome {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Outcome::Success => "SUCCESS",
            Outcome::ValidationFailed => "VALIDATION_FAILED",
            Outcome::SecurityRejected => "SECURITY_REJECTED",
            Outcome::CompileFailed => "COMPILE_FAILED",
            Outcome::Timeout => "TIMEOUT",
            Outcome::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// The result of one compilation request
#[derive(Debug, Clone, Serialize)]
pub struct CompilationResult {
    pub outcome: Outcome,
    /// PDF bytes, present only on success
    #[serde(skip)]
    pub artifact: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compiler: Option<Compiler>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection: Option<SelectionReason>,
    pub passes: u32,
    /// Raw compiler output of the last pass
    pub log: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub bibliography: Vec<BibliographyAttempt>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Main file, relative to the project root
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main_file: Option<String>,
}

impl CompilationResult {
    /// A result for a request stopped by an error before or outside compilation
    pub fn from_error(err: &EngineError) -> Self {
        Self {
            outcome: err.outcome(),
            artifact: None,
            compiler: None,
            selection: None,
            passes: 0,
            log: String::new(),
            message: Some(err.to_string()),
            diagnostics: Vec::new(),
            bibliography: Vec::new(),
            warnings: Vec::new(),
            main_file: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

/// Build the result of a finished orchestration, then remove the workspace
///
/// The artifact is read only when the orchestration converged; a failed
/// run never returns a partial PDF.
pub async fn collect(
    request: CompilationRequest,
    selection: SelectionReason,
    report: OrchestrationReport,
) -> CompilationResult {
    let OrchestrationReport {
        compiler,
        final_state,
        passes,
        log,
        failure,
        bibliography,
        warnings,
        ..
    } = report;

    let mut result = CompilationResult {
        outcome: Outcome::InternalError,
        artifact: None,
        compiler: Some(compiler),
        selection: Some(selection),
        passes,
        log,
        message: failure,
        diagnostics: Vec::new(),
        bibliography,
        warnings,
        main_file: Some(request.main_file.to_string_lossy().to_string()),
    };

    match final_state {
        State::Converged => match tokio::fs::read(request.artifact_path()).await {
            Ok(bytes) if bytes.is_empty() => {
                result.outcome = Outcome::CompileFailed;
                result.message = Some("Compiler produced an empty PDF".to_string());
            }
            Ok(bytes) => {
                result.outcome = Outcome::Success;
                result.artifact = Some(bytes);
            }
            Err(err) => {
                error!(error = %err, "Failed to read compiled PDF");
                result.message = Some(format!("Failed to read compiled PDF: {}", err));
            }
        },
        State::Failed(FailureKind::CompileFailed) => {
            result.outcome = Outcome::CompileFailed;
            result.diagnostics = extract_diagnostics(&result.log);
        }
        State::Failed(FailureKind::Timeout) => result.outcome = Outcome::Timeout,
        other => {
            error!(state = ?other, "Orchestration ended in a non-terminal state");
            result.message = Some("Compilation stopped unexpectedly".to_string());
        }
    }

    release(request.workspace);
    info!(
        outcome = %result.outcome,
        compiler = %compiler,
        passes = result.passes,
        "Compilation collected"
    );
    result
}

/// Build the result of a request stopped by an error, then remove its workspace
///
/// `selection` is the compiler choice when the error struck after
/// selection, so the result still names the compiler attempted.
pub fn discard(
    request: CompilationRequest,
    selection: Option<Selection>,
    err: &EngineError,
) -> CompilationResult {
    let mut result = CompilationResult::from_error(err);
    result.main_file = Some(request.main_file.to_string_lossy().to_string());
    if let Some(selection) = selection {
        result.compiler = Some(selection.compiler);
        result.selection = Some(selection.reason);
    }
    release(request.workspace);
    result
}

/// Remove a workspace; a failure is logged, the tree is still dropped
fn release(workspace: Workspace) {
    let root = workspace.root().to_path_buf();
    match workspace.close() {
        Ok(()) => debug!(root = %root.display(), "Scratch directory released"),
        Err(err) => error!(root = %root.display(), error = %err, "Failed to remove scratch directory"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::materialize::materialize;
    use crate::project::ProjectTree;
    use crate::security::ConstructClass;
    use crate::testing::{StaticFetcher, FAKE_PDF};
    use pretty_assertions::assert_eq;

    async fn request_in(scratch: &tempfile::TempDir) -> CompilationRequest {
        let config = EngineConfig {
            scratch_root: Some(scratch.path().to_path_buf()),
            ..EngineConfig::default()
        };
        let tree = ProjectTree::single_file("hello", "Hello, World!");
        materialize(&tree, &config, &StaticFetcher::new()).await.unwrap()
    }

    fn report(final_state: State, log: &str) -> OrchestrationReport {
        OrchestrationReport {
            compiler: Compiler::Pdflatex,
            final_state,
            passes: 1,
            transitions: vec![State::Initial, State::Compiling, final_state],
            log: log.to_string(),
            failure: None,
            bibliography: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn is_empty(dir: &std::path::Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn test_converged_reads_artifact_and_cleans_up() {
        let scratch = tempfile::tempdir().unwrap();
        let request = request_in(&scratch).await;
        std::fs::write(request.artifact_path(), FAKE_PDF).unwrap();

        let result = collect(request, SelectionReason::Default, report(State::Converged, "ok")).await;

        assert_eq!(result.outcome, Outcome::Success);
        assert_eq!(result.artifact.as_deref(), Some(FAKE_PDF));
        assert_eq!(result.compiler, Some(Compiler::Pdflatex));
        assert_eq!(result.main_file.as_deref(), Some("main.tex"));
        assert!(is_empty(scratch.path()));
    }

    #[tokio::test]
    async fn test_compile_failure_never_returns_partial_artifact() {
        let scratch = tempfile::tempdir().unwrap();
        let request = request_in(&scratch).await;
        std::fs::write(request.artifact_path(), b"%PDF-partial").unwrap();
        let log = "! LaTeX Error: File `missing.sty' not found.\n\nl.3 \\usepackage\n";

        let result = collect(
            request,
            SelectionReason::Default,
            report(State::Failed(FailureKind::CompileFailed), log),
        )
        .await;

        assert_eq!(result.outcome, Outcome::CompileFailed);
        assert!(result.artifact.is_none());
        assert_eq!(result.log, log);
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].line, Some(3));
        assert!(is_empty(scratch.path()));
    }

    #[tokio::test]
    async fn test_timeout_outcome() {
        let scratch = tempfile::tempdir().unwrap();
        let request = request_in(&scratch).await;
        let result = collect(
            request,
            SelectionReason::Default,
            report(State::Failed(FailureKind::Timeout), ""),
        )
        .await;
        assert_eq!(result.outcome, Outcome::Timeout);
        assert!(is_empty(scratch.path()));
    }

    #[tokio::test]
    async fn test_missing_artifact_after_convergence_is_internal() {
        let scratch = tempfile::tempdir().unwrap();
        let request = request_in(&scratch).await;
        let result = collect(request, SelectionReason::Default, report(State::Converged, "")).await;
        assert_eq!(result.outcome, Outcome::InternalError);
        assert!(result.artifact.is_none());
    }

    #[tokio::test]
    async fn test_discard_removes_workspace() {
        let scratch = tempfile::tempdir().unwrap();
        let request = request_in(&scratch).await;
        let err = EngineError::SecurityViolation {
            file: "main.tex".to_string(),
            class: ConstructClass::ShellEscape,
            construct: "\\write18".to_string(),
            line: 1,
        };

        let result = discard(request, None, &err);
        assert_eq!(result.outcome, Outcome::SecurityRejected);
        assert_eq!(result.passes, 0);
        assert_eq!(result.compiler, None);
        assert!(result.message.unwrap().contains("main.tex"));
        assert!(is_empty(scratch.path()));
    }

    #[tokio::test]
    async fn test_discard_after_selection_names_compiler() {
        let scratch = tempfile::tempdir().unwrap();
        let request = request_in(&scratch).await;
        let err = EngineError::ToolUnavailable("xelatex".to_string());
        let selection = Selection {
            compiler: Compiler::Xelatex,
            reason: SelectionReason::NonAsciiText,
        };

        let result = discard(request, Some(selection), &err);
        assert_eq!(result.outcome, Outcome::InternalError);
        assert_eq!(result.compiler, Some(Compiler::Xelatex));
        assert_eq!(result.selection, Some(SelectionReason::NonAsciiText));
        assert!(is_empty(scratch.path()));
    }

    #[test]
    fn test_result_serialization_skips_artifact() {
        let mut result = CompilationResult::from_error(&EngineError::MainFileNotFound("x.tex".into()));
        result.artifact = Some(vec![1, 2, 3]);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["outcome"], "validation_failed");
        assert!(json.get("artifact").is_none());
        assert!(json.get("compiler").is_none());
    }
}
