//! Bounded multi-pass compilation
//!
//! The orchestrator is an explicit state machine:
//!
//! ```text
//! Initial -> Compiling -+-> NeedsBibliography -> ProcessingBibliography -> Recompiling
//!                       +-> Recompiling (rerun requested)                     |
//!                       +-> Converged / Failed         <---------------------+
//! ```
//!
//! Every pass increments a counter checked against `max_passes`, so the
//! machine terminates no matter what the compiler prints.

pub mod log;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::materialize::CompilationRequest;
use crate::runner::{Invocation, RunError, ToolRunner};
use crate::selector::Compiler;
pub use self::log::{extract_diagnostics, Diagnostic, LogAnalysis, Severity};

/// Why orchestration stopped without an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    CompileFailed,
    Timeout,
}

/// Orchestration state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Initial,
    Compiling,
    NeedsBibliography,
    ProcessingBibliography,
    Recompiling,
    Converged,
    Failed(FailureKind),
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Converged | State::Failed(_))
    }
}

/// How one bibliography processor run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptStatus {
    Succeeded,
    Failed { exit_code: Option<i32> },
    Unavailable,
    TimedOut,
}

/// One bibliography processor run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BibliographyAttempt {
    pub tool: String,
    #[serde(flatten)]
    pub status: AttemptStatus,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub log: String,
}

/// Everything the orchestrator learned while driving the compiler
#[derive(Debug, Clone)]
pub struct OrchestrationReport {
    pub compiler: Compiler,
    pub final_state: State,
    /// Compiler passes executed
    pub passes: u32,
    /// Every state entered, starting with `Initial`
    pub transitions: Vec<State>,
    /// Output of the last pass that produced output, verbatim
    pub log: String,
    /// Why the run failed, if it did
    pub failure: Option<String>,
    pub bibliography: Vec<BibliographyAttempt>,
    pub warnings: Vec<String>,
}

impl OrchestrationReport {
    pub fn converged(&self) -> bool {
        self.final_state == State::Converged
    }

    pub fn bibliography_runs(&self) -> usize {
        self.transitions
            .iter()
            .filter(|s| **s == State::ProcessingBibliography)
            .count()
    }
}

enum PassResult {
    Completed {
        analysis: LogAnalysis,
        artifact_present: bool,
    },
    Failed,
    TimedOut,
}

#[derive(Default)]
struct Progress {
    passes: u32,
    bibliography_done: bool,
    previous_references: Option<Vec<String>>,
    log: String,
    failure: Option<String>,
    bibliography: Vec<BibliographyAttempt>,
    warnings: Vec<String>,
}

/// Drives one compiler over one materialized project
pub struct Orchestrator<'a> {
    config: &'a EngineConfig,
    runner: &'a dyn ToolRunner,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: &'a EngineConfig, runner: &'a dyn ToolRunner) -> Self {
        Self { config, runner }
    }

    /// Run the state machine to a terminal state
    pub async fn run(
        &self,
        request: &CompilationRequest,
        compiler: Compiler,
    ) -> Result<OrchestrationReport, EngineError> {
        let has_bibliography = request.workspace.has_bibliography_database();
        let mut progress = Progress::default();
        let mut state = State::Initial;
        let mut transitions = vec![state];

        while !state.is_terminal() {
            state = match state {
                State::Initial => State::Compiling,
                State::Compiling | State::Recompiling => {
                    match self.compile_pass(request, compiler, &mut progress).await? {
                        PassResult::Completed {
                            analysis,
                            artifact_present,
                        } => self.decide(&analysis, artifact_present, has_bibliography, &mut progress),
                        PassResult::Failed => State::Failed(FailureKind::CompileFailed),
                        PassResult::TimedOut => State::Failed(FailureKind::Timeout),
                    }
                }
                State::NeedsBibliography => State::ProcessingBibliography,
                State::ProcessingBibliography => {
                    self.process_bibliography(request, &mut progress).await;
                    State::Recompiling
                }
                State::Converged | State::Failed(_) => state,
            };
            transitions.push(state);
        }

        info!(
            compiler = %compiler,
            passes = progress.passes,
            state = ?state,
            "Orchestration finished"
        );

        Ok(OrchestrationReport {
            compiler,
            final_state: state,
            passes: progress.passes,
            transitions,
            log: progress.log,
            failure: progress.failure,
            bibliography: progress.bibliography,
            warnings: progress.warnings,
        })
    }

    /// Pick the state that follows a completed pass
    fn decide(
        &self,
        analysis: &LogAnalysis,
        artifact_present: bool,
        has_bibliography: bool,
        progress: &mut Progress,
    ) -> State {
        let budget_left = progress.passes < self.config.max_passes;

        let needs_bibliography = !progress.bibliography_done
            && (has_bibliography || analysis.undefined_citations);
        if needs_bibliography && budget_left {
            return State::NeedsBibliography;
        }

        // Undefined references that did not change since the last pass
        // will not resolve with another one.
        let references_changed = analysis.has_undefined_references()
            && progress.previous_references.as_ref() != Some(&analysis.undefined_references);
        progress.previous_references = Some(analysis.undefined_references.clone());

        if analysis.rerun_requested || references_changed {
            if budget_left {
                return State::Recompiling;
            }
            if analysis.rerun_requested {
                progress.failure = Some(format!(
                    "Output did not converge after {} passes",
                    progress.passes
                ));
                warn!(passes = progress.passes, "Rerun still requested at pass limit");
                return State::Failed(FailureKind::CompileFailed);
            }
        }

        if analysis.has_undefined_references() {
            progress
                .warnings
                .push("Document contains unresolved references".to_string());
        }

        if !artifact_present {
            progress.failure = Some("Compiler finished without producing a PDF".to_string());
            return State::Failed(FailureKind::CompileFailed);
        }

        State::Converged
    }

    async fn compile_pass(
        &self,
        request: &CompilationRequest,
        compiler: Compiler,
        progress: &mut Progress,
    ) -> Result<PassResult, EngineError> {
        // Artifact presence must reflect this pass only.
        let artifact = request.artifact_path();
        match tokio::fs::remove_file(&artifact).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        progress.passes += 1;
        let pass = progress.passes;
        let invocation = Invocation::new(
            compiler.command(),
            request.working_dir(),
            self.config.compile_timeout(),
        )
        .arg("-interaction=nonstopmode")
        .arg("-halt-on-error")
        .arg("-no-shell-escape")
        .arg(request.main_file_name());

        info!(compiler = %compiler, pass, "Running compilation pass");

        let output = match self.runner.run(&invocation).await {
            Ok(output) => output,
            Err(RunError::TimedOut { timeout, .. }) => {
                warn!(compiler = %compiler, pass, "Compilation pass timed out");
                progress.failure = Some(format!(
                    "{} pass {} exceeded {}s",
                    compiler,
                    pass,
                    timeout.as_secs()
                ));
                return Ok(PassResult::TimedOut);
            }
            Err(RunError::NotFound(program)) => return Err(EngineError::ToolUnavailable(program)),
            Err(RunError::Io { source, .. }) => return Err(EngineError::Io(source)),
        };

        progress.log = output.combined_log();
        let artifact_present = tokio::fs::try_exists(&artifact).await.unwrap_or(false);

        if !output.success() {
            if !artifact_present {
                warn!(compiler = %compiler, pass, exit_code = ?output.exit_code, "Compilation failed");
                progress.failure = Some(format!(
                    "LaTeX compilation failed (pass {}, exit code {})",
                    pass,
                    output
                        .exit_code
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "none".to_string())
                ));
                return Ok(PassResult::Failed);
            }
            progress.warnings.push(format!(
                "Pass {} exited with {:?} but produced a PDF",
                pass, output.exit_code
            ));
        }

        Ok(PassResult::Completed {
            analysis: LogAnalysis::of(&progress.log, &self.config.log_patterns),
            artifact_present,
        })
    }

    /// Try each bibliography processor until one succeeds
    ///
    /// Failure here is recorded, never fatal: the document may still be
    /// usable without resolved citations.
    async fn process_bibliography(&self, request: &CompilationRequest, progress: &mut Progress) {
        let job = request.job_name();

        for tool in &self.config.bibliography_processors {
            let invocation = Invocation::new(
                tool.as_str(),
                request.working_dir(),
                self.config.bibliography_timeout(),
            )
            .arg(job.as_str());

            info!(tool = %tool, "Running bibliography processor");
            let (status, log) = match self.runner.run(&invocation).await {
                Ok(output) if output.success() => (AttemptStatus::Succeeded, output.combined_log()),
                Ok(output) => (
                    AttemptStatus::Failed {
                        exit_code: output.exit_code,
                    },
                    output.combined_log(),
                ),
                Err(RunError::NotFound(_)) => (AttemptStatus::Unavailable, String::new()),
                Err(RunError::TimedOut { .. }) => (AttemptStatus::TimedOut, String::new()),
                Err(RunError::Io { source, .. }) => {
                    (AttemptStatus::Failed { exit_code: None }, source.to_string())
                }
            };

            let succeeded = status == AttemptStatus::Succeeded;
            if !succeeded {
                warn!(tool = %tool, status = ?status, "Bibliography processor failed");
            }
            progress.bibliography.push(BibliographyAttempt {
                tool: tool.clone(),
                status,
                log,
            });
            if succeeded {
                break;
            }
        }

        if !progress
            .bibliography
            .iter()
            .any(|a| a.status == AttemptStatus::Succeeded)
        {
            progress
                .warnings
                .push("Could not run bibliography processor; citations may be unresolved".to_string());
        }
        progress.bibliography_done = true;
    }
}
