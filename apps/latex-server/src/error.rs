//! Error types for the LaTeX server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use latex_engine::orchestrator::Diagnostic;
use latex_engine::{CompilationResult, Compiler, Outcome};
use serde::Serialize;
use thiserror::Error;

/// Server error types
#[derive(Error, Debug)]
pub enum ApiError {
    /// A request the engine processed but could not turn into a PDF
    #[error("{}", failure_message(.0))]
    Compilation(Box<CompilationResult>),

    /// A request that never reached the engine
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
    code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    compiler: Option<Compiler>,
    #[serde(skip_serializing_if = "Option::is_none")]
    passes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    log: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    diagnostics: Vec<Diagnostic>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
}

fn failure_message(result: &CompilationResult) -> String {
    result.message.clone().unwrap_or_else(|| {
        match result.outcome {
            Outcome::CompileFailed => "LaTeX compilation failed",
            Outcome::Timeout => "Compilation timed out",
            Outcome::SecurityRejected => "Document contains disallowed commands",
            Outcome::ValidationFailed => "Invalid project",
            Outcome::Success | Outcome::InternalError => "Internal error",
        }
        .to_string()
    })
}

/// HTTP status for an engine outcome
pub fn status_for(outcome: Outcome) -> StatusCode {
    match outcome {
        Outcome::ValidationFailed | Outcome::SecurityRejected => StatusCode::BAD_REQUEST,
        Outcome::CompileFailed => StatusCode::UNPROCESSABLE_ENTITY,
        Outcome::Timeout => StatusCode::REQUEST_TIMEOUT,
        Outcome::Success | Outcome::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let (status, body) = match self {
            ApiError::Compilation(result) => {
                let result = *result;
                let body = ErrorResponse {
                    success: false,
                    error: message,
                    code: result.outcome.code().to_string(),
                    compiler: result.compiler,
                    passes: result.compiler.map(|_| result.passes),
                    log: Some(result.log).filter(|log| !log.is_empty()),
                    diagnostics: result.diagnostics,
                    warnings: result.warnings,
                };
                (status_for(result.outcome), body)
            }
            ApiError::InvalidRequest(_) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    success: false,
                    error: message,
                    code: "INVALID_REQUEST".to_string(),
                    compiler: None,
                    passes: None,
                    log: None,
                    diagnostics: Vec::new(),
                    warnings: Vec::new(),
                },
            ),
        };

        (status, Json(body)).into_response()
    }
}

impl From<CompilationResult> for ApiError {
    fn from(result: CompilationResult) -> Self {
        ApiError::Compilation(Box::new(result))
    }
}
