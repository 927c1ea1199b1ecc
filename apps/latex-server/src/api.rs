//! API handlers for the LaTeX server
//!
//! Provides REST endpoints for:
//! - Single-file compilation (multipart upload)
//! - Project compilation (JSON folder tree)
//! - Service introspection (info, available compilers)

use std::collections::BTreeMap;

use axum::{
    extract::{rejection::JsonRejection, Multipart, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use latex_engine::service::artifact_name_for;
use latex_engine::{CompilationResult, Compiler, FolderNode, ProjectTree};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ApiError;
use crate::AppState;

/// Multipart field carrying the uploaded source
const UPLOAD_FIELD: &str = "file";

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Handler: GET /health
pub async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "latex-server",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct RootResponse {
    pub message: &'static str,
}

/// Handler: GET /
pub async fn handle_root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "LaTeX compilation service is running",
    })
}

/// Service information
#[derive(Serialize)]
pub struct InfoResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub endpoints: BTreeMap<&'static str, &'static str>,
    pub supported_extensions: Vec<String>,
    pub features: Vec<&'static str>,
    pub max_passes: u32,
    pub compile_timeout_secs: u64,
}

/// Handler: GET /info
pub async fn handle_info(State(state): State<AppState>) -> Json<InfoResponse> {
    let config = state.engine.config();
    Json(InfoResponse {
        service: "LaTeX Compilation Service",
        version: env!("CARGO_PKG_VERSION"),
        endpoints: BTreeMap::from([
            ("/compile-single", "Compile a single .tex file (multipart field 'file')"),
            ("/compile-project", "Compile a project from structured folder data (JSON)"),
            ("/compilers", "List compilers available on this host"),
        ]),
        supported_extensions: state.engine.supported_extensions(),
        features: vec![
            "Automatic compiler detection (pdflatex/xelatex/lualatex)",
            "Bibliography processing (biber/bibtex)",
            "Multi-pass compilation for cross-references",
            "Project folder structure preservation",
            "Remote asset fetching",
            "Shell-escape and file-stream rejection",
        ],
        max_passes: config.max_passes,
        compile_timeout_secs: config.compile_timeout_secs,
    })
}

#[derive(Serialize)]
pub struct CompilersResponse {
    pub available_compilers: Vec<Compiler>,
}

/// Handler: GET /compilers
pub async fn handle_compilers(State(state): State<AppState>) -> Json<CompilersResponse> {
    let available_compilers = state.engine.available_compilers().await;
    debug!(count = available_compilers.len(), "Compiler probe finished");
    Json(CompilersResponse {
        available_compilers,
    })
}

/// Project compile request body
#[derive(Debug, Deserialize)]
pub struct CompileProjectRequest {
    /// Root folder of the project
    pub project_data: FolderNode,
    /// Main file name or project-relative path; detected when omitted
    #[serde(default)]
    pub main_file: Option<String>,
}

/// Handler: POST /compile-single
pub async fn handle_compile_single(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidRequest(e.to_string()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::InvalidRequest("upload has no file name".to_string()))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
        upload = Some((file_name, bytes));
        break;
    }

    let (file_name, bytes) = upload.ok_or_else(|| {
        ApiError::InvalidRequest(format!("missing multipart field '{}'", UPLOAD_FIELD))
    })?;
    info!(file = %file_name, bytes = bytes.len(), "Single-file compile request");

    let result = state.engine.compile_single(&file_name, &bytes).await;
    pdf_response(result, &artifact_name_for(&file_name))
}

/// Handler: POST /compile-project
pub async fn handle_compile_project(
    State(state): State<AppState>,
    payload: Result<Json<CompileProjectRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::InvalidRequest(e.body_text()))?;
    info!(
        project = %req.project_data.name,
        main_file = ?req.main_file,
        "Project compile request"
    );

    let artifact_name = format!("{}.pdf", req.project_data.name);
    let tree = ProjectTree::new(req.project_data, req.main_file);
    let result = state.engine.compile_project(&tree).await;
    pdf_response(result, &artifact_name)
}

/// Turn an engine result into a PDF download or an error body
fn pdf_response(mut result: CompilationResult, file_name: &str) -> Result<Response, ApiError> {
    if !result.is_success() {
        return Err(result.into());
    }
    let Some(pdf) = result.artifact.take() else {
        result.outcome = latex_engine::Outcome::InternalError;
        result.message = Some("Compilation succeeded without a PDF".to_string());
        return Err(result.into());
    };

    let disposition = format!("attachment; filename=\"{}\"", sanitize_file_name(file_name));
    let mut response = (StatusCode::OK, pdf).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/pdf"));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Some(compiler) = result.compiler {
        headers.insert("x-latex-compiler", HeaderValue::from_static(compiler.command()));
    }
    headers.insert("x-latex-passes", HeaderValue::from(result.passes));
    Ok(response)
}

/// Keep a download name safe for a quoted header parameter
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches(|c| c == '.' || c == '_').is_empty() {
        "document.pdf".to_string()
    } else {
        cleaned
    }
}
