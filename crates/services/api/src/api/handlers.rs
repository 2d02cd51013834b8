//! HTTP request handlers for the API service.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use tracing::info;
use uuid::Uuid;

use crucible_core::language::Language;
use crucible_core::request::{ExecutionRequest, FileSource, InputFile};

use crate::api::dto::{
    DetailedHealthResponse, ExecRequest, ExecResponse, HealthResponse, OutputFileDto, PoolHealth,
    UploadRequest, UploadResponse,
};
use crate::error::{ApiError, Result};
use crate::files::BlobStore;
use crate::state::AppState;

/// Liveness endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "crucible-api".to_string(),
    })
}

/// Component-level health: stores, pool utilization, interpreter
/// readiness.
pub async fn health_detailed(State(state): State<AppState>) -> Json<DetailedHealthResponse> {
    let (hot_store, cold_store) = state.store.health().await;
    let blob_store = state.blobs.healthy().await;
    let stats = state.pool.stats();

    let healthy = hot_store && cold_store && blob_store;
    Json(DetailedHealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        hot_store,
        cold_store,
        blob_store,
        pool: PoolHealth {
            ready: stats.ready,
            warming: stats.warming,
            target: stats.target,
            interpreter_ready: stats.ready > 0,
        },
    })
}

/// Execute code.
///
/// Returns 200 for any executed program, including user-code failures;
/// 400/408/429/5xx follow the orchestrator's error mapping.
pub async fn exec(
    State(state): State<AppState>,
    Json(body): Json<ExecRequest>,
) -> Result<Json<ExecResponse>> {
    let request = into_execution_request(&state, body)?;
    let report = state.orchestrator.execute(request).await?;

    Ok(Json(ExecResponse {
        session_id: report.session_id,
        stdout: report.outcome.stdout,
        stderr: report.outcome.stderr,
        exit_code: report.outcome.exit_code,
        files: report
            .output_files
            .into_iter()
            .map(|f| OutputFileDto {
                name: f.name,
                reference: f.reference,
                size: f.size,
                truncated: f.truncated,
            })
            .collect(),
        warnings: report.warnings,
    }))
}

/// Upload an input file to the blob store.
pub async fn upload(
    State(state): State<AppState>,
    Json(body): Json<UploadRequest>,
) -> Result<Json<UploadResponse>> {
    let session_id = body
        .session_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    if !crucible_core::request::is_safe_session_id(&session_id) {
        return Err(ApiError::BadRequest(format!(
            "invalid session id {session_id:?}"
        )));
    }
    let bytes = BASE64
        .decode(body.content_b64.as_bytes())
        .map_err(|e| ApiError::BadRequest(format!("content_b64: {e}")))?;

    let blob = state
        .blobs
        .put(&session_id, Bytes::from(bytes))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    info!(%session_id, name = %body.name, size = blob.size, "File uploaded");

    Ok(Json(UploadResponse {
        reference: blob.reference,
        session_id,
        name: body.name,
        size: blob.size,
    }))
}

/// Download a stored file by its `{sessionId}/{fileId}` reference.
pub async fn download(
    State(state): State<AppState>,
    Path((session_id, file_id)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    let reference = format!("{session_id}/{file_id}");
    if !BlobStore::is_valid_reference(&reference) {
        return Err(ApiError::BadRequest(format!(
            "malformed reference {reference:?}"
        )));
    }

    let bytes = state.blobs.get(&reference).await?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        bytes,
    ))
}

/// Convert the wire DTO into the orchestrator's request model.
fn into_execution_request(state: &AppState, body: ExecRequest) -> Result<ExecutionRequest> {
    let language = Language::from_tag(&body.language)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown language tag {:?}", body.language)))?;

    let mut input_files = Vec::with_capacity(body.files.len());
    for file in body.files {
        let source = match (file.content_b64, file.reference) {
            (Some(content), None) => {
                let bytes = BASE64
                    .decode(content.as_bytes())
                    .map_err(|e| ApiError::BadRequest(format!("file {:?}: {e}", file.name)))?;
                FileSource::Inline(bytes)
            }
            (None, Some(reference)) => {
                if !BlobStore::is_valid_reference(&reference) {
                    return Err(ApiError::BadRequest(format!(
                        "file {:?}: malformed reference {reference:?}",
                        file.name
                    )));
                }
                FileSource::Reference(reference)
            }
            _ => {
                return Err(ApiError::BadRequest(format!(
                    "file {:?}: exactly one of content_b64 or reference is required",
                    file.name
                )));
            }
        };
        input_files.push(InputFile {
            name: file.name,
            source,
        });
    }

    let config = &state.config;
    Ok(ExecutionRequest {
        language,
        code: body.code,
        session_id: body.session_id,
        input_files,
        capture_state: body.capture_state.unwrap_or(language.is_interactive()),
        time_limit: body
            .time_limit_secs
            .map_or(config.default_time_limit, std::time::Duration::from_secs),
        memory_limit: body
            .memory_limit_mb
            .map_or(config.default_memory_limit, |mb| mb * 1024 * 1024),
    })
}
