//! BOQ処理・設定・ダウンロードのハンドラー

use super::extract::{ApiJson, ApiPath, UploadForm};
use super::{blocking, download_url, ApiError, ApiResult, AppState};
use crate::config::ConfigUpdate;
use crate::workflow::MarkupOutput;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use boq_cost_common::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};

const XLSX_CONTENT_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

fn parse_percent(raw: Option<&String>) -> ApiResult<Decimal> {
    let raw = raw.ok_or_else(|| ApiError::BadRequest("markup_percent is required".into()))?;
    raw.trim()
        .parse::<Decimal>()
        .map_err(|_| ApiError::BadRequest(format!("invalid markup_percent: {}", raw)))
}

fn markup_response(output: MarkupOutput) -> Json<Value> {
    Json(json!({
        "success": true,
        "filename": output.file.file_name,
        "download_url": download_url(&output.file.file_name),
        "markup_percent": output.percent,
        "items_processed": output.report.items_processed,
        "items_failed": output.report.items_failed,
    }))
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "boq-cost",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// POST /api/process-boq
pub async fn process_boq(State(state): State<AppState>, form: UploadForm) -> ApiResult<Json<Value>> {
    let (file_name, data) = form.require_file()?;
    let workflow = state.workflow.clone();
    let (session_id, summary) = blocking(move || workflow.process_upload(&data, &file_name)).await?;

    Ok(Json(json!({
        "success": true,
        "session_id": session_id,
        "summary": summary,
    })))
}

#[derive(Debug, Deserialize)]
pub struct GenerateFinalRequest {
    pub session_id: String,
    #[serde(default)]
    pub markup_options: Option<Vec<Decimal>>,
}

/// POST /api/generate-final-boq
pub async fn generate_final_boq(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<GenerateFinalRequest>,
) -> ApiResult<Json<Value>> {
    let workflow = state.workflow.clone();
    let output = blocking(move || workflow.generate_final(&request.session_id, request.markup_options)).await?;

    Ok(Json(json!({
        "success": true,
        "filename": output.file.file_name,
        "download_url": download_url(&output.file.file_name),
        "items_processed": output.report.items_processed,
        "items_failed": output.report.items_failed,
        "markup_values_written": output.report.markup_values_written,
        "debug_info": {
            "items_with_zero_cost": output.report.items_with_zero_cost,
            "items_with_zero_qty": output.report.items_with_zero_qty,
        },
    })))
}

#[derive(Debug, Deserialize)]
pub struct ApplyMarkupRequest {
    pub session_id: String,
    pub markup_percent: Decimal,
}

/// POST /api/apply-markup
pub async fn apply_markup(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ApplyMarkupRequest>,
) -> ApiResult<Json<Value>> {
    let workflow = state.workflow.clone();
    let output = blocking(move || workflow.apply_markup(&request.session_id, request.markup_percent)).await?;
    Ok(markup_response(output))
}

/// POST /api/pure-markup（session_id か file のどちらか）
pub async fn pure_markup(State(state): State<AppState>, form: UploadForm) -> ApiResult<Json<Value>> {
    let percent = parse_percent(form.fields.get("markup_percent"))?;
    let session_id = form
        .fields
        .get("session_id")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let workflow = state.workflow.clone();

    let output = match session_id {
        Some(id) => blocking(move || workflow.pure_markup_session(&id, percent)).await?,
        None => {
            let (file_name, data) = form.require_file()?;
            blocking(move || workflow.pure_markup_upload(&data, &file_name, percent)).await?
        }
    };
    Ok(markup_response(output))
}

#[derive(Debug, Deserialize)]
pub struct CleanupRequest {
    pub session_id: String,
}

/// POST /api/cleanup-session
pub async fn cleanup_session(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<CleanupRequest>,
) -> ApiResult<Json<Value>> {
    let workflow = state.workflow.clone();
    let report = blocking(move || workflow.cleanup(&request.session_id)).await?;

    Ok(Json(json!({
        "success": true,
        "session_cleaned": report.session_cleaned,
        "files_deleted": report.files_deleted,
        "deleted_files": report.deleted_files,
        "errors": report.errors,
    })))
}

/// GET /api/download/:filename
pub async fn download(State(state): State<AppState>, ApiPath(filename): ApiPath<String>) -> ApiResult<Response> {
    let path = state.workflow.resolve_download(&filename).map_err(|e| match ApiError::from(e) {
        ApiError::NotFound(_) => ApiError::NotFound("File not found".into()),
        other => other,
    })?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to read {}: {}", filename, e)))?;

    let disposition = format!("attachment; filename=\"{}\"", filename);
    Ok((
        [
            (header::CONTENT_TYPE, XLSX_CONTENT_TYPE.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

/// GET /api/config/inquiry
pub async fn config_inquiry(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let config = state.workflow.config()?;
    Ok(Json(json!({ "success": true, "config": config })))
}

/// POST /api/config/update
pub async fn config_update(
    State(state): State<AppState>,
    ApiJson(update): ApiJson<ConfigUpdate>,
) -> ApiResult<Json<Value>> {
    let workflow = state.workflow.clone();
    let config = blocking(move || workflow.update_config(update)).await?;
    Ok(Json(json!({
        "success": true,
        "message": "configuration updated",
        "config": config,
    })))
}
