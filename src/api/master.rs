//! 原価マスタ管理のハンドラー

use super::extract::{ApiJson, ApiPath, UploadForm};
use super::{blocking, download_url, ApiResult, AppState};
use crate::master::NewMasterItem;
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

/// GET /api/master-data/list
pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let workflow = state.workflow.clone();
    let items = blocking(move || workflow.list_master()).await?;
    Ok(Json(json!({
        "success": true,
        "count": items.len(),
        "items": items,
    })))
}

/// GET /api/master-data/get/:id
pub async fn get_item(State(state): State<AppState>, ApiPath(id): ApiPath<i64>) -> ApiResult<Json<Value>> {
    let workflow = state.workflow.clone();
    let item = blocking(move || workflow.get_master(id)).await?;
    Ok(Json(json!({ "success": true, "item": item })))
}

/// POST /api/master-data/create
pub async fn create(State(state): State<AppState>, ApiJson(item): ApiJson<NewMasterItem>) -> ApiResult<Json<Value>> {
    let workflow = state.workflow.clone();
    let item = blocking(move || workflow.create_master(&item)).await?;
    Ok(Json(json!({ "success": true, "item": item })))
}

/// PUT /api/master-data/update/:id
pub async fn update(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
    ApiJson(item): ApiJson<NewMasterItem>,
) -> ApiResult<Json<Value>> {
    let workflow = state.workflow.clone();
    let item = blocking(move || workflow.update_master(id, &item)).await?;
    Ok(Json(json!({ "success": true, "item": item })))
}

/// DELETE /api/master-data/delete/:id
pub async fn remove(State(state): State<AppState>, ApiPath(id): ApiPath<i64>) -> ApiResult<Json<Value>> {
    let workflow = state.workflow.clone();
    blocking(move || workflow.delete_master(id)).await?;
    Ok(Json(json!({ "success": true, "deleted_id": id })))
}

/// POST /api/master-data/bulk-import
pub async fn bulk_import(State(state): State<AppState>, form: UploadForm) -> ApiResult<Json<Value>> {
    let (file_name, data) = form.require_file()?;
    let workflow = state.workflow.clone();
    let imported = blocking(move || workflow.import_master_upload(&data, &file_name)).await?;
    Ok(Json(json!({ "success": true, "imported": imported })))
}

/// GET /api/master-data/export
pub async fn export(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let workflow = state.workflow.clone();
    let (file, count) = blocking(move || workflow.export_master()).await?;
    Ok(Json(json!({
        "success": true,
        "filename": file.file_name,
        "download_url": download_url(&file.file_name),
        "count": count,
    })))
}
