//! HTTP API（axum）

pub mod error;
pub mod extract;
pub mod handlers;
pub mod master;

pub use error::{ApiError, ApiResult};

use crate::workflow::BoqWorkflow;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post, put};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// アップロードの上限（50MB）
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// ハンドラー共有の状態
#[derive(Clone)]
pub struct AppState {
    pub workflow: Arc<BoqWorkflow>,
}

impl AppState {
    pub fn new(workflow: BoqWorkflow) -> Self {
        Self {
            workflow: Arc::new(workflow),
        }
    }
}

/// ブロッキング処理（Excel・SQLite）を専用スレッドで実行
pub(crate) async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> crate::error::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("worker failed: {}", e)))?
        .map_err(ApiError::from)
}

pub fn download_url(file_name: &str) -> String {
    format!("/api/download/{}", file_name)
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        // BOQ処理
        .route("/api/process-boq", post(handlers::process_boq))
        .route("/api/generate-final-boq", post(handlers::generate_final_boq))
        .route("/api/apply-markup", post(handlers::apply_markup))
        .route("/api/pure-markup", post(handlers::pure_markup))
        .route("/api/cleanup-session", post(handlers::cleanup_session))
        .route("/api/download/:filename", get(handlers::download))
        // 設定
        .route("/api/config/inquiry", get(handlers::config_inquiry))
        .route("/api/config/update", post(handlers::config_update))
        // マスタ
        .route("/api/master-data/list", get(master::list))
        .route("/api/master-data/get/:id", get(master::get_item))
        .route("/api/master-data/create", post(master::create))
        .route("/api/master-data/update/:id", put(master::update))
        .route("/api/master-data/delete/:id", delete(master::remove))
        .route("/api/master-data/bulk-import", post(master::bulk_import))
        .route("/api/master-data/export", get(master::export))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// サーバーを起動し、終了まで待つ
pub async fn serve(state: AppState, addr: SocketAddr) -> std::io::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app).await
}
