use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        multipart::MultipartRejection, rejection::PathRejection, DefaultBodyLimit, Multipart,
        Path, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinError;

use crate::core::{CacheError, ShapeCache, ShapeKey, Upload};
use crate::stats::CacheStats;

/// multipart 字段名
pub const UPLOAD_FIELD: &str = "uploadFile";

/// multipart 边界/头部的余量；真正的上限在读字段时按内容长度判断
const MULTIPART_OVERHEAD: usize = 64 * 1024;

const NOT_FOUND_BODY: &str = "404 not found.";

#[derive(Clone)]
struct AppState {
    cache: Arc<ShapeCache>,
    fatal: Arc<Notify>,
}

/// HTTP 服务：`GET|POST /<region>/<version>/<shape>`、`GET /all`、`GET /status`
pub struct ShapeServer {
    pub cache: Arc<ShapeCache>,
    fatal: Arc<Notify>,
}

impl ShapeServer {
    pub fn new(cache: Arc<ShapeCache>) -> Self {
        Self {
            cache,
            fatal: Arc::new(Notify::new()),
        }
    }

    pub fn router(&self) -> Router {
        let body_limit = usize::try_from(self.cache.max_upload_bytes())
            .unwrap_or(usize::MAX)
            .saturating_add(MULTIPART_OVERHEAD);

        Router::new()
            .route("/all", get(all_handler))
            .route("/status", get(status_handler))
            .route(
                "/*path",
                get(get_shape)
                    .post(post_shape)
                    .fallback(method_not_allowed),
            )
            .fallback(not_found)
            .layer(DefaultBodyLimit::max(body_limit))
            .with_state(AppState {
                cache: self.cache.clone(),
                fatal: self.fatal.clone(),
            })
    }

    pub async fn run(self, addr: SocketAddr) -> anyhow::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// 在已绑定的 listener 上服务，直到 Ctrl-C 或快照落盘失败
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        tracing::info!("HTTP Shape Server listening on {}", listener.local_addr()?);
        let app = self.router();
        let fatal = self.fatal.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(fatal))
            .await?;

        if self.cache.is_poisoned() {
            anyhow::bail!("index snapshot could not be persisted, server stopped");
        }
        Ok(())
    }
}

async fn shutdown_signal(fatal: Arc<Notify>) {
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                tracing::warn!("ctrl_c handler unavailable: {}", e);
                // 没有信号可等时只等 fatal
                fatal.notified().await;
                tracing::error!("Fatal index error, shutting down");
                return;
            }
            tracing::info!("Shutting down...");
        }
        _ = fatal.notified() => {
            tracing::error!("Fatal index error, shutting down");
        }
    }
}

impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::MalformedKey(_) | CacheError::NotFound(_) => {
                return (StatusCode::NOT_FOUND, NOT_FOUND_BODY).into_response();
            }
            CacheError::AlreadyExists(_)
            | CacheError::TooBig { .. }
            | CacheError::InvalidUpload(_) => StatusCode::BAD_REQUEST,
            CacheError::WriteFailure { .. } | CacheError::PersistFailure(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, self.code()).into_response()
    }
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, NOT_FOUND_BODY).into_response()
}

async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        "Sorry, only GET and POST methods are supported.",
    )
        .into_response()
}

async fn all_handler(State(state): State<AppState>) -> Response {
    match state.cache.index().dump() {
        Ok(body) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(e) => {
            tracing::error!("serialize index: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn status_handler(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache.stats())
}

async fn get_shape(
    path: Result<Path<String>, PathRejection>,
    State(state): State<AppState>,
) -> Result<Response, CacheError> {
    let key = key_from_path(path)?;
    tracing::debug!("GET {}", key);

    let cache = state.cache.clone();
    let bytes = match tokio::task::spawn_blocking(move || cache.retrieve(&key)).await {
        Ok(res) => res?,
        Err(e) => return Ok(join_failure(e)),
    };

    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        bytes,
    )
        .into_response())
}

async fn post_shape(
    path: Result<Path<String>, PathRejection>,
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, CacheError> {
    let key = key_from_path(path)?;
    tracing::debug!("POST {}", key);

    // 传输层拒绝的上传同样计入 rejected
    let upload = match receive_upload(multipart, state.cache.max_upload_bytes()).await {
        Ok(upload) => upload,
        Err(e) => {
            tracing::warn!("{}: upload rejected: {}", key, e);
            state.cache.record_rejected();
            return Err(e);
        }
    };

    let cache = state.cache.clone();
    let result = match tokio::task::spawn_blocking(move || cache.insert(&key, upload)).await {
        Ok(result) => result,
        Err(e) => return Ok(join_failure(e)),
    };

    match result {
        Ok(_) => Ok("SUCCESS".into_response()),
        Err(e) => {
            if e.is_fatal() {
                state.fatal.notify_one();
            }
            Err(e)
        }
    }
}

/// 路径参数无法解码（如非法百分号编码）与段数不对一样按 malformed 处理
fn key_from_path(path: Result<Path<String>, PathRejection>) -> Result<ShapeKey, CacheError> {
    let Path(path) = path.map_err(|e| CacheError::MalformedKey(e.body_text()))?;
    ShapeKey::parse_path(&path)
}

/// blocking 任务 panic/被取消：服务端故障
fn join_failure(e: JoinError) -> Response {
    tracing::error!("blocking task failed: {}", e);
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

async fn receive_upload(
    multipart: Result<Multipart, MultipartRejection>,
    limit: u64,
) -> Result<Upload, CacheError> {
    let multipart =
        multipart.map_err(|e| CacheError::InvalidUpload(format!("not a multipart body: {e}")))?;
    read_upload(multipart, limit).await
}

/// 读取 `uploadFile` 字段；按块累积，超过上限立即放弃（不缓冲超限内容）
async fn read_upload(mut multipart: Multipart, limit: u64) -> Result<Upload, CacheError> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_owned)
            .ok_or_else(|| CacheError::InvalidUpload("missing filename".into()))?;

        let mut content: Vec<u8> = Vec::new();
        while let Some(chunk) = field.chunk().await.map_err(|e| multipart_error(e, limit))? {
            append_within_limit(&mut content, &chunk, limit)?;
        }
        return Ok(Upload { filename, content });
    }
    Err(CacheError::InvalidUpload(format!(
        "missing form field {UPLOAD_FIELD:?}"
    )))
}

fn append_within_limit(buf: &mut Vec<u8>, chunk: &Bytes, limit: u64) -> Result<(), CacheError> {
    let size = (buf.len() + chunk.len()) as u64;
    if size > limit {
        return Err(CacheError::TooBig { size, limit });
    }
    buf.extend_from_slice(chunk);
    Ok(())
}

fn multipart_error(e: axum::extract::multipart::MultipartError, limit: u64) -> CacheError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        // 请求体被 DefaultBodyLimit 截断：实际大小未知
        CacheError::TooBig {
            size: limit.saturating_add(1),
            limit,
        }
    } else {
        CacheError::InvalidUpload(e.body_text())
    }
}
