//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Banner |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/status` | LLM liveness: `{ "ollama_running": bool }` |
//! | `POST` | `/upload?session_id=…` | Multipart upload (`file` field); `202` once accepted |
//! | `GET`  | `/document/status/{session_id}` | Current processing status |
//! | `GET`  | `/document/events/{session_id}` | Status transitions as server-sent events |
//! | `POST` | `/question` | Ask about the session's document |
//!
//! # Error Contract
//!
//! Every error response is `{ "detail": "<message>" }`:
//!
//! | Error | Status |
//! |-------|--------|
//! | missing session id, bad file type, not ready, empty question | 400 |
//! | unknown session (with `session.unknown = "reject"`) | 404 |
//! | upload over `upload.max_bytes` | 413 |
//! | embedding / LLM failure | 502 |
//! | embedding / LLM timeout | 504 |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser UI served
//! from another port can call the API.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{
        multipart::MultipartError, rejection::JsonRejection, DefaultBodyLimit, Multipart, Path,
        Query, State,
    },
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::RagError;
use crate::models::{RetrievedChunk, StatusSnapshot};
use crate::service::DocChat;

/// Room for multipart framing on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Build the application router around a wired [`DocChat`].
pub fn router(app: DocChat) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let body_limit = app.config.upload.max_bytes.saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/status", get(handle_status))
        .route(
            "/upload",
            post(handle_upload).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/document/status/{session_id}", get(handle_document_status))
        .route("/document/events/{session_id}", get(handle_document_events))
        .route("/question", post(handle_question))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app)
}

/// Serve until Ctrl-C.
pub async fn run_server(app: DocChat) -> anyhow::Result<()> {
    let bind_addr = app.config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "DocChat API listening");

    axum::serve(listener, router(app))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "could not install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

/// Error type that converts into an Axum HTTP response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    detail: String,
}

impl AppError {
    fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(status = %self.status, detail = %self.detail, "request failed");
        }
        (self.status, Json(ErrorBody { detail: self.detail })).into_response()
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let status = match &err {
            RagError::InvalidRequest(_)
            | RagError::UnsupportedFileType { .. }
            | RagError::DocumentNotReady { .. }
            | RagError::Extraction(_)
            | RagError::EmptyDocument
            | RagError::LlmUnavailable(_) => StatusCode::BAD_REQUEST,
            RagError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            RagError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            e if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            RagError::Embedding(_) | RagError::Generation(_) => StatusCode::BAD_GATEWAY,
            RagError::Io(_) | RagError::Superseded => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            detail: err.to_string(),
        }
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        Self {
            status: err.status(),
            detail: err.body_text(),
        }
    }
}

// ============ GET / , /health, /status ============

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

async fn handle_root() -> Json<MessageResponse> {
    Json(MessageResponse {
        message: "DocChat RAG API is running".to_string(),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Serialize)]
struct LlmStatusResponse {
    ollama_running: bool,
}

async fn handle_status(State(app): State<DocChat>) -> Json<LlmStatusResponse> {
    Json(LlmStatusResponse {
        ollama_running: app.llm_available().await,
    })
}

// ============ POST /upload ============

#[derive(Deserialize)]
struct UploadParams {
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Serialize)]
struct UploadResponse {
    session_id: String,
    status: String,
    message: String,
}

/// Handler for `POST /upload`.
///
/// Reads the `file` field, validates it, and hands it to the ingestion
/// pipeline. Returns `202 Accepted` as soon as the session is `Uploading`;
/// progress is observed through the status endpoints.
async fn handle_upload(
    State(app): State<DocChat>,
    Query(params): Query<UploadParams>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    let session_id = params.session_id.unwrap_or_default();
    if session_id.trim().is_empty() {
        return Err(AppError::bad_request("Session ID is required"));
    }

    let mut upload: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        if filename.is_empty() {
            return Err(AppError::bad_request("Uploaded file has no filename"));
        }
        // Reject the type before buffering the body.
        app.pipeline.validate(&session_id, &filename, 0)?;
        let bytes = field.bytes().await?;
        upload = Some((filename, bytes.to_vec()));
        break;
    }
    let (filename, bytes) = upload.ok_or_else(|| AppError::bad_request("No file uploaded"))?;

    let accepted = app.pipeline.accept(&session_id, &filename, bytes)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(UploadResponse {
            session_id: accepted.ticket.session_id.clone(),
            status: "processing".to_string(),
            message: format!(
                "Document '{}' uploaded and is being processed",
                accepted.ticket.filename
            ),
        }),
    ))
}

// ============ GET /document/status/{session_id} ============

async fn handle_document_status(
    State(app): State<DocChat>,
    Path(session_id): Path<String>,
) -> Result<Json<StatusSnapshot>, AppError> {
    Ok(Json(app.store.snapshot(&session_id)?))
}

// ============ GET /document/events/{session_id} ============

/// Streams one `status` event per committed transition, starting with the
/// current state.
async fn handle_document_events(
    State(app): State<DocChat>,
    Path(session_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let (current, receiver) = app.store.subscribe(&session_id)?;
    let updates = BroadcastStream::new(receiver).filter_map(|update| update.ok());
    let stream = tokio_stream::once(current)
        .chain(updates)
        .map(|snapshot| Ok(status_event(&snapshot)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

fn status_event(snapshot: &StatusSnapshot) -> Event {
    let event = Event::default().event("status");
    match serde_json::to_string(snapshot) {
        Ok(json) => event.data(json),
        Err(e) => event.comment(format!("unserializable snapshot: {}", e)),
    }
}

// ============ POST /question ============

#[derive(Deserialize)]
struct QuestionRequest {
    question: String,
    session_id: String,
    #[serde(default = "default_include_reasoning")]
    include_reasoning: bool,
}

fn default_include_reasoning() -> bool {
    true
}

#[derive(Serialize)]
struct QuestionResponse {
    answer: String,
    thinking: String,
    sources: Vec<RetrievedChunk>,
}

async fn handle_question(
    State(app): State<DocChat>,
    request: Result<Json<QuestionRequest>, JsonRejection>,
) -> Result<Json<QuestionResponse>, AppError> {
    let Json(request) = request.map_err(|e| AppError::bad_request(e.body_text()))?;
    let result = app
        .engine
        .ask(&request.session_id, &request.question, request.include_reasoning)
        .await?;
    Ok(Json(QuestionResponse {
        answer: result.answer,
        thinking: result.thinking,
        sources: result.sources,
    }))
}
