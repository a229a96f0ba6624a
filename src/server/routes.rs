//! Route handlers and the error-to-response mapping.
use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, warn};

use super::AppState;
use crate::config::IndexBackend;
use crate::pipeline::{PipelineError, PipelineState};

const NOT_INITIALIZED: &str = "RAG system not initialized (check data/keys).";
const RATE_LIMITED: &str = "Groq API Rate Limit. Please wait a minute.";

/// An error response carrying `{"detail": ...}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err.as_llm() {
            Some(e) if e.is_rate_limited() => Self::new(StatusCode::SERVICE_UNAVAILABLE, RATE_LIMITED),
            Some(e) if e.is_credential_error() => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Configuration Error: LLM API key missing or rejected.",
            ),
            _ => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Internal Error: {}", err.detail()),
            ),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub answer: String,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct DiagnoseResponse {
    pub status: &'static str,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<IndexBackend>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub built_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

impl DiagnoseResponse {
    fn error(detail: impl Into<String>) -> Self {
        Self {
            status: "error",
            detail: detail.into(),
            backend: None,
            chunks: None,
            built_at: None,
            traceback: None,
        }
    }

    fn from_state(state: &PipelineState) -> Self {
        match state {
            PipelineState::Ready(p) => Self {
                status: "ok",
                detail: "RAG pipeline initialized successfully.".to_string(),
                backend: Some(p.backend()),
                chunks: Some(p.chunk_count()),
                built_at: Some(p.built_at().to_rfc3339()),
                traceback: None,
            },
            PipelineState::Unavailable(reason) => Self::error(reason.to_string()),
            PipelineState::Failed { detail, traceback } => Self {
                traceback: Some(traceback.clone()),
                ..Self::error(detail.clone())
            },
        }
    }

    /// Report the backend and build time of the pipeline answering `/chat`.
    fn serving(mut self, held: &PipelineState) -> Self {
        let pipeline = held.pipeline();
        self.backend = pipeline.as_ref().map(|p| p.backend());
        self.built_at = pipeline.as_ref().map(|p| p.built_at().to_rfc3339());
        self
    }
}

fn task_failed(what: &str, e: tokio::task::JoinError) -> PipelineState {
    warn!("{what} task failed: {e}");
    PipelineState::Failed {
        detail: format!("{what} task failed: {e}"),
        traceback: format!("{e:?}"),
    }
}

pub async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "message": "RAG Chatbot Backend is running."
    }))
}

/// Check the preconditions live, then run a throwaway in-memory build and
/// report its outcome. `backend` and `built_at` describe the pipeline that
/// is currently serving, which this never replaces.
pub async fn diagnose(State(state): State<AppState>) -> Json<DiagnoseResponse> {
    let config = state.builder.config();

    if !config.document_path().exists() {
        return Json(DiagnoseResponse::error("Portfolio data file not found."));
    }
    if state.builder.credential().is_none() {
        return Json(DiagnoseResponse::error(format!(
            "{} not set.",
            config.llm.api_key_env
        )));
    }

    let builder = state.builder.clone();
    let trial = match tokio::task::spawn_blocking(move || builder.diagnose()).await {
        Ok(trial) => trial,
        Err(e) => task_failed("Diagnostic build", e),
    };

    let held = state.pipeline.read().await;
    Json(DiagnoseResponse::from_state(&trial).serving(&held))
}

pub async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(req) = payload.map_err(|rejection| {
        warn!("Rejected chat request: {}", rejection.body_text());
        ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, rejection.body_text())
    })?;
    if req.message.trim().is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "Message must not be empty.",
        ));
    }

    let Some(pipeline) = state.pipeline.read().await.pipeline() else {
        return Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            NOT_INITIALIZED,
        ));
    };

    info!("Received query: {}", req.message);
    match pipeline.answer(&req.message).await {
        Ok(answer) => {
            debug!("Answer: {answer}");
            Ok(Json(ChatResponse { answer }))
        }
        Err(e) => {
            error!("Chat failed: {}", e.detail());
            Err(ApiError::from(e))
        }
    }
}

/// Rebuild the pipeline from the current document and environment.
pub async fn reload(State(state): State<AppState>) -> Json<DiagnoseResponse> {
    let _guard = state.rebuild.lock().await;
    info!("Rebuilding RAG pipeline");

    let builder = state.builder.clone();
    let next = match tokio::task::spawn_blocking(move || builder.initialize()).await {
        Ok(next) => next,
        Err(e) => task_failed("Rebuild", e),
    };
    if next.is_ready() {
        info!("Swapping in rebuilt RAG pipeline");
    } else {
        warn!("Rebuild did not produce a pipeline; /chat will report not initialized");
    }

    let response = DiagnoseResponse::from_state(&next);
    *state.pipeline.write().await = next;
    Json(response)
}
