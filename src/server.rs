//! JSON HTTP server.
//!
//! The server is stateless with respect to conversations: each `/chat`
//! request carries the full history and gets the extended history back.
//! One [`RagChain`] is shared by all requests.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/chat` | Run one conversational turn |
//! | `POST` | `/search` | Retrieve passages for a query, no generation |
//! | `GET`  | `/health` | Status, version, and index summary |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "input must not be empty" } }
//! ```
//!
//! Codes: `bad_request` (400), `configuration` (400), `index_not_found` (404),
//! `embedding_service` / `generation_service` (502), `dimension_mismatch` and
//! `storage` (500).

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use rag_chat_core::models::{ConversationHistory, RetrievedPassage, Turn};
use rag_chat_core::orchestrator::RagChain;
use rag_chat_core::RagError;

/// Shared state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    chain: Arc<RagChain>,
}

impl AppState {
    pub fn new(chain: RagChain) -> Self {
        Self {
            chain: Arc::new(chain),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/chat", post(handle_chat))
        .route("/search", post(handle_search))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Bind `bind_addr` and serve until the process is terminated.
pub async fn run_server(bind_addr: &str, state: AppState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!(addr = %listener.local_addr()?, "ragchat server listening");
    serve(listener, state).await
}

/// Serve on an already-bound listener.
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let status = match &err {
            RagError::Configuration(_) => StatusCode::BAD_REQUEST,
            RagError::IndexNotFound { .. } => StatusCode::NOT_FOUND,
            RagError::EmbeddingService(_) | RagError::GenerationService(_) => {
                StatusCode::BAD_GATEWAY
            }
            RagError::DimensionMismatch { .. } | RagError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            warn!(code = err.code(), error = %err, "request failed");
        }
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    store_id: String,
    records: usize,
    model: String,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let meta = state.chain.retriever().index().meta();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        store_id: meta.store_id.clone(),
        records: meta.record_count,
        model: meta.model.clone(),
    })
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatBody {
    #[serde(default)]
    history: Vec<Turn>,
    input: String,
}

#[derive(Serialize)]
struct ChatResponse {
    answer: String,
    standalone_query: String,
    passages: Vec<RetrievedPassage>,
    history: ConversationHistory,
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> Result<Json<ChatResponse>, AppError> {
    if body.input.trim().is_empty() {
        return Err(bad_request("input must not be empty"));
    }

    let mut history = ConversationHistory::from(body.history);
    let outcome = state.chain.turn(&mut history, &body.input).await?;

    Ok(Json(ChatResponse {
        answer: outcome.answer,
        standalone_query: outcome.standalone_query,
        passages: outcome.passages,
        history,
    }))
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchBody {
    query: String,
    #[serde(default)]
    k: Option<usize>,
}

#[derive(Serialize)]
struct SearchResponse {
    passages: Vec<RetrievedPassage>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(body): Json<SearchBody>,
) -> Result<Json<SearchResponse>, AppError> {
    if body.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let retriever = match body.k {
        Some(k) => state.chain.retriever().clone().with_k(k)?,
        None => state.chain.retriever().clone(),
    };
    let passages = retriever.retrieve(&body.query).await?;
    Ok(Json(SearchResponse { passages }))
}
