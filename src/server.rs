//! HTTP server for document chat.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/chat` | Answer the latest message as a Server-Sent Events stream |
//! | `POST` | `/api/upload` | Ingest a `.txt` file (multipart field `file`) |
//! | `GET`  | `/api/health` | Ollama and Chroma status |
//!
//! # Error contract
//!
//! `/api/chat` rejects invalid requests with `400` and the reason as a plain
//! text body (`Invalid JSON`, `Missing messages`, `Empty question`). A
//! retrieval failure before the stream starts is `500 Internal Server Error`.
//! Once the stream has started, failures are reported in-band as an `error`
//! event and the response still completes with `200`.
//!
//! `/api/upload` always answers with an `UploadActionState` JSON body:
//! `200` on success, `400` for a rejected file, `500` when ingestion fails.
//!
//! `/api/health` answers `200` even when a dependency is down; check the
//! `status` and `statusCode` fields of the body.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    body::{Body, Bytes},
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::chain::{build_chain, build_prompt, ChatModel};
use crate::chroma::ChromaClient;
use crate::config::Config;
use crate::embedding::{Embedder, OllamaEmbedder};
use crate::health::{check_health, HealthReport};
use crate::ingest::{
    upload_file, DocumentIngestor, UploadActionState, UploadedFile, VectorStoreIngestor,
};
use crate::memory::{ConversationMemory, SummaryBufferMemory};
use crate::ollama::OllamaChatModel;
use crate::request::{read_chat_request, RequestError};
use crate::retrieval::{retrieve_context, Retriever, VectorStoreRetriever};
use crate::stream::{create_chat_event_stream, ChatStreamOptions};

/// Extra room for multipart boundaries and headers above the file limit.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Collaborators the request handlers depend on.
///
/// [`ChatServices::from_config`] builds the Ollama and Chroma backed set;
/// tests inject their own through [`run_server_with`].
#[derive(Clone)]
pub struct ChatServices {
    pub retriever: Arc<dyn Retriever>,
    pub model: Arc<dyn ChatModel>,
    /// One memory per process, shared by every request.
    pub memory: Arc<dyn ConversationMemory>,
    pub ingestor: Arc<dyn DocumentIngestor>,
}

impl ChatServices {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let embedder: Arc<dyn Embedder> = Arc::new(OllamaEmbedder::new(&config.ollama)?);
        let chroma = ChromaClient::new(&config.chroma)?;
        let model: Arc<dyn ChatModel> = Arc::new(OllamaChatModel::new(&config.ollama)?);
        let memory: Arc<dyn ConversationMemory> = Arc::new(SummaryBufferMemory::new(
            model.clone(),
            config.memory.max_token_limit,
        ));

        Ok(Self {
            retriever: Arc::new(VectorStoreRetriever::new(
                embedder.clone(),
                chroma.clone(),
                config.chroma.collection.clone(),
                config.retrieval.k,
            )),
            model,
            memory,
            ingestor: Arc::new(VectorStoreIngestor::new(
                embedder,
                chroma,
                config.chroma.collection.clone(),
                config.chunking.clone(),
            )),
        })
    }
}

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    services: ChatServices,
}

/// Starts the server with Ollama and Chroma collaborators.
///
/// Binds to `[server].bind` and runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let services = ChatServices::from_config(config)?;
    run_server_with(config, services).await
}

/// Starts the server with the given collaborators.
pub async fn run_server_with(config: &Config, services: ChatServices) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = router(config, services);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(
        chat_model = %config.ollama.chat_model,
        collection = %config.chroma.collection,
        "docchat server listening on http://{}",
        bind_addr
    );
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the application router.
pub fn router(config: &Config, services: ChatServices) -> Router {
    let upload_limit = usize::try_from(config.upload.max_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    let state = AppState {
        config: Arc::new(config.clone()),
        services,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/chat", post(handle_chat))
        .route(
            "/api/upload",
            post(handle_upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/health", get(handle_health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============ Error response ============

/// Handler error rendered as a plain-text body.
struct AppError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

impl From<RequestError> for AppError {
    fn from(e: RequestError) -> Self {
        AppError {
            status: e.status(),
            message: e.to_string(),
        }
    }
}

fn internal_error() -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: "Internal Server Error".to_string(),
    }
}

// ============ POST /api/chat ============

async fn handle_chat(State(state): State<AppState>, body: Bytes) -> Result<Response, AppError> {
    let request = read_chat_request(&body).inspect_err(|e| {
        warn!(reason = %e, "Rejected chat request");
    })?;

    let retrieval = retrieve_context(state.services.retriever.as_ref(), &request.question)
        .await
        .map_err(|e| {
            error!(error = %format!("{:#}", e), "Context retrieval failed");
            internal_error()
        })?;
    debug!(
        passages = retrieval.documents.len(),
        context_chars = retrieval.context_text.len(),
        "Retrieved context"
    );

    let chain = build_chain(
        build_prompt(),
        state.services.model.clone(),
        state.services.memory.clone(),
    );
    let stream = create_chat_event_stream(ChatStreamOptions {
        question: request.question,
        context_text: retrieval.context_text,
        latest_message: request.latest_message,
        chain: Arc::new(chain),
        memory: state.services.memory.clone(),
    });

    Ok(sse_response(stream))
}

/// Wrap an SSE byte stream in a streaming, uncached response.
fn sse_response<S>(stream: S) -> Response
where
    S: Stream<Item = Result<Bytes, Infallible>> + Send + 'static,
{
    (
        [
            (header::CONTENT_TYPE, "text/event-stream; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
            (header::PRAGMA, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

// ============ POST /api/upload ============

async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> (StatusCode, Json<UploadActionState>) {
    let file = match read_file_field(&mut multipart).await {
        Ok(file) => file,
        Err(e) => {
            warn!(error = %e, "Failed to read upload");
            return (
                e.status(),
                Json(UploadActionState::error(format!(
                    "Failed to read upload: {}",
                    e.body_text()
                ))),
            );
        }
    };

    let result = upload_file(
        state.services.ingestor.as_ref(),
        file,
        state.config.upload.max_bytes,
    )
    .await;
    let status = match &result {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            info!(reason = %e, "Upload not ingested");
            e.status()
        }
    };
    (status, Json(UploadActionState::from(&result)))
}

/// The first `file` part that carries a file name.
async fn read_file_field(
    multipart: &mut Multipart,
) -> Result<Option<UploadedFile>, MultipartError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let Some(name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let content_type = field.content_type().unwrap_or_default().to_string();
        let data = field.bytes().await?;
        return Ok(Some(UploadedFile {
            name,
            content_type,
            data: data.to_vec(),
        }));
    }
    Ok(None)
}

// ============ GET /api/health ============

/// Always `200`; the upstream verdict is carried in the body's `statusCode`.
async fn handle_health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(check_health(&state.config).await)
}
