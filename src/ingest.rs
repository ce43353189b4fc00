//! Document upload and ingestion.
//!
//! An uploaded `.txt` file is validated, split into overlapping chunks,
//! embedded, and stored in the Chroma collection that the chat retriever
//! queries. The same path backs `POST /api/upload` and `docchat ingest`.
//!
//! Validation runs in a fixed order and stops at the first failure:
//!
//! | Check | Message |
//! |-------|---------|
//! | file part present | `No file provided.` |
//! | name ends with `.txt` | `Only .txt files are allowed.` |
//! | MIME is `text/plain` or empty | `Invalid file type.` |
//! | size > 0 | `File is empty.` |
//! | size <= limit | `File too large. Max 5.0MB.` |

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use crate::chroma::{ChromaClient, ChromaRecord};
use crate::chunk::{chunk_text, TextChunk};
use crate::config::{ChunkingConfig, Config};
use crate::embedding::{Embedder, OllamaEmbedder};

/// Message reported for any failure after validation.
pub const INGEST_FAILED: &str = "Failed to ingest document. Please check the logs.";

pub const UPLOAD_SUCCESS: &str = "File ingested successfully.";

const ALLOWED_EXTENSION: &str = ".txt";
const ALLOWED_MIME_TYPE: &str = "text/plain";

/// Chunks embedded per request to the embedding service.
const EMBED_BATCH_SIZE: usize = 64;

/// An uploaded file held in memory.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

impl UploadedFile {
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    #[error("No file provided.")]
    NoFile,
    #[error("Only .txt files are allowed.")]
    NotText,
    #[error("Invalid file type.")]
    InvalidType,
    #[error("File is empty.")]
    Empty,
    #[error("File too large. Max {}MB.", megabytes(.max_bytes))]
    TooLarge { max_bytes: u64 },
}

fn megabytes(bytes: &u64) -> String {
    format!("{:.1}", *bytes as f64 / 1024.0 / 1024.0)
}

/// Check an upload before any ingestion work starts.
pub fn validate_upload(file: Option<&UploadedFile>, max_bytes: u64) -> Result<(), UploadError> {
    let file = file.ok_or(UploadError::NoFile)?;
    if !file.name.to_lowercase().ends_with(ALLOWED_EXTENSION) {
        return Err(UploadError::NotText);
    }
    if !file.content_type.is_empty() && file.content_type != ALLOWED_MIME_TYPE {
        return Err(UploadError::InvalidType);
    }
    if file.size() == 0 {
        return Err(UploadError::Empty);
    }
    if file.size() > max_bytes {
        return Err(UploadError::TooLarge { max_bytes });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Idle,
    Success,
    Error,
}

/// JSON body of `POST /api/upload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadActionState {
    pub status: UploadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl UploadActionState {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: UploadStatus::Success,
            message: Some(message.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: UploadStatus::Error,
            message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == UploadStatus::Success
    }
}

/// Stores a validated document so the retriever can find it.
#[async_trait]
pub trait DocumentIngestor: Send + Sync {
    /// Ingest `file`, returning the number of chunks stored.
    async fn ingest(&self, file: &UploadedFile) -> Result<usize>;
}

/// Ingests into a Chroma collection using an [`Embedder`].
pub struct VectorStoreIngestor {
    embedder: Arc<dyn Embedder>,
    chroma: ChromaClient,
    collection: String,
    chunking: ChunkingConfig,
}

impl VectorStoreIngestor {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        chroma: ChromaClient,
        collection: String,
        chunking: ChunkingConfig,
    ) -> Self {
        Self {
            embedder,
            chroma,
            collection,
            chunking,
        }
    }
}

#[async_trait]
impl DocumentIngestor for VectorStoreIngestor {
    async fn ingest(&self, file: &UploadedFile) -> Result<usize> {
        ingest_document(
            self.embedder.as_ref(),
            &self.chroma,
            &self.collection,
            file,
            &self.chunking,
        )
        .await
    }
}

/// Split, embed, and store one document.
///
/// Any failure is logged with its cause and replaced by [`INGEST_FAILED`].
pub async fn ingest_document(
    embedder: &dyn Embedder,
    chroma: &ChromaClient,
    collection: &str,
    file: &UploadedFile,
    chunking: &ChunkingConfig,
) -> Result<usize> {
    match store_chunks(embedder, chroma, collection, file, chunking).await {
        Ok(count) => {
            info!(file = %file.name, chunks = count, "Successfully ingested document");
            Ok(count)
        }
        Err(e) => {
            error!(file = %file.name, error = %format!("{:#}", e), "Ingestion failed");
            anyhow::bail!(INGEST_FAILED)
        }
    }
}

async fn store_chunks(
    embedder: &dyn Embedder,
    chroma: &ChromaClient,
    collection: &str,
    file: &UploadedFile,
    chunking: &ChunkingConfig,
) -> Result<usize> {
    let text = String::from_utf8_lossy(&file.data);
    let chunks = chunk_text(&text, chunking.chunk_size, chunking.chunk_overlap);
    if chunks.is_empty() {
        return Ok(0);
    }

    let collection_id = chroma.get_or_create_collection(collection).await?;

    for batch in chunks.chunks(EMBED_BATCH_SIZE) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed_texts(&texts).await?;
        let records: Vec<ChromaRecord> = batch
            .iter()
            .zip(vectors)
            .map(|(chunk, embedding)| to_record(file, chunk, embedding))
            .collect();
        chroma.add(&collection_id, &records).await?;
    }

    Ok(chunks.len())
}

fn to_record(file: &UploadedFile, chunk: &TextChunk, embedding: Vec<f32>) -> ChromaRecord {
    ChromaRecord {
        id: Uuid::new_v4().to_string(),
        embedding,
        document: chunk.text.clone(),
        metadata: serde_json::json!({
            "name": file.name,
            "type": file.content_type,
            "size": file.size(),
            "chunk_index": chunk.index,
            "hash": chunk.hash,
        }),
    }
}

/// Why an upload did not produce stored chunks.
#[derive(Debug, Error)]
pub enum UploadFailure {
    #[error(transparent)]
    Rejected(#[from] UploadError),
    #[error("Ingestion failed: {0}")]
    Ingestion(anyhow::Error),
}

impl UploadFailure {
    /// HTTP status for `POST /api/upload`.
    pub fn status(&self) -> StatusCode {
        match self {
            UploadFailure::Rejected(_) => StatusCode::BAD_REQUEST,
            UploadFailure::Ingestion(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<&Result<usize, UploadFailure>> for UploadActionState {
    fn from(result: &Result<usize, UploadFailure>) -> Self {
        match result {
            Ok(_) => UploadActionState::success(UPLOAD_SUCCESS),
            Err(e) => UploadActionState::error(e.to_string()),
        }
    }
}

/// Validate and ingest an upload, returning the number of chunks stored.
///
/// Backs both `POST /api/upload` and `docchat ingest`.
pub async fn upload_file(
    ingestor: &dyn DocumentIngestor,
    file: Option<UploadedFile>,
    max_bytes: u64,
) -> Result<usize, UploadFailure> {
    validate_upload(file.as_ref(), max_bytes)?;
    let file = file.ok_or(UploadError::NoFile)?;

    let chunks = ingestor
        .ingest(&file)
        .await
        .map_err(UploadFailure::Ingestion)?;
    info!(file = %file.name, chunks, "Upload ingested");
    Ok(chunks)
}

/// Build the production ingestor from configuration.
pub fn vector_store_ingestor(config: &Config) -> Result<VectorStoreIngestor> {
    let embedder: Arc<dyn Embedder> = Arc::new(OllamaEmbedder::new(&config.ollama)?);
    Ok(VectorStoreIngestor::new(
        embedder,
        ChromaClient::new(&config.chroma)?,
        config.chroma.collection.clone(),
        config.chunking.clone(),
    ))
}

/// `docchat ingest <path>`: ingest a local file.
pub async fn run_ingest(config: &Config, path: &Path) -> Result<()> {
    let data =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let content_type = if name.to_lowercase().ends_with(ALLOWED_EXTENSION) {
        ALLOWED_MIME_TYPE
    } else {
        "application/octet-stream"
    };
    let file = UploadedFile {
        name,
        content_type: content_type.to_string(),
        data,
    };

    let ingestor = vector_store_ingestor(config)?;
    let chunks = upload_file(&ingestor, Some(file), config.upload.max_bytes)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    println!("{} ({} chunks)", UPLOAD_SUCCESS, chunks);
    Ok(())
}
