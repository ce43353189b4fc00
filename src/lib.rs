//! # Doc Chat
//!
//! Chat with your documents over a streaming HTTP API.
//!
//! Uploaded text files are chunked, embedded with Ollama, and stored in a
//! Chroma collection. Each chat question retrieves the most relevant
//! passages, runs a prompt + model chain with conversation memory, and
//! streams the answer token by token as Server-Sent Events.
//!
//! ## Architecture
//!
//! ```text
//!  POST /api/chat
//!        │
//!        ▼
//! ┌──────────────┐   ┌──────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ Request      │──▶│  Context     │──▶│   Chain     │──▶│  Response    │──▶ SSE
//! │ Reader       │   │  Retriever   │   │  Builder    │   │  Streamer    │
//! └──────────────┘   └──────┬───────┘   └──────┬──────┘   └──────┬───────┘
//!                           │                  │                 │
//!                       Chroma +           Ollama chat      conversation
//!                    Ollama embed          + memory            memory
//!
//!  SSE bytes ──▶ Frame Reader ──▶ Stream Integrator ──▶ assistant message
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docchat ingest ./handbook.txt     # chunk, embed, and store a document
//! docchat serve                     # start the HTTP server
//! docchat ask "What is the refund policy?"
//! docchat chat                      # interactive session
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`models`] | Messages, passages, prompt messages |
//! | [`request`] | Chat request parsing and validation |
//! | [`retrieval`] | Context retrieval |
//! | [`chain`] | Prompt + model + parser chain |
//! | [`memory`] | Summary-buffer conversation memory |
//! | [`stream`] | Server-side SSE response streamer |
//! | [`sse`] | SSE wire format |
//! | [`frame_reader`] | Client-side SSE frame reader |
//! | [`integrator`] | Client-side answer aggregation |
//! | [`client`] | Chat client session |
//! | [`ollama`] | Ollama chat client |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`chroma`] | Chroma HTTP client |
//! | [`chunk`] | Text chunking |
//! | [`ingest`] | Upload validation and ingestion |
//! | [`health`] | Upstream health probes |
//! | [`server`] | HTTP server |

pub mod chain;
pub mod chroma;
pub mod chunk;
pub mod client;
pub mod config;
pub mod embedding;
pub mod frame_reader;
pub mod health;
pub mod ingest;
pub mod integrator;
pub mod memory;
pub mod models;
pub mod ollama;
pub mod prompts;
pub mod request;
pub mod retrieval;
pub mod server;
pub mod sse;
pub mod stream;
