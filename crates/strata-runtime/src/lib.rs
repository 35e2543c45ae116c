//! `strata-runtime` – provider-backed collaborators and process telemetry.
//!
//! # Modules
//!
//! - [`llm_summarizer`] – [`LlmSummarizer`][llm_summarizer::LlmSummarizer]:
//!   a [`Summarizer`][strata_memory::Summarizer] that talks to an
//!   OpenAI-compatible `/v1/chat/completions` endpoint.  List-shaped answers
//!   (facts, themes) are requested with a JSON Schema in `response_format`.
//! - [`ollama`] – [`OllamaEmbedder`][ollama::OllamaEmbedder], an
//!   [`Embedder`][strata_memory::Embedder] over `/api/embeddings`, plus
//!   model discovery via `/api/tags`.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter.  Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable live trace export.

pub mod llm_summarizer;
pub mod ollama;
pub mod telemetry;

pub use llm_summarizer::{ChatMessage, LlmSummarizer, ProviderError, SYSTEM_PROMPT};
pub use ollama::{OllamaEmbedder, OllamaModel, fetch_models, is_running};
pub use telemetry::{TracerProviderGuard, init_tracing};
