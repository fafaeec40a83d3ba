//! # Knowledge RAG
//!
//! PDF ingestion and retrieval for per-user knowledge folders.
//!
//! Uploaded PDFs are split into pages, chunked, embedded and written to a
//! vector index partition named after the owner and folder. Questions are
//! embedded the same way and answered with the nearest chunks of one
//! partition, optionally rendered into a QA prompt.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌──────────────┐
//! │  Upload  │──▶│   Load   │──▶│  Chunk   │──▶│    Embed     │
//! │ (job id) │   │ PDF/page │   │ 1000/200 │   │ OpenAI/Ollama│
//! └──────────┘   └──────────┘   └──────────┘   └──────┬───────┘
//!                                                     ▼
//!                ┌──────────┐                  ┌──────────────┐
//!                │ Retrieve │◀─────────────────│ Vector index │
//!                │  top-k   │                  │ SQLite/Pinecone
//!                └──────────┘                  └──────────────┘
//! ```
//!
//! The domain types, chunker, namespace rules and retriever live in the
//! `knowledge-rag-core` crate; this crate adds the PDF loader, HTTP
//! clients, storage backends, background jobs and the `kb` binary.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`extract`] | PDF loading, one document per page |
//! | [`embedding`] | Embedding providers and batching |
//! | [`sqlite_index`] | Vector index in SQLite |
//! | [`pinecone`] | Vector index on Pinecone |
//! | [`backend`] | Index backend selection |
//! | [`ingest`] | Ingestion pipeline |
//! | [`jobs`] | Background ingestion jobs |
//! | [`knowledge_http`] | Knowledge record store client |
//! | [`upload`] | Upload boundary |
//! | [`commands`] | CLI command handlers |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`retry`] | Backoff policy |

pub mod backend;
pub mod commands;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod ingest;
pub mod jobs;
pub mod knowledge_http;
pub mod migrate;
pub mod pinecone;
pub mod retry;
pub mod sqlite_index;
pub mod upload;
