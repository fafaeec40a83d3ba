//! # knowledge-rag core
//!
//! Shared, I/O-free logic for knowledge-rag: the page/chunk/entry data
//! model, the error taxonomy, the overlapping chunker, the namespace
//! resolver, the embedder and vector-index traits (plus an in-memory
//! index), the retriever and the answer prompt template.
//!
//! This crate contains no tokio runtime, sqlx, HTTP client or filesystem
//! access. Concrete loaders, embedding providers and index backends live
//! in the `knowledge-rag` application crate.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod index;
pub mod knowledge;
pub mod models;
pub mod namespace;
pub mod prompt;
pub mod retrieve;
