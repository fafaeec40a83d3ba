//! Query-time retrieval.
//!
//! [`Retriever`] embeds a question with the same [`Embedder`] used at
//! ingestion and asks the [`VectorIndex`] for the nearest entries of one
//! namespace. Results come back in non-increasing score order, at most
//! `top_k` of them, ready to be joined into a prompt's `{context}`.

use std::sync::Arc;

use tracing::debug;

use crate::embedding::Embedder;
use crate::error::RetrieveError;
use crate::index::VectorIndex;
use crate::models::RetrievedChunk;

/// Default number of chunks handed to the answer generator.
pub const DEFAULT_TOP_K: usize = 4;

#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    /// Embed `question` and return the `top_k` closest chunks of `namespace`.
    pub async fn retrieve(
        &self,
        namespace: &str,
        question: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, RetrieveError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embedder.embed_query(question).await?;
        self.retrieve_with_vector(namespace, &vector, top_k).await
    }

    /// Like [`Retriever::retrieve`] with a precomputed question embedding.
    pub async fn retrieve_with_vector(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, RetrieveError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let mut hits = self.index.query(namespace, vector, top_k).await?;
        // Backends promise ordering; enforce the bound regardless.
        hits.truncate(top_k);
        debug!(namespace, top_k, hits = hits.len(), "retrieved");
        Ok(hits.into_iter().map(RetrievedChunk::from).collect())
    }
}
