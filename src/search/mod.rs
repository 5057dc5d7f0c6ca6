//! Hybrid retrieval
//!
//! Vector and lexical retrievers each produce an independently ranked list;
//! [`HybridSearch`] runs them concurrently and fuses the lists with RRF.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::document::{Document, DuplicatePolicy};
use crate::error::{Result, StoreError};
use crate::filter::Filter;
use crate::storage::{IndexManager, Writer};

pub mod hybrid;
pub mod lexical;
pub mod vector;

pub use hybrid::{RrfConfig, ScoreSummary, fuse};
pub use lexical::{LEXICAL_SCORE_SHIFT, LexicalRetriever, MISSING_LEXICAL_SCORE, transform_score};
pub use vector::VectorRetriever;

/// Produces a ranked list for one kind of query input.
#[async_trait]
pub trait Retriever<Q: ?Sized + Sync>: Send + Sync {
    /// At most `top_k` documents, best first, each with a score.
    async fn retrieve(
        &self,
        query: &Q,
        filter: Option<&Filter>,
        top_k: usize,
    ) -> Result<Vec<Document>>;
}

#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub filter: Option<Filter>,
    pub embedding: Option<Vec<f32>>,
    pub text: Option<String>,
    pub top_k: usize,
}

/// Write, query, delete and count over injected components.
pub struct HybridSearch {
    writer: Arc<dyn Writer>,
    vector: Arc<dyn Retriever<[f32]>>,
    lexical: Arc<dyn Retriever<str>>,
    indexes: Arc<dyn IndexManager>,
    fusion: RrfConfig,
}

impl HybridSearch {
    pub fn new(
        writer: Arc<dyn Writer>,
        vector: Arc<dyn Retriever<[f32]>>,
        lexical: Arc<dyn Retriever<str>>,
        indexes: Arc<dyn IndexManager>,
        fusion: RrfConfig,
    ) -> Self {
        Self {
            writer,
            vector,
            lexical,
            indexes,
            fusion,
        }
    }

    pub async fn bootstrap(&self) -> Result<()> {
        self.indexes.bootstrap().await
    }

    pub async fn write(&self, documents: Vec<Document>, policy: DuplicatePolicy) -> Result<usize> {
        self.writer.write(documents, policy).await
    }

    /// Both inputs run concurrently and are fused; one input runs alone.
    pub async fn query(&self, request: QueryRequest) -> Result<Vec<Document>> {
        let filter = request.filter.as_ref();
        let top_k = request.top_k;

        match (request.embedding.as_deref(), request.text.as_deref()) {
            (Some(embedding), Some(text)) => {
                debug!(top_k, "hybrid query");
                let (vector, lexical) = tokio::try_join!(
                    self.vector.retrieve(embedding, filter, top_k),
                    self.lexical.retrieve(text, filter, top_k),
                )?;
                Ok(fuse(&vector, &lexical, top_k, &self.fusion))
            }
            (Some(embedding), None) => self.vector.retrieve(embedding, filter, top_k).await,
            (None, Some(text)) => self.lexical.retrieve(text, filter, top_k).await,
            (None, None) => Err(StoreError::Validation(
                "query needs an embedding, text, or both".to_string(),
            )),
        }
    }

    /// Delete matching documents; `None` deletes every row.
    pub async fn delete(&self, filter: Option<&Filter>) -> Result<u64> {
        self.writer.delete_by_filter(filter).await
    }

    pub async fn delete_ids(&self, ids: &[String]) -> Result<u64> {
        self.writer.delete_documents(ids).await
    }

    pub async fn count(&self) -> Result<u64> {
        self.writer.count().await
    }
}
