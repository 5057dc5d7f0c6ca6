//! Nearest-neighbor retrieval over the embedding column.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::{SearchStrategy, SimilarityFunction};
use crate::document::{Document, validate_embedding};
use crate::error::{Result, StoreError};
use crate::filter::{self, Filter, SqlParam};
use crate::search::Retriever;
use crate::storage::rows::{SELECT_COLUMNS, bind_params, column, decode_document, vector_literal};
use crate::storage::{DocumentStore, IndexSettings};

pub struct VectorRetriever {
    store: Arc<DocumentStore>,
    index: IndexSettings,
}

impl VectorRetriever {
    pub fn new(store: Arc<DocumentStore>, index: IndexSettings) -> Self {
        Self { store, index }
    }

    /// Replace the default similarity function for every call.
    #[must_use]
    pub fn with_function(mut self, function: SimilarityFunction) -> Self {
        self.index.function = function;
        self
    }

    pub fn function(&self) -> SimilarityFunction {
        self.index.function
    }

    /// Query text plus bound parameters. `$1` is the query vector and the
    /// last parameter the limit.
    fn query(
        &self,
        embedding: &[f32],
        filter: Option<&Filter>,
        top_k: usize,
        function: SimilarityFunction,
    ) -> Result<(String, Vec<SqlParam>)> {
        let layout = self.store.layout();
        let compiled = match filter {
            Some(filter) => filter::compile_from(filter, 2)?,
            None => filter::CompiledFilter::match_all(),
        };
        let distance = format!(
            "embedding {} $1::{}",
            function.operator(),
            layout.vector_type
        );
        let limit_placeholder = compiled.params.len() + 2;
        let sql = format!(
            "SELECT {SELECT_COLUMNS}, ({distance})::float8 AS distance \
             FROM {table} \
             WHERE embedding IS NOT NULL AND ({predicate}) \
             ORDER BY {distance} \
             LIMIT ${limit_placeholder}",
            table = layout.table.qualified(),
            predicate = compiled.predicate,
        );

        let mut params = Vec::with_capacity(compiled.params.len() + 2);
        params.push(SqlParam::Text(vector_literal(embedding)));
        params.extend(compiled.params);
        params.push(SqlParam::Int(i64::try_from(top_k).unwrap_or(i64::MAX)));
        Ok((sql, params))
    }

    /// Nearest neighbors by `function`, or the configured one when `None`.
    /// Results carry higher-is-better scores in descending order.
    pub async fn retrieve_with_function(
        &self,
        embedding: &[f32],
        filter: Option<&Filter>,
        top_k: usize,
        function: Option<SimilarityFunction>,
    ) -> Result<Vec<Document>> {
        validate_embedding(embedding, self.store.layout().dimension)?;
        let function = function.unwrap_or(self.index.function);
        let (sql, params) = self.query(embedding, filter, top_k, function)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        debug!(%function, top_k, filtered = filter.is_some(), "vector query");
        let pool = self.store.session().pool().await?;
        let mut tx = pool.begin().await.map_err(StoreError::query("begin vector query"))?;

        if self.index.strategy == SearchStrategy::Vchordrq {
            for (name, value) in [
                ("vchordrq.probes", self.index.probes.to_string()),
                ("vchordrq.epsilon", self.index.epsilon.to_string()),
            ] {
                sqlx::query("SELECT set_config($1, $2, true)")
                    .bind(name)
                    .bind(value)
                    .execute(&mut *tx)
                    .await
                    .map_err(StoreError::query("configure vector query"))?;
            }
        }

        let rows = bind_params(sqlx::query(&sql), &params)
            .fetch_all(&mut *tx)
            .await
            .map_err(StoreError::query("vector query"))?;
        tx.commit().await.map_err(StoreError::query("finish vector query"))?;

        rows.iter()
            .map(|row| {
                let mut doc = decode_document(row)?;
                let distance: f64 = column(row, "distance")?;
                doc.score = Some(function.score(distance));
                Ok(doc)
            })
            .collect()
    }
}

#[async_trait]
impl Retriever<[f32]> for VectorRetriever {
    async fn retrieve(
        &self,
        embedding: &[f32],
        filter: Option<&Filter>,
        top_k: usize,
    ) -> Result<Vec<Document>> {
        self.retrieve_with_function(embedding, filter, top_k, None)
            .await
    }
}
