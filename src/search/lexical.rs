//! Block-ranked lexical retrieval over the `content_bm25` column.

use std::ops::RangeToInclusive;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::document::Document;
use crate::error::{Result, StoreError};
use crate::filter::{self, Filter, SqlParam};
use crate::search::Retriever;
use crate::storage::rows::{SELECT_COLUMNS, bind_params, column, decode_document};
use crate::storage::{DocumentStore, IndexManager};

/// Offset added to the negated raw engine score.
pub const LEXICAL_SCORE_SHIFT: f64 = 10.0;

/// Raw scores the engine produces. More negative is a better match and
/// `0.0` means no query term occurs in the row.
pub const LEXICAL_RAW_RANGE: RangeToInclusive<f64> = ..=0.0;

/// Score given to rows the engine returned without a raw score.
pub const MISSING_LEXICAL_SCORE: f64 = -1.0e6;

/// Map a raw engine score onto a higher-is-better score of at least
/// [`LEXICAL_SCORE_SHIFT`] for every raw score in [`LEXICAL_RAW_RANGE`].
pub fn transform_score(raw: Option<f64>) -> f64 {
    raw.map_or(MISSING_LEXICAL_SCORE, |raw| LEXICAL_SCORE_SHIFT - raw)
}

/// Rows whose raw score is exactly zero share no term with the query.
fn is_match(raw: Option<f64>) -> bool {
    raw.is_none_or(|raw| raw != 0.0)
}

pub struct LexicalRetriever {
    store: Arc<DocumentStore>,
}

impl LexicalRetriever {
    /// Verify the lexical index exists, creating it when missing.
    pub async fn new(store: Arc<DocumentStore>, indexes: &dyn IndexManager) -> Result<Self> {
        if !indexes.lexical_index_exists().await? {
            warn!(
                index = %store.layout().table.lexical_index_name(),
                "lexical index missing; creating it"
            );
            indexes.ensure_lexical_index().await?;
        }
        Ok(Self { store })
    }

    fn query(&self, text: &str, filter: Option<&Filter>, top_k: usize) -> Result<(String, Vec<SqlParam>)> {
        let layout = self.store.layout();
        let compiled = match filter {
            Some(filter) => filter::compile_from(filter, 4)?,
            None => filter::CompiledFilter::match_all(),
        };
        let limit_placeholder = compiled.params.len() + 4;
        let score = "content_bm25 <&> to_bm25query($1::regclass, $2, $3)";
        let sql = format!(
            "SELECT {SELECT_COLUMNS}, ({score})::float8 AS raw_score \
             FROM {table} \
             WHERE content_bm25 IS NOT NULL AND ({predicate}) \
             ORDER BY {score} \
             LIMIT ${limit_placeholder}",
            table = layout.table.qualified(),
            predicate = compiled.predicate,
        );

        let mut params = Vec::with_capacity(compiled.params.len() + 4);
        params.push(SqlParam::Text(
            layout.table.qualified_index(&layout.table.lexical_index_name()),
        ));
        params.push(SqlParam::Text(text.to_string()));
        params.push(SqlParam::Text(layout.tokenizer.clone()));
        params.extend(compiled.params);
        params.push(SqlParam::Int(i64::try_from(top_k).unwrap_or(i64::MAX)));
        Ok((sql, params))
    }
}

#[async_trait]
impl Retriever<str> for LexicalRetriever {
    async fn retrieve(
        &self,
        text: &str,
        filter: Option<&Filter>,
        top_k: usize,
    ) -> Result<Vec<Document>> {
        let text: String = text.chars().filter(|c| *c != '\0').collect();
        if text.trim().is_empty() {
            return Err(StoreError::Validation("query text is empty".to_string()));
        }
        let (sql, params) = self.query(&text, filter, top_k)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        debug!(top_k, filtered = filter.is_some(), "lexical query");
        let pool = self.store.session().pool().await?;
        let rows = bind_params(sqlx::query(&sql), &params)
            .fetch_all(&pool)
            .await
            .map_err(StoreError::query("lexical query"))?;

        let mut docs = Vec::with_capacity(rows.len());
        for row in &rows {
            let raw: Option<f64> = column(row, "raw_score")?;
            if !is_match(raw) {
                continue;
            }
            let mut doc = decode_document(row)?;
            if let Some(raw) = raw.filter(|raw| !LEXICAL_RAW_RANGE.contains(raw)) {
                warn!(id = %doc.id, raw, "positive lexical score from the engine");
            }
            doc.score = Some(transform_score(raw));
            docs.push(doc);
        }
        debug!(returned = docs.len(), fetched = rows.len(), "lexical matches");
        Ok(docs)
    }
}
