//! Document persistence: batched writes with duplicate policies, filtered
//! reads, deletes and counts.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::document::{Document, DuplicatePolicy};
use crate::error::{Result, StoreError};
use crate::filter::{self, CompiledFilter, Filter, SqlParam};
use crate::storage::rows::{SELECT_COLUMNS, bind_params, column, decode_document, vector_literal};
use crate::storage::{Session, StoreLayout, Writer};

const UNIQUE_VIOLATION: &str = "23505";

/// Add `id` to the written ids unless the batch already stored it.
fn record_written(written: &mut Vec<String>, id: String) {
    if !written.contains(&id) {
        written.push(id);
    }
}

pub struct DocumentStore {
    session: Arc<Session>,
    layout: StoreLayout,
}

impl DocumentStore {
    pub fn new(session: Arc<Session>, layout: StoreLayout) -> Self {
        Self { session, layout }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Documents matching `filter` (every row when `None`), ordered by id.
    pub async fn filter_documents(
        &self,
        filter: Option<&Filter>,
        limit: Option<usize>,
    ) -> Result<Vec<Document>> {
        let compiled = compile_optional(filter)?;
        let mut sql = format!(
            "SELECT {SELECT_COLUMNS} FROM {} WHERE {} ORDER BY id",
            self.layout.table.qualified(),
            compiled.predicate
        );
        let mut params = compiled.params;
        if let Some(limit) = limit {
            params.push(SqlParam::Int(i64::try_from(limit).unwrap_or(i64::MAX)));
            sql.push_str(&format!(" LIMIT ${}", params.len()));
        }

        let pool = self.session.pool().await?;
        let rows = bind_params(sqlx::query(&sql), &params)
            .fetch_all(&pool)
            .await
            .map_err(StoreError::query("filter documents"))?;
        rows.iter().map(decode_document).collect()
    }

    /// Drop the backing table. Destroys all data.
    pub async fn drop_table(&self) -> Result<()> {
        let pool = self.session.pool().await?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", self.layout.table.qualified()))
            .execute(&pool)
            .await
            .map_err(StoreError::query("drop table"))?;
        info!(table = %self.layout.table, "table dropped");
        Ok(())
    }

    fn insert_sql(&self, policy: DuplicatePolicy) -> String {
        let mut sql = format!(
            "INSERT INTO {} (id, embedding, content, content_bm25, blob_data, blob_meta, blob_mime_type, meta) \
             VALUES ($1, $2::{}, $3, NULL, $4, $5, $6, $7)",
            self.layout.table.qualified(),
            self.layout.vector_type,
        );
        match policy {
            DuplicatePolicy::Fail => {}
            DuplicatePolicy::Skip => sql.push_str(" ON CONFLICT (id) DO NOTHING"),
            DuplicatePolicy::Overwrite => sql.push_str(
                " ON CONFLICT (id) DO UPDATE SET \
                 embedding = EXCLUDED.embedding, \
                 content = EXCLUDED.content, \
                 content_bm25 = NULL, \
                 blob_data = EXCLUDED.blob_data, \
                 blob_meta = EXCLUDED.blob_meta, \
                 blob_mime_type = EXCLUDED.blob_mime_type, \
                 meta = EXCLUDED.meta",
            ),
        }
        sql
    }
}

#[async_trait]
impl Writer for DocumentStore {
    async fn write(&self, documents: Vec<Document>, policy: DuplicatePolicy) -> Result<usize> {
        if documents.is_empty() {
            return Ok(0);
        }
        let documents = documents
            .into_iter()
            .map(|doc| doc.prepare(self.layout.dimension))
            .collect::<Result<Vec<_>>>()?;

        let insert = self.insert_sql(policy);
        let retokenize = format!(
            "UPDATE {} SET content_bm25 = tokenize(content, $1) \
             WHERE id = ANY($2) AND content IS NOT NULL",
            self.layout.table.qualified()
        );

        let pool = self.session.pool().await?;
        let mut tx = pool.begin().await.map_err(StoreError::query("begin write"))?;
        let mut written = Vec::with_capacity(documents.len());

        for doc in documents {
            let blob_data = doc.blob.as_ref().map(|blob| blob.data.clone());
            let blob_meta = doc.blob.as_ref().map(|blob| Value::Object(blob.meta.clone()));
            let blob_mime_type = doc.blob.as_ref().and_then(|blob| blob.mime_type.clone());

            let result = sqlx::query(&insert)
                .bind(&doc.id)
                .bind(doc.embedding.as_deref().map(vector_literal))
                .bind(&doc.content)
                .bind(blob_data)
                .bind(blob_meta)
                .bind(blob_mime_type)
                .bind(Value::Object(doc.meta.clone()))
                .execute(&mut *tx)
                .await;

            match result {
                Ok(done) if done.rows_affected() > 0 => record_written(&mut written, doc.id),
                Ok(_) => debug!(id = %doc.id, "skipped existing document"),
                Err(err) if is_unique_violation(&err) => {
                    return Err(StoreError::Duplicate { id: doc.id });
                }
                Err(err) => return Err(StoreError::query("write documents")(err)),
            }
        }

        if !written.is_empty() {
            sqlx::query(&retokenize)
                .bind(&self.layout.tokenizer)
                .bind(&written)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::query("compute lexical vectors"))?;
        }

        tx.commit().await.map_err(StoreError::query("commit write"))?;
        info!(
            table = %self.layout.table,
            written = written.len(),
            policy = %policy,
            "wrote documents"
        );
        Ok(written.len())
    }

    async fn delete_documents(&self, ids: &[String]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let pool = self.session.pool().await?;
        let deleted = sqlx::query(&format!(
            "DELETE FROM {} WHERE id = ANY($1)",
            self.layout.table.qualified()
        ))
        .bind(ids.to_vec())
        .execute(&pool)
        .await
        .map_err(StoreError::query("delete documents"))?
        .rows_affected();
        info!(table = %self.layout.table, deleted, "deleted documents");
        Ok(deleted)
    }

    async fn delete_by_filter(&self, filter: Option<&Filter>) -> Result<u64> {
        let compiled = compile_optional(filter)?;
        let sql = format!(
            "SELECT id FROM {} WHERE {}",
            self.layout.table.qualified(),
            compiled.predicate
        );
        let pool = self.session.pool().await?;
        let ids = bind_params(sqlx::query(&sql), &compiled.params)
            .fetch_all(&pool)
            .await
            .map_err(StoreError::query("resolve ids for delete"))?
            .iter()
            .map(|row| column::<String>(row, "id"))
            .collect::<Result<Vec<_>>>()?;

        if ids.is_empty() {
            debug!(table = %self.layout.table, "delete filter matched nothing");
            return Ok(0);
        }
        self.delete_documents(&ids).await
    }

    async fn count(&self) -> Result<u64> {
        let pool = self.session.pool().await?;
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {}",
            self.layout.table.qualified()
        ))
        .fetch_one(&pool)
        .await
        .map_err(StoreError::query("count documents"))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

/// Compile an optional filter; `None` matches everything.
pub(crate) fn compile_optional(filter: Option<&Filter>) -> Result<CompiledFilter> {
    match filter {
        Some(filter) => Ok(filter::compile(filter)?),
        None => Ok(CompiledFilter::match_all()),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == UNIQUE_VIOLATION)
}
