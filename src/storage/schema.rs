//! Extension, table and index lifecycle.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, info, warn};

use crate::config::{SearchStrategy, SimilarityFunction};
use crate::error::{Result, StoreError};
use crate::storage::{IndexManager, IndexSettings, Session, StoreLayout};

const EXTENSIONS: [(&str, &str); 3] = [
    ("vector", "CREATE EXTENSION IF NOT EXISTS vector"),
    ("vchord", "CREATE EXTENSION IF NOT EXISTS vchord CASCADE"),
    ("vchord_bm25", "CREATE EXTENSION IF NOT EXISTS vchord_bm25 CASCADE"),
];

static INDEX_OPS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"USING vchordrq \(embedding (\w+)\)").expect("valid regex"));
static INDEX_LISTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"lists\s*=\s*\[\s*(\d+)\s*\]").expect("valid regex"));

/// Create the extensions, or verify they exist when creation is off.
pub async fn ensure_extensions(pool: &PgPool, create: bool) -> Result<()> {
    if create {
        for (name, statement) in EXTENSIONS {
            sqlx::query(statement)
                .execute(pool)
                .await
                .map_err(|err| StoreError::Schema(format!("create extension {name}: {err}")))?;
        }
        debug!("extensions ready");
        return Ok(());
    }

    let names: Vec<&str> = EXTENSIONS.iter().map(|(name, _)| *name).collect();
    let installed: Vec<String> =
        sqlx::query_scalar("SELECT extname::text FROM pg_extension WHERE extname = ANY($1)")
            .bind(names.clone())
            .fetch_all(pool)
            .await
            .map_err(|err| StoreError::Schema(format!("list extensions: {err}")))?;
    let missing: Vec<&str> = names
        .into_iter()
        .filter(|name| !installed.iter().any(|found| found == name))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(StoreError::Schema(format!(
            "required extensions not installed: {} (enable connection.create_extension or install them)",
            missing.join(", ")
        )))
    }
}

pub fn create_table_sql(layout: &StoreLayout) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\
         id VARCHAR(128) PRIMARY KEY, \
         embedding {vector_type}({dim}), \
         content TEXT, \
         content_bm25 bm25vector, \
         blob_data BYTEA, \
         blob_meta JSONB, \
         blob_mime_type VARCHAR(255), \
         meta JSONB)",
        table = layout.table.qualified(),
        vector_type = layout.vector_type,
        dim = layout.dimension,
    )
}

/// TOML build options for `vchordrq`.
pub fn ann_index_options(function: SimilarityFunction, lists: u32) -> String {
    let residual = function == SimilarityFunction::L2;
    let spherical = matches!(
        function,
        SimilarityFunction::Cosine | SimilarityFunction::InnerProduct
    );
    format!(
        "residual_quantization = {residual}\n[build.internal]\nlists = [{lists}]\nspherical_centroids = {spherical}\n"
    )
}

pub fn ann_index_sql(layout: &StoreLayout, settings: &IndexSettings) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS \"{index}\" ON {table} USING vchordrq (embedding {ops}) WITH (options = $${options}$$)",
        index = layout.table.ann_index_name(),
        table = layout.table.qualified(),
        ops = layout.vector_type.ops_class(settings.function),
        options = ann_index_options(settings.function, settings.lists),
    )
}

pub fn lexical_index_sql(layout: &StoreLayout) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS \"{index}\" ON {table} USING bm25 (content_bm25 bm25_ops)",
        index = layout.table.lexical_index_name(),
        table = layout.table.qualified(),
    )
}

/// Differences between an existing index definition and the configured one.
pub fn detect_drift(indexdef: &str, expected_ops: &str, expected_lists: u32) -> Vec<String> {
    let mut drift = Vec::new();
    match INDEX_OPS.captures(indexdef).and_then(|c| c.get(1)) {
        Some(ops) if ops.as_str() != expected_ops => drift.push(format!(
            "operator class is {} but configuration wants {expected_ops}",
            ops.as_str()
        )),
        Some(_) => {}
        None => drift.push("index is not a vchordrq index on embedding".to_string()),
    }
    if let Some(lists) = INDEX_LISTS
        .captures(indexdef)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
    {
        if lists != expected_lists {
            drift.push(format!(
                "lists is {lists} but configuration wants {expected_lists}"
            ));
        }
    }
    drift
}

pub struct SchemaManager {
    session: Arc<Session>,
    layout: StoreLayout,
    index: IndexSettings,
    recreate_table: bool,
}

impl SchemaManager {
    pub fn new(
        session: Arc<Session>,
        layout: StoreLayout,
        index: IndexSettings,
        recreate_table: bool,
    ) -> Self {
        Self {
            session,
            layout,
            index,
            recreate_table,
        }
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    async fn index_definition(&self, conn: &mut PgConnection, index: &str) -> Result<Option<String>> {
        sqlx::query_scalar("SELECT indexdef FROM pg_indexes WHERE schemaname = $1 AND indexname = $2")
            .bind(self.layout.table.schema())
            .bind(index)
            .fetch_optional(conn)
            .await
            .map_err(schema_error("inspect index"))
    }

    async fn lexical_index_in(&self, conn: &mut PgConnection) -> Result<()> {
        let table = self.layout.table.qualified();

        sqlx::query(&format!(
            "ALTER TABLE {table} ADD COLUMN IF NOT EXISTS content_bm25 bm25vector"
        ))
        .execute(&mut *conn)
        .await
        .map_err(schema_error("add lexical column"))?;

        let backfilled = sqlx::query(&format!(
            "UPDATE {table} SET content_bm25 = tokenize(content, $1) \
             WHERE content IS NOT NULL AND content_bm25 IS NULL"
        ))
        .bind(&self.layout.tokenizer)
        .execute(&mut *conn)
        .await
        .map_err(schema_error("backfill lexical vectors"))?
        .rows_affected();
        if backfilled > 0 {
            info!(table = %self.layout.table, rows = backfilled, "backfilled lexical vectors");
        }

        sqlx::query(&lexical_index_sql(&self.layout))
            .execute(&mut *conn)
            .await
            .map_err(schema_error("create lexical index"))?;
        info!(index = %self.layout.table.lexical_index_name(), "lexical index ready");
        Ok(())
    }

    async fn ann_index_in(&self, conn: &mut PgConnection) -> Result<()> {
        if self.index.strategy == SearchStrategy::Exact {
            debug!("exact search strategy; no ANN index");
            return Ok(());
        }

        let name = self.layout.table.ann_index_name();
        if let Some(definition) = self.index_definition(&mut *conn, &name).await? {
            if self.index.recreate_if_exists {
                warn!(index = %name, "recreating ANN index");
                sqlx::query(&format!(
                    "DROP INDEX IF EXISTS {}",
                    self.layout.table.qualified_index(&name)
                ))
                .execute(&mut *conn)
                .await
                .map_err(schema_error("drop ANN index"))?;
            } else {
                let expected_ops = self.layout.vector_type.ops_class(self.index.function);
                for drift in detect_drift(&definition, &expected_ops, self.index.lists) {
                    warn!(
                        index = %name,
                        %drift,
                        "ANN index differs from configuration; set index.recreate_if_exists to rebuild"
                    );
                }
                return Ok(());
            }
        }

        sqlx::query(&ann_index_sql(&self.layout, &self.index))
            .execute(&mut *conn)
            .await
            .map_err(schema_error("create ANN index"))?;
        info!(
            index = %name,
            function = %self.index.function,
            lists = self.index.lists,
            "ANN index ready"
        );
        Ok(())
    }
}

#[async_trait]
impl IndexManager for SchemaManager {
    async fn bootstrap(&self) -> Result<()> {
        let pool = self.session.pool().await?;
        let mut tx = pool.begin().await.map_err(schema_error("begin bootstrap"))?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(self.layout.table.lock_key())
            .execute(&mut *tx)
            .await
            .map_err(schema_error("acquire bootstrap lock"))?;

        if self.recreate_table {
            warn!(table = %self.layout.table, "recreate_table is set; dropping existing data");
            sqlx::query(&format!("DROP TABLE IF EXISTS {}", self.layout.table.qualified()))
                .execute(&mut *tx)
                .await
                .map_err(schema_error("drop table"))?;
        }

        sqlx::query(&create_table_sql(&self.layout))
            .execute(&mut *tx)
            .await
            .map_err(schema_error("create table"))?;
        info!(table = %self.layout.table, dimension = self.layout.dimension, "table ready");

        self.lexical_index_in(&mut *tx).await?;
        self.ann_index_in(&mut *tx).await?;

        tx.commit().await.map_err(schema_error("commit bootstrap"))?;
        Ok(())
    }

    async fn lexical_index_exists(&self) -> Result<bool> {
        let pool = self.session.pool().await?;
        let mut conn = pool.acquire().await.map_err(schema_error("acquire connection"))?;
        let name = self.layout.table.lexical_index_name();
        Ok(self.index_definition(&mut *conn, &name).await?.is_some())
    }

    async fn ensure_lexical_index(&self) -> Result<()> {
        let pool = self.session.pool().await?;
        let mut tx = pool.begin().await.map_err(schema_error("begin lexical index"))?;
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(self.layout.table.lock_key())
            .execute(&mut *tx)
            .await
            .map_err(schema_error("acquire bootstrap lock"))?;
        self.lexical_index_in(&mut *tx).await?;
        tx.commit().await.map_err(schema_error("commit lexical index"))?;
        Ok(())
    }

    async fn ensure_ann_index(&self) -> Result<()> {
        let pool = self.session.pool().await?;
        let mut tx = pool.begin().await.map_err(schema_error("begin ANN index"))?;
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(self.layout.table.lock_key())
            .execute(&mut *tx)
            .await
            .map_err(schema_error("acquire bootstrap lock"))?;
        self.ann_index_in(&mut *tx).await?;
        tx.commit().await.map_err(schema_error("commit ANN index"))?;
        Ok(())
    }
}

fn schema_error(step: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |err| StoreError::Schema(format!("{step}: {err}"))
}
