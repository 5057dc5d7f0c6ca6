//! Storage layer for hystore
//!
//! One PostgreSQL table per store, with a VectorChord `vchordrq` index over
//! the embedding column and a VectorChord-bm25 index over the derived
//! lexical vector column.

use std::fmt;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::config::{Config, VectorType};
use crate::document::{Document, DuplicatePolicy};
use crate::error::{Result, StoreError};
use crate::filter::Filter;

pub mod migrate;
pub(crate) mod rows;
pub mod schema;
pub mod session;
pub mod store;

pub use migrate::{IndexSettings, Migration};
pub use rows::{parse_vector, vector_literal};
pub use schema::SchemaManager;
pub use session::{Backoff, Session};
pub use store::DocumentStore;

/// Postgres truncates identifiers beyond this many bytes.
pub const MAX_IDENTIFIER_LEN: usize = 63;

const ANN_INDEX_SUFFIX: &str = "_vchordrq_idx";
const LEXICAL_INDEX_SUFFIX: &str = "_bm25_idx";

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));

/// Persists and removes documents.
#[async_trait]
pub trait Writer: Send + Sync {
    /// Write a batch atomically. Returns rows inserted or replaced.
    async fn write(&self, documents: Vec<Document>, policy: DuplicatePolicy) -> Result<usize>;

    async fn delete_documents(&self, ids: &[String]) -> Result<u64>;

    /// Delete everything matching `filter`; `None` matches every row.
    async fn delete_by_filter(&self, filter: Option<&Filter>) -> Result<u64>;

    async fn count(&self) -> Result<u64>;
}

/// Creates and verifies the table and its indexes.
#[async_trait]
pub trait IndexManager: Send + Sync {
    /// Table, lexical index and ANN index, in one advisory-locked transaction.
    async fn bootstrap(&self) -> Result<()>;

    async fn lexical_index_exists(&self) -> Result<bool>;

    async fn ensure_lexical_index(&self) -> Result<()>;

    async fn ensure_ann_index(&self) -> Result<()>;
}

/// Validated schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    schema: String,
    table: String,
}

impl TableRef {
    pub fn new(schema: &str, table: &str) -> Result<Self> {
        for (kind, name) in [("schema", schema), ("table", table)] {
            if !IDENTIFIER.is_match(name) {
                return Err(StoreError::Config(format!(
                    "{kind} name '{name}' must match [A-Za-z_][A-Za-z0-9_]*"
                )));
            }
        }
        if schema.len() > MAX_IDENTIFIER_LEN {
            return Err(StoreError::Config(format!(
                "schema name '{schema}' exceeds {MAX_IDENTIFIER_LEN} bytes"
            )));
        }
        let longest = table.len() + ANN_INDEX_SUFFIX.len().max(LEXICAL_INDEX_SUFFIX.len());
        if longest > MAX_IDENTIFIER_LEN {
            return Err(StoreError::Config(format!(
                "table name '{table}' leaves no room for index suffixes ({longest} > {MAX_IDENTIFIER_LEN} bytes)"
            )));
        }
        Ok(Self {
            schema: schema.to_string(),
            table: table.to_string(),
        })
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// `"schema"."table"` for use in SQL text.
    pub fn qualified(&self) -> String {
        format!("\"{}\".\"{}\"", self.schema, self.table)
    }

    /// `schema.table`, the advisory lock key.
    pub fn lock_key(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }

    pub fn ann_index_name(&self) -> String {
        format!("{}{ANN_INDEX_SUFFIX}", self.table)
    }

    pub fn lexical_index_name(&self) -> String {
        format!("{}{LEXICAL_INDEX_SUFFIX}", self.table)
    }

    /// `"schema"."index"`, valid both in SQL text and as `regclass` input.
    pub fn qualified_index(&self, index: &str) -> String {
        format!("\"{}\".\"{index}\"", self.schema)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Where and how documents are laid out; shared by the store, schema
/// manager and retrievers.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    pub table: TableRef,
    pub dimension: usize,
    pub vector_type: VectorType,
    pub tokenizer: String,
}

impl StoreLayout {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            table: config.table_ref()?,
            dimension: config.store.embedding_dimension as usize,
            vector_type: config.store.vector_type,
            tokenizer: config.lexical.tokenizer.clone(),
        })
    }
}
