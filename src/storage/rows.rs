//! Row decoding and parameter binding.

use serde_json::{Map, Value};
use sqlx::Row;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::Postgres;

use crate::document::{Blob, Document};
use crate::error::{Result, StoreError};
use crate::filter::SqlParam;

/// Columns read back for every document. Embeddings travel as text.
pub(crate) const SELECT_COLUMNS: &str =
    "id, content, embedding::text AS embedding, blob_data, blob_meta, blob_mime_type, meta";

pub(crate) type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

pub(crate) fn bind_params<'q>(mut query: PgQuery<'q>, params: &[SqlParam]) -> PgQuery<'q> {
    for param in params {
        query = match param.clone() {
            SqlParam::Text(v) => query.bind(v),
            SqlParam::Int(v) => query.bind(v),
            SqlParam::Float(v) => query.bind(v),
            SqlParam::Bool(v) => query.bind(v),
            SqlParam::TextArray(v) => query.bind(v),
            SqlParam::IntArray(v) => query.bind(v),
            SqlParam::FloatArray(v) => query.bind(v),
            SqlParam::BoolArray(v) => query.bind(v),
        };
    }
    query
}

/// `[0.1,0.2,...]`, the text input form of `vector` and `halfvec`.
pub fn vector_literal(values: &[f32]) -> String {
    let body = values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");
    format!("[{body}]")
}

pub fn parse_vector(text: &str) -> Result<Vec<f32>> {
    let inner = text
        .trim()
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| StoreError::Validation(format!("malformed vector text: {text}")))?;
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    inner
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f32>()
                .map_err(|err| StoreError::Validation(format!("malformed vector element '{part}': {err}")))
        })
        .collect()
}

pub(crate) fn decode_document(row: &PgRow) -> Result<Document> {
    let id: String = column(row, "id")?;
    let content: Option<String> = column(row, "content")?;
    let embedding_text: Option<String> = column(row, "embedding")?;
    let blob_data: Option<Vec<u8>> = column(row, "blob_data")?;
    let blob_meta: Option<Value> = column(row, "blob_meta")?;
    let blob_mime_type: Option<String> = column(row, "blob_mime_type")?;
    let meta: Option<Value> = column(row, "meta")?;

    let embedding = embedding_text.as_deref().map(parse_vector).transpose()?;
    let blob = blob_data.map(|data| Blob {
        data,
        mime_type: blob_mime_type,
        meta: into_map(blob_meta),
    });

    Ok(Document {
        id,
        content,
        embedding,
        blob,
        meta: into_map(meta),
        score: None,
    })
}

pub(crate) fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name).map_err(StoreError::query("decode row"))
}

fn into_map(value: Option<Value>) -> Map<String, Value> {
    match value {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    }
}
