//! Document model: chunks with content, embedding, blob and metadata.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::{Result, StoreError};

/// Longest id the `VARCHAR(128)` primary key accepts.
pub const MAX_ID_LEN: usize = 128;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Primary key. Left empty, it is derived from the document's content.
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<Blob>,
    #[serde(default)]
    pub meta: Map<String, Value>,
    /// Set on query results only; never persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Binary payload attached to a document. `data` travels as hex in JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

impl Document {
    /// Text chunk with a content-derived id.
    pub fn new(content: impl Into<String>) -> Self {
        let mut doc = Self {
            content: Some(content.into()),
            ..Self::default()
        };
        doc.id = doc.generate_id();
        doc
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_blob(mut self, blob: Blob) -> Self {
        self.blob = Some(blob);
        self
    }

    /// Lowercase hex SHA-256 over content, blob, metadata and embedding.
    ///
    /// Writing the same chunk twice yields the same id, so duplicate
    /// policies apply to re-ingestion.
    pub fn generate_id(&self) -> String {
        let canonical = serde_json::json!({
            "content": self.content,
            "blob": self.blob.as_ref().map(|blob| serde_json::json!({
                "data": hex::encode(&blob.data),
                "mime_type": blob.mime_type,
                "meta": blob.meta,
            })),
            "meta": self.meta,
            "embedding": self.embedding,
        });
        let digest = Sha256::digest(canonical.to_string().as_bytes());
        hex::encode(digest)
    }

    /// Strip NUL characters from content and metadata. Returns whether
    /// anything changed.
    pub fn strip_nul(&mut self) -> bool {
        let mut changed = false;
        if let Some(content) = self.content.as_mut() {
            changed |= strip_nul_in_place(content);
        }
        changed |= strip_nul_map(&mut self.meta);
        if let Some(blob) = self.blob.as_mut() {
            changed |= strip_nul_map(&mut blob.meta);
            if let Some(mime) = blob.mime_type.as_mut() {
                changed |= strip_nul_in_place(mime);
            }
        }
        changed
    }

    /// Check id, embedding dimension and metadata shape.
    pub fn validate(&self, dimension: usize) -> Result<()> {
        validate_id(&self.id)?;
        if let Some(embedding) = &self.embedding {
            validate_embedding(embedding, dimension).map_err(|err| match err {
                StoreError::Validation(msg) => {
                    StoreError::Validation(format!("document {}: {msg}", self.id))
                }
                other => other,
            })?;
        }
        validate_meta(&self.id, &self.meta)
    }

    /// Sanitize, assign an id when missing, and validate for persistence.
    pub fn prepare(mut self, dimension: usize) -> Result<Self> {
        let stripped = self.strip_nul();
        if self.id.is_empty() {
            self.id = self.generate_id();
        }
        if stripped {
            warn!(id = %self.id, "stripped NUL characters from document");
        }
        self.score = None;
        self.validate(dimension)?;
        Ok(self)
    }
}

pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(StoreError::Validation("document id is empty".to_string()));
    }
    if id.len() > MAX_ID_LEN {
        return Err(StoreError::Validation(format!(
            "document id exceeds {MAX_ID_LEN} bytes ({} bytes)",
            id.len()
        )));
    }
    if id.contains('\0') {
        return Err(StoreError::Validation(
            "document id contains a NUL character".to_string(),
        ));
    }
    Ok(())
}

/// Embedding must be non-empty, finite, and exactly `expected` long.
pub fn validate_embedding(embedding: &[f32], expected: usize) -> Result<()> {
    if embedding.is_empty() {
        return Err(StoreError::Validation("embedding is empty".to_string()));
    }
    if embedding.len() != expected {
        return Err(StoreError::Validation(format!(
            "embedding dimension mismatch: expected {expected}, got {}",
            embedding.len()
        )));
    }
    if let Some(position) = embedding.iter().position(|v| !v.is_finite()) {
        return Err(StoreError::Validation(format!(
            "embedding value at position {position} is not finite"
        )));
    }
    Ok(())
}

fn validate_meta(id: &str, meta: &Map<String, Value>) -> Result<()> {
    for (key, value) in meta {
        let flat = match value {
            Value::Object(_) => false,
            Value::Array(items) => items
                .iter()
                .all(|item| !matches!(item, Value::Array(_) | Value::Object(_))),
            _ => true,
        };
        if !flat {
            return Err(StoreError::Validation(format!(
                "document {id}: metadata key '{key}' holds a nested value"
            )));
        }
    }
    Ok(())
}

fn strip_nul_in_place(text: &mut String) -> bool {
    if text.contains('\0') {
        text.retain(|c| c != '\0');
        true
    } else {
        false
    }
}

fn strip_nul_value(value: &mut Value) -> bool {
    match value {
        Value::String(text) => strip_nul_in_place(text),
        Value::Array(items) => items.iter_mut().fold(false, |acc, item| strip_nul_value(item) | acc),
        Value::Object(map) => strip_nul_map(map),
        _ => false,
    }
}

fn strip_nul_map(map: &mut Map<String, Value>) -> bool {
    let mut changed = false;
    if map.keys().any(|key| key.contains('\0')) {
        let entries = std::mem::take(map);
        for (mut key, value) in entries {
            strip_nul_in_place(&mut key);
            map.insert(key, value);
        }
        changed = true;
    }
    for value in map.values_mut() {
        changed |= strip_nul_value(value);
    }
    changed
}

/// What to do when a written id already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    #[default]
    Fail,
    Skip,
    Overwrite,
}

impl DuplicatePolicy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fail => "fail",
            Self::Skip => "skip",
            Self::Overwrite => "overwrite",
        }
    }
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DuplicatePolicy {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "fail" | "none" => Ok(Self::Fail),
            "skip" => Ok(Self::Skip),
            "overwrite" => Ok(Self::Overwrite),
            other => Err(StoreError::Validation(format!(
                "unknown duplicate policy '{other}' (expected fail|skip|overwrite)"
            ))),
        }
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        hex::decode(raw).map_err(serde::de::Error::custom)
    }
}
