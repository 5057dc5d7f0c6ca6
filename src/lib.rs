//! hystore - hybrid vector and BM25 document store
//!
//! Documents live in one PostgreSQL table. A VectorChord `vchordrq` index
//! serves nearest-neighbor queries and a VectorChord-bm25 index serves
//! lexical ones; [`search::HybridSearch`] fuses both with RRF.

pub mod app;
pub mod cli;
pub mod config;
pub mod document;
pub mod error;
pub mod filter;
pub mod search;
pub mod storage;

pub use document::{Blob, Document, DuplicatePolicy};
pub use error::{Result, StoreError};
pub use filter::Filter;
