//! Shared helpers for tests that need a live PostgreSQL server.
//!
//! Database-backed tests run only when `HYSTORE_TEST_PG_URL` points at a
//! server with the `vector`, `vchord` and `vchord_bm25` extensions available.
//! Every store gets a fresh uniquely named table that is dropped on cleanup.

#![allow(dead_code)]

use std::time::Duration;

use hystore::app::Backend;
use hystore::config::{Config, SimilarityFunction};
use hystore::search::HybridSearch;
use hystore::storage::{IndexManager, migrate};

pub const PG_URL_VAR: &str = "HYSTORE_TEST_PG_URL";

pub fn pg_url() -> Option<String> {
    std::env::var(PG_URL_VAR).ok().filter(|url| !url.trim().is_empty())
}

pub struct TestStore {
    pub config: Config,
    pub backend: Backend,
}

impl TestStore {
    /// A bootstrapped store with exact search, or `None` when no server is
    /// configured.
    pub async fn open(dimension: u32, function: SimilarityFunction) -> Option<Self> {
        let Some(url) = pg_url() else {
            eprintln!("skipping: {PG_URL_VAR} is not set");
            return None;
        };

        let mut config = Config::default();
        config.connection.url = Some(url);
        config.connection.max_wait = Duration::from_secs(5);
        config.store.table = format!("t_{}", uuid::Uuid::new_v4().simple());
        config.store.embedding_dimension = dimension;
        config.index.function = function;
        config.index.strategy = "exact".to_string();
        config.validate().unwrap();

        let index = migrate::resolve(&config.index).unwrap().settings;
        let backend = Backend::open(&config, index, false).unwrap();
        backend.schema().bootstrap().await.unwrap();
        Some(Self { config, backend })
    }

    /// A second backend on the same table, with `adjust` applied to a copy
    /// of this store's configuration.
    pub fn backend_with(&self, adjust: impl FnOnce(&mut Config)) -> Backend {
        let mut config = self.config.clone();
        adjust(&mut config);
        config.validate().unwrap();
        let index = migrate::resolve(&config.index).unwrap().settings;
        Backend::open(&config, index, false).unwrap()
    }

    pub async fn search(&self) -> HybridSearch {
        self.backend.search(None).await.unwrap()
    }

    pub async fn cleanup(self) {
        self.backend.store().drop_table().await.unwrap();
        self.backend.close().await;
    }
}
