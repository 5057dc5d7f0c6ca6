//! Translation of HNSW-era index options into `vchordrq` settings.

use crate::config::{IndexConfig, SearchStrategy, SimilarityFunction};
use crate::error::{Result, StoreError};

pub const DEFAULT_LISTS: u32 = 1000;
pub const DEFAULT_PROBES: u32 = 10;

/// Lists per HNSW neighbor, used to size a cluster count from `m`.
const LISTS_PER_NEIGHBOR: u32 = 64;
/// HNSW candidates covered by one probed cluster.
const EF_SEARCH_PER_PROBE: u32 = 4;

/// Effective ANN index settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexSettings {
    pub function: SimilarityFunction,
    pub strategy: SearchStrategy,
    pub lists: u32,
    pub probes: u32,
    pub epsilon: f32,
    pub recreate_if_exists: bool,
}

/// Settings plus notices about legacy options that were translated.
#[derive(Debug, Clone, PartialEq)]
pub struct Migration {
    pub settings: IndexSettings,
    pub notices: Vec<String>,
}

impl Migration {
    pub fn log(&self) {
        for notice in &self.notices {
            tracing::warn!(target: "hystore::migrate", "{notice}");
        }
    }
}

/// Resolve configured and legacy options. Explicit `lists`/`probes` win
/// over values derived from `m`/`ef_search`.
pub fn resolve(config: &IndexConfig) -> Result<Migration> {
    let mut notices = Vec::new();

    let strategy = match config.strategy.to_lowercase().as_str() {
        "vchordrq" => SearchStrategy::Vchordrq,
        "exact" => SearchStrategy::Exact,
        "hnsw" => {
            notices.push("index.strategy 'hnsw' is deprecated; using 'vchordrq'".to_string());
            SearchStrategy::Vchordrq
        }
        "exact_nearest_neighbor" => {
            notices.push(
                "index.strategy 'exact_nearest_neighbor' is deprecated; using 'exact'".to_string(),
            );
            SearchStrategy::Exact
        }
        other => {
            return Err(StoreError::Config(format!(
                "unknown index.strategy '{other}' (expected vchordrq|exact)"
            )));
        }
    };

    let lists = match (config.lists, config.m) {
        (Some(lists), Some(_)) => {
            notices.push("index.m ignored because index.lists is set".to_string());
            lists
        }
        (Some(lists), None) => lists,
        (None, Some(m)) => {
            let lists = m.saturating_mul(LISTS_PER_NEIGHBOR).max(1);
            notices.push(format!("index.m = {m} translated to index.lists = {lists}"));
            lists
        }
        (None, None) => DEFAULT_LISTS,
    };

    let probes = match (config.probes, config.ef_search) {
        (Some(probes), Some(_)) => {
            notices.push("index.ef_search ignored because index.probes is set".to_string());
            probes
        }
        (Some(probes), None) => probes,
        (None, Some(ef_search)) => {
            let probes = ef_search.div_ceil(EF_SEARCH_PER_PROBE).max(1);
            notices.push(format!(
                "index.ef_search = {ef_search} translated to index.probes = {probes}"
            ));
            probes
        }
        (None, None) => DEFAULT_PROBES,
    };

    if let Some(ef_construction) = config.ef_construction {
        notices.push(format!(
            "index.ef_construction = {ef_construction} has no vchordrq equivalent and is ignored"
        ));
    }

    let mut recreate_if_exists = config.recreate_if_exists;
    if let Some(legacy) = config.hnsw_recreate_index_if_exists {
        notices.push(
            "index.hnsw_recreate_index_if_exists is deprecated; use index.recreate_if_exists"
                .to_string(),
        );
        recreate_if_exists |= legacy;
    }

    if lists == 0 {
        return Err(StoreError::Config("index.lists must be at least 1".to_string()));
    }
    if probes == 0 {
        return Err(StoreError::Config("index.probes must be at least 1".to_string()));
    }
    if !(config.epsilon.is_finite() && config.epsilon > 0.0 && config.epsilon <= 4.0) {
        return Err(StoreError::Config(format!(
            "index.epsilon must be in (0, 4], got {}",
            config.epsilon
        )));
    }

    Ok(Migration {
        settings: IndexSettings {
            function: config.function,
            strategy,
            lists,
            probes,
            epsilon: config.epsilon,
            recreate_if_exists,
        },
        notices,
    })
}
