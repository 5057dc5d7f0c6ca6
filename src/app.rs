use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::config::{Config, SimilarityFunction};
use crate::error::Result;
use crate::search::{HybridSearch, LexicalRetriever, RrfConfig, VectorRetriever};
use crate::storage::{DocumentStore, IndexSettings, SchemaManager, Session, StoreLayout, migrate};

/// Loaded and validated configuration. Building one never touches the
/// database; commands open a [`Backend`] once their input has been parsed.
pub struct AppContext {
    pub config_path: Option<PathBuf>,
    pub config: Config,
    pub index: IndexSettings,
    pub robot_mode: bool,
}

impl AppContext {
    pub fn from_cli(cli: &crate::cli::Cli) -> Result<Self> {
        let config_path = cli.config.clone().or_else(Config::global_path);
        let config = Config::load(cli.config.as_deref())?;
        config.validate()?;

        let migration = migrate::resolve(&config.index)?;
        migration.log();

        Ok(Self {
            config_path,
            config,
            index: migration.settings,
            robot_mode: cli.robot,
        })
    }

    /// Backend that never drops the table or the ANN index.
    pub fn backend(&self) -> Result<Backend> {
        let index = IndexSettings {
            recreate_if_exists: false,
            ..self.index
        };
        Backend::open(&self.config, index, false)
    }
}

/// Session, store and schema manager for one configured table.
pub struct Backend {
    session: Arc<Session>,
    store: Arc<DocumentStore>,
    schema: Arc<SchemaManager>,
    index: IndexSettings,
    fusion: RrfConfig,
}

impl Backend {
    /// Wire components together. Connections are made lazily on first use.
    pub fn open(config: &Config, index: IndexSettings, recreate_table: bool) -> Result<Self> {
        let layout = StoreLayout::from_config(config)?;
        let session = Arc::new(Session::new(&config.connection)?);
        debug!(server = %session.target(), table = %layout.table, "opening backend");

        let store = Arc::new(DocumentStore::new(session.clone(), layout.clone()));
        let schema = Arc::new(SchemaManager::new(
            session.clone(),
            layout,
            index,
            recreate_table,
        ));

        Ok(Self {
            session,
            store,
            schema,
            index,
            fusion: RrfConfig::from(&config.fusion),
        })
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    pub fn schema(&self) -> &Arc<SchemaManager> {
        &self.schema
    }

    /// Hybrid search over this table, optionally with a different
    /// similarity function than the configured one.
    pub async fn search(&self, function: Option<SimilarityFunction>) -> Result<HybridSearch> {
        let mut vector = VectorRetriever::new(self.store.clone(), self.index);
        if let Some(function) = function {
            vector = vector.with_function(function);
        }
        let lexical = LexicalRetriever::new(self.store.clone(), self.schema.as_ref()).await?;

        Ok(HybridSearch::new(
            self.store.clone(),
            Arc::new(vector),
            Arc::new(lexical),
            self.schema.clone(),
            self.fusion,
        ))
    }

    pub async fn close(&self) {
        self.session.close().await;
    }
}
