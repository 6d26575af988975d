//! Application context shared by the service, the workers and the CLI.
//!
//! [`AppContext`] wraps the immutable infrastructure (DB pool, tools, object
//! store, processor registry, result cache) in `Arc`s and is cheap to clone.

use std::sync::Arc;

use cf_av::ToolRegistry;
use cf_core::config::Config;
use cf_core::events::EventBus;
use cf_core::Result;
use cf_db::pool::{init_pool, DbPool};
use cf_pipeline::{LocalStore, ObjectStore, PipelineExecutor, ProcessorRegistry, ResultCache};

use crate::cache::SqliteResultCache;
use crate::service::TaskService;

#[derive(Clone)]
pub struct AppContext {
    /// Database connection pool.
    pub db: DbPool,
    /// Immutable application configuration snapshot.
    pub config: Arc<Config>,
    /// Broadcast bus for task lifecycle events.
    pub event_bus: Arc<EventBus>,
    /// External tool registry.
    pub tools: Arc<ToolRegistry>,
    /// Where inputs, outputs and intermediate artifacts live.
    pub store: Arc<dyn ObjectStore>,
    pub registry: Arc<ProcessorRegistry>,
    /// Shared step-result cache; `None` when caching is disabled.
    pub cache: Option<Arc<dyn ResultCache>>,
}

impl AppContext {
    /// Build the production context from `config`: open the database, find
    /// ffmpeg/ffprobe and register the built-in processors.
    pub fn new(config: Config) -> Result<Self> {
        tracing::info!("Initializing database at {}", config.database.path.display());
        let db = init_pool(&config.database)?;

        let tools = Arc::new(ToolRegistry::discover(&config.tools));
        let registry = Arc::new(ProcessorRegistry::with_defaults(tools.clone()));
        let store: Arc<dyn ObjectStore> = Arc::new(LocalStore::new(config.storage.root.clone()));

        Ok(Self::with_parts(config, db, tools, store, registry))
    }

    /// Assemble a context from already-built parts.
    pub fn with_parts(
        config: Config,
        db: DbPool,
        tools: Arc<ToolRegistry>,
        store: Arc<dyn ObjectStore>,
        registry: Arc<ProcessorRegistry>,
    ) -> Self {
        let cache: Option<Arc<dyn ResultCache>> = if config.cache.enabled {
            Some(Arc::new(SqliteResultCache::new(db.clone(), config.cache.ttl())))
        } else {
            None
        };

        Self {
            db,
            config: Arc::new(config),
            event_bus: Arc::new(EventBus::default()),
            tools,
            store,
            registry,
            cache,
        }
    }

    /// A pipeline executor over this context's registry and cache.
    pub fn executor(&self) -> PipelineExecutor {
        let executor = PipelineExecutor::new(self.registry.clone());
        match &self.cache {
            Some(cache) => executor.with_cache(cache.clone()),
            None => executor,
        }
    }

    pub fn service(&self) -> TaskService {
        TaskService::new(self.clone())
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("cache", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}
