//! Engine bootstrap.
//!
//! A [`ProcessEngine`] is cheap to clone and safe to share across tasks;
//! build one per application and hand out its services.

use std::sync::Arc;

use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::config::{EngineConfig, SchemaUpdate};
use crate::delegate::{DelegateExecution, DelegateRegistry, ServiceDelegate};
use crate::error::{EngineError, EngineResult};
use crate::executor::Executor;
use crate::history::HistoryService;
use crate::repository::RepositoryService;
use crate::runtime::RuntimeService;
use crate::store::ProcessStore;
use crate::store_memory::MemoryStore;
use crate::task::TaskService;

/// Shared state behind every service handle.
pub(crate) struct EngineContext {
    pub config: EngineConfig,
    pub store: Arc<dyn ProcessStore>,
    pub delegates: DelegateRegistry,
    pub clock: Arc<dyn Clock>,
}

impl EngineContext {
    pub fn executor(&self) -> Executor<'_> {
        Executor::new(self)
    }
}

#[derive(Clone)]
pub struct ProcessEngine {
    ctx: Arc<EngineContext>,
}

pub struct ProcessEngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn ProcessStore>>,
    delegates: DelegateRegistry,
    clock: Arc<dyn Clock>,
}

impl ProcessEngineBuilder {
    /// Use a caller-supplied store instead of a fresh in-memory one.
    pub fn with_store(mut self, store: Arc<dyn ProcessStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_delegate(mut self, name: impl Into<String>, delegate: Arc<dyn ServiceDelegate>) -> Self {
        self.delegates.register(name, delegate);
        self
    }

    pub fn with_delegate_fn<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut DelegateExecution) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.delegates.register_fn(name, f);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn build(self) -> EngineResult<ProcessEngine> {
        let url = self.config.validate()?;
        let store = match self.store {
            Some(store) => store,
            None => Arc::new(MemoryStore::new(url.name.clone())),
        };

        match self.config.schema_update {
            SchemaUpdate::True | SchemaUpdate::CreateDrop => store.create_schema().await?,
            SchemaUpdate::False => {
                if !store.schema_exists().await? {
                    return Err(EngineError::SchemaMissing {
                        store: store.name().to_string(),
                    });
                }
            }
        }

        info!(
            store = store.name(),
            url = %self.config.url,
            user = %self.config.username,
            schema_update = %self.config.schema_update,
            "Process engine built"
        );

        Ok(ProcessEngine {
            ctx: Arc::new(EngineContext {
                config: self.config,
                store,
                delegates: self.delegates,
                clock: self.clock,
            }),
        })
    }
}

impl EngineConfig {
    /// Validate this configuration and build an engine with no delegates.
    pub async fn build_process_engine(self) -> EngineResult<ProcessEngine> {
        ProcessEngine::builder(self).build().await
    }
}

impl ProcessEngine {
    pub fn builder(config: EngineConfig) -> ProcessEngineBuilder {
        ProcessEngineBuilder {
            config,
            store: None,
            delegates: DelegateRegistry::new(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    /// Name of the backing store.
    pub fn name(&self) -> &str {
        self.ctx.store.name()
    }

    pub fn repository_service(&self) -> RepositoryService {
        RepositoryService::new(self.ctx.clone())
    }

    pub fn runtime_service(&self) -> RuntimeService {
        RuntimeService::new(self.ctx.clone())
    }

    pub fn task_service(&self) -> TaskService {
        TaskService::new(self.ctx.clone())
    }

    pub fn history_service(&self) -> HistoryService {
        HistoryService::new(self.ctx.clone())
    }

    /// Release the engine. Drops the schema under `create-drop`.
    pub async fn close(self) -> EngineResult<()> {
        if self.ctx.config.schema_update == SchemaUpdate::CreateDrop {
            self.ctx.store.drop_schema().await?;
            info!(store = self.ctx.store.name(), "Schema dropped on close");
        }
        Ok(())
    }
}
