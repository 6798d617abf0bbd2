//! Database handle: adapters, connections, registries and processors

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, info, warn};

use crate::backends::core::{Adapter, AdapterRegistry};
use crate::backends::memory::MemoryAdapter;
use crate::backends::postgres::PostgresAdapter;
use crate::callbacks::{Callbacks, Scope};
use crate::config::RuntimeConfig;
use crate::connection::{Connection, ConnectionRegistry, DataSource};
use crate::error::{ModelError, ModelResult};
use crate::event_error::EventError;
use crate::hooks::{HookRegistry, MetadataHook, Stage};
use crate::logic_delete::{LogicDeleteRegistry, LogicDeleteRule};
use crate::metadata::{Field, Metadata, MetadataRegistry, Record, SchemaCache};
use crate::model::{Collection, TxSession};

struct DatabaseInner {
    config: RuntimeConfig,
    adapters: AdapterRegistry,
    connections: ConnectionRegistry,
    metadata: MetadataRegistry,
    schemas: SchemaCache,
    logic_delete: RwLock<LogicDeleteRegistry>,
    hooks: RwLock<HookRegistry>,
    callbacks: Callbacks,
}

/// Entry point of the runtime.
///
/// Cloning is cheap; clones share every registry.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("adapters", &self.inner.adapters.names())
            .field("connections", &self.inner.connections.names())
            .field("metadata", &self.inner.metadata.names())
            .finish()
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl Database {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Database with the built-in adapters and standard processors
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::with_callbacks(config, Callbacks::standard())
    }

    pub fn with_callbacks(config: RuntimeConfig, callbacks: Callbacks) -> Self {
        let adapters = AdapterRegistry::new();
        adapters.register(Arc::new(MemoryAdapter::new()));
        adapters.register(Arc::new(PostgresAdapter::new()));
        Self {
            inner: Arc::new(DatabaseInner {
                config,
                adapters,
                connections: ConnectionRegistry::new(),
                metadata: MetadataRegistry::new(),
                schemas: SchemaCache::new(),
                logic_delete: RwLock::new(LogicDeleteRegistry::new()),
                hooks: RwLock::new(HookRegistry::new()),
                callbacks,
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn callbacks(&self) -> &Callbacks {
        &self.inner.callbacks
    }

    /// Register or replace an adapter under its own name
    pub fn register_adapter(&self, adapter: Arc<dyn Adapter>) {
        info!(adapter = adapter.name(), "Registered adapter");
        self.inner.adapters.register(adapter);
    }

    /// Open a client for a data source through its adapter
    pub async fn connect(&self, source: DataSource) -> ModelResult<Arc<Connection>> {
        source.validate()?;
        if self.inner.connections.contains(&source.name) {
            return Err(ModelError::DuplicateDataSource(source.name));
        }
        let adapter = self.inner.adapters.get(&source.adapter)?;
        let client = adapter.connect(&source).await?;
        let name = source.name.clone();
        match self.inner.connections.insert(Connection::new(source, Arc::clone(&client))) {
            Ok(connection) => {
                info!(source = %name, adapter = adapter.name(), "Data source connected");
                Ok(connection)
            }
            Err(err) => {
                // lost a race against a concurrent connect of the same name
                if let Err(close_err) = client.disconnect().await {
                    warn!(source = %name, error = %close_err, "Failed to close duplicate client");
                }
                Err(err)
            }
        }
    }

    /// Close and forget a data source; its metadata stays registered
    pub async fn disconnect(&self, name: &str) -> ModelResult<()> {
        let connection = self
            .inner
            .connections
            .remove(name)
            .ok_or_else(|| ModelError::DataSourceNotConnected(name.to_string()))?;
        connection.client().disconnect().await?;
        info!(source = name, "Data source disconnected");
        Ok(())
    }

    pub fn connection(&self, name: &str) -> ModelResult<Arc<Connection>> {
        self.inner.connections.get(name)
    }

    /// Names of connected data sources
    pub fn sources(&self) -> Vec<String> {
        self.inner.connections.names()
    }

    /// Register metadata against a connected data source.
    ///
    /// Existing hook and logic-delete patterns are bound to the new name.
    pub fn register_metadata(&self, source: &str, mut metadata: Metadata) -> ModelResult<Arc<Metadata>> {
        if !self.inner.connections.contains(source) {
            return Err(ModelError::DataSourceNotConnected(source.to_string()));
        }
        metadata.source = source.to_string();
        let stored = self.inner.metadata.register(metadata)?;
        self.inner.hooks.write().bind(&stored.name);
        self.inner.logic_delete.write().bind(&stored.name);
        info!(metadata = %stored.name, source, fields = stored.fields().len(), "Registered metadata");
        Ok(stored)
    }

    /// Infer metadata from a record type and register it
    pub fn register_record<T: Record>(&self, source: &str) -> ModelResult<Arc<Metadata>> {
        let inferred = self.inner.schemas.get_or_infer::<T>()?;
        self.register_metadata(source, Metadata::clone(&inferred))
    }

    pub fn unregister_metadata(&self, name: &str) -> Option<Arc<Metadata>> {
        let removed = self.inner.metadata.unregister(name)?;
        self.inner.hooks.write().unbind(name);
        self.inner.logic_delete.write().unbind(name);
        info!(metadata = name, "Unregistered metadata");
        Some(removed)
    }

    pub fn lookup_metadata(&self, name: &str) -> Option<Arc<Metadata>> {
        self.inner.metadata.lookup(name)
    }

    pub fn metadata(&self, name: &str) -> ModelResult<Arc<Metadata>> {
        self.inner.metadata.get(name)
    }

    /// Attach a field to registered metadata, typically a relationship
    pub fn add_field(&self, name: &str, field: Field) -> ModelResult<Arc<Metadata>> {
        self.inner.metadata.add_field(name, field)
    }

    /// Names of all registered metadata
    pub fn names(&self) -> Vec<String> {
        self.inner.metadata.names()
    }

    /// Register a soft-delete rule for every metadata name matching `pattern`
    pub fn register_logic_delete_rule(&self, pattern: &str, rule: LogicDeleteRule) {
        // names are read under the write lock so concurrent registrations still bind
        let mut registry = self.inner.logic_delete.write();
        let names = self.inner.metadata.names();
        registry.register(pattern, rule, names.iter().map(String::as_str));
        info!(pattern, "Registered logic delete rule");
    }

    pub fn logic_delete_rule(&self, name: &str) -> Option<Arc<LogicDeleteRule>> {
        self.inner.logic_delete.read().resolve(name)
    }

    /// Register a hook by `"<namePattern>:<stage>[:<fields>]"` pattern.
    /// Returns the number of stage hooks created.
    pub fn register_middleware<F>(&self, pattern: &str, hook: F) -> ModelResult<usize>
    where
        F: Fn(&mut Scope) -> Result<(), EventError> + Send + Sync + 'static,
    {
        let mut registry = self.inner.hooks.write();
        let names = self.inner.metadata.names();
        let created = registry.register(pattern, Arc::new(hook), names.iter().map(String::as_str))?;
        info!(pattern, stages = created, "Registered middleware");
        Ok(created)
    }

    pub fn hooks_for(&self, name: &str, stage: Stage) -> Vec<Arc<MetadataHook>> {
        self.inner.hooks.read().hooks_for(name, stage)
    }

    /// Collection handle for a registered metadata name
    pub fn model(&self, name: &str) -> ModelResult<Collection> {
        let metadata = self.metadata(name)?;
        let connection = self.connection(&metadata.source)?;
        Ok(Collection::new(self.clone(), metadata, connection))
    }

    /// Begin a transaction that operations can join through [`TxSession::model`]
    pub async fn start_transaction(&self, source: &str) -> ModelResult<TxSession> {
        let connection = self.connection(source)?;
        let tx = connection.client().begin().await?;
        info!(source, "Transaction started");
        Ok(TxSession::new(self.clone(), source, tx))
    }

    /// Run `f` inside a transaction, committing on success and rolling back on error
    pub async fn with_transaction<F, Fut, R>(&self, source: &str, f: F) -> ModelResult<R>
    where
        F: FnOnce(TxSession) -> Fut,
        Fut: Future<Output = ModelResult<R>>,
    {
        let session = self.start_transaction(source).await?;
        match f(session.clone()).await {
            Ok(result) => {
                session.commit().await?;
                Ok(result)
            }
            Err(err) => {
                warn!(source, error = %err, "Rolling back transaction");
                if let Err(rollback_err) = session.rollback().await {
                    error!(source, error = %rollback_err, "Transaction rollback failed");
                }
                Err(err)
            }
        }
    }
}
