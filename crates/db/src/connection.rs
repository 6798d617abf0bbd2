//! Data sources and open connections

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::backends::core::{Client, Executor};
use crate::error::{ModelError, ModelResult};

/// Connection settings for one named data source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSource {
    /// Unique name callers refer to
    pub name: String,
    /// Registered adapter name, e.g. `memory` or `postgres`
    pub adapter: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub options: HashMap<String, String>,
}

impl DataSource {
    pub fn new(name: impl Into<String>, adapter: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            adapter: adapter.into(),
            url: url.into(),
            database: None,
            options: HashMap::new(),
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> ModelResult<()> {
        if self.name.trim().is_empty() {
            return Err(ModelError::Configuration(
                "data source name cannot be empty".to_string(),
            ));
        }
        if self.adapter.trim().is_empty() {
            return Err(ModelError::AdapterNotFound(String::new()));
        }
        Ok(())
    }
}

/// An open client bound to its data source
pub struct Connection {
    pub source: DataSource,
    client: Arc<dyn Client>,
}

impl Connection {
    pub fn new(source: DataSource, client: Arc<dyn Client>) -> Self {
        Self { source, client }
    }

    pub fn name(&self) -> &str {
        &self.source.name
    }

    pub fn client(&self) -> &Arc<dyn Client> {
        &self.client
    }

    pub fn executor(&self) -> Arc<dyn Executor> {
        self.client.executor()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("source", &self.source.name)
            .field("adapter", &self.source.adapter)
            .finish()
    }
}

/// Open connections by data source name
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.connections.read().contains_key(name)
    }

    /// Insert a connection; a name can only be connected once
    pub fn insert(&self, connection: Connection) -> ModelResult<Arc<Connection>> {
        let mut connections = self.connections.write();
        if connections.contains_key(connection.name()) {
            return Err(ModelError::DuplicateDataSource(connection.name().to_string()));
        }
        let connection = Arc::new(connection);
        connections.insert(connection.name().to_string(), Arc::clone(&connection));
        Ok(connection)
    }

    pub fn get(&self, name: &str) -> ModelResult<Arc<Connection>> {
        self.connections
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ModelError::DataSourceNotConnected(name.to_string()))
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Connection>> {
        self.connections.write().remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connections.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_source_deserializes_with_defaults() {
        let source: DataSource =
            serde_json::from_str(r#"{"name": "default", "adapter": "memory"}"#).unwrap();
        assert_eq!(source.name, "default");
        assert!(source.url.is_empty());
        assert!(source.options.is_empty());
        assert!(source.validate().is_ok());
    }

    #[test]
    fn test_data_source_validation() {
        assert!(DataSource::new("", "memory", "").validate().is_err());
        assert!(matches!(
            DataSource::new("main", " ", "").validate(),
            Err(ModelError::AdapterNotFound(_))
        ));
    }

    #[test]
    fn test_missing_connection() {
        let registry = ConnectionRegistry::new();
        assert!(matches!(
            registry.get("nope"),
            Err(ModelError::DataSourceNotConnected(_))
        ));
    }
}
