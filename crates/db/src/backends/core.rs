//! Adapter contract
//!
//! The runtime never talks to a database directly. Each backend provides an
//! [`Adapter`] that opens a [`Client`]; clients hand out [`Executor`]s that
//! translate condition trees into native requests and run them, and
//! [`Transaction`]s whose executors run inside the transaction.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::conditions::{Conditional, SortDirection};
use crate::connection::DataSource;
use crate::error::{ModelError, ModelResult};
use crate::metadata::Metadata;

/// A decoded record with native field names
pub type Document = Map<String, Value>;

/// Sort key with a native field name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeOrder {
    pub field: String,
    pub direction: SortDirection,
}

/// Read request handed to an executor.
///
/// `filter` still uses logical field names; executors translate it with the
/// metadata. Projection and order are already native.
#[derive(Debug, Clone, PartialEq)]
pub struct FindQuery {
    pub filter: Conditional,
    pub projection: Vec<String>,
    pub order: Vec<NativeOrder>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
}

impl FindQuery {
    pub fn new(filter: Conditional) -> Self {
        Self {
            filter,
            projection: Vec::new(),
            order: Vec::new(),
            skip: None,
            limit: None,
        }
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }
}

/// Outcome of an insert
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertResult {
    pub inserted: u64,
    /// Primary key values, in insertion order, when the backend reports them
    pub ids: Vec<Value>,
}

/// Runs native requests against a connection or transaction
#[async_trait]
pub trait Executor: Send + Sync {
    /// Insert documents; on partial failure return `ModelError::Mutation`
    /// carrying the number inserted before the failure
    async fn insert(&self, metadata: &Metadata, docs: Vec<Document>) -> ModelResult<InsertResult>;

    async fn find(&self, metadata: &Metadata, query: &FindQuery) -> ModelResult<Vec<Document>>;

    async fn count(&self, metadata: &Metadata, filter: &Conditional) -> ModelResult<u64>;

    /// Apply `set` to one (`multi == false`) or all matching documents
    async fn update(
        &self,
        metadata: &Metadata,
        filter: &Conditional,
        set: &Document,
        multi: bool,
    ) -> ModelResult<u64>;

    async fn delete(&self, metadata: &Metadata, filter: &Conditional, multi: bool) -> ModelResult<u64>;
}

/// An open backend transaction
#[async_trait]
pub trait Transaction: Send + Sync {
    fn executor(&self) -> Arc<dyn Executor>;

    async fn commit(&self) -> ModelResult<()>;

    async fn rollback(&self) -> ModelResult<()>;
}

/// An open connection to one data source
#[async_trait]
pub trait Client: Send + Sync {
    fn executor(&self) -> Arc<dyn Executor>;

    async fn begin(&self) -> ModelResult<Arc<dyn Transaction>>;

    async fn disconnect(&self) -> ModelResult<()>;
}

/// Backend entry point, registered by name
#[async_trait]
pub trait Adapter: Send + Sync {
    fn name(&self) -> &str;

    async fn connect(&self, source: &DataSource) -> ModelResult<Arc<dyn Client>>;
}

/// Adapters by name
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: RwLock<HashMap<String, Arc<dyn Adapter>>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, adapter: Arc<dyn Adapter>) {
        self.adapters
            .write()
            .insert(adapter.name().to_string(), adapter);
    }

    pub fn get(&self, name: &str) -> ModelResult<Arc<dyn Adapter>> {
        self.adapters
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ModelError::AdapterNotFound(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("adapters", &self.names())
            .finish()
    }
}

/// SQL dialect differences the translator cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    PostgreSQL,
    MySQL,
    SQLite,
}

impl SqlDialect {
    /// Placeholder for the zero-based parameter `index`
    pub fn parameter_placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::PostgreSQL => format!("${}", index + 1),
            SqlDialect::MySQL | SqlDialect::SQLite => "?".to_string(),
        }
    }

    pub fn identifier_quote(&self) -> char {
        match self {
            SqlDialect::PostgreSQL | SqlDialect::SQLite => '"',
            SqlDialect::MySQL => '`',
        }
    }

    /// Quote an identifier, doubling embedded quote characters
    pub fn quote(&self, identifier: &str) -> String {
        let q = self.identifier_quote();
        let escaped = identifier.replace(q, &format!("{}{}", q, q));
        format!("{}{}{}", q, escaped, q)
    }

    /// Regular-expression match operator
    pub fn regexp_operator(&self, case_insensitive: bool) -> &'static str {
        match (self, case_insensitive) {
            (SqlDialect::PostgreSQL, false) => "~",
            (SqlDialect::PostgreSQL, true) => "~*",
            (SqlDialect::MySQL | SqlDialect::SQLite, _) => "REGEXP",
        }
    }
}
