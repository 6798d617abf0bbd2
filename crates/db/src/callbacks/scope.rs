//! Per-operation context threaded through a processor

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{error, warn};

use crate::backends::core::{Document, Executor, Transaction};
use crate::conditions::{Conditional, OrderBy};
use crate::connection::Connection;
use crate::database::Database;
use crate::error::{ModelError, ModelResult};
use crate::loading::PreloadOptions;
use crate::metadata::Metadata;

/// Store key of the transaction handle
pub const TX_KEY: &str = "db:tx";

/// Processor an action runs through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Create,
    Query,
    Update,
    Delete,
}

/// Concrete operation requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    InsertOne,
    InsertMany,
    QueryOne,
    QueryAll,
    QueryCount,
    UpdateOne,
    UpdateMany,
    DeleteOne,
    DeleteMany,
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::InsertOne | Action::InsertMany => ActionKind::Create,
            Action::QueryOne | Action::QueryAll | Action::QueryCount => ActionKind::Query,
            Action::UpdateOne | Action::UpdateMany => ActionKind::Update,
            Action::DeleteOne | Action::DeleteMany => ActionKind::Delete,
        }
    }

    /// Whether a mutation targets every match rather than the first
    pub fn is_multi(&self) -> bool {
        matches!(
            self,
            Action::InsertMany | Action::QueryAll | Action::UpdateMany | Action::DeleteMany
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::InsertOne => "insert_one",
            Action::InsertMany => "insert_many",
            Action::QueryOne => "query_one",
            Action::QueryAll => "query_all",
            Action::QueryCount => "query_count",
            Action::UpdateOne => "update_one",
            Action::UpdateMany => "update_many",
            Action::DeleteOne => "delete_one",
            Action::DeleteMany => "delete_many",
        };
        write!(f, "{}", name)
    }
}

/// Transaction handle kept in the scope store
#[derive(Clone)]
pub struct TxHandle {
    pub tx: Arc<dyn Transaction>,
    /// Opened by this scope, so the pipeline must finish it
    pub owned: bool,
}

/// Mutable state of one operation.
///
/// Records use declared field names; stages convert to native names only at
/// the adapter boundary.
pub struct Scope {
    pub action: Action,
    pub metadata: Arc<Metadata>,
    pub connection: Arc<Connection>,
    pub conditions: Vec<Conditional>,
    pub projection: Vec<String>,
    pub order: Vec<OrderBy>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    /// Bypass logic-delete substitution and liveness filtering
    pub unscoped: bool,
    pub preloads: Vec<PreloadOptions>,
    /// Insert payloads before execution, decoded results after a query
    pub records: Vec<Document>,
    /// Update document
    pub update: Document,
    pub affected: u64,
    pub count: u64,
    pub inserted_ids: Vec<Value>,
    db: Database,
    errors: Vec<ModelError>,
    skipped: bool,
    deadline: Option<Instant>,
    store: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("action", &self.action)
            .field("metadata", &self.metadata.name)
            .field("conditions", &self.conditions)
            .field("records", &self.records.len())
            .field("affected", &self.affected)
            .field("errors", &self.errors)
            .field("skipped", &self.skipped)
            .finish()
    }
}

impl Scope {
    pub fn new(
        db: Database,
        action: Action,
        metadata: Arc<Metadata>,
        connection: Arc<Connection>,
    ) -> Self {
        Self {
            action,
            metadata,
            connection,
            conditions: Vec::new(),
            projection: Vec::new(),
            order: Vec::new(),
            skip: None,
            limit: None,
            unscoped: false,
            preloads: Vec::new(),
            records: Vec::new(),
            update: Document::new(),
            affected: 0,
            count: 0,
            inserted_ids: Vec::new(),
            db,
            errors: Vec::new(),
            skipped: false,
            deadline: None,
            store: HashMap::new(),
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn add_error(&mut self, err: ModelError) {
        warn!(metadata = %self.metadata.name, action = %self.action, error = %err, "Operation error");
        self.errors.push(err);
    }

    pub fn has_error(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &[ModelError] {
        &self.errors
    }

    /// Stop the remaining stages of this pipeline
    pub fn skip(&mut self) {
        self.skipped = true;
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped
    }

    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn deadline_elapsed(&self) -> bool {
        self.deadline.map_or(false, |d| Instant::now() >= d)
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Await an adapter call under the scope deadline
    pub async fn run<T, F>(&self, what: &str, fut: F) -> ModelResult<T>
    where
        F: Future<Output = ModelResult<T>>,
    {
        match self.remaining() {
            Some(remaining) => match tokio::time::timeout(remaining, fut).await {
                Ok(result) => result,
                Err(_) => Err(ModelError::Timeout(format!(
                    "{} on '{}'",
                    what, self.metadata.name
                ))),
            },
            None => fut.await,
        }
    }

    pub fn set<T: Any + Send + Sync>(&mut self, key: &str, value: T) {
        self.store.insert(key.to_string(), Arc::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.store
            .get(key)
            .cloned()
            .and_then(|value| value.downcast::<T>().ok())
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.store.remove(key).is_some()
    }

    pub fn transaction(&self) -> Option<Arc<TxHandle>> {
        self.get::<TxHandle>(TX_KEY)
    }

    /// Executor of the open transaction, or of the connection
    pub fn executor(&self) -> Arc<dyn Executor> {
        match self.transaction() {
            Some(handle) => handle.tx.executor(),
            None => self.connection.executor(),
        }
    }

    /// Roll back a transaction this scope opened and never finished
    pub async fn abandon_transaction(&mut self) {
        if let Some(handle) = self.transaction().filter(|h| h.owned) {
            self.remove(TX_KEY);
            warn!(metadata = %self.metadata.name, action = %self.action, "Rolling back unfinished transaction");
            if let Err(err) = handle.tx.rollback().await {
                error!(metadata = %self.metadata.name, error = %err, "Rollback failed");
            }
            self.discard_writes();
        }
    }

    /// Forget the writes of a transaction that did not commit.
    ///
    /// Partial-success errors lose their count since nothing persisted.
    pub fn discard_writes(&mut self) {
        self.affected = 0;
        self.inserted_ids.clear();
        for err in self.errors.iter_mut() {
            if let ModelError::Mutation { message, .. } = err {
                let message = std::mem::take(message);
                *err = ModelError::Database(message);
            }
        }
    }

    /// Caller conditions plus the liveness predicate of a bound logic-delete rule
    pub fn effective_filter(&self) -> Conditional {
        let mut parts = self.conditions.clone();
        if !self.unscoped {
            if let Some(rule) = self.db.logic_delete_rule(&self.metadata.name) {
                parts.push(rule.get.clone().into());
            }
        }
        Conditional::all_of(parts)
    }

    /// Fields the operation writes or filters on, for hook field gates
    pub fn touched_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = Vec::new();
        let mut push = |name: &str| {
            if !fields.iter().any(|f| f == name) {
                fields.push(name.to_string());
            }
        };
        match self.action.kind() {
            ActionKind::Create => {
                for record in &self.records {
                    record
                        .iter()
                        .filter(|(_, v)| !is_zero(v))
                        .for_each(|(k, _)| push(k));
                }
            }
            ActionKind::Update => {
                self.update
                    .iter()
                    .filter(|(_, v)| !v.is_null())
                    .for_each(|(k, _)| push(k));
            }
            ActionKind::Query | ActionKind::Delete => {
                for cond in &self.conditions {
                    cond.fields().iter().for_each(|f| push(f));
                }
            }
        }
        fields
    }

    /// Consume the accumulated errors into one result
    pub fn take_error(&mut self) -> Option<ModelError> {
        let mut errors = std::mem::take(&mut self.errors);
        let err = match errors.len() {
            0 => return None,
            1 => errors.remove(0),
            _ => ModelError::Multiple(errors),
        };
        // partial mutations report what was affected before the failure
        if self.affected > 0 && err.affected() == 0 && self.action.kind() != ActionKind::Query {
            return Some(ModelError::Mutation {
                affected: self.affected,
                message: err.to_string(),
            });
        }
        Some(err)
    }
}

fn is_zero(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::MEMORY_ADAPTER;
    use crate::connection::DataSource;
    use crate::metadata::{Field, FieldType};

    async fn insert_scope() -> Scope {
        let db = Database::new();
        db.connect(DataSource::new("main", MEMORY_ADAPTER, "")).await.unwrap();
        let metadata = db
            .register_metadata(
                "main",
                Metadata::builder("Member")
                    .field(Field::new("ID", FieldType::Int).primary())
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let connection = db.connection("main").unwrap();
        Scope::new(db, Action::InsertMany, metadata, connection)
    }

    #[tokio::test]
    async fn test_take_error_reports_partial_mutation() {
        let mut scope = insert_scope().await;
        scope.affected = 2;
        scope.add_error(ModelError::Database("disk full".to_string()));
        let err = scope.take_error().unwrap();
        assert!(matches!(err, ModelError::Mutation { affected: 2, .. }));
    }

    #[tokio::test]
    async fn test_discarded_writes_report_nothing_affected() {
        let mut scope = insert_scope().await;
        scope.affected = 2;
        scope.inserted_ids = vec![Value::from(1), Value::from(2)];
        scope.add_error(ModelError::Mutation {
            affected: 2,
            message: "duplicate value 7".to_string(),
        });
        scope.discard_writes();

        assert!(scope.inserted_ids.is_empty());
        let err = scope.take_error().unwrap();
        assert!(matches!(err, ModelError::Database(ref msg) if msg == "duplicate value 7"));
        assert_eq!(err.affected(), 0);
    }
}
