//! Operations on one registered metadata

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::find::FindResult;
use crate::backends::core::{Document, Transaction};
use crate::callbacks::{Action, Scope, TxHandle, TX_KEY};
use crate::conditions::{Cond, Conditional};
use crate::connection::Connection;
use crate::database::Database;
use crate::error::{ModelError, ModelResult};
use crate::metadata::Metadata;

/// Handle returned by [`Database::model`]
#[derive(Clone)]
pub struct Collection {
    db: Database,
    metadata: Arc<Metadata>,
    connection: Arc<Connection>,
    tx: Option<Arc<dyn Transaction>>,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("metadata", &self.metadata.name)
            .field("source", &self.connection.name())
            .field("in_transaction", &self.tx.is_some())
            .finish()
    }
}

impl Collection {
    pub(crate) fn new(db: Database, metadata: Arc<Metadata>, connection: Arc<Connection>) -> Self {
        Self {
            db,
            metadata,
            connection,
            tx: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn metadata(&self) -> &Arc<Metadata> {
        &self.metadata
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Run every operation of this handle on an external transaction
    pub fn within(mut self, tx: Arc<dyn Transaction>) -> Self {
        self.tx = Some(tx);
        self
    }

    /// Fresh scope for an action, joined to the external transaction if any
    pub(crate) fn scope(&self, action: Action, deadline: Option<Instant>) -> Scope {
        let mut scope = Scope::new(
            self.db.clone(),
            action,
            Arc::clone(&self.metadata),
            Arc::clone(&self.connection),
        );
        if let Some(tx) = &self.tx {
            scope.set(
                TX_KEY,
                TxHandle {
                    tx: Arc::clone(tx),
                    owned: false,
                },
            );
        }
        let deadline =
            deadline.unwrap_or_else(|| Instant::now() + *self.db.config().get_default_timeout());
        scope.set_deadline(Some(deadline));
        scope
    }

    /// Run a scope through the processor of its action
    pub(crate) async fn execute(&self, mut scope: Scope) -> Scope {
        if *self.db.config().get_log_statements() {
            debug!(metadata = %self.metadata.name, action = %scope.action, conditions = ?scope.conditions, "Executing operation");
        }
        self.db
            .callbacks()
            .processor(scope.action.kind())
            .execute(&mut scope)
            .await;
        scope
    }

    /// Insert one record; returns its primary key value
    pub async fn insert_one<T: Serialize>(&self, record: &T) -> ModelResult<Value> {
        let doc = to_document(record)?;
        let ids = self.insert_documents(Action::InsertOne, vec![doc]).await?;
        Ok(ids.into_iter().next().unwrap_or(Value::Null))
    }

    /// Insert several records in one request; returns their primary key values
    pub async fn insert_many<T: Serialize>(&self, records: &[T]) -> ModelResult<Vec<Value>> {
        let docs = records.iter().map(to_document).collect::<ModelResult<Vec<_>>>()?;
        self.insert_documents(Action::InsertMany, docs).await
    }

    async fn insert_documents(&self, action: Action, docs: Vec<Document>) -> ModelResult<Vec<Value>> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        let mut scope = self.scope(action, None);
        scope.records = docs;
        let mut scope = self.execute(scope).await;
        if let Some(err) = scope.take_error() {
            return Err(err);
        }
        if !scope.inserted_ids.is_empty() {
            return Ok(scope.inserted_ids);
        }
        let ids = match self.metadata.primary_key() {
            Some(pk) => scope
                .records
                .iter()
                .map(|r| r.get(&pk.name).cloned().unwrap_or(Value::Null))
                .collect(),
            None => Vec::new(),
        };
        Ok(ids)
    }

    /// Start a query; terminal calls on the result run it
    pub fn find(&self, conditions: impl Into<Conditional>) -> FindResult {
        FindResult::new(self.clone(), conditions.into())
    }

    /// Query matching every record
    pub fn find_all(&self) -> FindResult {
        self.find(Cond::new())
    }
}

pub(crate) fn to_document<T: Serialize>(value: &T) -> ModelResult<Document> {
    match serde_json::to_value(value)? {
        Value::Object(doc) => Ok(doc),
        other => Err(ModelError::Serialization(format!(
            "expected an object, got {}",
            other
        ))),
    }
}
