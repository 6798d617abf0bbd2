//! Caller-managed transactions

use std::sync::Arc;

use tracing::info;

use super::collection::Collection;
use crate::backends::core::Transaction;
use crate::database::Database;
use crate::error::{ModelError, ModelResult};

/// An open transaction on one data source.
///
/// Collections obtained through [`TxSession::model`] run on the transaction;
/// the pipeline never commits it, the owner does.
#[derive(Clone)]
pub struct TxSession {
    db: Database,
    source: String,
    tx: Arc<dyn Transaction>,
}

impl std::fmt::Debug for TxSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxSession")
            .field("source", &self.source)
            .finish()
    }
}

impl TxSession {
    pub(crate) fn new(db: Database, source: &str, tx: Arc<dyn Transaction>) -> Self {
        Self {
            db,
            source: source.to_string(),
            tx,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Collection bound to this transaction
    pub fn model(&self, name: &str) -> ModelResult<Collection> {
        let collection = self.db.model(name)?;
        if collection.metadata().source != self.source {
            return Err(ModelError::Transaction(format!(
                "'{}' belongs to data source '{}', not '{}'",
                name,
                collection.metadata().source,
                self.source
            )));
        }
        Ok(collection.within(Arc::clone(&self.tx)))
    }

    pub async fn commit(&self) -> ModelResult<()> {
        self.tx.commit().await?;
        info!(source = %self.source, "Transaction committed");
        Ok(())
    }

    pub async fn rollback(&self) -> ModelResult<()> {
        self.tx.rollback().await?;
        info!(source = %self.source, "Transaction rolled back");
        Ok(())
    }
}
