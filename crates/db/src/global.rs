//! Process-wide default database
//!
//! Created on first use with [`RuntimeConfig::from_env`], falling back to the
//! defaults when the environment holds invalid values.

use std::future::Future;
use std::sync::Arc;

use once_cell::sync::Lazy;
use tracing::warn;

use crate::callbacks::Scope;
use crate::config::RuntimeConfig;
use crate::connection::{Connection, DataSource};
use crate::database::Database;
use crate::error::ModelResult;
use crate::event_error::EventError;
use crate::logic_delete::LogicDeleteRule;
use crate::metadata::{Metadata, Record};
use crate::model::{Collection, TxSession};

static GLOBAL: Lazy<Database> = Lazy::new(|| {
    let config = RuntimeConfig::from_env().unwrap_or_else(|err| {
        warn!(error = %err, "Ignoring invalid ELIF_DB_* settings");
        RuntimeConfig::default()
    });
    Database::with_config(config)
});

/// The shared default database
pub fn global() -> &'static Database {
    &GLOBAL
}

pub async fn connect(source: DataSource) -> ModelResult<Arc<Connection>> {
    global().connect(source).await
}

pub fn register_metadata(source: &str, metadata: Metadata) -> ModelResult<Arc<Metadata>> {
    global().register_metadata(source, metadata)
}

pub fn register_record<T: Record>(source: &str) -> ModelResult<Arc<Metadata>> {
    global().register_record::<T>(source)
}

pub fn register_logic_delete_rule(pattern: &str, rule: LogicDeleteRule) {
    global().register_logic_delete_rule(pattern, rule)
}

pub fn register_middleware<F>(pattern: &str, hook: F) -> ModelResult<usize>
where
    F: Fn(&mut Scope) -> Result<(), EventError> + Send + Sync + 'static,
{
    global().register_middleware(pattern, hook)
}

pub fn model(name: &str) -> ModelResult<Collection> {
    global().model(name)
}

pub async fn with_transaction<F, Fut, R>(source: &str, f: F) -> ModelResult<R>
where
    F: FnOnce(TxSession) -> Fut,
    Fut: Future<Output = ModelResult<R>>,
{
    global().with_transaction(source, f).await
}
