//! Built-in stages of the four processors

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error};

use super::processor::Callback;
use super::scope::{Action, Scope, TxHandle, TX_KEY};
use crate::backends::core::{Document, FindQuery, NativeOrder};
use crate::error::ModelError;
use crate::hooks::Stage;
use crate::loading::RelationshipResolver;

pub const BEGIN_TRANSACTION: &str = "db:begin_transaction";
pub const COMMIT_OR_ROLLBACK: &str = "db:commit_or_rollback_transaction";
pub const BEFORE_CREATE: &str = "db:before_create";
pub const CREATE: &str = "db:create";
pub const AFTER_CREATE: &str = "db:after_create";
pub const BEFORE_QUERY: &str = "db:before_query";
pub const QUERY: &str = "db:query";
pub const PRELOAD: &str = "db:preload";
pub const AFTER_QUERY: &str = "db:after_query";
pub const BEFORE_UPDATE: &str = "db:before_update";
pub const UPDATE: &str = "db:update";
pub const AFTER_UPDATE: &str = "db:after_update";
pub const BEFORE_DELETE: &str = "db:before_delete";
pub const DELETE: &str = "db:delete";
pub const AFTER_DELETE: &str = "db:after_delete";

/// Run the hooks bound to the scope's metadata for each stage, in order
pub fn fire_hooks(scope: &mut Scope, stages: &[Stage]) {
    for &stage in stages {
        let hooks = scope.db().hooks_for(&scope.metadata.name, stage);
        if hooks.is_empty() {
            continue;
        }
        let metadata = Arc::clone(&scope.metadata);
        let touched = scope.touched_fields();
        for hook in hooks {
            if scope.has_error() || scope.is_skipped() {
                return;
            }
            if !hook.applies(&metadata, &touched) {
                continue;
            }
            debug!(metadata = %metadata.name, stage = %stage, pattern = %hook.pattern, "Firing hook");
            if let Err(err) = hook.call(scope) {
                scope.add_error(err.into());
            }
        }
    }
}

/// Hook stage for one or more lifecycle points
pub struct HookStage {
    stages: &'static [Stage],
    /// After-hooks only see successful operations
    requires_success: bool,
}

impl HookStage {
    pub const fn before(stages: &'static [Stage]) -> Self {
        Self {
            stages,
            requires_success: false,
        }
    }

    pub const fn after(stages: &'static [Stage]) -> Self {
        Self {
            stages,
            requires_success: true,
        }
    }
}

#[async_trait]
impl Callback for HookStage {
    async fn call(&self, scope: &mut Scope) {
        if self.requires_success && scope.has_error() {
            return;
        }
        fire_hooks(scope, self.stages);
    }
}

/// Opens a transaction unless the caller already supplied one
pub struct BeginTransaction;

#[async_trait]
impl Callback for BeginTransaction {
    async fn call(&self, scope: &mut Scope) {
        if scope.has_error() || scope.transaction().is_some() {
            return;
        }
        let client = Arc::clone(scope.connection.client());
        match scope.run("begin transaction", client.begin()).await {
            Ok(tx) => scope.set(TX_KEY, TxHandle { tx, owned: true }),
            Err(err) => scope.add_error(err),
        }
    }
}

/// Commits a transaction opened by [`BeginTransaction`], or rolls it back on error
pub struct CommitOrRollback;

#[async_trait]
impl Callback for CommitOrRollback {
    async fn call(&self, scope: &mut Scope) {
        let Some(handle) = scope.transaction().filter(|h| h.owned) else {
            return;
        };
        scope.remove(TX_KEY);
        if scope.has_error() {
            if let Err(err) = handle.tx.rollback().await {
                error!(metadata = %scope.metadata.name, error = %err, "Rollback failed");
            }
            scope.discard_writes();
            return;
        }
        if let Err(err) = scope.run("commit", handle.tx.commit()).await {
            scope.discard_writes();
            scope.add_error(match err {
                ModelError::Transaction(_) => err,
                other => ModelError::Transaction(other.to_string()),
            });
        }
    }
}

/// Inserts the scope's records
pub struct CreateStage;

#[async_trait]
impl Callback for CreateStage {
    async fn call(&self, scope: &mut Scope) {
        if scope.has_error() || scope.records.is_empty() {
            return;
        }
        let metadata = Arc::clone(&scope.metadata);
        let docs: Vec<Document> = scope
            .records
            .iter()
            .map(|record| {
                let mut record = record.clone();
                for field in metadata.fields() {
                    if let Some(default) = &field.default {
                        let missing = record.get(&field.name).map_or(true, Value::is_null);
                        if missing {
                            record.insert(field.name.clone(), default.clone());
                        }
                    }
                }
                metadata.to_native(record)
            })
            .collect();

        let executor = scope.executor();
        match scope.run("insert", executor.insert(&metadata, docs)).await {
            Ok(result) => {
                scope.affected = result.inserted;
                if let Some(pk) = metadata.primary_key() {
                    for (record, id) in scope.records.iter_mut().zip(&result.ids) {
                        record.insert(pk.name.clone(), id.clone());
                    }
                }
                scope.inserted_ids = result.ids;
            }
            Err(err) => {
                scope.affected = err.affected();
                scope.add_error(err);
            }
        }
    }
}

/// Runs the find or count request
pub struct QueryStage;

#[async_trait]
impl Callback for QueryStage {
    async fn call(&self, scope: &mut Scope) {
        if scope.has_error() {
            return;
        }
        let metadata = Arc::clone(&scope.metadata);
        let filter = scope.effective_filter();
        let executor = scope.executor();

        if scope.action == Action::QueryCount {
            match scope.run("count", executor.count(&metadata, &filter)).await {
                Ok(count) => scope.count = count,
                Err(err) => scope.add_error(err),
            }
            return;
        }

        let mut query = FindQuery::new(filter);
        if !scope.projection.is_empty() {
            let mut projection: Vec<String> = scope.projection.clone();
            // preloading needs the local keys even when not projected
            for preload in &scope.preloads {
                let head = preload.path.split('.').next().unwrap_or_default();
                if let Some(rel) = metadata.relationship(head) {
                    if !projection.contains(&rel.local_key) {
                        projection.push(rel.local_key.clone());
                    }
                }
            }
            query.projection = projection
                .iter()
                .filter(|f| !metadata.field_by_name(f).map_or(false, |fd| fd.is_virtual()))
                .map(|f| metadata.native_name_of(f))
                .collect();
        }
        query.order = scope
            .order
            .iter()
            .map(|o| NativeOrder {
                field: metadata.native_name_of(&o.field),
                direction: o.direction,
            })
            .collect();
        query.skip = scope.skip;
        query.limit = match scope.action {
            Action::QueryOne => Some(1),
            _ => scope.limit,
        };

        match scope.run("find", executor.find(&metadata, &query)).await {
            Ok(docs) => {
                scope.records = docs.into_iter().map(|d| metadata.from_native(d)).collect();
            }
            Err(err) => scope.add_error(err),
        }
    }
}

/// Expands requested relationships on the decoded records
pub struct PreloadStage;

#[async_trait]
impl Callback for PreloadStage {
    async fn call(&self, scope: &mut Scope) {
        if scope.has_error() || scope.preloads.is_empty() || scope.records.is_empty() {
            return;
        }
        let mut records = std::mem::take(&mut scope.records);
        let resolver = RelationshipResolver::new(*scope.db().config().get_preload_batch_size());
        let result = resolver.preload(scope, &mut records).await;
        scope.records = records;
        if let Err(err) = result {
            scope.add_error(err);
        }
    }
}

/// Applies the update document
pub struct UpdateStage;

#[async_trait]
impl Callback for UpdateStage {
    async fn call(&self, scope: &mut Scope) {
        if scope.has_error() {
            return;
        }
        let metadata = Arc::clone(&scope.metadata);
        let set = metadata.to_native(scope.update.clone());
        if set.is_empty() {
            scope.add_error(ModelError::Query(format!(
                "update on '{}' has no fields to set",
                metadata.name
            )));
            return;
        }
        let filter = scope.effective_filter();
        let multi = scope.action.is_multi();
        let executor = scope.executor();
        match scope
            .run("update", executor.update(&metadata, &filter, &set, multi))
            .await
        {
            Ok(affected) => scope.affected = affected,
            Err(err) => {
                scope.affected = err.affected();
                scope.add_error(err);
            }
        }
    }
}

/// Deletes matching records, or marks them deleted when a logic-delete
/// rule is bound and the scope is not unscoped
pub struct DeleteStage;

#[async_trait]
impl Callback for DeleteStage {
    async fn call(&self, scope: &mut Scope) {
        if scope.has_error() {
            return;
        }
        let metadata = Arc::clone(&scope.metadata);
        let multi = scope.action.is_multi();
        let executor = scope.executor();
        let rule = if scope.unscoped {
            None
        } else {
            scope.db().logic_delete_rule(&metadata.name)
        };
        let filter = scope.effective_filter();

        let result = match rule {
            Some(rule) => {
                let set = metadata.to_native(rule.render_set());
                debug!(metadata = %metadata.name, "Substituting logic delete");
                scope
                    .run("logic delete", executor.update(&metadata, &filter, &set, multi))
                    .await
            }
            None => {
                scope
                    .run("delete", executor.delete(&metadata, &filter, multi))
                    .await
            }
        };
        match result {
            Ok(affected) => scope.affected = affected,
            Err(err) => {
                scope.affected = err.affected();
                scope.add_error(err);
            }
        }
    }
}
