//! Query builder and its terminal operations

use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::collection::{to_document, Collection};
use super::cursor::Cursor;
use crate::backends::core::Document;
use crate::callbacks::{Action, ActionKind, Scope};
use crate::conditions::{or, Conditional, OrderBy};
use crate::error::{ModelError, ModelResult};
use crate::loading::PreloadOptions;

/// Pending query against one collection
#[derive(Debug, Clone)]
pub struct FindResult {
    collection: Collection,
    conditions: Vec<Conditional>,
    projection: Vec<String>,
    order: Vec<OrderBy>,
    skip: Option<u64>,
    limit: Option<u64>,
    unscoped: bool,
    preloads: Vec<PreloadOptions>,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
}

impl FindResult {
    pub(crate) fn new(collection: Collection, condition: Conditional) -> Self {
        Self {
            collection,
            conditions: vec![condition],
            projection: Vec::new(),
            order: Vec::new(),
            skip: None,
            limit: None,
            unscoped: false,
            preloads: Vec::new(),
            timeout: None,
            deadline: None,
        }
    }

    /// Conjoin another condition
    pub fn and(mut self, condition: impl Into<Conditional>) -> Self {
        self.conditions.push(condition.into());
        self
    }

    /// Match either the conditions so far or `condition`
    pub fn or(mut self, condition: impl Into<Conditional>) -> Self {
        let current = Conditional::all_of(std::mem::take(&mut self.conditions));
        self.conditions = vec![or([current, condition.into()]).into()];
        self
    }

    pub fn project<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Add a sort key, e.g. `"Age"` or `"-Age"` for descending
    pub fn order_by(mut self, order: impl Into<OrderBy>) -> Self {
        self.order.push(order.into());
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// 1-based page of `size` records
    pub fn paginate(mut self, page: u64, size: u64) -> Self {
        let page = page.max(1);
        self.skip = Some((page - 1).saturating_mul(size));
        self.limit = Some(size);
        self
    }

    /// 1-based page using the configured default page size
    pub fn page(self, page: u64) -> Self {
        let size = *self.collection.database().config().get_default_page_size();
        self.paginate(page, size)
    }

    /// Ignore the logic-delete rule: deletes are physical and soft-deleted
    /// records are visible
    pub fn unscoped(mut self) -> Self {
        self.unscoped = true;
        self
    }

    /// Expand a relationship path on the results
    pub fn preload(mut self, options: impl Into<PreloadOptions>) -> Self {
        self.preloads.push(options.into());
        self
    }

    /// Deadline relative to when the terminal call starts
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Absolute deadline, shared with nested lookups
    pub fn deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub(crate) fn window(&self, skip: u64, limit: u64) -> Self {
        let mut next = self.clone();
        next.skip = Some(skip);
        next.limit = Some(limit);
        next
    }

    pub(crate) fn bounds(&self) -> (u64, Option<u64>) {
        (self.skip.unwrap_or(0), self.limit)
    }

    fn scope(&self, action: Action) -> Scope {
        let deadline = self
            .deadline
            .or_else(|| self.timeout.map(|t| Instant::now() + t));
        let mut scope = self.collection.scope(action, deadline);
        scope.conditions = self.conditions.clone();
        scope.unscoped = self.unscoped;
        if action.kind() == ActionKind::Query {
            scope.projection = self.projection.clone();
            scope.order = self.order.clone();
            scope.skip = self.skip;
            scope.limit = self.limit;
            if action != Action::QueryCount {
                scope.preloads = self.preloads.clone();
            }
        }
        scope
    }

    async fn validated(&self, action: Action) -> ModelResult<Scope> {
        for condition in &self.conditions {
            condition.validate()?;
        }
        Ok(self.collection.execute(self.scope(action)).await)
    }

    /// Run the query and return the records with preload errors still attached
    async fn query(&self, action: Action) -> ModelResult<(Vec<Document>, Option<ModelError>)> {
        let mut scope = self.validated(action).await?;
        let records = std::mem::take(&mut scope.records);
        match scope.take_error() {
            Some(err @ ModelError::Preload { .. }) => Ok((records, Some(err))),
            Some(err) => Err(err),
            None => Ok((records, None)),
        }
    }

    /// Every matching record.
    ///
    /// A preload failure discards the records; use [`FindResult::all_into`]
    /// to keep them.
    pub async fn all(&self) -> ModelResult<Vec<Document>> {
        match self.query(Action::QueryAll).await? {
            (_, Some(err)) => Err(err),
            (records, None) => Ok(records),
        }
    }

    /// Decode every matching record into `dest`.
    ///
    /// On a preload failure `dest` still receives the decoded records before
    /// the error is returned.
    pub async fn all_into<T: DeserializeOwned>(&self, dest: &mut Vec<T>) -> ModelResult<()> {
        let (records, preload_err) = self.query(Action::QueryAll).await?;
        dest.clear();
        for record in records {
            dest.push(serde_json::from_value(Value::Object(record))?);
        }
        match preload_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// First matching record, or `NotFound`.
    ///
    /// A preload failure discards the record; use [`FindResult::one_into`]
    /// to keep it.
    pub async fn one(&self) -> ModelResult<Document> {
        let (record, preload_err) = self.first().await?;
        match preload_err {
            Some(err) => Err(err),
            None => Ok(record),
        }
    }

    /// Decode the first matching record into `dest`, or return `NotFound`
    /// leaving `dest` untouched.
    ///
    /// On a preload failure `dest` still receives the decoded record before
    /// the error is returned.
    pub async fn one_into<T: DeserializeOwned>(&self, dest: &mut T) -> ModelResult<()> {
        let (record, preload_err) = self.first().await?;
        *dest = serde_json::from_value(Value::Object(record))?;
        match preload_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn first(&self) -> ModelResult<(Document, Option<ModelError>)> {
        let (records, preload_err) = self.query(Action::QueryOne).await?;
        let record = records.into_iter().next().ok_or_else(|| {
            ModelError::NotFound(format!("no '{}' record matches", self.collection.name()))
        })?;
        Ok((record, preload_err))
    }

    /// Number of matching records; ignores projection, paging and preloads
    pub async fn count(&self) -> ModelResult<u64> {
        let mut scope = self.validated(Action::QueryCount).await?;
        match scope.take_error() {
            Some(err) => Err(err),
            None => Ok(scope.count),
        }
    }

    /// Pages of `size` records needed to cover every match
    pub async fn total_pages(&self, size: u64) -> ModelResult<u64> {
        if size == 0 {
            return Err(ModelError::Query("page size must be greater than zero".to_string()));
        }
        let count = self.count().await?;
        Ok(count.div_ceil(size))
    }

    /// Stream matches in batches of the configured cursor size
    pub fn cursor(&self) -> Cursor {
        let batch = *self.collection.database().config().get_cursor_batch_size();
        Cursor::new(self.clone(), batch as u64)
    }

    pub async fn update_one<S: Serialize>(&self, set: &S) -> ModelResult<u64> {
        self.mutate_update(Action::UpdateOne, to_document(set)?).await
    }

    pub async fn update_many<S: Serialize>(&self, set: &S) -> ModelResult<u64> {
        self.mutate_update(Action::UpdateMany, to_document(set)?).await
    }

    async fn mutate_update(&self, action: Action, set: Document) -> ModelResult<u64> {
        for condition in &self.conditions {
            condition.validate()?;
        }
        let mut scope = self.scope(action);
        scope.update = set;
        let mut scope = self.collection.execute(scope).await;
        match scope.take_error() {
            Some(err) => Err(err),
            None => Ok(scope.affected),
        }
    }

    /// Delete the first match; soft-deletes when a rule is bound
    pub async fn delete_one(&self) -> ModelResult<u64> {
        self.mutate_delete(Action::DeleteOne).await
    }

    pub async fn delete_many(&self) -> ModelResult<u64> {
        self.mutate_delete(Action::DeleteMany).await
    }

    async fn mutate_delete(&self, action: Action) -> ModelResult<u64> {
        let mut scope = self.validated(action).await?;
        match scope.take_error() {
            Some(err) => Err(err),
            None => Ok(scope.affected),
        }
    }
}
