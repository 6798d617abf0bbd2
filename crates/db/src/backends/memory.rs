//! In-process document store
//!
//! Collections are vectors of native documents filtered with the document
//! translator. A transaction writes to private copies of the tables it touches
//! and records each change; commit replays the changes against the shared
//! tables under one write lock, so concurrent commits never overwrite each
//! other. Auto-increment keys come from the shared tables, like a sequence.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::core::{Adapter, Client, Document, Executor, FindQuery, InsertResult, Transaction};
use super::document::{compare, values_equal, DocumentFilter, DocumentTranslator};
use crate::conditions::{ConditionTranslator, Conditional, SortDirection};
use crate::connection::DataSource;
use crate::error::{ModelError, ModelResult};
use crate::metadata::{Field, FieldType, Metadata};

pub const MEMORY_ADAPTER: &str = "memory";

#[derive(Debug, Clone, Default)]
struct Table {
    docs: Vec<Document>,
    last_id: i64,
}

type Tables = HashMap<String, Table>;

/// Unique columns of a collection, as `(declared, native)` names
#[derive(Debug, Clone)]
struct UniqueKeys {
    metadata: String,
    fields: Vec<(String, String)>,
}

impl UniqueKeys {
    fn of(metadata: &Metadata) -> Self {
        Self {
            metadata: metadata.name.clone(),
            fields: metadata
                .fields()
                .iter()
                .filter(|f| (f.unique || f.primary) && !f.is_virtual())
                .map(|f| (f.name.clone(), f.native_name.clone()))
                .collect(),
        }
    }
}

impl Table {
    /// Append documents in order, stopping at the first unique violation.
    /// On failure returns how many were appended and the violation.
    fn insert(&mut self, unique: &UniqueKeys, docs: &[Document]) -> Result<u64, (u64, String)> {
        let mut inserted = 0;
        for doc in docs {
            for (name, native) in &unique.fields {
                let Some(value) = doc.get(native).filter(|v| !v.is_null()) else {
                    continue;
                };
                let taken = self
                    .docs
                    .iter()
                    .any(|existing| existing.get(native).map_or(false, |e| values_equal(e, value)));
                if taken {
                    return Err((
                        inserted,
                        format!(
                            "duplicate value {} for unique field '{}' of '{}'",
                            value, name, unique.metadata
                        ),
                    ));
                }
            }
            self.docs.push(doc.clone());
            inserted += 1;
        }
        Ok(inserted)
    }

    fn update(&mut self, filter: &DocumentFilter, set: &Document, multi: bool) -> u64 {
        let mut affected = 0;
        for doc in self.docs.iter_mut().filter(|d| filter.matches(d)) {
            for (key, value) in set {
                doc.insert(key.clone(), value.clone());
            }
            affected += 1;
            if !multi {
                break;
            }
        }
        affected
    }

    fn delete(&mut self, filter: &DocumentFilter, multi: bool) -> u64 {
        let before = self.docs.len();
        if multi {
            self.docs.retain(|d| !filter.matches(d));
        } else if let Some(pos) = self.docs.iter().position(|d| filter.matches(d)) {
            self.docs.remove(pos);
        }
        (before - self.docs.len()) as u64
    }

    fn count(&self, filter: &DocumentFilter) -> u64 {
        self.docs.iter().filter(|d| filter.matches(d)).count() as u64
    }
}

/// Fill unset auto-increment keys and advance the counter past explicit ones
fn assign_ids(docs: &mut [Document], pk: Option<&Field>, last_id: &mut i64) {
    let Some(pk) = pk else {
        return;
    };
    for doc in docs.iter_mut() {
        let unset = doc.get(&pk.native_name).map_or(true, is_unset);
        if unset && pk.auto_increment {
            let id = match pk.field_type {
                FieldType::Int => {
                    *last_id += 1;
                    json!(*last_id)
                }
                _ => json!(Uuid::new_v4().to_string()),
            };
            doc.insert(pk.native_name.clone(), id);
        } else if let Some(id) = doc.get(&pk.native_name).and_then(Value::as_i64) {
            *last_id = (*last_id).max(id);
        }
    }
}

fn insert_error(inserted: u64, message: String) -> ModelError {
    if inserted > 0 {
        ModelError::Mutation {
            affected: inserted,
            message,
        }
    } else {
        ModelError::Database(message)
    }
}

/// A write made inside a transaction, replayed on commit
#[derive(Debug, Clone)]
enum Change {
    Insert {
        collection: String,
        unique: UniqueKeys,
        docs: Vec<Document>,
    },
    Update {
        collection: String,
        filter: DocumentFilter,
        set: Document,
        multi: bool,
    },
    Delete {
        collection: String,
        filter: DocumentFilter,
        multi: bool,
    },
}

impl Change {
    fn collection(&self) -> &str {
        match self {
            Change::Insert { collection, .. }
            | Change::Update { collection, .. }
            | Change::Delete { collection, .. } => collection,
        }
    }

    fn apply(&self, table: &mut Table) -> Result<(), String> {
        match self {
            Change::Insert { unique, docs, .. } => {
                table.insert(unique, docs).map(|_| ()).map_err(|(_, message)| message)
            }
            Change::Update { filter, set, multi, .. } => {
                table.update(filter, set, *multi);
                Ok(())
            }
            Change::Delete { filter, multi, .. } => {
                table.delete(filter, *multi);
                Ok(())
            }
        }
    }
}

/// Private state of one transaction
#[derive(Debug, Default)]
struct TxLog {
    /// Copies of the tables written so far, taken on first write
    tables: Tables,
    changes: Vec<Change>,
    finished: bool,
}

impl TxLog {
    fn check_open(&self) -> ModelResult<()> {
        if self.finished {
            return Err(ModelError::Transaction(
                "transaction already finished".to_string(),
            ));
        }
        Ok(())
    }

    fn table(&mut self, shared: &RwLock<Tables>, collection: &str) -> &mut Table {
        self.tables
            .entry(collection.to_string())
            .or_insert_with(|| shared.read().get(collection).cloned().unwrap_or_default())
    }
}

/// Adapter handing out one [`MemoryStore`] per data source name
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    stores: Mutex<HashMap<String, Arc<MemoryStore>>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store backing a connected data source
    pub fn store(&self, source: &str) -> Option<Arc<MemoryStore>> {
        self.stores.lock().get(source).cloned()
    }
}

#[async_trait]
impl Adapter for MemoryAdapter {
    fn name(&self) -> &str {
        MEMORY_ADAPTER
    }

    async fn connect(&self, source: &DataSource) -> ModelResult<Arc<dyn Client>> {
        let key = source.database.clone().unwrap_or_else(|| source.name.clone());
        let store = Arc::clone(self.stores.lock().entry(key).or_default());
        info!(source = %source.name, "Connected in-memory store");
        Ok(Arc::new(MemoryClient {
            executor: Arc::new(MemoryExecutor {
                shared: Arc::clone(&store.tables),
                stats: Arc::clone(&store.stats),
                log: None,
            }),
            store,
        }))
    }
}

/// Shared tables and request counters of one store
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    stats: Arc<Mutex<HashMap<String, u64>>>,
}

impl MemoryStore {
    /// Number of find requests issued against a native collection
    pub fn find_calls(&self, collection: &str) -> u64 {
        self.stats.lock().get(collection).copied().unwrap_or(0)
    }

    pub fn reset_stats(&self) {
        self.stats.lock().clear();
    }

    /// Raw native documents of a collection
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.tables
            .read()
            .get(collection)
            .map(|t| t.docs.clone())
            .unwrap_or_default()
    }
}

struct MemoryClient {
    store: Arc<MemoryStore>,
    executor: Arc<MemoryExecutor>,
}

#[async_trait]
impl Client for MemoryClient {
    fn executor(&self) -> Arc<dyn Executor> {
        self.executor.clone()
    }

    async fn begin(&self) -> ModelResult<Arc<dyn Transaction>> {
        let log = Arc::new(Mutex::new(TxLog::default()));
        Ok(Arc::new(MemoryTransaction {
            shared: Arc::clone(&self.store.tables),
            executor: Arc::new(MemoryExecutor {
                shared: Arc::clone(&self.store.tables),
                stats: Arc::clone(&self.store.stats),
                log: Some(Arc::clone(&log)),
            }),
            log,
        }))
    }

    async fn disconnect(&self) -> ModelResult<()> {
        debug!("Disconnected in-memory store");
        Ok(())
    }
}

struct MemoryTransaction {
    shared: Arc<RwLock<Tables>>,
    executor: Arc<MemoryExecutor>,
    log: Arc<Mutex<TxLog>>,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    fn executor(&self) -> Arc<dyn Executor> {
        self.executor.clone()
    }

    async fn commit(&self) -> ModelResult<()> {
        let mut log = self.log.lock();
        log.check_open()?;
        log.finished = true;
        log.tables.clear();
        let changes = std::mem::take(&mut log.changes);

        // lock order is always tx log, then shared tables
        let mut shared = self.shared.write();
        let mut staged = Tables::new();
        for change in &changes {
            let name = change.collection();
            if !staged.contains_key(name) {
                let current = shared.get(name).cloned().unwrap_or_default();
                staged.insert(name.to_string(), current);
            }
            if let Some(table) = staged.get_mut(name) {
                if let Err(message) = change.apply(table) {
                    warn!(collection = name, %message, "Commit conflict, discarding transaction");
                    return Err(ModelError::Transaction(format!("commit failed: {}", message)));
                }
            }
        }
        shared.extend(staged);
        Ok(())
    }

    async fn rollback(&self) -> ModelResult<()> {
        let mut log = self.log.lock();
        log.check_open()?;
        log.finished = true;
        log.tables.clear();
        log.changes.clear();
        Ok(())
    }
}

struct MemoryExecutor {
    shared: Arc<RwLock<Tables>>,
    stats: Arc<Mutex<HashMap<String, u64>>>,
    /// Set inside a transaction
    log: Option<Arc<Mutex<TxLog>>>,
}

impl MemoryExecutor {
    fn matching(&self, metadata: &Metadata, filter: &Conditional) -> ModelResult<DocumentFilter> {
        DocumentTranslator.translate(Some(metadata), filter)
    }

    /// Run `read` against the transaction's copy of a table, or the shared one
    fn read_table<R>(&self, collection: &str, read: impl FnOnce(Option<&Table>) -> R) -> ModelResult<R> {
        if let Some(log) = &self.log {
            let log = log.lock();
            log.check_open()?;
            if let Some(table) = log.tables.get(collection) {
                return Ok(read(Some(table)));
            }
        }
        Ok(read(self.shared.read().get(collection)))
    }
}

fn is_unset(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn order_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.unwrap_or(&Value::Null);
    let b = b.unwrap_or(&Value::Null);
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => compare(a, b).unwrap_or(Ordering::Equal),
    }
}

#[async_trait]
impl Executor for MemoryExecutor {
    async fn insert(&self, metadata: &Metadata, mut docs: Vec<Document>) -> ModelResult<InsertResult> {
        let collection = &metadata.native_name;
        let pk = metadata.primary_key();
        let unique = UniqueKeys::of(metadata);

        let outcome = match &self.log {
            None => {
                let mut shared = self.shared.write();
                let table = shared.entry(collection.clone()).or_default();
                assign_ids(&mut docs, pk, &mut table.last_id);
                table.insert(&unique, &docs)
            }
            Some(log) => {
                let mut log = log.lock();
                log.check_open()?;
                {
                    let mut shared = self.shared.write();
                    let table = shared.entry(collection.clone()).or_default();
                    assign_ids(&mut docs, pk, &mut table.last_id);
                }
                let outcome = log.table(&self.shared, collection).insert(&unique, &docs);
                let inserted = match &outcome {
                    Ok(n) | Err((n, _)) => *n as usize,
                };
                if inserted > 0 {
                    log.changes.push(Change::Insert {
                        collection: collection.clone(),
                        unique,
                        docs: docs[..inserted].to_vec(),
                    });
                }
                outcome
            }
        };

        let inserted = outcome.map_err(|(n, message)| insert_error(n, message))?;
        let ids = match pk {
            Some(pk) => docs
                .iter()
                .map(|doc| doc.get(&pk.native_name).cloned().unwrap_or(Value::Null))
                .collect(),
            None => Vec::new(),
        };
        Ok(InsertResult { inserted, ids })
    }

    async fn find(&self, metadata: &Metadata, query: &FindQuery) -> ModelResult<Vec<Document>> {
        let filter = self.matching(metadata, &query.filter)?;
        let collection = &metadata.native_name;
        *self.stats.lock().entry(collection.clone()).or_insert(0) += 1;

        let mut docs: Vec<Document> = self.read_table(collection, |table| {
            table
                .map(|t| t.docs.iter().filter(|d| filter.matches(d)).cloned().collect())
                .unwrap_or_default()
        })?;

        if !query.order.is_empty() {
            docs.sort_by(|a, b| {
                query
                    .order
                    .iter()
                    .map(|o| {
                        let ord = order_values(a.get(&o.field), b.get(&o.field));
                        match o.direction {
                            SortDirection::Asc => ord,
                            SortDirection::Desc => ord.reverse(),
                        }
                    })
                    .find(|ord| *ord != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
        }

        let skip = query.skip.unwrap_or(0) as usize;
        let limit = query.limit.map_or(usize::MAX, |l| l as usize);
        let pk = metadata.primary_key().map(|f| f.native_name.clone());
        Ok(docs
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|doc| {
                if query.projection.is_empty() {
                    return doc;
                }
                doc.into_iter()
                    .filter(|(k, _)| query.projection.contains(k) || pk.as_ref() == Some(k))
                    .collect()
            })
            .collect())
    }

    async fn count(&self, metadata: &Metadata, filter: &Conditional) -> ModelResult<u64> {
        let filter = self.matching(metadata, filter)?;
        self.read_table(&metadata.native_name, |table| table.map_or(0, |t| t.count(&filter)))
    }

    async fn update(
        &self,
        metadata: &Metadata,
        filter: &Conditional,
        set: &Document,
        multi: bool,
    ) -> ModelResult<u64> {
        let filter = self.matching(metadata, filter)?;
        let collection = &metadata.native_name;
        let Some(log) = &self.log else {
            return Ok(self
                .shared
                .write()
                .get_mut(collection)
                .map_or(0, |t| t.update(&filter, set, multi)));
        };
        let mut log = log.lock();
        log.check_open()?;
        let affected = log.table(&self.shared, collection).update(&filter, set, multi);
        if affected > 0 {
            log.changes.push(Change::Update {
                collection: collection.clone(),
                filter,
                set: set.clone(),
                multi,
            });
        }
        Ok(affected)
    }

    async fn delete(&self, metadata: &Metadata, filter: &Conditional, multi: bool) -> ModelResult<u64> {
        let filter = self.matching(metadata, filter)?;
        let collection = &metadata.native_name;
        let Some(log) = &self.log else {
            return Ok(self
                .shared
                .write()
                .get_mut(collection)
                .map_or(0, |t| t.delete(&filter, multi)));
        };
        let mut log = log.lock();
        log.check_open()?;
        let affected = log.table(&self.shared, collection).delete(&filter, multi);
        if affected > 0 {
            log.changes.push(Change::Delete {
                collection: collection.clone(),
                filter,
                multi,
            });
        }
        Ok(affected)
    }
}
