//! Batched relationship resolution
//!
//! For each relationship level the resolver collects the distinct local key
//! values of every record at that level, issues one `IN` lookup per batch of
//! keys through the target's query pipeline, and fans the results back out
//! using an index of key value to record positions.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::PreloadOptions;
use crate::backends::core::Document;
use crate::callbacks::Scope;
use crate::conditions::Cond;
use crate::error::{ModelError, ModelResult};
use crate::metadata::{Metadata, Relationship, RelationshipKind};

/// Comparable form of a key value; `None` for null keys
pub fn key_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Number(n) => Some(match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) => i.to_string(),
            (_, Some(u), _) => u.to_string(),
            (_, _, Some(f)) if f.fract() == 0.0 && f.abs() < 9.0e15 => (f as i64).to_string(),
            _ => n.to_string(),
        }),
        other => Some(other.to_string()),
    }
}

/// Key value to record positions, in first-seen order
#[derive(Debug, Default)]
struct KeyIndex {
    keys: Vec<Value>,
    positions: Vec<(String, Vec<usize>)>,
    slots: HashMap<String, usize>,
}

impl KeyIndex {
    fn build<'a>(values: impl Iterator<Item = Option<&'a Value>>) -> Self {
        let mut index = KeyIndex::default();
        for (pos, value) in values.enumerate() {
            let Some(value) = value else { continue };
            let Some(key) = key_of(value) else { continue };
            match index.slots.get(&key) {
                Some(&slot) => index.positions[slot].1.push(pos),
                None => {
                    index.slots.insert(key.clone(), index.positions.len());
                    index.positions.push((key, vec![pos]));
                    index.keys.push(value.clone());
                }
            }
        }
        index
    }
}

pub struct RelationshipResolver {
    batch_size: usize,
}

impl RelationshipResolver {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    /// Resolve every preload request of the scope onto `records`.
    ///
    /// Records keep whatever was assigned before a failure; the error names
    /// the failing path.
    pub async fn preload(&self, scope: &Scope, records: &mut [Document]) -> ModelResult<()> {
        let mut requests = scope.preloads.clone();
        requests.sort_by_key(PreloadOptions::depth);

        let mut loaded: HashSet<String> = HashSet::new();
        for request in &requests {
            self.preload_path(scope, records, request, &mut loaded)
                .await
                .map_err(|err| match err {
                    ModelError::Preload { .. } => err,
                    other => ModelError::Preload {
                        path: request.path.clone(),
                        message: other.to_string(),
                    },
                })?;
        }
        Ok(())
    }

    async fn preload_path(
        &self,
        scope: &Scope,
        records: &mut [Document],
        request: &PreloadOptions,
        loaded: &mut HashSet<String>,
    ) -> ModelResult<()> {
        let segments: Vec<&str> = request.path.split('.').map(str::trim).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(ModelError::Query(format!(
                "invalid preload path '{}'",
                request.path
            )));
        }

        let mut metadata = Arc::clone(&scope.metadata);
        let mut targets: Vec<&mut Document> = records.iter_mut().collect();
        for (depth, segment) in segments.iter().enumerate() {
            let last = depth + 1 == segments.len();
            let field = metadata.field_by_name(segment).ok_or_else(|| {
                ModelError::Query(format!("'{}' has no field '{}'", metadata.name, segment))
            })?;
            let relationship = field.relationship.clone().ok_or_else(|| {
                ModelError::Query(format!(
                    "field '{}' of '{}' is not a relationship",
                    field.name, metadata.name
                ))
            })?;
            let field_name = field.name.clone();

            let prefix = segments[..=depth].join(".");
            if last || !loaded.contains(&prefix) {
                let options = if last { Some(request) } else { None };
                self.resolve(scope, &metadata, &field_name, &relationship, &mut targets, options)
                    .await?;
                loaded.insert(prefix);
            }

            if !last {
                targets = targets
                    .into_iter()
                    .flat_map(|doc| children_mut(doc, &field_name))
                    .collect();
                metadata = scope.db().metadata(&relationship.target)?;
            }
        }
        Ok(())
    }

    async fn resolve(
        &self,
        scope: &Scope,
        metadata: &Metadata,
        field: &str,
        relationship: &Relationship,
        targets: &mut [&mut Document],
        options: Option<&PreloadOptions>,
    ) -> ModelResult<()> {
        let target = scope.db().metadata(&relationship.target)?;
        let local = declared(metadata, &relationship.local_key);
        let index = KeyIndex::build(targets.iter().map(|doc| doc.get(&local)));

        let empty = if relationship.kind.is_collection() {
            Value::Array(Vec::new())
        } else {
            Value::Null
        };
        for doc in targets.iter_mut() {
            doc.insert(field.to_string(), empty.clone());
        }
        if index.keys.is_empty() {
            return Ok(());
        }
        debug!(
            metadata = %metadata.name,
            field,
            target = %target.name,
            keys = index.keys.len(),
            "Preloading relationship"
        );

        if relationship.kind == RelationshipKind::RefMany {
            return self
                .resolve_through(scope, &target, field, relationship, targets, index, options)
                .await;
        }

        let foreign = declared(&target, &relationship.foreign_key);
        let found = self
            .lookup(scope, &target.name, &foreign, index.keys.clone(), options)
            .await?;

        let mut groups: HashMap<String, Vec<Value>> = HashMap::new();
        for doc in found {
            if let Some(key) = doc.get(&foreign).and_then(key_of) {
                groups.entry(key).or_default().push(Value::Object(doc));
            }
        }

        for (key, positions) in &index.positions {
            let related = groups.get(key).cloned().unwrap_or_default();
            let value = if relationship.kind.is_collection() {
                Value::Array(window(options, related))
            } else {
                related.into_iter().next().unwrap_or(Value::Null)
            };
            for &pos in positions {
                targets[pos].insert(field.to_string(), value.clone());
            }
        }
        Ok(())
    }

    /// Many-to-many: intermediate lookup, then one target lookup on the
    /// collected keys
    #[allow(clippy::too_many_arguments)]
    async fn resolve_through(
        &self,
        scope: &Scope,
        target: &Metadata,
        field: &str,
        relationship: &Relationship,
        targets: &mut [&mut Document],
        index: KeyIndex,
        options: Option<&PreloadOptions>,
    ) -> ModelResult<()> {
        let intermediate = relationship.intermediate.as_ref().ok_or_else(|| {
            ModelError::InvalidMetadata(format!(
                "relationship '{}' to '{}' has no intermediate metadata",
                field, target.name
            ))
        })?;
        let link_meta = scope.db().metadata(&intermediate.metadata)?;
        let source_key = declared(&link_meta, &intermediate.source_key);
        let target_key = declared(&link_meta, &intermediate.target_key);

        let link_docs = self
            .lookup(scope, &link_meta.name, &source_key, index.keys.clone(), None)
            .await?;

        let mut links: HashMap<String, HashSet<String>> = HashMap::new();
        let mut target_keys: Vec<Value> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for link in &link_docs {
            let Some(source) = link.get(&source_key).and_then(key_of) else {
                continue;
            };
            let Some(destination) = link.get(&target_key).filter(|v| !is_blank(v)) else {
                continue;
            };
            let Some(destination_key) = key_of(destination) else {
                continue;
            };
            if seen.insert(destination_key.clone()) {
                target_keys.push(destination.clone());
            }
            links.entry(source).or_default().insert(destination_key);
        }
        if target_keys.is_empty() {
            return Ok(());
        }

        let foreign = if relationship.foreign_key.is_empty() {
            target
                .primary_key()
                .map(|f| f.name.clone())
                .ok_or_else(|| {
                    ModelError::InvalidMetadata(format!(
                        "'{}' needs a primary key to resolve '{}'",
                        target.name, field
                    ))
                })?
        } else {
            declared(target, &relationship.foreign_key)
        };
        let found = self
            .lookup(scope, &target.name, &foreign, target_keys, options)
            .await?;

        for (key, positions) in &index.positions {
            let Some(linked) = links.get(key) else { continue };
            let related: Vec<Value> = found
                .iter()
                .filter(|doc| {
                    doc.get(&foreign)
                        .and_then(key_of)
                        .map_or(false, |k| linked.contains(&k))
                })
                .cloned()
                .map(Value::Object)
                .collect();
            let value = Value::Array(window(options, related));
            for &pos in positions {
                targets[pos].insert(field.to_string(), value.clone());
            }
        }
        Ok(())
    }

    /// `key_field IN keys` against `target`, one query per batch
    async fn lookup(
        &self,
        scope: &Scope,
        target: &str,
        key_field: &str,
        keys: Vec<Value>,
        options: Option<&PreloadOptions>,
    ) -> ModelResult<Vec<Document>> {
        let mut collection = scope.db().model(target)?;
        if let Some(handle) = scope.transaction() {
            collection = collection.within(Arc::clone(&handle.tx));
        }

        let mut found = Vec::new();
        for chunk in keys.chunks(self.batch_size) {
            let mut find = collection
                .find(Cond::new().is_in(key_field, chunk.to_vec()))
                .deadline(scope.deadline());
            if let Some(opts) = options {
                for condition in &opts.conditions {
                    find = find.and(condition.clone());
                }
                if !opts.projection.is_empty() {
                    let mut projection = opts.projection.clone();
                    if !projection.iter().any(|f| f == key_field) {
                        projection.push(key_field.to_string());
                    }
                    find = find.project(projection);
                }
                for order in &opts.order {
                    find = find.order_by(order.clone());
                }
            }
            found.extend(find.all().await?);
        }
        Ok(found)
    }
}

fn declared(metadata: &Metadata, name: &str) -> String {
    metadata
        .field_by_name(name)
        .map(|f| f.name.clone())
        .unwrap_or_else(|| name.to_string())
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn window(options: Option<&PreloadOptions>, items: Vec<Value>) -> Vec<Value> {
    match options {
        Some(opts) => opts.window(items),
        None => items,
    }
}

fn children_mut<'a>(doc: &'a mut Document, field: &str) -> Vec<&'a mut Document> {
    match doc.get_mut(field) {
        Some(Value::Object(child)) => vec![child],
        Some(Value::Array(items)) => items.iter_mut().filter_map(Value::as_object_mut).collect(),
        _ => Vec::new(),
    }
}
