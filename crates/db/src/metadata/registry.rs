//! Process-wide metadata store

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::{Field, Metadata};
use crate::error::{ModelError, ModelResult};

/// Registry of metadata by name.
///
/// Lookups take the shared lock; registration, removal and field additions
/// take the exclusive lock. Stored metadata is immutable: `add_field`
/// replaces the entry with an updated copy.
#[derive(Debug, Default)]
pub struct MetadataRegistry {
    entries: RwLock<HashMap<String, Arc<Metadata>>>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace metadata; returns the stored handle
    pub fn register(&self, metadata: Metadata) -> ModelResult<Arc<Metadata>> {
        metadata.validate()?;
        let metadata = Arc::new(metadata);
        let previous = self
            .entries
            .write()
            .insert(metadata.name.clone(), Arc::clone(&metadata));
        if previous.is_some() {
            warn!(metadata = %metadata.name, "Replacing registered metadata");
        } else {
            debug!(metadata = %metadata.name, source = %metadata.source, "Registered metadata");
        }
        Ok(metadata)
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<Metadata>> {
        self.entries.read().get(name).cloned()
    }

    pub fn get(&self, name: &str) -> ModelResult<Arc<Metadata>> {
        self.lookup(name)
            .ok_or_else(|| ModelError::MetadataNotFound(name.to_string()))
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<Metadata>> {
        self.entries.write().remove(name)
    }

    /// Append a field to registered metadata
    pub fn add_field(&self, name: &str, field: Field) -> ModelResult<Arc<Metadata>> {
        let mut entries = self.entries.write();
        let current = entries
            .get(name)
            .ok_or_else(|| ModelError::MetadataNotFound(name.to_string()))?;
        let mut updated = Metadata::clone(current);
        updated.add_field(field)?;
        let updated = Arc::new(updated);
        entries.insert(name.to_string(), Arc::clone(&updated));
        Ok(updated)
    }

    /// Names of all registered metadata, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of metadata owned by one data source
    pub fn names_for_source(&self, source: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .read()
            .values()
            .filter(|m| m.source == source)
            .map(|m| m.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{FieldType, Relationship};
    use std::thread;

    #[test]
    fn test_register_and_lookup() {
        let registry = MetadataRegistry::new();
        registry.register(Metadata::new("Member")).unwrap();
        assert!(registry.lookup("Member").is_some());
        assert!(matches!(
            registry.get("Missing"),
            Err(ModelError::MetadataNotFound(_))
        ));
        assert!(registry.register(Metadata::new("")).is_err());
    }

    #[test]
    fn test_add_field_replaces_copy() {
        let registry = MetadataRegistry::new();
        let before = registry.register(Metadata::new("Member")).unwrap();
        let after = registry
            .add_field(
                "Member",
                Field::new("Posts", FieldType::Array)
                    .with_relationship(Relationship::has_many("Post", "ID", "AuthorID")),
            )
            .unwrap();

        assert!(before.field_by_name("Posts").is_none());
        assert!(after.field_by_name("Posts").is_some());
        assert!(registry.lookup("Member").unwrap().relationship("Posts").is_some());
    }

    #[test]
    fn test_concurrent_register_and_lookup() {
        let registry = Arc::new(MetadataRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    let name = format!("Record{}", i);
                    registry.register(Metadata::new(name.as_str())).unwrap();
                    assert!(registry.lookup(&name).is_some());
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.len(), 8);
    }
}
