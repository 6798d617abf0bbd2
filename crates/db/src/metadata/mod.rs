//! Record metadata: fields, native names and relationships
//!
//! A [`Metadata`] describes one logical record type. It keeps its fields in
//! declaration order plus two lookup views, by declared name and by native
//! name, so callers can address a field either way.

pub mod field;
pub mod registry;
pub mod relationship;
pub mod schema;

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::{ModelError, ModelResult};

pub use field::*;
pub use registry::*;
pub use relationship::*;
pub use schema::*;

/// Schema description of one logical record type
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    pub name: String,
    /// Backend collection or table name
    pub native_name: String,
    pub display_fields: Vec<String>,
    /// Data source the metadata belongs to
    pub source: String,
    fields: Vec<Field>,
    by_name: HashMap<String, usize>,
    by_native: HashMap<String, usize>,
}

impl Metadata {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            native_name: native_name_for(&name),
            name,
            display_fields: Vec::new(),
            source: String::new(),
            fields: Vec::new(),
            by_name: HashMap::new(),
            by_native: HashMap::new(),
        }
    }

    pub fn builder(name: impl Into<String>) -> MetadataBuilder {
        MetadataBuilder {
            metadata: Metadata::new(name),
            pending: Vec::new(),
        }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Look a field up by declared name, then by native name
    pub fn field_by_name(&self, name: &str) -> Option<&Field> {
        self.by_name
            .get(name)
            .or_else(|| self.by_native.get(name))
            .map(|&idx| &self.fields[idx])
    }

    /// Native name of a field; unknown names pass through unchanged
    pub fn native_name_of(&self, name: &str) -> String {
        self.field_by_name(name)
            .map(|f| f.native_name.clone())
            .unwrap_or_else(|| name.to_string())
    }

    pub fn primary_key(&self) -> Option<&Field> {
        self.fields.iter().find(|f| f.primary)
    }

    pub fn relationship(&self, field: &str) -> Option<&Relationship> {
        self.field_by_name(field).and_then(|f| f.relationship.as_ref())
    }

    /// Add a field after construction, e.g. to attach a relationship
    pub fn add_field(&mut self, field: Field) -> ModelResult<()> {
        field.validate()?;
        if self.by_name.contains_key(&field.name) {
            return Err(ModelError::InvalidMetadata(format!(
                "duplicate field '{}' in '{}'",
                field.name, self.name
            )));
        }
        if self.by_native.contains_key(&field.native_name) {
            return Err(ModelError::InvalidMetadata(format!(
                "duplicate native name '{}' in '{}'",
                field.native_name, self.name
            )));
        }
        let idx = self.fields.len();
        self.by_name.insert(field.name.clone(), idx);
        self.by_native.insert(field.native_name.clone(), idx);
        self.fields.push(field);
        Ok(())
    }

    pub fn validate(&self) -> ModelResult<()> {
        if self.name.trim().is_empty() {
            return Err(ModelError::InvalidMetadata(
                "metadata name cannot be empty".to_string(),
            ));
        }
        if self.native_name.trim().is_empty() {
            return Err(ModelError::InvalidMetadata(format!(
                "metadata '{}' has an empty native name",
                self.name
            )));
        }
        if self.fields.iter().filter(|f| f.primary).count() > 1 {
            return Err(ModelError::InvalidMetadata(format!(
                "metadata '{}' declares more than one primary key",
                self.name
            )));
        }
        self.fields.iter().try_for_each(Field::validate)
    }

    /// Rename declared keys to native names; relationship fields are dropped
    pub fn to_native(&self, doc: Map<String, Value>) -> Map<String, Value> {
        doc.into_iter()
            .filter_map(|(key, value)| match self.by_name.get(&key) {
                Some(&idx) if self.fields[idx].is_virtual() => None,
                Some(&idx) => Some((self.fields[idx].native_name.clone(), value)),
                None => Some((key, value)),
            })
            .collect()
    }

    /// Rename native keys back to declared names
    pub fn from_native(&self, doc: Map<String, Value>) -> Map<String, Value> {
        doc.into_iter()
            .map(|(key, value)| match self.by_native.get(&key) {
                Some(&idx) => (self.fields[idx].name.clone(), value),
                None => (key, value),
            })
            .collect()
    }
}

/// Explicit metadata declaration
#[derive(Debug)]
pub struct MetadataBuilder {
    metadata: Metadata,
    pending: Vec<Field>,
}

impl MetadataBuilder {
    pub fn native_name(mut self, native_name: impl Into<String>) -> Self {
        self.metadata.native_name = native_name.into();
        self
    }

    pub fn display_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metadata.display_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.metadata.source = source.into();
        self
    }

    pub fn field(mut self, field: Field) -> Self {
        self.pending.push(field);
        self
    }

    pub fn build(self) -> ModelResult<Metadata> {
        let mut metadata = self.metadata;
        for field in self.pending {
            metadata.add_field(field)?;
        }
        metadata.validate()?;
        Ok(metadata)
    }
}
