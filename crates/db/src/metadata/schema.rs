//! Metadata inference from typed records
//!
//! A record's default value is serialized once; every top-level key becomes a
//! field whose type is inferred from the sample value. Tags override what the
//! sample cannot express (primary keys, native names, relationships, types of
//! `None` samples). Results are cached per Rust type.

use std::any::TypeId;
use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::field::{Field, FieldType};
use super::relationship::Relationship;
use super::Metadata;
use crate::error::{ModelError, ModelResult};

/// A typed record that can be registered as metadata
pub trait Record: Serialize + DeserializeOwned + Default + Send + Sync + 'static {
    /// Logical metadata name; defaults to the type name
    fn metadata_name() -> String {
        let full = std::any::type_name::<Self>();
        let base = full.split('<').next().unwrap_or(full);
        base.rsplit("::").next().unwrap_or(base).to_string()
    }

    /// Backend collection or table name override
    fn native_name() -> Option<String> {
        None
    }

    /// Per-field tags, e.g. `("ID", "pk;auto;native=_id")`
    fn field_tags() -> Vec<(&'static str, &'static str)> {
        Vec::new()
    }

    fn display_fields() -> Vec<&'static str> {
        Vec::new()
    }
}

/// Derive metadata from a record type's default sample and tags
pub fn infer_metadata<T: Record>() -> ModelResult<Metadata> {
    let name = T::metadata_name();
    let sample = serde_json::to_value(T::default())?;
    let Value::Object(sample) = sample else {
        return Err(ModelError::InvalidMetadata(format!(
            "record '{}' must serialize to an object",
            name
        )));
    };

    let tags = T::field_tags();
    let mut builder = Metadata::builder(name.as_str())
        .display_fields(T::display_fields().into_iter().map(str::to_string));
    if let Some(native) = T::native_name() {
        builder = builder.native_name(native);
    }

    for (key, value) in &sample {
        let mut field = Field::new(key.as_str(), FieldType::infer(value));
        for (_, tag) in tags.iter().filter(|(f, _)| *f == key.as_str()) {
            field = apply_tag(field, tag)?;
        }
        builder = builder.field(field);
    }

    // Tagged fields the sample does not serialize, typically relationships
    for (key, tag) in tags.iter().filter(|(f, _)| !sample.contains_key(*f)) {
        let field = apply_tag(Field::new(*key, FieldType::Object), tag)?;
        let field = match &field.relationship {
            Some(rel) if rel.kind.is_collection() && !tag.contains("type=") => Field {
                field_type: FieldType::Array,
                ..field
            },
            _ => field,
        };
        builder = builder.field(field);
    }

    builder.build()
}

/// Apply a `key[=value];key[=value]` tag string to a field
pub fn apply_tag(mut field: Field, tag: &str) -> ModelResult<Field> {
    for part in tag.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = match part.split_once('=') {
            Some((k, v)) => (k.trim(), Some(v.trim())),
            None => (part, None),
        };
        let require_value = || {
            value.filter(|v| !v.is_empty()).ok_or_else(|| {
                ModelError::InvalidMetadata(format!(
                    "tag '{}' on field '{}' needs a value",
                    key, field.name
                ))
            })
        };
        field = match key.to_ascii_lowercase().as_str() {
            "native" => {
                let native = require_value()?;
                field.with_native_name(native)
            }
            "type" => {
                let ty = FieldType::parse(require_value()?)?;
                Field {
                    field_type: ty,
                    ..field
                }
            }
            "name" | "title" => {
                let display = require_value()?;
                field.with_display_name(display)
            }
            "desc" => {
                let desc = require_value()?;
                field.with_description(desc)
            }
            "rqd" | "required" => field.required(),
            "uniq" | "unique" => field.unique(),
            "pk" | "primary" => field.primary(),
            "auto" | "autoincrement" => field.auto_increment(),
            "default" => {
                let raw = require_value()?;
                let parsed =
                    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
                field.with_default(parsed)
            }
            "ref" => {
                let rel = Relationship::parse(require_value()?)?;
                field.with_relationship(rel)
            }
            other => {
                return Err(ModelError::InvalidMetadata(format!(
                    "unknown tag '{}' on field '{}'",
                    other, field.name
                )))
            }
        };
    }
    Ok(field)
}

/// Inferred metadata keyed by record type
#[derive(Debug, Default)]
pub struct SchemaCache {
    entries: DashMap<TypeId, Arc<Metadata>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect `T` once; later calls return the cached metadata
    pub fn get_or_infer<T: Record>(&self) -> ModelResult<Arc<Metadata>> {
        let key = TypeId::of::<T>();
        if let Some(found) = self.entries.get(&key) {
            return Ok(Arc::clone(found.value()));
        }
        let metadata = Arc::new(infer_metadata::<T>()?);
        self.entries.insert(key, Arc::clone(&metadata));
        Ok(metadata)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::RelationshipKind;
    use serde::Deserialize;

    #[derive(Debug, Default, Serialize, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct Member {
        #[serde(rename = "ID")]
        id: i64,
        first_name: String,
        score: f64,
        active: bool,
        deleted_at: Option<i64>,
        tags: Vec<String>,
    }

    impl Record for Member {
        fn field_tags() -> Vec<(&'static str, &'static str)> {
            vec![
                ("ID", "pk;auto;native=_id"),
                ("DeletedAt", "type=int"),
                ("FirstName", "rqd;title=First name"),
                ("Posts", "ref=HAS_MANY,Post,ID,AuthorID"),
            ]
        }
    }

    #[test]
    fn test_infers_fields_from_sample() {
        let meta = infer_metadata::<Member>().unwrap();
        assert_eq!(meta.name, "Member");

        let id = meta.field_by_name("ID").unwrap();
        assert!(id.primary && id.auto_increment);
        assert_eq!(id.native_name, "_id");

        assert_eq!(meta.field_by_name("Score").unwrap().field_type, FieldType::Float);
        assert_eq!(meta.field_by_name("Active").unwrap().field_type, FieldType::Bool);
        assert_eq!(meta.field_by_name("DeletedAt").unwrap().field_type, FieldType::Int);
        assert_eq!(meta.field_by_name("deleted_at").unwrap().name, "DeletedAt");
        assert_eq!(meta.field_by_name("Tags").unwrap().field_type, FieldType::Array);

        let first = meta.field_by_name("FirstName").unwrap();
        assert!(first.required);
        assert_eq!(first.display_name.as_deref(), Some("First name"));
    }

    #[test]
    fn test_tag_only_relationship_field() {
        let meta = infer_metadata::<Member>().unwrap();
        let posts = meta.field_by_name("Posts").unwrap();
        assert_eq!(posts.field_type, FieldType::Array);
        assert_eq!(
            posts.relationship.as_ref().unwrap().kind,
            RelationshipKind::HasMany
        );
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let err = apply_tag(Field::new("A", FieldType::String), "indexed").unwrap_err();
        assert!(matches!(err, ModelError::InvalidMetadata(_)));
        assert!(apply_tag(Field::new("A", FieldType::String), "native=").is_err());
    }

    #[test]
    fn test_default_tag_parses_json() {
        let field = apply_tag(Field::new("Age", FieldType::Int), "default=18").unwrap();
        assert_eq!(field.default, Some(serde_json::json!(18)));
        let field = apply_tag(Field::new("Role", FieldType::String), "default=guest").unwrap();
        assert_eq!(field.default, Some(serde_json::json!("guest")));
    }

    #[test]
    fn test_cache_inspects_once() {
        let cache = SchemaCache::new();
        let a = cache.get_or_infer::<Member>().unwrap();
        let b = cache.get_or_infer::<Member>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }
}
