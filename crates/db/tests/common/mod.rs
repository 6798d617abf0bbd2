//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::sync::Arc;

use elif_db::{
    DataSource, Database, Field, FieldType, MemoryAdapter, MemoryStore, Metadata, Record,
    Relationship, RelationshipKind, RuntimeConfigBuilder, MEMORY_ADAPTER,
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

pub const SOURCE: &str = "main";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Member {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(rename = "FirstName")]
    pub first_name: String,
    #[serde(rename = "LastName")]
    pub last_name: String,
    #[serde(rename = "Age")]
    pub age: i64,
    #[serde(rename = "DeletedAt")]
    pub deleted_at: Option<i64>,
}

impl Record for Member {
    fn field_tags() -> Vec<(&'static str, &'static str)> {
        vec![
            ("ID", "pk;auto"),
            ("DeletedAt", "type=int"),
            ("FirstName", "rqd"),
        ]
    }
}

pub fn member(first: &str, last: &str, age: i64) -> Member {
    Member {
        first_name: first.to_string(),
        last_name: last.to_string(),
        age,
        ..Default::default()
    }
}

/// Honors RUST_LOG, e.g. `RUST_LOG=elif_db=debug`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Database with a connected in-memory source and direct access to its store
pub async fn memory_db() -> (Database, Arc<MemoryStore>) {
    init_tracing();
    let config = RuntimeConfigBuilder::testing().build().unwrap();
    let db = Database::with_config(config);
    let adapter = Arc::new(MemoryAdapter::new());
    db.register_adapter(adapter.clone());
    db.connect(DataSource::new(SOURCE, MEMORY_ADAPTER, ""))
        .await
        .unwrap();
    let store = adapter.store(SOURCE).unwrap();
    (db, store)
}

/// Author -> Posts (has many), Post -> Author (ref one), Post -> Tags (ref many via PostTag)
pub fn blog_metadata(db: &Database) {
    db.register_metadata(
        SOURCE,
        Metadata::builder("Author")
            .field(Field::new("ID", FieldType::Int).primary())
            .field(Field::new("Name", FieldType::String))
            .field(
                Field::new("Posts", FieldType::Array).with_relationship(Relationship::new(
                    RelationshipKind::HasMany,
                    "Post",
                    "ID",
                    "AuthorID",
                )),
            )
            .build()
            .unwrap(),
    )
    .unwrap();

    db.register_metadata(
        SOURCE,
        Metadata::builder("Post")
            .field(Field::new("ID", FieldType::Int).primary())
            .field(Field::new("AuthorID", FieldType::Int))
            .field(Field::new("Title", FieldType::String))
            .field(
                Field::new("Author", FieldType::Object).with_relationship(Relationship::new(
                    RelationshipKind::RefOne,
                    "Author",
                    "AuthorID",
                    "ID",
                )),
            )
            .field(
                Field::new("Tags", FieldType::Array).with_relationship(
                    Relationship::new(RelationshipKind::RefMany, "Tag", "ID", "Code")
                        .through("PostTag", "PostID", "TagCode"),
                ),
            )
            .build()
            .unwrap(),
    )
    .unwrap();

    db.register_metadata(
        SOURCE,
        Metadata::builder("Tag")
            .field(Field::new("Code", FieldType::String).primary())
            .field(Field::new("Label", FieldType::String))
            .build()
            .unwrap(),
    )
    .unwrap();

    db.register_metadata(
        SOURCE,
        Metadata::builder("PostTag")
            .field(Field::new("PostID", FieldType::Int))
            .field(Field::new("TagCode", FieldType::String))
            .build()
            .unwrap(),
    )
    .unwrap();
}
