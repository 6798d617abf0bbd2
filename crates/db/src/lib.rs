//! # elif-db: uniform database access for elif.rs
//!
//! One query and mutation API over document stores and relational engines.
//! Callers register record metadata, connect data sources and issue
//! operations built from backend-neutral conditions. Every operation runs
//! through a dependency-sorted pipeline of stages (hooks, transactions,
//! logical deletion, batched relationship preloading) before the backend
//! adapter translates and executes it.
//!
//! ```no_run
//! use elif_db::{Cond, DataSource, Database, MEMORY_ADAPTER};
//!
//! # async fn demo(member: elif_db::Metadata) -> elif_db::ModelResult<()> {
//! let db = Database::new();
//! db.connect(DataSource::new("main", MEMORY_ADAPTER, "")).await?;
//! db.register_metadata("main", member)?;
//! let adults = db
//!     .model("Member")?
//!     .find(Cond::new().gte("Age", 18))
//!     .order_by("-Age")
//!     .all()
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod callbacks;
pub mod conditions;
pub mod config;
pub mod connection;
pub mod database;
pub mod error;
pub mod event_error;
pub mod global;
pub mod hooks;
pub mod loading;
pub mod logic_delete;
pub mod metadata;
pub mod model;

pub use backends::{
    Adapter, Client, Document, Executor, MemoryAdapter, MemoryStore, PostgresAdapter, SqlDialect,
    Transaction, MEMORY_ADAPTER, POSTGRES_ADAPTER,
};
pub use callbacks::{Action, ActionKind, Callback, Callbacks, FnCallback, Processor, Scope};
pub use conditions::{and, or, Cond, Conditional, Junction, Operator, OrderBy, SortDirection, Union};
pub use config::{ConfigError, RuntimeConfig, RuntimeConfigBuilder};
pub use connection::{Connection, DataSource};
pub use database::Database;
pub use error::{ModelError, ModelResult};
pub use event_error::EventError;
pub use global::global;
pub use hooks::Stage;
pub use loading::PreloadOptions;
pub use logic_delete::{LogicDeleteRule, SetValue};
pub use metadata::{
    Field, FieldType, Intermediate, Metadata, MetadataBuilder, Record, Relationship,
    RelationshipKind,
};
pub use model::{Collection, Cursor, FindResult, TxSession};
