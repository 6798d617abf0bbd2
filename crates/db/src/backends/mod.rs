//! Backend adapters
//!
//! The adapter contract lives in [`core`]; condition translators for the two
//! backend families live in [`document`] and [`sql`].

pub mod core;
pub mod document;
pub mod memory;
pub mod postgres;
pub mod sql;

pub use self::core::{
    Adapter, AdapterRegistry, Client, Document, Executor, FindQuery, InsertResult, NativeOrder,
    SqlDialect, Transaction,
};
pub use document::{DocumentFilter, DocumentTranslator};
pub use memory::{MemoryAdapter, MemoryStore, MEMORY_ADAPTER};
pub use postgres::{PostgresAdapter, POSTGRES_ADAPTER};
pub use sql::{SqlFragment, SqlTranslator, StatementBuilder};
