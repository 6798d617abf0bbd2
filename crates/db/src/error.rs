//! Error types for the runtime
//!
//! Every public operation returns [`ModelResult`]. Backend failures are wrapped
//! with a stable `Database error:` prefix so callers can identify them.

use std::fmt;

use crate::event_error::EventError;

/// Result type alias for runtime operations
pub type ModelResult<T> = Result<T, ModelError>;

/// Error types for registration, translation, pipeline and backend failures
#[derive(Debug, Clone)]
pub enum ModelError {
    /// No adapter registered under this name
    AdapterNotFound(String),
    /// A data source with this name is already connected
    DuplicateDataSource(String),
    /// The data source is not registered or not connected
    DataSourceNotConnected(String),
    /// Metadata failed validation
    InvalidMetadata(String),
    /// No metadata registered under this name
    MetadataNotFound(String),
    /// Condition or statement translation error
    Query(String),
    /// Error reported by a backend adapter
    Database(String),
    /// A backend call exceeded its deadline
    Timeout(String),
    /// Single-record read matched nothing
    NotFound(String),
    /// Callback pipeline construction or execution error
    Pipeline(String),
    /// Relationship preloading failed for a path
    Preload { path: String, message: String },
    /// A multi-record mutation failed part way
    Mutation { affected: u64, message: String },
    /// Transaction error
    Transaction(String),
    /// Serialization/deserialization error
    Serialization(String),
    /// Configuration error
    Configuration(String),
    /// A hook rejected the operation
    Event(EventError),
    /// Several stages reported errors during one operation
    Multiple(Vec<ModelError>),
}

impl ModelError {
    /// Rows affected before the failure, for partial mutations
    pub fn affected(&self) -> u64 {
        match self {
            ModelError::Mutation { affected, .. } => *affected,
            ModelError::Multiple(errors) => errors.iter().map(|e| e.affected()).max().unwrap_or(0),
            _ => 0,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ModelError::NotFound(_))
    }

    /// Whether this error originated from a backend adapter
    pub fn is_backend(&self) -> bool {
        matches!(
            self,
            ModelError::Database(_) | ModelError::Timeout(_) | ModelError::Mutation { .. }
        )
    }
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::AdapterNotFound(name) => write!(f, "Adapter not found: '{}'", name),
            ModelError::DuplicateDataSource(name) => {
                write!(f, "Data source '{}' is already connected", name)
            }
            ModelError::DataSourceNotConnected(name) => {
                write!(f, "Data source '{}' is not connected", name)
            }
            ModelError::InvalidMetadata(msg) => write!(f, "Invalid metadata: {}", msg),
            ModelError::MetadataNotFound(name) => write!(f, "Metadata not found: '{}'", name),
            ModelError::Query(msg) => write!(f, "Query error: {}", msg),
            ModelError::Database(msg) => write!(f, "Database error: {}", msg),
            ModelError::Timeout(msg) => write!(f, "Database error: timed out: {}", msg),
            ModelError::NotFound(name) => write!(f, "Record not found in '{}'", name),
            ModelError::Pipeline(msg) => write!(f, "Pipeline error: {}", msg),
            ModelError::Preload { path, message } => {
                write!(f, "Preload error on '{}': {}", path, message)
            }
            ModelError::Mutation { affected, message } => write!(
                f,
                "Database error: mutation failed after {} affected: {}",
                affected, message
            ),
            ModelError::Transaction(msg) => write!(f, "Transaction error: {}", msg),
            ModelError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            ModelError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            ModelError::Event(err) => write!(f, "Hook error: {}", err),
            ModelError::Multiple(errors) => {
                let joined: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
                write!(f, "{}", joined.join("; "))
            }
        }
    }
}

impl std::error::Error for ModelError {}

impl From<sqlx::Error> for ModelError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ModelError::NotFound("row".to_string()),
            other => ModelError::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        ModelError::Serialization(err.to_string())
    }
}

impl From<EventError> for ModelError {
    fn from(err: EventError) -> Self {
        ModelError::Event(err)
    }
}

impl From<tokio::time::error::Elapsed> for ModelError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        ModelError::Timeout(err.to_string())
    }
}
