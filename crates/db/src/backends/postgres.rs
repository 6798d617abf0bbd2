//! PostgreSQL adapter over sqlx
//!
//! Statements come from [`StatementBuilder`]; rows are decoded into JSON
//! documents keyed by column name.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, PgPool, Postgres, Row, TypeInfo, ValueRef};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::core::{
    Adapter, Client, Document, Executor, FindQuery, InsertResult, SqlDialect, Transaction,
};
use super::sql::{SqlFragment, StatementBuilder};
use crate::conditions::Conditional;
use crate::connection::DataSource;
use crate::error::{ModelError, ModelResult};
use crate::metadata::Metadata;

pub const POSTGRES_ADAPTER: &str = "postgres";

/// Pool settings read from data source options
#[derive(Debug, Clone, PartialEq)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 0,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl PoolSettings {
    pub fn from_source(source: &DataSource) -> ModelResult<Self> {
        let mut settings = Self::default();
        for (key, raw) in &source.options {
            let invalid = || {
                ModelError::Configuration(format!(
                    "invalid value '{}' for option '{}' of data source '{}'",
                    raw, key, source.name
                ))
            };
            match key.as_str() {
                "max_connections" => settings.max_connections = raw.parse().map_err(|_| invalid())?,
                "min_connections" => settings.min_connections = raw.parse().map_err(|_| invalid())?,
                "acquire_timeout" => {
                    settings.acquire_timeout =
                        Duration::from_secs(raw.parse().map_err(|_| invalid())?)
                }
                _ => {}
            }
        }
        if settings.min_connections > settings.max_connections {
            return Err(ModelError::Configuration(format!(
                "min_connections exceeds max_connections for data source '{}'",
                source.name
            )));
        }
        Ok(settings)
    }
}

/// Check the scheme, host and database name of a connection URL
pub fn validate_url(raw: &str) -> ModelResult<url::Url> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| ModelError::Configuration(format!("Invalid database URL: {}", e)))?;
    if !matches!(parsed.scheme(), "postgres" | "postgresql") {
        return Err(ModelError::Configuration(format!(
            "Invalid PostgreSQL URL scheme '{}'",
            parsed.scheme()
        )));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(ModelError::Configuration(
            "Missing host in database URL".to_string(),
        ));
    }
    if parsed.path().trim_start_matches('/').is_empty() {
        return Err(ModelError::Configuration(
            "Missing database name in URL".to_string(),
        ));
    }
    Ok(parsed)
}

#[derive(Debug, Default)]
pub struct PostgresAdapter;

impl PostgresAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Adapter for PostgresAdapter {
    fn name(&self) -> &str {
        POSTGRES_ADAPTER
    }

    async fn connect(&self, source: &DataSource) -> ModelResult<Arc<dyn Client>> {
        validate_url(&source.url)?;
        let settings = PoolSettings::from_source(source)?;
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect(&source.url)
            .await
            .map_err(|e| ModelError::Database(format!("Failed to create PostgreSQL pool: {}", e)))?;
        info!(source = %source.name, max_connections = settings.max_connections, "Connected PostgreSQL pool");
        Ok(Arc::new(PostgresClient { pool }))
    }
}

struct PostgresClient {
    pool: PgPool,
}

#[async_trait]
impl Client for PostgresClient {
    fn executor(&self) -> Arc<dyn Executor> {
        Arc::new(PostgresExecutor::new(Target::Pool(self.pool.clone())))
    }

    async fn begin(&self) -> ModelResult<Arc<dyn Transaction>> {
        let tx = self.pool.begin().await?;
        Ok(Arc::new(PostgresTransaction {
            tx: Arc::new(Mutex::new(Some(tx))),
        }))
    }

    async fn disconnect(&self) -> ModelResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

type SharedTx = Arc<Mutex<Option<sqlx::Transaction<'static, Postgres>>>>;

struct PostgresTransaction {
    tx: SharedTx,
}

fn finished() -> ModelError {
    ModelError::Transaction("Transaction already completed".to_string())
}

#[async_trait]
impl Transaction for PostgresTransaction {
    fn executor(&self) -> Arc<dyn Executor> {
        Arc::new(PostgresExecutor::new(Target::Tx(Arc::clone(&self.tx))))
    }

    async fn commit(&self) -> ModelResult<()> {
        let tx = self.tx.lock().await.take().ok_or_else(finished)?;
        tx.commit()
            .await
            .map_err(|e| ModelError::Transaction(format!("Transaction commit failed: {}", e)))
    }

    async fn rollback(&self) -> ModelResult<()> {
        let tx = self.tx.lock().await.take().ok_or_else(finished)?;
        tx.rollback()
            .await
            .map_err(|e| ModelError::Transaction(format!("Transaction rollback failed: {}", e)))
    }
}

enum Target {
    Pool(PgPool),
    Tx(SharedTx),
}

struct PostgresExecutor {
    target: Target,
    statements: StatementBuilder,
}

impl PostgresExecutor {
    fn new(target: Target) -> Self {
        Self {
            target,
            statements: StatementBuilder::new(SqlDialect::PostgreSQL),
        }
    }

    async fn fetch_all(&self, fragment: &SqlFragment) -> ModelResult<Vec<PgRow>> {
        debug!(sql = %fragment.sql, args = fragment.args.len(), "Fetching rows");
        let query = bind_all(sqlx::query(&fragment.sql), &fragment.args);
        let rows = match &self.target {
            Target::Pool(pool) => query.fetch_all(pool).await?,
            Target::Tx(tx) => {
                let mut guard = tx.lock().await;
                let tx = guard.as_mut().ok_or_else(finished)?;
                query.fetch_all(&mut **tx).await?
            }
        };
        Ok(rows)
    }

    async fn execute(&self, fragment: &SqlFragment) -> ModelResult<u64> {
        debug!(sql = %fragment.sql, args = fragment.args.len(), "Executing statement");
        let query = bind_all(sqlx::query(&fragment.sql), &fragment.args);
        let result = match &self.target {
            Target::Pool(pool) => query.execute(pool).await?,
            Target::Tx(tx) => {
                let mut guard = tx.lock().await;
                let tx = guard.as_mut().ok_or_else(finished)?;
                query.execute(&mut **tx).await?
            }
        };
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl Executor for PostgresExecutor {
    async fn insert(&self, metadata: &Metadata, docs: Vec<Document>) -> ModelResult<InsertResult> {
        let pk = metadata.primary_key();
        let returning = pk.map(|f| f.native_name.clone());
        let mut result = InsertResult::default();
        for mut doc in docs {
            // let the column default generate unset auto-increment keys
            if let Some(pk) = pk.filter(|f| f.auto_increment) {
                if doc.get(&pk.native_name).map_or(false, is_unset) {
                    doc.remove(&pk.native_name);
                }
            }
            let fragment = self.statements.insert(metadata, &doc, returning.as_deref());
            let rows = match self.fetch_all(&fragment).await {
                Ok(rows) => rows,
                Err(err) if result.inserted > 0 => {
                    return Err(ModelError::Mutation {
                        affected: result.inserted,
                        message: err.to_string(),
                    })
                }
                Err(err) => return Err(err),
            };
            if returning.is_some() {
                let id = match rows.first() {
                    Some(row) => column_value(row, 0)?,
                    None => Value::Null,
                };
                result.ids.push(id);
            }
            result.inserted += 1;
        }
        Ok(result)
    }

    async fn find(&self, metadata: &Metadata, query: &FindQuery) -> ModelResult<Vec<Document>> {
        let fragment = self.statements.select(metadata, query)?;
        self.fetch_all(&fragment)
            .await?
            .iter()
            .map(row_to_document)
            .collect()
    }

    async fn count(&self, metadata: &Metadata, filter: &Conditional) -> ModelResult<u64> {
        let fragment = self.statements.count(metadata, filter)?;
        let rows = self.fetch_all(&fragment).await?;
        let count: i64 = match rows.first() {
            Some(row) => row.try_get("count")?,
            None => 0,
        };
        Ok(count.max(0) as u64)
    }

    async fn update(
        &self,
        metadata: &Metadata,
        filter: &Conditional,
        set: &Document,
        multi: bool,
    ) -> ModelResult<u64> {
        let fragment = self.statements.update(metadata, filter, set, multi)?;
        self.execute(&fragment).await
    }

    async fn delete(&self, metadata: &Metadata, filter: &Conditional, multi: bool) -> ModelResult<u64> {
        let fragment = self.statements.delete(metadata, filter, multi)?;
        self.execute(&fragment).await
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

fn bind_all<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    args: &[Value],
) -> Query<'q, Postgres, PgArguments> {
    for arg in args {
        query = bind_value(query, arg);
    }
    query
}

/// Bind one JSON argument with the closest native type
fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        // written values inline their nulls; this only reaches filter operands
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => match chrono::DateTime::parse_from_rfc3339(s) {
            Ok(ts) => query.bind(ts.with_timezone(&chrono::Utc)),
            Err(_) => query.bind(s.clone()),
        },
        other => query.bind(other.clone()),
    }
}

fn row_to_document(row: &PgRow) -> ModelResult<Document> {
    let mut doc = Map::new();
    for (i, column) in row.columns().iter().enumerate() {
        doc.insert(column.name().to_string(), column_value(row, i)?);
    }
    Ok(doc)
}

/// Decode a column into JSON by its PostgreSQL type name
fn column_value(row: &PgRow, index: usize) -> ModelResult<Value> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(Value::Null);
    }
    let type_name = row.columns()[index].type_info().name().to_string();
    let value = match type_name.as_str() {
        "BOOL" => Value::from(row.try_get::<bool, _>(index)?),
        "INT2" => Value::from(row.try_get::<i16, _>(index)?),
        "INT4" => Value::from(row.try_get::<i32, _>(index)?),
        "INT8" => Value::from(row.try_get::<i64, _>(index)?),
        "FLOAT4" => Value::from(row.try_get::<f32, _>(index)?),
        "FLOAT8" => Value::from(row.try_get::<f64, _>(index)?),
        "UUID" => Value::from(row.try_get::<uuid::Uuid, _>(index)?.to_string()),
        "TIMESTAMPTZ" => Value::from(
            row.try_get::<chrono::DateTime<chrono::Utc>, _>(index)?
                .to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        ),
        "TIMESTAMP" => Value::from(
            row.try_get::<chrono::NaiveDateTime, _>(index)?
                .and_utc()
                .to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        ),
        "DATE" => Value::from(row.try_get::<chrono::NaiveDate, _>(index)?.to_string()),
        "JSON" | "JSONB" => row.try_get::<Value, _>(index)?,
        _ => Value::from(row.try_get::<String, _>(index).map_err(|e| {
            ModelError::Database(format!(
                "Failed to decode column of type '{}': {}",
                type_name, e
            ))
        })?),
    };
    Ok(value)
}
