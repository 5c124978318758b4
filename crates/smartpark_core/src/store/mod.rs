//! Table store contract shared by all storage backends.
//!
//! # Responsibility
//! - Define the per-table `TableStore` capability and the client/connector
//!   handles used to obtain it.
//! - Define records, filters, typed statements and store errors.
//!
//! # Invariants
//! - Every table names one key field; a record's key is the string form of
//!   that field.
//! - Filtering on a non-key field is rejected unless explicitly allowed.
//! - Every call reports either a result or a descriptive `StoreError`.
//!
//! # See also
//! - `db::bootstrap` for how clients and tables are opened.

use crate::db::schema::StructuredType;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub mod memory;
pub mod sqlite;

pub use memory::{InMemoryConnector, StoreOp};
pub use sqlite::SqliteConnector;

/// One stored row: a JSON object keyed by field name.
pub type Record = serde_json::Map<String, Value>;

pub type StoreResult<T> = Result<T, StoreError>;

/// Storage-layer error.
#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    Serialization(serde_json::Error),
    /// A round-trip did not finish within the configured bound.
    Timeout { operation: String, after: Duration },
    /// The client owning this handle has been closed.
    Closed,
    UnknownTable(String),
    /// Filtering on a non-key field without `allow_filtering`.
    FilteringRequired { table: String, field: String },
    InvalidIdentifier(String),
    InvalidData(String),
    /// Backend catalog was written by a newer build.
    UnsupportedCatalogVersion {
        db_version: u32,
        latest_supported: u32,
    },
    /// A blocking storage task panicked or was cancelled.
    Task(String),
    /// The caller stopped waiting, so the write was rolled back.
    Abandoned { operation: String },
    /// Failure injected by the in-memory backend.
    Injected(String),
}

impl StoreError {
    /// Returns whether retrying the same call may succeed.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Serialization(err) => write!(f, "record serialization failed: {err}"),
            Self::Timeout { operation, after } => write!(
                f,
                "store operation `{operation}` timed out after {}ms",
                after.as_millis()
            ),
            Self::Closed => write!(f, "store client is closed"),
            Self::UnknownTable(name) => write!(f, "table `{name}` is not bound"),
            Self::FilteringRequired { table, field } => write!(
                f,
                "filtering `{table}` on non-key field `{field}` requires allow_filtering"
            ),
            Self::InvalidIdentifier(value) => write!(f, "invalid store identifier `{value}`"),
            Self::InvalidData(message) => write!(f, "invalid stored data: {message}"),
            Self::UnsupportedCatalogVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "store catalog version {db_version} is newer than supported {latest_supported}"
            ),
            Self::Task(message) => write!(f, "storage task failed: {message}"),
            Self::Abandoned { operation } => {
                write!(f, "store write `{operation}` rolled back after its caller gave up")
            }
            Self::Injected(message) => write!(f, "injected failure: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}

/// Table name plus the field holding each row's unique key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableSpec {
    pub name: String,
    pub key: String,
}

impl TableSpec {
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
        }
    }

    /// Extracts the row key from `record`.
    pub fn key_of(&self, record: &Record) -> StoreResult<String> {
        record
            .get(&self.key)
            .and_then(key_text)
            .ok_or_else(|| {
                StoreError::InvalidData(format!(
                    "record for `{}` has no usable `{}` key",
                    self.name, self.key
                ))
            })
    }
}

/// Normalizes a scalar JSON value into key text.
pub(crate) fn key_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Equality filter with row limit and offset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub eq: BTreeMap<String, Value>,
    pub limit: Option<u32>,
    pub skip: u32,
}

impl Filter {
    /// Matches every row.
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches rows whose `field` equals `value`.
    pub fn by(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and(field, value)
    }

    pub fn and(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.eq.insert(field.into(), value.into());
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_skip(mut self, skip: u32) -> Self {
        self.skip = skip;
        self
    }

    /// Returns the same equality conditions without paging.
    pub fn unpaged(&self) -> Self {
        Self {
            eq: self.eq.clone(),
            limit: None,
            skip: 0,
        }
    }

    /// Returns the first non-key field, if any.
    pub fn non_key_field<'a>(&'a self, table: &TableSpec) -> Option<&'a str> {
        self.eq
            .keys()
            .map(String::as_str)
            .find(|field| *field != table.key)
    }

    /// Returns whether `record` satisfies every equality condition.
    pub fn matches(&self, table: &TableSpec, record: &Record) -> bool {
        self.eq.iter().all(|(field, expected)| {
            if *field == table.key {
                return record.get(field).and_then(key_text) == key_text(expected);
            }
            record.get(field).unwrap_or(&Value::Null) == expected
        })
    }
}

impl Display for Filter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let conditions = self
            .eq
            .iter()
            .map(|(field, value)| format!("{field}={value}"))
            .collect::<Vec<_>>();
        if conditions.is_empty() {
            write!(f, "*")?;
        } else {
            write!(f, "{}", conditions.join(","))?;
        }
        if let Some(limit) = self.limit {
            write!(f, " limit={limit}")?;
        }
        if self.skip > 0 {
            write!(f, " skip={}", self.skip)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FindOptions {
    pub allow_filtering: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Only apply the patch when the row already exists.
    pub if_exists: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// False when `if_exists` was set and no row matched.
    pub applied: bool,
}

/// Typed statement accepted by `TableStore::execute`.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Declares a structured type if it does not exist yet.
    CreateType(StructuredType),
    /// Counts rows matching the filter; yields one `{count}` row.
    Count(Filter),
}

impl Display for Statement {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreateType(declaration) => write!(f, "{declaration}"),
            Self::Count(filter) => write!(f, "SELECT COUNT(*) WHERE {filter}"),
        }
    }
}

/// Reads the `count` column from a `Statement::Count` result.
pub fn count_from_rows(rows: &[Record]) -> StoreResult<u64> {
    rows.first()
        .and_then(|row| row.get("count"))
        .and_then(Value::as_u64)
        .ok_or_else(|| StoreError::InvalidData("count statement returned no count".to_string()))
}

/// Per-table store handle.
#[async_trait]
pub trait TableStore: Send + Sync {
    fn spec(&self) -> &TableSpec;
    async fn find(&self, filter: &Filter, options: FindOptions) -> StoreResult<Vec<Record>>;
    async fn find_one(&self, filter: &Filter) -> StoreResult<Option<Record>>;
    /// Inserts or replaces the row identified by the record's key.
    async fn save(&self, record: Record) -> StoreResult<Record>;
    async fn update(
        &self,
        key: &str,
        patch: Record,
        options: UpdateOptions,
    ) -> StoreResult<UpdateOutcome>;
    async fn delete(&self, filter: &Filter) -> StoreResult<()>;
    async fn execute(&self, statement: &Statement) -> StoreResult<Vec<Record>>;
}

/// Open session against one keyspace.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Returns a handle to `spec`, creating the table when missing.
    async fn load_table(&self, spec: &TableSpec) -> StoreResult<Arc<dyn TableStore>>;
    /// Releases the session; handles it produced fail with `Closed` afterwards.
    async fn close(&self) -> StoreResult<()>;
}

/// Factory for store sessions.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn open(&self, keyspace: &str) -> StoreResult<Arc<dyn StoreClient>>;
}

/// Live handle set mapping table names to stores.
#[derive(Clone)]
pub struct Binding {
    client: Arc<dyn StoreClient>,
    tables: BTreeMap<String, Arc<dyn TableStore>>,
}

impl Binding {
    pub fn new(
        client: Arc<dyn StoreClient>,
        tables: BTreeMap<String, Arc<dyn TableStore>>,
    ) -> Self {
        Self { client, tables }
    }

    pub fn table(&self, name: &str) -> StoreResult<Arc<dyn TableStore>> {
        self.tables
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::UnknownTable(name.to_string()))
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub async fn close(&self) -> StoreResult<()> {
        self.client.close().await
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("tables", &self.table_names())
            .finish()
    }
}

/// Runs one store round-trip under `limit`.
pub async fn with_deadline<T>(
    limit: Duration,
    operation: &str,
    call: impl Future<Output = StoreResult<T>>,
) -> StoreResult<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout {
            operation: operation.to_string(),
            after: limit,
        }),
    }
}

/// Checks that `value` is safe to splice into DDL.
pub(crate) fn checked_identifier(value: &str) -> StoreResult<&str> {
    if crate::config::is_identifier(value) {
        Ok(value)
    } else {
        Err(StoreError::InvalidIdentifier(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn key_of_accepts_string_and_number_keys() {
        let garage = TableSpec::new("garage", "id");
        assert_eq!(garage.key_of(&record(json!({"id": "abc"}))).unwrap(), "abc");

        let version = TableSpec::new("version", "change");
        assert_eq!(version.key_of(&record(json!({"change": 1}))).unwrap(), "1");
        assert!(version.key_of(&record(json!({"other": 1}))).is_err());
    }

    #[test]
    fn filter_matches_key_and_fields() {
        let table = TableSpec::new("garage", "id");
        let row = record(json!({"id": "a", "online": true}));
        assert!(Filter::all().matches(&table, &row));
        assert!(Filter::by("id", "a").matches(&table, &row));
        assert!(Filter::by("id", "a").and("online", true).matches(&table, &row));
        assert!(!Filter::by("online", false).matches(&table, &row));
        assert_eq!(Filter::by("online", true).non_key_field(&table), Some("online"));
        assert_eq!(Filter::by("id", "a").non_key_field(&table), None);
    }

    #[test]
    fn unpaged_drops_limit_and_skip() {
        let paged = Filter::by("id", "a").with_limit(5).with_skip(10);
        let unpaged = paged.unpaged();
        assert_eq!(unpaged.limit, None);
        assert_eq!(unpaged.skip, 0);
        assert_eq!(unpaged.eq, paged.eq);
    }

    #[tokio::test]
    async fn with_deadline_reports_timeout() {
        let err = with_deadline(Duration::from_millis(5), "find", async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("find"));
    }
}
