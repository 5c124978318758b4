//! In-memory store backend with operation tracing.
//!
//! Keyspaces live for the lifetime of the connector, so a keyspace stays
//! bootstrapped across clients exactly like a real store node would. Every
//! successful call is recorded as a [`StoreOp`] for test assertions, and
//! failures or latency can be injected.
//!
//! ## Limitations
//!
//! - **Single-process only**: nothing is persisted.

use super::{
    Filter, FindOptions, Record, Statement, StoreClient, StoreConnector, StoreError,
    StoreResult, TableSpec, TableStore, UpdateOptions, UpdateOutcome,
};
use crate::db::schema::StructuredType;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Record of one store call.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    Open {
        keyspace: String,
    },
    LoadTable {
        table: String,
    },
    Find {
        table: String,
        filter: Filter,
    },
    FindOne {
        table: String,
        filter: Filter,
    },
    Save {
        table: String,
        record: Record,
    },
    Update {
        table: String,
        key: String,
        patch: Record,
        if_exists: bool,
    },
    Delete {
        table: String,
        filter: Filter,
    },
    Execute {
        table: String,
        statement: String,
    },
    Close {
        keyspace: String,
    },
}

impl StoreOp {
    /// Returns whether this call mutated table rows.
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Save { .. } | Self::Update { .. } | Self::Delete { .. })
    }

    /// One-line form matched by injected failures, e.g. `garage.save`.
    pub fn describe(&self) -> String {
        match self {
            Self::Open { keyspace } => format!("open {keyspace}"),
            Self::Close { keyspace } => format!("close {keyspace}"),
            Self::LoadTable { table } => format!("{table}.load"),
            Self::Find { table, filter } => format!("{table}.find {filter}"),
            Self::FindOne { table, filter } => format!("{table}.find_one {filter}"),
            Self::Save { table, .. } => format!("{table}.save"),
            Self::Update { table, key, .. } => format!("{table}.update {key}"),
            Self::Delete { table, filter } => format!("{table}.delete {filter}"),
            Self::Execute { table, statement } => format!("{table}.execute {statement}"),
        }
    }
}

#[derive(Debug, Default)]
struct KeyspaceState {
    tables: HashMap<String, BTreeMap<String, Record>>,
    types: Vec<StructuredType>,
}

#[derive(Debug, Default)]
struct Shared {
    keyspaces: Mutex<HashMap<String, KeyspaceState>>,
    operations: Mutex<Vec<StoreOp>>,
    fail_patterns: Mutex<Vec<String>>,
}

fn poison_err<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Task("memory store lock poisoned".to_string())
}

impl Shared {
    fn keyspaces(&self) -> StoreResult<MutexGuard<'_, HashMap<String, KeyspaceState>>> {
        self.keyspaces.lock().map_err(poison_err)
    }

    /// Fails the call if an injected pattern matches, otherwise records it.
    fn admit(&self, op: StoreOp) -> StoreResult<()> {
        let described = op.describe();
        let patterns = self.fail_patterns.lock().map_err(poison_err)?;
        if let Some(pattern) = patterns.iter().find(|p| described.contains(p.as_str())) {
            return Err(StoreError::Injected(format!("{described} (matched `{pattern}`)")));
        }
        drop(patterns);
        self.operations.lock().map_err(poison_err)?.push(op);
        Ok(())
    }
}

/// Connector over process-local keyspaces.
#[derive(Debug, Clone, Default)]
pub struct InMemoryConnector {
    shared: Arc<Shared>,
    latency: Option<Duration>,
}

impl InMemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a connector whose every call sleeps `latency` first.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Returns all recorded operations.
    pub fn operations(&self) -> Vec<StoreOp> {
        self.shared
            .operations
            .lock()
            .map(|ops| ops.clone())
            .unwrap_or_default()
    }

    pub fn clear_operations(&self) {
        if let Ok(mut ops) = self.shared.operations.lock() {
            ops.clear();
        }
    }

    /// Fails every call whose description contains `pattern`.
    pub fn inject_failure(&self, pattern: impl Into<String>) {
        if let Ok(mut patterns) = self.shared.fail_patterns.lock() {
            patterns.push(pattern.into());
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut patterns) = self.shared.fail_patterns.lock() {
            patterns.clear();
        }
    }

    /// Returns the rows of `table` in key order.
    pub fn rows(&self, keyspace: &str, table: &str) -> Vec<Record> {
        self.shared
            .keyspaces
            .lock()
            .ok()
            .and_then(|keyspaces| {
                keyspaces
                    .get(keyspace)
                    .and_then(|state| state.tables.get(table))
                    .map(|rows| rows.values().cloned().collect())
            })
            .unwrap_or_default()
    }

    /// Returns declared structured type names in declaration order.
    pub fn structured_types(&self, keyspace: &str) -> Vec<String> {
        self.shared
            .keyspaces
            .lock()
            .ok()
            .and_then(|keyspaces| {
                keyspaces
                    .get(keyspace)
                    .map(|state| state.types.iter().map(|t| t.name.clone()).collect())
            })
            .unwrap_or_default()
    }

    async fn maybe_delay(latency: Option<Duration>) {
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl StoreConnector for InMemoryConnector {
    async fn open(&self, keyspace: &str) -> StoreResult<Arc<dyn StoreClient>> {
        Self::maybe_delay(self.latency).await;
        self.shared.admit(StoreOp::Open {
            keyspace: keyspace.to_string(),
        })?;
        self.shared
            .keyspaces()?
            .entry(keyspace.to_string())
            .or_default();
        Ok(Arc::new(MemoryClient {
            session: Arc::new(Session {
                shared: self.shared.clone(),
                keyspace: keyspace.to_string(),
                latency: self.latency,
                closed: AtomicBool::new(false),
            }),
        }))
    }
}

#[derive(Debug)]
struct Session {
    shared: Arc<Shared>,
    keyspace: String,
    latency: Option<Duration>,
    closed: AtomicBool,
}

impl Session {
    async fn enter(&self, op: StoreOp) -> StoreResult<()> {
        InMemoryConnector::maybe_delay(self.latency).await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        self.shared.admit(op)
    }

    fn with_table<T>(
        &self,
        table: &str,
        apply: impl FnOnce(
            &mut BTreeMap<String, Record>,
            &mut Vec<StructuredType>,
        ) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut keyspaces = self.shared.keyspaces()?;
        let state = keyspaces.entry(self.keyspace.clone()).or_default();
        let rows = state
            .tables
            .get_mut(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;
        apply(rows, &mut state.types)
    }
}

#[derive(Debug)]
struct MemoryClient {
    session: Arc<Session>,
}

#[async_trait]
impl StoreClient for MemoryClient {
    async fn load_table(&self, spec: &TableSpec) -> StoreResult<Arc<dyn TableStore>> {
        super::checked_identifier(&spec.name)?;
        self.session
            .enter(StoreOp::LoadTable {
                table: spec.name.clone(),
            })
            .await?;
        self.session
            .shared
            .keyspaces()?
            .entry(self.session.keyspace.clone())
            .or_default()
            .tables
            .entry(spec.name.clone())
            .or_default();
        Ok(Arc::new(MemoryTable {
            session: self.session.clone(),
            spec: spec.clone(),
        }))
    }

    async fn close(&self) -> StoreResult<()> {
        if self.session.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.session.shared.admit(StoreOp::Close {
            keyspace: self.session.keyspace.clone(),
        })
    }
}

#[derive(Debug)]
struct MemoryTable {
    session: Arc<Session>,
    spec: TableSpec,
}

impl MemoryTable {
    fn select(&self, rows: &BTreeMap<String, Record>, filter: &Filter) -> Vec<Record> {
        let matching = rows
            .values()
            .filter(|row| filter.matches(&self.spec, row))
            .skip(filter.skip as usize);
        match filter.limit {
            Some(limit) => matching.take(limit as usize).cloned().collect(),
            None => matching.cloned().collect(),
        }
    }
}

#[async_trait]
impl TableStore for MemoryTable {
    fn spec(&self) -> &TableSpec {
        &self.spec
    }

    async fn find(&self, filter: &Filter, options: FindOptions) -> StoreResult<Vec<Record>> {
        if let (false, Some(field)) = (options.allow_filtering, filter.non_key_field(&self.spec)) {
            return Err(StoreError::FilteringRequired {
                table: self.spec.name.clone(),
                field: field.to_string(),
            });
        }
        self.session
            .enter(StoreOp::Find {
                table: self.spec.name.clone(),
                filter: filter.clone(),
            })
            .await?;
        self.session
            .with_table(&self.spec.name, |rows, _| Ok(self.select(rows, filter)))
    }

    async fn find_one(&self, filter: &Filter) -> StoreResult<Option<Record>> {
        self.session
            .enter(StoreOp::FindOne {
                table: self.spec.name.clone(),
                filter: filter.clone(),
            })
            .await?;
        let single = filter.clone().with_limit(1);
        self.session.with_table(&self.spec.name, |rows, _| {
            Ok(self.select(rows, &single).into_iter().next())
        })
    }

    async fn save(&self, record: Record) -> StoreResult<Record> {
        let key = self.spec.key_of(&record)?;
        self.session
            .enter(StoreOp::Save {
                table: self.spec.name.clone(),
                record: record.clone(),
            })
            .await?;
        self.session.with_table(&self.spec.name, |rows, _| {
            rows.insert(key, record.clone());
            Ok(record)
        })
    }

    async fn update(
        &self,
        key: &str,
        patch: Record,
        options: UpdateOptions,
    ) -> StoreResult<UpdateOutcome> {
        self.session
            .enter(StoreOp::Update {
                table: self.spec.name.clone(),
                key: key.to_string(),
                patch: patch.clone(),
                if_exists: options.if_exists,
            })
            .await?;
        let key_field = self.spec.key.clone();
        self.session.with_table(&self.spec.name, |rows, _| {
            match rows.get_mut(key) {
                Some(row) => row.extend(patch),
                None if options.if_exists => return Ok(UpdateOutcome { applied: false }),
                None => {
                    let mut row = patch;
                    row.insert(key_field, Value::String(key.to_string()));
                    rows.insert(key.to_string(), row);
                }
            }
            Ok(UpdateOutcome { applied: true })
        })
    }

    async fn delete(&self, filter: &Filter) -> StoreResult<()> {
        self.session
            .enter(StoreOp::Delete {
                table: self.spec.name.clone(),
                filter: filter.clone(),
            })
            .await?;
        self.session.with_table(&self.spec.name, |rows, _| {
            rows.retain(|_, row| !filter.matches(&self.spec, row));
            Ok(())
        })
    }

    async fn execute(&self, statement: &Statement) -> StoreResult<Vec<Record>> {
        self.session
            .enter(StoreOp::Execute {
                table: self.spec.name.clone(),
                statement: statement.to_string(),
            })
            .await?;
        self.session
            .with_table(&self.spec.name, |rows, types| match statement {
                Statement::CreateType(declaration) => {
                    if !types.iter().any(|known| known.name == declaration.name) {
                        types.push(declaration.clone());
                    }
                    Ok(Vec::new())
                }
                Statement::Count(filter) => {
                    let count = rows
                        .values()
                        .filter(|row| filter.matches(&self.spec, row))
                        .count();
                    let mut row = Record::new();
                    row.insert("count".to_string(), json!(count));
                    Ok(vec![row])
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn garage_spec() -> TableSpec {
        TableSpec::new("garage", "id")
    }

    fn row(id: &str, city: &str) -> Record {
        json!({"id": id, "city": city}).as_object().cloned().unwrap()
    }

    async fn open_table(connector: &InMemoryConnector) -> Arc<dyn TableStore> {
        let client = connector.open("test").await.unwrap();
        client.load_table(&garage_spec()).await.unwrap()
    }

    #[tokio::test]
    async fn save_find_and_page_in_key_order() {
        let connector = InMemoryConnector::new();
        let table = open_table(&connector).await;
        for id in ["c", "a", "b"] {
            table.save(row(id, "Boston")).await.unwrap();
        }

        let page = table
            .find(&Filter::all().with_limit(2).with_skip(1), FindOptions::default())
            .await
            .unwrap();
        let ids = page.iter().map(|r| r["id"].clone()).collect::<Vec<_>>();
        assert_eq!(ids, vec![json!("b"), json!("c")]);
    }

    #[tokio::test]
    async fn non_key_filter_requires_allow_filtering() {
        let connector = InMemoryConnector::new();
        let table = open_table(&connector).await;
        table.save(row("a", "Boston")).await.unwrap();

        let err = table
            .find(&Filter::by("city", "Boston"), FindOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::FilteringRequired { .. }));

        let found = table
            .find(
                &Filter::by("city", "Boston"),
                FindOptions {
                    allow_filtering: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn conditional_update_skips_missing_rows() {
        let connector = InMemoryConnector::new();
        let table = open_table(&connector).await;
        table.save(row("a", "Boston")).await.unwrap();

        let patch = json!({"city": "Cambridge"}).as_object().cloned().unwrap();
        let applied = table
            .update("a", patch.clone(), UpdateOptions { if_exists: true })
            .await
            .unwrap();
        assert!(applied.applied);
        let missing = table
            .update("zz", patch, UpdateOptions { if_exists: true })
            .await
            .unwrap();
        assert!(!missing.applied);

        let rows = connector.rows("test", "garage");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["city"], json!("Cambridge"));
    }

    #[tokio::test]
    async fn count_statement_ignores_paging() {
        let connector = InMemoryConnector::new();
        let table = open_table(&connector).await;
        for id in ["a", "b", "c"] {
            table.save(row(id, "Boston")).await.unwrap();
        }
        let rows = table
            .execute(&Statement::Count(Filter::all().with_limit(1)))
            .await
            .unwrap();
        assert_eq!(super::super::count_from_rows(&rows).unwrap(), 3);
    }

    #[tokio::test]
    async fn injected_failures_are_not_recorded() {
        let connector = InMemoryConnector::new();
        let table = open_table(&connector).await;
        connector.inject_failure("garage.save");

        let err = table.save(row("a", "Boston")).await.unwrap_err();
        assert!(matches!(err, StoreError::Injected(_)));
        assert!(!connector.operations().iter().any(StoreOp::is_write));
    }

    #[tokio::test]
    async fn closed_client_rejects_calls() {
        let connector = InMemoryConnector::new();
        let client = connector.open("test").await.unwrap();
        let table = client.load_table(&garage_spec()).await.unwrap();
        client.close().await.unwrap();

        let err = table.find_one(&Filter::by("id", "a")).await.unwrap_err();
        assert!(matches!(err, StoreError::Closed));
    }
}
