//! SQLite-backed table store.
//!
//! # Responsibility
//! - Persist each keyspace in its own database file.
//! - Store entity rows as JSON documents keyed by `row_key`.
//! - Run blocking SQLite calls off the async executor.
//!
//! # Invariants
//! - Table and field names are validated identifiers before reaching SQL.
//! - A closed client drops its connection; later calls fail with `Closed`.
//! - Rows are returned in ascending key order.
//! - Writes commit only while their caller is still waiting; a call dropped
//!   by a timeout rolls back instead of landing later.

use super::{
    checked_identifier, key_text, Filter, FindOptions, Record, Statement, StoreClient,
    StoreConnector, StoreError, StoreResult, TableSpec, TableStore, UpdateOptions, UpdateOutcome,
};
use async_trait::async_trait;
use log::debug;
use rusqlite::types::Value as SqlValue;
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Transaction, TransactionBehavior,
};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

pub mod migrations;
mod open;

pub use open::{keyspace_path, open_keyspace};

/// Connector storing keyspaces as files under one data directory.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    data_dir: PathBuf,
}

impl SqliteConnector {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }
}

#[async_trait]
impl StoreConnector for SqliteConnector {
    async fn open(&self, keyspace: &str) -> StoreResult<Arc<dyn StoreClient>> {
        let data_dir = self.data_dir.clone();
        let name = keyspace.to_string();
        let conn = tokio::task::spawn_blocking(move || open_keyspace(&data_dir, &name))
            .await
            .map_err(|err| StoreError::Task(err.to_string()))??;
        Ok(Arc::new(SqliteClient {
            session: Arc::new(Session {
                conn: Mutex::new(Some(conn)),
                keyspace: keyspace.to_string(),
            }),
        }))
    }
}

fn poison_err<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Task("sqlite connection lock poisoned".to_string())
}

/// Set once the future awaiting a blocking call is dropped.
#[derive(Debug, Default)]
struct Abandoned(AtomicBool);

impl Abandoned {
    fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Flags the call abandoned if dropped while still armed.
struct CallerGuard {
    abandoned: Arc<Abandoned>,
    armed: bool,
}

impl Drop for CallerGuard {
    fn drop(&mut self) {
        if self.armed {
            self.abandoned.0.store(true, Ordering::SeqCst);
        }
    }
}

/// Opens a write transaction, taking the write lock up front so lock waits
/// happen before any change is made.
fn begin_write(conn: &mut Connection) -> StoreResult<Transaction<'_>> {
    Ok(conn.transaction_with_behavior(TransactionBehavior::Immediate)?)
}

/// Commits `tx` unless the caller has gone; dropping `tx` rolls it back.
fn commit_if_awaited(
    tx: Transaction<'_>,
    abandoned: &Abandoned,
    operation: &str,
) -> StoreResult<()> {
    if abandoned.is_set() {
        debug!("event=store_write module=store status=abandoned operation={operation}");
        return Err(StoreError::Abandoned {
            operation: operation.to_string(),
        });
    }
    tx.commit()?;
    Ok(())
}

#[derive(Debug)]
struct Session {
    conn: Mutex<Option<Connection>>,
    keyspace: String,
}

impl Session {
    /// Runs `work` on the blocking pool with exclusive connection access.
    ///
    /// Dropping the returned future does not stop the blocking task; it sets
    /// the flag handed to `work`, which writes check before committing.
    async fn run<T, F>(self: &Arc<Self>, work: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, &Abandoned) -> StoreResult<T> + Send + 'static,
    {
        let abandoned = Arc::new(Abandoned::default());
        let mut caller = CallerGuard {
            abandoned: Arc::clone(&abandoned),
            armed: true,
        };
        let session = Arc::clone(self);
        let joined = tokio::task::spawn_blocking(move || {
            let mut guard = session.conn.lock().map_err(poison_err)?;
            let conn = guard.as_mut().ok_or(StoreError::Closed)?;
            work(conn, &abandoned)
        })
        .await;
        caller.armed = false;
        joined.map_err(|err| StoreError::Task(err.to_string()))?
    }
}

#[derive(Debug)]
struct SqliteClient {
    session: Arc<Session>,
}

#[async_trait]
impl StoreClient for SqliteClient {
    async fn load_table(&self, spec: &TableSpec) -> StoreResult<Arc<dyn TableStore>> {
        let name = checked_identifier(&spec.name)?.to_string();
        checked_identifier(&spec.key)?;
        self.session
            .run(move |conn, _| {
                conn.execute_batch(&format!(
                    "CREATE TABLE IF NOT EXISTS \"{name}\" (
                        row_key TEXT PRIMARY KEY NOT NULL,
                        body TEXT NOT NULL,
                        created_at INTEGER NOT NULL
                            DEFAULT (CAST(strftime('%s', 'now') AS INTEGER) * 1000)
                    );"
                ))?;
                Ok(())
            })
            .await?;
        Ok(Arc::new(SqliteTable {
            session: self.session.clone(),
            spec: spec.clone(),
        }))
    }

    async fn close(&self) -> StoreResult<()> {
        let session = Arc::clone(&self.session);
        let keyspace = session.keyspace.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = session.conn.lock().map_err(poison_err)?;
            match guard.take() {
                Some(conn) => conn.close().map_err(|(_, err)| StoreError::Sqlite(err)),
                None => Ok(()),
            }
        })
        .await
        .map_err(|err| StoreError::Task(err.to_string()))??;
        debug!("event=store_close module=store status=ok keyspace={keyspace}");
        Ok(())
    }
}

#[derive(Debug)]
struct SqliteTable {
    session: Arc<Session>,
    spec: TableSpec,
}

/// Builds a `WHERE` clause and its bind values for `filter`.
fn where_clause(spec: &TableSpec, filter: &Filter) -> StoreResult<(String, Vec<SqlValue>)> {
    let mut conditions = Vec::new();
    let mut binds = Vec::new();
    for (field, expected) in &filter.eq {
        if *field == spec.key {
            let key = key_text(expected).ok_or_else(|| {
                StoreError::InvalidData(format!("unusable key value {expected} for `{field}`"))
            })?;
            conditions.push("row_key = ?".to_string());
            binds.push(SqlValue::Text(key));
            continue;
        }

        let field = checked_identifier(field)?;
        let extracted = format!("json_extract(body, '$.{field}')");
        match expected {
            Value::Null => conditions.push(format!("{extracted} IS NULL")),
            Value::Bool(flag) => {
                conditions.push(format!("{extracted} = ?"));
                binds.push(SqlValue::Integer(i64::from(*flag)));
            }
            Value::Number(number) => {
                conditions.push(format!("{extracted} = ?"));
                binds.push(match number.as_i64() {
                    Some(int) => SqlValue::Integer(int),
                    None => SqlValue::Real(number.as_f64().unwrap_or_default()),
                });
            }
            Value::String(text) => {
                conditions.push(format!("{extracted} = ?"));
                binds.push(SqlValue::Text(text.clone()));
            }
            Value::Array(_) | Value::Object(_) => {
                return Err(StoreError::InvalidData(format!(
                    "cannot filter on composite value of `{field}`"
                )));
            }
        }
    }

    if conditions.is_empty() {
        Ok(("1 = 1".to_string(), binds))
    } else {
        Ok((conditions.join(" AND "), binds))
    }
}

fn parse_body(body: &str) -> StoreResult<Record> {
    match serde_json::from_str::<Value>(body)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::InvalidData(format!(
            "row body is not an object: {other}"
        ))),
    }
}

fn select_rows(
    conn: &Connection,
    spec: &TableSpec,
    filter: &Filter,
) -> StoreResult<Vec<Record>> {
    let (clause, mut binds) = where_clause(spec, filter)?;
    let mut sql = format!(
        "SELECT body FROM \"{}\" WHERE {clause} ORDER BY row_key ASC",
        spec.name
    );
    if let Some(limit) = filter.limit {
        sql.push_str(" LIMIT ?");
        binds.push(SqlValue::Integer(i64::from(limit)));
        if filter.skip > 0 {
            sql.push_str(" OFFSET ?");
            binds.push(SqlValue::Integer(i64::from(filter.skip)));
        }
    } else if filter.skip > 0 {
        sql.push_str(" LIMIT -1 OFFSET ?");
        binds.push(SqlValue::Integer(i64::from(filter.skip)));
    }

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(binds))?;
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        let body: String = row.get(0)?;
        records.push(parse_body(&body)?);
    }
    Ok(records)
}

#[async_trait]
impl TableStore for SqliteTable {
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
        let spec = self.spec.clone();
        let filter = filter.clone();
        self.session
            .run(move |conn, _| select_rows(conn, &spec, &filter))
            .await
    }

    async fn find_one(&self, filter: &Filter) -> StoreResult<Option<Record>> {
        let spec = self.spec.clone();
        let filter = filter.clone().with_limit(1);
        self.session
            .run(move |conn, _| Ok(select_rows(conn, &spec, &filter)?.into_iter().next()))
            .await
    }

    async fn save(&self, record: Record) -> StoreResult<Record> {
        let key = self.spec.key_of(&record)?;
        let body = serde_json::to_string(&record)?;
        let table = self.spec.name.clone();
        self.session
            .run(move |conn, abandoned| {
                let tx = begin_write(conn)?;
                tx.execute(
                    &format!(
                        "INSERT INTO \"{table}\" (row_key, body) VALUES (?1, ?2)
                         ON CONFLICT(row_key) DO UPDATE SET body = excluded.body;"
                    ),
                    params![key, body],
                )?;
                commit_if_awaited(tx, abandoned, &format!("{table}.save"))?;
                Ok(record)
            })
            .await
    }

    async fn update(
        &self,
        key: &str,
        patch: Record,
        options: UpdateOptions,
    ) -> StoreResult<UpdateOutcome> {
        let spec = self.spec.clone();
        let key = key.to_string();
        self.session
            .run(move |conn, abandoned| {
                let tx = begin_write(conn)?;
                let existing: Option<String> = tx
                    .query_row(
                        &format!("SELECT body FROM \"{}\" WHERE row_key = ?1;", spec.name),
                        [&key],
                        |row| row.get(0),
                    )
                    .optional()?;

                let merged = match existing {
                    Some(body) => {
                        let mut row = parse_body(&body)?;
                        row.extend(patch);
                        row
                    }
                    None if options.if_exists => return Ok(UpdateOutcome { applied: false }),
                    None => {
                        let mut row = patch;
                        row.insert(spec.key.clone(), Value::String(key.clone()));
                        row
                    }
                };

                tx.execute(
                    &format!(
                        "INSERT INTO \"{}\" (row_key, body) VALUES (?1, ?2)
                         ON CONFLICT(row_key) DO UPDATE SET body = excluded.body;",
                        spec.name
                    ),
                    params![key, serde_json::to_string(&merged)?],
                )?;
                commit_if_awaited(tx, abandoned, &format!("{}.update", spec.name))?;
                Ok(UpdateOutcome { applied: true })
            })
            .await
    }

    async fn delete(&self, filter: &Filter) -> StoreResult<()> {
        let spec = self.spec.clone();
        let filter = filter.clone();
        self.session
            .run(move |conn, abandoned| {
                let (clause, binds) = where_clause(&spec, &filter)?;
                let tx = begin_write(conn)?;
                tx.execute(
                    &format!("DELETE FROM \"{}\" WHERE {clause};", spec.name),
                    params_from_iter(binds),
                )?;
                commit_if_awaited(tx, abandoned, &format!("{}.delete", spec.name))
            })
            .await
    }

    async fn execute(&self, statement: &Statement) -> StoreResult<Vec<Record>> {
        let spec = self.spec.clone();
        let statement = statement.clone();
        self.session
            .run(move |conn, abandoned| match statement {
                Statement::CreateType(declaration) => {
                    checked_identifier(&declaration.name)?;
                    let tx = begin_write(conn)?;
                    tx.execute(
                        "INSERT INTO structured_types (name, fields) VALUES (?1, ?2)
                         ON CONFLICT(name) DO NOTHING;",
                        params![
                            declaration.name,
                            serde_json::to_string(&declaration.fields)?
                        ],
                    )?;
                    commit_if_awaited(tx, abandoned, &format!("type {}", declaration.name))?;
                    Ok(Vec::new())
                }
                Statement::Count(filter) => {
                    let (clause, binds) = where_clause(&spec, &filter.unpaged())?;
                    let count: i64 = conn.query_row(
                        &format!("SELECT COUNT(*) FROM \"{}\" WHERE {clause};", spec.name),
                        params_from_iter(binds),
                        |row| row.get(0),
                    )?;
                    let mut row = Record::new();
                    row.insert("count".to_string(), Value::from(count));
                    Ok(vec![row])
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn abandoned_write_is_rolled_back() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (v INTEGER);").unwrap();
        let abandoned = Abandoned::default();
        abandoned.0.store(true, Ordering::SeqCst);

        let tx = begin_write(&mut conn).unwrap();
        tx.execute("INSERT INTO t (v) VALUES (1);", []).unwrap();
        let err = commit_if_awaited(tx, &abandoned, "t.save").unwrap_err();
        assert!(matches!(err, StoreError::Abandoned { .. }));

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM t;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[tokio::test]
    async fn dropping_the_call_flags_the_blocking_work() {
        let session = Arc::new(Session {
            conn: Mutex::new(Some(Connection::open_in_memory().unwrap())),
            keyspace: "ks".to_string(),
        });
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (seen_tx, seen_rx) = mpsc::channel();
        let call = session.run(move |_, abandoned| {
            release_rx.recv().ok();
            seen_tx.send(abandoned.is_set()).ok();
            Ok(())
        });

        assert!(tokio::time::timeout(Duration::from_millis(20), call)
            .await
            .is_err());
        release_tx.send(()).unwrap();
        assert!(seen_rx.recv_timeout(Duration::from_secs(5)).unwrap());

        let finished = session.run(|_, abandoned| Ok(abandoned.is_set())).await;
        assert!(!finished.unwrap());
    }

    #[test]
    fn where_clause_routes_key_and_json_fields() {
        let spec = TableSpec::new("garage", "id");
        let filter = Filter::by("id", "a").and("online", true).and("capacity_total", 3);
        let (clause, binds) = where_clause(&spec, &filter).unwrap();
        assert_eq!(
            clause,
            "json_extract(body, '$.capacity_total') = ? \
             AND row_key = ? \
             AND json_extract(body, '$.online') = ?"
        );
        assert_eq!(
            binds,
            vec![
                SqlValue::Integer(3),
                SqlValue::Text("a".to_string()),
                SqlValue::Integer(1)
            ]
        );
    }

    #[test]
    fn where_clause_rejects_unsafe_fields() {
        let spec = TableSpec::new("garage", "id");
        let filter = Filter::by("x') OR 1=1 --", "a");
        assert!(matches!(
            where_clause(&spec, &filter),
            Err(StoreError::InvalidIdentifier(_))
        ));
        let composite = Filter::by("address", json!({"city": "Boston"}));
        assert!(where_clause(&spec, &composite).is_err());
    }
}
