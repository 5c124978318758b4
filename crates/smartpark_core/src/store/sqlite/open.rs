//! Keyspace file opening for the SQLite backend.
//!
//! # Responsibility
//! - Map a keyspace onto one database file inside the data directory.
//! - Configure connection pragmas and apply catalog migrations.
//!
//! # Invariants
//! - Returned connections have catalog migrations fully applied.
//! - Returned connections wait up to `BUSY_TIMEOUT` on a locked file.

use super::migrations::apply_migrations;
use crate::store::{checked_identifier, StoreError, StoreResult};
use log::{error, info};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const KEYSPACE_FILE_EXTENSION: &str = "sqlite3";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Returns the database file backing `keyspace`.
pub fn keyspace_path(data_dir: &Path, keyspace: &str) -> StoreResult<PathBuf> {
    let keyspace = checked_identifier(keyspace)?;
    Ok(data_dir.join(format!("{keyspace}.{KEYSPACE_FILE_EXTENSION}")))
}

/// Opens (creating when missing) the database file for `keyspace`.
///
/// # Side effects
/// - Creates `data_dir` when it does not exist.
/// - Emits `store_open` logging events with duration and status.
pub fn open_keyspace(data_dir: &Path, keyspace: &str) -> StoreResult<Connection> {
    let started_at = Instant::now();
    info!("event=store_open module=store status=start keyspace={keyspace}");

    let opened = keyspace_path(data_dir, keyspace).and_then(|path| {
        std::fs::create_dir_all(data_dir).map_err(|err| {
            StoreError::InvalidData(format!(
                "cannot create data directory `{}`: {err}",
                data_dir.display()
            ))
        })?;
        let mut conn = Connection::open(path)?;
        configure_connection(&mut conn)?;
        Ok(conn)
    });

    match opened {
        Ok(conn) => {
            info!(
                "event=store_open module=store status=ok keyspace={} duration_ms={}",
                keyspace,
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=store_open module=store status=error keyspace={} duration_ms={} error={}",
                keyspace,
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn configure_connection(conn: &mut Connection) -> StoreResult<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    apply_migrations(conn)?;
    Ok(())
}
