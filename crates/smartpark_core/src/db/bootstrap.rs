//! Connection bootstrapper.
//!
//! # Responsibility
//! - Check the keyspace's schema-version marker.
//! - Declare structured types and write the marker on a fresh keyspace.
//! - Open the long-lived binding used by entity services.
//!
//! # Invariants
//! - Phases run strictly in order: version check, type load, open.
//! - Type declarations run one at a time in declared order; the first
//!   failure stops the rest and no marker is written.
//! - The marker is written at most once per fresh keyspace.
//! - Every store round-trip is bounded by the configured request timeout.

use super::schema::{KeyspaceSchema, SchemaVersionMarker};
use super::{BootstrapPhase, ConnectError, ConnectResult};
use crate::config::StoreConfig;
use crate::store::{
    with_deadline, Binding, Filter, FindOptions, Statement, StoreClient, StoreConnector,
    StoreError, TableStore,
};
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Brings a keyspace to a ready `Binding`.
#[derive(Clone)]
pub struct ConnectionBootstrapper {
    connector: Arc<dyn StoreConnector>,
    schema: KeyspaceSchema,
}

fn connection_failure(phase: BootstrapPhase) -> impl FnOnce(StoreError) -> ConnectError {
    move |source| ConnectError::Connection { phase, source }
}

/// Write failures are bootstrap errors unless the store simply timed out.
fn bootstrap_failure(phase: BootstrapPhase) -> impl FnOnce(StoreError) -> ConnectError {
    move |source| {
        if source.is_timeout() {
            ConnectError::Connection { phase, source }
        } else {
            ConnectError::Bootstrap { phase, source }
        }
    }
}

impl ConnectionBootstrapper {
    pub fn new(connector: Arc<dyn StoreConnector>, schema: KeyspaceSchema) -> Self {
        Self { connector, schema }
    }

    pub fn connector(&self) -> Arc<dyn StoreConnector> {
        Arc::clone(&self.connector)
    }

    /// Runs version check, optional type load and open.
    ///
    /// Safe to call repeatedly and concurrently: declarations are
    /// idempotent and the version check is read-only.
    ///
    /// # Errors
    /// - `ConnectError::Connection` for open, read and timeout failures.
    /// - `ConnectError::Bootstrap` when a declaration or the marker write fails.
    pub async fn connect(&self, config: &StoreConfig) -> ConnectResult<Binding> {
        let started_at = Instant::now();
        info!(
            "event=db_connect module=db status=start host={} port={} keyspace={}",
            config.host, config.port, config.keyspace
        );

        let result = self.run_phases(config).await;
        match &result {
            Ok(binding) => info!(
                "event=db_connect module=db status=ok keyspace={} tables={} duration_ms={}",
                config.keyspace,
                binding.table_names().join(","),
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=db_connect module=db status=error keyspace={} phase={} retryable={} duration_ms={} error={}",
                config.keyspace,
                err.phase(),
                err.is_retryable(),
                started_at.elapsed().as_millis(),
                err.store_error()
            ),
        }
        result
    }

    async fn run_phases(&self, config: &StoreConfig) -> ConnectResult<Binding> {
        let limit = config.request_timeout();

        let transient = with_deadline(limit, "open", self.connector.open(&config.keyspace))
            .await
            .map_err(connection_failure(BootstrapPhase::VersionCheck))?;

        let prepared = self.ensure_schema(transient.as_ref(), limit).await;
        let closed = with_deadline(limit, "close", transient.close()).await;
        prepared?;
        closed.map_err(connection_failure(BootstrapPhase::OpenConnection))?;

        self.open_binding(config, limit).await
    }

    async fn ensure_schema(&self, client: &dyn StoreClient, limit: Duration) -> ConnectResult<()> {
        let phase = BootstrapPhase::VersionCheck;
        debug!("event=db_bootstrap module=db status=start phase={phase}");
        let version_spec = KeyspaceSchema::version_table();
        let version = with_deadline(limit, "version.load", client.load_table(&version_spec))
            .await
            .map_err(connection_failure(phase))?;
        let markers = with_deadline(
            limit,
            "version.find",
            version.find(&Filter::all().with_limit(1), FindOptions::default()),
        )
        .await
        .map_err(connection_failure(phase))?;

        if !markers.is_empty() {
            debug!("event=db_bootstrap module=db status=ok phase={phase} marker=present");
            return Ok(());
        }
        debug!("event=db_bootstrap module=db status=ok phase={phase} marker=absent");

        self.load_types(version.as_ref(), limit).await
    }

    async fn load_types(&self, version: &dyn TableStore, limit: Duration) -> ConnectResult<()> {
        let phase = BootstrapPhase::UdtLoad;
        let started_at = Instant::now();
        info!(
            "event=db_bootstrap module=db status=start phase={phase} types={}",
            self.schema.types.len()
        );

        for declaration in &self.schema.types {
            let statement = Statement::CreateType(declaration.clone());
            with_deadline(limit, "version.execute", version.execute(&statement))
                .await
                .map_err(bootstrap_failure(phase))?;
            debug!(
                "event=db_declare_type module=db status=ok type={}",
                declaration.name
            );
        }

        let marker = SchemaVersionMarker::initial()
            .to_record()
            .map_err(bootstrap_failure(phase))?;
        with_deadline(limit, "version.save", version.save(marker))
            .await
            .map_err(bootstrap_failure(phase))?;

        info!(
            "event=db_bootstrap module=db status=ok phase={phase} duration_ms={}",
            started_at.elapsed().as_millis()
        );
        Ok(())
    }

    async fn open_binding(&self, config: &StoreConfig, limit: Duration) -> ConnectResult<Binding> {
        let phase = BootstrapPhase::OpenConnection;
        debug!("event=db_bootstrap module=db status=start phase={phase}");
        let client = with_deadline(limit, "open", self.connector.open(&config.keyspace))
            .await
            .map_err(connection_failure(phase))?;

        let mut tables = BTreeMap::new();
        for spec in &self.schema.tables {
            let operation = format!("{}.load", spec.name);
            match with_deadline(limit, &operation, client.load_table(spec)).await {
                Ok(table) => {
                    tables.insert(spec.name.clone(), table);
                }
                Err(source) => {
                    if let Err(err) = with_deadline(limit, "close", client.close()).await {
                        warn!("event=db_close module=db status=error phase={phase} error={err}");
                    }
                    return Err(ConnectError::Connection { phase, source });
                }
            }
        }

        debug!("event=db_bootstrap module=db status=ok phase={phase}");
        Ok(Binding::new(client, tables))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryConnector, StoreOp};

    fn bootstrapper(connector: &InMemoryConnector) -> ConnectionBootstrapper {
        ConnectionBootstrapper::new(Arc::new(connector.clone()), KeyspaceSchema::smartpark())
    }

    #[tokio::test]
    async fn fresh_keyspace_declares_types_then_writes_marker() {
        let connector = InMemoryConnector::new();
        let binding = bootstrapper(&connector)
            .connect(&StoreConfig::for_keyspace("fresh"))
            .await
            .unwrap();
        assert_eq!(binding.table_names(), vec!["garage", "user"]);

        let ops = connector.operations();
        let executes = ops
            .iter()
            .position(|op| matches!(op, StoreOp::Execute { .. }))
            .unwrap();
        let save = ops
            .iter()
            .position(|op| matches!(op, StoreOp::Save { .. }))
            .unwrap();
        assert!(executes < save);
        assert_eq!(connector.rows("fresh", "version").len(), 1);
    }

    #[tokio::test]
    async fn transient_client_is_closed_before_binding_opens() {
        let connector = InMemoryConnector::new();
        bootstrapper(&connector)
            .connect(&StoreConfig::for_keyspace("ks"))
            .await
            .unwrap();

        let labels = connector
            .operations()
            .iter()
            .map(StoreOp::describe)
            .collect::<Vec<_>>();
        let close = labels.iter().position(|l| l == "close ks").unwrap();
        let reopen = labels.iter().rposition(|l| l == "open ks").unwrap();
        assert!(close < reopen);
        assert_eq!(labels.iter().filter(|l| *l == "open ks").count(), 2);
    }

    #[tokio::test]
    async fn failing_marker_write_is_a_bootstrap_error() {
        let connector = InMemoryConnector::new();
        connector.inject_failure("version.save");
        let err = bootstrapper(&connector)
            .connect(&StoreConfig::for_keyspace("ks"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ConnectError::Bootstrap {
                phase: BootstrapPhase::UdtLoad,
                ..
            }
        ));
        assert!(connector.rows("ks", "version").is_empty());
    }

    #[tokio::test]
    async fn failing_table_load_reports_open_phase() {
        let connector = InMemoryConnector::new();
        connector.inject_failure("user.load");
        let err = bootstrapper(&connector)
            .connect(&StoreConfig::for_keyspace("ks"))
            .await
            .unwrap_err();
        assert_eq!(err.phase(), BootstrapPhase::OpenConnection);
        assert!(matches!(err, ConnectError::Connection { .. }));
    }
}
