mod common;

use common::{connector_arc, executed_statements};
use smartpark_core::store::StoreOp;
use smartpark_core::{
    BootstrapPhase, ConnectError, ConnectionBootstrapper, InMemoryConnector, KeyspaceSchema,
    StoreConfig,
};
use std::time::Duration;

fn bootstrapper(connector: &InMemoryConnector) -> ConnectionBootstrapper {
    ConnectionBootstrapper::new(connector_arc(connector), KeyspaceSchema::smartpark())
}

#[tokio::test]
async fn fresh_keyspace_declares_types_in_order_and_writes_one_marker() {
    let connector = InMemoryConnector::new();
    bootstrapper(&connector)
        .connect(&StoreConfig::for_keyspace("fresh"))
        .await
        .unwrap();

    let expected = KeyspaceSchema::smartpark()
        .types
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    assert_eq!(executed_statements(&connector), expected);
    assert_eq!(
        connector.structured_types("fresh"),
        vec![
            "garage_rate",
            "garage_revenue",
            "garage_device",
            "user_car",
            "user_favorite_garage"
        ]
    );

    let markers = connector.rows("fresh", "version");
    assert_eq!(markers.len(), 1);
    assert_eq!(markers[0].get("change"), Some(&serde_json::json!(1)));
}

#[tokio::test]
async fn second_connect_runs_no_type_statements() {
    let connector = InMemoryConnector::new();
    let config = StoreConfig::for_keyspace("ks");
    bootstrapper(&connector).connect(&config).await.unwrap();
    connector.clear_operations();

    let binding = bootstrapper(&connector).connect(&config).await.unwrap();
    assert_eq!(binding.table_names(), vec!["garage", "user"]);
    assert!(connector
        .operations()
        .iter()
        .all(|op| !matches!(op, StoreOp::Execute { .. } | StoreOp::Save { .. })));
    assert_eq!(connector.rows("ks", "version").len(), 1);
}

#[tokio::test]
async fn failed_declaration_halts_the_rest_and_skips_marker() {
    let connector = InMemoryConnector::new();
    connector.inject_failure("garage_revenue");

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
    assert!(!err.is_retryable());
    assert_eq!(connector.structured_types("ks"), vec!["garage_rate"]);
    assert_eq!(executed_statements(&connector).len(), 1);
    assert!(connector.rows("ks", "version").is_empty());

    connector.clear_failures();
    bootstrapper(&connector)
        .connect(&StoreConfig::for_keyspace("ks"))
        .await
        .unwrap();
    assert_eq!(connector.structured_types("ks").len(), 5);
    assert_eq!(connector.rows("ks", "version").len(), 1);
}

#[tokio::test]
async fn version_check_failure_is_a_connection_error() {
    let connector = InMemoryConnector::new();
    connector.inject_failure("version.find");

    let err = bootstrapper(&connector)
        .connect(&StoreConfig::for_keyspace("ks"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ConnectError::Connection {
            phase: BootstrapPhase::VersionCheck,
            ..
        }
    ));
    assert!(executed_statements(&connector).is_empty());
}

#[tokio::test]
async fn slow_store_times_out_as_retryable_connection_error() {
    let connector = InMemoryConnector::with_latency(Duration::from_millis(200));
    let config = StoreConfig {
        request_timeout_ms: 10,
        ..StoreConfig::for_keyspace("ks")
    };

    let err = bootstrapper(&connector).connect(&config).await.unwrap_err();
    assert!(matches!(err, ConnectError::Connection { .. }));
    assert!(err.is_retryable());
    assert!(err.to_string().contains("dbVersionCheck"));
}

#[tokio::test]
async fn concurrent_connects_leave_a_single_marker() {
    let connector = InMemoryConnector::new();
    let first = bootstrapper(&connector);
    let second = bootstrapper(&connector);
    let config = StoreConfig::for_keyspace("ks");

    let (a, b) = tokio::join!(first.connect(&config), second.connect(&config));
    assert!(a.is_ok());
    assert!(b.is_ok());
    assert_eq!(connector.rows("ks", "version").len(), 1);
    assert_eq!(connector.structured_types("ks").len(), 5);
}
