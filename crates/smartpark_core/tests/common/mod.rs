#![allow(dead_code)]

use serde_json::{json, Value};
use smartpark_core::store::StoreOp;
use smartpark_core::{
    Entity, EntityService, GarageInput, InMemoryConnector, ServiceConfig, StoreConnector,
};
use std::sync::Arc;

/// Keyspace used by `ServiceConfig::default()`.
pub const KEYSPACE: &str = "smartpark";

pub const FIRST_GARAGE_ID: &str = "0b7d7d3e-6c1f-4f41-9a55-0a1e6a2c0001";
pub const FIRST_USER_ID: &str = "5f2c1a9e-2b7d-4c4e-8f10-6d1b3c9a0001";

pub fn service<E: Entity>(connector: &InMemoryConnector) -> EntityService<E> {
    EntityService::new(ServiceConfig::default(), connector_arc(connector))
}

pub fn connector_arc(connector: &InMemoryConnector) -> Arc<dyn StoreConnector> {
    Arc::new(connector.clone())
}

pub fn garage_input(value: Value) -> GarageInput {
    serde_json::from_value(value).unwrap()
}

pub fn valid_garage() -> GarageInput {
    garage_input(json!({
        "description": "X",
        "address": {"street": "s", "city": "c", "state": "ST", "zip": "00000"}
    }))
}

pub fn writes(connector: &InMemoryConnector) -> Vec<StoreOp> {
    connector
        .operations()
        .into_iter()
        .filter(StoreOp::is_write)
        .collect()
}

pub fn executed_statements(connector: &InMemoryConnector) -> Vec<String> {
    connector
        .operations()
        .into_iter()
        .filter_map(|op| match op {
            StoreOp::Execute { statement, .. } if statement.starts_with("CREATE TYPE") => {
                Some(statement)
            }
            _ => None,
        })
        .collect()
}
