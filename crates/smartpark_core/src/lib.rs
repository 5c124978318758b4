//! Core data-access layer for SmartPark.
//! Bootstraps keyspaces, seeds entity tables and serves entity CRUD/list
//! calls as uniform result envelopes.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod service;
pub mod store;

pub use config::{ConfigError, ServiceConfig, StoreConfig};
pub use db::schema::{KeyspaceSchema, SchemaVersionMarker, StructuredType};
pub use db::{BootstrapPhase, ConnectError, ConnectionBootstrapper};
pub use logging::{default_log_level, init_logging, logging_status, LogTarget};
pub use model::entity::Entity;
pub use model::envelope::{ErrorKind, PageResult, Response};
pub use model::garage::{Garage, GarageInput};
pub use model::user::{User, UserInput};
pub use model::validation::{ValidationErrors, Validator};
pub use service::{
    DeleteRequest, EntityService, ListParams, ReadRequest, ServiceError, ServiceResult,
};
pub use store::{
    Binding, Filter, InMemoryConnector, SqliteConnector, StoreConnector, StoreError, TableSpec,
};

/// Service for garage records.
pub type GarageService = EntityService<Garage>;
/// Service for user records.
pub type UserService = EntityService<User>;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
