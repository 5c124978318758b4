//! Entity contract shared by all domains.
//!
//! # Responsibility
//! - Describe how a domain record maps onto one keyed table.
//! - Convert between typed entities and stored records.
//!
//! # Invariants
//! - Every entity is keyed by `id`, which never changes after creation.
//! - Rows are materialized through `from_input`, so absent fields receive
//!   the same defaults as a fresh create.

use crate::db::schema::StructuredType;
use crate::model::validation::Validator;
use crate::store::{Record, StoreError, StoreResult, TableSpec};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Key field of every entity table.
pub const ENTITY_KEY: &str = "id";

/// Domain record persisted in one table.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Candidate fields as supplied by callers; every field optional.
    type Input: Serialize + DeserializeOwned + Clone + Default + Send + Sync + 'static;

    /// Display name used in messages and logs.
    const NAME: &'static str;
    /// Backing table name.
    const TABLE: &'static str;

    /// Structured types the table's columns reference, in declaration order.
    fn structured_types() -> Vec<StructuredType>;

    /// Builds a complete entity, filling defaults for absent fields.
    fn from_input(input: Self::Input) -> Self;

    /// Identifier carried by the input, if any.
    fn input_id(input: &Self::Input) -> Option<&str>;

    fn id(&self) -> &str;

    /// Fixture inserted when the table is first found empty.
    fn seed_fixture() -> &'static str;

    fn default_validator() -> Arc<dyn Validator<Self>>;

    fn table() -> TableSpec {
        TableSpec::new(Self::TABLE, ENTITY_KEY)
    }
}

/// Serializes an entity into a stored record.
pub fn to_record<E: Entity>(entity: &E) -> StoreResult<Record> {
    match serde_json::to_value(entity)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::InvalidData(format!(
            "{} serialized to non-object {other}",
            E::NAME
        ))),
    }
}

/// Materializes a stored record into an entity.
pub fn from_record<E: Entity>(record: Record) -> StoreResult<E> {
    let input: E::Input = serde_json::from_value(Value::Object(record))?;
    Ok(E::from_input(input))
}

/// Parses the entity's seed fixture.
pub fn load_seed<E: Entity>() -> StoreResult<Vec<E>> {
    let inputs: Vec<E::Input> = serde_json::from_str(E::seed_fixture())?;
    Ok(inputs.into_iter().map(E::from_input).collect())
}
