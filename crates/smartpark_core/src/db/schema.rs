//! Keyspace schema declarations.
//!
//! # Responsibility
//! - Describe structured (composite) types and the tables a keyspace needs.
//! - Describe the schema-version marker row.
//!
//! # Invariants
//! - Structured types are declared in order and are safe to redeclare.
//! - The version table is keyed by `change`.

use crate::model::entity::Entity;
use crate::model::garage::Garage;
use crate::model::user::User;
use crate::store::{Record, StoreError, StoreResult, TableSpec};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Table holding schema-version markers.
pub const VERSION_TABLE: &str = "version";
/// `change` value written by the first bootstrap of a keyspace.
pub const INITIAL_SCHEMA_CHANGE: i32 = 1;

/// One field of a structured type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Named composite value type referenced by entity columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredType {
    pub name: String,
    pub fields: Vec<FieldDef>,
}

impl StructuredType {
    pub fn new(name: impl Into<String>, fields: &[(&str, &str)]) -> Self {
        Self {
            name: name.into(),
            fields: fields
                .iter()
                .map(|(name, kind)| FieldDef {
                    name: (*name).to_string(),
                    kind: (*kind).to_string(),
                })
                .collect(),
        }
    }
}

impl Display for StructuredType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let fields = self
            .fields
            .iter()
            .map(|field| format!("{} {}", field.name, field.kind))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "CREATE TYPE IF NOT EXISTS {} ({fields});", self.name)
    }
}

/// Everything one keyspace bootstrap must ensure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyspaceSchema {
    /// Applied strictly in this order.
    pub types: Vec<StructuredType>,
    /// Tables bound after bootstrap, excluding the version table.
    pub tables: Vec<TableSpec>,
}

impl KeyspaceSchema {
    /// Schema for a single entity domain.
    pub fn for_entity<E: Entity>() -> Self {
        Self {
            types: E::structured_types(),
            tables: vec![E::table()],
        }
    }

    /// Combined schema for every SmartPark domain.
    ///
    /// The version marker is shared by the whole keyspace, so all domains
    /// must be declared by whichever service bootstraps first.
    pub fn smartpark() -> Self {
        Self::for_entity::<Garage>().merge(Self::for_entity::<User>())
    }

    /// Appends `other`, skipping types and tables already declared.
    pub fn merge(mut self, other: Self) -> Self {
        for declaration in other.types {
            if !self.types.iter().any(|known| known.name == declaration.name) {
                self.types.push(declaration);
            }
        }
        for table in other.tables {
            if !self.tables.iter().any(|known| known.name == table.name) {
                self.tables.push(table);
            }
        }
        self
    }

    pub fn version_table() -> TableSpec {
        TableSpec::new(VERSION_TABLE, "change")
    }
}

/// Row whose existence records that type bootstrap already ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaVersionMarker {
    pub change: i32,
    /// Unix epoch milliseconds.
    pub made_at: i64,
}

impl SchemaVersionMarker {
    pub fn initial() -> Self {
        Self {
            change: INITIAL_SCHEMA_CHANGE,
            made_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn to_record(&self) -> StoreResult<Record> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            other => Err(StoreError::InvalidData(format!(
                "version marker serialized to non-object {other}"
            ))),
        }
    }
}
