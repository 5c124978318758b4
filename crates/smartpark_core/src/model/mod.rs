//! Domain model for SmartPark entities.
//!
//! # Responsibility
//! - Define the garage and user records and their caller-facing inputs.
//! - Define validation rules and result envelopes.
//!
//! # Invariants
//! - Every entity is identified by a stable `id`.
//! - Building an entity from input never fails; validation is a separate step.

pub mod address;
pub mod entity;
pub mod envelope;
pub mod garage;
pub mod user;
pub mod validation;
