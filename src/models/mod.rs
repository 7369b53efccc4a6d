//! Core data models for the database pool broker.
//!
//! `resource` maps to the persisted `resources` table via `sqlx::FromRow`,
//! `service` covers the in-memory façade tables, and `remote` holds the
//! payloads exchanged with the Data Director API.

pub mod remote;
pub mod resource;
pub mod service;
