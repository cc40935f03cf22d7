//! Core data models for the relay's message store.
//!
//! These entities map to database rows via `sqlx::FromRow` and serialize
//! naturally as JSON via `serde`.

pub mod message;
