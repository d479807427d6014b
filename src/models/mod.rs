//! Core data model for the asset lifecycle pipeline.
//!
//! A single entity, the asset, carries everything the pipeline needs: its
//! scan/upload state, content identity, visibility rules and soft-delete
//! marker. It maps to one database table via `sqlx::FromRow` and serializes
//! naturally as JSON via `serde`.

pub mod asset;
