//! Asset lifecycle pipeline: intake, virus scanning, and durable cloud
//! storage for uploaded files.
//!
//! Every asset moves through `unscanned → {clean, infected}` and
//! `clean → uploaded`, coordinated entirely through its persisted record so
//! the scan, sync and replication workers can run anywhere. The HTTP layer,
//! the task-queue transport and the reverse proxy serving `/media` paths are
//! external collaborators; this crate owns the rules.

pub mod config;
pub mod models;
pub mod queue;
pub mod services;
pub mod workers;
