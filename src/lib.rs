//! Disease outbreak early warning.
//!
//! Case reports are bucketed into weekly series per (entity, disease). Two
//! independent branches consume that table:
//!
//! - entity profiles are clustered by disease burden ([`cluster`]);
//! - each selected series is forecast ([`forecast`]), checked against a
//!   historical threshold ([`alert`]) and turned into an action
//!   ([`recommend`]).
//!
//! [`pipeline`] wires the branches together. `ingest`, `db`, `export` and
//! `report` are the I/O edges used by the command-line tool.

pub mod aggregate;
pub mod alert;
pub mod cluster;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod forecast;
pub mod ingest;
pub mod models;
pub mod pipeline;
pub mod profile;
pub mod recommend;
pub mod report;
pub mod stats;

pub use config::PipelineConfig;
pub use error::{FailureKind, PipelineError, Result};
