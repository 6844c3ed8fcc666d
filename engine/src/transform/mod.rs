//! Transformation module.
//!
//! This module handles relational CSV to nested JSON conversion:
//! - Join: enrich primary tables with their related rows
//! - Driver: decide how many documents to emit
//! - Materialize: walk the mapping tree per document
//! - Pipeline: end-to-end run from files on disk

pub mod driver;
pub mod join;
pub mod materialize;
pub mod pipeline;

pub use driver::{resolve_driver, Driver};
pub use join::{join, EnrichedRecord, JoinedData};
pub use materialize::{materialize, IdentityKey};
pub use pipeline::*;
