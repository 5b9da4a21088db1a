//! Deterministic logic: source matching, tree building, event correlation and
//! result aggregation.
//!
//! Core modules do no I/O. Sources arrive as strings and events as decoded
//! records, so every step can be tested in isolation.

pub mod aggregate;
pub mod builder;
pub mod classifier;
pub mod correlate;
pub mod events;
pub mod invariants;
pub mod matcher;
pub mod naming;
pub mod pattern;
pub(crate) mod queries;
pub mod selector;
pub mod types;
