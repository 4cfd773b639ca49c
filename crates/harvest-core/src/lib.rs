//! # Harvest Core
//!
//! Shared, I/O-free logic for product-harvest: raw record accessors, the
//! persisted product document, record identity and content fingerprint,
//! run summary types, and the document store abstraction.
//!
//! This crate contains no tokio, sqlx, process spawning or filesystem
//! access. Everything here is deterministic given its inputs (timestamps
//! are always passed in by the caller).

pub mod identity;
pub mod models;
pub mod store;
