//! # Storage
//!
//! Durable storage of named graph snapshots.

pub mod snapshot_store;

pub use snapshot_store::SnapshotStore;
