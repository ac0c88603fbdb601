//! # Formats
//!
//! Serialized forms of a canonical graph.
//!
//! - `persistence`: compact binary snapshot (header + postcard payload)
//! - `lines`: newline-delimited JSON, one record per line

pub mod lines;
pub mod persistence;

pub use lines::{LineRecord, read_lines, write_lines};
pub use persistence::{PersistenceHeader, SerializableGraph, graph_from_bytes, graph_to_bytes};
