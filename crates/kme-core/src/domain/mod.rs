//! Domain layer
//!
//! Entries and the store that owns them, the lexical indices, the
//! relationship graph and ranked retrieval.

pub mod graph;
pub mod index;
pub mod knowledge;
pub mod query;
