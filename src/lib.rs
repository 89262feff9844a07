//! semantic-sql library
//!
//! Hybrid relational + semantic index over SQLite.
//!
//! # Modules
//!
//! - `core`: Schema, rows, errors, configuration, chunking and identities
//! - `store`: Relational and vector storage adapters, embedders
//! - `index`: The hybrid index that keeps both stores consistent

pub mod core;
pub mod index;
pub mod store;

// Re-exports for convenience
pub use core::config::{Config, TableConfig};
pub use core::error::{Error, ErrorKind, Result};
pub use core::row::Row;
pub use core::schema::{ColumnDecl, SchemaViolation, TableSchema};
pub use index::{HybridIndex, IndexStatus, OrphanReport, TableBinding};
pub use store::{Embedder, HtpEmbedder, MetadataFilter, RelationalStore, VectorMatch, VectorStore};
