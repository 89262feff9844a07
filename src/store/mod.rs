//! Storage adapters: a relational table store and a vector collection store,
//! both backed by SQLite.

pub mod embedding;
pub mod relational;
pub mod vector;

pub use embedding::{Embedder, HtpEmbedder};
pub use relational::RelationalStore;
pub use vector::{CollectionInfo, MetadataFilter, VectorMatch, VectorStore};
