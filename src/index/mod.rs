//! The hybrid index: one relational table and one vector collection under a shared identity.

pub mod hybrid;

pub use hybrid::{HybridIndex, IndexStatus, OrphanReport, TableBinding};
