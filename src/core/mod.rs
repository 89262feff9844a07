pub mod chunker;
pub mod config;
pub mod error;
pub mod identity;
pub mod paths;
pub mod row;
pub mod schema;
