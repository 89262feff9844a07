//! MCP Server for semsql
//!
//! Exposes the hybrid index (query, get, insert, chunked insert, status) as MCP tools over stdio.

mod server;

pub use server::run_mcp_server;
