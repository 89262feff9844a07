//! semsql MCP Server implementation

use std::sync::Arc;

use anyhow::Result;
use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;

use semantic_sql::{HybridIndex, Row};

/// Upper bound on results per query (DoS prevention)
const MAX_TOP_K: usize = 100;

/// Parameters for semsql_query tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct QueryParams {
    /// Natural language query (e.g., "information about physical activity")
    #[schemars(description = "Natural language query ranked by semantic similarity")]
    pub query: String,
    /// SQL predicate over the bound table (e.g., "page_number > 10 AND category = 'sports'")
    #[schemars(description = "Optional SQL WHERE predicate restricting which rows are searched")]
    #[serde(default)]
    pub predicate: Option<String>,
    #[schemars(description = "Maximum number of results (default from config)")]
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Parameters for semsql_get tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetParams {
    #[schemars(description = "Row identities to fetch")]
    pub ids: Vec<String>,
}

/// Parameters for semsql_insert tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct InsertParams {
    /// Row objects keyed by column name; the semantic field is required
    #[schemars(description = "Rows to insert, as objects keyed by column name")]
    pub rows: Vec<Row>,
    #[schemars(description = "Reject columns not declared in the table")]
    #[serde(default)]
    pub validate: bool,
}

/// Parameters for semsql_insert_text tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct InsertTextParams {
    #[schemars(description = "Free text split into sentence chunks, one row per chunk")]
    pub text: String,
    #[schemars(description = "Column values copied to every chunk row")]
    #[serde(default)]
    pub metadata: Option<Row>,
    #[schemars(description = "Sentences per chunk (default from config)")]
    #[serde(default)]
    pub max_sentences: Option<usize>,
    #[serde(default)]
    pub validate: bool,
}

#[derive(Debug, Serialize)]
struct InsertResultJson {
    inserted: usize,
    ids: Vec<String>,
}

/// semsql MCP Service
#[derive(Clone)]
pub struct SemsqlService {
    index: Arc<HybridIndex>,
    default_top_k: usize,
    max_sentences: usize,
    tool_router: ToolRouter<Self>,
}

impl SemsqlService {
    pub fn new(index: HybridIndex, default_top_k: usize, max_sentences: usize) -> Self {
        Self {
            index: Arc::new(index),
            default_top_k,
            max_sentences,
            tool_router: Self::tool_router(),
        }
    }

    /// Run a blocking index call off the async runtime.
    async fn blocking<T, F>(&self, what: &'static str, f: F) -> Result<T, McpError>
    where
        T: Send + 'static,
        F: FnOnce(&HybridIndex) -> semantic_sql::Result<T> + Send + 'static,
    {
        let index = Arc::clone(&self.index);
        tokio::task::spawn_blocking(move || f(&index))
            .await
            .map_err(|e| McpError::internal_error(format!("{} task failed: {}", what, e), None))?
            .map_err(|e| McpError::internal_error(format!("{} failed: {}", what, e), None))
    }
}

fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let output = serde_json::to_string_pretty(value).map_err(|e| {
        McpError::internal_error(format!("JSON serialization failed: {}", e), None)
    })?;
    Ok(CallToolResult::success(vec![Content::text(output)]))
}

#[tool_router]
impl SemsqlService {
    /// Semantic search restricted by an optional SQL predicate
    #[tool(description = "Search the bound table by semantic similarity. With a predicate, only rows matching the SQL WHERE clause are ranked.")]
    async fn semsql_query(
        &self,
        params: Parameters<QueryParams>,
    ) -> Result<CallToolResult, McpError> {
        let QueryParams {
            query,
            predicate,
            limit,
        } = params.0;
        let top_k = limit.unwrap_or(self.default_top_k).clamp(1, MAX_TOP_K);

        let results = self
            .blocking("Query", move |index| match predicate {
                Some(predicate) => index.hybrid_query(&query, top_k, &predicate),
                None => index.semantic_query(&query, top_k),
            })
            .await?;
        json_result(&results)
    }

    /// Fetch rows by identity
    #[tool(description = "Fetch full rows from the bound table by identity. Unknown ids are skipped.")]
    async fn semsql_get(&self, params: Parameters<GetParams>) -> Result<CallToolResult, McpError> {
        let ids = params.0.ids;
        let rows = self.blocking("Get", move |index| index.get(ids)).await?;
        json_result(&rows)
    }

    /// Insert rows into both stores
    #[tool(description = "Insert rows into the bound table and its vector collection. Rows without an identity get a generated one. Returns the identities in input order.")]
    async fn semsql_insert(
        &self,
        params: Parameters<InsertParams>,
    ) -> Result<CallToolResult, McpError> {
        let InsertParams { rows, validate } = params.0;
        let ids = self
            .blocking("Insert", move |index| index.insert(rows, validate))
            .await?;
        json_result(&InsertResultJson {
            inserted: ids.len(),
            ids,
        })
    }

    /// Chunk text and insert one row per chunk
    #[tool(description = "Split text into sentence-aligned chunks and insert one row per chunk, copying the given metadata into each row.")]
    async fn semsql_insert_text(
        &self,
        params: Parameters<InsertTextParams>,
    ) -> Result<CallToolResult, McpError> {
        let InsertTextParams {
            text,
            metadata,
            max_sentences,
            validate,
        } = params.0;
        let max_sentences = max_sentences.unwrap_or(self.max_sentences);
        let ids = self
            .blocking("Insert text", move |index| {
                index.insert_text_in_chunks(&text, metadata.as_ref(), max_sentences, validate)
            })
            .await?;
        json_result(&InsertResultJson {
            inserted: ids.len(),
            ids,
        })
    }

    /// Counts and consistency report
    #[tool(description = "Get row and vector counts for the bound table, plus identities present in only one of the two stores.")]
    async fn semsql_status(&self) -> Result<CallToolResult, McpError> {
        let (status, orphans) = self
            .blocking("Status", |index| Ok((index.status()?, index.find_orphans()?)))
            .await?;
        json_result(&serde_json::json!({
            "status": status,
            "orphans": orphans,
        }))
    }
}

#[tool_handler]
impl ServerHandler for SemsqlService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "semsql MCP Server. Hybrid relational + semantic search over one SQLite table.".to_string()
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

/// Run the MCP server
pub async fn run_mcp_server(index: HybridIndex, default_top_k: usize, max_sentences: usize) -> Result<()> {
    use tokio::io::{stdin, stdout};

    if let Some(binding) = index.binding() {
        info!(table = %binding.table_name, "starting MCP server");
    }
    let service = SemsqlService::new(index, default_top_k, max_sentences);
    let transport = (stdin(), stdout());
    let server = service.serve(transport).await?;
    server.waiting().await?;

    Ok(())
}
