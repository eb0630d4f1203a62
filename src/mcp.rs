use std::sync::Arc;

use rmcp::{
    ServerHandler,
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult,
        Content,
        Implementation,
        ServerCapabilities,
        ServerInfo,
    },
    tool,
    tool_handler,
    tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::{
    config_db::ConfigDb,
    corpus_db::CorpusDb,
    data_dir::DataDir,
    embedding::Embedder,
    error,
    generation::{GenerationConfig, IGNORE_CONTEXT_SUFFIX},
    generator::Generator,
    retriever::RetrievalResult,
    session::Session,
    settings::Settings,
    text_util::{DEFAULT_PREVIEW_MAX_CHARS, preview},
};

struct DocwhisperState {
    session: Session<Box<dyn Embedder>>,
    generator: Box<dyn Generator>,
    generation: GenerationConfig,
    top_k: usize,
}

#[derive(Clone)]
pub struct DocwhisperMcpServer {
    state: Arc<DocwhisperState>,
    tool_router: ToolRouter<Self>,
}

impl DocwhisperMcpServer {
    fn new(state: DocwhisperState) -> Self {
        Self {
            state: Arc::new(state),
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router(router = tool_router)]
impl DocwhisperMcpServer {
    /// Return the indexed chunks most similar to a query.
    #[tool(
        name = "docwhisper_search",
        description = "Find the passages of the indexed documents most similar to a query."
    )]
    pub async fn docwhisper_search(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let k = params.k.unwrap_or(self.state.top_k);

        let state = Arc::clone(&self.state);
        let query = params.query.clone();
        let retrieved = tokio::task::spawn_blocking(move || {
            state.session.retrieve(&query, k)
        })
        .await
        .map_err(|e| mcp_error("search task failed", e))?;

        let retrieved = match retrieved {
            Ok(retrieved) => retrieved,
            Err(e) => return Ok(tool_error(&e)),
        };

        let include_text = params.include_text.unwrap_or(true);
        let response = SearchResponse::new(&retrieved, include_text);
        let summary = format_search_summary(&response);
        let structured = serde_json::to_value(response)
            .map_err(|e| mcp_error("failed to serialize search results", e))?;

        let mut result = CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        Ok(result)
    }

    /// Answer a question from the indexed documents.
    #[tool(
        name = "docwhisper_ask",
        description = "Answer a question using the indexed documents as context. Returns the answer and the passages it was based on."
    )]
    pub async fn docwhisper_ask(
        &self,
        params: Parameters<AskParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let k = params.k.unwrap_or(self.state.top_k);
        let query = if params.ignore_documents.unwrap_or(false) {
            format!("{}{IGNORE_CONTEXT_SUFFIX}", params.query)
        } else {
            params.query
        };

        let state = Arc::clone(&self.state);
        let answer = tokio::task::spawn_blocking(move || {
            state.session.answer(
                &query,
                k,
                state.generator.as_ref(),
                &state.generation,
            )
        })
        .await
        .map_err(|e| mcp_error("answer task failed", e))?;

        let answer = match answer {
            Ok(answer) => answer,
            Err(e) => return Ok(tool_error(&e)),
        };

        let response = AskResponse {
            answer: answer.text.clone(),
            sources: SearchResponse::new(&answer.retrieved, false).results,
        };
        let structured = serde_json::to_value(response)
            .map_err(|e| mcp_error("failed to serialize answer", e))?;

        let mut result = CallToolResult::success(vec![Content::text(answer.text)]);
        result.structured_content = Some(structured);
        Ok(result)
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for DocwhisperMcpServer {
    fn get_info(&self) -> ServerInfo {
        let mut info = ServerInfo::default();
        info.capabilities = ServerCapabilities::builder().enable_tools().build();
        info.server_info =
            Implementation::new("docwhisper", env!("CARGO_PKG_VERSION"))
                .with_title("docwhisper MCP");
        info.instructions = Some(
            "Use docwhisper_search to find relevant passages in the user's documents and docwhisper_ask to get an answer grounded in them."
                .to_string(),
        );
        info
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    /// Search query string.
    pub query: String,
    /// Number of passages to return (default: the top_k setting).
    pub k: Option<usize>,
    /// Include the full passage text (default: true).
    pub include_text: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AskParams {
    /// The question to answer.
    pub query: String,
    /// Number of passages used as context (default: the top_k setting).
    pub k: Option<usize>,
    /// Answer from general knowledge instead of the documents.
    pub ignore_documents: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    query: String,
    result_count: usize,
    results: Vec<SearchResultItem>,
}

impl SearchResponse {
    fn new(retrieved: &RetrievalResult, include_text: bool) -> Self {
        let results: Vec<SearchResultItem> = retrieved
            .hits
            .iter()
            .map(|hit| SearchResultItem {
                rank: hit.rank,
                score: hit.score,
                chunk_id: hit.chunk.id,
                source: hit.chunk.source_id.clone(),
                offset: hit.chunk.offset,
                preview: preview(&hit.chunk.text, DEFAULT_PREVIEW_MAX_CHARS),
                text: include_text.then(|| hit.chunk.text.clone()),
            })
            .collect();
        Self {
            query: retrieved.query.clone(),
            result_count: results.len(),
            results,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResultItem {
    rank: usize,
    score: f32,
    chunk_id: u64,
    source: String,
    offset: usize,
    preview: String,
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AskResponse {
    answer: String,
    sources: Vec<SearchResultItem>,
}

fn format_search_summary(response: &SearchResponse) -> String {
    if response.results.is_empty() {
        return format!("No results found for \"{}\"", response.query);
    }

    let mut lines = Vec::with_capacity(response.results.len() + 1);
    let suffix = if response.results.len() == 1 { "" } else { "s" };
    lines.push(format!(
        "Found {} result{} for \"{}\":",
        response.results.len(),
        suffix,
        response.query
    ));

    for item in &response.results {
        lines.push(format!(
            "{}. {:.3} {} @{}: {}",
            item.rank, item.score, item.source, item.offset, item.preview
        ));
    }

    lines.join("\n")
}

/// Report a failed request to the client as a tool-level error.
fn tool_error(error: &error::Error) -> CallToolResult {
    warn!("tool call failed: {error}");
    CallToolResult::error(vec![Content::text(error.to_string())])
}

fn mcp_error(message: &str, error: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

pub fn run_mcp(data_dir: DataDir, config_db: ConfigDb) -> error::Result<()> {
    let settings = Settings::load(&config_db)?;
    let corpus_db = CorpusDb::open(&data_dir.corpus_db())?;
    let session = corpus_db.load_session(settings.build_embedder()?)?;

    let state = DocwhisperState {
        session,
        generator: settings.build_generator()?,
        generation: settings.generation.clone(),
        top_k: settings.top_k,
    };

    let server = DocwhisperMcpServer::new(state);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            error::Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    runtime.block_on(async move {
        let transport = rmcp::transport::stdio();
        let running = server.serve(transport).await.map_err(|e| {
            error::Error::Config(format!(
                "MCP server initialization failed: {e}"
            ))
        })?;
        running.waiting().await.map_err(|e| {
            error::Error::Config(format!("MCP server error: {e}"))
        })?;
        Ok(())
    })
}
