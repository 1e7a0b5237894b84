use serde_json::json;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::chunker::ChunkType;
use crate::engine::{SearchEngine, SearchOptions};
use crate::indexer::Indexer;

pub struct ServerState {
    repo_root: PathBuf,
    indexer: Arc<Indexer>,
    engine: Arc<SearchEngine>,
}

fn resolve_path(repo_root: &std::path::Path, raw: &str) -> PathBuf {
    let p = PathBuf::from(raw);
    if p.is_absolute() {
        p
    } else {
        repo_root.join(p)
    }
}

fn parse_chunk_type(raw: &str) -> Option<ChunkType> {
    [
        ChunkType::Function,
        ChunkType::Class,
        ChunkType::Method,
        ChunkType::Interface,
        ChunkType::Type,
        ChunkType::Enum,
        ChunkType::Namespace,
        ChunkType::Decorator,
        ChunkType::Constructor,
        ChunkType::Property,
        ChunkType::Variable,
        ChunkType::Import,
        ChunkType::Comment,
        ChunkType::Module,
        ChunkType::Section,
        ChunkType::CodeBlock,
        ChunkType::Paragraph,
        ChunkType::List,
        ChunkType::Table,
        ChunkType::Blockquote,
        ChunkType::Generic,
    ]
    .into_iter()
    .find(|c| c.as_str() == raw)
}

fn ok_result(id: serde_json::Value, result: serde_json::Value) -> serde_json::Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn method_not_found(id: serde_json::Value, method: &str) -> serde_json::Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": -32601, "message": format!("Method not found: {method}") } })
}

fn invalid_params(id: serde_json::Value, message: String) -> serde_json::Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": -32602, "message": message } })
}

fn internal_error(id: serde_json::Value, err: &crate::errors::CoreError) -> serde_json::Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": -32000, "message": err.to_string(), "data": { "kind": err.code(), "severity": err.severity() } }
    })
}

fn require_str<'a>(params: &'a serde_json::Value, field: &str) -> Result<&'a str, String> {
    params.get(field).and_then(|v| v.as_str()).ok_or_else(|| format!("missing required parameter `{field}`"))
}

const TOOL_METHODS: &[(&str, &str)] = &[
    ("index_directory", "Index every eligible file under a directory, embedding and upserting chunks into the vector index. Resumable."),
    ("index_file", "Index (or update) a single file."),
    ("reindex_file", "Force re-indexing of a single file regardless of mtime."),
    ("remove_file", "Remove all indexed chunks for a file."),
    ("clear_index", "Remove every indexed chunk."),
    ("search_code", "Hybrid dense/sparse semantic code search."),
    ("search_functions", "search_code scoped to function-type chunks."),
    ("search_classes", "search_code scoped to class-type chunks."),
    ("find_similar", "Find chunks similar to a given snippet of code, excluding the chunk it came from."),
    ("codebase_search", "search_code followed by context assembly into budgeted references."),
    ("get_code_context", "Assemble a token-budgeted context window for a query."),
    ("get_indexing_stats", "Current indexing statistics."),
    ("get_search_stats", "Current search-cache hit/miss statistics."),
    ("get_enhanced_stats", "Combined indexing + cache + watcher statistics."),
    ("get_health_status", "Liveness/readiness summary."),
    ("clear_search_cache", "Evict all cached search results."),
    ("invalidate_file_cache", "Evict cached results referencing a file."),
    ("create_payload_indexes", "Ensure the vector index's payload indexes exist."),
];

impl ServerState {
    pub fn new(repo_root: PathBuf, indexer: Arc<Indexer>, engine: Arc<SearchEngine>) -> Self {
        Self { repo_root, indexer, engine }
    }

    fn tools_list(&self, id: serde_json::Value) -> serde_json::Value {
        let tools: Vec<serde_json::Value> = TOOL_METHODS
            .iter()
            .map(|(name, description)| {
                json!({
                    "name": name,
                    "description": description,
                    "inputSchema": { "type": "object", "additionalProperties": true },
                })
            })
            .collect();
        ok_result(id, json!({ "tools": tools }))
    }

    fn search_options(&self, params: &serde_json::Value) -> SearchOptions {
        SearchOptions {
            limit: params.get("limit").and_then(|v| v.as_u64()).unwrap_or(50) as usize,
            score_threshold: params.get("scoreThreshold").and_then(|v| v.as_f64()).unwrap_or(0.0) as f32,
            language: params.get("language").and_then(|v| v.as_str()).map(|s| s.to_string()),
            chunk_type: params.get("chunkType").and_then(|v| v.as_str()).and_then(parse_chunk_type),
            file_path: params.get("filePath").and_then(|v| v.as_str()).map(|s| s.to_string()),
            prefer_implementation: params.get("preferImplementation").and_then(|v| v.as_bool()).unwrap_or(false),
            enable_hybrid: params.get("hybrid").and_then(|v| v.as_bool()).unwrap_or(true),
        }
    }

    pub async fn dispatch(&self, id: serde_json::Value, method: &str, params: serde_json::Value) -> serde_json::Value {
        match method {
            "index_directory" => {
                let raw = params.get("path").and_then(|v| v.as_str()).unwrap_or(".");
                let path = resolve_path(&self.repo_root, raw);
                match self.indexer.index_directory(&path).await {
                    Ok(stats) => ok_result(id, serde_json::to_value(stats).unwrap()),
                    Err(e) => internal_error(id, &e),
                }
            }
            "index_file" | "reindex_file" => {
                let raw = match require_str(&params, "path") {
                    Ok(p) => p,
                    Err(msg) => return invalid_params(id, msg),
                };
                let path = resolve_path(&self.repo_root, raw);
                let force = method == "reindex_file";
                match self.indexer.index_file(&path, force).await {
                    Ok(chunks) => ok_result(id, json!({ "chunks": chunks })),
                    Err(e) => internal_error(id, &e),
                }
            }
            "remove_file" => {
                let raw = match require_str(&params, "path") {
                    Ok(p) => p,
                    Err(msg) => return invalid_params(id, msg),
                };
                let path = resolve_path(&self.repo_root, raw);
                match self.indexer.remove_file(&path).await {
                    Ok(()) => ok_result(id, json!({ "removed": true })),
                    Err(e) => internal_error(id, &e),
                }
            }
            "clear_index" => match self.indexer.clear_index().await {
                Ok(()) => ok_result(id, json!({ "cleared": true })),
                Err(e) => internal_error(id, &e),
            },
            "search_code" | "search_functions" | "search_classes" => {
                let query = match require_str(&params, "query") {
                    Ok(q) => q.to_string(),
                    Err(msg) => return invalid_params(id, msg),
                };
                let mut opts = self.search_options(&params);
                match method {
                    "search_functions" => opts.chunk_type = Some(ChunkType::Function),
                    "search_classes" => opts.chunk_type = Some(ChunkType::Class),
                    _ => {}
                }
                match self.engine.search(&query, &opts).await {
                    Ok(resp) => ok_result(id, json!({ "results": resp.results, "metadata": resp.metadata })),
                    Err(e) => internal_error(id, &e),
                }
            }
            "find_similar" => {
                let content = match require_str(&params, "content") {
                    Ok(c) => c.to_string(),
                    Err(msg) => return invalid_params(id, msg),
                };
                let exclude_id = params.get("excludeId").and_then(|v| v.as_str()).map(|s| s.to_string());
                let opts = self.search_options(&params);
                match self.engine.search(&content, &opts).await {
                    Ok(mut resp) => {
                        if let Some(exclude_id) = exclude_id {
                            resp.results.retain(|r| r.id != exclude_id);
                        }
                        ok_result(id, json!({ "results": resp.results, "metadata": resp.metadata }))
                    }
                    Err(e) => internal_error(id, &e),
                }
            }
            "codebase_search" | "get_code_context" => {
                let query = match require_str(&params, "query") {
                    Ok(q) => q.to_string(),
                    Err(msg) => return invalid_params(id, msg),
                };
                let opts = self.search_options(&params);
                let max_tokens = params.get("maxTokens").and_then(|v| v.as_u64()).map(|n| n as usize).unwrap_or(32_000);
                match self.engine.assemble_context(&query, &opts, max_tokens).await {
                    Ok(result) => ok_result(
                        id,
                        json!({
                            "references": result.references,
                            "truncated": result.truncated,
                            "summary": result.summary,
                        }),
                    ),
                    Err(e) => internal_error(id, &e),
                }
            }
            "get_indexing_stats" => match self.indexer.get_stats().await {
                Ok(stats) => ok_result(id, serde_json::to_value(stats).unwrap()),
                Err(e) => internal_error(id, &e),
            },
            "get_search_stats" => ok_result(id, serde_json::to_value(self.engine.cache().stats()).unwrap()),
            "get_enhanced_stats" => {
                let indexing = self.indexer.get_stats().await.ok();
                ok_result(
                    id,
                    json!({
                        "indexing": indexing,
                        "cache": self.engine.cache().stats(),
                    }),
                )
            }
            "get_health_status" => {
                let chunk_count = self.indexer.count_indexed_chunks().await.unwrap_or(0);
                ok_result(id, json!({ "status": "ok", "indexedChunks": chunk_count }))
            }
            "clear_search_cache" => {
                self.engine.cache().clear();
                ok_result(id, json!({ "cleared": true }))
            }
            "invalidate_file_cache" => {
                let raw = match require_str(&params, "path") {
                    Ok(p) => p,
                    Err(msg) => return invalid_params(id, msg),
                };
                self.engine.cache().invalidate_file(raw);
                ok_result(id, json!({ "invalidated": raw }))
            }
            "create_payload_indexes" => match self.engine.vector_index().ensure_payload_indexes().await {
                Ok(()) => ok_result(id, json!({ "created": true })),
                Err(e) => internal_error(id, &e),
            },
            _ => method_not_found(id, method),
        }
    }
}

/// Line-delimited JSON-RPC 2.0 over stdio: one request per line in, one
/// response per line out. Serves `initialize`/`tools/list`/`tools/call` for
/// MCP handshake/discovery, and every core method both directly (as its own
/// JSON-RPC method name) and via `tools/call {name, arguments}`.
pub async fn run_stdio_server(state: ServerState) -> anyhow::Result<()> {
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    for line in stdin.lock().lines() {
        let Ok(line) = line else { continue };
        if line.trim().is_empty() {
            continue;
        }
        let msg: serde_json::Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "failed to parse JSON-RPC line, skipping");
                continue;
            }
        };

        let has_id = msg.get("id").is_some();
        if !has_id {
            continue;
        }
        let id = msg.get("id").cloned().unwrap_or(json!(null));
        let method = msg.get("method").and_then(|m| m.as_str()).unwrap_or("");
        let params = msg.get("params").cloned().unwrap_or(json!({}));

        let reply = match method {
            "initialize" => ok_result(
                id,
                json!({
                    "protocolVersion": params.get("protocolVersion").cloned().unwrap_or(json!("2024-11-05")),
                    "capabilities": { "tools": { "listChanged": true } },
                    "serverInfo": { "name": "cortexsearch", "version": env!("CARGO_PKG_VERSION") }
                }),
            ),
            "ping" => ok_result(id, json!({})),
            "tools/list" => state.tools_list(id),
            "tools/call" => {
                let name = params.get("name").and_then(|n| n.as_str()).unwrap_or("").to_string();
                let args = params.get("arguments").cloned().unwrap_or(json!({}));
                state.dispatch(id, &name, args).await
            }
            "resources/list" => ok_result(id, json!({ "resources": [] })),
            "prompts/list" => ok_result(id, json!({ "prompts": [] })),
            other => state.dispatch(id, other, params).await,
        };

        writeln!(stdout, "{}", reply)?;
        stdout.flush()?;
    }

    info!("stdin closed, stdio server exiting");
    Ok(())
}
