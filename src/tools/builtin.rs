//! Default tool set: capability records and local executor functions.
//!
//! The ten closed-set capabilities carry the default timeouts, retries,
//! priorities, and aliases the router and executor rely on. Local
//! executors are provided for `fs`, `shell`, `networking`, `ai`,
//! `memory`, and `peer`; `github`, `mcp`, `sdb`, and `automation`
//! register unavailable by default so routing falls back to the tools
//! that cover them, until a host attaches real executors.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::kernel::broker::Broker;
use crate::kernel::command::CommandValidator;
use crate::memory::{MemoryStore, TaskRecord};
use crate::providers::{GenerationRequest, ModelProvider};
use crate::tools::registry::{RegistryError, ToolRegistry};
use crate::tools::{ToolError, ToolHandler};
use crate::types::{StepParams, ToolCapability, ToolType};

/// Cap on file content returned by `fs.read`.
const MAX_READ_BYTES: usize = 65_536;
/// Cap on HTTP body bytes returned by `networking.get`.
const MAX_BODY_BYTES: usize = 16_384;
/// Cap on files returned by `fs.search`.
const MAX_SEARCH_RESULTS: usize = 200;
/// Directory depth limit for `fs.search`.
const MAX_SEARCH_DEPTH: usize = 5;

/// Collaborators wired into the builtin tool set.
pub struct BuiltinToolSet {
    /// Shared command validator; shell executions are gated through it.
    pub validator: Arc<CommandValidator>,
    /// Model provider backing the `ai` tool, when configured.
    pub provider: Option<Arc<dyn ModelProvider>>,
    /// Memory store backing the `memory` tool, when configured.
    pub memory: Option<Arc<dyn MemoryStore>>,
    /// Broker backing the `peer` tool, when configured.
    pub broker: Option<Arc<Broker>>,
    /// Permissions granted to locally executed shell commands.
    pub shell_permissions: HashSet<String>,
    /// User recorded on shell audit entries.
    pub user_id: String,
    /// Root directory for `fs.search`.
    pub search_root: PathBuf,
}

impl BuiltinToolSet {
    /// Default collaborator wiring around a command validator.
    pub fn new(validator: Arc<CommandValidator>) -> Self {
        Self {
            validator,
            provider: None,
            memory: None,
            broker: None,
            shell_permissions: ["shell:read", "shell:execute", "network:execute"]
                .iter()
                .map(|p| (*p).to_owned())
                .collect(),
            user_id: "local".to_owned(),
            search_root: PathBuf::from("."),
        }
    }
}

/// The default capability record for a tool type.
pub fn default_capability(tool: ToolType) -> ToolCapability {
    let (description, operations, aliases, deps, timeout_ms, retries, priority, streaming): (
        &str,
        &[&str],
        &[&str],
        &[ToolType],
        u64,
        u32,
        u8,
        bool,
    ) = match tool {
        ToolType::Fs => (
            "Local filesystem operations",
            &["read", "write", "delete", "search"],
            &["filesystem", "file"],
            &[],
            10_000,
            2,
            8,
            false,
        ),
        ToolType::Shell => (
            "Validated shell command execution",
            &["execute"],
            &["terminal", "bash"],
            &[],
            30_000,
            0,
            7,
            false,
        ),
        ToolType::Networking => (
            "HTTP requests and service queries",
            &["get", "query_github"],
            &["http", "net"],
            &[],
            15_000,
            2,
            6,
            false,
        ),
        ToolType::Github => (
            "GitHub lookups",
            &["query"],
            &["gh"],
            &[ToolType::Networking],
            15_000,
            2,
            5,
            false,
        ),
        ToolType::Mcp => (
            "Model context protocol calls",
            &["call"],
            &[],
            &[ToolType::Networking],
            20_000,
            1,
            4,
            false,
        ),
        ToolType::Ai => (
            "Model-backed generation and analysis",
            &["generate", "code_analysis"],
            &["llm", "model"],
            &[],
            60_000,
            1,
            9,
            true,
        ),
        ToolType::Memory => (
            "Recall and persistence of task memory",
            &["recall", "save"],
            &["working-memory"],
            &[],
            5_000,
            1,
            6,
            false,
        ),
        ToolType::Sdb => (
            "Semantic database queries",
            &["query"],
            &["semanticdb"],
            &[ToolType::Memory],
            10_000,
            1,
            3,
            false,
        ),
        ToolType::Automation => (
            "Host automation runs",
            &["run"],
            &["workflow"],
            &[],
            30_000,
            0,
            4,
            false,
        ),
        ToolType::Peer => (
            "Remote execution on broker peers",
            &["execute_remote"],
            &["remote", "multipc"],
            &[],
            30_000,
            1,
            5,
            false,
        ),
    };
    ToolCapability {
        tool,
        name: tool.to_string(),
        version: "1.0.0".to_owned(),
        description: description.to_owned(),
        operations: operations.iter().map(|o| (*o).to_owned()).collect(),
        available: true,
        supports_streaming: streaming,
        timeout_ms,
        retries,
        priority,
        dependencies: deps.to_vec(),
        aliases: aliases.iter().map(|a| (*a).to_owned()).collect(),
    }
}

/// Register the full default tool set.
///
/// Tools whose collaborator is absent register as unavailable, which the
/// router resolves through its fallback map where one exists.
pub fn register_builtin_tools(
    registry: &ToolRegistry,
    set: BuiltinToolSet,
) -> Result<(), RegistryError> {
    let fs = Arc::new(FsTool {
        search_root: set.search_root.clone(),
    });
    registry.register(default_capability(ToolType::Fs), fs)?;

    let shell = Arc::new(ShellTool {
        validator: set.validator.clone(),
        permissions: set.shell_permissions.clone(),
        user_id: set.user_id.clone(),
    });
    registry.register(default_capability(ToolType::Shell), shell)?;

    let http = Arc::new(HttpTool {
        client: reqwest::Client::new(),
    });
    registry.register(default_capability(ToolType::Networking), http)?;

    let mut ai_cap = default_capability(ToolType::Ai);
    ai_cap.available = set.provider.is_some();
    registry.register(
        ai_cap,
        Arc::new(AiTool {
            provider: set.provider,
        }),
    )?;

    let mut memory_cap = default_capability(ToolType::Memory);
    memory_cap.available = set.memory.is_some();
    registry.register(memory_cap, Arc::new(MemoryTool { store: set.memory }))?;

    let mut peer_cap = default_capability(ToolType::Peer);
    peer_cap.available = set.broker.is_some();
    registry.register(peer_cap, Arc::new(PeerTool { broker: set.broker }))?;

    for tool in [
        ToolType::Github,
        ToolType::Mcp,
        ToolType::Sdb,
        ToolType::Automation,
    ] {
        let mut cap = default_capability(tool);
        cap.available = false;
        registry.register(cap, Arc::new(StubTool { tool }))?;
    }

    Ok(())
}

// ── fs ──────────────────────────────────────────────────────────

struct FsTool {
    search_root: PathBuf,
}

#[async_trait]
impl ToolHandler for FsTool {
    async fn call(&self, method: &str, params: StepParams) -> Result<Value, ToolError> {
        match params {
            StepParams::FsRead { path } => self.read(&path).await,
            StepParams::FsWrite { path, content } => self.write(&path, &content).await,
            StepParams::FsDelete { path } => self.delete(&path).await,
            StepParams::FsSearch { query, extensions } => self.search(&query, &extensions).await,
            StepParams::Batch { batch } => {
                let mut results = Vec::new();
                for inner in batch {
                    results.push(Box::pin(self.call(method, inner)).await?);
                }
                Ok(json!({ "batch": results }))
            }
            other => Err(ToolError::InvalidParams {
                method: method.to_owned(),
                reason: format!("unexpected params: {other:?}"),
            }),
        }
    }
}

impl FsTool {
    async fn read(&self, path: &str) -> Result<Value, ToolError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(ToolError::failed)?;
        let truncated: String = content.chars().take(MAX_READ_BYTES).collect();
        Ok(json!({
            "path": path,
            "content": truncated,
            "bytes": content.len(),
        }))
    }

    async fn write(&self, path: &str, content: &str) -> Result<Value, ToolError> {
        tokio::fs::write(path, content)
            .await
            .map_err(ToolError::failed)?;
        Ok(json!({ "path": path, "bytes_written": content.len() }))
    }

    async fn delete(&self, path: &str) -> Result<Value, ToolError> {
        tokio::fs::remove_file(path)
            .await
            .map_err(ToolError::failed)?;
        Ok(json!({ "path": path, "deleted": true }))
    }

    /// Bounded name scan under the search root.
    async fn search(&self, query: &str, extensions: &[String]) -> Result<Value, ToolError> {
        let tokens: Vec<String> = query
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .collect();
        let mut matches = Vec::new();
        let mut queue = vec![(self.search_root.clone(), 0usize)];

        while let Some((dir, depth)) = queue.pop() {
            if depth > MAX_SEARCH_DEPTH || matches.len() >= MAX_SEARCH_RESULTS {
                break;
            }
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                let name = entry.file_name().to_string_lossy().to_lowercase();
                if path.is_dir() {
                    if !name.starts_with('.') {
                        queue.push((path, depth.saturating_add(1)));
                    }
                    continue;
                }
                let ext_ok = extensions.is_empty()
                    || path
                        .extension()
                        .and_then(|e| e.to_str())
                        .is_some_and(|e| extensions.iter().any(|x| x == e));
                let name_ok = tokens.is_empty() || tokens.iter().any(|t| name.contains(t));
                if ext_ok && name_ok && matches.len() < MAX_SEARCH_RESULTS {
                    matches.push(path.to_string_lossy().to_string());
                }
            }
        }

        Ok(json!({ "matches": matches, "count": matches.len() }))
    }
}

// ── shell ───────────────────────────────────────────────────────

struct ShellTool {
    validator: Arc<CommandValidator>,
    permissions: HashSet<String>,
    user_id: String,
}

#[async_trait]
impl ToolHandler for ShellTool {
    async fn call(&self, method: &str, params: StepParams) -> Result<Value, ToolError> {
        let StepParams::ShellExec { command, cwd, .. } = params else {
            return Err(ToolError::InvalidParams {
                method: method.to_owned(),
                reason: "expected shell parameters".to_owned(),
            });
        };

        let decision = self
            .validator
            .validate(&command, &self.user_id, &self.permissions);
        if !decision.allowed {
            let reason = decision
                .denial
                .map(|d| d.to_string())
                .unwrap_or_else(|| "denied".to_owned());
            return Err(ToolError::Denied(reason));
        }

        let mut process = tokio::process::Command::new("sh");
        process.arg("-c").arg(&command);
        if let Some(cwd) = cwd {
            process.current_dir(cwd);
        }
        let output = process.output().await.map_err(ToolError::failed)?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);
        self.validator
            .record_execution(decision.audit_id, &format!("exit {exit_code}"));

        Ok(json!({
            "command": command,
            "exit_code": exit_code,
            "stdout": truncate(&stdout, MAX_BODY_BYTES),
            "stderr": truncate(&stderr, MAX_BODY_BYTES),
        }))
    }
}

// ── networking ──────────────────────────────────────────────────

struct HttpTool {
    client: reqwest::Client,
}

#[async_trait]
impl ToolHandler for HttpTool {
    async fn call(&self, method: &str, params: StepParams) -> Result<Value, ToolError> {
        match params {
            StepParams::HttpGet { url, .. } => self.get(&url).await,
            StepParams::GithubQuery { handle } => {
                self.get(&format!("https://api.github.com/users/{handle}"))
                    .await
            }
            other => Err(ToolError::InvalidParams {
                method: method.to_owned(),
                reason: format!("unexpected params: {other:?}"),
            }),
        }
    }
}

impl HttpTool {
    async fn get(&self, url: &str) -> Result<Value, ToolError> {
        let response = self
            .client
            .get(url)
            .header("user-agent", "straylight")
            .send()
            .await
            .map_err(ToolError::failed)?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        let body = response.text().await.map_err(ToolError::failed)?;
        Ok(json!({
            "url": url,
            "status": status,
            "content_type": content_type,
            "body": truncate(&body, MAX_BODY_BYTES),
        }))
    }
}

// ── ai ──────────────────────────────────────────────────────────

struct AiTool {
    provider: Option<Arc<dyn ModelProvider>>,
}

#[async_trait]
impl ToolHandler for AiTool {
    async fn call(&self, method: &str, params: StepParams) -> Result<Value, ToolError> {
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| ToolError::Failed("no model provider configured".to_owned()))?;

        let request = match params {
            StepParams::AiGenerate { query, mode } => {
                let mut request = GenerationRequest::new(query);
                request.mode = mode;
                request
            }
            StepParams::CodeAnalysis { query } => GenerationRequest::new(format!(
                "Analyze the code relevant to this request and report findings:\n{query}"
            ))
            .with_mode("code_analysis"),
            other => {
                return Err(ToolError::InvalidParams {
                    method: method.to_owned(),
                    reason: format!("unexpected params: {other:?}"),
                })
            }
        };

        let text = provider
            .generate(request)
            .await
            .map_err(ToolError::failed)?;
        Ok(json!({ "text": text }))
    }
}

// ── memory ──────────────────────────────────────────────────────

struct MemoryTool {
    store: Option<Arc<dyn MemoryStore>>,
}

#[async_trait]
impl ToolHandler for MemoryTool {
    async fn call(&self, method: &str, params: StepParams) -> Result<Value, ToolError> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| ToolError::Failed("no memory store configured".to_owned()))?;

        match params {
            StepParams::MemoryRecall { query } => {
                let entries = store.recall(&query).await.map_err(ToolError::failed)?;
                let count = entries.len();
                Ok(json!({ "entries": entries, "count": count }))
            }
            StepParams::MemorySave { content } => {
                let record = TaskRecord {
                    id: uuid::Uuid::new_v4().to_string(),
                    input: content,
                    output: String::new(),
                    success: true,
                    steps: 0,
                    execution_time_ms: 0,
                    timestamp: chrono::Utc::now(),
                    user_id: None,
                    session_id: None,
                };
                store.save_task(record).await.map_err(ToolError::failed)?;
                Ok(json!({ "saved": true }))
            }
            other => Err(ToolError::InvalidParams {
                method: method.to_owned(),
                reason: format!("unexpected params: {other:?}"),
            }),
        }
    }
}

// ── peer ────────────────────────────────────────────────────────

struct PeerTool {
    broker: Option<Arc<Broker>>,
}

#[async_trait]
impl ToolHandler for PeerTool {
    async fn call(&self, method: &str, params: StepParams) -> Result<Value, ToolError> {
        let broker = self
            .broker
            .as_ref()
            .ok_or_else(|| ToolError::Failed("no broker configured".to_owned()))?;

        let StepParams::PeerExecute { command } = params else {
            return Err(ToolError::InvalidParams {
                method: method.to_owned(),
                reason: "expected peer parameters".to_owned(),
            });
        };

        broker
            .call_tool_with_failover("shell", json!({ "command": command }), 3)
            .await
            .map_err(ToolError::failed)
    }
}

// ── stubs ───────────────────────────────────────────────────────

/// Placeholder for capabilities without a local executor.
struct StubTool {
    tool: ToolType,
}

#[async_trait]
impl ToolHandler for StubTool {
    async fn call(&self, _method: &str, _params: StepParams) -> Result<Value, ToolError> {
        Err(ToolError::Failed(format!(
            "no local executor for tool '{}'",
            self.tool
        )))
    }
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
