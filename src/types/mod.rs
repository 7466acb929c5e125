// Core data model shared by every pipeline stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Risk levels ordered lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// No meaningful risk.
    Safe,
    /// Reversible, low-impact operations.
    Low,
    /// Writes and network calls.
    Medium,
    /// System-level or privileged operations.
    High,
    /// Destructive operations — never executed.
    Critical,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Safe => f.write_str("safe"),
            Self::Low => f.write_str("low"),
            Self::Medium => f.write_str("medium"),
            Self::High => f.write_str("high"),
            Self::Critical => f.write_str("critical"),
        }
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "safe" => Ok(Self::Safe),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(anyhow::anyhow!("unknown risk level: {other}")),
        }
    }
}

/// The closed set of intent categories the classifier can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentCategory {
    FileRead,
    FileWrite,
    FileSearch,
    ShellCommand,
    NetworkRequest,
    GithubQuery,
    Automation,
    QueryKnowledge,
    MultiPc,
    MemoryRecall,
    CodeAnalysis,
    Planning,
    Unknown,
}

impl std::fmt::Display for IntentCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::FileRead => "file_read",
            Self::FileWrite => "file_write",
            Self::FileSearch => "file_search",
            Self::ShellCommand => "shell_command",
            Self::NetworkRequest => "network_request",
            Self::GithubQuery => "github_query",
            Self::Automation => "automation",
            Self::QueryKnowledge => "query_knowledge",
            Self::MultiPc => "multi_pc",
            Self::MemoryRecall => "memory_recall",
            Self::CodeAnalysis => "code_analysis",
            Self::Planning => "planning",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// The closed set of tool types the registry can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolType {
    Fs,
    Shell,
    Networking,
    Github,
    Mcp,
    Ai,
    Memory,
    Sdb,
    Automation,
    Peer,
}

impl std::fmt::Display for ToolType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Fs => "fs",
            Self::Shell => "shell",
            Self::Networking => "networking",
            Self::Github => "github",
            Self::Mcp => "mcp",
            Self::Ai => "ai",
            Self::Memory => "memory",
            Self::Sdb => "sdb",
            Self::Automation => "automation",
            Self::Peer => "peer",
        };
        f.write_str(s)
    }
}

/// Shell command categories used by the command classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommandType {
    Read,
    Write,
    Execute,
    System,
    Network,
}

/// Peer liveness as tracked by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerStatus {
    /// Reachable and accepting work.
    Online,
    /// Unreachable or stale.
    Offline,
    /// Recently failed or under load.
    Busy,
}

/// Complexity buckets for an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityLevel {
    Simple,
    Moderate,
    Complex,
}

/// Output rendering formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Markdown,
    Json,
    Code,
    Text,
}

/// How the executor should run the routes of a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// One route after another, stop on first failure.
    Sequential,
    /// All routes concurrently.
    Parallel,
    /// Priority-ordered; higher-priority routes first.
    Conditional,
}

// ── Stage results ───────────────────────────────────────────────

/// Result of the complexity check stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplexityResult {
    /// Bucketed complexity level.
    pub level: ComplexityLevel,
    /// Normalized score in [0, 1].
    pub score: f64,
    /// Human-readable explanation of the score.
    pub reasoning: String,
    /// Whether the full pipeline should run (false takes the fast path).
    pub should_use_pipeline: bool,
    /// Rough expected step count, when the score suggests one.
    pub estimated_steps: Option<u32>,
}

/// Entities extracted from the input, independent of classification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySet {
    /// Absolute and relative file paths.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
    /// `http(s)://` URLs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
    /// `@name` handles.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub github_users: Vec<String>,
    /// File extensions from the recognised list.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file_extensions: Vec<String>,
    /// Scoped package identifiers (`@scope/name`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<String>,
}

impl EntitySet {
    /// True when no entity of any kind was extracted.
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
            && self.urls.is_empty()
            && self.github_users.is_empty()
            && self.file_extensions.is_empty()
            && self.packages.is_empty()
    }
}

/// A secondary intent detected alongside the primary one.
///
/// Sub-intents never nest further.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubIntent {
    /// Category of the secondary intent.
    pub category: IntentCategory,
    /// Confidence in [0, 1].
    pub confidence: f64,
}

/// Result of the intent detection stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    /// Primary category.
    pub category: IntentCategory,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Entities extracted from the input.
    #[serde(default)]
    pub entities: EntitySet,
    /// Whether a competing category also scored highly.
    pub multi_intent: bool,
    /// Up to two secondary intents, present when `multi_intent` is set.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_intents: Vec<SubIntent>,
}

// ── Plans ───────────────────────────────────────────────────────

/// Typed parameters for a task step, one variant per tool operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StepParams {
    /// Read a file.
    FsRead {
        /// Path to read.
        path: String,
    },
    /// Write content to a file.
    FsWrite {
        /// Target path.
        path: String,
        /// Content to write.
        content: String,
    },
    /// Delete a file. Gated on the destructive-operations policy.
    FsDelete {
        /// Path to delete.
        path: String,
    },
    /// Search the filesystem.
    FsSearch {
        /// Free-text query.
        query: String,
        /// Extension filter; empty means all.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        extensions: Vec<String>,
    },
    /// Execute a shell command.
    ShellExec {
        /// The full command line.
        command: String,
        /// Working directory, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        /// Per-command timeout override in milliseconds.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    /// HTTP GET request.
    HttpGet {
        /// Target URL.
        url: String,
        /// Logical service tag (e.g. "github"), used for method routing.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        service: Option<String>,
    },
    /// Query a GitHub user or repository.
    GithubQuery {
        /// The `@handle` (without the `@`).
        handle: String,
    },
    /// Free-form model generation.
    AiGenerate {
        /// The prompt or query.
        query: String,
        /// Generation mode hint (e.g. "knowledge", "planning").
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<String>,
    },
    /// Model-backed source code analysis.
    CodeAnalysis {
        /// What to analyze.
        query: String,
    },
    /// Recall from the memory collaborator.
    MemoryRecall {
        /// Recall query.
        query: String,
    },
    /// Save to the memory collaborator.
    MemorySave {
        /// Content to persist.
        content: String,
    },
    /// Execute a command on a remote peer.
    PeerExecute {
        /// Command forwarded to the peer.
        command: String,
    },
    /// Run a host automation.
    AutomationRun {
        /// Natural-language instruction.
        instruction: String,
    },
    /// Several merged parameter sets executed as one batched call.
    Batch {
        /// Original parameter sets in merge order.
        batch: Vec<StepParams>,
    },
    /// Router error marker: the step could not be bound to any tool.
    Unroutable {
        /// Why no tool could serve the step.
        reason: String,
    },
}

/// A single node in an execution plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStep {
    /// Stable id, unique within the plan.
    pub id: String,
    /// Human description of the step.
    pub description: String,
    /// Tool that serves this step.
    pub tool: ToolType,
    /// Typed parameters.
    pub params: StepParams,
    /// Ids of sibling steps this one depends on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    /// Estimated duration in milliseconds.
    pub estimated_duration_ms: u64,
    /// Whether the step may run concurrently with its level peers.
    pub can_parallelize: bool,
    /// Priority in [1, 10]; higher runs earlier in conditional mode.
    pub priority: u8,
    /// Set by the optimizer when memory suggests a cached result exists.
    #[serde(default)]
    pub use_cache: bool,
}

/// A dependency graph of task steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Plan id.
    pub plan_id: String,
    /// Ordered steps; `dependencies` reference ids in this list only.
    pub steps: Vec<TaskStep>,
    /// Sum of sequential durations plus the max duration per parallel group.
    pub total_estimated_duration_ms: u64,
    /// Groups of step ids that may execute concurrently; each group has
    /// size ≥ 2 and all members share a dependency level.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parallel_groups: Vec<Vec<String>>,
}

impl ExecutionPlan {
    /// Look up a step by id.
    pub fn step(&self, id: &str) -> Option<&TaskStep> {
        self.steps.iter().find(|s| s.id == id)
    }
}

/// Output of the reasoning optimizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationResult {
    /// The plan as produced by the planner.
    pub original: ExecutionPlan,
    /// The plan after all transformations.
    pub optimized: ExecutionPlan,
    /// Human-readable descriptions of the transformations applied.
    pub applied: Vec<String>,
    /// Estimated duration improvement as a percentage, when positive.
    pub improvement_pct: Option<f64>,
}

/// Verdict of the safety engine for a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyCheck {
    /// Whether every step may execute.
    pub allowed: bool,
    /// Highest risk across all steps.
    pub risk_level: RiskLevel,
    /// Identified risks, one line each.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub risks: Vec<String>,
    /// Whether the user must confirm before execution.
    pub requires_confirmation: bool,
    /// Deterministic confirmation message listing risks and steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_message: Option<String>,
    /// Reasons steps were blocked, when `allowed` is false.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_reasons: Vec<String>,
}

// ── Routing & execution ─────────────────────────────────────────

/// A step bound to a concrete tool method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRoute {
    /// Id of the plan step this route serves.
    pub step_id: String,
    /// Target tool.
    pub tool: ToolType,
    /// Method name on the tool.
    pub method: String,
    /// Typed parameters forwarded to the executor function.
    pub params: StepParams,
    /// Secondary route tried when the primary tool is unavailable.
    /// Depth is exactly one: a fallback never has its own fallback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<Box<ToolRoute>>,
    /// Effective timeout in milliseconds.
    pub timeout_ms: u64,
    /// Retry attempts after the first failure.
    pub retries: u32,
}

/// Output of the routing stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// One route per plan step, in plan order.
    pub routes: Vec<ToolRoute>,
    /// How the executor should schedule the routes.
    pub execution_mode: ExecutionMode,
    /// True when any route's capability supports streaming.
    pub streaming_enabled: bool,
}

/// Outcome of a single tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Whether the invocation succeeded.
    pub success: bool,
    /// Tool output; `Null` on failure.
    pub data: serde_json::Value,
    /// Wall-clock execution time in milliseconds.
    pub execution_time_ms: u64,
    /// True when served from the executor cache.
    pub from_cache: bool,
    /// Number of retries actually performed.
    pub retry_count: u32,
    /// Last error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    /// Build a failed result with the given error message.
    pub fn failure(error: impl Into<String>, retry_count: u32, execution_time_ms: u64) -> Self {
        Self {
            success: false,
            data: serde_json::Value::Null,
            execution_time_ms,
            from_cache: false,
            retry_count,
            error: Some(error.into()),
        }
    }
}

/// A formatted, user-facing output body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormattedOutput {
    /// Rendering format.
    pub format: OutputFormat,
    /// The rendered body.
    pub content: String,
    /// Format metadata (detected language, aggregation counts).
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Whether this output describes an error.
    pub error: bool,
    /// The error message, when `error` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

// ── Registry & peers ────────────────────────────────────────────

/// Capability record describing a registered tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCapability {
    pub tool: ToolType,
    pub name: String,
    pub version: String,
    pub description: String,
    pub operations: Vec<String>,
    pub available: bool,
    pub supports_streaming: bool,
    pub timeout_ms: u64,
    pub retries: u32,
    pub priority: u8,
    pub dependencies: Vec<ToolType>,
    pub aliases: Vec<String>,
}

/// A remote executor known to the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerInfo {
    pub peer_id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub capabilities: Vec<String>,
    pub tools: Vec<String>,
    pub status: PeerStatus,
    pub last_seen: DateTime<Utc>,
    /// Current load in [0, 100].
    pub load: u8,
}

// ── Command validation ──────────────────────────────────────────

/// Classification verdict for a shell command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandClassification {
    /// Command category.
    pub command_type: CommandType,
    /// Assigned risk.
    pub risk: RiskLevel,
    /// True when a critical-blacklist pattern matched.
    pub dangerous: bool,
    /// True when the risk demands a confirmation step.
    pub requires_confirmation: bool,
}

/// One append-only audit record for a command decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// Unique entry id.
    pub id: Uuid,
    /// Decision time.
    pub timestamp: DateTime<Utc>,
    /// User the decision was made for.
    pub user_id: String,
    /// The command text.
    pub command: String,
    /// Classification at decision time.
    pub classification: CommandClassification,
    /// Whether execution was permitted.
    pub allowed: bool,
    /// Whether execution has been recorded as performed.
    pub executed: bool,
    /// Execution outcome, attached once via `record_execution`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

// ── Pipeline context & result ───────────────────────────────────

/// Per-request context owned by a single orchestrator invocation.
///
/// Stages read earlier slots and write their own; a slot is written
/// exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineContext {
    /// The raw user input.
    pub input: String,
    /// Requesting user, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Session the request belongs to, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// When processing started.
    pub started_at: DateTime<Utc>,
    /// Complexity check result.
    pub complexity: Option<ComplexityResult>,
    /// Intent detection result.
    pub intent: Option<Intent>,
    /// Generated plan.
    pub plan: Option<ExecutionPlan>,
    /// Optimizer output.
    pub optimization: Option<OptimizationResult>,
    /// Safety verdict.
    pub safety: Option<SafetyCheck>,
    /// Routing decision.
    pub routing: Option<RoutingDecision>,
    /// Recalled memory entries for this request.
    pub memory: Option<crate::memory::MemoryContext>,
}

impl PipelineContext {
    /// Create a fresh context for one request.
    pub fn new(input: &str, user_id: Option<String>, session_id: Option<String>) -> Self {
        Self {
            input: input.to_owned(),
            user_id,
            session_id,
            started_at: Utc::now(),
            complexity: None,
            intent: None,
            plan: None,
            optimization: None,
            safety: None,
            routing: None,
            memory: None,
        }
    }
}

/// Final result of one `process` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Whether the request completed without a stage failure or block.
    pub success: bool,
    /// The formatted output (an error rendering on failure).
    pub output: FormattedOutput,
    /// The request context with all stage slots filled as far as reached.
    pub context: PipelineContext,
    /// Total wall-clock time in milliseconds.
    pub execution_time_ms: u64,
    /// Per-step execution results, in completion order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps_executed: Vec<ExecutionResult>,
    /// Top-level error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
