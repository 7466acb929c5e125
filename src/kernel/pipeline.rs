//! Pipeline orchestration — drives the eight stages for one request.
//!
//! The orchestrator owns no global state: every collaborator is an
//! explicit service created by [`PipelineBuilder`] and shared by
//! reference, so test doubles drop in without process-wide singletons.
//! Stages run strictly sequentially; fan-out happens only inside the
//! step-execution stage. Every stage emits `start` and exactly one of
//! `complete`/`error` on the shared event bus.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::RuntimeConfig;
use crate::events::{EventBus, EventKind, EventStatus, PipelineStage};
use crate::kernel::broker::Broker;
use crate::kernel::command::CommandValidator;
use crate::kernel::complexity::ComplexityDetector;
use crate::kernel::executor::{CacheStats, ExecOptions, ToolExecutor};
use crate::kernel::intent::IntentClassifier;
use crate::kernel::optimizer::{OptimizeRequest, ReasoningOptimizer};
use crate::kernel::output::{OutputEngine, OutputRequest};
use crate::kernel::planner::{PlanRequest, Planner};
use crate::kernel::router::Router;
use crate::kernel::safety::SafetyEngine;
use crate::memory::{MemoryContext, MemoryStore, TaskRecord};
use crate::providers::ModelProvider;
use crate::tools::builtin::{register_builtin_tools, BuiltinToolSet};
use crate::tools::{RegistryStats, ToolRegistry};
use crate::types::{
    ExecutionMode, ExecutionResult, FormattedOutput, PipelineContext, PipelineResult, StepParams,
    ToolRoute, ToolType,
};

/// Friendly response for empty input; produced without any tool call.
const EMPTY_INPUT_RESPONSE: &str = "Hi! Tell me what you'd like me to do.";

/// Size of the fragments `process_streaming` delivers.
const STREAM_FRAGMENT_CHARS: usize = 64;

/// Orchestration errors. These never escape `process`; they become
/// error outputs.
#[derive(Debug, Error)]
enum StageError {
    /// The memory collaborator failed.
    #[error("memory stage failed: {0}")]
    Memory(String),
}

/// Combined statistics over the engine's services.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PipelineStats {
    /// Registry statistics.
    pub tools: RegistryStats,
    /// Executor cache statistics.
    pub cache: CacheStats,
    /// Whether the memory stages are active.
    pub memory_enabled: bool,
}

/// Builder wiring explicit services into a [`Pipeline`].
pub struct PipelineBuilder {
    config: RuntimeConfig,
    provider: Option<Arc<dyn ModelProvider>>,
    memory: Option<Arc<dyn MemoryStore>>,
}

impl PipelineBuilder {
    /// Start from a configuration.
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            provider: None,
            memory: None,
        }
    }

    /// Attach the model provider backing the `ai` tool.
    pub fn with_provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Attach the memory collaborator.
    pub fn with_memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Wire all services and produce the pipeline.
    pub fn build(self) -> Pipeline {
        let events = Arc::new(EventBus::new());
        let registry = Arc::new(ToolRegistry::new());
        let validator = Arc::new(CommandValidator::new(&self.config.commands));
        let broker = Arc::new(Broker::new(registry.clone(), events.clone()));

        if self.config.pipeline.auto_register_tools {
            let mut set = BuiltinToolSet::new(validator.clone());
            set.provider = self.provider.clone();
            set.memory = self.memory.clone();
            set.broker = Some(broker.clone());
            if let Err(e) = register_builtin_tools(&registry, set) {
                warn!(error = %e, "builtin tool registration failed");
            }
        }

        let executor = ToolExecutor::new(
            registry.clone(),
            events.clone(),
            Duration::from_millis(self.config.pipeline.cache_duration_ms),
        );
        let safety = SafetyEngine::new(self.config.safety.clone(), validator.clone());
        let router = Router::new(registry.clone());

        Pipeline {
            config: self.config,
            registry,
            executor,
            broker,
            events,
            detector: ComplexityDetector::new(),
            classifier: IntentClassifier::new(),
            planner: Planner::new(),
            optimizer: ReasoningOptimizer::new(),
            safety,
            router,
            output: OutputEngine::new(),
            validator,
            memory: self.memory,
        }
    }
}

/// The cognitive pipeline: one `process` call per request.
pub struct Pipeline {
    config: RuntimeConfig,
    registry: Arc<ToolRegistry>,
    executor: ToolExecutor,
    broker: Arc<Broker>,
    events: Arc<EventBus>,
    detector: ComplexityDetector,
    classifier: IntentClassifier,
    planner: Planner,
    optimizer: ReasoningOptimizer,
    safety: SafetyEngine,
    router: Router,
    output: OutputEngine,
    validator: Arc<CommandValidator>,
    memory: Option<Arc<dyn MemoryStore>>,
}

impl Pipeline {
    /// Process one request through the full stage sequence.
    pub async fn process(&self, input: &str) -> PipelineResult {
        let started = Instant::now();
        let mut context = PipelineContext::new(
            input,
            self.config.pipeline.user_id.clone(),
            self.config.pipeline.session_id.clone(),
        );

        self.events.emit(
            EventKind::ProcessingStarted,
            EventStatus::Start,
            json!({ "input_chars": input.chars().count() }),
        );

        // Stage 1: complexity check. The detector handles empty input
        // itself, so even a blank request goes through the stage.
        self.stage_start(PipelineStage::ComplexityCheck);
        let complexity = self.detector.detect(input);
        self.stage_complete(
            PipelineStage::ComplexityCheck,
            json!({ "level": complexity.level, "score": complexity.score }),
        );
        let fast_path = !complexity.should_use_pipeline;
        context.complexity = Some(complexity);

        if fast_path {
            return self.run_fast_path(context, started).await;
        }

        // Stage 2: intent detection.
        self.stage_start(PipelineStage::IntentDetection);
        let intent = self.classifier.detect(input);
        self.stage_complete(
            PipelineStage::IntentDetection,
            json!({ "category": intent.category, "confidence": intent.confidence }),
        );
        context.intent = Some(intent);

        // Stage 3: memory retrieval.
        if self.memory_enabled() {
            self.stage_start(PipelineStage::MemoryRetrieval);
            match self.recall_memory(input).await {
                Ok(memory) => {
                    self.stage_complete(
                        PipelineStage::MemoryRetrieval,
                        json!({ "entries": memory.entries.len() }),
                    );
                    context.memory = Some(memory);
                }
                Err(e) => {
                    self.stage_error(PipelineStage::MemoryRetrieval, &e);
                    return self.fail(context, e.to_string(), started);
                }
            }
        }

        // Stage 4: plan generation.
        self.stage_start(PipelineStage::PlanGeneration);
        let plan = self.planner.plan(&PlanRequest {
            intent: context.intent.as_ref().unwrap_or(&fallback_intent()),
            input,
            memory: context.memory.as_ref(),
        });
        self.stage_complete(
            PipelineStage::PlanGeneration,
            json!({ "plan_id": plan.plan_id, "steps": plan.steps.len() }),
        );
        context.plan = Some(plan);

        // Stage 5: reasoning optimization.
        self.stage_start(PipelineStage::ReasoningOptimization);
        let optimization = self.optimizer.optimize(&OptimizeRequest {
            plan: context.plan.as_ref().unwrap_or(&empty_plan()),
            memory: context.memory.as_ref(),
        });
        self.stage_complete(
            PipelineStage::ReasoningOptimization,
            json!({
                "applied": optimization.applied.len(),
                "improvement_pct": optimization.improvement_pct,
            }),
        );
        let optimized_plan = optimization.optimized.clone();
        context.optimization = Some(optimization);

        // Stage 6: safety check.
        self.stage_start(PipelineStage::SafetyCheck);
        let safety = self
            .safety
            .check(&optimized_plan, context.user_id.as_deref());
        self.stage_complete(
            PipelineStage::SafetyCheck,
            json!({ "allowed": safety.allowed, "risk": safety.risk_level }),
        );
        let blocked = !safety.allowed;
        let block_message = safety_block_message(&safety);
        context.safety = Some(safety);

        if blocked {
            info!(risk = %context.safety.as_ref().map(|s| s.risk_level).unwrap_or(crate::types::RiskLevel::Critical), "plan blocked by safety policy");
            let output = self.output.format(OutputRequest {
                content: Value::Null,
                format: None,
                error: true,
                error_message: Some(block_message),
                metadata: serde_json::Map::new(),
            });
            return self.finish(context, output, Vec::new(), false, Some("safety block".to_owned()), started);
        }

        // Stage 7: tool routing.
        self.stage_start(PipelineStage::ToolRouting);
        let routing = self.router.route(&optimized_plan);
        self.stage_complete(
            PipelineStage::ToolRouting,
            json!({
                "routes": routing.routes.len(),
                "mode": routing.execution_mode,
                "streaming": routing.streaming_enabled,
            }),
        );
        context.routing = Some(routing.clone());

        // Stage 8: step execution.
        self.stage_start(PipelineStage::StepExecution);
        let results = self.execute_routes(&routing.routes, routing.execution_mode).await;
        let all_succeeded = results.iter().all(|r| r.success);
        if all_succeeded {
            self.stage_complete(
                PipelineStage::StepExecution,
                json!({ "steps": results.len() }),
            );
        } else {
            self.events.emit_stage(
                PipelineStage::StepExecution,
                EventStatus::Error,
                json!({
                    "steps": results.len(),
                    "failed": results.iter().filter(|r| !r.success).count(),
                }),
            );
        }

        // Stage 9: output aggregation.
        self.stage_start(PipelineStage::OutputAggregation);
        let output = if all_succeeded {
            let aggregated = aggregate_results(&results);
            self.output.format(OutputRequest {
                content: aggregated,
                ..OutputRequest::default()
            })
        } else {
            self.output.format(OutputRequest {
                content: Value::Null,
                format: None,
                error: true,
                error_message: Some(failure_summary(&routing.routes, &results)),
                metadata: serde_json::Map::new(),
            })
        };
        self.stage_complete(
            PipelineStage::OutputAggregation,
            json!({ "format": output.format }),
        );

        // Stage 10: memory update.
        if self.memory_enabled() {
            self.stage_start(PipelineStage::MemoryUpdate);
            match self
                .save_memory(&context, &output, &results, all_succeeded, started)
                .await
            {
                Ok(()) => self.stage_complete(PipelineStage::MemoryUpdate, json!({})),
                Err(e) => {
                    // The output already exists; a failed save is logged
                    // but does not fail the request.
                    warn!(error = %e, "memory update failed");
                    self.stage_error(PipelineStage::MemoryUpdate, &e);
                }
            }
        }

        let error = if all_succeeded {
            None
        } else {
            Some("one or more steps failed".to_owned())
        };
        self.finish(context, output, results, all_succeeded, error, started)
    }

    /// Process a request, delivering output fragments in order through
    /// `on_chunk`. The full result is returned when the stream ends.
    pub async fn process_streaming(
        &self,
        input: &str,
        mut on_chunk: impl FnMut(&str) + Send,
    ) -> PipelineResult {
        let result = self.process(input).await;
        let chars: Vec<char> = result.output.content.chars().collect();
        for fragment in chars.chunks(STREAM_FRAGMENT_CHARS) {
            let fragment: String = fragment.iter().collect();
            on_chunk(&fragment);
        }
        result
    }

    /// Statistics over tools, cache, and memory.
    pub async fn get_stats(&self) -> PipelineStats {
        PipelineStats {
            tools: self.registry.stats(),
            cache: self.executor.cache_stats().await,
            memory_enabled: self.memory_enabled(),
        }
    }

    /// Drop all executor cache entries.
    pub async fn clear_caches(&self) {
        self.executor.clear_cache().await;
    }

    /// The shared tool registry.
    pub fn tool_registry(&self) -> Arc<ToolRegistry> {
        self.registry.clone()
    }

    /// The shared tool executor.
    pub fn tool_executor(&self) -> ToolExecutor {
        self.executor.clone()
    }

    /// The shared peer broker.
    pub fn broker(&self) -> Arc<Broker> {
        self.broker.clone()
    }

    /// The shared command validator (and its audit log).
    pub fn command_validator(&self) -> Arc<CommandValidator> {
        self.validator.clone()
    }

    /// The event bus for subscriptions.
    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    // ── internals ───────────────────────────────────────────────

    fn memory_enabled(&self) -> bool {
        self.config.pipeline.enable_memory && self.memory.is_some()
    }

    async fn recall_memory(&self, input: &str) -> Result<MemoryContext, StageError> {
        let Some(store) = &self.memory else {
            return Ok(MemoryContext::default());
        };
        let entries = store
            .recall(input)
            .await
            .map_err(|e| StageError::Memory(e.to_string()))?;
        Ok(MemoryContext { entries })
    }

    async fn save_memory(
        &self,
        context: &PipelineContext,
        output: &FormattedOutput,
        results: &[ExecutionResult],
        success: bool,
        started: Instant,
    ) -> Result<(), StageError> {
        let Some(store) = &self.memory else {
            return Ok(());
        };
        let record = TaskRecord {
            id: context
                .plan
                .as_ref()
                .map(|p| p.plan_id.clone())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            input: context.input.clone(),
            output: output.content.clone(),
            success,
            steps: u32::try_from(results.len()).unwrap_or(u32::MAX),
            execution_time_ms: elapsed_ms(started),
            timestamp: chrono::Utc::now(),
            user_id: context.user_id.clone(),
            session_id: context.session_id.clone(),
        };
        store
            .save_task(record)
            .await
            .map_err(|e| StageError::Memory(e.to_string()))
    }

    /// Fast path: the model answers directly through the registry's `ai`
    /// tool; the skipped stages still emit completion events. Empty
    /// input gets a canned response and skips the tool call too.
    async fn run_fast_path(&self, context: PipelineContext, started: Instant) -> PipelineResult {
        info!("taking fast path");
        for stage in [
            PipelineStage::IntentDetection,
            PipelineStage::MemoryRetrieval,
            PipelineStage::PlanGeneration,
            PipelineStage::ReasoningOptimization,
            PipelineStage::SafetyCheck,
            PipelineStage::ToolRouting,
        ] {
            self.stage_complete(stage, json!({ "skipped": true }));
        }

        // Nothing to generate from a blank request; answer directly so
        // no tool runs, while the stage events keep their shape.
        if context.input.trim().is_empty() {
            self.stage_start(PipelineStage::StepExecution);
            self.stage_complete(
                PipelineStage::StepExecution,
                json!({ "steps": 0, "skipped": true }),
            );

            self.stage_start(PipelineStage::OutputAggregation);
            let output = self.output.format(OutputRequest {
                content: Value::String(EMPTY_INPUT_RESPONSE.to_owned()),
                ..OutputRequest::default()
            });
            self.stage_complete(
                PipelineStage::OutputAggregation,
                json!({ "format": output.format }),
            );
            self.stage_complete(PipelineStage::MemoryUpdate, json!({ "skipped": true }));

            return self.finish(context, output, Vec::new(), true, None, started);
        }

        let capability = self.registry.get(ToolType::Ai);
        let route = ToolRoute {
            step_id: "fast_path".to_owned(),
            tool: ToolType::Ai,
            method: "generate".to_owned(),
            params: StepParams::AiGenerate {
                query: context.input.clone(),
                mode: None,
            },
            fallback: None,
            timeout_ms: capability.as_ref().map(|c| c.timeout_ms).unwrap_or(60_000),
            retries: capability.map(|c| c.retries).unwrap_or(0),
        };

        self.stage_start(PipelineStage::StepExecution);
        let result = self.executor.execute(&route, ExecOptions::default()).await;
        let success = result.success;
        if success {
            self.stage_complete(PipelineStage::StepExecution, json!({ "steps": 1 }));
        } else {
            self.events.emit_stage(
                PipelineStage::StepExecution,
                EventStatus::Error,
                json!({ "steps": 1, "failed": 1 }),
            );
        }

        self.stage_start(PipelineStage::OutputAggregation);
        let output = if success {
            self.output.format(OutputRequest {
                content: aggregate_results(std::slice::from_ref(&result)),
                ..OutputRequest::default()
            })
        } else {
            self.output.format(OutputRequest {
                content: Value::Null,
                format: None,
                error: true,
                error_message: result.error.clone(),
                metadata: serde_json::Map::new(),
            })
        };
        self.stage_complete(
            PipelineStage::OutputAggregation,
            json!({ "format": output.format }),
        );
        self.stage_complete(PipelineStage::MemoryUpdate, json!({ "skipped": true }));

        let error = result.error.clone();
        self.finish(context, output, vec![result], success, error, started)
    }

    async fn execute_routes(
        &self,
        routes: &[ToolRoute],
        mode: ExecutionMode,
    ) -> Vec<ExecutionResult> {
        let total = routes.len();
        let multi_pc = routes.iter().any(|r| r.tool == ToolType::Peer);
        if multi_pc {
            self.stage_start(PipelineStage::MultiPcSync);
        }

        for (index, route) in routes.iter().enumerate() {
            self.events.emit_stage(
                PipelineStage::StepExecution,
                EventStatus::Progress,
                step_progress(route, index, total, "started", 0.0),
            );
        }

        let results = match mode {
            ExecutionMode::Parallel => {
                self.executor
                    .execute_parallel(routes, ExecOptions::default())
                    .await
            }
            ExecutionMode::Sequential | ExecutionMode::Conditional => {
                self.executor
                    .execute_sequential(routes, ExecOptions::default())
                    .await
            }
        };

        for (index, result) in results.iter().enumerate() {
            let status = if result.success { "completed" } else { "failed" };
            let progress = progress_fraction(index, total);
            if let Some(route) = routes.get(index) {
                self.events.emit_stage(
                    PipelineStage::StepExecution,
                    EventStatus::Progress,
                    step_progress(route, index, total, status, progress),
                );
            }
        }

        if multi_pc {
            self.stage_complete(PipelineStage::MultiPcSync, json!({}));
        }
        results
    }

    fn finish(
        &self,
        context: PipelineContext,
        output: FormattedOutput,
        steps_executed: Vec<ExecutionResult>,
        success: bool,
        error: Option<String>,
        started: Instant,
    ) -> PipelineResult {
        let execution_time_ms = elapsed_ms(started);
        self.events.emit(
            EventKind::ProcessingCompleted,
            EventStatus::Complete,
            json!({ "success": success, "execution_time_ms": execution_time_ms }),
        );
        info!(success, execution_time_ms, "request processed");
        PipelineResult {
            success,
            output,
            context,
            execution_time_ms,
            steps_executed,
            error,
        }
    }

    fn fail(&self, context: PipelineContext, message: String, started: Instant) -> PipelineResult {
        self.events.emit(
            EventKind::ProcessingError,
            EventStatus::Error,
            json!({ "error": message }),
        );
        let output = self.output.format(OutputRequest {
            content: Value::Null,
            format: None,
            error: true,
            error_message: Some(message.clone()),
            metadata: serde_json::Map::new(),
        });
        self.finish(context, output, Vec::new(), false, Some(message), started)
    }

    fn stage_start(&self, stage: PipelineStage) {
        self.events
            .emit_stage(stage, EventStatus::Start, json!({}));
    }

    fn stage_complete(&self, stage: PipelineStage, data: Value) {
        self.events.emit_stage(stage, EventStatus::Complete, data);
    }

    fn stage_error(&self, stage: PipelineStage, error: &impl std::fmt::Display) {
        self.events.emit_stage(
            stage,
            EventStatus::Error,
            json!({ "error": error.to_string() }),
        );
    }
}

fn fallback_intent() -> crate::types::Intent {
    crate::types::Intent {
        category: crate::types::IntentCategory::Unknown,
        confidence: 0.5,
        entities: crate::types::EntitySet::default(),
        multi_intent: false,
        sub_intents: Vec::new(),
    }
}

fn empty_plan() -> crate::types::ExecutionPlan {
    crate::types::ExecutionPlan {
        plan_id: String::new(),
        steps: Vec::new(),
        total_estimated_duration_ms: 0,
        parallel_groups: Vec::new(),
    }
}

fn step_progress(route: &ToolRoute, index: usize, total: usize, status: &str, progress: f64) -> Value {
    json!({
        "step_id": route.step_id,
        "step_index": index,
        "total_steps": total,
        "status": status,
        "progress": progress,
    })
}

fn progress_fraction(index: usize, total: usize) -> f64 {
    if total == 0 {
        return 1.0;
    }
    let done = u32::try_from(index.saturating_add(1)).unwrap_or(u32::MAX);
    let total = u32::try_from(total).unwrap_or(u32::MAX);
    f64::from(done) / f64::from(total)
}

/// Collapse step results into renderable content.
///
/// A single text-bearing result renders as its text; anything else
/// renders as a structured summary.
fn aggregate_results(results: &[ExecutionResult]) -> Value {
    if results.len() == 1 {
        let data = &results[0].data;
        if let Some(text) = data.get("text").and_then(Value::as_str) {
            return Value::String(text.to_owned());
        }
        if let Some(content) = data.get("content").and_then(Value::as_str) {
            return Value::String(content.to_owned());
        }
        return data.clone();
    }
    json!({
        "steps": results.len(),
        "results": results.iter().map(|r| &r.data).collect::<Vec<_>>(),
    })
}

fn failure_summary(routes: &[ToolRoute], results: &[ExecutionResult]) -> String {
    let mut lines = vec!["Some steps failed:".to_owned()];
    for (index, result) in results.iter().enumerate() {
        if result.success {
            continue;
        }
        let step = routes
            .get(index)
            .map(|r| r.step_id.clone())
            .unwrap_or_else(|| format!("#{index}"));
        let reason = result.error.clone().unwrap_or_else(|| "unknown".to_owned());
        lines.push(format!("- {step}: {reason}"));
    }
    lines.join("\n")
}

fn safety_block_message(safety: &crate::types::SafetyCheck) -> String {
    let mut message = String::new();
    if let Some(confirmation) = &safety.confirmation_message {
        message.push_str(confirmation);
    }
    if !safety.blocked_reasons.is_empty() {
        message.push_str("\n\nBlocked:\n");
        for reason in &safety.blocked_reasons {
            message.push_str(&format!("- {reason}\n"));
        }
    }
    if message.is_empty() {
        message = "The request was blocked by the safety policy.".to_owned();
    }
    message
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
