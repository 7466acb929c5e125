//! In-process publish/subscribe for pipeline progress events.
//!
//! Every stage emits `start` and exactly one of `complete`/`error`; the
//! step-execution stage additionally emits `progress` per step.
//! Subscribers are invoked synchronously in registration order, and a
//! panicking listener never affects the pipeline.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// The named pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    ComplexityCheck,
    IntentDetection,
    MemoryRetrieval,
    PlanGeneration,
    ReasoningOptimization,
    SafetyCheck,
    ToolRouting,
    StepExecution,
    OutputAggregation,
    MemoryUpdate,
    MultiPcSync,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ComplexityCheck => "complexity_check",
            Self::IntentDetection => "intent_detection",
            Self::MemoryRetrieval => "memory_retrieval",
            Self::PlanGeneration => "plan_generation",
            Self::ReasoningOptimization => "reasoning_optimization",
            Self::SafetyCheck => "safety_check",
            Self::ToolRouting => "tool_routing",
            Self::StepExecution => "step_execution",
            Self::OutputAggregation => "output_aggregation",
            Self::MemoryUpdate => "memory_update",
            Self::MultiPcSync => "multi_pc_sync",
        };
        f.write_str(s)
    }
}

/// Event lifecycle status within a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Start,
    Progress,
    Complete,
    Error,
}

/// The closed set of event names the engine emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    /// A pipeline stage event (`complexity_check` … `multi_pc_sync`).
    Stage(PipelineStage),
    /// A request began processing.
    ProcessingStarted,
    /// A request finished processing.
    ProcessingCompleted,
    /// A request failed with an unexpected error.
    ProcessingError,
    /// A tool invocation completed.
    ToolExecuted,
    /// A tool invocation is being retried after a failure.
    ToolRetry,
    /// The broker is attempting a peer for a failover call.
    FailoverAttempt,
    /// A peer failed during a failover call.
    FailoverError,
    /// A peer was registered with the broker.
    PeerRegistered,
    /// A peer's status or load changed.
    PeerUpdated,
    /// The health monitor marked a peer offline.
    PeerUnhealthy,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stage(stage) => stage.fmt(f),
            Self::ProcessingStarted => f.write_str("processing-started"),
            Self::ProcessingCompleted => f.write_str("processing-completed"),
            Self::ProcessingError => f.write_str("processing-error"),
            Self::ToolExecuted => f.write_str("tool-executed"),
            Self::ToolRetry => f.write_str("tool-retry"),
            Self::FailoverAttempt => f.write_str("failover:attempt"),
            Self::FailoverError => f.write_str("failover:error"),
            Self::PeerRegistered => f.write_str("peer:registered"),
            Self::PeerUpdated => f.write_str("peer:updated"),
            Self::PeerUnhealthy => f.write_str("peer:unhealthy"),
        }
    }
}

/// A single typed event emitted by the engine.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineEvent {
    /// Event name.
    pub kind: EventKind,
    /// Lifecycle status.
    pub status: EventStatus,
    /// Stage- or component-specific payload.
    pub data: serde_json::Value,
    /// When the event was emitted.
    pub timestamp: DateTime<Utc>,
    /// Optional extra metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

type Listener = Box<dyn Fn(&PipelineEvent) + Send + Sync>;

/// Fan-out event bus shared by every component of one engine instance.
///
/// Emission is synchronous: `emit` returns once every subscriber has run.
/// Ordering therefore follows the emitting stage's own ordering.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<(Option<EventKind>, Listener)>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.listeners.read().map(|l| l.len()).unwrap_or(0);
        f.debug_struct("EventBus")
            .field("listener_count", &count)
            .finish()
    }
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every event.
    pub fn subscribe(&self, listener: impl Fn(&PipelineEvent) + Send + Sync + 'static) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.push((None, Box::new(listener)));
        }
    }

    /// Subscribe to a single event kind.
    pub fn on(&self, kind: EventKind, listener: impl Fn(&PipelineEvent) + Send + Sync + 'static) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.push((Some(kind), Box::new(listener)));
        }
    }

    /// Emit an event to all matching subscribers in registration order.
    pub fn emit(&self, kind: EventKind, status: EventStatus, data: serde_json::Value) {
        self.emit_with_metadata(kind, status, data, None);
    }

    /// Emit an event carrying extra metadata.
    pub fn emit_with_metadata(
        &self,
        kind: EventKind,
        status: EventStatus,
        data: serde_json::Value,
        metadata: Option<serde_json::Value>,
    ) {
        let event = PipelineEvent {
            kind,
            status,
            data,
            timestamp: Utc::now(),
            metadata,
        };
        let Ok(listeners) = self.listeners.read() else {
            return;
        };
        for (filter, listener) in listeners.iter() {
            if filter.map_or(true, |f| f == event.kind) {
                // A misbehaving listener must not take the pipeline down.
                let result = catch_unwind(AssertUnwindSafe(|| listener(&event)));
                if result.is_err() {
                    tracing::warn!(kind = %event.kind, "event listener panicked");
                }
            }
        }
    }

    /// Emit a stage event.
    pub fn emit_stage(&self, stage: PipelineStage, status: EventStatus, data: serde_json::Value) {
        self.emit(EventKind::Stage(stage), status, data);
    }
}
