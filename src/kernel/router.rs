//! Tool routing — binds each plan step to a concrete tool method.
//!
//! Routing never fails: when a step's tool is unavailable the fallback
//! map is consulted (`github → networking`, `mcp → networking`,
//! `sdb → memory`); when that also comes up empty the route carries an
//! error marker that the executor surfaces as a failed result.

use std::sync::Arc;

use crate::types::{
    ExecutionMode, ExecutionPlan, RoutingDecision, StepParams, TaskStep, ToolCapability, ToolRoute,
    ToolType,
};

use crate::tools::ToolRegistry;

/// Secondary tool serving a type when the primary is unavailable.
fn fallback_tool(tool: ToolType) -> Option<ToolType> {
    match tool {
        ToolType::Github | ToolType::Mcp => Some(ToolType::Networking),
        ToolType::Sdb => Some(ToolType::Memory),
        _ => None,
    }
}

/// Method chosen for a tool/parameter pair.
fn method_for(tool: ToolType, params: &StepParams) -> String {
    let method = match (tool, params) {
        (ToolType::Fs, StepParams::FsRead { .. }) => "read",
        (ToolType::Fs, StepParams::FsWrite { .. }) => "write",
        (ToolType::Fs, StepParams::FsDelete { .. }) => "delete",
        (ToolType::Fs, StepParams::FsSearch { .. }) => "search",
        (_, StepParams::Batch { .. }) => "batch",
        (ToolType::Shell, _) => "execute",
        (ToolType::Networking, StepParams::GithubQuery { .. }) => "query_github",
        (
            ToolType::Networking,
            StepParams::HttpGet {
                service: Some(service),
                ..
            },
        ) if service == "github" => "query_github",
        (ToolType::Networking, _) => "get",
        (ToolType::Github, _) => "query",
        (ToolType::Mcp, _) => "call",
        (ToolType::Ai, StepParams::AiGenerate { mode: Some(mode), .. }) => return mode.clone(),
        (ToolType::Ai, StepParams::CodeAnalysis { .. }) => "code_analysis",
        (ToolType::Ai, _) => "generate",
        (ToolType::Memory, StepParams::MemorySave { .. }) => "save",
        (ToolType::Memory, _) => "recall",
        (ToolType::Sdb, _) => "query",
        (ToolType::Automation, _) => "run",
        (ToolType::Peer, _) => "execute_remote",
        (ToolType::Fs, _) => "read",
    };
    method.to_owned()
}

/// Binds plan steps to tool methods with per-tool defaults.
pub struct Router {
    registry: Arc<ToolRegistry>,
}

impl Router {
    /// Create a router over the registry.
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// Route every step of the plan and decide the execution mode.
    pub fn route(&self, plan: &ExecutionPlan) -> RoutingDecision {
        let routes: Vec<ToolRoute> = plan.steps.iter().map(|s| self.route_step(s)).collect();

        let execution_mode = execution_mode(plan);
        let streaming_enabled = routes.iter().any(|r| {
            self.registry
                .get(r.tool)
                .is_some_and(|c| c.supports_streaming)
        });

        RoutingDecision {
            routes,
            execution_mode,
            streaming_enabled,
        }
    }

    fn route_step(&self, step: &TaskStep) -> ToolRoute {
        let available = |tool: ToolType| self.registry.get(tool).filter(|c| c.available);

        if let Some(capability) = available(step.tool) {
            let fallback = fallback_tool(step.tool)
                .and_then(available)
                .map(|fb| Box::new(make_route(step, fb.tool, &fb)));
            let mut route = make_route(step, step.tool, &capability);
            route.fallback = fallback;
            return route;
        }

        if let Some(fb) = fallback_tool(step.tool).and_then(available) {
            tracing::debug!(step = %step.id, from = %step.tool, to = %fb.tool, "routing through fallback tool");
            return make_route(step, fb.tool, &fb);
        }

        tracing::warn!(step = %step.id, tool = %step.tool, "no tool available for step");
        ToolRoute {
            step_id: step.id.clone(),
            tool: step.tool,
            method: "unavailable".to_owned(),
            params: StepParams::Unroutable {
                reason: format!("tool '{}' is not available and has no fallback", step.tool),
            },
            fallback: None,
            timeout_ms: 0,
            retries: 0,
        }
    }
}

fn make_route(step: &TaskStep, tool: ToolType, capability: &ToolCapability) -> ToolRoute {
    ToolRoute {
        step_id: step.id.clone(),
        tool,
        method: method_for(tool, &step.params),
        params: step.params.clone(),
        fallback: None,
        timeout_ms: capability.timeout_ms,
        retries: capability.retries,
    }
}

/// `parallel` when groups exist or every step is independent in a
/// multi-step plan; `conditional` when priorities diverge; else
/// `sequential`.
fn execution_mode(plan: &ExecutionPlan) -> ExecutionMode {
    let all_independent = plan.steps.iter().all(|s| s.dependencies.is_empty());
    if !plan.parallel_groups.is_empty() || (all_independent && plan.steps.len() > 1) {
        return ExecutionMode::Parallel;
    }
    let priorities_differ = plan
        .steps
        .windows(2)
        .any(|pair| pair[0].priority != pair[1].priority);
    if priorities_differ {
        return ExecutionMode::Conditional;
    }
    ExecutionMode::Sequential
}
