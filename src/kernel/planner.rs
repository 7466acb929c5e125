//! Plan generation — turns an intent into a dependency graph of steps.
//!
//! Each intent category has a deterministic step template; sub-intent
//! steps are appended after the primary ones. Step ids are fresh per
//! invocation and dependencies only ever reference sibling ids, so the
//! resulting graph is acyclic by construction.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::memory::MemoryContext;
use crate::types::{
    EntitySet, ExecutionPlan, Intent, IntentCategory, StepParams, TaskStep, ToolType,
};

/// Default source extensions searched for code analysis when the input
/// names none.
const SOURCE_EXTENSIONS: &[&str] = &["rs", "py", "js", "ts", "go", "java"];

/// Inputs to one planning pass.
pub struct PlanRequest<'a> {
    /// Detected intent.
    pub intent: &'a Intent,
    /// The raw user input.
    pub input: &'a str,
    /// Recalled memory, when the retrieval stage ran.
    pub memory: Option<&'a MemoryContext>,
}

/// Deterministic per-category planner.
#[derive(Debug, Clone, Copy, Default)]
pub struct Planner;

impl Planner {
    /// Create a planner.
    pub fn new() -> Self {
        Self
    }

    /// Produce an execution plan for the request. Never fails: every
    /// category has a template and the `unknown` template always applies.
    pub fn plan(&self, request: &PlanRequest<'_>) -> ExecutionPlan {
        let mut builder = PlanBuilder::default();
        builder.push_category(
            request.intent.category,
            request.input,
            &request.intent.entities,
        );
        for sub in &request.intent.sub_intents {
            builder.push_category(sub.category, request.input, &request.intent.entities);
        }

        // Memory is advisory at this stage; the optimizer applies it.
        let _ = request.memory;

        let steps = builder.steps;
        let parallel_groups = compute_parallel_groups(&steps);
        let total_estimated_duration_ms = compute_total_duration(&steps, &parallel_groups);

        ExecutionPlan {
            plan_id: Uuid::new_v4().to_string(),
            steps,
            total_estimated_duration_ms,
            parallel_groups,
        }
    }
}

/// Accumulates steps with plan-unique ids.
#[derive(Default)]
struct PlanBuilder {
    steps: Vec<TaskStep>,
}

impl PlanBuilder {
    fn next_id(&self) -> String {
        format!("step_{}", self.steps.len().saturating_add(1))
    }

    fn push(
        &mut self,
        description: String,
        tool: ToolType,
        params: StepParams,
        dependencies: Vec<String>,
        duration_ms: u64,
        can_parallelize: bool,
        priority: u8,
    ) -> String {
        let id = self.next_id();
        self.steps.push(TaskStep {
            id: id.clone(),
            description,
            tool,
            params,
            dependencies,
            estimated_duration_ms: duration_ms,
            can_parallelize,
            priority,
            use_cache: false,
        });
        id
    }

    /// Append the template steps for one category.
    fn push_category(&mut self, category: IntentCategory, input: &str, entities: &EntitySet) {
        match category {
            IntentCategory::FileRead if !entities.paths.is_empty() => {
                for path in &entities.paths {
                    self.push(
                        format!("Read {path}"),
                        ToolType::Fs,
                        StepParams::FsRead { path: path.clone() },
                        Vec::new(),
                        500,
                        true,
                        5,
                    );
                }
            }
            IntentCategory::FileWrite => {
                let path = entities
                    .paths
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "output.txt".to_owned());
                self.push(
                    format!("Write {path}"),
                    ToolType::Fs,
                    StepParams::FsWrite {
                        path,
                        content: input.to_owned(),
                    },
                    Vec::new(),
                    500,
                    false,
                    5,
                );
            }
            IntentCategory::FileSearch => {
                self.push(
                    "Search files".to_owned(),
                    ToolType::Fs,
                    StepParams::FsSearch {
                        query: input.to_owned(),
                        extensions: entities.file_extensions.clone(),
                    },
                    Vec::new(),
                    2000,
                    true,
                    5,
                );
            }
            IntentCategory::ShellCommand => {
                self.push(
                    "Execute shell command".to_owned(),
                    ToolType::Shell,
                    StepParams::ShellExec {
                        command: input.trim().to_owned(),
                        cwd: None,
                        timeout_ms: None,
                    },
                    Vec::new(),
                    5000,
                    false,
                    5,
                );
            }
            IntentCategory::NetworkRequest if !entities.urls.is_empty() => {
                for url in &entities.urls {
                    self.push(
                        format!("GET {url}"),
                        ToolType::Networking,
                        StepParams::HttpGet {
                            url: url.clone(),
                            service: None,
                        },
                        Vec::new(),
                        3000,
                        true,
                        5,
                    );
                }
            }
            IntentCategory::GithubQuery if !entities.github_users.is_empty() => {
                for handle in &entities.github_users {
                    self.push(
                        format!("Query GitHub for @{handle}"),
                        ToolType::Networking,
                        StepParams::GithubQuery {
                            handle: handle.clone(),
                        },
                        Vec::new(),
                        3000,
                        true,
                        5,
                    );
                }
            }
            IntentCategory::CodeAnalysis => {
                let extensions = if entities.file_extensions.is_empty() {
                    SOURCE_EXTENSIONS.iter().map(|s| (*s).to_owned()).collect()
                } else {
                    entities.file_extensions.clone()
                };
                let search_id = self.push(
                    "Find source files".to_owned(),
                    ToolType::Fs,
                    StepParams::FsSearch {
                        query: input.to_owned(),
                        extensions,
                    },
                    Vec::new(),
                    2000,
                    true,
                    5,
                );
                self.push(
                    "Analyze source files".to_owned(),
                    ToolType::Ai,
                    StepParams::CodeAnalysis {
                        query: input.to_owned(),
                    },
                    vec![search_id],
                    8000,
                    false,
                    3,
                );
            }
            IntentCategory::MemoryRecall => {
                self.push(
                    "Recall from memory".to_owned(),
                    ToolType::Memory,
                    StepParams::MemoryRecall {
                        query: input.to_owned(),
                    },
                    Vec::new(),
                    1000,
                    true,
                    6,
                );
            }
            IntentCategory::QueryKnowledge => {
                let recall_id = self.push(
                    "Recall related context".to_owned(),
                    ToolType::Memory,
                    StepParams::MemoryRecall {
                        query: input.to_owned(),
                    },
                    Vec::new(),
                    1000,
                    true,
                    6,
                );
                self.push(
                    "Answer from knowledge".to_owned(),
                    ToolType::Ai,
                    StepParams::AiGenerate {
                        query: input.to_owned(),
                        mode: Some("knowledge".to_owned()),
                    },
                    vec![recall_id],
                    8000,
                    false,
                    3,
                );
            }
            IntentCategory::MultiPc => {
                self.push(
                    "Execute on peer".to_owned(),
                    ToolType::Peer,
                    StepParams::PeerExecute {
                        command: input.to_owned(),
                    },
                    Vec::new(),
                    10_000,
                    false,
                    5,
                );
            }
            IntentCategory::Automation => {
                self.push(
                    "Run automation".to_owned(),
                    ToolType::Automation,
                    StepParams::AutomationRun {
                        instruction: input.to_owned(),
                    },
                    Vec::new(),
                    5000,
                    false,
                    4,
                );
            }
            IntentCategory::Planning => {
                self.push(
                    "Draft a plan".to_owned(),
                    ToolType::Ai,
                    StepParams::AiGenerate {
                        query: input.to_owned(),
                        mode: Some("planning".to_owned()),
                    },
                    Vec::new(),
                    8000,
                    false,
                    3,
                );
            }
            // Unknown, and any template whose entities came up empty.
            _ => {
                self.push(
                    "Generate response".to_owned(),
                    ToolType::Ai,
                    StepParams::AiGenerate {
                        query: input.to_owned(),
                        mode: None,
                    },
                    Vec::new(),
                    8000,
                    false,
                    3,
                );
            }
        }
    }
}

// ── Graph helpers (shared with the optimizer) ───────────────────

/// Dependency level per step id: 0 for roots, else 1 + max parent level.
///
/// Iterates to a fixpoint so it stays correct even when the step list is
/// not topologically ordered. Unknown dependency ids count as level 0.
pub(crate) fn dependency_levels(steps: &[TaskStep]) -> HashMap<String, usize> {
    let mut levels: HashMap<String, usize> =
        steps.iter().map(|s| (s.id.clone(), 0usize)).collect();

    // A DAG of n nodes settles within n passes.
    for _ in 0..steps.len() {
        let mut changed = false;
        for step in steps {
            let level = step
                .dependencies
                .iter()
                .filter_map(|d| levels.get(d).copied())
                .max()
                .map_or(0, |m| m.saturating_add(1));
            if levels.get(&step.id) != Some(&level) {
                levels.insert(step.id.clone(), level);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    levels
}

/// Group parallelizable steps of identical dependency level; groups of
/// size ≤ 1 are dropped. No step id occurs in more than one group.
pub(crate) fn compute_parallel_groups(steps: &[TaskStep]) -> Vec<Vec<String>> {
    let levels = dependency_levels(steps);
    let mut by_level: HashMap<usize, Vec<String>> = HashMap::new();
    for step in steps {
        if step.can_parallelize {
            if let Some(level) = levels.get(&step.id) {
                by_level.entry(*level).or_default().push(step.id.clone());
            }
        }
    }
    let mut groups: Vec<(usize, Vec<String>)> = by_level
        .into_iter()
        .filter(|(_, ids)| ids.len() > 1)
        .collect();
    groups.sort_by_key(|(level, _)| *level);
    groups.into_iter().map(|(_, ids)| ids).collect()
}

/// Sum of sequential step durations plus the max duration per group.
pub(crate) fn compute_total_duration(steps: &[TaskStep], groups: &[Vec<String>]) -> u64 {
    let grouped: HashSet<&String> = groups.iter().flatten().collect();
    let mut total: u64 = 0;
    for step in steps {
        if !grouped.contains(&step.id) {
            total = total.saturating_add(step.estimated_duration_ms);
        }
    }
    for group in groups {
        let max = group
            .iter()
            .filter_map(|id| steps.iter().find(|s| &s.id == id))
            .map(|s| s.estimated_duration_ms)
            .max()
            .unwrap_or(0);
        total = total.saturating_add(max);
    }
    total
}

/// True when every dependency references a sibling id and the graph has
/// no cycle.
pub(crate) fn is_valid_dag(steps: &[TaskStep]) -> bool {
    let ids: HashSet<&String> = steps.iter().map(|s| &s.id).collect();
    if steps
        .iter()
        .any(|s| s.dependencies.iter().any(|d| !ids.contains(d)))
    {
        return false;
    }

    // Kahn-style: repeatedly remove steps whose deps are all removed.
    let mut remaining: HashMap<&String, &TaskStep> =
        steps.iter().map(|s| (&s.id, s)).collect();
    loop {
        let removable: Vec<String> = remaining
            .values()
            .filter(|s| s.dependencies.iter().all(|d| !remaining.contains_key(d)))
            .map(|s| s.id.clone())
            .collect();
        if removable.is_empty() {
            return remaining.is_empty();
        }
        for id in &removable {
            remaining.remove(id);
        }
    }
}

/// True when `step` transitively depends on `target`.
pub(crate) fn depends_on(steps: &[TaskStep], step_id: &str, target_id: &str) -> bool {
    let by_id: HashMap<&str, &TaskStep> = steps.iter().map(|s| (s.id.as_str(), s)).collect();
    let mut stack: Vec<&str> = vec![step_id];
    let mut seen: HashSet<&str> = HashSet::new();
    while let Some(current) = stack.pop() {
        if !seen.insert(current) {
            continue;
        }
        let Some(step) = by_id.get(current) else {
            continue;
        };
        for dep in &step.dependencies {
            if dep == target_id {
                return true;
            }
            stack.push(dep.as_str());
        }
    }
    false
}
