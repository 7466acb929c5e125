//! Reasoning optimization — rewrites a plan without changing its meaning.
//!
//! Four structural transformations run in a fixed order (deduplicate,
//! merge, reorder, regroup), then memory-informed caching marks steps
//! whose results likely already exist. Each transformation is
//! idempotent, so optimizing an already-optimized plan is a no-op.

use std::collections::{HashMap, HashSet};

use crate::kernel::planner::{compute_parallel_groups, compute_total_duration, depends_on};
use crate::memory::MemoryContext;
use crate::types::{ExecutionPlan, OptimizationResult, StepParams, TaskStep, ToolType};

/// Inputs to one optimization pass.
pub struct OptimizeRequest<'a> {
    /// The plan to optimize.
    pub plan: &'a ExecutionPlan,
    /// Recalled memory, when the retrieval stage ran.
    pub memory: Option<&'a MemoryContext>,
}

/// Plan optimizer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReasoningOptimizer;

impl ReasoningOptimizer {
    /// Create an optimizer.
    pub fn new() -> Self {
        Self
    }

    /// Apply all transformations and report what changed.
    pub fn optimize(&self, request: &OptimizeRequest<'_>) -> OptimizationResult {
        let original = request.plan.clone();
        let mut steps = original.steps.clone();
        let mut applied = Vec::new();

        deduplicate(&mut steps, &mut applied);

        // Steps already covered by a parallel group run concurrently as
        // they are; batching them would serialize the group and change
        // the routing mode. Merge only targets ungrouped steps.
        let grouped: HashSet<String> = original
            .parallel_groups
            .iter()
            .flatten()
            .cloned()
            .collect();
        merge_consecutive(&mut steps, &grouped, &mut applied);

        reorder_by_priority(&mut steps, &mut applied);

        let parallel_groups = compute_parallel_groups(&steps);
        if parallel_groups != original.parallel_groups {
            applied.push(format!(
                "Recomputed parallel groups: {} group(s)",
                parallel_groups.len()
            ));
        }

        if let Some(memory) = request.memory {
            apply_memory_caching(&mut steps, memory, &mut applied);
        }

        let total_estimated_duration_ms = compute_total_duration(&steps, &parallel_groups);

        let improvement_pct = if total_estimated_duration_ms < original.total_estimated_duration_ms
            && original.total_estimated_duration_ms > 0
        {
            let saved = original
                .total_estimated_duration_ms
                .saturating_sub(total_estimated_duration_ms);
            Some(duration_f64(saved) / duration_f64(original.total_estimated_duration_ms) * 100.0)
        } else {
            None
        };

        let optimized = ExecutionPlan {
            plan_id: original.plan_id.clone(),
            steps,
            total_estimated_duration_ms,
            parallel_groups,
        };

        OptimizationResult {
            original,
            optimized,
            applied,
            improvement_pct,
        }
    }
}

/// Canonical identity of a step: tool, description, and JSON parameters.
fn canonical_key(step: &TaskStep) -> String {
    let params = serde_json::to_string(&step.params).unwrap_or_default();
    format!("{}|{}|{}", step.tool, step.description, params)
}

/// Drop duplicate steps; dependencies on a dropped id are rewritten to
/// the first occurrence.
fn deduplicate(steps: &mut Vec<TaskStep>, applied: &mut Vec<String>) {
    let mut first_by_key: HashMap<String, String> = HashMap::new();
    let mut replaced: HashMap<String, String> = HashMap::new();
    let mut kept = Vec::with_capacity(steps.len());

    for step in steps.drain(..) {
        let key = canonical_key(&step);
        match first_by_key.get(&key) {
            Some(first_id) => {
                applied.push(format!(
                    "Removed duplicate step '{}' (kept {first_id})",
                    step.id
                ));
                replaced.insert(step.id.clone(), first_id.clone());
            }
            None => {
                first_by_key.insert(key, step.id.clone());
                kept.push(step);
            }
        }
    }

    for step in kept.iter_mut() {
        for dep in step.dependencies.iter_mut() {
            if let Some(target) = replaced.get(dep) {
                target.clone_into(dep);
            }
        }
        step.dependencies.dedup();
    }
    *steps = kept;
}

/// Fuse maximal runs of consecutive dependency-free parallelizable steps
/// sharing a tool into one batched step. Existing batches flatten, so a
/// second pass finds nothing left to fuse.
fn merge_consecutive(
    steps: &mut Vec<TaskStep>,
    grouped: &HashSet<String>,
    applied: &mut Vec<String>,
) {
    let mergeable =
        |s: &TaskStep| s.can_parallelize && s.dependencies.is_empty() && !grouped.contains(&s.id);

    let mut result: Vec<TaskStep> = Vec::with_capacity(steps.len());
    let mut renamed: HashMap<String, String> = HashMap::new();
    let mut run: Vec<TaskStep> = Vec::new();

    let flush = |run: &mut Vec<TaskStep>,
                 result: &mut Vec<TaskStep>,
                 renamed: &mut HashMap<String, String>,
                 applied: &mut Vec<String>| {
        if run.len() > 1 {
            let tool = run[0].tool;
            let merged_id = run[0].id.clone();
            let duration = run.iter().map(|s| s.estimated_duration_ms).max().unwrap_or(0);
            let priority = run.iter().map(|s| s.priority).max().unwrap_or(1);
            let mut batch = Vec::new();
            for step in run.iter() {
                renamed.insert(step.id.clone(), merged_id.clone());
                match &step.params {
                    StepParams::Batch { batch: inner } => batch.extend(inner.clone()),
                    other => batch.push(other.clone()),
                }
            }
            applied.push(format!(
                "Merged {} {tool} steps into batch '{merged_id}'",
                run.len()
            ));
            result.push(TaskStep {
                id: merged_id,
                description: format!("Batched {tool} ({} operations)", batch.len()),
                tool,
                params: StepParams::Batch { batch },
                dependencies: Vec::new(),
                estimated_duration_ms: duration,
                can_parallelize: true,
                priority,
                use_cache: false,
            });
        } else {
            result.append(run);
        }
        run.clear();
    };

    for step in steps.drain(..) {
        let continues_run = run
            .last()
            .is_some_and(|prev| prev.tool == step.tool && mergeable(prev) && mergeable(&step));
        if !continues_run {
            flush(&mut run, &mut result, &mut renamed, applied);
        }
        run.push(step);
    }
    flush(&mut run, &mut result, &mut renamed, applied);

    for step in result.iter_mut() {
        for dep in step.dependencies.iter_mut() {
            if let Some(target) = renamed.get(dep) {
                target.clone_into(dep);
            }
        }
        step.dependencies.dedup();
    }
    *steps = result;
}

/// Stable priority bubble: for each pair `(i, j)` with `i < j`, swap when
/// `j` has strictly higher priority and does not transitively depend on `i`.
fn reorder_by_priority(steps: &mut [TaskStep], applied: &mut Vec<String>) {
    let mut swapped_any = false;
    for i in 0..steps.len() {
        for j in i.saturating_add(1)..steps.len() {
            if steps[j].priority > steps[i].priority {
                let j_id = steps[j].id.clone();
                let i_id = steps[i].id.clone();
                if !depends_on(steps, &j_id, &i_id) {
                    steps.swap(i, j);
                    swapped_any = true;
                }
            }
        }
    }
    if swapped_any {
        applied.push("Reordered steps by priority".to_owned());
    }
}

/// Mark fs steps whose descriptions match recalled memory as cacheable
/// and shrink their estimated duration to one tenth.
fn apply_memory_caching(steps: &mut [TaskStep], memory: &MemoryContext, applied: &mut Vec<String>) {
    for step in steps.iter_mut() {
        if step.tool != ToolType::Fs || step.use_cache {
            continue;
        }
        let description = step.description.to_lowercase();
        let matched = memory.entries.iter().any(|entry| {
            let content = entry.content.to_lowercase();
            content.contains(&description) || description.contains(&content)
        });
        if matched {
            step.use_cache = true;
            step.estimated_duration_ms = step.estimated_duration_ms.saturating_div(10);
            applied.push(format!("Enabled cache for step '{}'", step.id));
        }
    }
}

/// Lossy-free u64→f64 for durations well below 2^32 ms.
fn duration_f64(ms: u64) -> f64 {
    u32::try_from(ms.min(u64::from(u32::MAX)))
        .map(f64::from)
        .unwrap_or(f64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryEntry;
    use uuid::Uuid;

    fn step(id: &str, tool: ToolType, params: StepParams, deps: &[&str]) -> TaskStep {
        TaskStep {
            id: id.to_owned(),
            description: format!("{tool} {id}"),
            tool,
            params,
            dependencies: deps.iter().map(|d| (*d).to_owned()).collect(),
            estimated_duration_ms: 1000,
            can_parallelize: true,
            priority: 5,
            use_cache: false,
        }
    }

    fn read(id: &str, path: &str) -> TaskStep {
        let mut s = step(
            id,
            ToolType::Fs,
            StepParams::FsRead {
                path: path.to_owned(),
            },
            &[],
        );
        s.description = format!("Read {path}");
        s
    }

    fn plan(steps: Vec<TaskStep>) -> ExecutionPlan {
        let groups = compute_parallel_groups(&steps);
        let total = compute_total_duration(&steps, &groups);
        ExecutionPlan {
            plan_id: Uuid::nil().to_string(),
            steps,
            total_estimated_duration_ms: total,
            parallel_groups: groups,
        }
    }

    fn optimize(plan: &ExecutionPlan) -> OptimizationResult {
        ReasoningOptimizer::new().optimize(&OptimizeRequest { plan, memory: None })
    }

    #[test]
    fn test_deduplicate_rewrites_dependencies() {
        let mut dependent = step(
            "s3",
            ToolType::Ai,
            StepParams::AiGenerate {
                query: "q".to_owned(),
                mode: None,
            },
            &["s2"],
        );
        dependent.can_parallelize = false;
        let p = plan(vec![
            read("s1", "/tmp/a.txt"),
            read("s2", "/tmp/a.txt"),
            dependent,
        ]);

        let result = optimize(&p);
        // The duplicate read is merged away; the AI step now depends on s1.
        let ai = result
            .optimized
            .steps
            .iter()
            .find(|s| s.tool == ToolType::Ai)
            .expect("ai step kept");
        assert_eq!(ai.dependencies, vec!["s1"]);
        assert_eq!(
            result
                .optimized
                .steps
                .iter()
                .filter(|s| s.tool == ToolType::Fs)
                .count(),
            1
        );
        assert!(result.applied.iter().any(|a| a.contains("duplicate")));
    }

    #[test]
    fn test_merge_consecutive_reads_into_batch() {
        // A plan without parallel groups (e.g. host-authored): the merge
        // pass is the only way to co-schedule the two reads.
        let p = ExecutionPlan {
            plan_id: Uuid::nil().to_string(),
            steps: vec![read("s1", "/tmp/a.txt"), read("s2", "/tmp/b.txt")],
            total_estimated_duration_ms: 2000,
            parallel_groups: Vec::new(),
        };
        let result = optimize(&p);

        assert_eq!(result.optimized.steps.len(), 1);
        match &result.optimized.steps[0].params {
            StepParams::Batch { batch } => assert_eq!(batch.len(), 2),
            other => panic!("expected Batch, got {other:?}"),
        }
        // Merged duration is the max of the members.
        assert_eq!(result.optimized.steps[0].estimated_duration_ms, 1000);
    }

    #[test]
    fn test_merge_skips_grouped_steps() {
        // Grouped steps already run concurrently; they must survive as
        // distinct steps so the routing mode stays parallel.
        let p = plan(vec![read("s1", "/tmp/a.txt"), read("s2", "/tmp/b.txt")]);
        assert_eq!(p.parallel_groups.len(), 1);

        let result = optimize(&p);
        assert_eq!(result.optimized.steps.len(), 2);
        assert_eq!(result.optimized.parallel_groups.len(), 1);
    }

    #[test]
    fn test_merge_skips_dependent_steps() {
        let a = read("s1", "/tmp/a.txt");
        let mut b = read("s2", "/tmp/b.txt");
        b.dependencies = vec!["s1".to_owned()];
        let p = plan(vec![a, b]);

        let result = optimize(&p);
        assert_eq!(result.optimized.steps.len(), 2, "dependent steps never merge");
    }

    #[test]
    fn test_reorder_moves_high_priority_forward() {
        let mut low = step(
            "s1",
            ToolType::Ai,
            StepParams::AiGenerate {
                query: "x".to_owned(),
                mode: None,
            },
            &[],
        );
        low.priority = 2;
        low.can_parallelize = false;
        let mut high = step(
            "s2",
            ToolType::Memory,
            StepParams::MemoryRecall {
                query: "y".to_owned(),
            },
            &[],
        );
        high.priority = 8;
        high.can_parallelize = false;

        let p = plan(vec![low, high]);
        let result = optimize(&p);
        assert_eq!(result.optimized.steps[0].id, "s2");
        assert!(result.applied.iter().any(|a| a.contains("Reordered")));
    }

    #[test]
    fn test_reorder_respects_dependencies() {
        let mut first = step(
            "s1",
            ToolType::Fs,
            StepParams::FsSearch {
                query: "q".to_owned(),
                extensions: vec![],
            },
            &[],
        );
        first.priority = 3;
        first.can_parallelize = false;
        let mut second = step(
            "s2",
            ToolType::Ai,
            StepParams::CodeAnalysis {
                query: "q".to_owned(),
            },
            &["s1"],
        );
        second.priority = 9;
        second.can_parallelize = false;

        let p = plan(vec![first, second]);
        let result = optimize(&p);
        assert_eq!(
            result.optimized.steps[0].id, "s1",
            "a dependent step never moves ahead of its dependency"
        );
    }

    #[test]
    fn test_memory_caching_marks_fs_steps() {
        let p = plan(vec![read("s1", "/tmp/a.txt")]);
        let memory = MemoryContext {
            entries: vec![MemoryEntry {
                content: "Read /tmp/a.txt".to_owned(),
                relevance: 1.0,
                source: None,
            }],
        };

        let result = ReasoningOptimizer::new().optimize(&OptimizeRequest {
            plan: &p,
            memory: Some(&memory),
        });

        let s = &result.optimized.steps[0];
        assert!(s.use_cache);
        assert_eq!(s.estimated_duration_ms, 100);
        assert!(result.improvement_pct.is_some());
    }

    #[test]
    fn test_optimize_is_idempotent() {
        let mut dependent = step(
            "s4",
            ToolType::Ai,
            StepParams::AiGenerate {
                query: "sum".to_owned(),
                mode: None,
            },
            &["s2", "s3"],
        );
        dependent.can_parallelize = false;
        dependent.priority = 3;
        let p = plan(vec![
            read("s1", "/tmp/a.txt"),
            read("s2", "/tmp/a.txt"),
            read("s3", "/tmp/b.txt"),
            dependent,
        ]);

        let once = optimize(&p);
        let twice = optimize(&once.optimized);

        let a = serde_json::to_value(&once.optimized.steps).expect("serialize");
        let b = serde_json::to_value(&twice.optimized.steps).expect("serialize");
        assert_eq!(a, b, "second optimization must change nothing");
        assert!(twice.applied.is_empty(), "no transformations on second pass");
        assert_eq!(
            once.optimized.parallel_groups,
            twice.optimized.parallel_groups
        );
    }

    #[test]
    fn test_improvement_percentage() {
        let mut a = read("s1", "/tmp/a.txt");
        a.can_parallelize = false;
        let mut b = read("s2", "/tmp/a.txt");
        b.can_parallelize = false;
        // s2 duplicates s1 exactly -> one step kept, total halves.
        let result = optimize(&plan(vec![a, b]));
        let improvement = result.improvement_pct.expect("must improve");
        assert!(improvement > 0.0 && improvement <= 100.0);
    }
}
