//! Tool execution with timeout, retry, caching, and in-flight dedup.
//!
//! Every call is keyed by `tool:method:params`; a fresh result is cached
//! for the configured duration and identical concurrent calls share one
//! execution through a watch channel, so at most one invocation per key
//! is ever in flight. Failures retry with exponential backoff capped at
//! ten seconds; a timeout is an ordinary failure whose message starts
//! with a `timed out` marker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::events::{EventBus, EventKind, EventStatus};
use crate::tools::{ToolError, ToolRegistry};
use crate::types::{ExecutionResult, StepParams, ToolRoute};

/// Backoff after attempt `a` is `min(1000 · 2^a, 10000)` milliseconds.
const BACKOFF_BASE_MS: u64 = 1000;
const BACKOFF_CAP_MS: u64 = 10_000;

/// Per-call errors inside the retry loop.
#[derive(Debug, Error)]
enum ExecError {
    /// No registration exists for the tool.
    #[error("tool not registered: {0}")]
    NotRegistered(String),
    /// The tool is registered but switched off.
    #[error("tool unavailable: {0}")]
    Unavailable(String),
    /// A declared dependency is missing or unavailable.
    #[error("tool dependency missing: {0}")]
    DependencyMissing(String),
    /// The call exceeded its effective timeout.
    #[error("timed out after {0}ms")]
    Timeout(u64),
    /// The handler returned an error.
    #[error("{0}")]
    Handler(#[from] ToolError),
}

impl ExecError {
    /// Unavailability can be served by a fallback route; other errors
    /// cannot.
    fn is_unavailability(&self) -> bool {
        matches!(self, Self::NotRegistered(_) | Self::Unavailable(_))
    }
}

/// Options for a single execution request.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecOptions {
    /// Timeout override; the effective timeout is the minimum of this
    /// and the route's own timeout.
    pub timeout_ms: Option<u64>,
    /// Keep going after a failure in sequential mode.
    pub continue_on_error: bool,
}

/// Cache statistics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    /// Live (possibly expired) entries.
    pub entries: usize,
    /// Executions currently in flight.
    pub in_flight: usize,
}

struct CacheEntry {
    data: Value,
    expires_at: Instant,
}

/// Route executor shared by the orchestrator and the host.
#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    events: Arc<EventBus>,
    cache: Arc<Mutex<HashMap<String, CacheEntry>>>,
    in_flight: Arc<Mutex<HashMap<String, watch::Receiver<Option<ExecutionResult>>>>>,
    cache_duration: Duration,
}

impl ToolExecutor {
    /// Create an executor. A zero `cache_duration` disables caching.
    pub fn new(registry: Arc<ToolRegistry>, events: Arc<EventBus>, cache_duration: Duration) -> Self {
        Self {
            registry,
            events,
            cache: Arc::new(Mutex::new(HashMap::new())),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            cache_duration,
        }
    }

    /// Execute one route.
    pub async fn execute(&self, route: &ToolRoute, options: ExecOptions) -> ExecutionResult {
        let started = Instant::now();

        if let StepParams::Unroutable { reason } = &route.params {
            return ExecutionResult::failure(reason.clone(), 0, elapsed_ms(started));
        }

        let key = cache_key(route);

        if self.caching_enabled() {
            if let Some(data) = self.cache_get(&key).await {
                debug!(key = %key, "cache hit");
                return ExecutionResult {
                    success: true,
                    data,
                    execution_time_ms: elapsed_ms(started),
                    from_cache: true,
                    retry_count: 0,
                    error: None,
                };
            }
        }

        // Join an identical in-flight call instead of starting a second
        // execution, or become the leader for this key.
        let leadership = {
            let mut in_flight = self.in_flight.lock().await;
            if let Some(rx) = in_flight.get(&key) {
                Err(rx.clone())
            } else {
                let (tx, rx) = watch::channel(None);
                in_flight.insert(key.clone(), rx);
                Ok(tx)
            }
        };
        let sender = match leadership {
            Ok(tx) => tx,
            Err(rx) => return wait_for_leader(rx, started).await,
        };

        let result = self.execute_with_retries(route, options, started).await;

        if result.success && self.caching_enabled() {
            let mut cache = self.cache.lock().await;
            cache.insert(
                key.clone(),
                CacheEntry {
                    data: result.data.clone(),
                    expires_at: Instant::now().checked_add(self.cache_duration).unwrap_or_else(Instant::now),
                },
            );
        }

        let _ = sender.send(Some(result.clone()));
        self.in_flight.lock().await.remove(&key);

        self.events.emit(
            EventKind::ToolExecuted,
            if result.success {
                EventStatus::Complete
            } else {
                EventStatus::Error
            },
            json!({
                "step_id": route.step_id,
                "tool": route.tool,
                "method": route.method,
                "success": result.success,
                "execution_time_ms": result.execution_time_ms,
                "retry_count": result.retry_count,
            }),
        );

        result
    }

    /// Execute all routes concurrently, returning every result.
    pub async fn execute_parallel(
        &self,
        routes: &[ToolRoute],
        options: ExecOptions,
    ) -> Vec<ExecutionResult> {
        let mut handles = Vec::with_capacity(routes.len());
        for route in routes {
            let this = self.clone();
            let route = route.clone();
            handles.push(tokio::spawn(
                async move { this.execute(&route, options).await },
            ));
        }
        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(
                handle
                    .await
                    .unwrap_or_else(|e| ExecutionResult::failure(e.to_string(), 0, 0)),
            );
        }
        results
    }

    /// Execute routes in order, stopping at the first failure unless
    /// `continue_on_error` is set. The failing result is included.
    pub async fn execute_sequential(
        &self,
        routes: &[ToolRoute],
        options: ExecOptions,
    ) -> Vec<ExecutionResult> {
        let mut results = Vec::with_capacity(routes.len());
        for route in routes {
            let result = self.execute(route, options).await;
            let failed = !result.success;
            results.push(result);
            if failed && !options.continue_on_error {
                break;
            }
        }
        results
    }

    /// Remove expired cache entries, returning how many were dropped.
    pub async fn cleanup_cache(&self) -> usize {
        let now = Instant::now();
        let mut cache = self.cache.lock().await;
        let before = cache.len();
        cache.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(cache.len())
    }

    /// Drop every cache entry.
    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
    }

    /// Current cache statistics.
    pub async fn cache_stats(&self) -> CacheStats {
        CacheStats {
            entries: self.cache.lock().await.len(),
            in_flight: self.in_flight.lock().await.len(),
        }
    }

    fn caching_enabled(&self) -> bool {
        !self.cache_duration.is_zero()
    }

    async fn cache_get(&self, key: &str) -> Option<Value> {
        let cache = self.cache.lock().await;
        cache
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.data.clone())
    }

    async fn execute_with_retries(
        &self,
        route: &ToolRoute,
        options: ExecOptions,
        started: Instant,
    ) -> ExecutionResult {
        let max_retries = route.retries;
        let mut attempt: u32 = 0;

        loop {
            match self.try_once(route, options).await {
                Ok(data) => {
                    return ExecutionResult {
                        success: true,
                        data,
                        execution_time_ms: elapsed_ms(started),
                        from_cache: false,
                        retry_count: attempt,
                        error: None,
                    };
                }
                Err(e) if e.is_unavailability() => {
                    // A dead primary is not worth retrying; hand over to
                    // the fallback route when one is attached.
                    if let Some(fallback) = &route.fallback {
                        debug!(step = %route.step_id, fallback = %fallback.tool, "primary unavailable, using fallback route");
                        let fallback = (**fallback).clone();
                        return Box::pin(self.execute_with_retries(&fallback, options, started))
                            .await;
                    }
                    return ExecutionResult::failure(e.to_string(), attempt, elapsed_ms(started));
                }
                Err(e) => {
                    if attempt >= max_retries {
                        return ExecutionResult::failure(
                            e.to_string(),
                            attempt,
                            elapsed_ms(started),
                        );
                    }
                    warn!(step = %route.step_id, attempt, error = %e, "tool call failed, retrying");
                    self.events.emit(
                        EventKind::ToolRetry,
                        EventStatus::Progress,
                        json!({
                            "step_id": route.step_id,
                            "tool": route.tool,
                            "attempt": attempt,
                            "error": e.to_string(),
                        }),
                    );
                    let backoff = BACKOFF_BASE_MS
                        .saturating_mul(2u64.saturating_pow(attempt))
                        .min(BACKOFF_CAP_MS);
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    async fn try_once(&self, route: &ToolRoute, options: ExecOptions) -> Result<Value, ExecError> {
        let capability = self
            .registry
            .get(route.tool)
            .ok_or_else(|| ExecError::NotRegistered(route.tool.to_string()))?;
        if !capability.available {
            return Err(ExecError::Unavailable(route.tool.to_string()));
        }

        let deps = self.registry.validate_dependencies(route.tool);
        if !deps.valid {
            let missing: Vec<String> = deps.missing.iter().map(|t| t.to_string()).collect();
            return Err(ExecError::DependencyMissing(missing.join(", ")));
        }

        let handler = self
            .registry
            .handler(route.tool)
            .ok_or_else(|| ExecError::NotRegistered(route.tool.to_string()))?;

        let timeout_ms = match options.timeout_ms {
            Some(requested) => requested.min(route.timeout_ms),
            None => route.timeout_ms,
        };

        let call = handler.call(&route.method, route.params.clone());
        if timeout_ms == 0 {
            return Ok(call.await?);
        }
        match tokio::time::timeout(Duration::from_millis(timeout_ms), call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ExecError::Timeout(timeout_ms)),
        }
    }
}

/// Wait on the leader's watch channel and return its result.
async fn wait_for_leader(
    mut rx: watch::Receiver<Option<ExecutionResult>>,
    started: Instant,
) -> ExecutionResult {
    loop {
        if let Some(result) = rx.borrow_and_update().clone() {
            return result;
        }
        if rx.changed().await.is_err() {
            return ExecutionResult::failure(
                "in-flight execution was dropped",
                0,
                elapsed_ms(started),
            );
        }
    }
}

fn cache_key(route: &ToolRoute) -> String {
    let params = serde_json::to_string(&route.params).unwrap_or_default();
    format!("{}:{}:{}", route.tool, route.method, params)
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::builtin::default_capability;
    use crate::tools::ToolHandler;
    use crate::types::ToolType;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts invocations; optionally fails the first N calls or hangs.
    struct CountingTool {
        calls: AtomicUsize,
        fail_first: usize,
        hang: bool,
    }

    impl CountingTool {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_first: 0,
                hang: false,
            })
        }

        fn failing_first(n: usize) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_first: n,
                hang: false,
            })
        }

        fn hanging() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_first: 0,
                hang: true,
            })
        }

        fn count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ToolHandler for CountingTool {
        async fn call(&self, _method: &str, _params: StepParams) -> Result<Value, ToolError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if call < self.fail_first {
                return Err(ToolError::Failed("transient".to_owned()));
            }
            Ok(json!({ "call": call }))
        }
    }

    fn setup(
        tool: ToolType,
        handler: Arc<dyn ToolHandler>,
        cache_ms: u64,
    ) -> (ToolExecutor, Arc<ToolRegistry>) {
        let registry = Arc::new(ToolRegistry::new());
        registry
            .register(default_capability(tool), handler)
            .expect("register");
        let executor = ToolExecutor::new(
            registry.clone(),
            Arc::new(EventBus::new()),
            Duration::from_millis(cache_ms),
        );
        (executor, registry)
    }

    fn fs_route(path: &str) -> ToolRoute {
        ToolRoute {
            step_id: "s1".to_owned(),
            tool: ToolType::Fs,
            method: "read".to_owned(),
            params: StepParams::FsRead {
                path: path.to_owned(),
            },
            fallback: None,
            timeout_ms: 10_000,
            retries: 2,
        }
    }

    #[tokio::test]
    async fn test_execute_success() {
        let tool = CountingTool::new();
        let (executor, _) = setup(ToolType::Fs, tool.clone(), 0);

        let result = executor.execute(&fs_route("/a"), ExecOptions::default()).await;
        assert!(result.success);
        assert!(!result.from_cache);
        assert_eq!(result.retry_count, 0);
        assert_eq!(tool.count(), 1);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_invocation() {
        let tool = CountingTool::new();
        let (executor, _) = setup(ToolType::Fs, tool.clone(), 60_000);

        let first = executor.execute(&fs_route("/a"), ExecOptions::default()).await;
        assert!(!first.from_cache);
        let second = executor.execute(&fs_route("/a"), ExecOptions::default()).await;
        assert!(second.from_cache);
        assert_eq!(second.data, first.data);
        assert_eq!(tool.count(), 1, "cached call must not re-invoke the tool");
    }

    #[tokio::test]
    async fn test_cache_keyed_by_params() {
        let tool = CountingTool::new();
        let (executor, _) = setup(ToolType::Fs, tool.clone(), 60_000);

        executor.execute(&fs_route("/a"), ExecOptions::default()).await;
        executor.execute(&fs_route("/b"), ExecOptions::default()).await;
        assert_eq!(tool.count(), 2, "different params must not share a cache entry");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_expiry_and_cleanup() {
        let tool = CountingTool::new();
        let (executor, _) = setup(ToolType::Fs, tool.clone(), 1_000);

        executor.execute(&fs_route("/a"), ExecOptions::default()).await;
        tokio::time::advance(Duration::from_millis(1_500)).await;

        let removed = executor.cleanup_cache().await;
        assert_eq!(removed, 1);

        let result = executor.execute(&fs_route("/a"), ExecOptions::default()).await;
        assert!(!result.from_cache);
        assert_eq!(tool.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_with_backoff_then_success() {
        let tool = CountingTool::failing_first(2);
        let (executor, _) = setup(ToolType::Fs, tool.clone(), 0);

        let result = executor.execute(&fs_route("/a"), ExecOptions::default()).await;
        assert!(result.success);
        assert_eq!(result.retry_count, 2);
        assert_eq!(tool.count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_failure_reports_last_error() {
        let tool = CountingTool::failing_first(10);
        let (executor, _) = setup(ToolType::Fs, tool.clone(), 0);

        let result = executor.execute(&fs_route("/a"), ExecOptions::default()).await;
        assert!(!result.success);
        assert_eq!(result.retry_count, 2, "route allows two retries");
        assert_eq!(tool.count(), 3, "initial attempt plus two retries");
        assert!(result.error.expect("error").contains("transient"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_a_failure_with_marker() {
        let tool = CountingTool::hanging();
        let (executor, _) = setup(ToolType::Fs, tool, 0);

        let mut route = fs_route("/a");
        route.retries = 0;
        let result = executor
            .execute(
                &route,
                ExecOptions {
                    timeout_ms: Some(50),
                    continue_on_error: false,
                },
            )
            .await;
        assert!(!result.success);
        assert!(result.error.expect("error").starts_with("timed out"));
    }

    #[tokio::test]
    async fn test_unavailable_tool_fails_without_retry() {
        let tool = CountingTool::new();
        let (executor, registry) = setup(ToolType::Fs, tool.clone(), 0);
        registry.set_availability(ToolType::Fs, false);

        let result = executor.execute(&fs_route("/a"), ExecOptions::default()).await;
        assert!(!result.success);
        assert_eq!(tool.count(), 0);
        assert!(result.error.expect("error").contains("unavailable"));
    }

    #[tokio::test]
    async fn test_fallback_route_taken_when_primary_unavailable() {
        let registry = Arc::new(ToolRegistry::new());
        let sdb = CountingTool::new();
        let memory = CountingTool::new();
        registry
            .register(default_capability(ToolType::Sdb), sdb.clone())
            .expect("register");
        registry
            .register(default_capability(ToolType::Memory), memory.clone())
            .expect("register");
        registry.set_availability(ToolType::Sdb, false);

        let executor = ToolExecutor::new(registry, Arc::new(EventBus::new()), Duration::ZERO);
        let route = ToolRoute {
            step_id: "s1".to_owned(),
            tool: ToolType::Sdb,
            method: "query".to_owned(),
            params: StepParams::MemoryRecall {
                query: "q".to_owned(),
            },
            fallback: Some(Box::new(ToolRoute {
                step_id: "s1".to_owned(),
                tool: ToolType::Memory,
                method: "recall".to_owned(),
                params: StepParams::MemoryRecall {
                    query: "q".to_owned(),
                },
                fallback: None,
                timeout_ms: 5_000,
                retries: 1,
            })),
            timeout_ms: 10_000,
            retries: 1,
        };

        let result = executor.execute(&route, ExecOptions::default()).await;
        assert!(result.success);
        assert_eq!(sdb.count(), 0);
        assert_eq!(memory.count(), 1);
    }

    #[tokio::test]
    async fn test_missing_dependency_fails() {
        let registry = Arc::new(ToolRegistry::new());
        let github = CountingTool::new();
        registry
            .register(default_capability(ToolType::Github), github.clone())
            .expect("register");

        let executor = ToolExecutor::new(registry, Arc::new(EventBus::new()), Duration::ZERO);
        let route = ToolRoute {
            step_id: "s1".to_owned(),
            tool: ToolType::Github,
            method: "query".to_owned(),
            params: StepParams::GithubQuery {
                handle: "octocat".to_owned(),
            },
            fallback: None,
            timeout_ms: 1_000,
            retries: 0,
        };

        let result = executor.execute(&route, ExecOptions::default()).await;
        assert!(!result.success);
        assert!(result.error.expect("error").contains("dependency"));
        assert_eq!(github.count(), 0);
    }

    #[tokio::test]
    async fn test_in_flight_dedup_single_invocation() {
        // A slow tool plus two concurrent identical calls: the second
        // must join the first execution rather than start its own.
        struct SlowTool {
            calls: AtomicUsize,
        }

        #[async_trait]
        impl ToolHandler for SlowTool {
            async fn call(&self, _m: &str, _p: StepParams) -> Result<Value, ToolError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(json!({ "ok": true }))
            }
        }

        let slow = Arc::new(SlowTool {
            calls: AtomicUsize::new(0),
        });
        let registry = Arc::new(ToolRegistry::new());
        registry
            .register(default_capability(ToolType::Fs), slow.clone())
            .expect("register");
        let executor =
            ToolExecutor::new(registry, Arc::new(EventBus::new()), Duration::from_secs(60));

        let a = executor.clone();
        let b = executor.clone();
        let route_a = fs_route("/same");
        let route_b = fs_route("/same");
        let (ra, rb) = tokio::join!(
            a.execute(&route_a, ExecOptions::default()),
            b.execute(&route_b, ExecOptions::default()),
        );

        assert!(ra.success && rb.success);
        assert_eq!(ra.data, rb.data, "joiners observe identical data");
        assert_eq!(slow.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_execute_parallel_returns_all_results() {
        let tool = CountingTool::new();
        let (executor, _) = setup(ToolType::Fs, tool.clone(), 0);

        let routes = vec![fs_route("/a"), fs_route("/b"), fs_route("/c")];
        let results = executor.execute_parallel(&routes, ExecOptions::default()).await;
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.success));
        assert_eq!(tool.count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_sequential_stops_on_failure() {
        let registry = Arc::new(ToolRegistry::new());
        let fs = CountingTool::new();
        registry
            .register(default_capability(ToolType::Fs), fs.clone())
            .expect("register");
        // Shell tool has no registration: its route fails immediately.
        let executor = ToolExecutor::new(registry, Arc::new(EventBus::new()), Duration::ZERO);

        let failing = ToolRoute {
            step_id: "s2".to_owned(),
            tool: ToolType::Shell,
            method: "execute".to_owned(),
            params: StepParams::ShellExec {
                command: "ls".to_owned(),
                cwd: None,
                timeout_ms: None,
            },
            fallback: None,
            timeout_ms: 1_000,
            retries: 0,
        };
        let routes = vec![fs_route("/a"), failing, fs_route("/b")];

        let results = executor
            .execute_sequential(&routes, ExecOptions::default())
            .await;
        assert_eq!(results.len(), 2, "stops after the failing route");
        assert!(results[0].success);
        assert!(!results[1].success);
        assert_eq!(fs.count(), 1, "the third route never runs");
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_sequential_continue_on_error() {
        let registry = Arc::new(ToolRegistry::new());
        let fs = CountingTool::new();
        registry
            .register(default_capability(ToolType::Fs), fs.clone())
            .expect("register");
        let executor = ToolExecutor::new(registry, Arc::new(EventBus::new()), Duration::ZERO);

        let failing = ToolRoute {
            step_id: "s2".to_owned(),
            tool: ToolType::Shell,
            method: "execute".to_owned(),
            params: StepParams::ShellExec {
                command: "ls".to_owned(),
                cwd: None,
                timeout_ms: None,
            },
            fallback: None,
            timeout_ms: 1_000,
            retries: 0,
        };
        let routes = vec![fs_route("/a"), failing, fs_route("/b")];

        let results = executor
            .execute_sequential(
                &routes,
                ExecOptions {
                    timeout_ms: None,
                    continue_on_error: true,
                },
            )
            .await;
        assert_eq!(results.len(), 3);
        assert_eq!(fs.count(), 2);
    }

    #[tokio::test]
    async fn test_unroutable_params_fail_immediately() {
        let tool = CountingTool::new();
        let (executor, _) = setup(ToolType::Fs, tool.clone(), 60_000);

        let route = ToolRoute {
            step_id: "s1".to_owned(),
            tool: ToolType::Automation,
            method: "unavailable".to_owned(),
            params: StepParams::Unroutable {
                reason: "tool 'automation' is not available and has no fallback".to_owned(),
            },
            fallback: None,
            timeout_ms: 0,
            retries: 0,
        };
        let result = executor.execute(&route, ExecOptions::default()).await;
        assert!(!result.success);
        assert!(result.error.expect("error").contains("automation"));
        assert_eq!(tool.count(), 0);
    }

    #[tokio::test]
    async fn test_clear_cache_and_stats() {
        let tool = CountingTool::new();
        let (executor, _) = setup(ToolType::Fs, tool.clone(), 60_000);

        executor.execute(&fs_route("/a"), ExecOptions::default()).await;
        assert_eq!(executor.cache_stats().await.entries, 1);

        executor.clear_cache().await;
        assert_eq!(executor.cache_stats().await.entries, 0);

        executor.execute(&fs_route("/a"), ExecOptions::default()).await;
        assert_eq!(tool.count(), 2);
    }
}
