//! Peer broker — registry of remote executors with load-balanced failover.
//!
//! The broker never speaks a wire protocol itself: a host injects a
//! [`RemoteExecutor`] and the broker handles peer selection, load
//! accounting, failover backoff, and health monitoring on top of it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::events::{EventBus, EventKind, EventStatus};
use crate::tools::ToolRegistry;
use crate::types::{PeerInfo, PeerStatus};

/// A peer unseen for this long is forced offline.
const STALE_AFTER_MS: i64 = 120_000;
/// Load penalty applied to a peer that failed a call.
const FAILURE_LOAD_PENALTY: u8 = 20;
/// Load credit applied to a peer that served a call.
const SUCCESS_LOAD_CREDIT: u8 = 10;

/// Transport-level executor injected by the host.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Execute `tool_name` with `args` on the given peer.
    async fn execute(&self, peer_id: &str, tool_name: &str, args: Value)
        -> anyhow::Result<Value>;
}

/// Broker errors.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// No remote executor has been injected.
    #[error("no remote executor configured")]
    NoRemoteExecutor,
    /// No online peer advertises the requested tool.
    #[error("no available peers for tool '{0}'")]
    NoAvailablePeers(String),
    /// The peer id is not registered.
    #[error("unknown peer: {0}")]
    UnknownPeer(String),
    /// All failover attempts were exhausted.
    #[error("remote execution failed on {peer_id}: {message}")]
    RemoteFailed {
        /// Last peer tried.
        peer_id: String,
        /// Last error message.
        message: String,
    },
}

/// A tool visible through discovery, local or advertised by a peer.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredTool {
    /// Tool name.
    pub name: String,
    /// Description from the registry when known, else generic.
    pub description: String,
    /// Advertising peer; `None` for local registrations.
    pub peer_id: Option<String>,
}

/// Aggregate load over the online peer set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LoadStats {
    /// Mean load of online peers.
    pub avg_load: f64,
    /// Lowest online load.
    pub min_load: u8,
    /// Highest online load.
    pub max_load: u8,
    /// Number of online peers.
    pub online_peers: usize,
}

/// Peer registry with failover execution.
pub struct Broker {
    local_peer_id: String,
    peers: RwLock<HashMap<String, PeerInfo>>,
    remote: std::sync::RwLock<Option<Arc<dyn RemoteExecutor>>>,
    registry: Arc<ToolRegistry>,
    events: Arc<EventBus>,
}

impl Broker {
    /// Create a broker around the local registry and event bus.
    pub fn new(registry: Arc<ToolRegistry>, events: Arc<EventBus>) -> Self {
        Self {
            local_peer_id: format!("local-{}", uuid::Uuid::new_v4()),
            peers: RwLock::new(HashMap::new()),
            remote: std::sync::RwLock::new(None),
            registry,
            events,
        }
    }

    /// The id this instance advertises to other peers.
    pub fn local_peer_id(&self) -> &str {
        &self.local_peer_id
    }

    /// Inject the transport executor used for all remote calls.
    pub fn set_remote_executor(&self, executor: Arc<dyn RemoteExecutor>) {
        if let Ok(mut remote) = self.remote.write() {
            *remote = Some(executor);
        }
    }

    /// Register (or refresh) a peer.
    pub async fn register_peer(&self, peer: PeerInfo) {
        info!(peer_id = %peer.peer_id, host = %peer.host, "peer registered");
        self.events.emit(
            EventKind::PeerRegistered,
            EventStatus::Complete,
            json!({ "peer_id": peer.peer_id, "name": peer.name }),
        );
        self.peers.write().await.insert(peer.peer_id.clone(), peer);
    }

    /// Remove a peer. Returns whether it existed.
    pub async fn unregister_peer(&self, peer_id: &str) -> bool {
        self.peers.write().await.remove(peer_id).is_some()
    }

    /// Snapshot of one peer.
    pub async fn get_peer(&self, peer_id: &str) -> Option<PeerInfo> {
        self.peers.read().await.get(peer_id).cloned()
    }

    /// Snapshot of all peers.
    pub async fn get_peers(&self) -> Vec<PeerInfo> {
        self.peers.read().await.values().cloned().collect()
    }

    /// Update a peer's status (and optionally load), refreshing
    /// `last_seen`. Returns whether the peer exists.
    pub async fn update_peer_status(
        &self,
        peer_id: &str,
        status: PeerStatus,
        load: Option<u8>,
    ) -> bool {
        let mut peers = self.peers.write().await;
        let Some(peer) = peers.get_mut(peer_id) else {
            return false;
        };
        peer.status = status;
        if let Some(load) = load {
            peer.load = load.min(100);
        }
        peer.last_seen = Utc::now();
        let payload = json!({ "peer_id": peer_id, "status": peer.status, "load": peer.load });
        drop(peers);
        self.events
            .emit(EventKind::PeerUpdated, EventStatus::Complete, payload);
        true
    }

    /// Local registrations, plus every online peer's advertised tools
    /// when `include_remote` is set.
    pub async fn discover_tools(&self, include_remote: bool) -> Vec<DiscoveredTool> {
        let mut tools: Vec<DiscoveredTool> = self
            .registry
            .available_tools()
            .into_iter()
            .map(|cap| DiscoveredTool {
                name: cap.name,
                description: cap.description,
                peer_id: None,
            })
            .collect();

        if include_remote {
            for peer in self.peers.read().await.values() {
                if peer.status != PeerStatus::Online {
                    continue;
                }
                for tool_name in &peer.tools {
                    let description = self
                        .registry
                        .get_by_alias(tool_name)
                        .map(|cap| cap.description)
                        .unwrap_or_else(|| format!("{tool_name} on peer {}", peer.peer_id));
                    tools.push(DiscoveredTool {
                        name: tool_name.clone(),
                        description,
                        peer_id: Some(peer.peer_id.clone()),
                    });
                }
            }
        }
        tools
    }

    /// Lowest-load online peer advertising `tool_name`.
    pub async fn best_peer_for(&self, tool_name: &str) -> Option<PeerInfo> {
        self.peers
            .read()
            .await
            .values()
            .filter(|p| p.status == PeerStatus::Online && p.tools.iter().any(|t| t == tool_name))
            .min_by_key(|p| p.load)
            .cloned()
    }

    /// Execute on a specific peer through the injected transport.
    pub async fn call_on_peer(
        &self,
        peer_id: &str,
        tool_name: &str,
        args: Value,
    ) -> Result<Value, BrokerError> {
        let executor = self
            .remote
            .read()
            .ok()
            .and_then(|r| r.clone())
            .ok_or(BrokerError::NoRemoteExecutor)?;
        if self.get_peer(peer_id).await.is_none() {
            return Err(BrokerError::UnknownPeer(peer_id.to_owned()));
        }
        executor
            .execute(peer_id, tool_name, args)
            .await
            .map_err(|e| BrokerError::RemoteFailed {
                peer_id: peer_id.to_owned(),
                message: e.to_string(),
            })
    }

    /// Execute `tool_name` with failover across peers.
    ///
    /// Each attempt picks the current best peer; a failing peer is marked
    /// busy with a load penalty, so the next attempt lands elsewhere
    /// until the online set is exhausted. Backoff doubles per attempt.
    pub async fn call_tool_with_failover(
        &self,
        tool_name: &str,
        args: Value,
        max_retries: u32,
    ) -> Result<Value, BrokerError> {
        let executor = self
            .remote
            .read()
            .ok()
            .and_then(|r| r.clone())
            .ok_or(BrokerError::NoRemoteExecutor)?;

        let mut last_error: Option<BrokerError> = None;

        for attempt in 0..max_retries {
            let Some(peer) = self.best_peer_for(tool_name).await else {
                return Err(last_error
                    .unwrap_or_else(|| BrokerError::NoAvailablePeers(tool_name.to_owned())));
            };

            self.events.emit(
                EventKind::FailoverAttempt,
                EventStatus::Progress,
                json!({ "tool": tool_name, "peer_id": peer.peer_id, "attempt": attempt }),
            );

            match executor
                .execute(&peer.peer_id, tool_name, args.clone())
                .await
            {
                Ok(result) => {
                    let relieved = peer.load.saturating_sub(SUCCESS_LOAD_CREDIT);
                    self.update_peer_status(&peer.peer_id, PeerStatus::Online, Some(relieved))
                        .await;
                    return Ok(result);
                }
                Err(e) => {
                    warn!(peer_id = %peer.peer_id, tool = tool_name, error = %e, "remote call failed");
                    let loaded = peer
                        .load
                        .saturating_add(FAILURE_LOAD_PENALTY)
                        .min(100);
                    self.update_peer_status(&peer.peer_id, PeerStatus::Busy, Some(loaded))
                        .await;
                    self.events.emit(
                        EventKind::FailoverError,
                        EventStatus::Error,
                        json!({ "tool": tool_name, "peer_id": peer.peer_id, "error": e.to_string() }),
                    );
                    last_error = Some(BrokerError::RemoteFailed {
                        peer_id: peer.peer_id.clone(),
                        message: e.to_string(),
                    });

                    let is_last = attempt.saturating_add(1) >= max_retries;
                    if !is_last {
                        let backoff_ms = 1000u64.saturating_mul(2u64.saturating_pow(attempt));
                        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| BrokerError::NoAvailablePeers(tool_name.to_owned())))
    }

    /// Force peers unseen for over two minutes offline.
    ///
    /// Exposed for deterministic tests; the health monitor calls it on
    /// its interval.
    pub async fn check_stale_peers(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut unhealthy = Vec::new();
        {
            let mut peers = self.peers.write().await;
            for peer in peers.values_mut() {
                let stale = now
                    .signed_duration_since(peer.last_seen)
                    .num_milliseconds()
                    > STALE_AFTER_MS;
                if stale && peer.status != PeerStatus::Offline {
                    peer.status = PeerStatus::Offline;
                    peer.load = 100;
                    unhealthy.push(peer.peer_id.clone());
                }
            }
        }
        for peer_id in &unhealthy {
            warn!(peer_id = %peer_id, "peer went stale, marking offline");
            self.events.emit(
                EventKind::PeerUnhealthy,
                EventStatus::Error,
                json!({ "peer_id": peer_id }),
            );
        }
        unhealthy
    }

    /// Spawn the periodic health scan.
    pub fn start_health_monitoring(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let broker = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                broker.check_stale_peers(Utc::now()).await;
            }
        })
    }

    /// Load statistics over the online peer set.
    pub async fn load_stats(&self) -> LoadStats {
        let peers = self.peers.read().await;
        let online: Vec<&PeerInfo> = peers
            .values()
            .filter(|p| p.status == PeerStatus::Online)
            .collect();
        if online.is_empty() {
            return LoadStats {
                avg_load: 0.0,
                min_load: 0,
                max_load: 0,
                online_peers: 0,
            };
        }
        let total: u32 = online.iter().map(|p| u32::from(p.load)).sum();
        let count = online.len();
        LoadStats {
            avg_load: f64::from(total) / count_f64(count),
            min_load: online.iter().map(|p| p.load).min().unwrap_or(0),
            max_load: online.iter().map(|p| p.load).max().unwrap_or(0),
            online_peers: count,
        }
    }
}

fn count_f64(n: usize) -> f64 {
    u32::try_from(n).map(f64::from).unwrap_or(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn peer(id: &str, load: u8, tools: &[&str]) -> PeerInfo {
        PeerInfo {
            peer_id: id.to_owned(),
            name: format!("peer {id}"),
            host: "10.0.0.1".to_owned(),
            port: 7070,
            capabilities: vec!["execute".to_owned()],
            tools: tools.iter().map(|t| (*t).to_owned()).collect(),
            status: PeerStatus::Online,
            last_seen: Utc::now(),
            load,
        }
    }

    fn broker() -> Arc<Broker> {
        Arc::new(Broker::new(
            Arc::new(ToolRegistry::new()),
            Arc::new(EventBus::new()),
        ))
    }

    /// Scripted remote executor: per-peer outcomes, records call order.
    struct ScriptedRemote {
        calls: Mutex<Vec<String>>,
        fail_peers: Vec<String>,
        fail_times: AtomicUsize,
    }

    impl ScriptedRemote {
        fn new(fail_peers: &[&str], fail_times: usize) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_peers: fail_peers.iter().map(|p| (*p).to_owned()).collect(),
                fail_times: AtomicUsize::new(fail_times),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("test lock").clone()
        }
    }

    #[async_trait]
    impl RemoteExecutor for ScriptedRemote {
        async fn execute(
            &self,
            peer_id: &str,
            _tool_name: &str,
            _args: Value,
        ) -> anyhow::Result<Value> {
            self.calls.lock().expect("test lock").push(peer_id.to_owned());
            if self.fail_peers.iter().any(|p| p == peer_id)
                && self.fail_times.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    n.checked_sub(1)
                }).is_ok()
            {
                anyhow::bail!("connection reset");
            }
            Ok(json!("success"))
        }
    }

    #[tokio::test]
    async fn test_register_and_get_peer() {
        let broker = broker();
        broker.register_peer(peer("p1", 10, &["job"])).await;

        let found = broker.get_peer("p1").await.expect("registered");
        assert_eq!(found.load, 10);
        assert_eq!(broker.get_peers().await.len(), 1);

        assert!(broker.unregister_peer("p1").await);
        assert!(broker.get_peer("p1").await.is_none());
    }

    #[tokio::test]
    async fn test_best_peer_is_lowest_load() {
        let broker = broker();
        broker.register_peer(peer("p1", 80, &["job"])).await;
        broker.register_peer(peer("p2", 10, &["job"])).await;
        broker.register_peer(peer("p3", 5, &["other"])).await;

        let best = broker.best_peer_for("job").await.expect("match");
        assert_eq!(best.peer_id, "p2");
    }

    #[tokio::test]
    async fn test_best_peer_skips_offline() {
        let broker = broker();
        broker.register_peer(peer("p1", 80, &["job"])).await;
        let mut down = peer("p2", 10, &["job"]);
        down.status = PeerStatus::Offline;
        broker.register_peer(down).await;

        let best = broker.best_peer_for("job").await.expect("match");
        assert_eq!(best.peer_id, "p1");
    }

    #[tokio::test]
    async fn test_failover_without_executor() {
        let broker = broker();
        let result = broker
            .call_tool_with_failover("job", json!({}), 2)
            .await;
        assert!(matches!(result, Err(BrokerError::NoRemoteExecutor)));
    }

    #[tokio::test]
    async fn test_failover_no_peers() {
        let broker = broker();
        broker.set_remote_executor(Arc::new(ScriptedRemote::new(&[], 0)));
        let result = broker
            .call_tool_with_failover("job", json!({}), 2)
            .await;
        assert!(matches!(result, Err(BrokerError::NoAvailablePeers(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failover_second_peer_succeeds() {
        let broker = broker();
        broker.register_peer(peer("p1", 80, &["job"])).await;
        broker.register_peer(peer("p2", 10, &["job"])).await;

        let remote = Arc::new(ScriptedRemote::new(&["p2"], 1));
        broker.set_remote_executor(remote.clone());

        let result = broker
            .call_tool_with_failover("job", json!({}), 2)
            .await
            .expect("failover succeeds");
        assert_eq!(result, json!("success"));
        // p2 had the lowest load and was tried first; after its failure
        // the retry lands on p1.
        assert_eq!(remote.calls(), vec!["p2", "p1"]);

        // Loads were adjusted on both outcomes.
        let p2 = broker.get_peer("p2").await.expect("p2");
        assert_eq!(p2.status, PeerStatus::Busy);
        assert_eq!(p2.load, 30);
        let p1 = broker.get_peer("p1").await.expect("p1");
        assert_eq!(p1.status, PeerStatus::Online);
        assert_eq!(p1.load, 70);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failover_exhausts_retries() {
        let broker = broker();
        broker.register_peer(peer("p1", 10, &["job"])).await;
        broker.register_peer(peer("p2", 20, &["job"])).await;
        broker.register_peer(peer("p3", 30, &["job"])).await;

        let remote = Arc::new(ScriptedRemote::new(&["p1", "p2", "p3"], 10));
        broker.set_remote_executor(remote.clone());

        let result = broker.call_tool_with_failover("job", json!({}), 2).await;
        assert!(matches!(result, Err(BrokerError::RemoteFailed { .. })));
        assert_eq!(
            remote.calls().len(),
            2,
            "attempts must not exceed max_retries"
        );
        // Distinct peers were tried before any repeat.
        let calls = remote.calls();
        assert_ne!(calls[0], calls[1]);
    }

    #[tokio::test]
    async fn test_stale_peer_forced_offline() {
        let broker = broker();
        let mut old = peer("p1", 10, &["job"]);
        old.last_seen = Utc::now() - chrono::Duration::milliseconds(STALE_AFTER_MS + 1000);
        broker.register_peer(old).await;
        broker.register_peer(peer("p2", 10, &["job"])).await;

        let unhealthy = broker.check_stale_peers(Utc::now()).await;
        assert_eq!(unhealthy, vec!["p1"]);

        let p1 = broker.get_peer("p1").await.expect("p1");
        assert_eq!(p1.status, PeerStatus::Offline);
        assert_eq!(p1.load, 100);
        let p2 = broker.get_peer("p2").await.expect("p2");
        assert_eq!(p2.status, PeerStatus::Online);
    }

    #[tokio::test]
    async fn test_load_stats() {
        let broker = broker();
        broker.register_peer(peer("p1", 20, &["job"])).await;
        broker.register_peer(peer("p2", 60, &["job"])).await;
        let mut down = peer("p3", 99, &["job"]);
        down.status = PeerStatus::Offline;
        broker.register_peer(down).await;

        let stats = broker.load_stats().await;
        assert_eq!(stats.online_peers, 2);
        assert_eq!(stats.min_load, 20);
        assert_eq!(stats.max_load, 60);
        assert!((stats.avg_load - 40.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_discover_tools_includes_remote() {
        let broker = broker();
        broker.register_peer(peer("p1", 10, &["job", "scan"])).await;
        let mut down = peer("p2", 10, &["hidden"]);
        down.status = PeerStatus::Busy;
        broker.register_peer(down).await;

        let local_only = broker.discover_tools(false).await;
        assert!(local_only.iter().all(|t| t.peer_id.is_none()));

        let all = broker.discover_tools(true).await;
        let remote: Vec<&DiscoveredTool> =
            all.iter().filter(|t| t.peer_id.is_some()).collect();
        assert_eq!(remote.len(), 2, "only online peers advertise tools");
        assert!(remote.iter().all(|t| t.peer_id.as_deref() == Some("p1")));
    }

    #[tokio::test]
    async fn test_update_peer_status_clamps_load() {
        let broker = broker();
        broker.register_peer(peer("p1", 10, &["job"])).await;
        assert!(
            broker
                .update_peer_status("p1", PeerStatus::Busy, Some(255))
                .await
        );
        let p1 = broker.get_peer("p1").await.expect("p1");
        assert_eq!(p1.load, 100);
        assert!(!broker.update_peer_status("nope", PeerStatus::Online, None).await);
    }
}
