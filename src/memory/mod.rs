//! Memory collaborator interface.
//!
//! The pipeline consumes memory through the narrow [`MemoryStore`] trait:
//! `recall` feeds the memory retrieval stage and the optimizer's
//! memory-informed caching; `save_task` persists a finished request.
//! The engine ships [`InMemoryStore`] for hosts that want working memory
//! without external storage; persistent backends live with the host.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// One recalled memory entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// The remembered content.
    pub content: String,
    /// Relevance to the query in [0, 1].
    pub relevance: f64,
    /// Where the memory came from, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Recalled context attached to a pipeline request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryContext {
    /// Entries relevant to the current input, best first.
    pub entries: Vec<MemoryEntry>,
}

/// A finished request persisted to memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Request id.
    pub id: String,
    /// The raw input.
    pub input: String,
    /// The formatted output body.
    pub output: String,
    /// Whether the request succeeded.
    pub success: bool,
    /// Number of steps executed.
    pub steps: u32,
    /// Total execution time in milliseconds.
    pub execution_time_ms: u64,
    /// Completion time.
    pub timestamp: DateTime<Utc>,
    /// Requesting user, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Session, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Narrow interface to the memory subsystem.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Return entries relevant to `query`, best first.
    async fn recall(&self, query: &str) -> anyhow::Result<Vec<MemoryEntry>>;

    /// Persist a finished request.
    async fn save_task(&self, record: TaskRecord) -> anyhow::Result<()>;
}

/// Volatile store keeping task records for the process lifetime.
///
/// Recall scores by word overlap between the query and each record's
/// input — deliberately naive; embedding-backed recall belongs to the
/// host's memory subsystem.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: RwLock<Vec<TaskRecord>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// True when nothing has been saved yet.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

/// Word-overlap relevance in [0, 1]: fraction of query words present in
/// the candidate text.
fn overlap_relevance(query: &str, text: &str) -> f64 {
    let query_words: Vec<String> = query
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect();
    if query_words.is_empty() {
        return 0.0;
    }
    let text_lower = text.to_lowercase();
    let hits = query_words
        .iter()
        .filter(|w| text_lower.contains(w.as_str()))
        .count();
    to_f64(hits) / to_f64(query_words.len())
}

/// Lossless usize→f64 for the small counts used in scoring.
fn to_f64(n: usize) -> f64 {
    u32::try_from(n).map(f64::from).unwrap_or(f64::MAX)
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn recall(&self, query: &str) -> anyhow::Result<Vec<MemoryEntry>> {
        let records = self.records.read().await;
        let mut entries: Vec<MemoryEntry> = records
            .iter()
            .filter_map(|r| {
                let relevance = overlap_relevance(query, &r.input);
                if relevance > 0.0 {
                    Some(MemoryEntry {
                        content: r.input.clone(),
                        relevance,
                        source: Some(format!("task:{}", r.id)),
                    })
                } else {
                    None
                }
            })
            .collect();
        entries.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        entries.truncate(10);
        Ok(entries)
    }

    async fn save_task(&self, record: TaskRecord) -> anyhow::Result<()> {
        self.records.write().await.push(record);
        Ok(())
    }
}
