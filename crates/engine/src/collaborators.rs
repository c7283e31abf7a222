//! Collaborator contracts the executor depends on at its boundary.
//!
//! The core persists nothing and holds no global state: a waitpoint store
//! and a progress sink are handed into the executor per process, and both
//! are optional. An in-memory waitpoint store is provided for embedding
//! processes and tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Notify;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Initializing,
    #[serde(rename = "building-plan")]
    BuildingPlan,
    Running,
    Paused,
    Completed,
    CompletedWithErrors,
    Failed,
    Canceled,
}

// ---------------------------------------------------------------------------
// ProgressSink
// ---------------------------------------------------------------------------

/// One fire-and-forget progress notification.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressUpdate {
    pub execution_id: String,
    pub status: ExecutionStatus,
    /// Percentage of nodes in a terminal state, `[0, 100]`.
    pub progress: u8,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    /// Node ids dispatched in the batch that triggered this update.
    pub current_batch: Vec<String>,
}

/// Receives progress updates at every status transition and after every
/// batch. Implementations must not block the orchestrator.
pub trait ProgressSink: Send + Sync {
    fn update(&self, update: ProgressUpdate);
}

/// Test/embedding sink that records every update it receives.
#[derive(Default)]
pub struct RecordingProgressSink {
    updates: Mutex<Vec<ProgressUpdate>>,
}

impl RecordingProgressSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<ProgressUpdate> {
        self.updates.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingProgressSink {
    fn update(&self, update: ProgressUpdate) {
        self.updates.lock().unwrap().push(update);
    }
}

// ---------------------------------------------------------------------------
// WaitpointStore
// ---------------------------------------------------------------------------

/// Result of waiting on a waitpoint token.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome {
    /// The waitpoint was completed with the given user input.
    Completed(Value),
    /// The waitpoint expired (or was unknown).
    TimedOut { error: String },
}

/// External store of pause tokens. The executor registers a token when a
/// pause signal fires; the embedding resume API satisfies it via
/// [`WaitpointStore::complete`] and then resumes the executor.
#[async_trait]
pub trait WaitpointStore: Send + Sync {
    /// Register a waitpoint token with an optional timeout and tags.
    async fn create(&self, token: &str, timeout_ms: Option<u64>, tags: Vec<String>);

    /// Satisfy a pending waitpoint. Returns false for unknown tokens.
    async fn complete(&self, token: &str, user_input: Value) -> bool;

    /// Block until the waitpoint completes or times out.
    async fn wait(&self, token: &str) -> WaitOutcome;
}

struct WaitpointEntry {
    timeout_ms: Option<u64>,
    tags: Vec<String>,
    input: Option<Value>,
    notify: Arc<Notify>,
}

/// Process-local waitpoint store backed by a map of notify handles.
#[derive(Default)]
pub struct InMemoryWaitpointStore {
    entries: Mutex<HashMap<String, WaitpointEntry>>,
}

impl InMemoryWaitpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tags recorded for a token (diagnostics).
    pub fn tags(&self, token: &str) -> Option<Vec<String>> {
        self.entries
            .lock()
            .unwrap()
            .get(token)
            .map(|e| e.tags.clone())
    }

    /// Whether a token has been registered.
    pub fn contains(&self, token: &str) -> bool {
        self.entries.lock().unwrap().contains_key(token)
    }
}

#[async_trait]
impl WaitpointStore for InMemoryWaitpointStore {
    async fn create(&self, token: &str, timeout_ms: Option<u64>, tags: Vec<String>) {
        self.entries.lock().unwrap().insert(
            token.to_string(),
            WaitpointEntry {
                timeout_ms,
                tags,
                input: None,
                notify: Arc::new(Notify::new()),
            },
        );
    }

    async fn complete(&self, token: &str, user_input: Value) -> bool {
        let guard = &mut *self.entries.lock().unwrap();
        match guard.get_mut(token) {
            Some(entry) => {
                entry.input = Some(user_input);
                entry.notify.notify_one();
                true
            }
            None => false,
        }
    }

    async fn wait(&self, token: &str) -> WaitOutcome {
        loop {
            let (notify, timeout_ms) = {
                let guard = self.entries.lock().unwrap();
                let Some(entry) = guard.get(token) else {
                    return WaitOutcome::TimedOut {
                        error: format!("unknown waitpoint '{token}'"),
                    };
                };
                if let Some(input) = &entry.input {
                    return WaitOutcome::Completed(input.clone());
                }
                (entry.notify.clone(), entry.timeout_ms)
            };

            match timeout_ms {
                Some(ms) => {
                    let window = Duration::from_millis(ms);
                    if tokio::time::timeout(window, notify.notified()).await.is_err() {
                        return WaitOutcome::TimedOut {
                            error: format!("waitpoint '{token}' timed out after {ms}ms"),
                        };
                    }
                }
                None => notify.notified().await,
            }
        }
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn complete_then_wait_resolves_immediately() {
        let store = InMemoryWaitpointStore::new();
        store.create("w1", None, vec!["exec-1".into()]).await;
        assert!(store.complete("w1", json!({ "answer": 42 })).await);

        assert_eq!(
            store.wait("w1").await,
            WaitOutcome::Completed(json!({ "answer": 42 }))
        );
        assert_eq!(store.tags("w1"), Some(vec!["exec-1".to_string()]));
    }

    #[tokio::test]
    async fn wait_blocks_until_completion() {
        let store = Arc::new(InMemoryWaitpointStore::new());
        store.create("w1", None, Vec::new()).await;

        let completer = store.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            completer.complete("w1", json!("done")).await
        });

        assert_eq!(store.wait("w1").await, WaitOutcome::Completed(json!("done")));
        assert!(task.await.unwrap());
    }

    #[tokio::test]
    async fn wait_times_out() {
        let store = InMemoryWaitpointStore::new();
        store.create("w1", Some(10), Vec::new()).await;

        match store.wait("w1").await {
            WaitOutcome::TimedOut { error } => assert!(error.contains("timed out")),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn completing_unknown_token_reports_false() {
        let store = InMemoryWaitpointStore::new();
        assert!(!store.complete("ghost", json!(null)).await);
    }
}
