//! Task status cache — coherent read-through view over the workflow
//! runtime's authoritative task state.
//!
//! The cache only amortizes query load; it is never the source of truth.
//! Three rules keep it coherent:
//! - per-key single-flight, so a cold `tasks/get` burst issues one runtime
//!   query, not many;
//! - monotonic-toward-terminal writes: once a cached state is terminal,
//!   non-terminal observations are dropped (clock-reordering defense);
//! - terminal entries are pinned for a minimum retention window so repeated
//!   reads observe the final value.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::error::GatewayResult;
use crate::types::{Task, TaskStatus};

struct CacheEntry {
    task: Task,
    expires_at: Instant,
}

/// In-process task status cache with per-entry TTL.
pub struct TaskCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    /// Per-key locks serializing misses (single-flight).
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    config: CacheConfig,
}

impl TaskCache {
    /// Create an empty cache.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Look up a live entry. Expired entries read as misses.
    pub async fn get(&self, task_id: &str) -> Option<Task> {
        let entries = self.entries.read().await;
        let entry = entries.get(task_id)?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        Some(entry.task.clone())
    }

    /// Write a task through the cache.
    ///
    /// Terminal tasks are pinned for the terminal retention window;
    /// non-terminal tasks get the short TTL. A write that would regress a
    /// terminal entry to a non-terminal state is dropped.
    pub async fn insert(&self, task: Task) {
        let mut entries = self.entries.write().await;

        if let Some(existing) = entries.get(&task.id) {
            let old = existing.task.status.state;
            let new = task.status.state;
            if old.is_terminal() && !new.is_terminal() {
                warn!(
                    task_id = %task.id,
                    cached_state = %old,
                    observed_state = %new,
                    "Dropping out-of-order non-terminal observation"
                );
                return;
            }
        }

        let ttl = if task.status.state.is_terminal() {
            self.config.terminal_retention().max(self.config.ttl())
        } else {
            self.config.ttl()
        };

        debug!(task_id = %task.id, state = %task.status.state, "Task cached");
        entries.insert(
            task.id.clone(),
            CacheEntry {
                task,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Apply a status observed from the runtime to the cached task, under
    /// the same monotonic rule as [`insert`](Self::insert).
    ///
    /// A status for a task the cache has never seen is ignored; the next
    /// read-through populates the full record.
    pub async fn observe_status(&self, task_id: &str, status: TaskStatus) {
        let updated = {
            let entries = self.entries.read().await;
            let Some(entry) = entries.get(task_id) else {
                return;
            };
            let old = entry.task.status.state;
            if old.is_terminal() && !status.state.is_terminal() {
                warn!(
                    task_id = %task_id,
                    cached_state = %old,
                    observed_state = %status.state,
                    "Dropping out-of-order status observation"
                );
                return;
            }
            let mut task = entry.task.clone();
            task.status = status;
            task
        };
        self.insert(updated).await;
    }

    /// Read-through lookup: serve the cached entry, or run `fetch` under a
    /// per-key lock and cache its result.
    ///
    /// Concurrent misses for the same task coalesce onto one `fetch`; a
    /// fetch failure is returned to every waiter rather than masked with a
    /// stale value.
    pub async fn get_or_fetch<F, Fut>(&self, task_id: &str, fetch: F) -> GatewayResult<Task>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = GatewayResult<Task>>,
    {
        if let Some(task) = self.get(task_id).await {
            return Ok(task);
        }

        let key_lock = {
            let mut inflight = self.inflight.lock().await;
            Arc::clone(
                inflight
                    .entry(task_id.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        let _guard = key_lock.lock().await;

        // A concurrent holder may have populated the entry while we waited.
        if let Some(task) = self.get(task_id).await {
            return Ok(task);
        }

        let result = fetch().await;
        if let Ok(ref task) = result {
            self.insert(task.clone()).await;
        }

        let mut inflight = self.inflight.lock().await;
        inflight.remove(task_id);

        result
    }

    /// Drop expired entries. The gateway runs this on a timer; reads stay
    /// correct without it because they check expiry themselves.
    pub async fn evict_expired(&self) {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.expires_at > now);
    }

    /// Number of entries currently held, expired or not. Test hook.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the cache holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::types::{Message, TaskState};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn config(ttl_secs: u64, retention_secs: u64) -> CacheConfig {
        CacheConfig {
            endpoint: None,
            ttl_secs,
            terminal_retention_secs: retention_secs,
        }
    }

    fn task(id: &str, state: TaskState) -> Task {
        Task {
            id: id.to_string(),
            context_id: "ctx".to_string(),
            agent_id: "echo-agent".to_string(),
            kind: "task".to_string(),
            status: crate::types::TaskStatus::now(state),
            input: Message::user_text("hi"),
            artifacts: Vec::new(),
            error: None,
            metadata: None,
            created_at: crate::types::utc_timestamp_millis(),
        }
    }

    #[tokio::test]
    async fn insert_and_get() {
        let cache = TaskCache::new(config(30, 300));
        cache.insert(task("t1", TaskState::Submitted)).await;
        let got = cache.get("t1").await.unwrap();
        assert_eq!(got.status.state, TaskState::Submitted);
        assert!(cache.get("t2").await.is_none());
    }

    #[tokio::test]
    async fn terminal_entries_never_regress() {
        let cache = TaskCache::new(config(30, 300));
        cache.insert(task("t1", TaskState::Completed)).await;
        cache.insert(task("t1", TaskState::Working)).await;
        assert_eq!(
            cache.get("t1").await.unwrap().status.state,
            TaskState::Completed
        );

        cache
            .observe_status("t1", crate::types::TaskStatus::now(TaskState::Working))
            .await;
        assert_eq!(
            cache.get("t1").await.unwrap().status.state,
            TaskState::Completed
        );
    }

    #[tokio::test]
    async fn observe_status_advances_state() {
        let cache = TaskCache::new(config(30, 300));
        cache.insert(task("t1", TaskState::Submitted)).await;
        cache
            .observe_status("t1", crate::types::TaskStatus::now(TaskState::Working))
            .await;
        assert_eq!(
            cache.get("t1").await.unwrap().status.state,
            TaskState::Working
        );
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = TaskCache::new(config(1, 300));
        cache.insert(task("t1", TaskState::Working)).await;
        assert!(cache.get("t1").await.is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("t1").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_entries_outlive_ttl() {
        let cache = TaskCache::new(config(1, 300));
        cache.insert(task("t1", TaskState::Completed)).await;

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(cache.get("t1").await.is_some());

        tokio::time::advance(Duration::from_secs(300)).await;
        assert!(cache.get("t1").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_expired_entries_but_keeps_pinned() {
        let cache = TaskCache::new(config(1, 300));
        cache.insert(task("t1", TaskState::Working)).await;
        cache.insert(task("t2", TaskState::Completed)).await;
        assert_eq!(cache.len().await, 2);

        tokio::time::advance(Duration::from_secs(2)).await;
        cache.evict_expired().await;
        assert_eq!(cache.len().await, 1);
        assert!(cache.get("t1").await.is_none());
        assert!(cache.get("t2").await.is_some());

        tokio::time::advance(Duration::from_secs(300)).await;
        cache.evict_expired().await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn single_flight_coalesces_fetches() {
        let cache = Arc::new(TaskCache::new(config(30, 300)));
        let fetches = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let fetches = Arc::clone(&fetches);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch("t1", || async move {
                        fetches.fetch_add(1, Ordering::SeqCst);
                        // Hold the key lock long enough for the others to pile up.
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(task("t1", TaskState::Working))
                    })
                    .await
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fetch_failure_is_not_masked() {
        let cache = TaskCache::new(config(30, 300));
        let result = cache
            .get_or_fetch("t1", || async {
                Err(GatewayError::downstream_unavailable("runtime down"))
            })
            .await;
        assert!(result.is_err());
        assert!(cache.get("t1").await.is_none());
    }
}
