//! Registry: one coordinator per group id.
//!
//! The registry is the only way to reach a coordinator. It spawns the task on
//! first use and hands out clones of the same mailbox afterwards, so every
//! request for a group funnels through one writer. Groups never share a
//! coordinator and proceed in parallel.
//!
//! Coordinators stop on their own after an idle period. Their entries are
//! pruned the next time a coordinator is spawned.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use countdown_core::{DurableStore, SnapshotSink};

use super::coordinator::{CoordinatorError, CoordinatorHandle, GroupCoordinator};

pub struct CoordinatorRegistry {
    store: Arc<dyn DurableStore>,
    sink: Arc<dyn SnapshotSink>,
    mailbox_capacity: usize,
    idle_timeout: Option<Duration>,
    handles: Mutex<HashMap<String, CoordinatorHandle>>,
}

impl CoordinatorRegistry {
    pub fn new(
        store: Arc<dyn DurableStore>,
        sink: Arc<dyn SnapshotSink>,
        mailbox_capacity: usize,
    ) -> Self {
        Self {
            store,
            sink,
            mailbox_capacity,
            idle_timeout: None,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Idle period after which a coordinator stops. `None` keeps them running.
    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Mailbox for `group_id`, spawning its coordinator if none is running.
    /// Must be called from within a tokio runtime.
    pub fn handle(&self, group_id: &str) -> Result<CoordinatorHandle, CoordinatorError> {
        let group_id = group_id.trim();
        if group_id.is_empty() {
            return Err(CoordinatorError::Validation("groupId is required".to_string()));
        }

        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = handles.get(group_id).filter(|h| !h.is_closed()) {
            return Ok(handle.clone());
        }

        let before = handles.len();
        handles.retain(|_, h| !h.is_closed());
        if handles.len() < before {
            tracing::debug!(pruned = before - handles.len(), "Dropped stopped coordinators");
        }

        let handle = GroupCoordinator::new(group_id, self.store.clone(), self.sink.clone())
            .with_idle_timeout(self.idle_timeout)
            .spawn(self.mailbox_capacity);
        handles.insert(group_id.to_string(), handle.clone());
        tracing::debug!(group_id, active = handles.len(), "Coordinator registered");
        Ok(handle)
    }

    /// Run `op` against the coordinator of `group_id`.
    ///
    /// A coordinator can stop for idleness between lookup and send. The
    /// command was never queued in that case, so it is retried once on a
    /// freshly spawned coordinator.
    pub async fn call<T, F, Fut>(&self, group_id: &str, op: F) -> Result<T, CoordinatorError>
    where
        F: Fn(CoordinatorHandle) -> Fut,
        Fut: Future<Output = Result<T, CoordinatorError>>,
    {
        match op(self.handle(group_id)?).await {
            Err(CoordinatorError::Stopped(reason)) => {
                tracing::debug!(group_id, %reason, "Coordinator stopped before send, retrying");
                op(self.handle(group_id)?).await
            }
            other => other,
        }
    }

    /// Number of coordinators currently running.
    pub fn active_groups(&self) -> usize {
        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|h| !h.is_closed())
            .count()
    }

    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    pub fn sink_name(&self) -> &str {
        self.sink.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use countdown_core::models::NewSession;
    use countdown_core::{MemorySink, MemoryStore};
    use serde_json::json;

    fn registry() -> CoordinatorRegistry {
        CoordinatorRegistry::new(Arc::new(MemoryStore::new()), Arc::new(MemorySink::new()), 16)
    }

    fn new_session(label: &str) -> NewSession {
        serde_json::from_value(json!({
            "label": label,
            "startTimeUtc": "2026-01-01T10:00:00Z",
            "durationMs": 1000
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_same_group_shares_one_coordinator() {
        let registry = registry();
        let a = registry.handle("finals").unwrap();
        let b = registry.handle("finals").unwrap();

        a.create_session(new_session("one")).await.unwrap();
        let state = b.get_group().await.unwrap();
        assert_eq!(state.version, 1);
        assert_eq!(registry.active_groups(), 1);
    }

    #[tokio::test]
    async fn test_groups_are_independent() {
        let registry = registry();
        registry
            .handle("a")
            .unwrap()
            .create_session(new_session("in a"))
            .await
            .unwrap();

        let b = registry.handle("b").unwrap().get_group().await.unwrap();
        assert_eq!(b.version, 0);
        assert!(b.sessions.is_empty());
        assert_eq!(registry.active_groups(), 2);
    }

    #[tokio::test]
    async fn test_blank_group_id_is_rejected() {
        let registry = registry();
        let err = registry.handle("  ").err().unwrap();
        assert_eq!(err.code(), "validation");
        assert_eq!(registry.active_groups(), 0);
    }

    #[tokio::test]
    async fn test_new_registry_reloads_from_shared_store() {
        let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
        let sink: Arc<dyn SnapshotSink> = Arc::new(MemorySink::new());

        let first = CoordinatorRegistry::new(store.clone(), sink.clone(), 4);
        first
            .handle("restart")
            .unwrap()
            .create_session(new_session("kept"))
            .await
            .unwrap();
        drop(first);

        let second = CoordinatorRegistry::new(store, sink, 4);
        let sessions = second.handle("restart").unwrap().list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].label, "kept");
    }

    #[tokio::test]
    async fn test_idle_group_is_evicted_and_reloads() {
        let registry = registry().with_idle_timeout(Some(Duration::from_millis(50)));
        let first = registry.handle("idle").unwrap();
        first.create_session(new_session("kept")).await.unwrap();
        assert_eq!(registry.active_groups(), 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(first.is_closed());
        assert_eq!(registry.active_groups(), 0);

        let state = registry.handle("idle").unwrap().get_group().await.unwrap();
        assert_eq!(state.version, 1);
        assert_eq!(state.sessions[0].label, "kept");
        assert_eq!(registry.active_groups(), 1);
    }

    #[tokio::test]
    async fn test_read_only_lookups_do_not_accumulate() {
        let registry = registry().with_idle_timeout(Some(Duration::from_millis(20)));
        for i in 0..50 {
            registry
                .handle(&format!("visitor-{}", i))
                .unwrap()
                .get_group()
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(registry.active_groups(), 0);

        registry.handle("fresh").unwrap();
        assert_eq!(registry.handles.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_call_retries_on_stopped_coordinator() {
        let registry = registry().with_idle_timeout(Some(Duration::from_millis(20)));
        let stale = registry.handle("g").unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(matches!(
            stale.get_group().await,
            Err(CoordinatorError::Stopped(_))
        ));

        let write = registry
            .call("g", |h| async move { h.create_session(new_session("late")).await })
            .await
            .unwrap();
        assert_eq!(write.state.version, 1);
    }
}
