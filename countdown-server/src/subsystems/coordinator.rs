//! Group coordinator: the single writer for one group's state.
//!
//! One coordinator task exists per group id. It drains a bounded mailbox and
//! runs each command to completion (load, mutate, persist, replicate, audit)
//! before taking the next, so commands against a group are totally ordered
//! and `version` witnesses that order.
//!
//! Commit rules:
//! - the durable store write is the commit point; if it fails the in-memory
//!   state is left as it was and the caller gets `Persistence`
//! - snapshot and audit writes go to the sink afterwards and their errors are
//!   logged, never returned
//!
//! With an idle timeout the task stops once its mailbox has been empty that
//! long. The state is already durable, so a replacement simply reloads it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use countdown_core::models::{
    AuditAction, AuditEvent, GroupBootstrap, GroupSnapshotRow, GroupState, NewSession, Session,
    SessionPatch,
};
use countdown_core::store::{self, DurableStore, StoreError, GROUP_SLOT};
use countdown_core::SnapshotSink;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Persistence failed: {0}")]
    Persistence(#[from] StoreError),

    #[error("Coordinator unavailable: {0}")]
    Unavailable(String),

    /// The mailbox was closed before the command was queued, so nothing ran.
    #[error("Coordinator stopped: {0}")]
    Stopped(String),
}

impl CoordinatorError {
    /// Stable code carried in response envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            CoordinatorError::Validation(_) => "validation",
            CoordinatorError::NotFound(_) => "not_found",
            CoordinatorError::Persistence(_) => "persistence",
            CoordinatorError::Unavailable(_) | CoordinatorError::Stopped(_) => "unavailable",
        }
    }
}

/// Result of a create or update: the touched session and the committed state.
#[derive(Debug, Clone, Serialize)]
pub struct SessionWrite {
    pub session: Session,
    pub state: GroupState,
}

pub type Reply<T> = oneshot::Sender<Result<T, CoordinatorError>>;

pub enum Command {
    GetGroup {
        reply: Reply<GroupState>,
    },
    Bootstrap {
        bootstrap: GroupBootstrap,
        reply: Reply<GroupState>,
    },
    ListSessions {
        reply: Reply<Vec<Session>>,
    },
    GetSession {
        session_id: Uuid,
        reply: Reply<Session>,
    },
    CreateSession {
        new_session: NewSession,
        reply: Reply<SessionWrite>,
    },
    UpdateSession {
        session_id: Uuid,
        patch: SessionPatch,
        reply: Reply<SessionWrite>,
    },
    DeleteSession {
        session_id: Uuid,
        reply: Reply<Uuid>,
    },
}

enum Phase {
    Uninitialized,
    Active(GroupState),
}

// ============================================================================
// Coordinator
// ============================================================================

pub struct GroupCoordinator {
    group_id: String,
    instance: Uuid,
    store: Arc<dyn DurableStore>,
    sink: Arc<dyn SnapshotSink>,
    idle_timeout: Option<Duration>,
    phase: Phase,
}

impl GroupCoordinator {
    pub fn new(
        group_id: impl Into<String>,
        store: Arc<dyn DurableStore>,
        sink: Arc<dyn SnapshotSink>,
    ) -> Self {
        let group_id = group_id.into();
        Self {
            instance: store::instance_id(&group_id),
            group_id,
            store,
            sink,
            idle_timeout: None,
            phase: Phase::Uninitialized,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Move the coordinator onto its own task and return the mailbox handle.
    pub fn spawn(self, mailbox_capacity: usize) -> CoordinatorHandle {
        let (tx, rx) = mpsc::channel(mailbox_capacity.max(1));
        let handle = CoordinatorHandle {
            group_id: self.group_id.clone(),
            tx,
        };
        tokio::spawn(self.run(rx));
        handle
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        tracing::debug!(group_id = %self.group_id, instance = %self.instance, "Coordinator started");
        loop {
            let next = match self.idle_timeout {
                Some(idle) => match tokio::time::timeout(idle, rx.recv()).await {
                    Ok(next) => next,
                    Err(_) => {
                        tracing::debug!(
                            group_id = %self.group_id,
                            idle_ms = idle.as_millis() as u64,
                            "Coordinator idle, stopping"
                        );
                        break;
                    }
                },
                None => rx.recv().await,
            };
            match next {
                Some(command) => self.handle(command).await,
                None => break,
            }
        }

        // Commands that made it into the mailbox before it closed still get answers.
        rx.close();
        while let Some(command) = rx.recv().await {
            self.handle(command).await;
        }
        tracing::debug!(group_id = %self.group_id, "Coordinator stopped");
    }

    async fn handle(&mut self, command: Command) {
        // A dropped receiver means the caller went away; the work is still done.
        match command {
            Command::GetGroup { reply } => {
                let _ = reply.send(self.get_group().await);
            }
            Command::Bootstrap { bootstrap, reply } => {
                let _ = reply.send(self.bootstrap(bootstrap).await);
            }
            Command::ListSessions { reply } => {
                let _ = reply.send(self.list_sessions().await);
            }
            Command::GetSession { session_id, reply } => {
                let _ = reply.send(self.get_session(session_id).await);
            }
            Command::CreateSession { new_session, reply } => {
                let _ = reply.send(self.create_session(new_session).await);
            }
            Command::UpdateSession {
                session_id,
                patch,
                reply,
            } => {
                let _ = reply.send(self.update_session(session_id, patch).await);
            }
            Command::DeleteSession { session_id, reply } => {
                let _ = reply.send(self.delete_session(session_id).await);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    pub async fn get_group(&mut self) -> Result<GroupState, CoordinatorError> {
        Ok(self.load().await?.clone())
    }

    pub async fn list_sessions(&mut self) -> Result<Vec<Session>, CoordinatorError> {
        Ok(self.load().await?.sessions.clone())
    }

    pub async fn get_session(&mut self, session_id: Uuid) -> Result<Session, CoordinatorError> {
        self.load()
            .await?
            .find_session(session_id)
            .cloned()
            .ok_or_else(|| CoordinatorError::NotFound("Session".to_string()))
    }

    pub async fn bootstrap(
        &mut self,
        bootstrap: GroupBootstrap,
    ) -> Result<GroupState, CoordinatorError> {
        let mut next = self.load().await?.clone();
        if let Some(ignored) = bootstrap
            .apply_to(&mut next)
            .map_err(CoordinatorError::Validation)?
        {
            tracing::warn!(
                group_id = %self.group_id,
                requested = %ignored,
                "Bootstrap groupId differs from the existing one; keeping existing"
            );
        }
        self.commit(next, None).await
    }

    pub async fn create_session(
        &mut self,
        new_session: NewSession,
    ) -> Result<SessionWrite, CoordinatorError> {
        let session = new_session
            .into_session()
            .map_err(CoordinatorError::Validation)?;

        let mut next = self.load().await?.clone();
        next.insert_session(session.clone());

        let event = AuditEvent::new(
            next.group_id.clone(),
            session.session_id,
            AuditAction::SessionCreated,
            to_payload(&session),
        );
        let state = self.commit(next, Some(event)).await?;
        Ok(SessionWrite { session, state })
    }

    pub async fn update_session(
        &mut self,
        session_id: Uuid,
        patch: SessionPatch,
    ) -> Result<SessionWrite, CoordinatorError> {
        let mut next = self.load().await?.clone();
        let target = next
            .find_session_mut(session_id)
            .ok_or_else(|| CoordinatorError::NotFound("Session".to_string()))?;
        patch
            .apply_to(target)
            .map_err(CoordinatorError::Validation)?;
        let session = target.clone();
        next.sort_sessions();

        // The event records what was asked for, not the resulting session.
        let event = AuditEvent::new(
            next.group_id.clone(),
            session_id,
            AuditAction::SessionUpdated,
            to_payload(&patch),
        );
        let state = self.commit(next, Some(event)).await?;
        Ok(SessionWrite { session, state })
    }

    pub async fn delete_session(&mut self, session_id: Uuid) -> Result<Uuid, CoordinatorError> {
        let mut next = self.load().await?.clone();
        let removed = next
            .remove_session(session_id)
            .ok_or_else(|| CoordinatorError::NotFound("Session".to_string()))?;

        let event = AuditEvent::new(
            next.group_id.clone(),
            session_id,
            AuditAction::SessionDeleted,
            to_payload(&removed),
        );
        self.commit(next, Some(event)).await?;
        Ok(session_id)
    }

    // ------------------------------------------------------------------------
    // Lifecycle and persistence
    // ------------------------------------------------------------------------

    /// UNINITIALIZED → ACTIVE on first use. A failed read leaves the
    /// coordinator uninitialized so the next command retries.
    async fn load(&mut self) -> Result<&GroupState, CoordinatorError> {
        if matches!(self.phase, Phase::Uninitialized) {
            let state = match self.store.get(self.instance, GROUP_SLOT).await? {
                Some(blob) => {
                    let state: GroupState =
                        serde_json::from_slice(&blob).map_err(|source| StoreError::Serialization {
                            key: format!("{}/{}", self.instance, GROUP_SLOT),
                            source,
                        })?;
                    tracing::info!(
                        group_id = %self.group_id,
                        version = state.version,
                        sessions = state.sessions.len(),
                        "Loaded persisted group state"
                    );
                    state
                }
                None => {
                    tracing::debug!(group_id = %self.group_id, "No persisted state, using fallback");
                    GroupState::fallback(self.group_id.clone(), Utc::now())
                }
            };
            self.phase = Phase::Active(state);
        }

        match &self.phase {
            Phase::Active(state) => Ok(state),
            Phase::Uninitialized => Err(CoordinatorError::Unavailable(
                "group state not loaded".to_string(),
            )),
        }
    }

    async fn commit(
        &mut self,
        mut next: GroupState,
        event: Option<AuditEvent>,
    ) -> Result<GroupState, CoordinatorError> {
        next.stamp(Utc::now());

        let key = format!("{}/{}", self.instance, GROUP_SLOT);
        let blob = serde_json::to_vec(&next)
            .map_err(|source| StoreError::Serialization { key, source })?;
        if let Err(e) = self.store.put(self.instance, GROUP_SLOT, &blob).await {
            tracing::error!(
                group_id = %self.group_id,
                store = self.store.name(),
                error = %e,
                "Durable store write failed; mutation not committed"
            );
            return Err(e.into());
        }
        self.phase = Phase::Active(next.clone());
        tracing::info!(group_id = %self.group_id, version = next.version, "Committed group state");

        self.replicate(&next).await;
        if let Some(event) = event {
            self.audit(&event).await;
        }
        Ok(next)
    }

    async fn replicate(&self, state: &GroupState) {
        let row = match GroupSnapshotRow::from_state(state) {
            Ok(row) => row,
            Err(e) => {
                tracing::warn!(group_id = %self.group_id, error = %e, "Snapshot encode failed");
                return;
            }
        };
        if let Err(e) = self.sink.upsert_snapshot(&row).await {
            tracing::warn!(
                group_id = %self.group_id,
                sink = self.sink.name(),
                version = state.version,
                error = %e,
                "Snapshot sync failed"
            );
        }
    }

    async fn audit(&self, event: &AuditEvent) {
        if let Err(e) = self.sink.record_event(event).await {
            tracing::warn!(
                group_id = %self.group_id,
                session_id = %event.session_id,
                action = event.action.as_str(),
                error = %e,
                "Event persistence skipped"
            );
        }
    }
}

fn to_payload<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_else(|_| serde_json::json!({}))
}

// ============================================================================
// Handle
// ============================================================================

/// Cloneable mailbox address of a running coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    group_id: String,
    tx: mpsc::Sender<Command>,
}

impl CoordinatorHandle {
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// True once the coordinator task has exited.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, CoordinatorError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(build(reply)).await.map_err(|_| {
            CoordinatorError::Stopped(format!("coordinator for {} is not running", self.group_id))
        })?;
        rx.await.map_err(|_| {
            CoordinatorError::Unavailable(format!("coordinator for {} dropped reply", self.group_id))
        })?
    }

    pub async fn get_group(&self) -> Result<GroupState, CoordinatorError> {
        self.call(|reply| Command::GetGroup { reply }).await
    }

    pub async fn bootstrap(&self, bootstrap: GroupBootstrap) -> Result<GroupState, CoordinatorError> {
        self.call(|reply| Command::Bootstrap { bootstrap, reply })
            .await
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>, CoordinatorError> {
        self.call(|reply| Command::ListSessions { reply }).await
    }

    pub async fn get_session(&self, session_id: Uuid) -> Result<Session, CoordinatorError> {
        self.call(|reply| Command::GetSession { session_id, reply })
            .await
    }

    pub async fn create_session(
        &self,
        new_session: NewSession,
    ) -> Result<SessionWrite, CoordinatorError> {
        self.call(|reply| Command::CreateSession { new_session, reply })
            .await
    }

    pub async fn update_session(
        &self,
        session_id: Uuid,
        patch: SessionPatch,
    ) -> Result<SessionWrite, CoordinatorError> {
        self.call(|reply| Command::UpdateSession {
            session_id,
            patch,
            reply,
        })
        .await
    }

    pub async fn delete_session(&self, session_id: Uuid) -> Result<Uuid, CoordinatorError> {
        self.call(|reply| Command::DeleteSession { session_id, reply })
            .await
    }
}

// ============================================================================
// Tests
// ============================================================================
