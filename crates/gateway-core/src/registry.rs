//! C11 — process-wide set of active sessions (spec.md §5 "Global mutable
//! set of active peer connections").
//!
//! The capacity check and the insert happen under one write-lock scope to
//! avoid a TOCTOU race between two concurrent offers.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::orchestrator::SessionOrchestrator;
use crate::session::Session;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("maximum concurrent sessions reached ({0})")]
    AtCapacity(usize),
}

struct Entry {
    session: Arc<Session>,
    orchestrator: Arc<SessionOrchestrator>,
}

/// Holds every session currently alive in this process. One instance per
/// server.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Entry>>,
    max_concurrent: usize,
}

impl SessionRegistry {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_concurrent,
        }
    }

    /// Reserves a slot and registers `session`/`orchestrator` atomically.
    /// Rejects with `AtCapacity` if `max_concurrent` is already reached
    /// (spec.md §5 "Reject new sessions above the configured ceiling").
    pub async fn insert(
        &self,
        session: Arc<Session>,
        orchestrator: Arc<SessionOrchestrator>,
    ) -> Result<(), RegistryError> {
        let mut sessions = self.sessions.write().await;
        if sessions.len() >= self.max_concurrent {
            return Err(RegistryError::AtCapacity(self.max_concurrent));
        }
        sessions.insert(
            session.session_id().to_string(),
            Entry {
                session,
                orchestrator,
            },
        );
        Ok(())
    }

    pub async fn remove(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<SessionOrchestrator>> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|e| e.orchestrator.clone())
    }

    /// Session ids whose session has been idle past `timeout_ms`
    /// (spec.md §4.7 idle watchdog).
    pub async fn idle_sessions(&self, now: u64, timeout_ms: u64) -> Vec<String> {
        self.sessions
            .read()
            .await
            .iter()
            .filter(|(_, e)| e.session.is_idle(now, timeout_ms))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Closes every active session and drains the registry. Used on
    /// graceful shutdown (spec.md §5 "Stop accepting new offers... close
    /// every active session").
    pub async fn shutdown_all(&self) {
        let entries: Vec<Arc<SessionOrchestrator>> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().map(|(_, e)| e.orchestrator).collect()
        };
        for orchestrator in entries {
            orchestrator.begin_closing().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::fakes::RecordingSink;
    use gateway_protocol::SessionConfigAdvertised;

    fn advertised() -> SessionConfigAdvertised {
        SessionConfigAdvertised {
            max_resolution: (1280, 720),
            confidence_threshold: 0.5,
            idle_timeout_sec: 30,
            bbox_format: "absolute_px",
        }
    }

    #[tokio::test]
    async fn rejects_insert_past_capacity() {
        let registry = SessionRegistry::new(1);
        let session_a = Arc::new(Session::new("a".to_string()));
        let sink = Arc::new(RecordingSink::new(true));
        let orchestrator_a = Arc::new(SessionOrchestrator::new(
            session_a.clone(),
            sink.clone(),
            advertised(),
        ));
        registry.insert(session_a, orchestrator_a).await.unwrap();

        let session_b = Arc::new(Session::new("b".to_string()));
        let orchestrator_b = Arc::new(SessionOrchestrator::new(session_b.clone(), sink, advertised()));
        let result = registry.insert(session_b, orchestrator_b).await;
        assert!(matches!(result, Err(RegistryError::AtCapacity(1))));
    }

    #[tokio::test]
    async fn shutdown_all_closes_and_drains() {
        let registry = SessionRegistry::new(10);
        let session = Arc::new(Session::new("a".to_string()));
        let sink = Arc::new(RecordingSink::new(true));
        let orchestrator = Arc::new(SessionOrchestrator::new(session.clone(), sink, advertised()));
        registry.insert(session, orchestrator).await.unwrap();

        registry.shutdown_all().await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn idle_sessions_reports_only_past_timeout() {
        let registry = SessionRegistry::new(10);
        let session = Arc::new(Session::new("a".to_string()));
        session.record_frame();
        let sink = Arc::new(RecordingSink::new(true));
        let orchestrator = Arc::new(SessionOrchestrator::new(session.clone(), sink, advertised()));
        let last_activity = crate::clock::now_ms();
        registry.insert(session, orchestrator).await.unwrap();

        let still_active = registry.idle_sessions(last_activity, 30_000).await;
        assert!(still_active.is_empty());

        let idle = registry.idle_sessions(last_activity + 30_001, 30_000).await;
        assert_eq!(idle, vec!["a".to_string()]);
    }
}
