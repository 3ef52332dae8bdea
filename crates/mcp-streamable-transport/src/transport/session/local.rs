//! In-memory [`SessionManager`]: every session lives in a `HashMap` guarded
//! by a single mutex for the process's lifetime. Suitable for a
//! single-instance deployment; a multi-instance deployment needs a shared
//! back-end behind the same trait (spec.md §6 "a distributed cache or
//! database is a valid substitute").

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::sync::mpsc::Receiver;

use super::{InboxItem, SessionManager, SessionTransport, generate_session_id};
use crate::transport::event_store::{EventStreamStore, RetentionPolicy};

pub struct LocalSessionManager {
    sessions: Mutex<HashMap<Arc<str>, Arc<SessionTransport>>>,
    stateless: bool,
    retry_interval: Duration,
    supports_resumability: Arc<dyn Fn(&str) -> bool + Send + Sync>,
    event_store: Option<EventStreamStore>,
}

impl LocalSessionManager {
    pub fn new(
        retry_interval: Duration,
        supports_resumability: Arc<dyn Fn(&str) -> bool + Send + Sync>,
        retention: RetentionPolicy,
    ) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            stateless: false,
            retry_interval,
            supports_resumability,
            event_store: Some(EventStreamStore::new(retention)),
        }
    }

    pub async fn active_session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

impl SessionManager for LocalSessionManager {
    async fn create_session(&self) -> (Arc<SessionTransport>, Receiver<InboxItem>) {
        let id = generate_session_id();
        let (session, rx) = SessionTransport::new(
            id.clone(),
            self.stateless,
            false,
            self.retry_interval,
            self.supports_resumability.clone(),
            self.event_store.clone(),
        );
        self.sessions.lock().await.insert(id, session.clone());
        (session, rx)
    }

    async fn get_session(&self, id: &str) -> Option<Arc<SessionTransport>> {
        self.sessions.lock().await.get(id).cloned()
    }

    async fn terminate_session(&self, id: &str) {
        let removed = self.sessions.lock().await.remove(id);
        if let Some(session) = removed {
            session.dispose().await;
        }
    }
}
