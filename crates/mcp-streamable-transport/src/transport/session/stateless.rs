//! [`SessionManager`] for stateless mode: spec.md §3 "no per-call state is
//! retained between requests". Each call gets a fresh, unregistered
//! [`SessionTransport`] so `PostTransport`/error-handling logic can be
//! shared unchanged with stateful mode; lookups by id always miss, since
//! there is nothing to look up.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::Receiver;

use super::{InboxItem, SessionManager, SessionTransport, generate_session_id};

pub struct StatelessSessionManager {
    retry_interval: Duration,
}

impl StatelessSessionManager {
    pub fn new(retry_interval: Duration) -> Self {
        Self { retry_interval }
    }
}

impl SessionManager for StatelessSessionManager {
    async fn create_session(&self) -> (Arc<SessionTransport>, Receiver<InboxItem>) {
        SessionTransport::new(
            generate_session_id(),
            true,
            false,
            self.retry_interval,
            Arc::new(|_: &str| false),
            None,
        )
    }

    async fn get_session(&self, _id: &str) -> Option<Arc<SessionTransport>> {
        None
    }

    async fn terminate_session(&self, _id: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sessions_are_never_retrievable_by_id() {
        let mgr = StatelessSessionManager::new(Duration::from_millis(500));
        let (session, _rx) = mgr.create_session().await;
        assert!(session.is_stateless());
        assert!(mgr.get_session(session.id()).await.is_none());
    }
}
