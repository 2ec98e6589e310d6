//! Swappable bus session shared by every dispatch.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

use crate::traits::BusTransport;

/// A live bus connection plus the durable streams known to exist on it.
///
/// Sessions are immutable. Reconnecting or finishing provisioning builds a
/// new one and swaps it into the [`SessionHandle`].
pub struct BusSession {
    transport: Arc<dyn BusTransport>,
    streams: Vec<String>,
    established_at: DateTime<Utc>,
}

impl BusSession {
    pub fn new(transport: Arc<dyn BusTransport>) -> Self {
        Self {
            transport,
            streams: vec![],
            established_at: Utc::now(),
        }
    }

    /// Same connection, with the given provisioned streams.
    #[must_use]
    pub fn with_streams(&self, streams: Vec<String>) -> Self {
        Self {
            transport: self.transport.clone(),
            streams,
            established_at: self.established_at,
        }
    }

    pub fn transport(&self) -> &Arc<dyn BusTransport> {
        &self.transport
    }

    pub fn streams(&self) -> &[String] {
        &self.streams
    }

    pub fn established_at(&self) -> DateTime<Utc> {
        self.established_at
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }
}

impl std::fmt::Debug for BusSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusSession")
            .field("streams", &self.streams)
            .field("established_at", &self.established_at)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Process-wide slot holding the current session.
///
/// Readers get a clone of the `Arc`, so they never see a half-built session
/// and are unaffected by a concurrent swap.
#[derive(Default)]
pub struct SessionHandle {
    current: RwLock<Option<Arc<BusSession>>>,
}

impl SessionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current session, if any.
    pub fn current(&self) -> Option<Arc<BusSession>> {
        self.current.read().clone()
    }

    /// The current session if it is still connected.
    pub fn live(&self) -> Option<Arc<BusSession>> {
        self.current().filter(|s| s.is_connected())
    }

    pub fn is_connected(&self) -> bool {
        self.live().is_some()
    }

    /// Install a new session, returning the one it replaced.
    pub fn replace(&self, session: BusSession) -> Option<Arc<BusSession>> {
        self.current.write().replace(Arc::new(session))
    }

    /// Remove the session, returning it.
    pub fn take(&self) -> Option<Arc<BusSession>> {
        self.current.write().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBus;

    #[test]
    fn test_empty_handle_is_disconnected() {
        let handle = SessionHandle::new();
        assert!(handle.current().is_none());
        assert!(!handle.is_connected());
    }

    #[test]
    fn test_replace_swaps_whole_session() {
        let handle = SessionHandle::new();
        let bus = MemoryBus::new();

        assert!(handle.replace(BusSession::new(bus.transport())).is_none());
        let first = handle.current().unwrap();
        assert!(first.streams().is_empty());

        let previous = handle.replace(first.with_streams(vec!["AGENTS_STREAM".into()]));
        assert!(previous.is_some());

        // The reader's copy is untouched by the swap.
        assert!(first.streams().is_empty());
        assert_eq!(handle.current().unwrap().streams(), ["AGENTS_STREAM"]);
    }

    #[test]
    fn test_stale_session_is_not_live() {
        let handle = SessionHandle::new();
        let bus = MemoryBus::new();
        handle.replace(BusSession::new(bus.transport()));
        assert!(handle.is_connected());

        bus.set_connected(false);
        assert!(handle.current().is_some());
        assert!(handle.live().is_none());
        assert!(!handle.is_connected());
    }
}
