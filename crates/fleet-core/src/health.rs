//! Liveness probes for companion workers.

use bytes::Bytes;
use fleet_bus::{SessionHandle, SubjectPatterns};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Fans out `ping.<worker>` requests.
#[derive(Clone)]
pub struct HealthProbe {
    session: Arc<SessionHandle>,
}

impl HealthProbe {
    pub fn new(session: Arc<SessionHandle>) -> Self {
        Self { session }
    }

    /// Probe every target concurrently under one shared deadline.
    ///
    /// Any reply means up. Without a live session nothing is sent and every
    /// target is down.
    pub async fn probe_all(&self, targets: &[String], timeout: Duration) -> HashMap<String, bool> {
        let Some(session) = self.session.live() else {
            debug!(targets = targets.len(), "Bus down, skipping probes");
            return targets.iter().map(|t| (t.clone(), false)).collect();
        };

        let transport = session.transport();
        let probes = targets.iter().map(|target| {
            let subject = SubjectPatterns::ping(target);
            async move {
                let up = tokio::time::timeout(timeout, transport.request(&subject, Bytes::new(), timeout))
                    .await
                    .map(|reply| reply.is_ok())
                    .unwrap_or(false);
                debug!(worker = %target, up, "Probe finished");
                (target.clone(), up)
            }
        });

        join_all(probes).await.into_iter().collect()
    }
}
