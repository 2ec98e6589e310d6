//! Command dispatch.
//!
//! One envelope, one target. Fan-out belongs to the caller so a failing
//! agent never stops the others.

use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::command::{DeliveryMode, DispatchEnvelope, ReplyStatus};
use crate::error::FleetError;
use crate::supervisor::BusSupervisor;

/// How the bus accepted an envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Receipt {
    /// Acknowledged by the durable stream.
    Accepted,
    /// Answer from the agent.
    Reply(Bytes),
    /// Handed to a background publish.
    Detached,
}

/// Proof that an envelope left this process.
///
/// Only the dispatcher creates these, which is what lets a
/// [`SettlementPlan`](crate::settlement::SettlementPlan) demand one.
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub(crate) envelope: DispatchEnvelope,
    pub(crate) receipt: Receipt,
}

impl Dispatched {
    pub fn envelope(&self) -> &DispatchEnvelope {
        &self.envelope
    }

    pub fn receipt(&self) -> &Receipt {
        &self.receipt
    }

    /// Reply body for request/reply dispatches.
    pub fn reply(&self) -> Option<&Bytes> {
        match &self.receipt {
            Receipt::Reply(body) => Some(body),
            _ => None,
        }
    }
}

/// Sends envelopes over the current bus session.
#[derive(Clone)]
pub struct Dispatcher {
    supervisor: Arc<BusSupervisor>,
    domain: String,
}

impl Dispatcher {
    pub fn new(supervisor: Arc<BusSupervisor>, domain: impl Into<String>) -> Self {
        Self {
            supervisor,
            domain: domain.into(),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Deliver `envelope` according to its mode.
    ///
    /// # Errors
    ///
    /// - [`FleetError::BusUnavailable`] without a live session, returned
    ///   before any I/O
    /// - [`FleetError::NoResponder`] on timeout or when nothing listens
    /// - [`FleetError::DispatchRejected`] when the broker or the agent refuses
    pub async fn dispatch(&self, envelope: DispatchEnvelope) -> Result<Dispatched, FleetError> {
        let Some(session) = self.supervisor.session().live() else {
            if let Err(e) = self.supervisor.ensure_supervised() {
                warn!(error = %e, "Could not schedule bus reconnection");
            }
            return Err(FleetError::BusUnavailable(format!(
                "no live session for {}",
                envelope.subject(&self.domain)
            )));
        };

        let subject = envelope.subject(&self.domain);
        let transport = session.transport().clone();
        debug!(
            id = %envelope.id,
            agent_id = %envelope.agent_id,
            subject = %subject,
            mode = ?envelope.mode,
            "Dispatching"
        );

        let receipt = match envelope.mode {
            DeliveryMode::Durable => {
                transport
                    .publish_durable(&subject, envelope.payload.clone())
                    .await
                    .map_err(|e| FleetError::from_dispatch(&envelope.agent_id, &subject, e))?;
                Receipt::Accepted
            }
            DeliveryMode::Request { timeout } => {
                let reply = transport
                    .request(&subject, envelope.payload.clone(), timeout)
                    .await
                    .map_err(|e| FleetError::from_dispatch(&envelope.agent_id, &subject, e))?;

                if let Some(reason) = ReplyStatus::error_in(&reply) {
                    return Err(FleetError::DispatchRejected {
                        agent_id: envelope.agent_id.clone(),
                        reason,
                    });
                }
                Receipt::Reply(reply)
            }
            DeliveryMode::Detached => {
                let payload = envelope.payload.clone();
                let agent_id = envelope.agent_id.clone();
                tokio::spawn(async move {
                    if let Err(e) = transport.publish(&subject, payload).await {
                        warn!(agent_id = %agent_id, subject = %subject, error = %e, "Detached publish failed");
                    }
                });
                Receipt::Detached
            }
        };

        Ok(Dispatched { envelope, receipt })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{AgentRef, Command, StatusCommand};
    use crate::config::FleetConfig;
    use crate::error::ErrorKind;
    use crate::lifecycle::AgentStatus;
    use crate::supervisor::SupervisorState;
    use crate::test_support::{provisioned_bus, MemoryStore};
    use fleet_bus::{BusError, BusSession, BusTransport, Delivery, MemoryBus, Responder};
    use std::time::{Duration, Instant};

    fn dispatcher(bus: &MemoryBus) -> Dispatcher {
        let supervisor = Arc::new(
            BusSupervisor::new(
                Arc::new(bus.clone()),
                Arc::new(MemoryStore::new()),
                FleetConfig::default(),
            )
            .reconnect_interval(Duration::from_secs(60)),
        );
        if bus.is_connected() {
            supervisor.session().replace(BusSession::new(bus.transport()));
        }
        Dispatcher::new(supervisor, "agent")
    }

    fn enable(agent_id: &str) -> DispatchEnvelope {
        DispatchEnvelope::durable(
            agent_id,
            Command::Enable,
            &StatusCommand {
                agent_id: agent_id.into(),
                status: AgentStatus::Enabled,
            },
        )
        .unwrap()
    }

    fn restart(agent_id: &str) -> DispatchEnvelope {
        DispatchEnvelope::request(
            agent_id,
            Command::Restart,
            &AgentRef {
                agent_id: agent_id.into(),
            },
            Duration::from_millis(50),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_disconnected_dispatch_fails_fast() {
        let bus = MemoryBus::new();
        bus.set_connected(false);
        bus.set_reachable(false);
        let dispatcher = dispatcher(&bus);

        let started = Instant::now();
        let err = dispatcher.dispatch(enable("a1")).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::BusUnavailable);
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(bus.messages().is_empty());
        assert_eq!(dispatcher.supervisor.state(), SupervisorState::Connecting);
    }

    #[tokio::test]
    async fn test_durable_dispatch_is_acknowledged() {
        let bus = provisioned_bus();
        let dispatcher = dispatcher(&bus);

        let dispatched = dispatcher.dispatch(enable("a1")).await.unwrap();

        assert_eq!(dispatched.receipt(), &Receipt::Accepted);
        let sent = bus.messages_on("agent.enable.a1");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].delivery, Delivery::Durable);
    }

    #[tokio::test]
    async fn test_durable_dispatch_without_stream_has_no_responder() {
        let bus = MemoryBus::new();
        let dispatcher = dispatcher(&bus);

        let err = dispatcher.dispatch(enable("a1")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoResponder);
    }

    #[tokio::test]
    async fn test_request_returns_reply() {
        let bus = provisioned_bus();
        bus.respond("agent.restart.a1", Responder::Reply(Bytes::from_static(b"{}")));
        let dispatcher = dispatcher(&bus);

        let dispatched = dispatcher.dispatch(restart("a1")).await.unwrap();
        assert_eq!(dispatched.reply().unwrap().as_ref(), b"{}");
    }

    #[tokio::test]
    async fn test_request_timeout_is_no_responder() {
        let bus = provisioned_bus();
        bus.respond("agent.restart.a1", Responder::Silent);
        let dispatcher = dispatcher(&bus);

        let err = dispatcher.dispatch(restart("a1")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoResponder);

        let err = dispatcher.dispatch(restart("a2")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoResponder);
    }

    #[tokio::test]
    async fn test_reply_error_is_rejection() {
        let bus = provisioned_bus();
        bus.respond(
            "agent.restart.a1",
            Responder::Reply(Bytes::from_static(br#"{"error":"restart refused"}"#)),
        );
        let dispatcher = dispatcher(&bus);

        let err = dispatcher.dispatch(restart("a1")).await.unwrap_err();
        match err {
            FleetError::DispatchRejected { agent_id, reason } => {
                assert_eq!(agent_id, "a1");
                assert_eq!(reason, "restart refused");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_broker_refusal_is_rejection() {
        let bus = provisioned_bus();
        bus.fail(
            "agent.enable.a1",
            BusError::PublishFailed("maximum payload exceeded".into()),
        );
        let dispatcher = dispatcher(&bus);

        let err = dispatcher.dispatch(enable("a1")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DispatchRejected);
    }

    #[tokio::test]
    async fn test_detached_dispatch_returns_before_publish() {
        let bus = provisioned_bus();
        let dispatcher = dispatcher(&bus);
        let envelope = DispatchEnvelope::detached(
            "a1",
            Command::Report,
            &AgentRef {
                agent_id: "a1".into(),
            },
        )
        .unwrap();

        let dispatched = dispatcher.dispatch(envelope).await.unwrap();
        assert_eq!(dispatched.receipt(), &Receipt::Detached);

        tokio::time::timeout(Duration::from_secs(1), async {
            while bus.messages_on("agent.report.a1").is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(bus.messages_on("agent.report.a1")[0].delivery, Delivery::Core);
    }
}
