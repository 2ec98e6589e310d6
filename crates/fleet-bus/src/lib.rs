//! # fleet-bus
//!
//! Message bus transport for fleet command delivery.
//!
//! Provides durable publish into JetStream streams, request/reply with a
//! bounded timeout, declarative stream configuration and the swappable
//! session every dispatch reads from.

mod error;
mod memory;
mod nats;
mod patterns;
mod session;
mod stream;
mod traits;

pub use error::BusError;
pub use memory::{Delivery, MemoryBus, RecordedMessage, Responder};
pub use nats::{NatsBus, NatsConfig, NatsConnector, NatsTls};
pub use patterns::{SubjectPatterns, AGENT_DOMAIN, PING_DOMAIN};
pub use session::{BusSession, SessionHandle};
pub use stream::{StreamConfig, StreamRetention};
pub use traits::{BusTransport, Connector};
