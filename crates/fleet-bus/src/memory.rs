//! In-process message bus.
//!
//! Behaves like a single NATS node with JetStream: durable publishes must be
//! captured by a declared stream, requests need a registered responder.
//! Every message is recorded so callers can inspect what was sent. Failures
//! and disconnects can be injected per subject.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::BusError;
use crate::stream::StreamConfig;
use crate::traits::{BusTransport, Connector};

/// How a recorded message was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Core,
    Durable,
    Request,
}

/// A message seen by the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedMessage {
    pub subject: String,
    pub payload: Bytes,
    pub delivery: Delivery,
}

/// What a responder does with a request.
#[derive(Debug, Clone)]
pub enum Responder {
    /// Reply immediately.
    Reply(Bytes),
    /// Reply after a delay.
    After(Duration, Bytes),
    /// Subscribed but never answers.
    Silent,
}

struct Inner {
    reachable: AtomicBool,
    connected: AtomicBool,
    connect_attempts: AtomicUsize,
    stream_writes: AtomicUsize,
    streams: Mutex<HashMap<String, StreamConfig>>,
    responders: Mutex<HashMap<String, Responder>>,
    failures: Mutex<HashMap<String, BusError>>,
    messages: Mutex<Vec<RecordedMessage>>,
}

/// In-process bus. Clones share state.
#[derive(Clone)]
pub struct MemoryBus {
    inner: Arc<Inner>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    /// A reachable, connected bus with no streams.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                reachable: AtomicBool::new(true),
                connected: AtomicBool::new(true),
                connect_attempts: AtomicUsize::new(0),
                stream_writes: AtomicUsize::new(0),
                streams: Mutex::new(HashMap::new()),
                responders: Mutex::new(HashMap::new()),
                failures: Mutex::new(HashMap::new()),
                messages: Mutex::new(Vec::new()),
            }),
        }
    }

    /// This bus as a shared transport.
    pub fn transport(&self) -> Arc<dyn BusTransport> {
        Arc::new(self.clone())
    }

    pub fn set_connected(&self, connected: bool) {
        self.inner.connected.store(connected, Ordering::SeqCst);
    }

    /// Whether [`Connector::connect`] succeeds.
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn connect_attempts(&self) -> usize {
        self.inner.connect_attempts.load(Ordering::SeqCst)
    }

    /// Register a responder for an exact subject.
    pub fn respond(&self, subject: impl Into<String>, responder: Responder) {
        self.inner.responders.lock().insert(subject.into(), responder);
    }

    /// Make every publish or request on `subject` fail with `error`.
    pub fn fail(&self, subject: impl Into<String>, error: BusError) {
        self.inner.failures.lock().insert(subject.into(), error);
    }

    pub fn clear_failure(&self, subject: &str) {
        self.inner.failures.lock().remove(subject);
    }

    /// Declare a stream without counting it as a provisioning write.
    pub fn seed_stream(&self, config: StreamConfig) {
        self.inner
            .streams
            .lock()
            .insert(config.name.clone(), config);
    }

    pub fn stream(&self, name: &str) -> Option<StreamConfig> {
        self.inner.streams.lock().get(name).cloned()
    }

    /// Number of create/update calls that reached the bus.
    pub fn stream_writes(&self) -> usize {
        self.inner.stream_writes.load(Ordering::SeqCst)
    }

    /// Every message recorded so far, in order.
    pub fn messages(&self) -> Vec<RecordedMessage> {
        self.inner.messages.lock().clone()
    }

    /// Messages recorded on one subject.
    pub fn messages_on(&self, subject: &str) -> Vec<RecordedMessage> {
        self.inner
            .messages
            .lock()
            .iter()
            .filter(|m| m.subject == subject)
            .cloned()
            .collect()
    }

    fn check(&self, subject: &str) -> Result<(), BusError> {
        if !self.inner.connected.load(Ordering::SeqCst) {
            return Err(BusError::NotConnected);
        }
        match self.inner.failures.lock().get(subject) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn record(&self, subject: &str, payload: Bytes, delivery: Delivery) {
        self.inner.messages.lock().push(RecordedMessage {
            subject: subject.to_string(),
            payload,
            delivery,
        });
    }
}

#[async_trait]
impl BusTransport for MemoryBus {
    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError> {
        self.check(subject)?;
        self.record(subject, payload, Delivery::Core);
        Ok(())
    }

    async fn publish_durable(&self, subject: &str, payload: Bytes) -> Result<(), BusError> {
        self.check(subject)?;

        let captured = self
            .inner
            .streams
            .lock()
            .values()
            .any(|s| s.captures(subject));
        if !captured {
            return Err(BusError::NoResponders(subject.to_string()));
        }

        self.record(subject, payload, Delivery::Durable);
        Ok(())
    }

    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, BusError> {
        self.check(subject)?;

        let responder = self
            .inner
            .responders
            .lock()
            .get(subject)
            .cloned()
            .ok_or_else(|| BusError::NoResponders(subject.to_string()))?;

        self.record(subject, payload, Delivery::Request);

        let reply = async move {
            match responder {
                Responder::Reply(bytes) => bytes,
                Responder::After(delay, bytes) => {
                    tokio::time::sleep(delay).await;
                    bytes
                }
                Responder::Silent => std::future::pending().await,
            }
        };

        tokio::time::timeout(timeout, reply)
            .await
            .map_err(|_| BusError::Timeout)
    }

    async fn stream_config(&self, name: &str) -> Result<Option<StreamConfig>, BusError> {
        self.check(name)?;
        Ok(self.stream(name))
    }

    async fn create_stream(&self, config: &StreamConfig) -> Result<(), BusError> {
        self.check(&config.name)?;

        let mut streams = self.inner.streams.lock();
        if streams.contains_key(&config.name) {
            return Err(BusError::StreamProvisionFailed(format!(
                "stream {} already exists",
                config.name
            )));
        }
        streams.insert(config.name.clone(), config.clone());
        self.inner.stream_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update_stream(&self, config: &StreamConfig) -> Result<(), BusError> {
        self.check(&config.name)?;

        let mut streams = self.inner.streams.lock();
        if !streams.contains_key(&config.name) {
            return Err(BusError::StreamProvisionFailed(format!(
                "stream {} not found",
                config.name
            )));
        }
        streams.insert(config.name.clone(), config.clone());
        self.inner.stream_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), BusError> {
        self.set_connected(false);
        Ok(())
    }
}

#[async_trait]
impl Connector for MemoryBus {
    async fn connect(&self) -> Result<Arc<dyn BusTransport>, BusError> {
        self.inner.connect_attempts.fetch_add(1, Ordering::SeqCst);

        if !self.inner.reachable.load(Ordering::SeqCst) {
            return Err(BusError::ConnectionFailed("bus unreachable".to_string()));
        }

        self.set_connected(true);
        Ok(self.transport())
    }
}
