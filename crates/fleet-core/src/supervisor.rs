//! Bus connection supervisor.
//!
//! Owns the process-wide [`SessionHandle`]. When the bus is down, a single
//! background loop reconnects and re-provisions streams on a fixed interval,
//! then exits. Request handlers never wait on it.
//!
//! ```text
//!  Disconnected ──ensure_supervised──▶ Connecting ──connect+provision──▶ Connected
//!        ▲                               │    ▲                            │
//!        │                               └────┘ retry every interval       │
//!        └─────────────────────────────── session lost ◀───────────────────┘
//!
//!  any state ──shutdown──▶ ShutDown (terminal)
//! ```

use fleet_bus::{BusSession, Connector, SessionHandle};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::FleetConfig;
use crate::error::FleetError;
use crate::provisioner::StreamProvisioner;
use crate::store::AgentStore;

const DISCONNECTED: u8 = 0;
const CONNECTING: u8 = 1;
const CONNECTED: u8 = 2;
const SHUT_DOWN: u8 = 3;

/// Connection state as seen by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Disconnected,
    Connecting,
    Connected,
    /// Stopped for good; no further connection attempts.
    ShutDown,
}

impl SupervisorState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            CONNECTING => Self::Connecting,
            CONNECTED => Self::Connected,
            SHUT_DOWN => Self::ShutDown,
            _ => Self::Disconnected,
        }
    }
}

/// Result of [`BusSupervisor::ensure_supervised`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Supervision {
    /// Session is live, nothing scheduled.
    AlreadyConnected,
    /// This call started the reconnection loop.
    Scheduled,
    /// Another caller's loop is already running.
    InFlight,
}

/// Keeps the bus session alive.
pub struct BusSupervisor {
    connector: Arc<dyn Connector>,
    session: Arc<SessionHandle>,
    provisioner: StreamProvisioner,
    config: FleetConfig,
    interval: Duration,
    state: AtomicU8,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BusSupervisor {
    pub fn new(
        connector: Arc<dyn Connector>,
        store: Arc<dyn AgentStore>,
        config: FleetConfig,
    ) -> Self {
        Self {
            connector,
            session: Arc::new(SessionHandle::new()),
            provisioner: StreamProvisioner::new(store),
            interval: config.reconnect_interval(),
            config,
            state: AtomicU8::new(DISCONNECTED),
            task: Mutex::new(None),
        }
    }

    /// Override the delay between reconnection attempts.
    #[must_use]
    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// The handle every dispatch reads the session from.
    pub fn session(&self) -> &Arc<SessionHandle> {
        &self.session
    }

    /// Current state. A `Connected` supervisor whose session has since
    /// dropped reports `Disconnected`.
    pub fn state(&self) -> SupervisorState {
        match SupervisorState::from_u8(self.state.load(Ordering::SeqCst)) {
            SupervisorState::Connected if !self.session.is_connected() => {
                SupervisorState::Disconnected
            }
            state => state,
        }
    }

    fn is_shut_down(&self) -> bool {
        self.state.load(Ordering::SeqCst) == SHUT_DOWN
    }

    /// Whether a live session exists. Never blocks.
    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Open a new connection and swap it in as the current session.
    pub async fn connect(&self) -> Result<Arc<BusSession>, FleetError> {
        let transport = self
            .connector
            .connect()
            .await
            .map_err(|e| FleetError::BusUnavailable(e.to_string()))?;

        if self.session.replace(BusSession::new(transport)).is_some() {
            debug!("Replaced previous bus session");
        }

        self.session
            .current()
            .ok_or_else(|| FleetError::BusUnavailable("session dropped during connect".into()))
    }

    /// Declare streams on `session` and publish the result as a new session.
    pub async fn provision_streams(&self, session: &BusSession) -> Result<(), FleetError> {
        let streams = self
            .provisioner
            .provision(session.transport().as_ref(), &self.config)
            .await?;
        info!(streams = ?streams, "Streams provisioned");
        self.session.replace(session.with_streams(streams));
        Ok(())
    }

    /// Make sure a reconnection loop is running unless already connected.
    ///
    /// Safe to call from any number of callers at once: only the caller that
    /// flips the state to `Connecting` spawns the loop.
    ///
    /// # Errors
    ///
    /// [`FleetError::SupervisorUnavailable`] after [`shutdown`](Self::shutdown),
    /// or if no Tokio runtime is available to run the loop.
    pub fn ensure_supervised(self: &Arc<Self>) -> Result<Supervision, FleetError> {
        match self.state() {
            SupervisorState::ShutDown => {
                return Err(FleetError::SupervisorUnavailable("supervisor shut down".into()))
            }
            SupervisorState::Connected => return Ok(Supervision::AlreadyConnected),
            _ => {}
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| FleetError::SupervisorUnavailable(e.to_string()))?;

        let claimed = self
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |s| {
                (s != CONNECTING && s != SHUT_DOWN).then_some(CONNECTING)
            });
        match claimed {
            Ok(_) => {}
            Err(SHUT_DOWN) => {
                return Err(FleetError::SupervisorUnavailable("supervisor shut down".into()))
            }
            Err(_) => return Ok(Supervision::InFlight),
        }

        let this = Arc::clone(self);
        let handle = runtime.spawn(async move { this.supervise().await });
        *self.task.lock() = Some(handle);

        Ok(Supervision::Scheduled)
    }

    async fn supervise(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if self.is_shut_down() {
                return;
            }

            match self.attempt().await {
                Ok(()) => {
                    let settled = self.state.compare_exchange(
                        CONNECTING,
                        CONNECTED,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    );
                    if settled.is_err() {
                        // Shut down while connecting
                        self.close_session().await;
                        return;
                    }
                    info!("Bus session established");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, retry_in = ?self.interval, "Bus not ready, will retry");
                }
            }
        }
    }

    async fn attempt(&self) -> Result<(), FleetError> {
        let session = match self.session.live() {
            Some(session) => session,
            None => self.connect().await?,
        };
        self.provision_streams(&session).await
    }

    /// Stop the loop and close the session. Terminal: later calls to
    /// [`ensure_supervised`](Self::ensure_supervised) fail and nothing
    /// reconnects.
    pub async fn shutdown(&self) {
        self.state.store(SHUT_DOWN, Ordering::SeqCst);
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }

        self.close_session().await;
        info!("Bus supervisor stopped");
    }

    async fn close_session(&self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.transport().close().await {
                warn!(error = %e, "Bus did not close cleanly");
            }
        }
    }
}
