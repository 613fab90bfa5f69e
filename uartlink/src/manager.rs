//! Link connection manager.
//!
//! Owns the whole link lifecycle: discovery, sequential candidate trial,
//! the single committed connection, the liveness heartbeat, drop detection
//! and reconnection. All outgoing traffic funnels through [`LinkManager::write`],
//! which consults the session context and encrypts when a key is present.
//!
//! At most one link is active at any time; the manager is the sole owner of
//! that reference and destroys the old link before committing a new one.
//! The heartbeat task exists exactly while connected. Every wait (candidate
//! attempt, settle delay, retry backoff) races the manager's cancellation
//! token, so `close()` stops an in-flight discovery pass deterministically.

use parking_lot::Mutex as SyncMutex;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tokio_util::sync::CancellationToken;

use crate::discovery::{FilterMode, PortEnumerator};
use crate::error::{Error, Result};
use crate::frame::UartFrame;
use crate::link::{DisconnectSignal, Link, LinkFactory};
use crate::session::{PacketCipher, SharedSession};
use crate::tracing::prelude::*;

/// Liveness frame period while connected.
const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(2000);
/// Wait between exhausted discovery passes when auto-reconnect is on.
const RETRY_BACKOFF: Duration = Duration::from_millis(500);
/// Wait after a drop notification before rediscovering, giving the OS time
/// to tear the old device node down.
const SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Externally observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Discovering,
    Connected,
    Reconnecting,
    Closed,
}

struct ManagerState {
    link: Option<Box<dyn Link>>,
    connected: bool,
    phase: ConnectionState,
    /// Ports already attempted during the current discovery pass.
    tried: HashSet<String>,
    heartbeat: Option<JoinHandle<()>>,
    /// Bumped on every commit; lets a stale disconnect supervisor tell that
    /// its link has already been replaced.
    generation: u64,
}

struct Shared {
    enumerator: Box<dyn PortEnumerator>,
    filter: FilterMode,
    factory: Arc<dyn LinkFactory>,
    session: SharedSession,
    cipher: Arc<dyn PacketCipher>,
    auto_reconnect: bool,
    forced_port: SyncMutex<Option<String>>,
    cancel: CancellationToken,
    state: Mutex<ManagerState>,
}

/// Manages the one logical connection to the device.
#[derive(Clone)]
pub struct LinkManager {
    inner: Arc<Shared>,
}

impl LinkManager {
    pub fn new(
        enumerator: Box<dyn PortEnumerator>,
        filter: FilterMode,
        factory: Arc<dyn LinkFactory>,
        session: SharedSession,
        cipher: Arc<dyn PacketCipher>,
        auto_reconnect: bool,
    ) -> Self {
        Self {
            inner: Arc::new(Shared {
                enumerator,
                filter,
                factory,
                session,
                cipher,
                auto_reconnect,
                forced_port: SyncMutex::new(None),
                cancel: CancellationToken::new(),
                state: Mutex::new(ManagerState {
                    link: None,
                    connected: false,
                    phase: ConnectionState::Idle,
                    tried: HashSet::new(),
                    heartbeat: None,
                    generation: 0,
                }),
            }),
        }
    }

    /// Establish the connection.
    ///
    /// With a forced port, discovery is skipped and only that port is
    /// attempted. Resolves once a connection is committed; with
    /// auto-reconnect off, an exhausted discovery pass (or a failed forced
    /// open) is returned to the caller. With auto-reconnect on, this
    /// retries indefinitely until success or [`close`](Self::close).
    pub async fn start(&self, forced_port: Option<String>) -> Result<()> {
        *self.inner.forced_port.lock() = forced_port;
        Shared::connect_loop(self.inner.clone()).await
    }

    /// Stamp, optionally encrypt, and send one frame over the active link.
    ///
    /// The result may be ignored; heartbeat traffic does. Delivery is not
    /// guaranteed either way.
    pub async fn write(&self, frame: UartFrame) -> Result<()> {
        Shared::write_frame(&self.inner, frame).await
    }

    /// Tear the connection down for good. No reconnection follows,
    /// regardless of the auto-reconnect setting.
    pub async fn close(&self) {
        self.inner.cancel.cancel();
        let mut state = self.inner.state.lock().await;
        if let Some(heartbeat) = state.heartbeat.take() {
            heartbeat.abort();
        }
        state.connected = false;
        state.phase = ConnectionState::Closed;
        if let Some(mut link) = state.link.take() {
            link.destroy().await;
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.state.lock().await.connected
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.inner.state.lock().await.phase
    }
}

impl Shared {
    /// Run discovery passes until one commits a link.
    ///
    /// Explicit loop rather than recursion so the cancellation token can
    /// stop an in-flight backoff wait. Returns a boxed future: committing
    /// a link spawns a supervisor that re-enters this loop on disconnect,
    /// and the box breaks that type cycle.
    fn connect_loop(shared: Arc<Shared>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
        Box::pin(async move {
            loop {
                if shared.cancel.is_cancelled() {
                    return Err(Error::Closed);
                }
                shared.set_phase(ConnectionState::Discovering).await;

                let forced = shared.forced_port.lock().clone();
                let result = match forced {
                    Some(port) => Self::try_port(&shared, &port).await,
                    None => Self::discovery_pass(&shared).await,
                };

                match result {
                    Ok(()) => return Ok(()),
                    Err(Error::Closed) => return Err(Error::Closed),
                    Err(e) => {
                        if !shared.auto_reconnect {
                            shared.set_phase(ConnectionState::Idle).await;
                            return Err(e);
                        }
                        info!(error = %e, "Discovery failed, retrying");
                        tokio::select! {
                            _ = shared.cancel.cancelled() => return Err(Error::Closed),
                            _ = time::sleep(RETRY_BACKOFF) => {}
                        }
                    }
                }
            }
        })
    }

    /// One enumerate → filter → sequential trial cycle.
    ///
    /// Candidates are attempted strictly in enumeration order and the pass
    /// short-circuits as soon as one commits.
    async fn discovery_pass(shared: &Arc<Shared>) -> Result<()> {
        shared.state.lock().await.tried.clear();

        let ports = shared.enumerator.list_ports().await?;
        info!(count = ports.len(), "Enumerated serial ports");

        for descriptor in ports.values() {
            if shared.cancel.is_cancelled() {
                return Err(Error::Closed);
            }
            if shared.state.lock().await.connected {
                break;
            }
            if !shared.filter.accepts(descriptor) {
                continue;
            }
            if shared.state.lock().await.tried.contains(&descriptor.path) {
                continue;
            }
            if let Err(e) = Self::try_port(shared, &descriptor.path).await {
                debug!(port = %descriptor.path, error = %e, "Candidate failed");
            }
        }

        if shared.state.lock().await.connected {
            Ok(())
        } else {
            info!("No device found on any candidate port");
            Err(Error::NoDeviceFound)
        }
    }

    /// Attempt one port. On success the link is committed as the active
    /// connection and the heartbeat armed; on failure the error propagates
    /// and the port is not retried within this pass.
    async fn try_port(shared: &Arc<Shared>, port: &str) -> Result<()> {
        if shared.cancel.is_cancelled() {
            return Err(Error::Closed);
        }
        info!(port = %port, "Trying port");
        {
            let mut state = shared.state.lock().await;
            state.connected = false;
            state.tried.insert(port.to_string());
        }

        match shared.factory.open(port).await {
            Ok((link, disconnect)) => {
                info!(port = %port, "Successful connection");
                let generation = {
                    let mut state = shared.state.lock().await;
                    // The old link must be gone before the new one is
                    // committed.
                    if let Some(mut old) = state.link.take() {
                        old.destroy().await;
                    }
                    if let Some(heartbeat) = state.heartbeat.take() {
                        heartbeat.abort();
                    }
                    state.link = Some(link);
                    state.connected = true;
                    state.phase = ConnectionState::Connected;
                    state.generation += 1;
                    state.heartbeat = Some(Self::spawn_heartbeat(shared));
                    state.generation
                };
                tokio::spawn(Self::supervise(shared.clone(), disconnect, generation));
                Ok(())
            }
            Err(e) => {
                let mut state = shared.state.lock().await;
                if let Some(heartbeat) = state.heartbeat.take() {
                    heartbeat.abort();
                }
                warn!(port = %port, error = %e, "Failed connection");
                Err(e)
            }
        }
    }

    fn spawn_heartbeat(shared: &Arc<Shared>) -> JoinHandle<()> {
        let shared = shared.clone();
        tokio::spawn(async move {
            let mut interval = time::interval(HEARTBEAT_INTERVAL);
            interval.tick().await; // first tick is immediate; skip it
            loop {
                interval.tick().await;
                // Heartbeat failures take the normal write error path and
                // are not treated specially.
                if let Err(e) = Self::write_frame(&shared, UartFrame::heartbeat()).await {
                    debug!(error = %e, "Heartbeat write failed");
                }
            }
        })
    }

    /// Consume the single disconnect event for one committed link and drive
    /// the reconnection cycle.
    async fn supervise(shared: Arc<Shared>, mut disconnect: DisconnectSignal, generation: u64) {
        tokio::select! {
            _ = shared.cancel.cancelled() => return,
            event = disconnect.recv() => {
                // None means the link was dropped locally, not a physical
                // disconnect.
                if event.is_none() {
                    return;
                }
            }
        }

        {
            let mut state = shared.state.lock().await;
            if state.generation != generation {
                return; // link already replaced; stale notification
            }
            state.connected = false;
            if let Some(heartbeat) = state.heartbeat.take() {
                heartbeat.abort();
            }
            if !shared.auto_reconnect {
                state.phase = ConnectionState::Idle;
                info!("Connection lost");
                return;
            }
            state.phase = ConnectionState::Reconnecting;
            state.link = None;
            state.tried.clear();
        }
        info!("Connection lost, rediscovering");

        tokio::select! {
            _ = shared.cancel.cancelled() => return,
            _ = time::sleep(SETTLE_DELAY) => {}
        }

        if let Err(e) = Self::connect_loop(shared).await {
            match e {
                Error::Closed => debug!("Reconnection stopped by close"),
                e => warn!(error = %e, "Reconnection failed"),
            }
        }
    }

    async fn write_frame(shared: &Arc<Shared>, mut frame: UartFrame) -> Result<()> {
        let bytes = {
            let mut session = shared.session.lock();
            frame.set_device_id(session.device_id);
            match session.key {
                Some(key) => {
                    let nonce = session.outgoing.next_nonce();
                    shared.cipher.encrypt(&key, &nonce, &frame.packet()?)?
                }
                None => frame.packet()?,
            }
        };

        let mut state = shared.state.lock().await;
        let link = state.link.as_mut().ok_or(Error::Closed)?;
        link.write(&bytes).await
    }

    async fn set_phase(&self, phase: ConnectionState) {
        self.state.lock().await.phase = phase;
    }
}
