//! Relay server.
//!
//! One receive loop owns the socket and feeds each datagram to the slot bound
//! to its sender. Handshakes from unbound addresses are checked against the
//! configured keys and claim a slot; every bound slot then gets its own tick
//! task that maintains the session and forwards what it delivers.
//!
//! # Example
//!
//! ```ignore
//! use skylink::relay::{RelayConfig, RelayEvent, RelayServer};
//!
//! let config = RelayConfig::load_or_create("relay.toml")?;
//! let (server, mut events) = RelayServer::bind(config).await?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         RelayEvent::SlotBound { slot, role, remote, .. } => {
//!             println!("{} bound to slot {} from {}", role, slot, remote);
//!         }
//!         RelayEvent::SlotReleased { slot, reason, .. } => {
//!             println!("slot {} released: {:?}", slot, reason);
//!         }
//!     }
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use super::config::RelayConfig;
use super::error::RelayError;
use super::slot::{Occupant, SlotInfo, SlotTable, SlotTick};
use crate::core::DatagramSink;
use crate::core::constants::TICK_INTERVAL;
use crate::packet::{Envelope, Handshake, PacketKind, Role};
use crate::transport::{LinkSocket, PeerSession, SessionConfig, TransportError};

/// Events queued for the owner of the server.
const EVENT_QUEUE: usize = 64;

/// Why a slot was freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    /// The peer sent a disconnect.
    Disconnected,
    /// Disconnected with no traffic for the teardown period.
    Idle,
    /// A new peer claimed the slot after this one stopped answering.
    Replaced,
    /// The server shut down.
    Shutdown,
}

/// Slot changes reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// A peer completed its handshake and holds a slot.
    SlotBound {
        /// Slot index.
        slot: usize,
        /// Role of the peer.
        role: Role,
        /// Peer address.
        remote: SocketAddr,
        /// Protocol version announced by the peer.
        version: u16,
    },
    /// A slot was freed.
    SlotReleased {
        /// Slot index.
        slot: usize,
        /// Role of the former occupant.
        role: Role,
        /// Address of the former occupant.
        remote: SocketAddr,
        /// Why.
        reason: ReleaseReason,
    },
}

impl RelayEvent {
    fn released(slot: usize, occupant: &Occupant, reason: ReleaseReason) -> Self {
        RelayEvent::SlotReleased {
            slot,
            role: occupant.role,
            remote: occupant.remote,
            reason,
        }
    }
}

fn emit(events: &mpsc::Sender<RelayEvent>, event: RelayEvent) {
    if let Err(e) = events.try_send(event) {
        log::debug!("relay event dropped: {}", e);
    }
}

/// A running relay.
#[derive(Debug)]
pub struct RelayServer {
    config: Arc<RwLock<RelayConfig>>,
    local_addr: SocketAddr,
    slots: Arc<SlotTable>,
    events: mpsc::Sender<RelayEvent>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl RelayServer {
    /// Validate `config`, bind its address and start the receive loop.
    pub async fn bind(
        config: RelayConfig,
    ) -> Result<(Self, mpsc::Receiver<RelayEvent>), RelayError> {
        config.validate()?;
        let addr = config.bind_addr();
        let socket = LinkSocket::bind(addr)
            .await
            .map_err(|source| RelayError::Bind { addr, source })?;
        let local_addr = socket.local_addr()?;
        log::info!(
            "relay listening on {} with {} slots ({} for viewers)",
            local_addr,
            config.slot_count(),
            config.viewers
        );

        let slots = Arc::new(SlotTable::new(config.viewers));
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let config = Arc::new(RwLock::new(config));
        let task = RelayTask {
            config: config.clone(),
            slots: slots.clone(),
            sink: socket.sink(),
            events: events_tx.clone(),
            tick_interval: TICK_INTERVAL,
        };
        tokio::spawn(task.run(socket, shutdown_rx));

        let server = Self {
            config,
            local_addr,
            slots,
            events: events_tx,
            shutdown_tx: Some(shutdown_tx),
        };
        Ok((server, events_rx))
    }

    /// Bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Configuration the server runs with.
    pub fn config(&self) -> RelayConfig {
        self.config.read().clone()
    }

    /// Take the keys of `config` for every handshake from now on.
    ///
    /// Peers already bound keep their slots. Port and viewer count only
    /// change on the next bind.
    pub fn apply_keys(&self, config: &RelayConfig) {
        let mut current = self.config.write();
        if current.key != config.key || current.viewer_key != config.viewer_key {
            current.key = config.key.clone();
            current.viewer_key = config.viewer_key.clone();
            log::info!("relay on {} now admits the updated keys", self.local_addr);
        }
    }

    /// Occupied slots.
    pub fn occupancy(&self) -> Vec<SlotInfo> {
        self.slots.occupancy(Instant::now())
    }

    /// Whether any slot is occupied.
    pub fn is_connected(&self) -> bool {
        !self.occupancy().is_empty()
    }

    /// Stop the receive loop and free every slot.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            for (slot, occupant) in self.slots.release_all() {
                emit(
                    &self.events,
                    RelayEvent::released(slot, &occupant, ReleaseReason::Shutdown),
                );
            }
            log::info!("relay on {} stopped", self.local_addr);
        }
    }
}

impl Drop for RelayServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State owned by the receive loop.
struct RelayTask {
    config: Arc<RwLock<RelayConfig>>,
    slots: Arc<SlotTable>,
    sink: Arc<dyn DatagramSink>,
    events: mpsc::Sender<RelayEvent>,
    tick_interval: Duration,
}

impl RelayTask {
    async fn run(self, mut socket: LinkSocket, mut shutdown: oneshot::Receiver<()>) {
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::debug!("relay shutdown requested");
                    break;
                }

                result = socket.recv_from() => {
                    match result {
                        Ok((data, from)) => {
                            let data = Bytes::copy_from_slice(data);
                            self.on_datagram(data, from, Instant::now());
                        }
                        Err(e) => log::debug!("relay receive failed: {}", e),
                    }
                }
            }
        }
    }

    fn on_datagram(&self, data: Bytes, from: SocketAddr, now: Instant) {
        let Some(kind) = data.first().and_then(|&code| PacketKind::from_code(code)) else {
            log::trace!("unclassifiable datagram from {}", from);
            return;
        };
        let bound = self.slots.find(from);

        match (kind, bound) {
            (PacketKind::Connect, Some(slot)) if self.slots.is_active(slot) => {
                self.feed(slot, data, from, now)
            }
            (PacketKind::Connect, _) => self.admit(data, from, now),
            (PacketKind::Disconnect, Some(slot)) => {
                if let Some(occupant) = self.slots.release(slot) {
                    log::info!("{} in slot {} disconnected", occupant.role, slot);
                    emit(
                        &self.events,
                        RelayEvent::released(slot, &occupant, ReleaseReason::Disconnected),
                    );
                }
            }
            (_, Some(slot)) => self.feed(slot, data, from, now),
            (_, None) => log::trace!("{} from unbound {}", kind, from),
        }
    }

    /// Run a datagram through a slot's session and forward what it delivers.
    fn feed(&self, slot: usize, data: Bytes, from: SocketAddr, now: Instant) {
        let Some(session) = self.slots.session(slot) else {
            return;
        };
        if let Err(e) = session.lock().receive_at(data, from, now) {
            log::trace!("slot {} dropped datagram from {}: {}", slot, from, e);
        }
        for envelope in &self.slots.drain(slot, now) {
            self.slots.forward(slot, envelope, now);
        }
    }

    /// Check a handshake from an unbound address and give it a slot.
    fn admit(&self, data: Bytes, from: SocketAddr, now: Instant) {
        let handshake = match Envelope::parse(data.clone(), from, now)
            .map_err(TransportError::from)
            .and_then(|env| Ok(Handshake::decode(&mut env.reader())?))
        {
            Ok(handshake) => handshake,
            Err(e) => {
                log::debug!("malformed handshake from {}: {}", from, e);
                return;
            }
        };
        let Some(role) = handshake.role() else {
            log::debug!("handshake from {} with unknown role {}", from, handshake.role);
            return;
        };
        let session_config = {
            let config = self.config.read();
            let expected = match role {
                Role::Drone | Role::Controller => &config.key,
                Role::Viewer => &config.viewer_key,
            };
            if handshake.key != *expected {
                log::debug!("rejected {} handshake from {}: key mismatch", role, from);
                return;
            }
            SessionConfig::relay(config.key.clone(), config.viewer_key.clone())
        };

        let session = PeerSession::new(session_config, self.sink.clone()).shared();
        let Some(claim) = self
            .slots
            .claim(role, from, handshake.version, session, now)
        else {
            log::debug!("no free {} slot for {}", role, from);
            return;
        };

        if let Some(previous) = &claim.replaced {
            log::info!(
                "{} in slot {} replaced after going silent",
                previous.role,
                claim.slot
            );
            emit(
                &self.events,
                RelayEvent::released(claim.slot, previous, ReleaseReason::Replaced),
            );
        }

        self.feed(claim.slot, data, from, now);
        log::info!(
            "{} connected in slot {} from {} (version {})",
            role,
            claim.slot,
            from,
            handshake.version
        );
        emit(
            &self.events,
            RelayEvent::SlotBound {
                slot: claim.slot,
                role,
                remote: from,
                version: handshake.version,
            },
        );

        tokio::spawn(tick_slot(
            self.slots.clone(),
            claim.slot,
            claim.generation,
            self.tick_interval,
            self.events.clone(),
        ));
    }
}

/// Periodic work for one slot occupant; exits once the slot changes hands.
async fn tick_slot(
    slots: Arc<SlotTable>,
    slot: usize,
    generation: u64,
    period: Duration,
    events: mpsc::Sender<RelayEvent>,
) {
    let mut tick = tokio::time::interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tick.tick().await;
        match slots.tick(slot, generation, Instant::now()) {
            SlotTick::Live => {}
            SlotTick::Stale => break,
            SlotTick::Idle => {
                if let Some(occupant) = slots.release_if(slot, generation) {
                    log::info!("{} in slot {} torn down after inactivity", occupant.role, slot);
                    emit(
                        &events,
                        RelayEvent::released(slot, &occupant, ReleaseReason::Idle),
                    );
                }
                break;
            }
        }
    }
    log::trace!("tick task for slot {} generation {} exited", slot, generation);
}
