//! Direct endpoint link.
//!
//! A [`Link`] owns a UDP socket and one [`PeerSession`]. It either dials a
//! known address (a drone or controller connecting to a relay, or straight
//! to the other endpoint) or accepts the first peer that presents the right
//! key. A single background task multiplexes the socket, the maintenance
//! tick and the probe timer; the application receives [`LinkEvent`]s.
//!
//! # Example
//!
//! ```ignore
//! use skylink::packet::{PacketKind, Role};
//! use skylink::transport::{Link, LinkBuilder, LinkEvent};
//!
//! let config = LinkBuilder::new()
//!     .role(Role::Controller)
//!     .key("DD")
//!     .remote("203.0.113.7:6286".parse()?)
//!     .build();
//! let (link, mut events) = Link::bind(config).await?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         LinkEvent::Connected { .. } => {
//!             link.send_message(PacketKind::Config, &[1]);
//!         }
//!         LinkEvent::Packet(envelope) => { /* telemetry, video, ... */ }
//!         LinkEvent::EndToEndRtt(rtt) => log::info!("rtt {} ms", rtt),
//!         LinkEvent::Disconnected => break,
//!     }
//! }
//! ```

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use super::error::{TransportError, TransportResult};
use super::inbound::{Admission, SessionConfig};
use super::session::{PeerSession, SharedSession};
use super::socket::LinkSocket;
use super::timing::monotonic_ms;
use crate::core::constants::{DEFAULT_KEY, PROBE_INTERVAL, PROTOCOL_VERSION, TICK_INTERVAL};
use crate::packet::{Envelope, Handshake, PacketKind, Probe, Role, packet_writer};

/// Events queued for the application.
const EVENT_QUEUE: usize = 256;

/// Link configuration.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Role announced in the handshake.
    pub role: Role,
    /// Session key.
    pub key: String,
    /// Protocol version announced in the handshake.
    pub version: u16,
    /// Address to dial; `None` accepts the first valid handshake.
    pub remote: Option<SocketAddr>,
    /// Local bind address.
    pub bind_addr: SocketAddr,
    /// Maintenance period.
    pub tick_interval: Duration,
    /// Period of end-to-end probes and handshake retries.
    pub probe_interval: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            role: Role::Controller,
            key: DEFAULT_KEY.to_string(),
            version: PROTOCOL_VERSION,
            remote: None,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            tick_interval: TICK_INTERVAL,
            probe_interval: PROBE_INTERVAL,
        }
    }
}

/// Builder for [`LinkConfig`].
#[derive(Debug, Default)]
pub struct LinkBuilder {
    config: LinkConfig,
}

impl LinkBuilder {
    /// Builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the announced role.
    pub fn role(mut self, role: Role) -> Self {
        self.config.role = role;
        self
    }

    /// Set the session key.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.config.key = key.into();
        self
    }

    /// Set the announced protocol version.
    pub fn version(mut self, version: u16) -> Self {
        self.config.version = version;
        self
    }

    /// Dial `addr` instead of waiting for a peer.
    pub fn remote(mut self, addr: SocketAddr) -> Self {
        self.config.remote = Some(addr);
        self
    }

    /// Set the local bind address.
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    /// Set the maintenance period.
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.config.tick_interval = interval;
        self
    }

    /// Set the probe period.
    pub fn probe_interval(mut self, interval: Duration) -> Self {
        self.config.probe_interval = interval;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> LinkConfig {
        self.config
    }
}

/// What a link reports to the application.
#[derive(Debug)]
pub enum LinkEvent {
    /// Handshake completed with `remote`.
    Connected {
        /// Peer address.
        remote: SocketAddr,
        /// Role the peer announced, when it announced one.
        role: Option<Role>,
    },
    /// Application datagram, in sequence order for sequenced kinds.
    Packet(Envelope),
    /// Round trip to the far endpoint in milliseconds.
    EndToEndRtt(u32),
    /// The peer sent a disconnect or stopped answering.
    Disconnected,
}

/// A connected (or connecting) endpoint.
#[derive(Debug)]
pub struct Link {
    session: SharedSession,
    local_addr: SocketAddr,
    config: LinkConfig,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl Link {
    /// Bind a socket and start the background task.
    ///
    /// When the configuration names a remote, the first handshake is sent
    /// before returning and retried every probe interval until answered.
    pub async fn bind(config: LinkConfig) -> TransportResult<(Self, mpsc::Receiver<LinkEvent>)> {
        let socket = LinkSocket::bind(config.bind_addr).await?;
        let local_addr = socket.local_addr()?;

        let session_config = match config.remote {
            Some(_) => SessionConfig::dial(config.key.clone()),
            None => SessionConfig::accept(config.key.clone()),
        };
        let session = PeerSession::new(session_config, socket.sink()).shared();
        let handshake = Handshake::new(config.role, config.key.clone(), config.version);

        if let Some(remote) = config.remote {
            let mut s = session.lock();
            s.outbound_mut().connect(remote);
            s.outbound_mut().send_handshake(&handshake, Instant::now())?;
            log::debug!("dialing {} from {} as {}", remote, local_addr, config.role);
        } else {
            log::debug!("accepting on {} as {}", local_addr, config.role);
        }

        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = LinkTask {
            session: session.clone(),
            events: events_tx,
            handshake,
            remote: config.remote,
        };
        tokio::spawn(task.run(
            socket,
            config.tick_interval,
            config.probe_interval,
            shutdown_rx,
        ));

        let link = Self {
            session,
            local_addr,
            config,
            shutdown_tx: Some(shutdown_tx),
        };
        Ok((link, events_rx))
    }

    /// Send a complete datagram (kind byte first).
    ///
    /// Returns the sequence assigned to a sequenced kind.
    pub fn send(&self, data: &[u8]) -> Option<u16> {
        self.session.lock().send_at(data, Instant::now())
    }

    /// Send `payload` as a datagram of `kind`.
    pub fn send_message(&self, kind: PacketKind, payload: &[u8]) -> Option<u16> {
        let mut w = packet_writer(kind);
        w.put_bytes(payload);
        self.send(w.as_slice())
    }

    /// Whether the peer is live.
    pub fn is_connected(&self) -> bool {
        self.session.lock().is_connected_at(Instant::now())
    }

    /// Current RTT estimate to the next hop.
    pub fn rtt_ms(&self) -> u32 {
        self.session.lock().inbound().rtt_ms()
    }

    /// Current peer address.
    pub fn remote(&self) -> Option<SocketAddr> {
        self.session.lock().outbound().remote()
    }

    /// Local socket address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Role announced in the handshake.
    pub fn role(&self) -> Role {
        self.config.role
    }

    /// The underlying session, for statistics.
    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    /// Tell the peer goodbye and stop the background task.
    pub fn disconnect(mut self) -> TransportResult<()> {
        {
            let mut s = self.session.lock();
            if !s.outbound().is_active() {
                return Err(TransportError::NotConnected);
            }
            s.outbound_mut().send_disconnect(Instant::now());
            s.close();
        }
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        Ok(())
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// State owned by the background task.
struct LinkTask {
    session: SharedSession,
    events: mpsc::Sender<LinkEvent>,
    handshake: Handshake,
    remote: Option<SocketAddr>,
}

impl LinkTask {
    async fn run(
        self,
        mut socket: LinkSocket,
        tick_interval: Duration,
        probe_interval: Duration,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let mut tick = tokio::time::interval(tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut probe = tokio::time::interval(probe_interval);
        probe.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::debug!("link shutdown requested");
                    break;
                }

                result = socket.recv_from() => {
                    match result {
                        Ok((data, from)) => {
                            let data = Bytes::copy_from_slice(data);
                            self.on_datagram(data, from);
                        }
                        Err(e) => log::debug!("receive failed: {}", e),
                    }
                }

                _ = tick.tick() => self.on_tick(),

                _ = probe.tick() => self.on_probe(),
            }
        }
    }

    fn on_datagram(&self, data: Bytes, from: SocketAddr) {
        if self.remote.is_some_and(|remote| remote != from) {
            log::trace!("ignoring datagram from stranger {}", from);
            return;
        }

        let now = Instant::now();
        let (connected, delivered) = {
            let mut s = self.session.lock();
            if s.is_connected_at(now) && s.outbound().remote() != Some(from) {
                log::trace!("ignoring datagram from {} while connected", from);
                return;
            }
            let connected = match s.receive_at(data, from, now) {
                Ok(Admission::Handshake) => {
                    let role = s.inbound().handshake().and_then(Handshake::role);
                    Some(role)
                }
                Ok(_) => None,
                Err(e) => {
                    log::trace!("dropped datagram from {}: {}", from, e);
                    None
                }
            };
            (connected, s.drain_at(now))
        };

        if let Some(role) = connected {
            log::info!("connected to {}", from);
            self.emit(LinkEvent::Connected { remote: from, role });
        }
        self.dispatch(delivered, now);
    }

    fn on_tick(&self) {
        let now = Instant::now();
        let (maintenance, delivered) = {
            let mut s = self.session.lock();
            let maintenance = s.tick_at(now);
            (maintenance, s.drain_at(now))
        };
        self.dispatch(delivered, now);
        if maintenance.timed_out {
            log::info!("peer timed out");
            self.emit(LinkEvent::Disconnected);
        }
    }

    fn on_probe(&self) {
        let now = Instant::now();
        let mut s = self.session.lock();
        if s.is_connected_at(now) {
            match self.handshake.role() {
                Some(Role::Viewer) => s.outbound_mut().send_ping_for_viewer(now),
                _ => s.outbound_mut().send_ping(true, now),
            }
        } else if let Some(remote) = self.remote {
            if !s.outbound().is_active() {
                s.outbound_mut().connect(remote);
            }
            if let Err(e) = s.outbound_mut().send_handshake(&self.handshake, now) {
                log::warn!("handshake to {} failed: {}", remote, e);
            }
        }
    }

    fn dispatch(&self, delivered: Vec<Envelope>, now: Instant) {
        for env in delivered {
            match env.kind() {
                PacketKind::Pong => match Probe::decode(&mut env.reader()) {
                    Ok(probe) => {
                        let rtt = monotonic_ms(now)
                            .checked_sub(probe.timestamp_ms)
                            .and_then(|rtt| u32::try_from(rtt).ok());
                        if let Some(rtt) = rtt {
                            self.emit(LinkEvent::EndToEndRtt(rtt));
                        }
                    }
                    Err(e) => log::trace!("malformed pong: {}", e),
                },
                PacketKind::Disconnect => {
                    log::info!("peer {} disconnected", env.remote());
                    self.session.lock().disconnect();
                    self.emit(LinkEvent::Disconnected);
                }
                _ => self.emit(LinkEvent::Packet(env)),
            }
        }
    }

    fn emit(&self, event: LinkEvent) {
        if let Err(e) = self.events.try_send(event) {
            log::debug!("event dropped: {}", e);
        }
    }
}
