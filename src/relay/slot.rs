//! Role slots of the relay.
//!
//! The table holds `viewers + 2` slots, each behind its own lock: slot 0 for
//! the drone, slot 1 for the controller and the rest for viewers. Every slot
//! carries a generation counter that changes whenever its occupant does, so
//! a tick task started for one occupant stops touching the slot once it has
//! been released or taken over.
//!
//! Locks are taken slot first, then session, and never two slots at once.

use std::net::SocketAddr;
use std::time::Instant;

use parking_lot::Mutex;

use super::routing::{
    CONTROLLER_SLOT, DRONE_SLOT, Destination, FIRST_VIEWER_SLOT, destination, stamp_probe_target,
};
use crate::core::constants::SLOT_IDLE_TEARDOWN;
use crate::packet::{Envelope, PacketKind, Role};
use crate::transport::SharedSession;

/// Peer bound to a slot.
#[derive(Debug)]
pub struct Occupant {
    /// Role from the handshake.
    pub role: Role,
    /// Peer address.
    pub remote: SocketAddr,
    /// Protocol version from the handshake.
    pub version: u16,
    session: SharedSession,
    bound_at: Instant,
}

impl Occupant {
    /// The occupant's transport session.
    pub fn session(&self) -> &SharedSession {
        &self.session
    }
}

#[derive(Debug, Default)]
struct SlotState {
    generation: u64,
    occupant: Option<Occupant>,
}

impl SlotState {
    fn is_claimable(&self, now: Instant) -> bool {
        match &self.occupant {
            None => true,
            Some(occupant) => !occupant.session.lock().is_connected_at(now),
        }
    }

    fn take(&mut self) -> Option<Occupant> {
        let occupant = self.occupant.take()?;
        self.generation += 1;
        occupant.session.lock().close();
        Some(occupant)
    }
}

/// Result of a successful [`SlotTable::claim`].
#[derive(Debug)]
pub struct Claim {
    /// Slot index.
    pub slot: usize,
    /// Generation the new occupant runs under.
    pub generation: u64,
    /// Disconnected occupant that was displaced.
    pub replaced: Option<Occupant>,
}

/// Outcome of one slot tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotTick {
    /// The slot changed hands; the caller's task should stop.
    Stale,
    /// Disconnected with no traffic for the teardown period.
    Idle,
    /// Still in use.
    Live,
}

/// Snapshot of one occupied slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    /// Slot index.
    pub slot: usize,
    /// Occupant role.
    pub role: Role,
    /// Occupant address.
    pub remote: SocketAddr,
    /// Occupant protocol version.
    pub version: u16,
    /// Whether the occupant is live.
    pub connected: bool,
}

/// Fixed table of role slots.
#[derive(Debug)]
pub struct SlotTable {
    slots: Vec<Mutex<SlotState>>,
}

impl SlotTable {
    /// Table with a drone slot, a controller slot and `viewers` viewer slots.
    pub fn new(viewers: usize) -> Self {
        Self {
            slots: (0..viewers + FIRST_VIEWER_SLOT)
                .map(|_| Mutex::new(SlotState::default()))
                .collect(),
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Always false; the drone and controller slots exist.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot bound to `remote`.
    pub fn find(&self, remote: SocketAddr) -> Option<usize> {
        self.slots.iter().position(|slot| {
            slot.lock()
                .occupant
                .as_ref()
                .is_some_and(|o| o.remote == remote)
        })
    }

    /// Session of the slot's occupant.
    pub fn session(&self, slot: usize) -> Option<SharedSession> {
        let state = self.slots.get(slot)?.lock();
        state.occupant.as_ref().map(|o| o.session.clone())
    }

    /// Session of an occupant whose outbound engine is still open.
    pub fn active_session(&self, slot: usize) -> Option<SharedSession> {
        let state = self.slots.get(slot)?.lock();
        let occupant = state.occupant.as_ref()?;
        occupant
            .session
            .lock()
            .outbound()
            .is_active()
            .then(|| occupant.session.clone())
    }

    /// Whether the slot has an occupant with an open session.
    pub fn is_active(&self, slot: usize) -> bool {
        self.active_session(slot).is_some()
    }

    /// Current generation of a slot.
    pub fn generation(&self, slot: usize) -> Option<u64> {
        self.slots.get(slot).map(|s| s.lock().generation)
    }

    /// Bind a peer to the slot its role allows.
    ///
    /// Drones and controllers have one fixed slot each; viewers take the
    /// first claimable viewer slot. A slot is claimable when empty or when
    /// its occupant is no longer connected. Returns `None` when nothing is
    /// claimable.
    pub fn claim(
        &self,
        role: Role,
        remote: SocketAddr,
        version: u16,
        session: SharedSession,
        now: Instant,
    ) -> Option<Claim> {
        let candidates = match role {
            Role::Drone => DRONE_SLOT..DRONE_SLOT + 1,
            Role::Controller => CONTROLLER_SLOT..CONTROLLER_SLOT + 1,
            Role::Viewer => FIRST_VIEWER_SLOT..self.slots.len(),
        };
        for index in candidates {
            let mut state = self.slots[index].lock();
            if !state.is_claimable(now) {
                continue;
            }
            let replaced = state.take();
            state.generation += 1;
            state.occupant = Some(Occupant {
                role,
                remote,
                version,
                session,
                bound_at: now,
            });
            return Some(Claim {
                slot: index,
                generation: state.generation,
                replaced,
            });
        }
        None
    }

    /// Free a slot and close its session. Idempotent.
    pub fn release(&self, slot: usize) -> Option<Occupant> {
        self.slots.get(slot)?.lock().take()
    }

    /// Free a slot only if it still runs under `generation`.
    pub fn release_if(&self, slot: usize, generation: u64) -> Option<Occupant> {
        let mut state = self.slots.get(slot)?.lock();
        if state.generation != generation {
            return None;
        }
        state.take()
    }

    /// Free every slot.
    pub fn release_all(&self) -> Vec<(usize, Occupant)> {
        (0..self.slots.len())
            .filter_map(|slot| self.release(slot).map(|o| (slot, o)))
            .collect()
    }

    /// Occupied slots.
    pub fn occupancy(&self, now: Instant) -> Vec<SlotInfo> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, state)| {
                let state = state.lock();
                let occupant = state.occupant.as_ref()?;
                Some(SlotInfo {
                    slot,
                    role: occupant.role,
                    remote: occupant.remote,
                    version: occupant.version,
                    connected: occupant.session.lock().is_connected_at(now),
                })
            })
            .collect()
    }

    /// Everything the slot's session can deliver now.
    pub fn drain(&self, slot: usize, now: Instant) -> Vec<Envelope> {
        match self.session(slot) {
            Some(session) => session.lock().drain_at(now),
            None => Vec::new(),
        }
    }

    /// Route a datagram delivered on slot `from`; returns the recipients.
    pub fn forward(&self, from: usize, envelope: &Envelope, now: Instant) -> usize {
        let kind = envelope.kind();
        let data = if kind == PacketKind::Ping {
            stamp_probe_target(envelope.data(), from)
        } else {
            envelope.data().clone()
        };

        match destination(kind, from, &data, self.slots.len()) {
            Destination::Drop => {
                log::trace!("not forwarding {} from slot {}", kind, from);
                0
            }
            Destination::Slot(to) => usize::from(self.send_to(to, &data, now)),
            Destination::Broadcast => (0..self.slots.len())
                .filter(|&to| to != from)
                .filter(|&to| self.send_to(to, &data, now))
                .count(),
        }
    }

    /// Maintenance, delivery and idle detection for a slot's tick task.
    pub fn tick(&self, slot: usize, generation: u64, now: Instant) -> SlotTick {
        let Some((session, bound_at)) = self.session_at(slot, generation) else {
            return SlotTick::Stale;
        };

        let (delivered, idle) = {
            let mut s = session.lock();
            let maintenance = s.tick_at(now);
            if maintenance.timed_out {
                log::debug!("slot {} timed out", slot);
            }
            let delivered = s.drain_at(now);
            let last_traffic = s.inbound().last_activity().unwrap_or(bound_at);
            let idle = !s.is_connected_at(now)
                && now.saturating_duration_since(last_traffic) >= SLOT_IDLE_TEARDOWN;
            (delivered, idle)
        };

        for envelope in &delivered {
            self.forward(slot, envelope, now);
        }
        if idle { SlotTick::Idle } else { SlotTick::Live }
    }

    fn session_at(&self, slot: usize, generation: u64) -> Option<(SharedSession, Instant)> {
        let state = self.slots.get(slot)?.lock();
        if state.generation != generation {
            return None;
        }
        let occupant = state.occupant.as_ref()?;
        Some((occupant.session.clone(), occupant.bound_at))
    }

    fn send_to(&self, slot: usize, data: &[u8], now: Instant) -> bool {
        match self.active_session(slot) {
            Some(session) => {
                session.lock().send_at(data, now);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Handshake, packet_writer};
    use crate::transport::testing::RecordingSink;
    use crate::transport::{PeerSession, SessionConfig};
    use std::sync::Arc;
    use std::time::Duration;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 1], port))
    }

    struct Bench {
        sink: Arc<RecordingSink>,
        table: SlotTable,
        now: Instant,
    }

    impl Bench {
        fn new(viewers: usize) -> Self {
            Self {
                sink: RecordingSink::new(),
                table: SlotTable::new(viewers),
                now: Instant::now(),
            }
        }

        /// Claim a slot and complete the handshake on it.
        fn bind(&self, role: Role, port: u16) -> Option<Claim> {
            let session = PeerSession::new(SessionConfig::relay("DD", "DD"), self.sink.clone())
                .shared();
            let claim = self
                .table
                .claim(role, addr(port), 7, session.clone(), self.now)?;
            let hs = Handshake::new(role, "DD", 7).encode().unwrap();
            session.lock().receive_at(hs, addr(port), self.now).unwrap();
            assert!(self.table.drain(claim.slot, self.now).is_empty());
            self.sink.take();
            Some(claim)
        }

        fn envelope(&self, kind: PacketKind, from: u16) -> Envelope {
            let mut w = packet_writer(kind);
            w.put_u8(1);
            Envelope::parse(w.freeze(), addr(from), self.now).unwrap()
        }

        fn recipients(&self) -> Vec<SocketAddr> {
            self.sink.take().into_iter().map(|(_, to)| to).collect()
        }
    }

    #[test]
    fn test_fixed_role_slots() {
        let bench = Bench::new(2);
        assert_eq!(bench.table.len(), 4);
        assert_eq!(bench.bind(Role::Drone, 1).unwrap().slot, DRONE_SLOT);
        assert_eq!(bench.bind(Role::Controller, 2).unwrap().slot, CONTROLLER_SLOT);
        assert_eq!(bench.table.find(addr(1)), Some(DRONE_SLOT));
        assert_eq!(bench.table.find(addr(2)), Some(CONTROLLER_SLOT));
        assert_eq!(bench.table.find(addr(3)), None);
    }

    #[test]
    fn test_second_drone_rejected_while_connected() {
        let mut bench = Bench::new(2);
        let first = bench.bind(Role::Drone, 1).unwrap();
        assert!(bench.bind(Role::Drone, 9).is_none());
        assert_eq!(bench.table.find(addr(1)), Some(DRONE_SLOT));

        // Once the first drone is no longer connected the slot is claimable
        bench.now += Duration::from_secs(5);
        let second = bench.bind(Role::Drone, 9).unwrap();
        assert_eq!(second.slot, DRONE_SLOT);
        assert!(second.generation > first.generation);
        let replaced = second.replaced.unwrap();
        assert_eq!(replaced.remote, addr(1));
        assert!(!replaced.session().lock().outbound().is_active());
        assert_eq!(bench.table.find(addr(9)), Some(DRONE_SLOT));
    }

    #[test]
    fn test_viewers_take_free_slots() {
        let bench = Bench::new(2);
        assert_eq!(bench.bind(Role::Viewer, 10).unwrap().slot, 2);
        assert_eq!(bench.bind(Role::Viewer, 11).unwrap().slot, 3);
        assert!(bench.bind(Role::Viewer, 12).is_none());

        let no_viewers = Bench::new(0);
        assert!(no_viewers.bind(Role::Viewer, 10).is_none());
    }

    #[test]
    fn test_release_is_idempotent() {
        let bench = Bench::new(1);
        let claim = bench.bind(Role::Controller, 2).unwrap();
        let occupant = bench.table.release(claim.slot).unwrap();
        assert!(!occupant.session().lock().outbound().is_active());
        assert!(bench.table.release(claim.slot).is_none());
        assert!(bench.table.release(99).is_none());
        assert_eq!(bench.table.find(addr(2)), None);
        assert_eq!(bench.table.generation(claim.slot), Some(claim.generation + 1));
    }

    #[test]
    fn test_release_if_checks_generation() {
        let bench = Bench::new(1);
        let claim = bench.bind(Role::Viewer, 10).unwrap();
        assert!(bench.table.release_if(claim.slot, claim.generation + 1).is_none());
        assert!(bench.table.release_if(claim.slot, claim.generation).is_some());
    }

    #[test]
    fn test_config_reaches_only_the_drone() {
        let bench = Bench::new(2);
        bench.bind(Role::Drone, 1);
        bench.bind(Role::Controller, 2);
        bench.bind(Role::Viewer, 10);

        let config = bench.envelope(PacketKind::Config, 2);
        assert_eq!(bench.table.forward(CONTROLLER_SLOT, &config, bench.now), 1);
        assert_eq!(bench.recipients(), vec![addr(1)]);

        // A viewer cannot configure the drone
        let config = bench.envelope(PacketKind::Config, 10);
        assert_eq!(bench.table.forward(2, &config, bench.now), 0);
        assert!(bench.recipients().is_empty());
    }

    #[test]
    fn test_telemetry_broadcast_to_everyone_else() {
        let bench = Bench::new(2);
        bench.bind(Role::Drone, 1);
        bench.bind(Role::Controller, 2);
        bench.bind(Role::Viewer, 10);

        let telemetry = bench.envelope(PacketKind::TelemetryData, 1);
        assert_eq!(bench.table.forward(DRONE_SLOT, &telemetry, bench.now), 2);
        let mut to = bench.recipients();
        to.sort();
        assert_eq!(to, vec![addr(2), addr(10)]);
    }

    #[test]
    fn test_forwarded_sequenced_data_is_renumbered() {
        let bench = Bench::new(0);
        bench.bind(Role::Drone, 1);
        bench.bind(Role::Controller, 2);

        let mut w = packet_writer(PacketKind::Config);
        w.put_u8(1);
        let mut data = w.into_vec();
        data[1..3].copy_from_slice(&500u16.to_be_bytes());
        let env = Envelope::parse(data.into(), addr(2), bench.now).unwrap();

        bench.table.forward(CONTROLLER_SLOT, &env, bench.now);
        let sent = bench.sink.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(u16::from_be_bytes([sent[0].0[1], sent[0].0[2]]), 0);
    }

    #[test]
    fn test_tick_stale_after_release() {
        let bench = Bench::new(0);
        let claim = bench.bind(Role::Drone, 1).unwrap();
        assert_eq!(bench.table.tick(claim.slot, claim.generation, bench.now), SlotTick::Live);
        bench.table.release(claim.slot);
        assert_eq!(bench.table.tick(claim.slot, claim.generation, bench.now), SlotTick::Stale);
    }

    #[test]
    fn test_tick_idle_after_teardown_period() {
        let mut bench = Bench::new(0);
        let claim = bench.bind(Role::Drone, 1).unwrap();

        bench.now += Duration::from_secs(5);
        assert_eq!(bench.table.tick(claim.slot, claim.generation, bench.now), SlotTick::Live);
        bench.now += Duration::from_secs(6);
        assert_eq!(bench.table.tick(claim.slot, claim.generation, bench.now), SlotTick::Idle);
    }

    #[test]
    fn test_occupancy() {
        let bench = Bench::new(2);
        bench.bind(Role::Drone, 1);
        bench.bind(Role::Viewer, 10);
        let info = bench.table.occupancy(bench.now);
        assert_eq!(info.len(), 2);
        assert_eq!(info[0].slot, DRONE_SLOT);
        assert_eq!(info[0].role, Role::Drone);
        assert!(info[0].connected);
        assert_eq!(info[1].slot, 2);
        assert_eq!(info[1].remote, addr(10));
        assert_eq!(info[1].version, 7);
    }
}
