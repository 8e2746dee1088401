//! Where the relay forwards each delivered datagram.
//!
//! Slot 0 is the drone, slot 1 the controller and slots 2.. are viewers.
//! Routing is a pure function of the kind, the sending slot and, for
//! probes, the target byte.

use bytes::{Bytes, BytesMut};

use crate::packet::{PROBE_TARGET_OFFSET, PacketKind, Route};

/// Drone slot.
pub const DRONE_SLOT: usize = 0;

/// Controller slot.
pub const CONTROLLER_SLOT: usize = 1;

/// First viewer slot.
pub const FIRST_VIEWER_SLOT: usize = 2;

/// Forwarding decision for one datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// Not forwarded.
    Drop,
    /// To one slot.
    Slot(usize),
    /// To every other active slot.
    Broadcast,
}

/// Destination of a datagram of `kind` received on slot `from`.
///
/// `data` is the whole datagram; only probes look past the kind byte.
pub fn destination(kind: PacketKind, from: usize, data: &[u8], slot_count: usize) -> Destination {
    match kind.route() {
        Route::ControllerToDrone if from == CONTROLLER_SLOT => Destination::Slot(DRONE_SLOT),
        Route::ControllerToDrone => Destination::Drop,
        Route::ToDrone if from != DRONE_SLOT => Destination::Slot(DRONE_SLOT),
        Route::ToDrone => Destination::Drop,
        Route::DroneToController if from == DRONE_SLOT => Destination::Slot(CONTROLLER_SLOT),
        Route::DroneToController => Destination::Drop,
        Route::Targeted => {
            if kind == PacketKind::Pong
                && let Some(&target) = data.get(PROBE_TARGET_OFFSET)
            {
                let target = usize::from(target);
                return if target < slot_count {
                    Destination::Slot(target)
                } else {
                    Destination::Drop
                };
            }
            endpoint_peer(from)
        }
        Route::FcInfo if from != DRONE_SLOT => Destination::Slot(DRONE_SLOT),
        Route::FcInfo | Route::Broadcast => Destination::Broadcast,
        Route::Local => Destination::Drop,
    }
}

/// The drone talks to the controller; everyone else talks to the drone.
fn endpoint_peer(from: usize) -> Destination {
    if from == DRONE_SLOT {
        Destination::Slot(CONTROLLER_SLOT)
    } else {
        Destination::Slot(DRONE_SLOT)
    }
}

/// Write the sending slot into a ping's target byte, when it has one.
pub fn stamp_probe_target(data: &Bytes, from: usize) -> Bytes {
    if data.len() <= PROBE_TARGET_OFFSET {
        return data.clone();
    }
    let mut stamped = BytesMut::from(&data[..]);
    stamped[PROBE_TARGET_OFFSET] = from as u8;
    stamped.freeze()
}
