//! Packet kinds and their static attributes.
//!
//! Every engine consults the same table instead of switching on the kind
//! byte: whether a kind carries a sequence number, whether the receiver must
//! acknowledge it, how long the sender keeps it for retransmission, and how
//! a relay forwards it.

use std::time::Duration;

use crate::core::PacketError;
use crate::core::constants::{KIND_SIZE, SEQUENCED_HEADER_SIZE};

/// Kind byte opening every datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    /// Video codec configuration (SPS/PPS) and stream geometry.
    VideoInitialFrame = 0,
    /// Video frame fragment.
    VideoFrame = 1,
    /// Video key frame fragment.
    KeyFrame = 2,
    /// Ask the drone to start streaming.
    StartVideo = 3,
    /// Ask the drone for its video configuration.
    GetVideoConfig = 4,
    /// Bitrate hint for the drone's encoder.
    ChangeBitRate = 5,
    /// List of missing sequence numbers.
    RequestPackets = 6,
    /// Acknowledgment of one sequence number.
    PacketReceived = 7,
    /// Handshake.
    Connect = 8,
    /// Explicit teardown.
    Disconnect = 9,
    /// RTT probe.
    Ping = 10,
    /// RTT probe reply.
    Pong = 11,
    /// Audio codec configuration.
    AudioInitialFrame = 12,
    /// Audio frame.
    AudioFrame = 13,
    /// Flight controller identification.
    FcInfo = 14,
    /// OSD layout.
    OsdConfig = 15,
    /// Battery configuration.
    BatteryConfig = 16,
    /// Flight mode box ids.
    BoxIds = 17,
    /// Flight mode box names.
    BoxNames = 18,
    /// Telemetry snapshot.
    TelemetryData = 19,
    /// Toggle on-board recording.
    StartStopRecording = 20,
    /// Controller configuration for the drone.
    Config = 21,
    /// Drone accepted the configuration.
    ConfigReceived = 22,
    /// Peer runs an incompatible version.
    VersionMismatch = 23,
    /// RC channel values.
    RcFrame = 24,
}

/// How a relay forwards a kind between slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// To the drone, and only when the controller sent it.
    ControllerToDrone,
    /// To the drone from any slot.
    ToDrone,
    /// To the controller, and only when the drone sent it.
    DroneToController,
    /// Probe: to the slot named by its target byte, else drone and controller to each other.
    Targeted,
    /// To the drone from any other slot; broadcast when the drone sent it.
    FcInfo,
    /// To every other active slot.
    Broadcast,
    /// Consumed by the transport, never forwarded.
    Local,
}

/// Static attributes of a packet kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindInfo {
    /// Carries a sequence number and passes through the reorder buffer.
    pub sequenced: bool,
    /// Receiver acknowledges it; sender retransmits until acknowledged or expired.
    pub ack_required: bool,
    /// How long the sender retains it (0 = send once).
    pub lifetime: Duration,
    /// Relay forwarding rule.
    pub route: Route,
}

const fn info(sequenced: bool, ack_required: bool, lifetime_ms: u64, route: Route) -> KindInfo {
    KindInfo {
        sequenced,
        ack_required,
        lifetime: Duration::from_millis(lifetime_ms),
        route,
    }
}

/// Indexed by kind code.
static KIND_TABLE: [KindInfo; 25] = [
    info(true, true, 1000, Route::Broadcast),          // VideoInitialFrame
    info(false, false, 0, Route::Broadcast),           // VideoFrame
    info(false, false, 500, Route::Broadcast),         // KeyFrame
    info(true, true, 1000, Route::ControllerToDrone),  // StartVideo
    info(true, true, 1000, Route::ToDrone),            // GetVideoConfig
    info(true, false, 1000, Route::ControllerToDrone), // ChangeBitRate
    info(false, false, 1000, Route::Local),            // RequestPackets
    info(false, false, 1000, Route::Local),            // PacketReceived
    info(true, true, 1000, Route::Local),              // Connect
    info(false, false, 1000, Route::Local),            // Disconnect
    info(false, false, 1000, Route::Targeted),         // Ping
    info(false, false, 1000, Route::Targeted),         // Pong
    info(true, true, 1000, Route::Broadcast),          // AudioInitialFrame
    info(false, false, 0, Route::Broadcast),           // AudioFrame
    info(true, true, 1000, Route::FcInfo),             // FcInfo
    info(true, true, 1000, Route::ToDrone),            // OsdConfig
    info(true, true, 1000, Route::ToDrone),            // BatteryConfig
    info(true, true, 1000, Route::ToDrone),            // BoxIds
    info(true, true, 1000, Route::ToDrone),            // BoxNames
    info(false, false, 1000, Route::Broadcast),        // TelemetryData
    info(true, true, 1000, Route::ControllerToDrone),  // StartStopRecording
    info(true, true, 1000, Route::ControllerToDrone),  // Config
    info(true, true, 1000, Route::DroneToController),  // ConfigReceived
    info(true, true, 1000, Route::Broadcast),          // VersionMismatch
    info(false, false, 0, Route::ControllerToDrone),   // RcFrame
];

impl PacketKind {
    /// Every kind, in code order.
    pub const ALL: [PacketKind; 25] = [
        PacketKind::VideoInitialFrame,
        PacketKind::VideoFrame,
        PacketKind::KeyFrame,
        PacketKind::StartVideo,
        PacketKind::GetVideoConfig,
        PacketKind::ChangeBitRate,
        PacketKind::RequestPackets,
        PacketKind::PacketReceived,
        PacketKind::Connect,
        PacketKind::Disconnect,
        PacketKind::Ping,
        PacketKind::Pong,
        PacketKind::AudioInitialFrame,
        PacketKind::AudioFrame,
        PacketKind::FcInfo,
        PacketKind::OsdConfig,
        PacketKind::BatteryConfig,
        PacketKind::BoxIds,
        PacketKind::BoxNames,
        PacketKind::TelemetryData,
        PacketKind::StartStopRecording,
        PacketKind::Config,
        PacketKind::ConfigReceived,
        PacketKind::VersionMismatch,
        PacketKind::RcFrame,
    ];

    /// Look up a kind by its wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    /// Wire code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Static attributes.
    pub fn info(self) -> &'static KindInfo {
        &KIND_TABLE[self as usize]
    }

    /// Whether the kind carries a sequence number.
    pub fn is_sequenced(self) -> bool {
        self.info().sequenced
    }

    /// Whether the receiver must acknowledge it.
    pub fn is_ack_required(self) -> bool {
        self.info().ack_required
    }

    /// Sender-side retention.
    pub fn lifetime(self) -> Duration {
        self.info().lifetime
    }

    /// Relay forwarding rule.
    pub fn route(self) -> Route {
        self.info().route
    }

    /// Bytes before the payload: the kind byte plus, for sequenced kinds, the sequence.
    pub fn header_len(self) -> usize {
        if self.is_sequenced() {
            SEQUENCED_HEADER_SIZE
        } else {
            KIND_SIZE
        }
    }
}

impl TryFrom<u8> for PacketKind {
    type Error = PacketError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_code(code).ok_or(PacketError::UnknownKind(code))
    }
}

impl std::fmt::Display for PacketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}
