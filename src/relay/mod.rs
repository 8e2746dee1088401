//! Session relay.
//!
//! A rendezvous point for one drone, one controller and a configurable
//! number of viewers, none of which can reach each other directly:
//!
//! - **Slots**: [`SlotTable`] binds authenticated peers to role slots
//! - **Routing**: [`routing::destination`] decides who receives each
//!   delivered datagram
//! - **Server**: [`RelayServer`] runs the receive loop and per-slot ticks
//! - **Configuration**: [`RelayConfig`] persisted as TOML, edited through
//!   the [`console`] commands
//!
//! ```text
//!   drone ──┐                      ┌── slot 0 ─┐
//!   ctrl  ──┼── UDP ── receive ────┼── slot 1 ─┼── route ── send
//!   viewer ─┘        loop          └── slot n ─┘
//! ```

pub mod config;
pub mod console;
mod error;
pub mod routing;
mod server;
mod slot;

pub use config::RelayConfig;
pub use console::{Command, Console, ConsoleError, Outcome};
pub use error::{ConfigError, RelayError};
pub use routing::Destination;
pub use server::{RelayEvent, RelayServer, ReleaseReason};
pub use slot::{Claim, Occupant, SlotInfo, SlotTable, SlotTick};
