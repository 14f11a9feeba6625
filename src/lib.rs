//! # rs-dcc
//!
//! The core of a DCC model railroad command station: packet encoding,
//! the operations-mode refresh loop, and service-mode CV programming with
//! acknowledgment detection on the programming track.
//!
//! ## Features
//!
//! - **Packet codec**: build, inspect, edit, and pretty-print DCC packets
//! - **Throttles**: per-locomotive speed and function refresh with
//!   operations-mode CV writes
//! - **Service mode**: direct-mode CV write, bit write, and bit-wise read
//! - **Current filter**: mains-cycle and short-window averages over raw ADC
//!   samples, used to spot the decoder's acknowledgment pulse
//! - **Hardware abstraction**: track output and sample source traits with
//!   mock and ESP32 implementations
//!
//! ## Architecture
//!
//! The crate is structured to allow testing on desktop without hardware:
//!
//! - `packet` - DCC packet codec
//! - `current` - Current-sense filter
//! - `throttle` - Per-locomotive refresh state
//! - `station` - Mode control, service-mode programming, throttle roster
//! - `traits` - Hardware abstractions
//! - `hal` - Concrete implementations (mock for testing, esp32 for hardware)
//!
//! ## Example
//!
//! ```rust
//! use rs_dcc::{CommandStation, Config, Packet};
//! use rs_dcc::hal::{MockAdc, MockTrack};
//!
//! let mut station = CommandStation::new(MockTrack::new(), MockAdc::new(), &Config::default());
//! station.mode_ops().unwrap();
//!
//! let id = station.create_throttle(3).unwrap();
//! station.throttle_mut(id).unwrap().set_speed(40);
//!
//! // Call in your main loop
//! station.tick(0).unwrap();
//! assert_eq!(station.track().last().unwrap().packet, Packet::speed128(3, 40));
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]

extern crate alloc;

/// Board, filter, and service-mode configuration.
pub mod config;
/// Moving-average filter over raw current-sense samples.
pub mod current;
/// Hardware abstraction layer with mock implementations for testing.
pub mod hal;
/// DCC packet construction, inspection, and rendering.
pub mod packet;
/// Command station modes, service-mode programming, and throttle roster.
pub mod station;
/// Bounded text formatting for fixed-size buffers.
pub mod text;
/// Per-locomotive packet refresh.
pub mod throttle;
/// Core traits for hardware abstraction.
pub mod traits;

// Re-exports for convenience
pub use config::{BoardConfig, Config, FilterConfig, ServiceConfig};
pub use current::CurrentFilter;
pub use packet::{AddressKind, Command, FunctionGroup, Packet, SvcInstruction};
pub use station::{CommandStation, Mode, StationState, SvcFailure, SvcStatus, ThrottleId};
pub use throttle::{Throttle, ThrottleState};
pub use traits::{Clock, SampleSource, TrackOutput};
