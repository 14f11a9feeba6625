//! ESP32-C3 hardware abstraction layer for a DCC command station.
//!
//! # Hardware Configuration
//!
//! - **MCU**: ESP32-C3 SuperMini (RISC-V 160MHz, 4MB Flash)
//! - **Track Driver**: DRV8874 H-bridge in PH/EN mode
//! - **Current Sense**: DRV8874 IPROPI into ADC1
//!
//! # Pin Assignments
//!
//! Track pins come from [`BoardConfig`](crate::config::BoardConfig), whose
//! default is GPIO2 signal and GPIO3 power. Current sense is fixed to
//! [`SENSE_GPIO`] on ADC1.

mod clock;
mod current;
mod track;

pub use clock::Esp32Clock;
pub use current::{Esp32CurrentSense, SENSE_GPIO};
pub use track::{Esp32Track, ONE_HALF_US, ZERO_HALF_US};
