//! Trait definitions for hardware abstraction.
//!
//! This module defines the seams that allow rs-dcc to run on different
//! hardware (ESP32, desktop mock).
//!
//! # Submodules
//!
//! - `hardware`: Track output, current sampling, clock
//!
//! # Hardware Abstraction
//!
//! The key hardware traits are:
//!
//! - [`TrackOutput`]: DCC bitstream and track power
//! - [`SampleSource`]: Raw current-sense ADC words
//! - [`Clock`]: Time source for `no_std` environments

pub mod hardware;

pub use hardware::*;
