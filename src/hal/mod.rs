//! Hardware Abstraction Layer implementations.
//!
//! This module contains concrete implementations of the traits
//! defined in [`crate::traits`] for various platforms.
//!
//! # Available Implementations
//!
//! - `mock`: Test implementations for desktop development, including
//!   [`MockDecoder`], a simulated decoder that acknowledges service packets
//!   with a current pulse
//! - `esp32`: ESP32-C3 SuperMini with DRV8874 track driver (requires `esp32` feature)

pub mod mock;

#[cfg(feature = "esp32")]
pub mod esp32;

pub use mock::*;

#[cfg(feature = "esp32")]
pub use esp32::*;
