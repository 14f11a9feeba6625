//! Hardware abstraction traits for track output, current sampling, and time.
//!
//! These are the seams between the command station core and the board it
//! runs on. The core never touches a peripheral directly.
//!
//! # Key Traits
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`TrackOutput`] | Clocks packets onto the rails, switches track power |
//! | [`SampleSource`] | Non-blocking queue of raw current-sense ADC words |
//! | [`Clock`] | Time source for `no_std` environments |
//!
//! # Implementation
//!
//! For testing and desktop development, use the mock implementations
//! from [`crate::hal::mock`]. For ESP32 hardware, use the
//! implementations from `hal::esp32` (requires `esp32` feature).
//!
//! # Example
//!
//! ```rust
//! use rs_dcc::hal::MockTrack;
//! use rs_dcc::packet::{Packet, OPS_PREAMBLE_BITS};
//! use rs_dcc::traits::TrackOutput;
//!
//! let mut track = MockTrack::new();
//! track.set_power(true).unwrap();
//! track.send(&Packet::idle(), OPS_PREAMBLE_BITS).unwrap();
//! assert_eq!(track.sent.len(), 1);
//! ```

use crate::packet::Packet;

/// Bitstream transmitter for the track.
///
/// Takes one packet at a time and turns it into the DCC waveform: a
/// preamble of `preamble_bits` one-bits, a zero start bit before every
/// byte, and a closing one-bit.
///
/// # Implementation Notes
///
/// - `send` may block for the duration of the packet (bit-banged outputs)
///   or queue it (DMA/PIO outputs); queueing outputs report back-pressure
///   through [`ready`](Self::ready)
/// - Sending while power is off is not an error; the bits just go nowhere
pub trait TrackOutput {
    /// Error type for output operations.
    type Error;

    /// Switch track power on or off.
    fn set_power(&mut self, on: bool) -> Result<(), Self::Error>;

    /// Whether the output can take another packet now.
    ///
    /// Default implementation is always ready, which suits outputs whose
    /// `send` blocks until the packet is on the wire.
    fn ready(&self) -> bool {
        true
    }

    /// Transmit one packet with the given preamble length.
    fn send(&mut self, packet: &Packet, preamble_bits: u8) -> Result<(), Self::Error>;
}

/// Current-sense sample queue.
///
/// Each word is a raw ADC conversion: bits 0-11 hold the value, bit 15 is
/// set if the conversion failed (see [`crate::current::SAMPLE_ERROR_FLAG`]).
pub trait SampleSource {
    /// Next pending sample, or `None` if the queue is empty.
    ///
    /// Must not block.
    fn read_sample(&mut self) -> Option<u16>;
}

/// Time source trait for `no_std` compatibility.
///
/// Provides monotonic time in milliseconds for the optional service-mode
/// time bound. On desktop, this can wrap `std::time::Instant`. On embedded,
/// use a hardware timer.
///
/// # Example
///
/// ```rust
/// use rs_dcc::traits::Clock;
/// use rs_dcc::hal::MockClock;
///
/// let mut clock = MockClock::new();
/// assert_eq!(clock.now_ms(), 0);
///
/// clock.advance(100);
/// assert_eq!(clock.now_ms(), 100);
/// ```
pub trait Clock {
    /// Returns current time in milliseconds since an arbitrary epoch.
    ///
    /// Must be monotonically increasing.
    fn now_ms(&self) -> u64;
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // TrackOutput Default Methods Tests
    // =========================================================================

    struct TestTrack {
        powered: bool,
        sent: usize,
    }

    impl TrackOutput for TestTrack {
        type Error = ();

        fn set_power(&mut self, on: bool) -> Result<(), ()> {
            self.powered = on;
            Ok(())
        }

        fn send(&mut self, _packet: &Packet, _preamble_bits: u8) -> Result<(), ()> {
            self.sent += 1;
            Ok(())
        }
    }

    #[test]
    fn track_output_ready_default_impl() {
        let track = TestTrack {
            powered: false,
            sent: 0,
        };
        assert!(track.ready());
    }

    #[test]
    fn track_output_through_trait_object() {
        let mut track = TestTrack {
            powered: false,
            sent: 0,
        };
        {
            let out: &mut dyn TrackOutput<Error = ()> = &mut track;
            out.set_power(true).unwrap();
            out.send(&Packet::reset(), 20).unwrap();
        }
        assert!(track.powered);
        assert_eq!(track.sent, 1);
    }

    // =========================================================================
    // SampleSource Tests
    // =========================================================================

    struct Countdown(u16);

    impl SampleSource for Countdown {
        fn read_sample(&mut self) -> Option<u16> {
            if self.0 == 0 {
                None
            } else {
                self.0 -= 1;
                Some(self.0)
            }
        }
    }

    #[test]
    fn sample_source_drains_to_none() {
        let mut src = Countdown(2);
        assert_eq!(src.read_sample(), Some(1));
        assert_eq!(src.read_sample(), Some(0));
        assert_eq!(src.read_sample(), None);
        assert_eq!(src.read_sample(), None);
    }
}
