//! Mock implementations for testing without hardware.
//!
//! This module provides test doubles for the hardware traits, enabling
//! development and testing on desktop without a track or an H-bridge.
//!
//! # Available Mocks
//!
//! | Mock | Trait | Purpose |
//! |------|-------|---------|
//! | [`MockTrack`] | [`TrackOutput`] | Records every packet sent and its preamble |
//! | [`MockAdc`] | [`SampleSource`] | Queued sample words |
//! | [`MockClock`] | [`Clock`] | Controllable time source |
//! | [`MockDecoder`] | - | Programming-track decoder that answers with ACK current |
//!
//! # Example
//!
//! ```rust
//! use rs_dcc::config::Config;
//! use rs_dcc::hal::{MockAdc, MockTrack};
//! use rs_dcc::station::CommandStation;
//!
//! let mut station = CommandStation::new(MockTrack::new(), MockAdc::new(), &Config::default());
//! let loco = station.create_throttle(3).unwrap();
//! station.throttle_mut(loco).unwrap().set_speed(20);
//! station.mode_ops().unwrap();
//! station.tick(0).unwrap();
//!
//! let sent = station.track().last().unwrap();
//! assert_eq!(sent.packet.speed(), 20);
//! assert_eq!(sent.preamble_bits, 14);
//! ```
//!
//! [`TrackOutput`]: crate::traits::TrackOutput
//! [`SampleSource`]: crate::traits::SampleSource
//! [`Clock`]: crate::traits::Clock

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::current::SAMPLE_ERROR_FLAG;
use crate::packet::{Command, Packet, SvcInstruction, CV_NUM_MAX};
use crate::traits::{Clock, SampleSource, TrackOutput};

// ============================================================================
// Hardware Mocks
// ============================================================================

/// One packet as handed to [`MockTrack`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SentPacket {
    /// The packet.
    pub packet: Packet,
    /// Preamble length it was sent with.
    pub preamble_bits: u8,
}

/// Mock track output for testing.
///
/// Records every packet for verification. Set `ready` to `false` to
/// simulate a busy transmitter, or `fail` to make every call return
/// `Err(())`.
#[derive(Debug)]
pub struct MockTrack {
    /// Track power state.
    pub powered: bool,
    /// Whether the transmitter accepts packets.
    pub ready: bool,
    /// Make every call fail.
    pub fail: bool,
    /// Every packet sent, oldest first.
    pub sent: Vec<SentPacket>,
}

impl Default for MockTrack {
    fn default() -> Self {
        Self {
            powered: false,
            ready: true,
            fail: false,
            sent: Vec::new(),
        }
    }
}

impl MockTrack {
    /// Creates a powered-off, ready track.
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent packet.
    pub fn last(&self) -> Option<&SentPacket> {
        self.sent.last()
    }

    /// Packets sent so far, without preamble lengths.
    pub fn packets(&self) -> impl Iterator<Item = &Packet> + '_ {
        self.sent.iter().map(|s| &s.packet)
    }

    /// Forgets the recorded packets.
    pub fn clear(&mut self) {
        self.sent.clear();
    }
}

impl TrackOutput for MockTrack {
    type Error = ();

    fn set_power(&mut self, on: bool) -> Result<(), ()> {
        if self.fail {
            return Err(());
        }
        self.powered = on;
        Ok(())
    }

    fn ready(&self) -> bool {
        self.ready
    }

    fn send(&mut self, packet: &Packet, preamble_bits: u8) -> Result<(), ()> {
        if self.fail {
            return Err(());
        }
        self.sent.push(SentPacket {
            packet: *packet,
            preamble_bits,
        });
        Ok(())
    }
}

/// Mock current-sense ADC for testing.
///
/// Samples come out in the order they were queued.
///
/// # Example
///
/// ```rust
/// use rs_dcc::hal::MockAdc;
/// use rs_dcc::traits::SampleSource;
///
/// let mut adc = MockAdc::new();
/// adc.push_n(100, 2);
/// adc.push_error();
///
/// assert_eq!(adc.read_sample(), Some(100));
/// assert_eq!(adc.read_sample(), Some(100));
/// assert_eq!(adc.read_sample(), Some(0x8000));
/// assert_eq!(adc.read_sample(), None);
/// ```
#[derive(Debug, Default)]
pub struct MockAdc {
    queue: VecDeque<u16>,
    /// Number of samples read so far.
    pub reads: usize,
}

impl MockAdc {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues one raw sample word.
    pub fn push(&mut self, word: u16) {
        self.queue.push_back(word);
    }

    /// Queues `n` copies of `raw`.
    pub fn push_n(&mut self, raw: u16, n: usize) {
        self.queue.extend(core::iter::repeat(raw).take(n));
    }

    /// Queues a failed conversion.
    pub fn push_error(&mut self) {
        self.queue.push_back(SAMPLE_ERROR_FLAG);
    }

    /// Samples still queued.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

impl SampleSource for MockAdc {
    fn read_sample(&mut self) -> Option<u16> {
        let word = self.queue.pop_front();
        if word.is_some() {
            self.reads += 1;
        }
        word
    }
}

/// Mock clock for testing.
///
/// # Example
///
/// ```rust
/// use rs_dcc::hal::MockClock;
/// use rs_dcc::traits::Clock;
///
/// let mut clock = MockClock::new();
/// assert_eq!(clock.now_ms(), 0);
///
/// clock.set(1000);
/// assert_eq!(clock.now_ms(), 1000);
///
/// clock.advance(500);
/// assert_eq!(clock.now_ms(), 1500);
/// ```
#[derive(Debug, Default)]
pub struct MockClock {
    current_ms: u64,
}

impl MockClock {
    /// Creates a new mock clock starting at 0ms.
    pub fn new() -> Self {
        Self { current_ms: 0 }
    }

    /// Sets the current time in milliseconds.
    pub fn set(&mut self, ms: u64) {
        self.current_ms = ms;
    }

    /// Advances time by the given milliseconds.
    pub fn advance(&mut self, ms: u64) {
        self.current_ms += ms;
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> u64 {
        self.current_ms
    }
}

// ============================================================================
// Decoder Mock
// ============================================================================

/// Simulated decoder on a programming track.
///
/// Acts on a direct-mode service instruction once it has seen the same
/// packet twice in a row, like a real decoder, and then answers once with
/// an acknowledgment pulse. A reset packet starts over.
///
/// [`load_for`](Self::load_for) turns that into current-sense samples:
/// feed it each packet the station sends and queue the returned raw level
/// for the duration of that packet.
#[derive(Debug)]
pub struct MockDecoder {
    cvs: Vec<u8>,
    last: Option<Packet>,
    answered: bool,
    /// Whether the decoder is on the track at all.
    pub present: bool,
    /// Idle draw, raw ADC counts.
    pub idle_raw: u16,
    /// Extra draw during an acknowledgment, raw ADC counts.
    ///
    /// The default, 120, is about 88 mA at the default calibration.
    pub ack_raw: u16,
    /// Answer whole-byte verifies as if the CV held this value instead.
    pub byte_verify_override: Option<u8>,
}

impl Default for MockDecoder {
    fn default() -> Self {
        let mut cvs = alloc::vec![0; usize::from(CV_NUM_MAX)];
        // primary address, version, manufacturer, configuration
        cvs[0] = 3;
        cvs[6] = 42;
        cvs[7] = 13;
        cvs[28] = 0x06;
        Self {
            cvs,
            last: None,
            answered: false,
            present: true,
            idle_raw: 40,
            ack_raw: 120,
            byte_verify_override: None,
        }
    }
}

impl MockDecoder {
    /// A decoder at factory defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// A programming track with nothing on it.
    pub fn absent() -> Self {
        Self {
            present: false,
            ..Self::default()
        }
    }

    /// Reads a CV directly.
    pub fn cv(&self, cv_num: u16) -> u8 {
        self.cvs[usize::from(cv_num - 1)]
    }

    /// Writes a CV directly.
    pub fn set_cv(&mut self, cv_num: u16, cv_val: u8) {
        self.cvs[usize::from(cv_num - 1)] = cv_val;
    }

    /// Feeds one packet; returns whether the decoder acknowledges it.
    pub fn respond(&mut self, packet: &Packet) -> bool {
        if !self.present {
            return false;
        }
        if packet.command() == Command::Reset && !Packet::is_svc_direct(packet.as_bytes()) {
            self.last = None;
            self.answered = false;
            return false;
        }
        let Some(instr) = packet.svc_instruction() else {
            self.last = None;
            return false;
        };
        if self.last != Some(*packet) {
            self.last = Some(*packet);
            self.answered = false;
            return false;
        }
        if self.answered {
            return false;
        }
        self.answered = true;
        self.execute(instr)
    }

    fn execute(&mut self, instr: SvcInstruction) -> bool {
        match instr {
            SvcInstruction::WriteCv { cv_num, cv_val } => {
                self.set_cv(cv_num, cv_val);
                true
            }
            SvcInstruction::WriteBit {
                cv_num,
                bit_num,
                bit_val,
            } => {
                let mask = 1 << bit_num;
                let cv = self.cv(cv_num);
                self.set_cv(cv_num, if bit_val { cv | mask } else { cv & !mask });
                true
            }
            SvcInstruction::VerifyCv { cv_num, cv_val } => {
                self.byte_verify_override.unwrap_or(self.cv(cv_num)) == cv_val
            }
            SvcInstruction::VerifyBit {
                cv_num,
                bit_num,
                bit_val,
            } => (self.cv(cv_num) >> bit_num & 1 == 1) == bit_val,
        }
    }

    /// Raw current level while `packet` is on the rails.
    pub fn load_for(&mut self, packet: &Packet) -> u16 {
        let idle = if self.present { self.idle_raw } else { 0 };
        if self.respond(packet) {
            idle + self.ack_raw
        } else {
            idle
        }
    }
}
