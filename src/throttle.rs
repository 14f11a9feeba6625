//! Per-locomotive refresh state.
//!
//! A [`Throttle`] owns the packets that describe one locomotive: a 128-step
//! speed packet and one packet per function group. Decoders forget their
//! state when power flickers, so the command station resends these packets
//! forever, one per call to [`Throttle::next_packet`].
//!
//! # Refresh sequence
//!
//! The sequence is ten slots long. Even slots send speed, odd slots send
//! the function groups in order, so speed goes out every other packet:
//!
//! ```text
//! speed F0-4 speed F5-8 speed F9-12 speed F13-20 speed F21-28
//! ```
//!
//! An operations-mode CV write takes over the next five slots; the
//! sequence keeps counting underneath it.
//!
//! # Example
//!
//! ```rust
//! use rs_dcc::packet::Command;
//! use rs_dcc::throttle::Throttle;
//!
//! let mut throttle = Throttle::new(3);
//! throttle.set_speed(40);
//! throttle.set_function(0, true);
//!
//! assert_eq!(throttle.next_packet().command(), Command::Speed128);
//! let funcs = throttle.next_packet();
//! assert_eq!(funcs.command(), Command::Func0to4);
//! assert!(funcs.function(0));
//! ```

use core::fmt;

use crate::packet::{FunctionGroup, Packet, FUNCTION_MAX};

/// Slots in one refresh cycle.
pub const SEQ_MAX: u8 = 10;

/// Times an operations-mode CV write is sent.
pub const WRITE_CV_SEND_CNT: u8 = 5;

/// Factory address of a new decoder.
pub const DEFAULT_ADDRESS: u16 = 3;

/// One locomotive's packets and refresh position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Throttle {
    address: u16,
    pkt_speed: Packet,
    pkt_funcs: [Packet; 5],
    pkt_write_cv: Option<Packet>,
    write_cv_cnt: u8,
    seq: u8,
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new(DEFAULT_ADDRESS)
    }
}

impl Throttle {
    /// A stopped locomotive with all functions off.
    ///
    /// # Panics
    ///
    /// If `address` is not a valid locomotive address.
    pub fn new(address: u16) -> Self {
        Self {
            address,
            pkt_speed: Packet::speed128(address, 0),
            pkt_funcs: FunctionGroup::ALL.map(|group| Packet::function_group(address, group, 0)),
            pkt_write_cv: None,
            write_cv_cnt: 0,
            seq: 0,
        }
    }

    /// The locomotive address.
    pub fn address(&self) -> u16 {
        self.address
    }

    /// Readdresses every packet, including a pending CV write.
    pub fn set_address(&mut self, address: u16) {
        self.pkt_speed.set_address(address);
        for pkt in &mut self.pkt_funcs {
            pkt.set_address(address);
        }
        if let Some(pkt) = self.pkt_write_cv.as_mut() {
            pkt.set_address(address);
        }
        self.address = address;
    }

    /// Signed speed, negative in reverse.
    pub fn speed(&self) -> i8 {
        self.pkt_speed.speed()
    }

    /// Sets the speed; takes effect at the next speed slot.
    pub fn set_speed(&mut self, speed: i8) {
        self.pkt_speed.set_speed(speed);
    }

    /// State of function `num` (0-28).
    pub fn function(&self, num: u8) -> bool {
        self.pkt_funcs[FunctionGroup::of(num).index()].function(num)
    }

    /// Switches function `num` (0-28) on or off.
    pub fn set_function(&mut self, num: u8, on: bool) {
        self.pkt_funcs[FunctionGroup::of(num).index()].set_function(num, on);
    }

    /// All function states as a bitmask, F0 at bit 0.
    pub fn functions(&self) -> u32 {
        (0..=FUNCTION_MAX)
            .filter(|&num| self.function(num))
            .fold(0, |mask, num| mask | 1 << num)
    }

    /// Queues an operations-mode CV write.
    ///
    /// Replaces any write still pending.
    pub fn write_cv(&mut self, cv_num: u16, cv_val: u8) {
        self.queue_write(Packet::ops_write_cv(self.address, cv_num, cv_val));
    }

    /// Queues an operations-mode single bit write.
    pub fn write_cv_bit(&mut self, cv_num: u16, bit_num: u8, bit_val: bool) {
        self.queue_write(Packet::ops_write_bit(self.address, cv_num, bit_num, bit_val));
    }

    fn queue_write(&mut self, pkt: Packet) {
        tracing::debug!(address = self.address, "ops write queued: {}", pkt.show());
        self.pkt_write_cv = Some(pkt);
        self.write_cv_cnt = WRITE_CV_SEND_CNT;
    }

    /// Sends of the pending CV write still to go.
    pub fn write_pending(&self) -> u8 {
        self.write_cv_cnt
    }

    /// The packet for the next refresh slot.
    pub fn next_packet(&mut self) -> Packet {
        let slot = self.seq;
        self.seq = (self.seq + 1) % SEQ_MAX;

        if let Some(pkt) = self.pkt_write_cv {
            self.write_cv_cnt -= 1;
            if self.write_cv_cnt == 0 {
                self.pkt_write_cv = None;
            }
            return pkt;
        }

        if slot % 2 == 0 {
            self.pkt_speed
        } else {
            self.pkt_funcs[usize::from(slot / 2)]
        }
    }

    /// Get the current state for UI/API
    pub fn state(&self) -> ThrottleState {
        ThrottleState {
            address: self.address,
            speed: self.speed(),
            functions: self.functions(),
            write_pending: self.write_cv_cnt,
        }
    }
}

impl fmt::Display for Throttle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let speed = self.speed();
        let dir = if speed < 0 { "rev" } else { "fwd" };
        write!(f, "{:4}: {dir} {}/128", self.address, speed.unsigned_abs())?;
        for num in (0..=FUNCTION_MAX).filter(|&num| self.function(num)) {
            write!(f, " f{num}")?;
        }
        Ok(())
    }
}

/// State snapshot for UI/API.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ThrottleState {
    /// Locomotive address.
    pub address: u16,
    /// Signed speed, -127 to 127.
    pub speed: i8,
    /// Function states, F0 at bit 0.
    pub functions: u32,
    /// Sends of a pending CV write still to go.
    pub write_pending: u8,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Command;

    fn commands(throttle: &mut Throttle, n: usize) -> alloc::vec::Vec<Command> {
        (0..n).map(|_| throttle.next_packet().command()).collect()
    }

    // =========================================================================
    // Refresh sequence
    // =========================================================================

    #[test]
    fn sequence_interleaves_speed_and_functions() {
        let mut throttle = Throttle::new(3);
        assert_eq!(
            commands(&mut throttle, 10),
            [
                Command::Speed128,
                Command::Func0to4,
                Command::Speed128,
                Command::Func5to8,
                Command::Speed128,
                Command::Func9to12,
                Command::Speed128,
                Command::Func13to20,
                Command::Speed128,
                Command::Func21to28,
            ]
        );
    }

    #[test]
    fn sequence_repeats_every_ten() {
        let mut throttle = Throttle::new(3);
        let first = commands(&mut throttle, 10);
        let second = commands(&mut throttle, 10);
        assert_eq!(first, second);
    }

    #[test]
    fn every_packet_is_addressed_and_valid() {
        let mut throttle = Throttle::new(1234);
        for _ in 0..20 {
            let pkt = throttle.next_packet();
            assert_eq!(pkt.address(), Some(1234));
            assert!(pkt.checksum_ok());
        }
    }

    // =========================================================================
    // Pending CV write
    // =========================================================================

    #[test]
    fn cv_write_preempts_five_slots() {
        let mut throttle = Throttle::new(3);
        throttle.next_packet();
        throttle.write_cv(3, 10);
        assert_eq!(throttle.write_pending(), 5);

        for left in (0..5).rev() {
            let pkt = throttle.next_packet();
            assert_eq!(pkt, Packet::ops_write_cv(3, 3, 10));
            assert_eq!(throttle.write_pending(), left);
        }
        // slot 6 of the cycle is a speed slot
        assert_eq!(throttle.next_packet().command(), Command::Speed128);
        assert_eq!(throttle.next_packet().command(), Command::Func13to20);
    }

    #[test]
    fn newer_write_replaces_pending() {
        let mut throttle = Throttle::new(3);
        throttle.write_cv(3, 10);
        throttle.next_packet();
        throttle.write_cv_bit(29, 5, true);
        assert_eq!(throttle.write_pending(), 5);
        assert_eq!(
            throttle.next_packet(),
            Packet::ops_write_bit(3, 29, 5, true)
        );
    }

    // =========================================================================
    // Fields
    // =========================================================================

    #[test]
    fn speed_and_functions() {
        let mut throttle = Throttle::default();
        assert_eq!(throttle.address(), DEFAULT_ADDRESS);
        throttle.set_speed(-20);
        throttle.set_function(0, true);
        throttle.set_function(12, true);
        throttle.set_function(28, true);
        assert_eq!(throttle.speed(), -20);
        assert!(throttle.function(12));
        assert!(!throttle.function(13));
        assert_eq!(throttle.functions(), 1 | 1 << 12 | 1 << 28);
    }

    #[test]
    fn set_address_rewrites_all_packets() {
        let mut throttle = Throttle::new(3);
        throttle.set_speed(7);
        throttle.set_function(5, true);
        throttle.write_cv(1, 1);
        throttle.set_address(4000);

        assert_eq!(throttle.address(), 4000);
        assert_eq!(throttle.speed(), 7);
        assert!(throttle.function(5));
        for _ in 0..SEQ_MAX {
            let pkt = throttle.next_packet();
            assert_eq!(pkt.address(), Some(4000));
            assert!(pkt.checksum_ok());
        }
    }

    #[test]
    fn state_snapshot() {
        let mut throttle = Throttle::new(10);
        throttle.set_speed(5);
        throttle.set_function(1, true);
        throttle.write_cv(2, 3);
        let state = throttle.state();
        assert_eq!(state.address, 10);
        assert_eq!(state.speed, 5);
        assert_eq!(state.functions, 0b10);
        assert_eq!(state.write_pending, WRITE_CV_SEND_CNT);
    }

    #[test]
    fn display() {
        let mut throttle = Throttle::new(3);
        throttle.set_speed(-12);
        throttle.set_function(0, true);
        throttle.set_function(21, true);
        let s: heapless::String<64> = crate::text::bounded_string(format_args!("{throttle}"));
        assert_eq!(s.as_str(), "   3: rev 12/128 f0 f21");
    }
}
