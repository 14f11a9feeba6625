//! The command station: mode control, service-mode programming, and the
//! operations-mode refresh loop.
//!
//! [`CommandStation`] owns the track output, the current-sense sample
//! source, and a roster of [`Throttle`]s. The caller drives it by calling
//! [`tick`](CommandStation::tick) in a loop; each tick takes in pending
//! current samples and sends at most one packet.
//!
//! # Modes
//!
//! | Mode | Track | Sends |
//! |------|-------|-------|
//! | [`Mode::Off`] | unpowered | nothing |
//! | [`Mode::Ops`] | powered | roster refresh, 14-bit preamble |
//! | [`Mode::SvcWriteCv`] | powered | service write handshake, 20-bit preamble |
//! | [`Mode::SvcReadCv`] | powered | service read handshake, 20-bit preamble |
//!
//! Every mode change is immediate and throws away any service operation in
//! progress.
//!
//! # Service-mode handshake
//!
//! A decoder on the programming track answers a service packet by drawing
//! an extra 60 mA or so for about 6 ms. One *probe* looks for that pulse:
//!
//! 1. reset packets (3 by default); their long-window current becomes the
//!    baseline
//! 2. the programming packet, repeated (5 by default)
//! 3. reset packets (6 by default) to give a slow decoder time to answer
//!
//! From the first programming packet on, every tick compares the highest
//! short-window current seen since the previous tick with the baseline. A
//! rise of at least the configured margin ends the probe as acknowledged;
//! running out of recovery packets ends it as not acknowledged.
//!
//! A write is one probe. A read is nine: one bit verify per bit (an ACK
//! means the bit is 1), then a whole-byte verify of the assembled value.
//! If the decoder refuses the byte verify the read fails with
//! [`SvcFailure::VerifyMismatch`] rather than returning a value the
//! decoder disagrees with.
//!
//! # Example
//!
//! ```rust
//! use rs_dcc::config::Config;
//! use rs_dcc::hal::{MockAdc, MockTrack};
//! use rs_dcc::station::{CommandStation, Mode};
//!
//! let mut station = CommandStation::new(MockTrack::new(), MockAdc::new(), &Config::default());
//! station.mode_svc_write_cv(29, 0x06).unwrap();
//! assert_eq!(station.mode(), Mode::SvcWriteCv);
//! assert!(station.track().powered);
//!
//! // no decoder answers, so the write eventually fails
//! let mut now = 0;
//! while station.svc_done().is_none() {
//!     station.tick(now).unwrap();
//!     now += 8;
//! }
//! assert_eq!(station.svc_done(), Some(false));
//! ```

use core::fmt;

use tracing::{debug, info, warn};

use crate::config::{Config, ServiceConfig};
use crate::current::CurrentFilter;
use crate::packet::{Packet, OPS_PREAMBLE_BITS, SVC_PREAMBLE_BITS};
use crate::throttle::Throttle;
use crate::traits::{SampleSource, TrackOutput};

/// Roster size used by [`CommandStation::new`].
pub const DEFAULT_MAX_THROTTLES: usize = 8;

/// Probes in a CV read: eight bits and the byte verify.
pub const READ_PROBES: usize = 9;

// ============================================================================
// Public types
// ============================================================================

/// Operating mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Mode {
    /// Track power off.
    #[default]
    Off,
    /// Normal running.
    Ops,
    /// Service-mode write (byte or bit).
    SvcWriteCv,
    /// Service-mode read.
    SvcReadCv,
}

impl Mode {
    /// Whether this is a service (programming track) mode.
    pub const fn is_service(self) -> bool {
        matches!(self, Self::SvcWriteCv | Self::SvcReadCv)
    }

    /// Preamble length for packets sent in this mode.
    pub const fn preamble_bits(self) -> Option<u8> {
        match self {
            Self::Off => None,
            Self::Ops => Some(OPS_PREAMBLE_BITS),
            Self::SvcWriteCv | Self::SvcReadCv => Some(SVC_PREAMBLE_BITS),
        }
    }

    /// Returns the mode as a lowercase string.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Ops => "ops",
            Self::SvcWriteCv => "svc_write_cv",
            Self::SvcReadCv => "svc_read_cv",
        }
    }
}

/// Why a service operation failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SvcFailure {
    /// No acknowledgment at all: no decoder, or it did not take the packet.
    NoAck,
    /// The decoder acknowledged some bit probes but refused the byte verify
    /// of the value assembled from them.
    VerifyMismatch {
        /// Value assembled from the bit probes.
        bits: u8,
    },
    /// The wall-clock bound ran out first.
    TimedOut,
}

impl fmt::Display for SvcFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoAck => f.write_str("no ack"),
            Self::VerifyMismatch { bits } => write!(f, "byte verify refused 0x{bits:02x}"),
            Self::TimedOut => f.write_str("timed out"),
        }
    }
}

/// Progress of the current service operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SvcStatus {
    /// Still running, or no operation.
    #[default]
    Pending,
    /// Finished and acknowledged.
    Succeeded,
    /// Finished without acknowledgment.
    Failed(SvcFailure),
}

impl SvcStatus {
    /// Whether the operation has finished either way.
    pub const fn is_done(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Handle to a roster slot.
///
/// A handle goes stale when its throttle is deleted; a stale handle never
/// reaches a throttle created later in the same slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ThrottleId {
    slot: u16,
    generation: u16,
}

impl ThrottleId {
    /// Roster slot index.
    pub fn slot(&self) -> usize {
        usize::from(self.slot)
    }
}

/// Station state snapshot for UI/API.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StationState {
    /// Operating mode.
    pub mode: Mode,
    /// Service operation progress.
    pub svc_status: SvcStatus,
    /// Active throttles.
    pub throttles: usize,
    /// Short-window track current.
    pub short_ma: u16,
    /// Long-window track current.
    pub long_ma: u16,
    /// Failed ADC conversions so far.
    pub adc_errors: u32,
}

impl fmt::Display for StationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mode={} svc={:?} throttles={} current={}/{} mA adc_errors={}",
            self.mode.as_str(),
            self.svc_status,
            self.throttles,
            self.short_ma,
            self.long_ma,
            self.adc_errors
        )
    }
}

// ============================================================================
// Service context
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SvcOp {
    None,
    WriteCv { cv_num: u16, cv_val: u8 },
    WriteBit { cv_num: u16, bit_num: u8, bit_val: bool },
    ReadCv { cv_num: u16 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Resets,
    Program,
    Recovery,
    Done,
}

/// Everything a service operation tracks. Rebuilt on every mode change.
#[derive(Clone, Debug)]
struct SvcContext {
    op: SvcOp,
    phase: Phase,
    // packets sent in the current phase
    count: u8,
    // read: bit under test, 8 = byte verify
    probe: u8,
    packet: Packet,
    baseline_ma: u16,
    // highest short-window current in this probe
    ack_ma: u16,
    cv_val: u8,
    acks: u8,
    status: SvcStatus,
    ack_history: [u16; READ_PROBES],
    started_ms: Option<u64>,
}

impl SvcContext {
    fn new(op: SvcOp) -> Self {
        let (packet, cv_val) = match op {
            SvcOp::None => (Packet::reset(), 0),
            SvcOp::WriteCv { cv_num, cv_val } => (Packet::svc_write_cv(cv_num, cv_val), cv_val),
            SvcOp::WriteBit {
                cv_num,
                bit_num,
                bit_val,
            } => (
                Packet::svc_write_bit(cv_num, bit_num, bit_val),
                u8::from(bit_val),
            ),
            SvcOp::ReadCv { cv_num } => (Packet::svc_verify_bit(cv_num, 0, true), 0),
        };
        Self {
            op,
            phase: if op == SvcOp::None {
                Phase::Done
            } else {
                Phase::Resets
            },
            count: 0,
            probe: 0,
            packet,
            baseline_ma: 0,
            ack_ma: 0,
            cv_val,
            acks: 0,
            status: SvcStatus::Pending,
            ack_history: [0; READ_PROBES],
            started_ms: None,
        }
    }

    // the ACK window opens once the first programming packet is out
    fn listening(&self) -> bool {
        match self.phase {
            Phase::Program => self.count > 0,
            Phase::Recovery => true,
            Phase::Resets | Phase::Done => false,
        }
    }

    fn complete(&mut self, status: SvcStatus) {
        self.status = status;
        self.phase = Phase::Done;
        match status {
            SvcStatus::Succeeded => info!(op = ?self.op, cv_val = self.cv_val, "service operation succeeded"),
            SvcStatus::Failed(reason) => info!(op = ?self.op, %reason, "service operation failed"),
            SvcStatus::Pending => {}
        }
    }

    fn finish_probe(&mut self, acked: bool) {
        debug!(
            probe = self.probe,
            acked,
            baseline_ma = self.baseline_ma,
            ack_ma = self.ack_ma,
            "probe finished"
        );
        match self.op {
            SvcOp::None => self.phase = Phase::Done,
            SvcOp::WriteCv { .. } | SvcOp::WriteBit { .. } => {
                self.ack_history[0] = self.ack_ma;
                self.complete(if acked {
                    SvcStatus::Succeeded
                } else {
                    SvcStatus::Failed(SvcFailure::NoAck)
                });
            }
            SvcOp::ReadCv { cv_num } => {
                let probe = self.probe;
                self.ack_history[usize::from(probe)] = self.ack_ma;
                if probe < 8 {
                    if acked {
                        self.cv_val |= 1 << probe;
                        self.acks += 1;
                    }
                    self.probe += 1;
                    self.packet = if self.probe < 8 {
                        Packet::svc_verify_bit(cv_num, self.probe, true)
                    } else {
                        Packet::svc_verify_cv(cv_num, self.cv_val)
                    };
                    self.phase = Phase::Resets;
                    self.count = 0;
                    self.ack_ma = 0;
                } else if acked {
                    self.complete(SvcStatus::Succeeded);
                } else if self.acks == 0 {
                    self.complete(SvcStatus::Failed(SvcFailure::NoAck));
                } else {
                    let bits = self.cv_val;
                    warn!(cv_num, bits, "byte verify refused the value read bit by bit");
                    self.complete(SvcStatus::Failed(SvcFailure::VerifyMismatch { bits }));
                }
            }
        }
    }
}

// ============================================================================
// Command station
// ============================================================================

struct Slot {
    generation: u16,
    throttle: Throttle,
}

/// DCC command station.
///
/// # Type Parameters
///
/// - `T`: the track output ([`TrackOutput`] trait)
/// - `S`: the current-sense sample queue ([`SampleSource`] trait)
/// - `N`: roster size
///
/// # Thread Safety
///
/// The station is single-threaded and never blocks; call
/// [`tick`](Self::tick) from one loop or task. The sample source is the
/// only thing fed from elsewhere (the ADC), through its own queue.
pub struct CommandStation<T: TrackOutput, S: SampleSource, const N: usize = DEFAULT_MAX_THROTTLES>
{
    track: T,
    source: S,
    current: CurrentFilter,
    service: ServiceConfig,
    mode: Mode,
    svc: SvcContext,
    slots: [Option<Slot>; N],
    next_generation: u16,
    // roster slot to try first on the next ops tick
    next_slot: usize,
}

impl<T: TrackOutput, S: SampleSource> CommandStation<T, S> {
    /// Create a station with the default roster size.
    ///
    /// The station starts in [`Mode::Off`]; call a mode method to power the
    /// track.
    pub fn new(track: T, source: S, config: &Config) -> Self {
        Self::with_roster(track, source, config)
    }
}

impl<T: TrackOutput, S: SampleSource, const N: usize> CommandStation<T, S, N> {
    /// Create a station with a roster of `N` throttles.
    ///
    /// A board without current sensing (`adc_gpio < 0`) gets a disabled
    /// filter, so every service operation fails with [`SvcFailure::NoAck`].
    pub fn with_roster(track: T, source: S, config: &Config) -> Self {
        let current = if config.board.has_current_sense() {
            CurrentFilter::new(config.filter)
        } else {
            CurrentFilter::disabled()
        };
        Self {
            track,
            source,
            current,
            service: config.service.clamped(),
            mode: Mode::Off,
            svc: SvcContext::new(SvcOp::None),
            slots: core::array::from_fn(|_| None),
            next_generation: 0,
            next_slot: 0,
        }
    }

    // ------------------------------------------------------------------------
    // Mode transitions
    // ------------------------------------------------------------------------

    /// Switch track power off.
    pub fn mode_off(&mut self) -> Result<(), T::Error> {
        self.enter(Mode::Off, SvcOp::None);
        self.track.set_power(false)
    }

    /// Run the throttle roster.
    pub fn mode_ops(&mut self) -> Result<(), T::Error> {
        self.enter(Mode::Ops, SvcOp::None);
        self.track.set_power(true)
    }

    /// Write a whole CV on the programming track.
    ///
    /// # Panics
    ///
    /// If `cv_num` is out of range.
    pub fn mode_svc_write_cv(&mut self, cv_num: u16, cv_val: u8) -> Result<(), T::Error> {
        self.enter(Mode::SvcWriteCv, SvcOp::WriteCv { cv_num, cv_val });
        self.track.set_power(true)
    }

    /// Write one bit of a CV on the programming track.
    pub fn mode_svc_write_bit(
        &mut self,
        cv_num: u16,
        bit_num: u8,
        bit_val: bool,
    ) -> Result<(), T::Error> {
        self.enter(
            Mode::SvcWriteCv,
            SvcOp::WriteBit {
                cv_num,
                bit_num,
                bit_val,
            },
        );
        self.track.set_power(true)
    }

    /// Read a CV on the programming track.
    pub fn mode_svc_read_cv(&mut self, cv_num: u16) -> Result<(), T::Error> {
        self.enter(Mode::SvcReadCv, SvcOp::ReadCv { cv_num });
        self.track.set_power(true)
    }

    fn enter(&mut self, mode: Mode, op: SvcOp) {
        // builds the packets first so a bad CV panics before anything changes
        let svc = SvcContext::new(op);
        debug!(from = self.mode.as_str(), to = mode.as_str(), "mode change");
        if mode.is_service() && !self.current.is_enabled() {
            warn!("service mode without current sensing, no acknowledgment can be seen");
        }
        self.mode = mode;
        self.svc = svc;
        self.current.clear_peak();
    }

    /// Current mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    // ------------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------------

    /// Takes in current samples and sends the next packet, if any.
    ///
    /// `now_ms` only matters for the optional service-mode time bound.
    pub fn tick(&mut self, now_ms: u64) -> Result<(), T::Error> {
        self.current.poll(&mut self.source);

        let Some(preamble_bits) = self.mode.preamble_bits() else {
            return Ok(());
        };
        if !self.track.ready() {
            return Ok(());
        }
        let packet = match self.mode {
            Mode::Ops => self.next_ops_packet(),
            _ => self.next_svc_packet(now_ms),
        };
        self.track.send(&packet, preamble_bits)
    }

    fn next_svc_packet(&mut self, now_ms: u64) -> Packet {
        let service = self.service;
        let svc = &mut self.svc;

        if svc.status == SvcStatus::Pending && svc.phase != Phase::Done {
            let started = *svc.started_ms.get_or_insert(now_ms);
            let elapsed = now_ms.saturating_sub(started);
            if service.timeout_ms > 0 && elapsed > u64::from(service.timeout_ms) {
                svc.complete(SvcStatus::Failed(SvcFailure::TimedOut));
            } else if svc.listening() && self.current.is_enabled() {
                let peak = self.current.take_peak_short_ma();
                svc.ack_ma = svc.ack_ma.max(peak);
                if peak >= svc.baseline_ma.saturating_add(service.ack_margin_ma) {
                    svc.finish_probe(true);
                }
            }
        }

        loop {
            match svc.phase {
                Phase::Resets => {
                    svc.count += 1;
                    if svc.count >= service.reset_count {
                        svc.phase = Phase::Program;
                        svc.count = 0;
                    }
                    return Packet::reset();
                }
                Phase::Program => {
                    if svc.count == 0 {
                        // the long window now covers the resets just sent
                        svc.baseline_ma = self.current.long_ma();
                        self.current.clear_peak();
                    }
                    svc.count += 1;
                    if svc.count >= service.repeat_count {
                        svc.phase = Phase::Recovery;
                        svc.count = 0;
                    }
                    return svc.packet;
                }
                Phase::Recovery => {
                    if svc.count >= service.recovery_count {
                        svc.finish_probe(false);
                        continue;
                    }
                    svc.count += 1;
                    return Packet::reset();
                }
                Phase::Done => return Packet::reset(),
            }
        }
    }

    // ------------------------------------------------------------------------
    // Service results
    // ------------------------------------------------------------------------

    /// Progress of the current service operation.
    pub fn svc_status(&self) -> SvcStatus {
        self.svc.status
    }

    /// `None` while running, then whether the operation succeeded.
    pub fn svc_done(&self) -> Option<bool> {
        match self.svc.status {
            SvcStatus::Pending => None,
            SvcStatus::Succeeded => Some(true),
            SvcStatus::Failed(_) => Some(false),
        }
    }

    /// `None` while running, then the CV value or the failure.
    ///
    /// For a successful write the value is the byte written (or the bit
    /// value, for a bit write).
    pub fn svc_read_done(&self) -> Option<Result<u8, SvcFailure>> {
        match self.svc.status {
            SvcStatus::Pending => None,
            SvcStatus::Succeeded => Some(Ok(self.svc.cv_val)),
            SvcStatus::Failed(reason) => Some(Err(reason)),
        }
    }

    /// Peak current per probe: bits 0-7 then the byte verify for a read,
    /// slot 0 for a write.
    pub fn ack_history(&self) -> &[u16; READ_PROBES] {
        &self.svc.ack_history
    }

    /// Baseline current of the running probe.
    pub fn baseline_ma(&self) -> u16 {
        self.svc.baseline_ma
    }

    // ------------------------------------------------------------------------
    // Roster
    // ------------------------------------------------------------------------

    /// Add a locomotive to the roster.
    ///
    /// Returns `None` if the roster is full.
    pub fn create_throttle(&mut self, address: u16) -> Option<ThrottleId> {
        let slot = self.slots.iter().position(Option::is_none)?;
        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1);
        self.slots[slot] = Some(Slot {
            generation,
            throttle: Throttle::new(address),
        });
        debug!(address, slot, "throttle created");
        Some(ThrottleId {
            slot: slot as u16,
            generation,
        })
    }

    /// Remove a locomotive from the roster, returning its throttle.
    ///
    /// Returns `None` for a stale handle.
    pub fn delete_throttle(&mut self, id: ThrottleId) -> Option<Throttle> {
        let entry = self.slots.get_mut(id.slot())?;
        if entry.as_ref()?.generation != id.generation {
            return None;
        }
        let throttle = entry.take()?.throttle;
        debug!(address = throttle.address(), slot = id.slot(), "throttle deleted");
        Some(throttle)
    }

    /// Look up a throttle.
    pub fn throttle(&self, id: ThrottleId) -> Option<&Throttle> {
        self.slots
            .get(id.slot())?
            .as_ref()
            .filter(|s| s.generation == id.generation)
            .map(|s| &s.throttle)
    }

    /// Look up a throttle for changes.
    pub fn throttle_mut(&mut self, id: ThrottleId) -> Option<&mut Throttle> {
        self.slots
            .get_mut(id.slot())?
            .as_mut()
            .filter(|s| s.generation == id.generation)
            .map(|s| &mut s.throttle)
    }

    /// Number of throttles in the roster.
    pub fn throttle_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// All throttles with their handles, in slot order.
    pub fn throttles(&self) -> impl Iterator<Item = (ThrottleId, &Throttle)> + '_ {
        self.slots.iter().enumerate().filter_map(|(slot, entry)| {
            entry.as_ref().map(|s| {
                (
                    ThrottleId {
                        slot: slot as u16,
                        generation: s.generation,
                    },
                    &s.throttle,
                )
            })
        })
    }

    fn next_ops_packet(&mut self) -> Packet {
        for step in 0..N {
            let slot = (self.next_slot + step) % N;
            if let Some(entry) = self.slots[slot].as_mut() {
                self.next_slot = (slot + 1) % N;
                return entry.throttle.next_packet();
            }
        }
        Packet::idle()
    }

    // ------------------------------------------------------------------------
    // Access
    // ------------------------------------------------------------------------

    /// The track output.
    pub fn track(&self) -> &T {
        &self.track
    }

    /// The track output, mutably.
    pub fn track_mut(&mut self) -> &mut T {
        &mut self.track
    }

    /// The sample source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// The sample source, mutably.
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// The current filter.
    pub fn current(&self) -> &CurrentFilter {
        &self.current
    }

    /// Get the current state for UI/API
    pub fn state(&self) -> StationState {
        StationState {
            mode: self.mode,
            svc_status: self.svc.status,
            throttles: self.throttle_count(),
            short_ma: self.current.short_ma(),
            long_ma: self.current.long_ma(),
            adc_errors: self.current.error_count(),
        }
    }

    /// Multi-line description of mode, service progress, and roster.
    pub fn show(&self) -> StationShow<'_, T, S, N> {
        StationShow(self)
    }
}

/// [`Display`](fmt::Display) adapter returned by [`CommandStation::show`].
pub struct StationShow<'a, T: TrackOutput, S: SampleSource, const N: usize>(
    &'a CommandStation<T, S, N>,
);

impl<T: TrackOutput, S: SampleSource, const N: usize> fmt::Display for StationShow<'_, T, S, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let station = self.0;
        let svc = &station.svc;
        writeln!(f, "{}", station.state())?;
        if station.mode.is_service() {
            writeln!(
                f,
                "svc: {} probe={} phase={:?} baseline={} mA peak={} mA",
                svc.packet.show(),
                svc.probe,
                svc.phase,
                svc.baseline_ma,
                svc.ack_ma
            )?;
            f.write_str("ack:")?;
            for ma in svc.ack_history {
                write!(f, " {ma}")?;
            }
            writeln!(f)?;
        }
        for (id, throttle) in station.throttles() {
            writeln!(f, "[{}] {throttle}", id.slot())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterConfig;
    use crate::hal::{MockAdc, MockTrack};
    use crate::packet::Command;

    type Station = CommandStation<MockTrack, MockAdc, 4>;

    fn unity_config() -> Config {
        Config::default().with_filter(
            FilterConfig::default()
                .with_reference(4096, 4096)
                .with_sense_scale(1, 1),
        )
    }

    fn station() -> Station {
        CommandStation::with_roster(MockTrack::new(), MockAdc::new(), &unity_config())
    }

    // =========================================================================
    // Modes
    // =========================================================================

    #[test]
    fn starts_off_and_sends_nothing() {
        let mut st = station();
        assert_eq!(st.mode(), Mode::Off);
        st.tick(0).unwrap();
        assert!(st.track().sent.is_empty());
        assert!(!st.track().powered);
    }

    #[test]
    fn mode_transitions_switch_power() {
        let mut st = station();
        st.mode_ops().unwrap();
        assert!(st.track().powered);
        st.mode_svc_read_cv(1).unwrap();
        assert!(st.track().powered);
        assert_eq!(st.mode(), Mode::SvcReadCv);
        st.mode_off().unwrap();
        assert!(!st.track().powered);
    }

    #[test]
    fn transition_error_propagates() {
        let mut st = station();
        st.track_mut().fail = true;
        assert_eq!(st.mode_ops(), Err(()));
        assert_eq!(st.tick(0), Err(()));
    }

    #[test]
    fn preamble_per_mode() {
        assert_eq!(Mode::Off.preamble_bits(), None);
        assert_eq!(Mode::Ops.preamble_bits(), Some(14));
        assert_eq!(Mode::SvcWriteCv.preamble_bits(), Some(20));
        assert_eq!(Mode::SvcReadCv.preamble_bits(), Some(20));
    }

    #[test]
    fn not_ready_only_samples() {
        let mut st = station();
        st.mode_ops().unwrap();
        st.track_mut().ready = false;
        st.source_mut().push_n(100, 20);
        st.tick(0).unwrap();
        assert!(st.track().sent.is_empty());
        assert_eq!(st.current().sample_count(), 20);
    }

    #[test]
    fn mode_change_clears_service_result() {
        let mut st = station();
        st.mode_svc_write_cv(1, 3).unwrap();
        for t in 0..40 {
            st.tick(t).unwrap();
        }
        assert_eq!(st.svc_done(), Some(false));
        st.mode_svc_write_cv(1, 3).unwrap();
        assert_eq!(st.svc_done(), None);
        st.mode_ops().unwrap();
        assert_eq!(st.svc_status(), SvcStatus::Pending);
    }

    // =========================================================================
    // Service write sequencing
    // =========================================================================

    #[test]
    fn write_probe_packet_order() {
        let mut st = station();
        st.mode_svc_write_cv(8, 8).unwrap();
        for t in 0..16 {
            st.tick(t).unwrap();
        }
        let write = Packet::svc_write_cv(8, 8);
        let sent: alloc::vec::Vec<Packet> = st.track().packets().copied().collect();
        // 3 resets, 5 writes, 6 recovery resets, then resets after failing
        assert!(sent[..3].iter().all(|p| *p == Packet::reset()));
        assert!(sent[3..8].iter().all(|p| *p == write));
        assert!(sent[8..].iter().all(|p| *p == Packet::reset()));
        assert!(st.track().sent.iter().all(|s| s.preamble_bits == 20));
        assert_eq!(st.svc_done(), Some(false));
    }

    #[test]
    fn write_fails_exactly_after_recovery() {
        let mut st = station();
        st.mode_svc_write_cv(1, 1).unwrap();
        // 3 + 5 + 6 packets, then the next tick gives up
        for t in 0..14 {
            st.tick(t).unwrap();
            assert_eq!(st.svc_done(), None, "tick {t}");
        }
        st.tick(14).unwrap();
        assert_eq!(st.svc_read_done(), Some(Err(SvcFailure::NoAck)));
    }

    #[test]
    fn late_ack_during_recovery_counts() {
        let mut st = station();
        st.source_mut().push_n(30, 200);
        st.tick(0).unwrap();
        st.mode_svc_write_cv(1, 1).unwrap();
        for t in 0..10 {
            st.source_mut().push_n(30, 50);
            st.tick(t).unwrap();
        }
        assert_eq!(st.svc_done(), None);
        st.source_mut().push_n(95, 30);
        st.tick(10).unwrap();
        assert_eq!(st.svc_done(), Some(true));
        assert_eq!(st.ack_history()[0], 95);
    }

    #[test]
    fn timeout_bounds_service_operation() {
        let config = unity_config().with_service(ServiceConfig::default().with_timeout_ms(50));
        let mut st: Station = CommandStation::with_roster(MockTrack::new(), MockAdc::new(), &config);
        st.mode_svc_write_cv(1, 1).unwrap();
        st.tick(1000).unwrap();
        st.tick(1040).unwrap();
        assert_eq!(st.svc_done(), None);
        st.tick(1051).unwrap();
        assert_eq!(st.svc_read_done(), Some(Err(SvcFailure::TimedOut)));
        assert_eq!(st.track().last().unwrap().packet, Packet::reset());
    }

    #[test]
    fn disabled_sensing_fails_service() {
        let config = unity_config().with_board(crate::config::BoardConfig::default().with_adc_gpio(-1));
        let mut st: Station = CommandStation::with_roster(MockTrack::new(), MockAdc::new(), &config);
        st.mode_svc_write_cv(1, 1).unwrap();
        for t in 0..40 {
            st.source_mut().push_n(4000, 50);
            st.tick(t).unwrap();
        }
        assert_eq!(st.svc_done(), Some(false));
        assert_eq!(st.source().pending(), 40 * 50);
    }

    // =========================================================================
    // Roster
    // =========================================================================

    #[test]
    fn empty_roster_sends_idle() {
        let mut st = station();
        st.mode_ops().unwrap();
        st.tick(0).unwrap();
        let sent = st.track().last().unwrap();
        assert_eq!(sent.packet, Packet::idle());
        assert_eq!(sent.preamble_bits, 14);
    }

    #[test]
    fn roster_fills_and_rejects() {
        let mut st = station();
        for adrs in 1..=4 {
            assert!(st.create_throttle(adrs).is_some());
        }
        assert_eq!(st.create_throttle(5), None);
        assert_eq!(st.throttle_count(), 4);
    }

    #[test]
    fn stale_id_rejected_after_slot_reuse() {
        let mut st = station();
        let first = st.create_throttle(3).unwrap();
        assert_eq!(st.delete_throttle(first).map(|t| t.address()), Some(3));
        let second = st.create_throttle(4).unwrap();
        assert_eq!(first.slot(), second.slot());
        assert!(st.throttle(first).is_none());
        assert!(st.throttle_mut(first).is_none());
        assert!(st.delete_throttle(first).is_none());
        assert_eq!(st.throttle(second).map(|t| t.address()), Some(4));
    }

    #[test]
    fn round_robin_over_occupied_slots() {
        let mut st = station();
        let a = st.create_throttle(10).unwrap();
        let b = st.create_throttle(20).unwrap();
        let c = st.create_throttle(30).unwrap();
        st.delete_throttle(b);
        st.throttle_mut(a).unwrap().set_speed(1);
        st.throttle_mut(c).unwrap().set_speed(2);
        st.mode_ops().unwrap();
        for t in 0..4 {
            st.tick(t).unwrap();
        }
        let addrs: alloc::vec::Vec<_> = st.track().packets().map(|p| p.address()).collect();
        assert_eq!(addrs, [Some(10), Some(30), Some(10), Some(30)]);
        let cmds: alloc::vec::Vec<_> = st.track().packets().map(|p| p.command()).collect();
        assert_eq!(
            cmds,
            [
                Command::Speed128,
                Command::Speed128,
                Command::Func0to4,
                Command::Func0to4
            ]
        );
    }

    #[test]
    fn show_lists_roster() {
        let mut st = station();
        let id = st.create_throttle(3).unwrap();
        st.throttle_mut(id).unwrap().set_speed(5);
        let s: heapless::String<256> = crate::text::bounded_string(format_args!("{}", st.show()));
        assert!(s.starts_with("mode=off"));
        assert!(s.contains("[0]    3: fwd 5/128"));
    }
}
