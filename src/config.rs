//! Command station configuration.
//!
//! Board wiring, current-sense calibration, and service-mode timing.
//! Everything has a working default for an ESP32-C3 board with a DRV8874
//! H-bridge; the presets and `with_*` builders cover other wiring.
//!
//! # Example
//!
//! ```rust
//! use rs_dcc::config::{BoardConfig, Config, ServiceConfig};
//!
//! let config = Config::default()
//!     .with_board(BoardConfig::pico_breadboard())
//!     .with_service(ServiceConfig::default().with_ack_margin_ma(50));
//!
//! assert!(config.board.has_current_sense());
//! assert_eq!(config.board.sleep_gpio(), None);
//! assert_eq!(config.filter.long_window(), 166);
//! ```

use heapless::String as HString;

/// Maximum length for board names.
pub const MAX_NAME: usize = 32;

/// Fixed-capacity string for names.
pub type NameString = HString<MAX_NAME>;

/// Create a NameString from a &str, truncating if too long
pub fn name_string(s: &str) -> NameString {
    crate::text::bounded_string(format_args!("{s}"))
}

// ============================================================================
// Main Config
// ============================================================================

/// Complete command station configuration
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    /// GPIO assignment
    pub board: BoardConfig,
    /// Current-sense sampling and calibration
    pub filter: FilterConfig,
    /// Service-mode handshake timing
    pub service: ServiceConfig,
}

impl Config {
    /// Set board configuration
    pub fn with_board(mut self, board: BoardConfig) -> Self {
        self.board = board;
        self
    }

    /// Set current filter configuration
    pub fn with_filter(mut self, filter: FilterConfig) -> Self {
        self.filter = filter;
        self
    }

    /// Set service-mode configuration
    pub fn with_service(mut self, service: ServiceConfig) -> Self {
        self.service = service;
        self
    }
}

// ============================================================================
// Board Config
// ============================================================================

/// GPIO assignment. A negative pin number means the line is not wired.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BoardConfig {
    /// Board name for diagnostics
    pub name: NameString,
    /// DCC signal output (H-bridge phase)
    pub sig_gpio: i32,
    /// Track power enable
    pub pwr_gpio: i32,
    /// H-bridge sleep control
    pub slp_gpio: i32,
    /// Current-sense ADC input
    pub adc_gpio: i32,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            name: name_string("esp32-c3"),
            sig_gpio: 2,
            pwr_gpio: 3,
            slp_gpio: -1,
            adc_gpio: 4,
        }
    }
}

impl BoardConfig {
    /// Pico-based engine house board
    pub fn pico_engine_house() -> Self {
        Self {
            name: name_string("engine-house"),
            sig_gpio: 27,
            pwr_gpio: 28,
            slp_gpio: 22,
            adc_gpio: 26,
        }
    }

    /// Pico on a breadboard, no sleep line
    pub fn pico_breadboard() -> Self {
        Self {
            name: name_string("breadboard"),
            sig_gpio: 17,
            pwr_gpio: 16,
            slp_gpio: -1,
            adc_gpio: 26,
        }
    }

    /// Set the board name
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name_string(name);
        self
    }

    /// Set the signal and power pins
    pub fn with_track_pins(mut self, sig_gpio: i32, pwr_gpio: i32) -> Self {
        self.sig_gpio = sig_gpio;
        self.pwr_gpio = pwr_gpio;
        self
    }

    /// Set the sleep pin (negative to disable)
    pub fn with_slp_gpio(mut self, gpio: i32) -> Self {
        self.slp_gpio = gpio;
        self
    }

    /// Set the current-sense pin (negative to disable)
    pub fn with_adc_gpio(mut self, gpio: i32) -> Self {
        self.adc_gpio = gpio;
        self
    }

    /// Whether current sensing is wired
    pub fn has_current_sense(&self) -> bool {
        self.adc_gpio >= 0
    }

    /// H-bridge sleep pin, if wired
    pub fn sleep_gpio(&self) -> Option<i32> {
        (self.slp_gpio >= 0).then_some(self.slp_gpio)
    }

    /// Whether signal and power are two distinct wired pins
    pub fn has_track(&self) -> bool {
        self.sig_gpio >= 0 && self.pwr_gpio >= 0 && self.sig_gpio != self.pwr_gpio
    }
}

// ============================================================================
// Filter Config
// ============================================================================

/// Current-sense sampling and calibration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FilterConfig {
    /// ADC sample rate
    pub sample_rate_hz: u32,
    /// Mains frequency; the long window spans one cycle
    pub line_frequency_hz: u32,
    /// Samples in the short window
    pub short_window: usize,
    /// ADC reference voltage in millivolts
    pub ref_mv: u32,
    /// ADC counts at the reference voltage
    pub full_scale: u32,
    /// Sense scale numerator: `ma = mv * ma_mul / ma_div`
    pub ma_mul: u32,
    /// Sense scale denominator
    pub ma_div: u32,
    /// Raw samples to keep for diagnostics (0 = none)
    pub trace_capacity: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 10_000,
            line_frequency_hz: 60,
            short_window: 16,
            ref_mv: 3300,
            full_scale: 4096,
            // DRV8874: 1.1 mV per mA
            ma_mul: 7447,
            ma_div: 8192,
            trace_capacity: 0,
        }
    }
}

impl FilterConfig {
    /// Samples in the long window: one mains cycle.
    pub fn long_window(&self) -> usize {
        (self.sample_rate_hz / self.line_frequency_hz.max(1)) as usize
    }

    /// Set the sample rate
    pub fn with_sample_rate_hz(mut self, hz: u32) -> Self {
        self.sample_rate_hz = hz;
        self
    }

    /// Set the mains frequency
    pub fn with_line_frequency_hz(mut self, hz: u32) -> Self {
        self.line_frequency_hz = hz;
        self
    }

    /// Set the short window length
    pub fn with_short_window(mut self, samples: usize) -> Self {
        self.short_window = samples;
        self
    }

    /// Set the ADC reference
    pub fn with_reference(mut self, ref_mv: u32, full_scale: u32) -> Self {
        self.ref_mv = ref_mv;
        self.full_scale = full_scale;
        self
    }

    /// Set the sense resistor scale
    pub fn with_sense_scale(mut self, ma_mul: u32, ma_div: u32) -> Self {
        self.ma_mul = ma_mul;
        self.ma_div = ma_div;
        self
    }

    /// Keep the first `samples` raw samples for diagnostics
    pub fn with_trace_capacity(mut self, samples: usize) -> Self {
        self.trace_capacity = samples;
        self
    }
}

// ============================================================================
// Service Config
// ============================================================================

/// Fewest reset packets a decoder needs before it listens in service mode.
pub const MIN_RESET_COUNT: u8 = 3;

/// Fewest sends of a programming packet.
pub const MIN_REPEAT_COUNT: u8 = 1;

/// Service-mode handshake timing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServiceConfig {
    /// Reset packets before each programming packet run
    pub reset_count: u8,
    /// Repetitions of the programming packet
    pub repeat_count: u8,
    /// Reset packets after the run during which an ACK still counts
    pub recovery_count: u8,
    /// Rise over baseline that counts as an ACK
    pub ack_margin_ma: u16,
    /// Wall-clock bound on one service operation (0 = none)
    pub timeout_ms: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            reset_count: 3,
            repeat_count: 5,
            recovery_count: 6,
            ack_margin_ma: 60,
            timeout_ms: 0,
        }
    }
}

impl ServiceConfig {
    /// Set the reset count (at least [`MIN_RESET_COUNT`])
    pub fn with_reset_count(mut self, count: u8) -> Self {
        self.reset_count = count.max(MIN_RESET_COUNT);
        self
    }

    /// Set the repetition count (at least [`MIN_REPEAT_COUNT`])
    pub fn with_repeat_count(mut self, count: u8) -> Self {
        self.repeat_count = count.max(MIN_REPEAT_COUNT);
        self
    }

    /// Raises counts set directly on the fields to their minimums.
    pub fn clamped(self) -> Self {
        Self {
            reset_count: self.reset_count.max(MIN_RESET_COUNT),
            repeat_count: self.repeat_count.max(MIN_REPEAT_COUNT),
            ..self
        }
    }

    /// Set the recovery count
    pub fn with_recovery_count(mut self, count: u8) -> Self {
        self.recovery_count = count;
        self
    }

    /// Set the ACK margin
    pub fn with_ack_margin_ma(mut self, ma: u16) -> Self {
        self.ack_margin_ma = ma;
        self
    }

    /// Set the wall-clock bound
    pub fn with_timeout_ms(mut self, ms: u32) -> Self {
        self.timeout_ms = ms;
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
