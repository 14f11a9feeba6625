//! Track current filter.
//!
//! Raw ADC words from the current-sense amplifier go into one circular
//! buffer. Two moving averages are read backward from the write cursor:
//!
//! - the **long window** spans one mains cycle (166 samples at 10 kHz and
//!   60 Hz) and cancels hum; it is the baseline draw of whatever is on the
//!   track
//! - the **short window** (16 samples, 1.6 ms) follows fast changes such as
//!   a decoder's acknowledgment pulse
//!
//! The filter also holds the highest short-window average seen since it was
//! last cleared, so a pulse that starts and ends between two ticks of the
//! command station is not missed.
//!
//! Averages are converted raw counts → mV → mA with integer arithmetic,
//! rounding half up at each step.
//!
//! # Example
//!
//! ```rust
//! use rs_dcc::config::FilterConfig;
//! use rs_dcc::current::CurrentFilter;
//!
//! let mut filter = CurrentFilter::new(FilterConfig::default());
//! for _ in 0..166 {
//!     filter.push_sample(2048);
//! }
//! assert_eq!(filter.long_raw(), 2048);
//! assert_eq!(filter.long_ma(), 1500);
//! ```

use alloc::vec::Vec;

use crate::config::FilterConfig;
use crate::traits::SampleSource;

/// Set in a sample word when the conversion failed.
pub const SAMPLE_ERROR_FLAG: u16 = 0x8000;

/// Conversion bits of a sample word.
pub const SAMPLE_MASK: u16 = 0x0fff;

/// Largest supported long window.
pub const WINDOW_MAX: usize = 256;

const fn round_div(num: u32, den: u32) -> u32 {
    (num + den / 2) / den
}

fn saturate(value: u32) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}

/// Moving-average filter over raw current-sense samples.
#[derive(Debug)]
pub struct CurrentFilter {
    config: FilterConfig,
    enabled: bool,
    long_window: usize,
    samples: [u16; WINDOW_MAX],
    // next slot to write
    idx: usize,
    err_cnt: u32,
    sample_cnt: u32,
    peak_short_raw: u16,
    trace: Vec<u16>,
}

impl CurrentFilter {
    /// Creates a filter for the given sampling and calibration.
    ///
    /// # Panics
    ///
    /// If the long window is empty or exceeds [`WINDOW_MAX`], if the short
    /// window is empty or longer than the long window, or if a calibration
    /// divisor is zero.
    pub fn new(config: FilterConfig) -> Self {
        let long_window = config.long_window();
        assert!(
            (1..=WINDOW_MAX).contains(&long_window),
            "long window of {long_window} samples out of range"
        );
        assert!(
            (1..=long_window).contains(&config.short_window),
            "short window of {} samples out of range",
            config.short_window
        );
        assert!(
            config.full_scale > 0 && config.ma_div > 0,
            "current calibration divisor is zero"
        );
        Self {
            config,
            enabled: true,
            long_window,
            samples: [0; WINDOW_MAX],
            idx: 0,
            err_cnt: 0,
            sample_cnt: 0,
            peak_short_raw: 0,
            trace: Vec::with_capacity(config.trace_capacity),
        }
    }

    /// A filter for boards without current sensing.
    ///
    /// It ignores every sample and reads zero current forever.
    pub fn disabled() -> Self {
        let mut filter = Self::new(FilterConfig::default().with_trace_capacity(0));
        filter.enabled = false;
        filter
    }

    /// Whether samples are being taken in.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Sampling and calibration in use.
    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Samples in the long window.
    pub fn long_window(&self) -> usize {
        self.long_window
    }

    /// Takes in one raw sample word.
    ///
    /// Error-flagged words only bump [`error_count`](Self::error_count).
    pub fn push_sample(&mut self, word: u16) {
        if !self.enabled {
            return;
        }
        if word & SAMPLE_ERROR_FLAG != 0 {
            self.err_cnt = self.err_cnt.wrapping_add(1);
            tracing::trace!(errors = self.err_cnt, "current sense conversion error");
            return;
        }
        let raw = word & SAMPLE_MASK;
        if self.trace.len() < self.config.trace_capacity {
            self.trace.push(raw);
        }
        self.samples[self.idx] = raw;
        self.idx += 1;
        if self.idx >= self.long_window {
            self.idx = 0;
        }
        self.sample_cnt = self.sample_cnt.wrapping_add(1);

        let short = self.short_raw();
        if short > self.peak_short_raw {
            self.peak_short_raw = short;
        }
    }

    /// Drains pending samples from `source` without blocking.
    ///
    /// At most one long window is taken per call so a flooded queue cannot
    /// stall the caller. Returns the number of words read.
    pub fn poll<S: SampleSource + ?Sized>(&mut self, source: &mut S) -> usize {
        if !self.enabled {
            return 0;
        }
        let mut n = 0;
        while n < self.long_window {
            match source.read_sample() {
                Some(word) => {
                    self.push_sample(word);
                    n += 1;
                }
                None => break,
            }
        }
        n
    }

    /// Rounded average of the newest `cnt` samples, in raw counts.
    ///
    /// # Panics
    ///
    /// If `cnt` is zero or longer than the long window.
    pub fn avg_raw(&self, cnt: usize) -> u16 {
        assert!(
            (1..=self.long_window).contains(&cnt),
            "average over {cnt} samples out of range"
        );
        let mut sum: u32 = 0;
        let mut i = self.idx;
        for _ in 0..cnt {
            i = if i == 0 { self.long_window - 1 } else { i - 1 };
            sum += u32::from(self.samples[i]);
        }
        saturate(round_div(sum, cnt as u32))
    }

    /// Short-window average in raw counts.
    pub fn short_raw(&self) -> u16 {
        self.avg_raw(self.config.short_window)
    }

    /// Long-window average in raw counts.
    pub fn long_raw(&self) -> u16 {
        self.avg_raw(self.long_window)
    }

    /// Converts raw counts to millivolts at the ADC pin.
    pub fn raw_to_mv(&self, raw: u16) -> u16 {
        saturate(round_div(
            u32::from(raw) * self.config.ref_mv,
            self.config.full_scale,
        ))
    }

    /// Converts sense voltage to track current.
    pub fn mv_to_ma(&self, mv: u16) -> u16 {
        saturate(round_div(
            u32::from(mv) * self.config.ma_mul,
            self.config.ma_div,
        ))
    }

    fn raw_to_ma(&self, raw: u16) -> u16 {
        self.mv_to_ma(self.raw_to_mv(raw))
    }

    /// Short-window average in mA.
    pub fn short_ma(&self) -> u16 {
        self.raw_to_ma(self.short_raw())
    }

    /// Long-window average in mA.
    pub fn long_ma(&self) -> u16 {
        self.raw_to_ma(self.long_raw())
    }

    /// Highest short-window average since the last clear, in mA.
    pub fn peak_short_ma(&self) -> u16 {
        self.raw_to_ma(self.peak_short_raw)
    }

    /// Returns the peak and starts a new peak interval.
    pub fn take_peak_short_ma(&mut self) -> u16 {
        let peak = self.peak_short_ma();
        self.peak_short_raw = 0;
        peak
    }

    /// Starts a new peak interval.
    pub fn clear_peak(&mut self) {
        self.peak_short_raw = 0;
    }

    /// Error-flagged samples seen so far.
    pub fn error_count(&self) -> u32 {
        self.err_cnt
    }

    /// Valid samples taken in so far.
    pub fn sample_count(&self) -> u32 {
        self.sample_cnt
    }

    /// Raw samples recorded since the last [`trace_reset`](Self::trace_reset).
    pub fn trace(&self) -> &[u16] {
        &self.trace
    }

    /// Starts recording again from an empty trace.
    pub fn trace_reset(&mut self) {
        self.trace.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::MockAdc;

    fn unity() -> FilterConfig {
        FilterConfig::default()
            .with_reference(4096, 4096)
            .with_sense_scale(1, 1)
    }

    fn fill(filter: &mut CurrentFilter, raw: u16, n: usize) {
        for _ in 0..n {
            filter.push_sample(raw);
        }
    }

    // =========================================================================
    // Averaging
    // =========================================================================

    #[test]
    fn constant_input_gives_equal_averages() {
        let mut filter = CurrentFilter::new(unity());
        fill(&mut filter, 321, 166);
        assert_eq!(filter.short_raw(), 321);
        assert_eq!(filter.long_raw(), 321);
    }

    #[test]
    fn step_shows_in_short_window_first() {
        let mut filter = CurrentFilter::new(unity());
        fill(&mut filter, 100, 166);
        fill(&mut filter, 300, 16);
        assert_eq!(filter.short_raw(), 300);
        // (150 * 100 + 16 * 300) / 166 rounded
        assert_eq!(filter.long_raw(), 119);
    }

    #[test]
    fn average_rounds_half_up() {
        let mut filter = CurrentFilter::new(unity());
        filter.push_sample(1);
        filter.push_sample(2);
        assert_eq!(filter.avg_raw(2), 2);
        filter.push_sample(2);
        filter.push_sample(2);
        // 1+2+2+2 = 7 / 4 = 1.75
        assert_eq!(filter.avg_raw(4), 2);
    }

    #[test]
    fn window_wraps_around() {
        let mut filter = CurrentFilter::new(unity());
        fill(&mut filter, 50, 166 * 3 + 7);
        assert_eq!(filter.long_raw(), 50);
        assert_eq!(filter.sample_count(), 166 * 3 + 7);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn average_over_zero_samples_panics() {
        let filter = CurrentFilter::new(unity());
        let _ = filter.avg_raw(0);
    }

    // =========================================================================
    // Calibration
    // =========================================================================

    #[test]
    fn default_calibration() {
        let filter = CurrentFilter::new(FilterConfig::default());
        assert_eq!(filter.raw_to_mv(4095), 3299);
        assert_eq!(filter.raw_to_mv(2048), 1650);
        assert_eq!(filter.mv_to_ma(1650), 1500);
        assert_eq!(filter.mv_to_ma(66), 60);
    }

    #[test]
    fn unity_calibration_is_identity() {
        let filter = CurrentFilter::new(unity());
        assert_eq!(filter.raw_to_mv(1234), 1234);
        assert_eq!(filter.mv_to_ma(1234), 1234);
    }

    // =========================================================================
    // Errors
    // =========================================================================

    #[test]
    fn error_samples_counted_and_excluded() {
        let mut filter = CurrentFilter::new(unity());
        fill(&mut filter, 200, 166);
        filter.push_sample(SAMPLE_ERROR_FLAG | 0x0fff);
        filter.push_sample(SAMPLE_ERROR_FLAG);
        assert_eq!(filter.error_count(), 2);
        assert_eq!(filter.sample_count(), 166);
        assert_eq!(filter.short_raw(), 200);
        assert_eq!(filter.long_raw(), 200);
    }

    #[test]
    fn upper_bits_masked() {
        let mut filter = CurrentFilter::new(unity());
        fill(&mut filter, 0x7123, 16);
        assert_eq!(filter.short_raw(), 0x0123);
    }

    // =========================================================================
    // Peak hold
    // =========================================================================

    #[test]
    fn peak_survives_pulse_end() {
        let mut filter = CurrentFilter::new(unity());
        fill(&mut filter, 40, 166);
        filter.clear_peak();
        fill(&mut filter, 140, 60);
        fill(&mut filter, 40, 60);
        assert_eq!(filter.short_ma(), 40);
        assert_eq!(filter.take_peak_short_ma(), 140);
        assert_eq!(filter.peak_short_ma(), 0);
    }

    // =========================================================================
    // Polling
    // =========================================================================

    #[test]
    fn poll_drains_at_most_one_long_window() {
        let mut filter = CurrentFilter::new(unity());
        let mut adc = MockAdc::new();
        adc.push_n(10, 400);
        assert_eq!(filter.poll(&mut adc), 166);
        assert_eq!(filter.poll(&mut adc), 166);
        assert_eq!(filter.poll(&mut adc), 68);
        assert_eq!(filter.poll(&mut adc), 0);
    }

    #[test]
    fn disabled_filter_reads_nothing() {
        let mut filter = CurrentFilter::disabled();
        let mut adc = MockAdc::new();
        adc.push_n(1000, 20);
        assert_eq!(filter.poll(&mut adc), 0);
        assert_eq!(adc.pending(), 20);
        filter.push_sample(1000);
        assert_eq!(filter.short_ma(), 0);
        assert_eq!(filter.long_ma(), 0);
        assert!(!filter.is_enabled());
    }

    // =========================================================================
    // Trace
    // =========================================================================

    #[test]
    fn trace_records_until_full() {
        let mut filter = CurrentFilter::new(unity().with_trace_capacity(4));
        for raw in 1..=6 {
            filter.push_sample(raw);
        }
        assert_eq!(filter.trace(), &[1, 2, 3, 4]);
        filter.trace_reset();
        filter.push_sample(9);
        assert_eq!(filter.trace(), &[9]);
    }

    #[test]
    fn no_trace_by_default() {
        let mut filter = CurrentFilter::new(FilterConfig::default());
        filter.push_sample(1);
        assert!(filter.trace().is_empty());
    }
}
