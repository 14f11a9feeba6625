//! Track current sense via the ESP32 oneshot ADC.
//!
//! The bridge's current-sense output (DRV8874 IPROPI through its resistor)
//! goes to GPIO4 on ADC1. GPIO5 is on ADC2, which the radio can block.
//!
//! # Sampling
//!
//! The filter wants a steady stream at `sample_rate_hz`. The oneshot driver
//! has no free-running mode, so this source keeps a sample clock off the
//! ESP-IDF timer and, when polled, converts once for every period that has
//! elapsed since the last poll. The backlog is capped at one full buffer;
//! a long stall (a blocking packet send) drops the oldest periods rather
//! than stalling the loop with a burst of conversions.
//!
//! Samples taken this way are bunched at poll time instead of evenly
//! spaced. The averages still work because the ack pulse lasts several
//! milliseconds.

use esp_idf_hal::adc::attenuation::DB_11;
use esp_idf_hal::adc::oneshot::config::AdcChannelConfig;
use esp_idf_hal::adc::oneshot::{AdcChannelDriver, AdcDriver};
use esp_idf_hal::adc::ADC1;
use esp_idf_hal::gpio::Gpio4;
use esp_idf_hal::peripheral::Peripheral;
use esp_idf_hal::sys::EspError;

use super::clock::now_us;
use crate::current::{SAMPLE_ERROR_FLAG, SAMPLE_MASK, WINDOW_MAX};
use crate::traits::SampleSource;

/// The one pin this source can sample.
pub const SENSE_GPIO: i32 = 4;

/// Current-sense sample source on GPIO4.
///
/// # Example
///
/// ```ignore
/// use esp_idf_hal::adc::oneshot::AdcDriver;
/// use rs_dcc::hal::esp32::Esp32CurrentSense;
///
/// let peripherals = Peripherals::take()?;
/// let adc = AdcDriver::new(peripherals.adc1)?;
/// let sense = Esp32CurrentSense::new(&adc, peripherals.pins.gpio4, 10_000)?;
/// ```
pub struct Esp32CurrentSense<'d> {
    channel: AdcChannelDriver<'d, Gpio4, &'d AdcDriver<'d, ADC1>>,
    period_us: i64,
    /// Timer value of the next sample due
    next_us: i64,
    /// Samples owed to the filter
    owed: usize,
}

impl<'d> Esp32CurrentSense<'d> {
    /// Claims the channel at 11 dB attenuation (full 0-3.3 V range).
    ///
    /// # Errors
    ///
    /// Returns an error if ADC channel initialization fails.
    pub fn new(
        adc: &'d AdcDriver<'d, ADC1>,
        sense_pin: impl Peripheral<P = Gpio4> + 'd,
        sample_rate_hz: u32,
    ) -> Result<Self, EspError> {
        let config = AdcChannelConfig {
            attenuation: DB_11,
            ..Default::default()
        };
        let channel = AdcChannelDriver::new(adc, sense_pin, &config)?;
        let period_us = 1_000_000 / i64::from(sample_rate_hz.max(1));

        Ok(Self {
            channel,
            period_us: period_us.max(1),
            next_us: now_us(),
            owed: 0,
        })
    }

    fn catch_up(&mut self) {
        let now = now_us();
        if now < self.next_us {
            return;
        }
        let due = ((now - self.next_us) / self.period_us + 1) as usize;
        self.next_us += due as i64 * self.period_us;
        self.owed = (self.owed + due).min(WINDOW_MAX);
    }
}

impl SampleSource for Esp32CurrentSense<'_> {
    fn read_sample(&mut self) -> Option<u16> {
        if self.owed == 0 {
            self.catch_up();
            if self.owed == 0 {
                return None;
            }
        }
        self.owed -= 1;

        Some(match self.channel.read() {
            Ok(raw) => raw & SAMPLE_MASK,
            Err(_) => SAMPLE_ERROR_FLAG,
        })
    }
}
