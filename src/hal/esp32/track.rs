//! Bit-banged DCC track output via two GPIOs.
//!
//! The signal pin drives the H-bridge input that sets rail polarity, the
//! power pin enables the bridge. Boards that wire the bridge's active-low
//! sleep line get it raised with power and dropped without it. Each DCC bit
//! is one full period of the signal: high for half, low for half.
//!
//! | Bit | Half period |
//! |-----|-------------|
//! | 1   | 58 µs |
//! | 0   | 100 µs |
//!
//! `send` blocks for the whole packet, so [`TrackOutput::ready`] keeps its
//! always-ready default.

use embedded_hal::delay::DelayNs;
use esp_idf_hal::gpio::{AnyOutputPin, Output, OutputPin, PinDriver};
use esp_idf_hal::peripheral::Peripheral;
use esp_idf_hal::sys::EspError;

use crate::packet::Packet;
use crate::traits::TrackOutput;

/// Half period of a one bit, in microseconds.
pub const ONE_HALF_US: u32 = 58;

/// Half period of a zero bit, in microseconds.
pub const ZERO_HALF_US: u32 = 100;

/// Track output driving a DRV8874-style bridge from two GPIOs.
///
/// # Example
///
/// ```ignore
/// use esp_idf_hal::delay::Ets;
/// use rs_dcc::hal::esp32::Esp32Track;
///
/// let peripherals = Peripherals::take()?;
/// let track = Esp32Track::new(peripherals.pins.gpio2, peripherals.pins.gpio3, Ets)?;
/// ```
pub struct Esp32Track<'d, SIG, PWR, D>
where
    SIG: OutputPin,
    PWR: OutputPin,
    D: DelayNs,
{
    /// Bridge phase input
    sig: PinDriver<'d, SIG, Output>,
    /// Bridge enable
    pwr: PinDriver<'d, PWR, Output>,
    /// Bridge nSLEEP, if wired
    slp: Option<PinDriver<'d, AnyOutputPin, Output>>,
    delay: D,
    powered: bool,
}

impl<'d, SIG, PWR, D> Esp32Track<'d, SIG, PWR, D>
where
    SIG: OutputPin,
    PWR: OutputPin,
    D: DelayNs,
{
    /// Claims both pins as outputs with track power off.
    ///
    /// # Errors
    ///
    /// Returns an error if either pin cannot be configured.
    pub fn new(
        sig_pin: impl Peripheral<P = SIG> + 'd,
        pwr_pin: impl Peripheral<P = PWR> + 'd,
        delay: D,
    ) -> Result<Self, EspError> {
        let mut sig = PinDriver::output(sig_pin)?;
        let mut pwr = PinDriver::output(pwr_pin)?;
        pwr.set_low()?;
        sig.set_low()?;

        Ok(Self {
            sig,
            pwr,
            slp: None,
            delay,
            powered: false,
        })
    }

    /// Adds the bridge sleep line, held low (asleep) until power comes on.
    ///
    /// # Errors
    ///
    /// Returns an error if the pin cannot be configured.
    pub fn with_sleep(
        mut self,
        slp_pin: impl Peripheral<P = AnyOutputPin> + 'd,
    ) -> Result<Self, EspError> {
        let mut slp = PinDriver::output(slp_pin)?;
        if self.powered {
            slp.set_high()?;
        } else {
            slp.set_low()?;
        }
        self.slp = Some(slp);
        Ok(self)
    }

    /// Whether a sleep line is attached.
    #[inline]
    pub fn has_sleep(&self) -> bool {
        self.slp.is_some()
    }

    /// Whether the bridge is enabled.
    #[inline]
    pub fn is_powered(&self) -> bool {
        self.powered
    }

    fn bit(&mut self, one: bool) -> Result<(), EspError> {
        let half = if one { ONE_HALF_US } else { ZERO_HALF_US };
        self.sig.set_high()?;
        self.delay.delay_us(half);
        self.sig.set_low()?;
        self.delay.delay_us(half);
        Ok(())
    }
}

impl<SIG, PWR, D> TrackOutput for Esp32Track<'_, SIG, PWR, D>
where
    SIG: OutputPin,
    PWR: OutputPin,
    D: DelayNs,
{
    type Error = EspError;

    fn set_power(&mut self, on: bool) -> Result<(), EspError> {
        if on {
            if let Some(slp) = self.slp.as_mut() {
                slp.set_high()?;
            }
            self.pwr.set_high()?;
        } else {
            self.pwr.set_low()?;
            self.sig.set_low()?;
            if let Some(slp) = self.slp.as_mut() {
                slp.set_low()?;
            }
        }
        self.powered = on;
        Ok(())
    }

    fn send(&mut self, packet: &Packet, preamble_bits: u8) -> Result<(), EspError> {
        if !self.powered {
            return Ok(());
        }

        for _ in 0..preamble_bits {
            self.bit(true)?;
        }
        for &byte in packet.as_bytes() {
            self.bit(false)?;
            for shift in (0..8).rev() {
                self.bit(byte >> shift & 1 != 0)?;
            }
        }
        self.bit(true)
    }
}
