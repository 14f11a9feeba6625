//! ESP32 clock implementation using the ESP-IDF timer.

use crate::traits::Clock;

/// Microseconds since boot.
#[inline]
pub(crate) fn now_us() -> i64 {
    // Safe: plain read of the free-running system timer
    unsafe { esp_idf_hal::sys::esp_timer_get_time() }
}

/// ESP32 clock using the hardware timer.
///
/// Provides millisecond-resolution timing using the ESP-IDF `esp_timer_get_time()`
/// function, which returns microseconds since boot.
///
/// # Example
///
/// ```ignore
/// use rs_dcc::hal::esp32::Esp32Clock;
/// use rs_dcc::traits::Clock;
///
/// let clock = Esp32Clock::new();
/// station.tick(clock.now_ms());
/// ```
pub struct Esp32Clock;

impl Esp32Clock {
    /// Creates a new ESP32 clock instance.
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Default for Esp32Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for Esp32Clock {
    #[inline]
    fn now_ms(&self) -> u64 {
        (now_us() / 1000) as u64
    }
}
