//! ESP32-C3 SuperMini DCC command station.
//!
//! This is the main entry point for the physical hardware. On boot it:
//! - Reads the locomotive address (CV1) on the programming track
//! - Switches to operations mode
//! - Refreshes a throttle for that address forever
//!
//! # Hardware Setup
//!
//! DRV8874 in PH/EN mode. Pins come from the board config; the default is
//! PH on GPIO2 and EN on GPIO3 with nSLEEP tied high. IPROPI goes through its
//! sense resistor into GPIO4.
//!
//! # Build
//!
//! ```bash
//! cargo build --release --features esp32 --bin esp32_main
//! espflash flash --monitor target/riscv32imc-esp-espidf/release/esp32_main
//! ```

use esp_idf_hal::adc::oneshot::AdcDriver;
use esp_idf_hal::delay::Ets;
use esp_idf_hal::gpio::AnyOutputPin;
use esp_idf_hal::peripherals::Peripherals;
use rs_dcc::hal::esp32::{Esp32Clock, Esp32CurrentSense, Esp32Track, SENSE_GPIO};
use rs_dcc::throttle::DEFAULT_ADDRESS;
use rs_dcc::traits::Clock;
use rs_dcc::{CommandStation, Config};
use std::thread;
use std::time::Duration;

/// Packets between scheduler yields in the refresh loop.
const YIELD_EVERY: u32 = 50;

fn main() -> anyhow::Result<()> {
    // Initialize ESP-IDF
    esp_idf_hal::sys::link_patches();

    println!();
    println!("================================");
    println!("  rs-dcc SuperMini Station");
    println!("================================");
    println!();

    let config = Config::default();
    let board = &config.board;
    println!("Board: {}", board.name);

    anyhow::ensure!(board.has_track(), "board {} has no track pins", board.name);
    let track_pins = [Some(board.sig_gpio), Some(board.pwr_gpio), board.sleep_gpio()];
    for gpio in track_pins.into_iter().flatten() {
        anyhow::ensure!(gpio != SENSE_GPIO, "GPIO{} is reserved for current sense", gpio);
    }
    if board.has_current_sense() {
        anyhow::ensure!(
            board.adc_gpio == SENSE_GPIO,
            "current sense must be on GPIO{}, board has GPIO{}",
            SENSE_GPIO,
            board.adc_gpio
        );
    }

    let peripherals = Peripherals::take()?;

    // =========================================================================
    // Initialize Track (DRV8874 PH/EN)
    // =========================================================================
    // SAFETY: the track pins are distinct and not SENSE_GPIO, the only pin
    // taken from `peripherals.pins` below.
    let (sig, pwr) = unsafe {
        (
            AnyOutputPin::new(board.sig_gpio),
            AnyOutputPin::new(board.pwr_gpio),
        )
    };
    let mut track = Esp32Track::new(sig, pwr, Ets)?;
    print!(
        "[OK] Track initialized (GPIO{} signal, GPIO{} power",
        board.sig_gpio, board.pwr_gpio
    );
    match board.sleep_gpio() {
        Some(gpio) if gpio != board.sig_gpio && gpio != board.pwr_gpio => {
            // SAFETY: checked against the other track pins and SENSE_GPIO
            track = track.with_sleep(unsafe { AnyOutputPin::new(gpio) })?;
            println!(", GPIO{} sleep)", gpio);
        }
        Some(gpio) => anyhow::bail!("sleep pin GPIO{} is already a track pin", gpio),
        None => println!(")"),
    }

    // =========================================================================
    // Initialize Current Sense (ADC1)
    // =========================================================================
    let adc1 = AdcDriver::new(peripherals.adc1)?;
    let sense = Esp32CurrentSense::new(&adc1, peripherals.pins.gpio4, config.filter.sample_rate_hz)?;
    if board.has_current_sense() {
        println!(
            "[OK] Current sense initialized (GPIO{} ADC, {} Hz)",
            SENSE_GPIO, config.filter.sample_rate_hz
        );
    } else {
        println!("[SKIP] Current sense not wired, service mode cannot see ACKs");
    }

    let clock = Esp32Clock::new();
    let mut station = CommandStation::new(track, sense, &config);

    // =========================================================================
    // Read the locomotive address on the programming track
    // =========================================================================
    station.mode_svc_read_cv(1)?;
    let address = loop {
        station.tick(clock.now_ms())?;
        if let Some(result) = station.svc_read_done() {
            break match result {
                Ok(cv1) if (1..=127).contains(&cv1) => {
                    println!("[OK] CV1 = {}", cv1);
                    u16::from(cv1)
                }
                Ok(cv1) => {
                    println!("[SKIP] CV1 = {} is not a short address", cv1);
                    DEFAULT_ADDRESS
                }
                Err(e) => {
                    println!("[SKIP] CV1 read failed: {}", e);
                    DEFAULT_ADDRESS
                }
            };
        }
    };

    // =========================================================================
    // Operations mode
    // =========================================================================
    station.mode_ops()?;
    let id = station
        .create_throttle(address)
        .ok_or_else(|| anyhow::anyhow!("roster full"))?;
    if let Some(throttle) = station.throttle_mut(id) {
        throttle.set_function(0, true);
    }

    println!();
    println!("{}", station.show());
    println!("Starting refresh loop...");
    println!();

    let mut sent: u32 = 0;
    loop {
        station.tick(clock.now_ms())?;

        sent = sent.wrapping_add(1);
        if sent % YIELD_EVERY == 0 {
            // Keep the idle task (and its watchdog) fed
            thread::sleep(Duration::from_millis(1));
        }
    }
}
