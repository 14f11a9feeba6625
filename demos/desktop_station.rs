//! Desktop simulation of a command station with one decoder on the track.
//!
//! Runs the whole station against mock hardware: every packet the station
//! sends is fed to a [`MockDecoder`], and the decoder's current draw goes
//! back into the sample queue, so service-mode acknowledgments work the way
//! they do on a real programming track.
//!
//! # Usage
//!
//! ```sh
//! cargo run --example desktop_station
//! RUST_LOG=rs_dcc=debug cargo run --example desktop_station
//! ```

use rs_dcc::hal::{MockAdc, MockClock, MockDecoder, MockTrack};
use rs_dcc::traits::Clock;
use rs_dcc::{CommandStation, Config};
use tracing_subscriber::EnvFilter;

/// Samples queued per packet sent; about one packet time at 10 kHz.
const SAMPLES_PER_PACKET: usize = 60;

/// Simulated time per packet.
const PACKET_MS: u64 = 8;

/// Give up on a service operation after this many packets.
const SVC_TICK_LIMIT: u32 = 500;

type Station = CommandStation<MockTrack, MockAdc>;

fn track_failed(_: ()) -> anyhow::Error {
    anyhow::anyhow!("track output failed")
}

/// One tick, then the decoder's response to whatever went out.
fn step(station: &mut Station, decoder: &mut MockDecoder, clock: &mut MockClock) -> anyhow::Result<()> {
    station.tick(clock.now_ms()).map_err(track_failed)?;
    clock.advance(PACKET_MS);

    if let Some(sent) = station.track().last().copied() {
        let raw = decoder.load_for(&sent.packet);
        station.source_mut().push_n(raw, SAMPLES_PER_PACKET);
        station.track_mut().clear();
    }
    Ok(())
}

fn run_service(
    station: &mut Station,
    decoder: &mut MockDecoder,
    clock: &mut MockClock,
) -> anyhow::Result<()> {
    for _ in 0..SVC_TICK_LIMIT {
        if station.svc_status().is_done() {
            return Ok(());
        }
        step(station, decoder, clock)?;
    }
    anyhow::bail!("service operation did not finish")
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    println!("=================================");
    println!("  rs-dcc Desktop Station");
    println!("=================================");
    println!();

    let config = Config::default();
    let mut station = Station::new(MockTrack::new(), MockAdc::new(), &config);
    let mut decoder = MockDecoder::new();
    let mut clock = MockClock::new();

    // =========================================================================
    // Programming track
    // =========================================================================
    station.mode_svc_read_cv(1).map_err(track_failed)?;
    run_service(&mut station, &mut decoder, &mut clock)?;
    match station.svc_read_done() {
        Some(Ok(val)) => println!("read cv1 = {}", val),
        Some(Err(e)) => println!("read cv1 failed: {}", e),
        None => println!("read cv1 did not finish"),
    }
    println!("  ack history (mA): {:?}", station.ack_history());

    station.mode_svc_write_cv(1, 44).map_err(track_failed)?;
    run_service(&mut station, &mut decoder, &mut clock)?;
    println!(
        "write cv1 = 44: {}",
        if station.svc_done() == Some(true) { "ok" } else { "no ack" }
    );

    station.mode_svc_write_bit(29, 5, true).map_err(track_failed)?;
    run_service(&mut station, &mut decoder, &mut clock)?;
    println!("write cv29 bit5: decoder now has cv29 = 0x{:02x}", decoder.cv(29));

    station.mode_svc_read_cv(1).map_err(track_failed)?;
    run_service(&mut station, &mut decoder, &mut clock)?;
    println!("read cv1 back: {:?}", station.svc_read_done());
    println!();

    // =========================================================================
    // Main line
    // =========================================================================
    station.mode_ops().map_err(track_failed)?;
    let loco = station
        .create_throttle(u16::from(decoder.cv(1)))
        .ok_or_else(|| anyhow::anyhow!("roster full"))?;
    let switcher = station
        .create_throttle(1234)
        .ok_or_else(|| anyhow::anyhow!("roster full"))?;

    if let Some(t) = station.throttle_mut(loco) {
        t.set_speed(64);
        t.set_function(0, true);
    }
    if let Some(t) = station.throttle_mut(switcher) {
        t.set_speed(-20);
        t.set_function(0, true);
        t.set_function(2, true);
        t.write_cv(3, 12);
    }

    for _ in 0..20 {
        station.tick(clock.now_ms()).map_err(track_failed)?;
        if let Some(sent) = station.track().last() {
            println!("  {}", sent.packet.show());
        }
        station.source_mut().push_n(decoder.idle_raw, SAMPLES_PER_PACKET);
        clock.advance(PACKET_MS);
    }

    println!();
    println!("{}", station.show());
    Ok(())
}
