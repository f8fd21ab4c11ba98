//! Tuning example.
//!
//! Claims a tuner, tunes a channel, waits for lock and streams for a few
//! seconds, printing the stream counters.
//!
//! Run: cargo run --example tune -- <device-ip> <channel>
//! e.g. cargo run --example tune -- 192.168.1.10 auto:503000000

use std::thread;
use std::time::{Duration, Instant};

use hdhomerun_rs::{discover, DeviceSession, DiscoveryConfig, NetTransport};

const TUNER: u32 = 0;
const STREAM_DURATION: Duration = Duration::from_secs(5);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let ip = args.next().ok_or("missing device address")?;
    let channel = args.next().unwrap_or_else(|| "auto:503000000".to_string());

    let devices = discover(&NetTransport, Some(ip.as_str()), &DiscoveryConfig::default())?;
    let device = devices.first().ok_or("device did not answer discovery")?;
    let mut session = DeviceSession::from_descriptor(device, TUNER)?;
    let (version, number) = session.version()?;
    println!("{}: firmware {version} ({number})", session.name());

    session.lock_request()?;
    println!("Tuner locked, tuning {channel}...");
    session.set_tuner_channel(&channel)?;

    let status = session.wait_for_lock()?;
    println!(
        "lock={} ss={} snq={} seq={}",
        status.lock_str,
        status.signal_strength,
        status.signal_to_noise_quality,
        status.symbol_error_quality
    );
    if !status.lock_supported {
        println!("No usable signal.");
        return Ok(());
    }

    session.stream_start()?;
    let deadline = Instant::now() + STREAM_DURATION;
    let mut received = 0usize;
    while Instant::now() < deadline {
        match session.stream_recv(1024 * 1024) {
            Some(data) => received += data.len(),
            None => thread::sleep(Duration::from_millis(20)),
        }
    }
    session.stream_stop();

    println!("Received {received} bytes: {:?}", session.stream_stats());
    session.lock_release()?;
    Ok(())
}
