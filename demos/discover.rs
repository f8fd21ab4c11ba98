//! Discovery example.
//!
//! Lists the tuner devices on the local network, or probes a single
//! address when one is given.
//!
//! Run: cargo run --example discover [192.168.1.10]

use hdhomerun_rs::{discover, DiscoveryConfig, NetTransport};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let target = std::env::args().nth(1);

    match &target {
        Some(ip) => println!("Probing {ip}..."),
        None => println!("Broadcasting discovery request..."),
    }

    let devices = discover(&NetTransport, target.as_deref(), &DiscoveryConfig::default())?;
    if devices.is_empty() {
        println!("No devices found.");
        return Ok(());
    }

    for device in &devices {
        println!("  {device}");
    }
    Ok(())
}
