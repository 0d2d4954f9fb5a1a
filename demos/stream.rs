//! Stream B-mode frames from a simulated Capistrano probe to stdout.
//!
//! Usage: cargo run --example stream
//! Set RUST_LOG=debug for driver logs and CAPISTRANO_* to change the config.

use capistrano::{classify::status, frame_channel, DriverConfig, ProbeDevice, SimulatedTransport};
use std::time::{Duration, Instant};

fn main() {
    env_logger::init();

    let sim = SimulatedTransport::new();
    let (sink, frames) = frame_channel(64);
    let mut device = match ProbeDevice::new(sim.clone(), sink, DriverConfig::from_env()) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Invalid driver configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = device.connect() {
        eprintln!("Failed to connect: {}", e);
        std::process::exit(1);
    }

    println!("Probe:    {}", device.probe_name().unwrap_or_default());
    println!("SDK:      {}", device.sdk_version().unwrap_or_default());

    let setup = device.update_parameters(|p| {
        p.set_depth_mm(54.0)?;
        p.set_frequency_mhz(20.0)?;
        p.set_tgc_percent([30.0, 50.0, 80.0])
    });
    if let Err(e) = setup {
        eprintln!("Failed to apply imaging parameters: {}", e);
    }
    println!(
        "Depth:    {} mm, fs {} MHz",
        device.depth_mm().unwrap_or_default(),
        device.sample_frequency_mhz().ok().flatten().unwrap_or_default()
    );
    println!();

    if let Err(e) = device.start_recording() {
        eprintln!("Failed to start recording: {}", e);
        std::process::exit(1);
    }

    // One synchronization loss halfway through, recovered by the driver.
    sim.push_wait(status::NOT_SEQUENTIAL, true);

    let start = Instant::now();
    let mut count: u64 = 0;
    while start.elapsed() < Duration::from_secs(3) {
        match frames.recv_timeout(Duration::from_secs(1)) {
            Ok(frame) => {
                count += 1;
                if count % 50 == 1 {
                    let mean = frame.pixels.iter().map(|&p| p as u64).sum::<u64>()
                        / frame.pixels.len().max(1) as u64;
                    println!(
                        "frame={:<6} t={:.3}s  size={}  mean={}",
                        frame.index, frame.timestamp_s, frame.size, mean
                    );
                }
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                break;
            }
        }
    }

    let elapsed = start.elapsed().as_secs_f64();
    println!(
        "\nTotal: {} frames in {:.1}s ({:.1} Hz)",
        count,
        elapsed,
        count as f64 / elapsed
    );

    if let Err(e) = device.disconnect() {
        eprintln!("Failed to disconnect: {}", e);
    }
}
