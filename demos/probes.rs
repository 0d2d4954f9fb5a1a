//! List the built-in probe and pulser tables.
//!
//! Usage: cargo run --example probes

use capistrano::catalog;

fn main() {
    env_logger::init();

    println!("{:<4} {:<8} {:>8} {:>8} {:>8} {:>6} {:>8}", "id", "name", "pulse", "fs", "filter", "div", "sweep");
    for probe in catalog::probes() {
        println!(
            "{:<4} {:<8} {:>7}M {:>7}M {:>8} {:>6} {:>7}°",
            probe.id,
            probe.name,
            probe.pulse_frequency,
            probe.sample_frequency,
            format!("{:?}", probe.filter()),
            probe.sample_clock_divider(),
            probe.servo.sweep_angle
        );
    }

    println!();
    println!("{:>6} {:>6} {:>6} {:>6}", "MHz", "min", "mid", "max");
    for f in catalog::pulse_frequencies() {
        if let Some(t) = catalog::lookup_pulser(f) {
            println!("{:>6} {:>6} {:>6} {:>6}", f, t.min_delay, t.mid_delay, t.max_delay);
        }
    }
}
