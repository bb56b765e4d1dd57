//! # Bouncing Cube
//!
//! Drops a soft lattice cube onto a frictional ground plane and reports its
//! height, energy and stepping throughput every tenth of a second.
//!
//! ## Usage
//!
//! Run with: `cargo run --example bouncing_cube`
//! Add `-- --gpu` to step on the GPU when one is available.

use anyhow::Result;
use flexsim::prelude::*;
use log::info;

const SIDE: u32 = 5;
const SPACING: f64 = 0.05;
const DROP_HEIGHT: f64 = 0.4;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let backend = if std::env::args().any(|a| a == "--gpu") {
        Backend::Auto
    } else {
        Backend::Cpu
    };
    let config = SimConfig::default()
        .with_dt(1e-4)
        .with_gravity([0.0, 0.0, -9.81])
        .with_queue_depth(64)
        .with_backend(backend);

    let body = BodyDescription::lattice([SIDE; 3], SPACING, [0.0, 0.0, DROP_HEIGHT]);
    let params = BodyParams {
        mass: 0.05,
        stiffness: 2.0e4,
        damping: 2.0,
    };
    let mut sim = Simulation::from_body(&body, &params, config)?;
    sim.create_plane([0.0, 0.0, 1.0], 0.0, 0.4, 0.6)?;
    info!("Stepping on {}", sim.device_name());

    println!("{:>6} {:>10} {:>10} {:>12} {:>12}", "T", "min z", "max z", "energy", "steps/s");
    for _ in 0..20 {
        let time = sim.step(1000)?;
        let snapshot = sim.snapshot();
        let energy = sim.read(|state| {
            let height: f64 = (0..state.masses.len())
                .map(|i| state.masses.m[i] * 9.81 * state.masses.pos[i][2])
                .sum();
            state.mechanical_energy() + height
        });
        let (lo, hi) = snapshot.bounds().unwrap_or(([0.0; 3], [0.0; 3]));
        println!(
            "{time:>6.2} {:>10.4} {:>10.4} {energy:>12.5} {:>12.0}",
            lo[2],
            hi[2],
            sim.throughput().steps_per_second
        );
    }

    sim.end()?;
    Ok(())
}
