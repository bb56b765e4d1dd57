//! # Walker
//!
//! A soft slab with a hinge across its middle. Flapping the hinge back and
//! forth against a frictional floor makes the slab crawl. Joint commands are
//! changed at breakpoints, and the host mirror is refreshed while running to
//! print progress.
//!
//! ## Usage
//!
//! Run with: `cargo run --example walker`

use anyhow::{Context, Result};
use flexsim::prelude::*;
use log::info;

const SPACING: f64 = 0.05;
/// Seconds between hinge direction changes.
const HALF_PERIOD: f64 = 0.25;
const HINGE_SPEED: f64 = 1.5;

/// A 7 x 2 x 2 slab hinged about the bottom edge line at x index 3.
fn slab() -> Result<BodyDescription> {
    let (nx, ny) = (7u32, 2u32);
    let mut body = BodyDescription::lattice([nx, ny, 2], SPACING, [0.0, 0.0, 0.0]);
    let index = |x: u32, y: u32, z: u32| (z * ny + y) * nx + x;
    let mut hinge = JointDescription {
        anchor: [index(3, 0, 0), index(3, 1, 0)],
        ..Default::default()
    };
    for z in 0..2 {
        for y in 0..ny {
            for x in 0..nx {
                if x < 3 {
                    hinge.left.push(index(x, y, z));
                } else if x > 3 {
                    hinge.right.push(index(x, y, z));
                }
            }
        }
    }
    body.joints.push(hinge);
    body.validate().context("slab topology")?;
    Ok(body)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = SimConfig::default()
        .with_dt(1e-4)
        .with_gravity([0.0, 0.0, -9.81])
        .with_queue_depth(32)
        .with_max_joint_speed(4.0);
    let params = BodyParams {
        mass: 0.02,
        stiffness: 1.0e4,
        damping: 1.0,
    };
    let mut sim = Simulation::from_body(&slab()?, &params, config)?;
    sim.create_plane([0.0, 0.0, 1.0], -0.001, 0.6, 0.9)?;
    let start_x = sim.report().com_pos[0];
    info!("Walker on {}, starting at x={start_x:.4}", sim.device_name());

    let mut speed = HINGE_SPEED;
    for cycle in 1..=16 {
        sim.set_joint_speeds(&[speed])?;
        sim.set_breakpoint(f64::from(cycle) * HALF_PERIOD)?;
        sim.execute()?;

        // watch the running simulation through background syncs
        let midway = sim.sync()?;
        let time = sim.wait_until_paused()?;
        let report = sim.report();
        println!(
            "cycle {cycle:>2}: T={time:.3} (synced at {midway:.3}) hinge={:+.3} rad, x={:+.4}, vx={:+.4}",
            report.joint_pos[0],
            report.com_pos[0] - start_x,
            report.com_vel[0]
        );
        speed = -speed;
    }

    let metrics = sim.throughput();
    info!(
        "{} steps in {} batches, {:.0} steps/s",
        metrics.total_steps, metrics.total_batches, metrics.steps_per_second
    );
    sim.reset()?;
    info!("Reset to T={}, x={:+.4}", sim.time(), sim.report().com_pos[0] - start_x);
    sim.end()?;
    Ok(())
}
