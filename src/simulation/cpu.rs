//! Data-parallel CPU compute device
//!
//! Step passes run on a dedicated compute pool; host/device mirroring runs on
//! a separate copy pool so the two kinds of work never share threads. Work is
//! executed eagerly on [`launch`](ComputeDevice::launch), so
//! [`synchronize`](ComputeDevice::synchronize) has nothing to wait for.

use std::sync::Arc;

use log::debug;

use super::traits::ComputeDevice;
use crate::config::SimConfig;
use crate::constraint::ConstraintTable;
use crate::engine::{self, Clock, StepParams, StepWorkspace};
use crate::error::{SimError, SimResult};
use crate::state::{BodyShape, BodyState, DeviceAllocator, Stream};

/// CPU device holding a double-precision copy of the body.
pub struct CpuDevice {
    name: String,
    compute: Stream,
    copies: Stream,
    state: BodyState,
    work: StepWorkspace,
    table: Arc<ConstraintTable>,
    clock: Clock,
    steps_executed: u64,
}

impl CpuDevice {
    pub fn new(shape: BodyShape, config: &SimConfig) -> SimResult<Self> {
        let threads = config.effective_threads();
        let compute = Stream::new("sim-compute", threads)?;
        let copies = Stream::new("sim-copy", (threads / 2).max(1))?;
        let state = BodyState::zeroed(shape, &DeviceAllocator::new(compute.pool().clone()))?;
        let work = StepWorkspace::for_state(&state);
        debug!(
            "CPU device: {threads} compute threads, {} masses, {} springs",
            shape.masses, shape.springs
        );
        Ok(Self {
            name: format!("cpu ({threads} threads)"),
            compute,
            copies,
            state,
            work,
            table: Arc::new(ConstraintTable::default()),
            clock: Clock::new(0.0, config.dt),
            steps_executed: 0,
        })
    }

    /// Device-side state, for inspection in tests.
    pub fn state(&self) -> &BodyState {
        &self.state
    }

    /// Steps executed since creation.
    pub fn steps_executed(&self) -> u64 {
        self.steps_executed
    }
}

impl ComputeDevice for CpuDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn upload(&mut self, host: &BodyState) -> SimResult<()> {
        self.state.copy_from(host, &self.copies)?;
        self.work = StepWorkspace::for_state(&self.state);
        self.clock.reset(host.time);
        Ok(())
    }

    fn download(&mut self, host: &mut BodyState) -> SimResult<()> {
        self.state.time = self.clock.now();
        host.copy_from(&self.state, &self.copies)
    }

    fn ensure_constraints(&mut self, table: &Arc<ConstraintTable>) -> SimResult<()> {
        if self.table.version != table.version {
            debug!("CPU device: constraint table v{}", table.version);
            self.table = table.clone();
        }
        Ok(())
    }

    fn set_joint_increments(&mut self, theta: &[f64]) -> SimResult<()> {
        let anchors = &mut self.state.joints.anchors.theta;
        if anchors.len() != theta.len() {
            return Err(SimError::ShapeMismatch {
                container: "joint increments",
                expected: anchors.len(),
                found: theta.len(),
            });
        }
        anchors.copy_from_slice(theta);
        Ok(())
    }

    fn launch(&mut self, params: &StepParams, steps: u64) -> SimResult<()> {
        let Self {
            compute,
            state,
            work,
            table,
            ..
        } = self;
        let table: &ConstraintTable = table;
        compute.install(|| {
            for _ in 0..steps {
                engine::step(state, work, table, params);
            }
        });
        self.clock.advance(steps);
        self.steps_executed += steps;
        self.state.time = self.clock.now();
        Ok(())
    }

    fn synchronize(&mut self) -> SimResult<()> {
        Ok(())
    }

    fn time(&self) -> f64 {
        self.clock.now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::HostAllocator;

    fn two_masses() -> BodyState {
        let mut host = BodyState::zeroed(BodyShape::new(2, 1), &HostAllocator).unwrap();
        host.masses.set(0, 1.0, [0.0, 0.0, 0.0]);
        host.masses.set(1, 1.0, [1.5, 0.0, 0.0]);
        host.springs.set(0, [0, 1], 100.0, 1.0, 0.0);
        host
    }

    #[test]
    fn test_round_trip_without_steps_is_bitwise() {
        let config = SimConfig::default().with_threads(2);
        let mut host = two_masses();
        host.masses.vel[1] = [0.1, -0.2, 1e-17];
        host.time = 3.5;
        let mut device = CpuDevice::new(host.shape(), &config).unwrap();
        device.upload(&host).unwrap();

        let mut mirror = BodyState::zeroed(host.shape(), &HostAllocator).unwrap();
        device.download(&mut mirror).unwrap();
        assert_eq!(mirror, host);
    }

    #[test]
    fn test_launch_advances_clock_and_state() {
        let config = SimConfig::default().with_threads(2).with_dt(1e-3);
        let host = two_masses();
        let mut device = CpuDevice::new(host.shape(), &config).unwrap();
        device.upload(&host).unwrap();
        device.launch(&StepParams::from_config(&config), 10).unwrap();
        device.synchronize().unwrap();

        assert_eq!(device.steps_executed(), 10);
        assert!((device.time() - 0.01).abs() < 1e-15);
        // stretched spring pulls the masses together
        assert!(device.state().masses.pos[1][0] < 1.5);
        assert!(device.state().masses.pos[0][0] > 0.0);
    }

    #[test]
    fn test_joint_increment_shape_is_checked() {
        let config = SimConfig::default().with_threads(1);
        let mut device = CpuDevice::new(BodyShape::new(2, 1), &config).unwrap();
        assert!(device.set_joint_increments(&[0.1]).is_err());
        assert!(device.set_joint_increments(&[]).is_ok());
    }
}
