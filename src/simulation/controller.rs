//! Simulation controller
//!
//! [`Simulation`] is a state machine over [`Phase`]:
//!
//! ```text
//! Created --start/step--> Running <--pause/resume--> Paused
//!                            \                         /
//!                             `--------> Ended <------'
//! ```
//!
//! `is_started()` and `is_freed()` track the two orthogonal flags: whether
//! the body was ever uploaded, and whether the device has been released.
//!
//! The host mirror may only be edited while not running. Edits are pushed to
//! the device when stepping resumes. Joint commands are the exception: speeds
//! and position targets travel as messages and take effect at the next batch
//! boundary, so they can be changed while running.
//!
//! ```no_run
//! use flexsim::prelude::*;
//!
//! let config = SimConfig::default().with_dt(1e-4);
//! let mut sim = Simulation::new(2, 1, config)?;
//! sim.edit(|body| {
//!     body.masses.set(0, 1.0, [0.0, 0.0, 0.0]);
//!     body.masses.set(1, 1.0, [1.0, 0.0, 0.0]);
//!     body.springs.set(0, [0, 1], 100.0, 1.0, 0.0);
//! })?;
//! let time = sim.step(1)?;
//! assert!((time - 1e-4).abs() < 1e-15);
//! # Ok::<(), flexsim::error::SimError>(())
//! ```

use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use futures::channel::oneshot;
use log::{info, warn};

use super::create_device;
use super::worker::{wait_while_running, Command, Shared, Worker};
use crate::body::{BodyDescription, BodyParams};
use crate::config::SimConfig;
use crate::constraint::ConstraintSet;
use crate::engine::joint_increment;
use crate::error::{SimError, SimResult};
use crate::math::Packed3;
use crate::performance::ThroughputMetrics;
use crate::report::BodyReport;
use crate::snapshot::RenderSnapshot;
use crate::state::{BodyShape, BodyState, HostAllocator, JointShape};

/// Lifecycle phase of a [`Simulation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Constructed, never stepped.
    Created,
    /// The worker is stepping.
    Running,
    /// Stepping stopped at a batch boundary; the host mirror is current.
    Paused,
    /// The worker has exited.
    Ended,
}

struct WorkerHandle {
    commands: Sender<Command>,
    thread: JoinHandle<()>,
}

/// A mass/spring/joint simulation driven by a background worker.
pub struct Simulation {
    config: SimConfig,
    device_name: String,
    shared: Arc<Shared>,
    worker: Option<WorkerHandle>,
    constraints: ConstraintSet,
    /// Constraint version last handed to the worker.
    constraints_sent: Option<u64>,
    /// Body as first uploaded, restored by `reset`.
    initial: Option<BodyState>,
    joint_commands: Vec<f64>,
    /// Per-step increments of the last speed command.
    joint_theta: Vec<f64>,
    joint_targets: Option<Vec<f64>>,
    /// Host mirror edited since the last upload.
    host_dirty: bool,
    started: bool,
    freed: bool,
}

impl Simulation {
    /// Zeroed body with `num_masses` masses and `num_springs` springs.
    pub fn new(num_masses: usize, num_springs: usize, config: SimConfig) -> SimResult<Self> {
        Self::with_joints(num_masses, num_springs, JointShape::NONE, config)
    }

    /// Zeroed body including joint storage.
    pub fn with_joints(
        num_masses: usize,
        num_springs: usize,
        joints: JointShape,
        config: SimConfig,
    ) -> SimResult<Self> {
        let shape = BodyShape::new(num_masses, num_springs).with_joints(joints);
        Self::from_state(BodyState::zeroed(shape, &HostAllocator)?, config)
    }

    /// Build the body from a topology description.
    pub fn from_body(
        body: &BodyDescription,
        params: &BodyParams,
        config: SimConfig,
    ) -> SimResult<Self> {
        Self::from_state(body.build(params)?, config)
    }

    /// Take `state` as the initial host mirror.
    pub fn from_state(state: BodyState, config: SimConfig) -> SimResult<Self> {
        config.validate()?;
        let shape = state.shape();
        let device = create_device(&config, shape)?;
        let device_name = device.name().to_string();
        let joint_theta = state.joints.anchors.theta.clone();
        let joint_commands = joint_theta.iter().map(|t| t / config.dt).collect();
        let shared = Arc::new(Shared::new(state));

        let (commands, receiver) = mpsc::channel();
        let worker = Worker::new(device, shared.clone(), receiver, &config);
        let thread = std::thread::Builder::new()
            .name("sim-worker".to_string())
            .spawn(move || worker.run())
            .map_err(|e| SimError::DeviceUnavailable(format!("cannot spawn worker: {e}")))?;

        info!(
            "Simulation created: {} masses, {} springs, {} joints on {device_name}",
            shape.masses, shape.springs, shape.joints.anchors
        );
        Ok(Self {
            config,
            device_name,
            shared,
            worker: Some(WorkerHandle { commands, thread }),
            constraints: ConstraintSet::new(),
            constraints_sent: None,
            initial: None,
            joint_commands,
            joint_theta,
            joint_targets: None,
            host_dirty: false,
            started: false,
            freed: false,
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn phase(&self) -> Phase {
        self.shared.status().phase
    }

    /// Whether the body has been uploaded and stepping begun at least once.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Whether the device has been released.
    pub fn is_freed(&self) -> bool {
        self.freed
    }

    /// Simulated time. While running this is the time after the last
    /// completed batch.
    pub fn time(&self) -> f64 {
        self.shared.status().time
    }

    /// Set simulated time. Takes effect on the device when stepping resumes.
    pub fn set_time(&mut self, time: f64) -> SimResult<()> {
        self.ensure_idle()?;
        self.shared.mirror().time = time;
        self.shared.publish(|status| status.time = time);
        self.host_dirty = true;
        Ok(())
    }

    /// Add a half-space constraint; the excluded region is `normal·x < offset`.
    pub fn create_plane(
        &mut self,
        normal: Packed3,
        offset: f64,
        friction_kinetic: f64,
        friction_static: f64,
    ) -> SimResult<usize> {
        self.ensure_idle()?;
        self.constraints
            .create_plane(normal, offset, friction_kinetic, friction_static)
    }

    /// Add a sphere constraint; the excluded region is the ball's interior.
    pub fn create_ball(&mut self, center: Packed3, radius: f64) -> SimResult<usize> {
        self.ensure_idle()?;
        self.constraints.create_ball(center, radius)
    }

    pub fn clear_constraints(&mut self) -> SimResult<()> {
        self.ensure_idle()?;
        self.constraints.clear();
        Ok(())
    }

    pub fn constraints(&self) -> &ConstraintSet {
        &self.constraints
    }

    /// Stop stepping once simulated time reaches `t`.
    ///
    /// Breakpoints at or before the current time are ignored. Returns whether
    /// the breakpoint was accepted.
    pub fn set_breakpoint(&mut self, t: f64) -> SimResult<bool> {
        self.ensure_alive()?;
        let now = self.time();
        if !(t > now) {
            warn!("Ignoring breakpoint at T={t}, simulation is already at T={now}");
            return Ok(false);
        }
        self.send(Command::Breakpoint(t))?;
        Ok(true)
    }

    /// Upload the host mirror and step until paused.
    pub fn start(&mut self) -> SimResult<()> {
        self.ensure_idle()?;
        self.upload_body()?;
        self.launch(Command::Run)?;
        info!("Simulation started at T={}", self.time());
        Ok(())
    }

    /// Continue stepping, starting first if needed. Unlike [`start`](Self::start)
    /// this keeps the device state of a paused simulation.
    pub fn execute(&mut self) -> SimResult<()> {
        if self.started {
            self.resume()
        } else {
            self.start()
        }
    }

    /// Step exactly `n` steps and pause. Returns the simulated time reached.
    pub fn step(&mut self, n: u64) -> SimResult<f64> {
        self.ensure_idle()?;
        if self.started {
            self.flush()?;
        } else {
            self.upload_body()?;
        }
        self.launch(Command::Step(n))?;
        self.wait_until_paused()
    }

    /// Pause once simulated time reaches `t`, or at the next batch boundary
    /// if `t` has already passed. Blocks until the device is drained and the
    /// host mirror is current; returns the time stepping stopped at.
    pub fn pause(&mut self, t: f64) -> SimResult<f64> {
        self.ensure_alive()?;
        match self.phase() {
            Phase::Created => return Err(SimError::NotStarted),
            Phase::Ended => return Err(SimError::Ended),
            Phase::Paused => return Ok(self.time()),
            Phase::Running => {}
        }
        if t > self.time() {
            self.send(Command::Breakpoint(t))?;
        } else {
            self.send(Command::Pause)?;
        }
        self.wait_until_paused()
    }

    /// Continue a paused simulation, pushing host edits first.
    pub fn resume(&mut self) -> SimResult<()> {
        self.ensure_idle()?;
        if !self.started {
            return Err(SimError::NotStarted);
        }
        self.flush()?;
        self.launch(Command::Run)
    }

    /// Block until stepping stops. Returns the simulated time it stopped at.
    pub fn wait_until_paused(&self) -> SimResult<f64> {
        wait_while_running(&self.shared, || {
            self.worker
                .as_ref()
                .is_some_and(|worker| !worker.thread.is_finished())
        })
    }

    /// Refresh the host mirror from the device without pausing. Returns the
    /// simulated time of the refreshed mirror.
    pub fn sync(&mut self) -> SimResult<f64> {
        self.ensure_alive()?;
        if self.phase() != Phase::Running {
            return Ok(self.time());
        }
        let (reply, response) = oneshot::channel();
        self.send(Command::Sync(reply))?;
        futures::executor::block_on(response).map_err(|_| SimError::WorkerDisconnected)?
    }

    /// Stop the worker and release the device. The host mirror keeps the
    /// final state. Calling it again does nothing.
    pub fn end(&mut self) -> SimResult<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        let _ = worker.commands.send(Command::Stop);
        let joined = worker.thread.join();
        self.freed = true;
        self.shared.publish(|status| status.phase = Phase::Ended);
        info!("Simulation ended at T={}", self.time());
        joined.map_err(|_| SimError::WorkerDisconnected)
    }

    /// Mutate the host mirror. Rejected while running.
    pub fn edit<R>(&mut self, f: impl FnOnce(&mut BodyState) -> R) -> SimResult<R> {
        self.ensure_idle()?;
        let result = f(&mut *self.shared.mirror());
        self.host_dirty = true;
        Ok(result)
    }

    /// Read the host mirror. While running it reflects the last sync point.
    pub fn read<R>(&self, f: impl FnOnce(&BodyState) -> R) -> R {
        f(&*self.shared.mirror())
    }

    pub fn positions(&self) -> Vec<Packed3> {
        self.read(|body| body.masses.pos.clone())
    }

    pub fn colors(&self) -> Vec<Packed3> {
        self.read(|body| body.masses.color.clone())
    }

    /// Accumulated joint angles.
    pub fn joint_angles(&self) -> Vec<f64> {
        self.read(|body| body.joints.angles().to_vec())
    }

    /// Joint speeds in effect, rad/s, after clamping. Under position control
    /// these are the speeds last chosen by the worker, as of the last sync.
    pub fn joint_speeds(&self) -> Vec<f64> {
        let dt = self.config.dt;
        if self.joint_targets.is_none() {
            return self.joint_theta.iter().map(|t| t / dt).collect();
        }
        self.read(|body| body.joints.anchors.theta.iter().map(|t| t / dt).collect())
    }

    /// Joint speeds as last commanded, before clamping.
    pub fn joint_speed_commands(&self) -> &[f64] {
        &self.joint_commands
    }

    /// Command joint speeds in rad/s, leaving position control. Allowed while
    /// running; takes effect at the next batch boundary.
    pub fn set_joint_speeds(&mut self, speeds: &[f64]) -> SimResult<()> {
        self.ensure_alive()?;
        self.check_joint_count("joint speeds", speeds.len())?;
        let (max, dt) = (self.config.max_joint_speed, self.config.dt);
        let theta: Vec<f64> = speeds
            .iter()
            .map(|&speed| joint_increment(speed, max, dt))
            .collect();
        if self.phase() != Phase::Running {
            self.shared
                .mirror()
                .joints
                .anchors
                .theta
                .copy_from_slice(&theta);
        }
        self.joint_commands.copy_from_slice(speeds);
        self.joint_theta.clone_from(&theta);
        self.joint_targets = None;
        self.send(Command::JointSpeeds(theta))
    }

    /// Command joint angles in rad. Every batch the worker picks the speed
    /// that reaches the target by the end of that batch, capped at
    /// `max_joint_speed`. Allowed while running. A later
    /// [`set_joint_speeds`](Self::set_joint_speeds) returns to speed control.
    pub fn set_joint_targets(&mut self, targets: &[f64]) -> SimResult<()> {
        self.ensure_alive()?;
        self.check_joint_count("joint targets", targets.len())?;
        self.joint_targets = Some(targets.to_vec());
        self.send(Command::JointTargets(targets.to_vec()))
    }

    /// Position targets, `None` under speed control.
    pub fn joint_targets(&self) -> Option<&[f64]> {
        self.joint_targets.as_deref()
    }

    /// Set the external force on mass `i`.
    pub fn set_external_force(&mut self, i: usize, force: Packed3) -> SimResult<()> {
        self.edit(|body| -> SimResult<()> {
            let slot = body.masses.force_extern.get_mut(i).ok_or_else(|| {
                SimError::InvalidTopology(format!("no mass {i} to apply a force to"))
            })?;
            *slot = force;
            Ok(())
        })?
    }

    /// Reset every resetable spring's rest length to its current length.
    /// Returns the number of springs changed.
    pub fn reset_rest_lengths(&mut self) -> SimResult<usize> {
        self.edit(|body| body.springs.reset_rest_lengths(&body.masses))
    }

    /// Joint angles measured from the local coordinate frames, `None` when
    /// the body has none.
    pub fn measured_joint_angles(&self) -> Option<Vec<f64>> {
        self.read(|body| body.joints.measured_angles(&body.masses))
    }

    pub fn snapshot(&self) -> RenderSnapshot {
        self.read(RenderSnapshot::capture)
    }

    /// Joint and base state from the host mirror.
    pub fn report(&self) -> BodyReport {
        let joint_vel = self.joint_speeds();
        self.read(|body| BodyReport::capture(body, joint_vel))
    }

    /// Restore the body as it was first uploaded, clock included. Pending
    /// breakpoints, steps and joint targets are dropped and throughput
    /// restarts; the restored body reaches the device when stepping resumes.
    /// Does nothing before the first start.
    pub fn reset(&mut self) -> SimResult<()> {
        self.ensure_idle()?;
        let Some(initial) = &self.initial else {
            return Ok(());
        };
        let time = initial.time;
        let dt = self.config.dt;
        self.shared.mirror().clone_from(initial);
        self.joint_theta.clone_from(&initial.joints.anchors.theta);
        self.joint_commands = self.joint_theta.iter().map(|t| t / dt).collect();
        self.joint_targets = None;
        self.host_dirty = true;
        self.send(Command::Reset)?;
        self.shared.publish(|status| {
            status.time = time;
            status.metrics = ThroughputMetrics::default();
        });
        info!("Simulation reset to T={time}");
        Ok(())
    }

    pub fn throughput(&self) -> ThroughputMetrics {
        self.shared.status().metrics
    }

    /// Fails on a recorded fault or after `end`.
    fn ensure_alive(&self) -> SimResult<()> {
        let status = self.shared.status();
        if let Some(fault) = &status.fault {
            return Err(SimError::DeviceFault(fault.clone()));
        }
        if status.phase == Phase::Ended || self.worker.is_none() {
            return Err(SimError::Ended);
        }
        Ok(())
    }

    /// Like [`ensure_alive`](Self::ensure_alive), and also fails while running.
    fn ensure_idle(&self) -> SimResult<()> {
        self.ensure_alive()?;
        if self.phase() == Phase::Running {
            return Err(SimError::Running);
        }
        Ok(())
    }

    fn check_joint_count(&self, container: &'static str, found: usize) -> SimResult<()> {
        let expected = self.joint_theta.len();
        if found != expected {
            return Err(SimError::ShapeMismatch {
                container,
                expected,
                found,
            });
        }
        Ok(())
    }

    fn send(&self, command: Command) -> SimResult<()> {
        let worker = self.worker.as_ref().ok_or(SimError::Ended)?;
        worker
            .commands
            .send(command)
            .map_err(|_| SimError::WorkerDisconnected)
    }

    /// Validate and upload the whole host mirror. The first upload is kept
    /// for `reset`.
    fn upload_body(&mut self) -> SimResult<()> {
        let mirror = self.shared.mirror();
        mirror.validate()?;
        if self.initial.is_none() {
            self.initial = Some(mirror.clone());
        }
        drop(mirror);
        self.host_dirty = true;
        self.flush()?;
        self.started = true;
        Ok(())
    }

    /// Push pending host edits and constraint changes to the worker. The
    /// uploaded increments are always those of the last speed command.
    fn flush(&mut self) -> SimResult<()> {
        if self.host_dirty {
            if self.joint_targets.is_none() {
                self.shared
                    .mirror()
                    .joints
                    .anchors
                    .theta
                    .copy_from_slice(&self.joint_theta);
            }
            self.send(Command::Upload)?;
            self.host_dirty = false;
        }
        let table = self.constraints.projection();
        if self.constraints_sent != Some(table.version) {
            self.constraints_sent = Some(table.version);
            self.send(Command::Constraints(table))?;
        }
        Ok(())
    }

    /// Mark the simulation running, then hand `command` to the worker. The
    /// phase is set first so a following wait cannot see a stale pause.
    fn launch(&mut self, command: Command) -> SimResult<()> {
        self.shared.publish(|status| status.phase = Phase::Running);
        self.send(command)
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        if let Err(e) = self.end() {
            warn!("Simulation did not shut down cleanly: {e}");
        }
    }
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("device", &self.device_name)
            .field("phase", &self.phase())
            .field("time", &self.time())
            .field("started", &self.started)
            .field("freed", &self.freed)
            .finish()
    }
}
