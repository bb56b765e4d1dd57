//! Background execution loop
//!
//! The worker thread owns the compute device. The controller talks to it only
//! through [`Command`] messages; the worker reports back through [`Shared`],
//! which holds the published status and the host mirror. The mirror is
//! written by the worker only at safe points: after a batch has been
//! synchronized, never while a batch is in flight.
//!
//! While paused the worker blocks on the command channel. While running it
//! checks for commands between batches, so a batch is the finest granularity
//! at which it can be stopped.
//!
//! Joint increments are inputs, never produced by the step passes, so a
//! download leaves the mirror's `theta` alone. The mirror copy is written when
//! a command is handled or when a position target re-steers a joint.

use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Instant;

use futures::channel::oneshot;
use log::{debug, error, info};

use super::controller::Phase;
use super::traits::ComputeDevice;
use crate::config::SimConfig;
use crate::constraint::ConstraintTable;
use crate::engine::{target_increment, Clock, StepParams};
use crate::error::{SimError, SimResult};
use crate::performance::{ThroughputMetrics, ThroughputMonitor};
use crate::state::memory::check_shape;
use crate::state::BodyState;

/// Control messages, handled in order between batches.
#[derive(Debug)]
pub enum Command {
    /// Step until paused or a breakpoint is reached.
    Run,
    /// Step `n` more steps, then pause.
    Step(u64),
    /// Pause at the next batch boundary.
    Pause,
    /// Pause once simulated time reaches `t`.
    Breakpoint(f64),
    /// Replace the device state with the host mirror.
    Upload,
    /// Make the device use this constraint table.
    Constraints(Arc<ConstraintTable>),
    /// Per-step joint angle increments. Leaves position control.
    JointSpeeds(Vec<f64>),
    /// Drive each joint toward an angle, re-steered every batch.
    JointTargets(Vec<f64>),
    /// Drop breakpoints, pending steps, joint targets and timing history.
    Reset,
    /// Refresh the host mirror and report the simulated time.
    Sync(oneshot::Sender<SimResult<f64>>),
    /// Exit the loop and release the device.
    Stop,
}

/// What the worker publishes to the controller.
#[derive(Debug, Clone)]
pub struct Status {
    pub phase: Phase,
    /// Simulated time after the last completed batch.
    pub time: f64,
    pub fault: Option<String>,
    pub metrics: ThroughputMetrics,
}

/// State shared between the controller and the worker.
pub struct Shared {
    pub status: Mutex<Status>,
    /// Signalled whenever `status` changes phase.
    pub changed: Condvar,
    /// Host mirror of the body.
    pub mirror: Mutex<BodyState>,
}

impl Shared {
    pub fn new(mirror: BodyState) -> Self {
        Self {
            status: Mutex::new(Status {
                phase: Phase::Created,
                time: mirror.time,
                fault: None,
                metrics: ThroughputMetrics::default(),
            }),
            changed: Condvar::new(),
            mirror: Mutex::new(mirror),
        }
    }

    /// Lock the status. A poisoned lock only means the other side panicked
    /// mid-update; the status itself is always a consistent value.
    pub fn status(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn mirror(&self) -> MutexGuard<'_, BodyState> {
        self.mirror.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn publish(&self, update: impl FnOnce(&mut Status)) {
        let mut status = self.status();
        update(&mut *status);
        self.changed.notify_all();
    }
}

/// Joint actuation as last handed to the device.
#[derive(Debug, Default)]
struct JointDrive {
    /// Accumulated angles after the last completed batch.
    angle: Vec<f64>,
    theta: Vec<f64>,
    /// Position targets, `None` under speed control.
    targets: Option<Vec<f64>>,
}

impl JointDrive {
    fn load(&mut self, mirror: &BodyState) {
        self.angle.clone_from(&mirror.joints.anchors.angle);
        self.theta.clone_from(&mirror.joints.anchors.theta);
    }
}

pub struct Worker {
    device: Box<dyn ComputeDevice + Send>,
    shared: Arc<Shared>,
    commands: Receiver<Command>,
    params: StepParams,
    queue_depth: u64,
    exact_breakpoints: bool,
    sync_interval: usize,
    max_joint_speed: f64,
    drive: JointDrive,
    /// Pending breakpoints, ascending.
    breakpoints: Vec<f64>,
    /// Steps left of a `Step(n)` request.
    remaining: Option<u64>,
    running: bool,
    batches_since_sync: usize,
    monitor: ThroughputMonitor,
}

impl Worker {
    pub fn new(
        device: Box<dyn ComputeDevice + Send>,
        shared: Arc<Shared>,
        commands: Receiver<Command>,
        config: &SimConfig,
    ) -> Self {
        let mut drive = JointDrive::default();
        drive.load(&shared.mirror());
        Self {
            device,
            shared,
            commands,
            params: StepParams::from_config(config),
            queue_depth: config.queue_depth.max(1) as u64,
            exact_breakpoints: config.exact_breakpoints,
            sync_interval: config.sync_interval,
            max_joint_speed: config.max_joint_speed,
            drive,
            breakpoints: Vec::new(),
            remaining: None,
            running: false,
            batches_since_sync: 0,
            monitor: ThroughputMonitor::new(),
        }
    }

    /// Thread body. Returns when stopped, when the controller is gone, or
    /// after a device fault.
    pub fn run(mut self) {
        debug!("Worker started on {}", self.device.name());
        if let Err(e) = self.serve() {
            error!("Simulation stopped: {e}");
            let message = e.to_string();
            self.shared.publish(|status| {
                status.phase = Phase::Ended;
                status.fault = Some(message);
            });
        }
        debug!("Worker exiting, releasing {}", self.device.name());
    }

    fn serve(&mut self) -> SimResult<()> {
        loop {
            if !self.running {
                match self.commands.recv() {
                    Ok(command) => {
                        if !self.handle(command)? {
                            return Ok(());
                        }
                    }
                    Err(_) => return Ok(()),
                }
                continue;
            }

            loop {
                match self.commands.try_recv() {
                    Ok(command) => {
                        if !self.handle(command)? {
                            return Ok(());
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return Ok(()),
                }
            }
            if self.running {
                self.run_batch()?;
            }
        }
    }

    /// Apply one command. `Ok(false)` means stop.
    fn handle(&mut self, command: Command) -> SimResult<bool> {
        match command {
            Command::Run => {
                self.remaining = None;
                self.resume();
            }
            Command::Step(0) => {
                self.remaining = None;
                self.pause()?;
            }
            Command::Step(n) => {
                self.remaining = Some(n);
                self.resume();
            }
            Command::Pause => {
                if self.running {
                    self.pause()?;
                }
            }
            Command::Breakpoint(t) => {
                let at = self.breakpoints.partition_point(|&bp| bp < t);
                self.breakpoints.insert(at, t);
                debug!("Breakpoint set at T={t}");
            }
            Command::Upload => {
                let mirror = self.shared.mirror();
                self.device.upload(&mirror)?;
                self.drive.load(&mirror);
                drop(mirror);
                self.batches_since_sync = 0;
            }
            Command::Constraints(table) => self.device.ensure_constraints(&table)?,
            Command::JointSpeeds(theta) => {
                self.device.set_joint_increments(&theta)?;
                self.shared
                    .mirror()
                    .joints
                    .anchors
                    .theta
                    .copy_from_slice(&theta);
                self.drive.theta = theta;
                self.drive.targets = None;
            }
            Command::JointTargets(targets) => {
                check_shape("joint targets", self.drive.angle.len(), targets.len())?;
                debug!("Joint position control with targets {targets:?}");
                self.drive.targets = Some(targets);
            }
            Command::Reset => {
                self.breakpoints.clear();
                self.remaining = None;
                self.drive.targets = None;
                self.batches_since_sync = 0;
                self.monitor.reset();
                debug!("Worker state reset");
            }
            Command::Sync(reply) => {
                let result = self.refresh_mirror();
                let failed = result.as_ref().err().cloned();
                let _ = reply.send(result);
                if let Some(e) = failed {
                    return Err(e);
                }
            }
            Command::Stop => {
                if self.running {
                    self.refresh_mirror()?;
                }
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn resume(&mut self) {
        self.running = true;
        let time = self.device.time();
        self.shared.publish(|status| {
            status.phase = Phase::Running;
            status.time = time;
        });
    }

    /// Drain the device, mirror it and publish `Paused`.
    fn pause(&mut self) -> SimResult<()> {
        self.running = false;
        self.remaining = None;
        let time = self.refresh_mirror()?;
        info!("Simulation paused at T={time}");
        self.shared.publish(|status| {
            status.phase = Phase::Paused;
            status.time = time;
        });
        Ok(())
    }

    fn refresh_mirror(&mut self) -> SimResult<f64> {
        self.device.synchronize()?;
        let mut mirror = self.shared.mirror();
        let commanded = mirror.joints.anchors.theta.clone();
        self.device.download(&mut mirror)?;
        mirror.joints.anchors.theta = commanded;
        self.drive.angle.clone_from(&mirror.joints.anchors.angle);
        self.batches_since_sync = 0;
        Ok(mirror.time)
    }

    /// Under position control, pick the increments that bring every joint
    /// to its target by the end of the next `steps` steps.
    fn steer(&mut self, steps: u64) -> SimResult<()> {
        let Some(targets) = &self.drive.targets else {
            return Ok(());
        };
        let (max, dt) = (self.max_joint_speed, self.params.dt());
        let theta: Vec<f64> = targets
            .iter()
            .zip(&self.drive.angle)
            .map(|(&target, &angle)| target_increment(target, angle, steps, max, dt))
            .collect();
        if theta != self.drive.theta {
            self.device.set_joint_increments(&theta)?;
            self.shared
                .mirror()
                .joints
                .anchors
                .theta
                .copy_from_slice(&theta);
            self.drive.theta = theta;
        }
        Ok(())
    }

    /// Tolerance for "simulated time has reached `bp`", a tiny fraction of a
    /// step so `origin + n * dt` rounding cannot miss a breakpoint.
    fn reached(&self, now: f64, bp: f64) -> bool {
        now >= bp - self.params.dt() * 1e-6
    }

    /// Drop every breakpoint at or before `now`. True if any was dropped.
    fn take_reached(&mut self, now: f64) -> bool {
        let reached = self
            .breakpoints
            .iter()
            .take_while(|&&bp| self.reached(now, bp))
            .count();
        self.breakpoints.drain(..reached);
        reached > 0
    }

    fn batch_size(&self, now: f64) -> u64 {
        let mut steps = self.queue_depth;
        if let Some(remaining) = self.remaining {
            steps = steps.min(remaining);
        }
        if self.exact_breakpoints {
            if let Some(&bp) = self.breakpoints.first() {
                steps = steps.min(Clock::new(now, self.params.dt()).steps_until(bp));
            }
        }
        steps.max(1)
    }

    fn run_batch(&mut self) -> SimResult<()> {
        let now = self.device.time();
        if self.take_reached(now) {
            debug!("Breakpoint reached at T={now}");
            return self.pause();
        }

        let steps = self.batch_size(now);
        self.steer(steps)?;
        let started = Instant::now();
        self.device.launch(&self.params, steps)?;
        self.device.synchronize()?;
        self.monitor.record_batch(steps, started.elapsed());
        for (angle, theta) in self.drive.angle.iter_mut().zip(&self.drive.theta) {
            *angle += theta * steps as f64;
        }

        let now = self.device.time();
        let metrics = self.monitor.metrics();
        self.shared.publish(|status| {
            status.time = now;
            status.metrics = metrics;
        });

        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= steps.min(*remaining);
        }
        if self.take_reached(now) {
            debug!("Breakpoint reached at T={now} after {steps} steps");
            return self.pause();
        }
        if self.remaining == Some(0) {
            return self.pause();
        }

        self.batches_since_sync += 1;
        if self.sync_interval > 0 && self.batches_since_sync >= self.sync_interval {
            debug!("Background mirror refresh at T={now}");
            self.refresh_mirror()?;
        }
        Ok(())
    }
}

/// Block until `shared` leaves the running phase or the worker dies.
///
/// `alive` is polled so a worker that exits without publishing cannot hang
/// the caller.
pub fn wait_while_running(shared: &Shared, alive: impl Fn() -> bool) -> SimResult<f64> {
    let mut status = shared.status();
    loop {
        if let Some(fault) = &status.fault {
            return Err(SimError::DeviceFault(fault.clone()));
        }
        if status.phase != Phase::Running {
            return Ok(status.time);
        }
        if !alive() {
            return Err(SimError::WorkerDisconnected);
        }
        status = shared
            .changed
            .wait_timeout(status, std::time::Duration::from_millis(50))
            .map(|(guard, _)| guard)
            .unwrap_or_else(|e| e.into_inner().0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::{BodyDescription, BodyParams, JointDescription};
    use crate::simulation::cpu::CpuDevice;
    use crate::state::{BodyShape, HostAllocator};
    use std::sync::mpsc;

    fn spawn(config: &SimConfig) -> (Arc<Shared>, mpsc::Sender<Command>, std::thread::JoinHandle<()>) {
        let shape = BodyShape::new(2, 1);
        let mut mirror = BodyState::zeroed(shape, &HostAllocator).unwrap();
        mirror.masses.set(0, 1.0, [0.0, 0.0, 0.0]);
        mirror.masses.set(1, 1.0, [1.0, 0.0, 0.0]);
        mirror.springs.set(0, [0, 1], 100.0, 1.0, 0.0);
        let shared = Arc::new(Shared::new(mirror));
        let device = Box::new(CpuDevice::new(shape, config).unwrap());
        let (tx, rx) = mpsc::channel();
        let worker = Worker::new(device, shared.clone(), rx, config);
        let handle = std::thread::spawn(move || worker.run());
        (shared, tx, handle)
    }

    /// Worker driven in-thread over a single hinge: axis 0-1, points 2 and 3.
    fn hinge_worker(config: &SimConfig) -> (Worker, Arc<Shared>, mpsc::Sender<Command>) {
        let body = BodyDescription {
            vertices: vec![
                [0.0, 0.0, 0.0],
                [0.0, 0.0, 1.0],
                [0.0, 1.0, 0.5],
                [1.0, 0.0, 0.5],
            ],
            joints: vec![JointDescription {
                left: vec![2],
                right: vec![3],
                anchor: [0, 1],
                frames: [0, 0],
            }],
            ..Default::default()
        };
        let mirror = body.build(&BodyParams::default()).unwrap();
        let shape = mirror.shape();
        let shared = Arc::new(Shared::new(mirror));
        let device = Box::new(CpuDevice::new(shape, config).unwrap());
        let (tx, rx) = mpsc::channel();
        (Worker::new(device, shared.clone(), rx, config), shared, tx)
    }

    fn run_until_paused(worker: &mut Worker) {
        while worker.running {
            worker.run_batch().unwrap();
        }
    }

    fn wait_paused(shared: &Shared) -> f64 {
        // the worker publishes Running on its own; wait for it to settle
        let mut status = shared.status();
        while status.phase != Phase::Paused {
            status = shared.changed.wait(status).unwrap();
        }
        status.time
    }

    #[test]
    fn test_step_then_pause() {
        let config = SimConfig::default().with_dt(0.01).with_threads(1).with_queue_depth(4);
        let (shared, tx, handle) = spawn(&config);
        tx.send(Command::Upload).unwrap();
        tx.send(Command::Step(10)).unwrap();
        let time = wait_paused(&shared);
        assert!((time - 0.1).abs() < 1e-12);
        assert_eq!(shared.status().metrics.total_steps, 10);
        assert_eq!(shared.status().metrics.total_batches, 3);
        tx.send(Command::Stop).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_exact_breakpoint() {
        let config = SimConfig::default().with_dt(0.01).with_threads(1).with_queue_depth(8);
        let (shared, tx, handle) = spawn(&config);
        tx.send(Command::Upload).unwrap();
        tx.send(Command::Breakpoint(0.05)).unwrap();
        tx.send(Command::Run).unwrap();
        let time = wait_paused(&shared);
        assert!((time - 0.05).abs() < 1e-12);
        assert!((shared.mirror().time - 0.05).abs() < 1e-12);
        tx.send(Command::Stop).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_sync_reply() {
        let config = SimConfig::default().with_dt(0.5).with_threads(1);
        let (_shared, tx, handle) = spawn(&config);
        tx.send(Command::Upload).unwrap();
        let (reply, rx) = oneshot::channel();
        tx.send(Command::Sync(reply)).unwrap();
        let time = futures::executor::block_on(rx).unwrap().unwrap();
        assert_eq!(time, 0.0);
        drop(tx);
        handle.join().unwrap();
    }

    #[test]
    fn test_shape_error_is_a_fault() {
        let config = SimConfig::default().with_threads(1);
        let (shared, tx, handle) = spawn(&config);
        tx.send(Command::JointSpeeds(vec![0.1])).unwrap();
        handle.join().unwrap();
        let status = shared.status();
        assert_eq!(status.phase, Phase::Ended);
        assert!(status.fault.is_some());
    }

    #[test]
    fn test_download_keeps_commanded_increments() {
        let config = SimConfig::default().with_dt(0.01).with_threads(1).with_queue_depth(4);
        let (mut worker, shared, _tx) = hinge_worker(&config);
        worker.handle(Command::Upload).unwrap();
        // a new speed lands in the mirror before the worker has handled it
        shared.mirror().joints.anchors.theta[0] = 0.02;
        worker.handle(Command::Step(4)).unwrap();
        run_until_paused(&mut worker);
        assert_eq!(shared.status().phase, Phase::Paused);
        assert_eq!(shared.mirror().joints.anchors.theta, vec![0.02]);
        assert_eq!(shared.mirror().joints.angles(), &[0.0]);

        worker.handle(Command::JointSpeeds(vec![0.02])).unwrap();
        worker.handle(Command::Step(4)).unwrap();
        run_until_paused(&mut worker);
        assert!((shared.mirror().joints.angles()[0] - 0.08).abs() < 1e-12);
    }

    #[test]
    fn test_joint_targets_are_reached_at_limited_speed() {
        let config = SimConfig::default()
            .with_dt(0.01)
            .with_threads(1)
            .with_queue_depth(4)
            .with_max_joint_speed(1.0);
        let (mut worker, shared, _tx) = hinge_worker(&config);
        worker.handle(Command::Upload).unwrap();
        worker.handle(Command::JointTargets(vec![0.1])).unwrap();

        worker.handle(Command::Step(4)).unwrap();
        run_until_paused(&mut worker);
        assert!((shared.mirror().joints.angles()[0] - 0.04).abs() < 1e-12);
        assert!((shared.mirror().joints.anchors.theta[0] - 0.01).abs() < 1e-12);

        worker.handle(Command::Step(16)).unwrap();
        run_until_paused(&mut worker);
        let mirror = shared.mirror();
        assert!((mirror.joints.angles()[0] - 0.1).abs() < 1e-9);
        assert!(mirror.joints.anchors.theta[0].abs() < 1e-9);
    }

    #[test]
    fn test_joint_targets_shape_is_checked() {
        let config = SimConfig::default().with_threads(1);
        let (mut worker, _shared, _tx) = hinge_worker(&config);
        assert!(matches!(
            worker.handle(Command::JointTargets(vec![0.1, 0.2])),
            Err(SimError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_reset_forgets_pending_work() {
        let config = SimConfig::default().with_dt(0.01).with_threads(1).with_queue_depth(4);
        let (mut worker, _shared, _tx) = hinge_worker(&config);
        worker.handle(Command::Upload).unwrap();
        worker.handle(Command::Step(4)).unwrap();
        run_until_paused(&mut worker);
        assert_eq!(worker.monitor.metrics().total_steps, 4);

        worker.handle(Command::Breakpoint(0.5)).unwrap();
        worker.handle(Command::JointTargets(vec![1.0])).unwrap();
        worker.handle(Command::Reset).unwrap();
        assert!(worker.breakpoints.is_empty());
        assert!(worker.drive.targets.is_none());
        assert_eq!(worker.monitor.metrics().total_steps, 0);
    }
}
