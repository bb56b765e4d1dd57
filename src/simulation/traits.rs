//! Compute device interface
//!
//! A compute device owns the device-side copy of the body and runs the step
//! passes on it. The background worker is the only caller; it never touches
//! device state directly, only through this trait.

use std::sync::Arc;

use crate::constraint::ConstraintTable;
use crate::engine::StepParams;
use crate::error::SimResult;
use crate::state::BodyState;

pub trait ComputeDevice {
    /// Device name for logs and diagnostics.
    fn name(&self) -> &str;

    /// Replace the device state with `host`, including its simulated time.
    fn upload(&mut self, host: &BodyState) -> SimResult<()>;

    /// Mirror the device state into `host`. Waits for queued work first.
    fn download(&mut self, host: &mut BodyState) -> SimResult<()>;

    /// Re-upload the constraint table if the device holds an older version.
    fn ensure_constraints(&mut self, table: &Arc<ConstraintTable>) -> SimResult<()>;

    /// Per-step angle increment of every joint.
    fn set_joint_increments(&mut self, theta: &[f64]) -> SimResult<()>;

    /// Queue `steps` steps. May return before they have executed.
    fn launch(&mut self, params: &StepParams, steps: u64) -> SimResult<()>;

    /// Block until every queued step has executed.
    fn synchronize(&mut self) -> SimResult<()>;

    /// Simulated time after all queued steps.
    fn time(&self) -> f64;
}
