//! Progress callback seam
//!
//! Lets a caller render progress without the engine depending on any
//! particular terminal or UI crate. Callbacks only ever run on the plan
//! worker; step workers report through the ledger and the plan worker
//! forwards their records once the phase settles.

use crate::types::{ExecutionRecord, HealthPoll, Phase, PlanState};

/// Progress callback for plan execution
pub trait ProgressCallback: Send {
    /// Called after every plan state transition
    fn on_state_change(&mut self, plan_id: &str, from: PlanState, to: PlanState);

    /// Called before a phase's steps are issued
    fn on_phase_start(&mut self, phase: &Phase, total_phases: usize);

    /// Called once per step after its phase settles
    fn on_step_complete(&mut self, record: &ExecutionRecord);

    /// Called for every health endpoint poll
    fn on_health_poll(&mut self, _poll: &HealthPoll) {}

    /// Called after each inverse action, successful or not
    fn on_rollback_step(&mut self, _step_name: &str, _reverted: bool) {}
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_state_change(&mut self, _plan_id: &str, _from: PlanState, _to: PlanState) {}
    fn on_phase_start(&mut self, _phase: &Phase, _total_phases: usize) {}
    fn on_step_complete(&mut self, _record: &ExecutionRecord) {}
}
