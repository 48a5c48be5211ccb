//! Strategy scheduler
//!
//! Owns a plan for its whole run and is the only code that moves its
//! state. Phases run in compiled order; each one is applied through the
//! step executor and then held at the health gate before the next one is
//! issued. Any failed step, expired health window or cancellation with
//! changes already applied ends in a rollback.

use crate::adapter::AdapterSet;
use crate::approval::{ApprovalGate, Decision};
use crate::context::ProgressCallback;
use crate::error::{Error, Result};
use crate::executor::{StepExecutor, StepOutcome};
use crate::health::{HealthConfig, HealthGate};
use crate::ledger::Ledger;
use crate::retry::RetryConfig;
use crate::rollback::RollbackController;
use crate::types::{CutoverPlan, PlanState};

/// How a phase ended
#[derive(Debug)]
enum PhaseOutcome {
    Healthy,
    Failed(String),
    Cancelled,
}

pub struct Scheduler<'a> {
    plan: CutoverPlan,
    adapters: &'a AdapterSet,
    ledger: &'a Ledger,
    gate: &'a ApprovalGate,
    retry: &'a RetryConfig,
    health: &'a HealthConfig,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        plan: CutoverPlan,
        adapters: &'a AdapterSet,
        ledger: &'a Ledger,
        gate: &'a ApprovalGate,
        retry: &'a RetryConfig,
        health: &'a HealthConfig,
    ) -> Self {
        Self {
            plan,
            adapters,
            ledger,
            gate,
            retry,
            health,
        }
    }

    /// Drive the plan from `VALIDATED` to a terminal state.
    ///
    /// Returns the plan as it ended. Errors are reserved for failures of
    /// the engine itself, such as an unwritable ledger.
    pub fn run(mut self, progress: &mut dyn ProgressCallback) -> Result<CutoverPlan> {
        if self.plan.status != PlanState::Validated {
            return Err(Error::Other(format!(
                "plan {} is {}, expected {}",
                self.plan.id,
                self.plan.status,
                PlanState::Validated
            )));
        }

        if self.is_cancelled() {
            self.transition(PlanState::Cancelled, Some("cancelled before start"), progress)?;
            return Ok(self.plan);
        }

        if self.plan.requires_approval && !self.await_approval(progress)? {
            return Ok(self.plan);
        }
        self.transition(PlanState::Running, None, progress)?;

        let total = self.plan.phases.len();
        for index in 0..total {
            if self.plan.status == PlanState::HealthChecking {
                self.transition(PlanState::Running, Some("next phase"), progress)?;
            }
            if self.is_cancelled() {
                self.stop_after_cancel(progress)?;
                return Ok(self.plan);
            }

            match self.run_phase(index, progress)? {
                PhaseOutcome::Healthy => {}
                PhaseOutcome::Failed(reason) => {
                    self.roll_back(&reason, progress)?;
                    return Ok(self.plan);
                }
                PhaseOutcome::Cancelled => {
                    self.stop_after_cancel(progress)?;
                    return Ok(self.plan);
                }
            }
        }

        self.transition(PlanState::Succeeded, None, progress)?;
        Ok(self.plan)
    }

    fn is_cancelled(&self) -> bool {
        self.gate.is_cancelled(&self.plan.id)
    }

    /// Park in `AWAITING_APPROVAL`. Returns whether the plan may run; an
    /// approved plan is already `RUNNING` on return.
    fn await_approval(&mut self, progress: &mut dyn ProgressCallback) -> Result<bool> {
        self.transition(PlanState::AwaitingApproval, None, progress)?;
        log::info!("Plan {} is waiting for approval", self.plan.id);

        match self.gate.wait(&self.plan.id)? {
            Decision::Approved(record) => {
                self.ledger.record_approval(record.clone())?;
                let reason = format!("approved by {}", record.approver);
                self.plan.approval = Some(record);
                self.transition(PlanState::Running, Some(&reason), progress)?;
                Ok(true)
            }
            Decision::Rejected(record) => {
                self.ledger.record_approval(record.clone())?;
                let reason = format!("rejected by {}", record.approver);
                self.plan.approval = Some(record);
                self.transition(PlanState::Cancelled, Some(&reason), progress)?;
                Ok(false)
            }
            Decision::Cancelled => {
                self.transition(PlanState::Cancelled, Some("cancelled while awaiting approval"), progress)?;
                Ok(false)
            }
        }
    }

    fn executor(&self) -> StepExecutor<'_> {
        StepExecutor {
            plan_id: &self.plan.id,
            adapters: self.adapters,
            ledger: self.ledger,
            retry: self.retry,
        }
    }

    fn run_phase(&mut self, index: usize, progress: &mut dyn ProgressCallback) -> Result<PhaseOutcome> {
        let phase = self.plan.phases[index].clone();
        let total = self.plan.phases.len();
        progress.on_phase_start(&phase, total);
        log::info!(
            "Phase {}/{} of {}: {} step(s)",
            index + 1,
            total,
            self.plan.id,
            phase.steps.len()
        );

        let reports = {
            let steps = self.plan.phase_steps(&phase);
            let gate = self.gate;
            let plan_id = self.plan.id.as_str();
            self.executor()
                .execute_phase(&phase, &steps, &|| gate.is_cancelled(plan_id))?
        };

        let mut failure = None;
        let mut interrupted = false;
        for report in &reports {
            match &report.outcome {
                StepOutcome::NotStarted => {
                    interrupted = true;
                    continue;
                }
                StepOutcome::Failed { category, error } if failure.is_none() => {
                    failure = Some(format!(
                        "step {} failed ({}): {error}",
                        report.step_name,
                        category.label()
                    ));
                }
                _ => {}
            }
            if let Some(record) = self.ledger.record(&self.plan.id, &report.step_name) {
                progress.on_step_complete(&record);
            }
        }

        if let Some(reason) = failure {
            return Ok(PhaseOutcome::Failed(reason));
        }
        if interrupted {
            return Ok(PhaseOutcome::Cancelled);
        }

        self.transition(PlanState::HealthChecking, None, progress)?;
        let verdict = {
            let steps = self.plan.phase_steps(&phase);
            let gate = self.gate;
            let plan_id = self.plan.id.as_str();
            HealthGate {
                config: self.health,
                prober: self.adapters.prober(),
                ledger: self.ledger,
                plan_id,
            }
            .verify_phase(
                phase.index,
                &steps,
                &|| gate.is_cancelled(plan_id),
                &mut |poll| progress.on_health_poll(poll),
            )
        };

        match verdict {
            Ok(()) => Ok(PhaseOutcome::Healthy),
            Err(e @ Error::HealthCheckTimeout { .. }) => Ok(PhaseOutcome::Failed(e.to_string())),
            Err(Error::Cancelled { .. }) => Ok(PhaseOutcome::Cancelled),
            Err(e) => Err(e),
        }
    }

    /// A cancelled plan with nothing applied ends `CANCELLED`; otherwise
    /// its applied steps are rolled back.
    fn stop_after_cancel(&mut self, progress: &mut dyn ProgressCallback) -> Result<()> {
        let nothing_applied = self.ledger.applied_records(&self.plan.id).is_empty();
        if nothing_applied && self.plan.status.can_transition_to(PlanState::Cancelled) {
            return self.transition(PlanState::Cancelled, Some("cancelled"), progress);
        }
        self.roll_back("cancelled", progress)
    }

    fn roll_back(&mut self, reason: &str, progress: &mut dyn ProgressCallback) -> Result<()> {
        log::warn!("Plan {} rolling back: {reason}", self.plan.id);
        self.transition(PlanState::RollingBack, Some(reason), progress)?;

        let summary = {
            let executor = self.executor();
            RollbackController {
                plan: &self.plan,
                executor: &executor,
            }
            .roll_back(progress)?
        };

        if summary.is_partial() {
            self.plan.rollback_partial = true;
            let reason = format!("inverse failed for {}", summary.failed.join(", "));
            self.transition(PlanState::Failed, Some(&reason), progress)
        } else {
            self.transition(PlanState::RolledBack, None, progress)
        }
    }

    fn transition(
        &mut self,
        to: PlanState,
        reason: Option<&str>,
        progress: &mut dyn ProgressCallback,
    ) -> Result<()> {
        let from = self.plan.status;
        if from == to {
            return Ok(());
        }
        if !from.can_transition_to(to) {
            return Err(Error::Other(format!(
                "illegal transition {from} -> {to} for plan {}",
                self.plan.id
            )));
        }

        self.ledger.record_transition(
            &self.plan.id,
            from,
            to,
            reason.map(str::to_string),
            self.plan.rollback_partial,
        )?;
        self.plan.status = to;
        log::info!("Plan {}: {from} -> {to}", self.plan.id);
        progress.on_state_change(&self.plan.id, from, to);

        if to.is_terminal() {
            self.gate.close(&self.plan.id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NoProgress;
    use crate::testing::{ScriptedAdapter, fast_config, plan_fixture, step};
    use crate::types::{ExecutionRecord, Phase};
    use std::sync::Arc;

    struct Recorder(Vec<PlanState>);

    impl ProgressCallback for Recorder {
        fn on_state_change(&mut self, _plan_id: &str, _from: PlanState, to: PlanState) {
            self.0.push(to);
        }
        fn on_phase_start(&mut self, _phase: &Phase, _total_phases: usize) {}
        fn on_step_complete(&mut self, _record: &ExecutionRecord) {}
    }

    fn two_phase_plan() -> CutoverPlan {
        let mut plan = plan_fixture(vec![step("a", 50), step("b", 100)]);
        plan.phases = vec![
            Phase {
                index: 0,
                steps: vec![0],
                concurrency: Some(1),
                traffic_percent: Some(50),
            },
            Phase {
                index: 1,
                steps: vec![1],
                concurrency: Some(1),
                traffic_percent: Some(100),
            },
        ];
        plan
    }

    #[test]
    fn test_state_sequence_on_success() {
        let config = fast_config();
        let adapters = AdapterSet::uniform(Arc::new(ScriptedAdapter::new()));
        let ledger = Ledger::new();
        let gate = ApprovalGate::new();
        let plan = two_phase_plan();
        ledger.register_plan(&plan).unwrap();
        gate.register(&plan.id, false);

        let mut recorder = Recorder(Vec::new());
        let plan = Scheduler::new(plan, &adapters, &ledger, &gate, &config.retry, &config.health)
            .run(&mut recorder)
            .unwrap();

        assert_eq!(plan.status, PlanState::Succeeded);
        assert_eq!(
            recorder.0,
            vec![
                PlanState::Running,
                PlanState::HealthChecking,
                PlanState::Running,
                PlanState::HealthChecking,
                PlanState::Succeeded,
            ]
        );
        assert_eq!(ledger.status(&plan.id).unwrap(), PlanState::Succeeded);
    }

    #[test]
    fn test_failed_step_triggers_rollback() {
        let config = fast_config();
        let adapter = Arc::new(ScriptedAdapter::new());
        adapter.reject("res-b");
        let adapters = AdapterSet::uniform(adapter.clone());
        let ledger = Ledger::new();
        let gate = ApprovalGate::new();
        let plan = two_phase_plan();
        ledger.register_plan(&plan).unwrap();
        gate.register(&plan.id, false);

        let mut recorder = Recorder(Vec::new());
        let plan = Scheduler::new(plan, &adapters, &ledger, &gate, &config.retry, &config.health)
            .run(&mut recorder)
            .unwrap();

        assert_eq!(plan.status, PlanState::RolledBack);
        assert!(recorder.0.contains(&PlanState::RollingBack));
        assert_eq!(adapter.weight("res-a"), Some(0));

        let report = ledger.report(&plan.id).unwrap();
        let reason = report
            .transitions
            .iter()
            .find(|t| t.to == PlanState::RollingBack)
            .and_then(|t| t.reason.clone())
            .unwrap();
        assert!(reason.starts_with("step b failed (rejected)"), "{reason}");
    }

    #[test]
    fn test_cancel_before_start_applies_nothing() {
        let config = fast_config();
        let adapter = Arc::new(ScriptedAdapter::new());
        let adapters = AdapterSet::uniform(adapter.clone());
        let ledger = Ledger::new();
        let gate = ApprovalGate::new();
        let plan = two_phase_plan();
        ledger.register_plan(&plan).unwrap();
        gate.register(&plan.id, false);
        gate.cancel(&plan.id).unwrap();

        let plan = Scheduler::new(plan, &adapters, &ledger, &gate, &config.retry, &config.health)
            .run(&mut NoProgress)
            .unwrap();

        assert_eq!(plan.status, PlanState::Cancelled);
        assert!(adapter.calls().is_empty());
    }

    #[test]
    fn test_only_validated_plans_run() {
        let config = fast_config();
        let adapters = AdapterSet::simulated();
        let ledger = Ledger::new();
        let gate = ApprovalGate::new();
        let mut plan = plan_fixture(vec![step("a", 10)]);
        plan.status = PlanState::New;

        let result = Scheduler::new(plan, &adapters, &ledger, &gate, &config.retry, &config.health)
            .run(&mut NoProgress);
        assert!(result.is_err());
    }
}
