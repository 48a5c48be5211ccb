//! Rollback controller
//!
//! Reverts every applied step of a plan, most recently applied first.
//! An inverse that fails does not stop the walk; the step stays
//! `applied` and the summary is marked partial.

use crate::context::ProgressCallback;
use crate::error::Result;
use crate::executor::StepExecutor;
use crate::types::CutoverPlan;

/// Result of a rollback walk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackSummary {
    /// Steps now `rolled_back`, in the order they were reverted
    pub reverted: Vec<String>,
    /// Steps whose inverse failed and remain `applied`
    pub failed: Vec<String>,
}

impl RollbackSummary {
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }
}

pub struct RollbackController<'a> {
    pub plan: &'a CutoverPlan,
    pub executor: &'a StepExecutor<'a>,
}

impl RollbackController<'_> {
    /// Revert applied steps in reverse applied order.
    ///
    /// Steps that never reached `applied` are left untouched.
    pub fn roll_back(&self, progress: &mut dyn ProgressCallback) -> Result<RollbackSummary> {
        let ledger = self.executor.ledger;
        let applied = ledger.applied_records(&self.plan.id);
        let mut summary = RollbackSummary::default();

        log::info!("Rolling back {} applied step(s) of {}", applied.len(), self.plan.id);

        for record in applied.iter().rev() {
            let Some(step) = self.plan.steps.iter().find(|s| s.name == record.step_name) else {
                log::warn!("Applied record {} has no matching step", record.step_name);
                summary.failed.push(record.step_name.clone());
                continue;
            };

            let inverse = step.action.inverse(
                &self.plan.source_env,
                &self.plan.target_env,
                record.snapshot.as_ref(),
            );
            let reverted = self.executor.revert(step, inverse.as_ref())?;
            progress.on_rollback_step(&step.name, reverted);

            if reverted {
                summary.reverted.push(step.name.clone());
            } else {
                summary.failed.push(step.name.clone());
            }
        }

        if summary.is_partial() {
            log::warn!(
                "Rollback of {} left {} step(s) applied: {}",
                self.plan.id,
                summary.failed.len(),
                summary.failed.join(", ")
            );
        }
        Ok(summary)
    }
}
