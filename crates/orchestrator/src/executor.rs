//! Step executor - applies steps through their adapter with retry, and
//! fans a phase out over a bounded worker pool

use crate::adapter::{AdapterSet, ApplyOutcome};
use crate::error::{Error, ErrorCategory, Result};
use crate::ledger::Ledger;
use crate::params::StepAction;
use crate::retry::{LogCallback, RetryConfig, with_retry};
use crate::types::{ActionResult, CutoverStep, FinalState, Outcome, Phase};
use chrono::Utc;
use rayon::prelude::*;

/// How one step ended within its phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Final state `applied`
    Applied,
    /// Final state `failed`; retries exhausted or permanent rejection
    Failed {
        category: ErrorCategory,
        error: String,
    },
    /// Never issued because the plan was cancelled
    NotStarted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub step_name: String,
    pub outcome: StepOutcome,
}

impl StepReport {
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, StepOutcome::Failed { .. })
    }
}

/// Executes steps for one plan
pub struct StepExecutor<'a> {
    pub plan_id: &'a str,
    pub adapters: &'a AdapterSet,
    pub ledger: &'a Ledger,
    pub retry: &'a RetryConfig,
}

impl StepExecutor<'_> {
    /// Run every step of a phase, at most `phase.workers()` at a time.
    ///
    /// Returns once every step is terminal. Steps not yet issued when
    /// `is_cancelled` turns true are reported as `NotStarted`; steps
    /// already in flight run to completion.
    pub fn execute_phase(
        &self,
        phase: &Phase,
        steps: &[&CutoverStep],
        is_cancelled: &(dyn Fn() -> bool + Sync),
    ) -> Result<Vec<StepReport>> {
        let run_one = |step: &CutoverStep| -> Result<StepReport> {
            if is_cancelled() {
                return Ok(StepReport {
                    step_name: step.name.clone(),
                    outcome: StepOutcome::NotStarted,
                });
            }
            self.apply(phase.index, step)
        };

        let workers = phase.workers();
        if workers == 1 || steps.len() == 1 {
            return steps.iter().map(|step| run_one(step)).collect();
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| Error::Other(format!("failed to create step worker pool: {e}")))?;

        pool.install(|| steps.par_iter().map(|step| run_one(step)).collect())
    }

    /// Apply one step, retrying transient provider errors.
    ///
    /// Every attempt is appended to the ledger before this returns, and
    /// the final state is set before the caller sees the outcome.
    pub fn apply(&self, phase_index: usize, step: &CutoverStep) -> Result<StepReport> {
        let adapter = self.adapters.for_action(&step.action);
        let simulated = adapter.is_simulated();

        let snapshot = if step.kind().is_weighted() {
            adapter
                .snapshot(&step.resource_id, &step.action)
                .unwrap_or_else(|e| {
                    log::warn!("Could not snapshot {} before {}: {e}", step.resource_id, step.name);
                    None
                })
        } else {
            None
        };

        self.ledger
            .begin_step(self.plan_id, phase_index, step, simulated, snapshot)?;
        log::debug!("Applying {} ({}) on {}", step.name, step.kind(), step.resource_id);

        let result = self.attempt_with_retry(step, &step.action, simulated, false);
        let outcome = match result {
            Ok(_) => {
                self.ledger
                    .set_final_state(self.plan_id, &step.name, FinalState::Applied)?;
                StepOutcome::Applied
            }
            Err(AttemptError::Ledger(e)) => return Err(e),
            Err(AttemptError::Adapter(e)) => {
                log::warn!("Step {} failed: {e}", step.name);
                self.ledger
                    .set_final_state(self.plan_id, &step.name, FinalState::Failed)?;
                StepOutcome::Failed {
                    category: e.category(),
                    error: e.to_string(),
                }
            }
        };

        Ok(StepReport {
            step_name: step.name.clone(),
            outcome,
        })
    }

    /// Apply the inverse of an applied step.
    ///
    /// Returns whether the step is now rolled back. An inverse failure is
    /// logged and recorded, never escalated: the record stays `applied`.
    pub fn revert(&self, step: &CutoverStep, inverse: Option<&StepAction>) -> Result<bool> {
        let Some(inverse) = inverse else {
            let adapter = self.adapters.for_action(&step.action);
            self.ledger.append_result(
                self.plan_id,
                ActionResult {
                    step_name: step.name.clone(),
                    attempt: 1,
                    outcome: Outcome::Ok,
                    detail: "nothing to revert".to_string(),
                    applied_at: Utc::now(),
                    simulated: adapter.is_simulated(),
                    inverse: true,
                },
            )?;
            self.ledger
                .set_final_state(self.plan_id, &step.name, FinalState::RolledBack)?;
            return Ok(true);
        };

        let simulated = self.adapters.for_action(inverse).is_simulated();
        log::debug!("Reverting {} with {}", step.name, inverse.kind());

        match self.attempt_with_retry(step, inverse, simulated, true) {
            Ok(_) => {
                self.ledger
                    .set_final_state(self.plan_id, &step.name, FinalState::RolledBack)?;
                Ok(true)
            }
            Err(AttemptError::Ledger(e)) => Err(e),
            Err(AttemptError::Adapter(e)) => {
                log::warn!("Inverse of {} failed, leaving it applied: {e}", step.name);
                Ok(false)
            }
        }
    }

    fn attempt_with_retry(
        &self,
        step: &CutoverStep,
        action: &StepAction,
        simulated: bool,
        inverse: bool,
    ) -> std::result::Result<ApplyOutcome, AttemptError> {
        let adapter = self.adapters.for_action(action);
        let mut ledger_failure: Option<Error> = None;

        let result = with_retry(self.retry, Some(&LogCallback), |attempt| {
            let outcome = adapter.apply(&step.resource_id, action);
            let entry = ActionResult {
                step_name: step.name.clone(),
                attempt,
                outcome: match &outcome {
                    Ok(_) => Outcome::Ok,
                    Err(Error::Timeout { .. }) => Outcome::Timeout,
                    Err(_) => Outcome::ProviderError,
                },
                detail: match &outcome {
                    Ok(applied) => applied.detail.clone(),
                    Err(e) => e.to_string(),
                },
                applied_at: Utc::now(),
                simulated,
                inverse,
            };

            if let Err(e) = self.ledger.append_result(self.plan_id, entry) {
                let message = e.to_string();
                ledger_failure = Some(e);
                return Err(Error::Other(message));
            }
            outcome
        });

        if let Some(e) = ledger_failure {
            return Err(AttemptError::Ledger(e));
        }
        result.map_err(AttemptError::Adapter)
    }
}

/// Keeps ledger failures apart from provider failures
enum AttemptError {
    Ledger(Error),
    Adapter(Error),
}
