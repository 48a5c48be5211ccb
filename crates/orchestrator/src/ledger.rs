//! Execution ledger
//!
//! Append-only record of every plan, state change, step attempt, health
//! poll and approval decision, keyed by plan id. Safe for concurrent
//! writers: step workers append their own attempts while the plan worker
//! records transitions.
//!
//! With a journal directory configured, every event is also written as
//! one JSON line to `<dir>/<plan_id>.jsonl` before the call returns, and
//! [`Ledger::load`] rebuilds a plan from that file.

use crate::error::{Error, Result};
use crate::params::{ActionKind, TrafficSnapshot};
use crate::types::{
    ActionResult, ApprovalRecord, CutoverPlan, CutoverStep, ExecutionRecord, FinalState,
    HealthPoll, PlanReport, PlanState, StateTransition,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

/// One journal line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    PlanRegistered {
        plan: CutoverPlan,
    },
    Transition {
        plan_id: String,
        transition: StateTransition,
        rollback_partial: bool,
    },
    StepStarted {
        plan_id: String,
        phase_index: usize,
        step_name: String,
        resource_id: String,
        action: ActionKind,
        simulated: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        snapshot: Option<TrafficSnapshot>,
        started_at: DateTime<Utc>,
    },
    AttemptAppended {
        plan_id: String,
        result: ActionResult,
    },
    FinalStateSet {
        plan_id: String,
        step_name: String,
        final_state: FinalState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        applied_seq: Option<u64>,
    },
    HealthPolled {
        poll: HealthPoll,
    },
    ApprovalDecided {
        record: ApprovalRecord,
    },
}

impl LedgerEvent {
    pub fn plan_id(&self) -> &str {
        match self {
            Self::PlanRegistered { plan } => &plan.id,
            Self::Transition { plan_id, .. }
            | Self::StepStarted { plan_id, .. }
            | Self::AttemptAppended { plan_id, .. }
            | Self::FinalStateSet { plan_id, .. } => plan_id,
            Self::HealthPolled { poll } => &poll.plan_id,
            Self::ApprovalDecided { record } => &record.plan_id,
        }
    }
}

#[derive(Debug)]
struct PlanEntry {
    plan: CutoverPlan,
    records: Vec<ExecutionRecord>,
    polls: Vec<HealthPoll>,
    transitions: Vec<StateTransition>,
    approvals: Vec<ApprovalRecord>,
}

impl PlanEntry {
    fn record_mut(&mut self, step_name: &str) -> Result<&mut ExecutionRecord> {
        let plan_id = &self.plan.id;
        self.records
            .iter_mut()
            .find(|r| r.step_name == step_name)
            .ok_or_else(|| Error::Other(format!("no ledger record for step '{step_name}' in {plan_id}")))
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    plans: HashMap<String, PlanEntry>,
    /// Registration order, for listing
    order: Vec<String>,
}

impl LedgerState {
    fn entry_mut(&mut self, plan_id: &str) -> Result<&mut PlanEntry> {
        self.plans
            .get_mut(plan_id)
            .ok_or_else(|| Error::PlanNotFound(plan_id.to_string()))
    }

    fn record(&self, plan_id: &str, step_name: &str) -> Result<&ExecutionRecord> {
        self.plans
            .get(plan_id)
            .ok_or_else(|| Error::PlanNotFound(plan_id.to_string()))?
            .records
            .iter()
            .find(|r| r.step_name == step_name)
            .ok_or_else(|| Error::Other(format!("no ledger record for step '{step_name}' in {plan_id}")))
    }

    /// Reject an event that would break the ledger's rules, without applying it
    fn check(&self, event: &LedgerEvent) -> Result<()> {
        match event {
            LedgerEvent::PlanRegistered { plan } => {
                if self.plans.contains_key(&plan.id) {
                    return Err(Error::Other(format!("plan {} already registered", plan.id)));
                }
            }
            LedgerEvent::StepStarted {
                plan_id, step_name, ..
            } => {
                let entry = self
                    .plans
                    .get(plan_id)
                    .ok_or_else(|| Error::PlanNotFound(plan_id.clone()))?;
                if entry.records.iter().any(|r| &r.step_name == step_name) {
                    return Err(Error::Other(format!(
                        "step '{step_name}' already started in {plan_id}"
                    )));
                }
            }
            LedgerEvent::AttemptAppended { plan_id, result } => {
                self.record(plan_id, &result.step_name)?;
            }
            LedgerEvent::FinalStateSet {
                plan_id,
                step_name,
                final_state,
                ..
            } => {
                let record = self.record(plan_id, step_name)?;
                if !record.final_state.can_move_to(*final_state) {
                    return Err(Error::Other(format!(
                        "step '{step_name}' cannot move from {:?} to {final_state:?}",
                        record.final_state
                    )));
                }
            }
            LedgerEvent::Transition { .. }
            | LedgerEvent::HealthPolled { .. }
            | LedgerEvent::ApprovalDecided { .. } => {
                if !self.plans.contains_key(event.plan_id()) {
                    return Err(Error::PlanNotFound(event.plan_id().to_string()));
                }
            }
        }
        Ok(())
    }

    /// Validate and apply one event
    fn apply(&mut self, event: LedgerEvent) -> Result<()> {
        self.check(&event)?;
        match event {
            LedgerEvent::PlanRegistered { plan } => {
                self.order.push(plan.id.clone());
                self.plans.insert(
                    plan.id.clone(),
                    PlanEntry {
                        plan,
                        records: Vec::new(),
                        polls: Vec::new(),
                        transitions: Vec::new(),
                        approvals: Vec::new(),
                    },
                );
            }
            LedgerEvent::Transition {
                plan_id,
                transition,
                rollback_partial,
            } => {
                let entry = self.entry_mut(&plan_id)?;
                entry.plan.status = transition.to;
                entry.plan.rollback_partial |= rollback_partial;
                entry.transitions.push(transition);
            }
            LedgerEvent::StepStarted {
                plan_id,
                phase_index,
                step_name,
                resource_id,
                action,
                simulated,
                snapshot,
                started_at,
            } => {
                let entry = self.entry_mut(&plan_id)?;
                entry.records.push(ExecutionRecord {
                    plan_id,
                    phase_index,
                    step_name,
                    resource_id,
                    action,
                    action_results: Vec::new(),
                    final_state: FinalState::Pending,
                    snapshot,
                    simulated,
                    started_at,
                    applied_seq: None,
                });
            }
            LedgerEvent::AttemptAppended { plan_id, result } => {
                let entry = self.entry_mut(&plan_id)?;
                entry.record_mut(&result.step_name)?.action_results.push(result);
            }
            LedgerEvent::FinalStateSet {
                plan_id,
                step_name,
                final_state,
                applied_seq,
            } => {
                let entry = self.entry_mut(&plan_id)?;
                let record = entry.record_mut(&step_name)?;
                record.final_state = final_state;
                if applied_seq.is_some() {
                    record.applied_seq = applied_seq;
                }
            }
            LedgerEvent::HealthPolled { poll } => {
                self.entry_mut(&poll.plan_id.clone())?.polls.push(poll);
            }
            LedgerEvent::ApprovalDecided { record } => {
                let entry = self.entry_mut(&record.plan_id.clone())?;
                entry.plan.approval = Some(record.clone());
                entry.approvals.push(record);
            }
        }
        Ok(())
    }
}

/// Append-only ledger of plan execution
#[derive(Debug, Default)]
pub struct Ledger {
    state: Mutex<LedgerState>,
    journal_dir: Option<PathBuf>,
    seq: AtomicU64,
}

impl Ledger {
    /// In-memory ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger that mirrors every event to `<dir>/<plan_id>.jsonl`
    pub fn with_journal(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            journal_dir: Some(dir),
            ..Self::default()
        })
    }

    pub fn journal_dir(&self) -> Option<&Path> {
        self.journal_dir.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn journal_path(dir: &Path, plan_id: &str) -> PathBuf {
        dir.join(format!("{plan_id}.jsonl"))
    }

    /// Append an event to the journal and apply it in memory.
    ///
    /// Rejected events never reach the journal. The state lock is held
    /// across both so journal order matches in-memory order.
    fn commit(&self, event: LedgerEvent) -> Result<()> {
        let mut state = self.lock();
        state.check(&event)?;

        if let Some(dir) = &self.journal_dir {
            let line = serde_json::to_string(&event)?;
            let path = Self::journal_path(dir, event.plan_id());
            let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
            writeln!(file, "{line}")?;
            file.flush()?;
            file.sync_data()?;
        }

        state.apply(event)
    }

    // ========================================================================
    // Writers
    // ========================================================================

    pub fn register_plan(&self, plan: &CutoverPlan) -> Result<()> {
        self.commit(LedgerEvent::PlanRegistered { plan: plan.clone() })
    }

    pub fn record_transition(
        &self,
        plan_id: &str,
        from: PlanState,
        to: PlanState,
        reason: Option<String>,
        rollback_partial: bool,
    ) -> Result<()> {
        self.commit(LedgerEvent::Transition {
            plan_id: plan_id.to_string(),
            transition: StateTransition {
                from,
                to,
                at: Utc::now(),
                reason,
            },
            rollback_partial,
        })
    }

    /// Create the pending record for a step's first attempt
    pub fn begin_step(
        &self,
        plan_id: &str,
        phase_index: usize,
        step: &CutoverStep,
        simulated: bool,
        snapshot: Option<TrafficSnapshot>,
    ) -> Result<()> {
        self.commit(LedgerEvent::StepStarted {
            plan_id: plan_id.to_string(),
            phase_index,
            step_name: step.name.clone(),
            resource_id: step.resource_id.clone(),
            action: step.kind(),
            simulated,
            snapshot,
            started_at: Utc::now(),
        })
    }

    pub fn append_result(&self, plan_id: &str, result: ActionResult) -> Result<()> {
        self.commit(LedgerEvent::AttemptAppended {
            plan_id: plan_id.to_string(),
            result,
        })
    }

    pub fn set_final_state(&self, plan_id: &str, step_name: &str, final_state: FinalState) -> Result<()> {
        let applied_seq =
            (final_state == FinalState::Applied).then(|| self.seq.fetch_add(1, Ordering::SeqCst));
        self.commit(LedgerEvent::FinalStateSet {
            plan_id: plan_id.to_string(),
            step_name: step_name.to_string(),
            final_state,
            applied_seq,
        })
    }

    pub fn record_poll(&self, poll: HealthPoll) -> Result<()> {
        self.commit(LedgerEvent::HealthPolled { poll })
    }

    pub fn record_approval(&self, record: ApprovalRecord) -> Result<()> {
        self.commit(LedgerEvent::ApprovalDecided { record })
    }

    // ========================================================================
    // Readers
    // ========================================================================

    pub fn contains(&self, plan_id: &str) -> bool {
        self.lock().plans.contains_key(plan_id)
    }

    pub fn status(&self, plan_id: &str) -> Result<PlanState> {
        self.lock()
            .plans
            .get(plan_id)
            .map(|e| e.plan.status)
            .ok_or_else(|| Error::PlanNotFound(plan_id.to_string()))
    }

    pub fn plan_ids(&self) -> Vec<String> {
        self.lock().order.clone()
    }

    pub fn records(&self, plan_id: &str) -> Vec<ExecutionRecord> {
        self.lock()
            .plans
            .get(plan_id)
            .map(|e| e.records.clone())
            .unwrap_or_default()
    }

    pub fn record(&self, plan_id: &str, step_name: &str) -> Option<ExecutionRecord> {
        self.lock()
            .plans
            .get(plan_id)
            .and_then(|e| e.records.iter().find(|r| r.step_name == step_name).cloned())
    }

    /// Records currently `applied`, in the order they got there
    pub fn applied_records(&self, plan_id: &str) -> Vec<ExecutionRecord> {
        let mut applied: Vec<ExecutionRecord> = self
            .records(plan_id)
            .into_iter()
            .filter(|r| r.final_state == FinalState::Applied)
            .collect();
        applied.sort_by_key(|r| r.applied_seq.unwrap_or(u64::MAX));
        applied
    }

    pub fn report(&self, plan_id: &str) -> Result<PlanReport> {
        let state = self.lock();
        let entry = state
            .plans
            .get(plan_id)
            .ok_or_else(|| Error::PlanNotFound(plan_id.to_string()))?;

        Ok(PlanReport {
            plan: entry.plan.clone(),
            records: entry.records.clone(),
            health_polls: entry.polls.clone(),
            transitions: entry.transitions.clone(),
            approvals: entry.approvals.clone(),
        })
    }

    // ========================================================================
    // Journal replay
    // ========================================================================

    /// Rebuild a plan from its journal file into this ledger.
    pub fn load(&self, plan_id: &str) -> Result<()> {
        let dir = self
            .journal_dir
            .as_ref()
            .ok_or_else(|| Error::Other("ledger has no journal directory".to_string()))?;
        let path = Self::journal_path(dir, plan_id);
        if !path.exists() {
            return Err(Error::PlanNotFound(plan_id.to_string()));
        }
        self.replay(&path)
    }

    /// Replay every event of a journal file without re-writing it.
    pub fn replay(&self, path: &Path) -> Result<()> {
        let reader = BufReader::new(fs::File::open(path)?);
        let mut state = self.lock();

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event: LedgerEvent = serde_json::from_str(&line)?;
            if let LedgerEvent::FinalStateSet {
                applied_seq: Some(seq),
                ..
            } = &event
            {
                self.seq.fetch_max(seq + 1, Ordering::SeqCst);
            }
            state.apply(event)?;
        }

        log::debug!("Replayed ledger journal {}", path.display());
        Ok(())
    }

    /// Plan ids that have a journal file, sorted
    pub fn journaled_plan_ids(&self) -> Result<Vec<String>> {
        let Some(dir) = &self.journal_dir else {
            return Ok(Vec::new());
        };

        let mut ids = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "jsonl")
                && let Some(stem) = path.file_stem()
            {
                ids.push(stem.to_string_lossy().to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{plan_fixture, step};
    use crate::types::Outcome;

    fn attempt(step_name: &str, attempt: u32, outcome: Outcome) -> ActionResult {
        ActionResult {
            step_name: step_name.to_string(),
            attempt,
            outcome,
            detail: String::new(),
            applied_at: Utc::now(),
            simulated: false,
            inverse: false,
        }
    }

    #[test]
    fn test_records_accumulate_attempts() {
        let ledger = Ledger::new();
        let plan = plan_fixture(vec![step("a", 10)]);
        ledger.register_plan(&plan).unwrap();
        ledger.begin_step(&plan.id, 0, &plan.steps[0], false, None).unwrap();
        ledger
            .append_result(&plan.id, attempt("a", 1, Outcome::ProviderError))
            .unwrap();
        ledger.append_result(&plan.id, attempt("a", 2, Outcome::Ok)).unwrap();
        ledger.set_final_state(&plan.id, "a", FinalState::Applied).unwrap();

        let record = ledger.record(&plan.id, "a").unwrap();
        assert_eq!(record.action_results.len(), 2);
        assert_eq!(record.final_state, FinalState::Applied);
        assert_eq!(record.applied_seq, Some(0));
    }

    #[test]
    fn test_final_state_cannot_be_rewritten() {
        let ledger = Ledger::new();
        let plan = plan_fixture(vec![step("a", 10)]);
        ledger.register_plan(&plan).unwrap();
        ledger.begin_step(&plan.id, 0, &plan.steps[0], false, None).unwrap();
        ledger.set_final_state(&plan.id, "a", FinalState::Failed).unwrap();

        assert!(ledger.set_final_state(&plan.id, "a", FinalState::Applied).is_err());
        assert_eq!(ledger.record(&plan.id, "a").unwrap().final_state, FinalState::Failed);
    }

    #[test]
    fn test_unknown_plan_is_not_found() {
        let ledger = Ledger::new();
        assert!(matches!(ledger.report("plan-missing"), Err(Error::PlanNotFound(_))));
        assert!(matches!(ledger.status("plan-missing"), Err(Error::PlanNotFound(_))));
    }

    #[test]
    fn test_applied_records_in_application_order() {
        let ledger = Ledger::new();
        let plan = plan_fixture(vec![step("a", 10), step("b", 50)]);
        ledger.register_plan(&plan).unwrap();
        ledger.begin_step(&plan.id, 0, &plan.steps[0], false, None).unwrap();
        ledger.begin_step(&plan.id, 0, &plan.steps[1], false, None).unwrap();
        ledger.set_final_state(&plan.id, "b", FinalState::Applied).unwrap();
        ledger.set_final_state(&plan.id, "a", FinalState::Applied).unwrap();

        let names: Vec<String> = ledger
            .applied_records(&plan.id)
            .into_iter()
            .map(|r| r.step_name)
            .collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_concurrent_appends_are_all_kept() {
        let ledger = Ledger::new();
        let plan = plan_fixture(vec![step("a", 10)]);
        ledger.register_plan(&plan).unwrap();
        ledger.begin_step(&plan.id, 0, &plan.steps[0], false, None).unwrap();

        std::thread::scope(|scope| {
            for n in 1..=8 {
                let ledger = &ledger;
                let plan_id = plan.id.as_str();
                scope.spawn(move || {
                    ledger.append_result(plan_id, attempt("a", n, Outcome::Ok)).unwrap();
                });
            }
        });

        assert_eq!(ledger.record(&plan.id, "a").unwrap().action_results.len(), 8);
    }

    #[test]
    fn test_journal_replay_rebuilds_report() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan_fixture(vec![step("a", 10)]);

        {
            let ledger = Ledger::with_journal(dir.path()).unwrap();
            ledger.register_plan(&plan).unwrap();
            ledger
                .record_transition(&plan.id, PlanState::New, PlanState::Validated, None, false)
                .unwrap();
            ledger.begin_step(&plan.id, 0, &plan.steps[0], false, None).unwrap();
            ledger.append_result(&plan.id, attempt("a", 1, Outcome::Ok)).unwrap();
            ledger.set_final_state(&plan.id, "a", FinalState::Applied).unwrap();
        }

        let reopened = Ledger::with_journal(dir.path()).unwrap();
        assert_eq!(reopened.journal_dir(), Some(dir.path()));
        assert_eq!(reopened.journaled_plan_ids().unwrap(), vec![plan.id.clone()]);
        reopened.load(&plan.id).unwrap();

        let report = reopened.report(&plan.id).unwrap();
        assert_eq!(report.plan.status, PlanState::Validated);
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].final_state, FinalState::Applied);
        assert_eq!(report.transitions.len(), 1);
    }

    #[test]
    fn test_rejected_events_stay_out_of_the_journal() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan_fixture(vec![step("a", 10)]);

        {
            let ledger = Ledger::with_journal(dir.path()).unwrap();
            ledger.register_plan(&plan).unwrap();
            ledger.begin_step(&plan.id, 0, &plan.steps[0], false, None).unwrap();
            ledger.set_final_state(&plan.id, "a", FinalState::Failed).unwrap();

            assert!(ledger.set_final_state(&plan.id, "a", FinalState::Applied).is_err());
            assert!(ledger.begin_step(&plan.id, 0, &plan.steps[0], false, None).is_err());
            assert!(matches!(
                ledger.record_poll(HealthPoll {
                    plan_id: "plan-missing".to_string(),
                    phase_index: 0,
                    step_name: "a".to_string(),
                    url: "https://green.example.com/healthz".to_string(),
                    poll: 1,
                    healthy: true,
                    status: Some(200),
                    detail: String::new(),
                    polled_at: Utc::now(),
                    simulated: false,
                }),
                Err(Error::PlanNotFound(_))
            ));
        }

        let path = dir.path().join(format!("{}.jsonl", plan.id));
        let lines = fs::read_to_string(&path).unwrap().lines().count();
        assert_eq!(lines, 3);
        assert!(!dir.path().join("plan-missing.jsonl").exists());

        let reopened = Ledger::with_journal(dir.path()).unwrap();
        reopened.load(&plan.id).unwrap();
        assert_eq!(
            reopened.record(&plan.id, "a").unwrap().final_state,
            FinalState::Failed
        );
    }
}
