//! Engine facade
//!
//! `CutoverEngine` owns the ledger, the approval gate and the adapters,
//! and hands each submitted plan to its own scheduler.

use crate::adapter::AdapterSet;
use crate::approval::ApprovalGate;
use crate::compiler::{CompilerOptions, compile};
use crate::context::ProgressCallback;
use crate::error::{Error, Result};
use crate::health::HealthConfig;
use crate::ledger::Ledger;
use crate::retry::RetryConfig;
use crate::scheduler::Scheduler;
use crate::types::{ApprovalRecord, CutoverPlan, CutoverRequest, PlanReport, PlanState};
use std::sync::Arc;

/// Tunables for every plan run by an engine
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub retry: RetryConfig,
    pub health: HealthConfig,
    pub compiler: CompilerOptions,
}

pub struct CutoverEngine {
    config: EngineConfig,
    adapters: AdapterSet,
    simulated: AdapterSet,
    ledger: Arc<Ledger>,
    gate: ApprovalGate,
}

impl CutoverEngine {
    /// Engine with an in-memory ledger
    pub fn new(config: EngineConfig, adapters: AdapterSet) -> Self {
        Self {
            config,
            adapters,
            simulated: AdapterSet::simulated(),
            ledger: Arc::new(Ledger::new()),
            gate: ApprovalGate::new(),
        }
    }

    pub fn with_ledger(mut self, ledger: Arc<Ledger>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Compile a request and register the plan. Nothing is applied.
    pub fn submit(&self, request: &CutoverRequest) -> Result<CutoverPlan> {
        let mut plan = compile(request, &self.config.compiler)?;
        if self.ledger.contains(&plan.id) {
            return Err(Error::validation(format!("plan {} already exists", plan.id)));
        }

        plan.status = PlanState::New;
        self.ledger.register_plan(&plan)?;
        self.ledger.record_transition(
            &plan.id,
            PlanState::New,
            PlanState::Validated,
            Some(format!("{} phase(s) compiled", plan.phases.len())),
            false,
        )?;
        plan.status = PlanState::Validated;
        self.gate.register(&plan.id, plan.requires_approval);

        log::info!(
            "Submitted {} ({}, {} step(s), {} phase(s){})",
            plan.id,
            plan.strategy,
            plan.steps.len(),
            plan.phases.len(),
            if plan.dry_run { ", dry run" } else { "" }
        );
        Ok(plan)
    }

    /// Run a submitted plan to a terminal state on the calling thread.
    ///
    /// Blocks while the plan awaits approval; decide it from another
    /// thread with [`approve`](Self::approve) or [`reject`](Self::reject).
    pub fn run(&self, plan: CutoverPlan, progress: &mut dyn ProgressCallback) -> Result<PlanReport> {
        self.gate.claim(&plan.id)?;
        let plan_id = plan.id.clone();
        let adapters = if plan.dry_run {
            &self.simulated
        } else {
            &self.adapters
        };

        let finished = Scheduler::new(
            plan,
            adapters,
            &self.ledger,
            &self.gate,
            &self.config.retry,
            &self.config.health,
        )
        .run(progress);

        match finished {
            Ok(plan) => {
                log::info!("Plan {} finished {}", plan.id, plan.status);
                self.ledger.report(&plan_id)
            }
            Err(e) => {
                self.gate.close(&plan_id);
                Err(e)
            }
        }
    }

    /// Submit and run in one call
    pub fn execute(
        &self,
        request: &CutoverRequest,
        progress: &mut dyn ProgressCallback,
    ) -> Result<PlanReport> {
        let plan = self.submit(request)?;
        self.run(plan, progress)
    }

    pub fn approve(&self, plan_id: &str, approver: &str) -> Result<ApprovalRecord> {
        self.decide(plan_id, approver, true)
    }

    pub fn reject(&self, plan_id: &str, approver: &str) -> Result<ApprovalRecord> {
        self.decide(plan_id, approver, false)
    }

    fn decide(&self, plan_id: &str, approver: &str, approved: bool) -> Result<ApprovalRecord> {
        match self.gate.decide(plan_id, approver, approved) {
            // Plans replayed from a journal are known to the ledger only
            Err(Error::PlanNotFound(_)) if self.ledger.status(plan_id).is_ok_and(|s| s.is_terminal()) => {
                Err(Error::ApprovalRequired {
                    plan_id: plan_id.to_string(),
                    reason: "plan already terminal".to_string(),
                })
            }
            other => other,
        }
    }

    /// Ask a plan to stop. Steps not yet issued are never issued; if any
    /// step is already applied the plan rolls back.
    pub fn cancel(&self, plan_id: &str) -> Result<()> {
        self.gate.cancel(plan_id)
    }

    pub fn status(&self, plan_id: &str) -> Result<PlanState> {
        self.ledger.status(plan_id)
    }

    pub fn report(&self, plan_id: &str) -> Result<PlanReport> {
        self.ledger.report(plan_id)
    }
}
