//! Approval gate
//!
//! Holds a plan worker until an approver decides or the plan is
//! cancelled. Decisions arrive from other threads; the waiting worker is
//! woken through a condition variable.

use crate::error::{Error, Result};
use crate::types::ApprovalRecord;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard};

/// What the waiting plan worker is told
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Approved(ApprovalRecord),
    Rejected(ApprovalRecord),
    Cancelled,
}

#[derive(Debug, Default)]
struct Slot {
    requires_approval: bool,
    decision: Option<ApprovalRecord>,
    cancelled: bool,
    terminal: bool,
    claimed: bool,
}

/// Per-plan approval and cancellation signals
#[derive(Debug, Default)]
pub struct ApprovalGate {
    slots: Mutex<HashMap<String, Slot>>,
    signal: Condvar,
}

impl ApprovalGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn register(&self, plan_id: &str, requires_approval: bool) {
        self.lock().insert(
            plan_id.to_string(),
            Slot {
                requires_approval,
                ..Slot::default()
            },
        );
    }

    /// Record an approver's decision and wake the waiting worker.
    pub fn decide(&self, plan_id: &str, approver: &str, approved: bool) -> Result<ApprovalRecord> {
        let mut slots = self.lock();
        let slot = slots
            .get_mut(plan_id)
            .ok_or_else(|| Error::PlanNotFound(plan_id.to_string()))?;

        let refuse = |reason: &str| Error::ApprovalRequired {
            plan_id: plan_id.to_string(),
            reason: reason.to_string(),
        };
        if slot.terminal || slot.cancelled {
            return Err(refuse("plan already terminal"));
        }
        if !slot.requires_approval {
            return Err(refuse("plan does not require approval"));
        }
        if slot.decision.is_some() {
            return Err(refuse("approval already decided"));
        }

        let record = ApprovalRecord {
            plan_id: plan_id.to_string(),
            approver: approver.to_string(),
            approved,
            decided_at: Utc::now(),
        };
        slot.decision = Some(record.clone());
        drop(slots);

        log::info!(
            "Plan {plan_id} {} by {approver}",
            if approved { "approved" } else { "rejected" }
        );
        self.signal.notify_all();
        Ok(record)
    }

    pub fn approve(&self, plan_id: &str, approver: &str) -> Result<ApprovalRecord> {
        self.decide(plan_id, approver, true)
    }

    pub fn reject(&self, plan_id: &str, approver: &str) -> Result<ApprovalRecord> {
        self.decide(plan_id, approver, false)
    }

    /// Request cancellation. The plan worker observes it at its next
    /// checkpoint.
    pub fn cancel(&self, plan_id: &str) -> Result<()> {
        let mut slots = self.lock();
        let slot = slots
            .get_mut(plan_id)
            .ok_or_else(|| Error::PlanNotFound(plan_id.to_string()))?;
        if slot.terminal {
            return Err(Error::Other(format!("plan {plan_id} is already terminal")));
        }
        slot.cancelled = true;
        drop(slots);

        log::info!("Cancellation requested for {plan_id}");
        self.signal.notify_all();
        Ok(())
    }

    pub fn is_cancelled(&self, plan_id: &str) -> bool {
        self.lock().get(plan_id).is_some_and(|s| s.cancelled)
    }

    /// Block until the plan is decided or cancelled.
    pub fn wait(&self, plan_id: &str) -> Result<Decision> {
        let mut slots = self.lock();
        loop {
            let slot = slots
                .get(plan_id)
                .ok_or_else(|| Error::PlanNotFound(plan_id.to_string()))?;

            if slot.cancelled {
                return Ok(Decision::Cancelled);
            }
            match &slot.decision {
                Some(record) if record.approved => return Ok(Decision::Approved(record.clone())),
                Some(record) => return Ok(Decision::Rejected(record.clone())),
                None => {}
            }

            slots = match self.signal.wait(slots) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Mark a plan as being run. A plan can be claimed once.
    pub fn claim(&self, plan_id: &str) -> Result<()> {
        let mut slots = self.lock();
        let slot = slots
            .get_mut(plan_id)
            .ok_or_else(|| Error::PlanNotFound(plan_id.to_string()))?;
        if slot.claimed || slot.terminal {
            return Err(Error::Other(format!("plan {plan_id} has already been run")));
        }
        slot.claimed = true;
        Ok(())
    }

    /// Mark a plan terminal; later decisions and cancels are refused.
    pub fn close(&self, plan_id: &str) {
        if let Some(slot) = self.lock().get_mut(plan_id) {
            slot.terminal = true;
        }
        self.signal.notify_all();
    }
}
