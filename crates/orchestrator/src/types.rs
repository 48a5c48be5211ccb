//! Core types for cutover orchestration

use crate::params::{ActionKind, StepAction, TrafficSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Request
// ============================================================================

/// Rollout shape selected by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    BlueGreen,
    Weighted,
    Canary,
    Batched,
    Instant,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BlueGreen => "blue_green",
            Self::Weighted => "weighted",
            Self::Canary => "canary",
            Self::Batched => "batched",
            Self::Instant => "instant",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blue_green" => Ok(Self::BlueGreen),
            "weighted" => Ok(Self::Weighted),
            "canary" => Ok(Self::Canary),
            "batched" => Ok(Self::Batched),
            "instant" => Ok(Self::Instant),
            other => Err(format!("unknown strategy '{other}'")),
        }
    }
}

/// A step as submitted, before parameter parsing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestStep {
    pub name: String,
    pub resource_id: String,
    pub action: String,
    #[serde(default = "empty_object")]
    pub parameters: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_url: Option<String>,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// A fully-formed plan submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CutoverRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub name: String,
    pub strategy: Strategy,
    pub source_env: String,
    pub target_env: String,
    pub steps: Vec<RequestStep>,
    /// Set when the plan must wait for an explicit approval before applying
    #[serde(default)]
    pub requires_approval: bool,
    /// Route every apply to the no-op adapter
    #[serde(default)]
    pub dry_run: bool,
    /// Phase size for the batched strategy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
}

// ============================================================================
// Compiled plan
// ============================================================================

/// A validated, strongly-typed step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CutoverStep {
    pub name: String,
    pub resource_id: String,
    pub action: StepAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_url: Option<String>,
}

impl CutoverStep {
    pub fn kind(&self) -> ActionKind {
        self.action.kind()
    }
}

/// Steps the compiler grouped to run together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    pub index: usize,
    /// Indices into `CutoverPlan::steps`
    pub steps: Vec<usize>,
    /// Maximum steps in flight; `None` means all at once
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    /// Traffic percentage on the target once this phase is applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traffic_percent: Option<u8>,
}

impl Phase {
    /// Worker count for this phase
    pub fn workers(&self) -> usize {
        self.concurrency
            .unwrap_or(self.steps.len())
            .clamp(1, self.steps.len().max(1))
    }
}

/// Plan lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanState {
    New,
    Validated,
    AwaitingApproval,
    Running,
    HealthChecking,
    Succeeded,
    Failed,
    RollingBack,
    RolledBack,
    Cancelled,
}

impl PlanState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::RolledBack | Self::Cancelled
        )
    }

    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(&self, next: PlanState) -> bool {
        use PlanState::{
            AwaitingApproval, Cancelled, Failed, HealthChecking, New, RolledBack, RollingBack,
            Running, Succeeded, Validated,
        };

        matches!(
            (self, next),
            (New, Validated)
                | (Validated, AwaitingApproval | Running | Cancelled)
                | (AwaitingApproval, Running | Cancelled)
                | (Running, HealthChecking | RollingBack | Cancelled)
                | (HealthChecking, Running | RollingBack | Succeeded)
                | (RollingBack, RolledBack | Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Validated => "VALIDATED",
            Self::AwaitingApproval => "AWAITING_APPROVAL",
            Self::Running => "RUNNING",
            Self::HealthChecking => "HEALTH_CHECKING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::RollingBack => "ROLLING_BACK",
            Self::RolledBack => "ROLLED_BACK",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for PlanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A compiled cutover plan
///
/// Only `status`, `rollback_partial` and `approval` change after the plan
/// starts running, and only the scheduler changes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CutoverPlan {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub name: String,
    pub strategy: Strategy,
    pub source_env: String,
    pub target_env: String,
    pub steps: Vec<CutoverStep>,
    pub phases: Vec<Phase>,
    pub requires_approval: bool,
    pub dry_run: bool,
    pub status: PlanState,
    #[serde(default)]
    pub rollback_partial: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalRecord>,
    pub submitted_at: DateTime<Utc>,
}

impl CutoverPlan {
    /// Steps of one phase, in compiler order
    pub fn phase_steps(&self, phase: &Phase) -> Vec<&CutoverStep> {
        phase
            .steps
            .iter()
            .filter_map(|&i| self.steps.get(i))
            .collect()
    }
}

// ============================================================================
// Ledger entries
// ============================================================================

/// Result of one adapter call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ok,
    ProviderError,
    Timeout,
}

/// One attempt at applying (or reverting) a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub step_name: String,
    pub attempt: u32,
    pub outcome: Outcome,
    pub detail: String,
    pub applied_at: DateTime<Utc>,
    /// Produced by the dry-run adapter
    #[serde(default)]
    pub simulated: bool,
    /// Produced while rolling back
    #[serde(default)]
    pub inverse: bool,
}

impl ActionResult {
    pub fn is_ok(&self) -> bool {
        self.outcome == Outcome::Ok
    }
}

/// Where a step ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalState {
    Pending,
    Applied,
    RolledBack,
    Failed,
}

impl FinalState {
    /// Legal final-state moves; `Pending` is the only state left more than once
    pub fn can_move_to(&self, next: FinalState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Applied | Self::Failed) | (Self::Applied, Self::RolledBack)
        )
    }
}

/// Ledger entry for one step of one plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub plan_id: String,
    pub phase_index: usize,
    pub step_name: String,
    pub resource_id: String,
    pub action: ActionKind,
    pub action_results: Vec<ActionResult>,
    pub final_state: FinalState,
    /// Weights seen on the resource before the step ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<TrafficSnapshot>,
    #[serde(default)]
    pub simulated: bool,
    pub started_at: DateTime<Utc>,
    /// Order in which steps reached `applied` across the whole plan
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_seq: Option<u64>,
}

impl ExecutionRecord {
    pub fn forward_results(&self) -> impl Iterator<Item = &ActionResult> {
        self.action_results.iter().filter(|r| !r.inverse)
    }

    pub fn inverse_results(&self) -> impl Iterator<Item = &ActionResult> {
        self.action_results.iter().filter(|r| r.inverse)
    }
}

/// One health endpoint poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthPoll {
    pub plan_id: String,
    pub phase_index: usize,
    pub step_name: String,
    pub url: String,
    /// 1-indexed poll number for this step
    pub poll: u32,
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub detail: String,
    pub polled_at: DateTime<Utc>,
    #[serde(default)]
    pub simulated: bool,
}

/// An external approve or reject decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub plan_id: String,
    pub approver: String,
    pub approved: bool,
    pub decided_at: DateTime<Utc>,
}

/// A recorded plan state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: PlanState,
    pub to: PlanState,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Everything known about a plan: what the API hands back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanReport {
    pub plan: CutoverPlan,
    pub records: Vec<ExecutionRecord>,
    #[serde(default)]
    pub health_polls: Vec<HealthPoll>,
    #[serde(default)]
    pub transitions: Vec<StateTransition>,
    /// Every approval decision, oldest first
    #[serde(default)]
    pub approvals: Vec<ApprovalRecord>,
}

impl PlanReport {
    pub fn status(&self) -> PlanState {
        self.plan.status
    }

    pub fn record(&self, step_name: &str) -> Option<&ExecutionRecord> {
        self.records.iter().find(|r| r.step_name == step_name)
    }

    pub fn polls_for(&self, step_name: &str) -> Vec<&HealthPoll> {
        self.health_polls
            .iter()
            .filter(|p| p.step_name == step_name)
            .collect()
    }
}
