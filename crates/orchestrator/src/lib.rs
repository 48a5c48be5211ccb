//! # Orchestrator
//!
//! Traffic cutover between two environments across DNS and load-balancer
//! resources, one phase at a time.
//!
//! A [`CutoverRequest`] is compiled into a [`CutoverPlan`] whose steps are
//! grouped into phases by the chosen [`Strategy`]. The engine applies each
//! phase through a [`TargetAdapter`], waits for the phase's health
//! endpoints, and rolls applied steps back in reverse order when a step
//! fails, health never arrives, or the plan is cancelled mid-flight.
//! Every attempt, poll and transition lands in the [`Ledger`].
//!
//! ## Core Concepts
//!
//! - **Plan Compiler**: validates a request and groups steps into phases
//! - **Scheduler**: owns the plan state machine and drives phases
//! - **Step Executor**: applies steps with retry, bounded by phase concurrency
//! - **Health Gate**: polls health URLs until healthy or the window closes
//! - **Rollback Controller**: applies inverse actions, newest first
//! - **Approval Gate**: parks gated plans until an approver decides
//!
//! ## Example
//!
//! ```no_run
//! use orchestrator::{AdapterSet, CutoverEngine, EngineConfig, NoProgress, NoopAdapter};
//! use std::sync::Arc;
//!
//! let engine = CutoverEngine::new(
//!     EngineConfig::default(),
//!     AdapterSet::uniform(Arc::new(NoopAdapter)),
//! );
//!
//! let request = serde_json::from_str(r#"{
//!     "name": "green rollout",
//!     "strategy": "canary",
//!     "source_env": "blue",
//!     "target_env": "green",
//!     "steps": [
//!         {"name": "canary", "resource_id": "lb-1", "action": "weight_traffic_shift",
//!          "parameters": {"percentage": 10}},
//!         {"name": "full", "resource_id": "lb-1", "action": "weight_traffic_shift",
//!          "parameters": {"percentage": 100}}
//!     ]
//! }"#).unwrap();
//!
//! let report = engine.execute(&request, &mut NoProgress).unwrap();
//! println!("{}: {}", report.plan.id, report.status());
//! ```
//!
//! ## Provider Traits
//!
//! - [`TargetAdapter`]: applies actions, snapshots weights, probes health
//! - [`ProgressCallback`]: receives progress updates on the plan worker

pub mod adapter;
pub mod approval;
pub mod compiler;
pub mod context;
pub mod engine;
pub mod error;
pub mod executor;
pub mod health;
pub mod ledger;
pub mod params;
pub mod retry;
pub mod rollback;
pub mod scheduler;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export main types at crate root
pub use adapter::{AdapterSet, ApplyOutcome, HealthResult, NoopAdapter, TargetAdapter};
pub use approval::{ApprovalGate, Decision};
pub use compiler::{CompilerOptions, compile, is_compatible};
pub use context::{NoProgress, ProgressCallback};
pub use engine::{CutoverEngine, EngineConfig};
pub use error::{Error, ErrorCategory, Result};
pub use health::HealthConfig;
pub use ledger::Ledger;
pub use params::{ActionKind, ResourceKind, StepAction, TargetWeight, TrafficSnapshot};
pub use retry::RetryConfig;
pub use types::{
    ActionResult, ApprovalRecord, CutoverPlan, CutoverRequest, CutoverStep, ExecutionRecord,
    FinalState, HealthPoll, Outcome, Phase, PlanReport, PlanState, RequestStep, StateTransition,
    Strategy,
};
