//! Test doubles shared by the unit tests

use crate::adapter::{ApplyOutcome, HealthResult, TargetAdapter};
use crate::engine::EngineConfig;
use crate::error::{Error, Result};
use crate::health::HealthConfig;
use crate::params::{StepAction, TrafficSnapshot, WeightTrafficShift};
use crate::retry::RetryConfig;
use crate::types::{
    CutoverPlan, CutoverRequest, CutoverStep, Phase, PlanState, RequestStep, Strategy,
};
use chrono::Utc;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

/// How a resource misbehaves
#[derive(Debug, Clone, Copy)]
enum Script {
    /// Transient failure for the first `n` calls
    FailTimes(usize),
    /// Succeeds for the first `n` calls, transient failure afterwards
    FailAfter(usize),
    /// Permanent rejection on every call
    Reject,
    /// Applies the change, then reports a transient failure for the first `n` calls
    LoseResponse(usize),
}

/// One apply call seen by the scripted adapter
#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub resource_id: String,
    pub action: StepAction,
    pub started: Instant,
    pub finished: Instant,
}

/// Adapter whose behavior is scripted per resource and per health URL
#[derive(Default)]
pub(crate) struct ScriptedAdapter {
    scripts: Mutex<HashMap<String, Script>>,
    health: Mutex<HashMap<String, VecDeque<bool>>>,
    snapshots: Mutex<HashMap<String, TrafficSnapshot>>,
    calls: Mutex<Vec<Call>>,
    per_resource: Mutex<HashMap<String, usize>>,
    /// Last absolute percentage set per resource
    weights: Mutex<HashMap<String, u8>>,
    probes: Mutex<Vec<String>>,
    delay: Duration,
}

impl ScriptedAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn fail_times(&self, resource_id: &str, n: usize) {
        self.script(resource_id, Script::FailTimes(n));
    }

    pub fn fail_after(&self, resource_id: &str, ok_calls: usize) {
        self.script(resource_id, Script::FailAfter(ok_calls));
    }

    pub fn reject(&self, resource_id: &str) {
        self.script(resource_id, Script::Reject);
    }

    pub fn lose_response(&self, resource_id: &str, n: usize) {
        self.script(resource_id, Script::LoseResponse(n));
    }

    /// Health answers for a URL, consumed one per probe; the last one repeats
    pub fn health_sequence(&self, url: &str, answers: &[bool]) {
        self.health
            .lock()
            .unwrap()
            .insert(url.to_string(), answers.iter().copied().collect());
    }

    pub fn snapshot_for(&self, resource_id: &str, snapshot: TrafficSnapshot) {
        self.snapshots
            .lock()
            .unwrap()
            .insert(resource_id.to_string(), snapshot);
    }

    fn script(&self, resource_id: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .insert(resource_id.to_string(), script);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, resource_id: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.resource_id == resource_id)
            .collect()
    }

    pub fn probe_count(&self, url: &str) -> usize {
        self.probes.lock().unwrap().iter().filter(|u| *u == url).count()
    }

    pub fn weight(&self, resource_id: &str) -> Option<u8> {
        self.weights.lock().unwrap().get(resource_id).copied()
    }

    fn set_weight(&self, resource_id: &str, action: &StepAction) {
        if let StepAction::WeightTrafficShift(p) = action {
            self.weights
                .lock()
                .unwrap()
                .insert(resource_id.to_string(), p.percentage);
        }
    }
}

impl TargetAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        "scripted"
    }

    fn apply(&self, resource_id: &str, action: &StepAction) -> Result<ApplyOutcome> {
        let started = Instant::now();
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }

        let call_index = {
            let mut counts = self.per_resource.lock().unwrap();
            let count = counts.entry(resource_id.to_string()).or_insert(0);
            *count += 1;
            *count - 1
        };
        let script = self.scripts.lock().unwrap().get(resource_id).copied();

        let result = match script {
            Some(Script::FailTimes(n)) if call_index < n => {
                Err(Error::provider(resource_id, "503 service unavailable"))
            }
            Some(Script::FailAfter(n)) if call_index >= n => {
                Err(Error::provider(resource_id, "503 service unavailable"))
            }
            Some(Script::Reject) => Err(Error::ProviderRejected {
                resource_id: resource_id.to_string(),
                message: "400 bad request".to_string(),
            }),
            Some(Script::LoseResponse(n)) if call_index < n => {
                self.set_weight(resource_id, action);
                Err(Error::Timeout {
                    resource_id: resource_id.to_string(),
                })
            }
            _ => {
                self.set_weight(resource_id, action);
                Ok(ApplyOutcome::new(format!("{} applied", action.kind())))
            }
        };

        self.calls.lock().unwrap().push(Call {
            resource_id: resource_id.to_string(),
            action: action.clone(),
            started,
            finished: Instant::now(),
        });
        result
    }

    fn snapshot(&self, resource_id: &str, _action: &StepAction) -> Result<Option<TrafficSnapshot>> {
        Ok(self.snapshots.lock().unwrap().get(resource_id).cloned())
    }

    fn probe(&self, url: &str) -> Result<HealthResult> {
        self.probes.lock().unwrap().push(url.to_string());
        let mut health = self.health.lock().unwrap();
        let healthy = match health.get_mut(url) {
            Some(answers) if answers.len() > 1 => answers.pop_front().unwrap_or(true),
            Some(answers) => answers.front().copied().unwrap_or(true),
            None => true,
        };

        Ok(if healthy {
            HealthResult::healthy(Some(200))
        } else {
            HealthResult::unhealthy(Some(503), "503 from health endpoint")
        })
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// Millisecond-scale timings so tests stay fast
pub(crate) fn fast_config() -> EngineConfig {
    EngineConfig {
        retry: RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_millis(5),
        },
        health: HealthConfig {
            interval: Duration::from_millis(5),
            timeout: Duration::from_millis(300),
        },
        ..EngineConfig::default()
    }
}

/// A weight_traffic_shift step against `res-<name>`
pub(crate) fn step(name: &str, percentage: u8) -> CutoverStep {
    CutoverStep {
        name: name.to_string(),
        resource_id: format!("res-{name}"),
        action: StepAction::WeightTrafficShift(WeightTrafficShift {
            percentage,
            target_group: None,
        }),
        health_check_url: None,
    }
}

/// A running-ready plan with every step in one phase
pub(crate) fn plan_fixture(steps: Vec<CutoverStep>) -> CutoverPlan {
    let indices = (0..steps.len()).collect();
    CutoverPlan {
        id: "plan-test".to_string(),
        tenant_id: None,
        name: "fixture".to_string(),
        strategy: Strategy::Instant,
        source_env: "blue".to_string(),
        target_env: "green".to_string(),
        steps,
        phases: vec![Phase {
            index: 0,
            steps: indices,
            concurrency: None,
            traffic_percent: None,
        }],
        requires_approval: false,
        dry_run: false,
        status: PlanState::Validated,
        rollback_partial: false,
        approval: None,
        submitted_at: Utc::now(),
    }
}

pub(crate) fn request_step(name: &str, action: &str, parameters: Value) -> RequestStep {
    RequestStep {
        name: name.to_string(),
        resource_id: format!("res-{name}"),
        action: action.to_string(),
        parameters,
        health_check_url: None,
    }
}

/// A weight_traffic_shift request step
pub(crate) fn shift(name: &str, percentage: u8) -> RequestStep {
    request_step(name, "weight_traffic_shift", json!({ "percentage": percentage }))
}

/// A batch_target_update request step
pub(crate) fn batch(name: &str) -> RequestStep {
    request_step(name, "batch_target_update", json!({ "targets": [format!("i-{name}")] }))
}

pub(crate) fn request(strategy: Strategy, steps: Vec<RequestStep>) -> CutoverRequest {
    CutoverRequest {
        tenant_id: Some("tenant-1".to_string()),
        name: format!("{strategy} cutover"),
        strategy,
        source_env: "blue".to_string(),
        target_env: "green".to_string(),
        steps,
        requires_approval: false,
        dry_run: false,
        batch_size: None,
    }
}
