//! Plan compiler - validates a request and groups its steps into phases

use crate::error::{Error, Result};
use crate::params::{ActionKind, StepAction};
use crate::types::{CutoverPlan, CutoverRequest, CutoverStep, Phase, PlanState, Strategy};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Compiler knobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerOptions {
    /// Highest traffic percentage a canary's first phase may send
    pub canary_ceiling: u8,
    /// Phase size for `batched` when the request does not set one
    pub default_batch_size: usize,
    /// Reject actions that do not fit the strategy
    pub strict_compatibility: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            canary_ceiling: 10,
            default_batch_size: 1,
            strict_compatibility: true,
        }
    }
}

/// Validate a request and compile it into a plan in state `VALIDATED`.
///
/// Nothing is registered anywhere; a failure leaves no trace.
pub fn compile(request: &CutoverRequest, options: &CompilerOptions) -> Result<CutoverPlan> {
    check_envelope(request)?;

    let mut steps = request
        .steps
        .iter()
        .map(|raw| {
            let kind: ActionKind = raw
                .action
                .parse()
                .map_err(|e: String| Error::validation(format!("step '{}': {e}", raw.name)))?;
            let action = StepAction::parse(kind, &raw.parameters)
                .map_err(|e| Error::validation(format!("step '{}': {e}", raw.name)))?;

            Ok(CutoverStep {
                name: raw.name.clone(),
                resource_id: raw.resource_id.clone(),
                action,
                health_check_url: raw.health_check_url.clone(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    if options.strict_compatibility {
        check_compatibility(request.strategy, &steps)?;
    }

    let phases = match request.strategy {
        Strategy::Instant => vec![Phase {
            index: 0,
            steps: (0..steps.len()).collect(),
            concurrency: None,
            traffic_percent: None,
        }],
        Strategy::BlueGreen => (0..steps.len())
            .map(|i| Phase {
                index: i,
                steps: vec![i],
                concurrency: Some(1),
                traffic_percent: None,
            })
            .collect(),
        Strategy::Batched => {
            let batch_size = request.batch_size.unwrap_or(options.default_batch_size);
            batched_phases(steps.len(), batch_size)?
        }
        Strategy::Weighted | Strategy::Canary => {
            incremental_phases(request, &mut steps, options)?
        }
    };

    let submitted_at = Utc::now();
    let plan = CutoverPlan {
        id: plan_id(request, submitted_at),
        tenant_id: request.tenant_id.clone(),
        name: request.name.clone(),
        strategy: request.strategy,
        source_env: request.source_env.clone(),
        target_env: request.target_env.clone(),
        steps,
        phases,
        requires_approval: request.requires_approval,
        dry_run: request.dry_run,
        status: PlanState::Validated,
        rollback_partial: false,
        approval: None,
        submitted_at,
    };

    log::debug!(
        "Compiled {} ({}) into {} phases",
        plan.id,
        plan.strategy,
        plan.phases.len()
    );
    Ok(plan)
}

/// Request-level checks that do not need parsed parameters
fn check_envelope(request: &CutoverRequest) -> Result<()> {
    if request.name.trim().is_empty() {
        return Err(Error::validation("plan name must not be empty"));
    }
    if request.source_env.trim().is_empty() || request.target_env.trim().is_empty() {
        return Err(Error::validation("source_env and target_env are required"));
    }
    if request.source_env == request.target_env {
        return Err(Error::validation(format!(
            "source_env and target_env are both '{}'",
            request.source_env
        )));
    }
    if request.steps.is_empty() {
        return Err(Error::validation("plan has no steps"));
    }

    let mut names = HashSet::new();
    for step in &request.steps {
        if step.name.trim().is_empty() {
            return Err(Error::validation("every step needs a name"));
        }
        if !names.insert(step.name.as_str()) {
            return Err(Error::validation(format!("duplicate step name '{}'", step.name)));
        }
        if step.resource_id.trim().is_empty() {
            return Err(Error::validation(format!(
                "step '{}': resource_id must not be empty",
                step.name
            )));
        }
        if let Some(url) = &step.health_check_url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            return Err(Error::validation(format!(
                "step '{}': health_check_url must be http(s), got '{url}'",
                step.name
            )));
        }
    }
    Ok(())
}

/// Whether an action makes sense under a strategy
pub fn is_compatible(strategy: Strategy, kind: ActionKind) -> bool {
    match strategy {
        Strategy::Instant => true,
        Strategy::BlueGreen => kind != ActionKind::WeightTrafficShift,
        Strategy::Weighted | Strategy::Canary => kind.is_weighted() || kind.is_health_check(),
        Strategy::Batched => kind.is_batch() || kind.is_health_check(),
    }
}

fn check_compatibility(strategy: Strategy, steps: &[CutoverStep]) -> Result<()> {
    if let Some(step) = steps.iter().find(|s| !is_compatible(strategy, s.kind())) {
        return Err(Error::validation(format!(
            "step '{}': action {} is not compatible with strategy {strategy}",
            step.name,
            step.kind()
        )));
    }
    Ok(())
}

fn batched_phases(step_count: usize, batch_size: usize) -> Result<Vec<Phase>> {
    if batch_size == 0 {
        return Err(Error::validation("batch_size must be at least 1"));
    }

    let indices: Vec<usize> = (0..step_count).collect();
    Ok(indices
        .chunks(batch_size)
        .enumerate()
        .map(|(index, chunk)| Phase {
            index,
            steps: chunk.to_vec(),
            concurrency: Some(batch_size),
            traffic_percent: None,
        })
        .collect())
}

/// Weighted and canary: one phase per weight increment, ascending.
///
/// Health-check steps ride along with the weighted step before them (or
/// the first one, if they lead the list). Increments come from the steps'
/// declared percentages; when no step declares one they are spread evenly
/// up to 100 and written into each weighted step's action.
fn incremental_phases(
    request: &CutoverRequest,
    steps: &mut [CutoverStep],
    options: &CompilerOptions,
) -> Result<Vec<Phase>> {
    let strategy = request.strategy;
    let target_env = request.target_env.as_str();
    let mut groups: Vec<(Option<u8>, Vec<usize>)> = Vec::new();
    let mut leading_checks = Vec::new();

    for (i, step) in steps.iter().enumerate() {
        if step.kind().is_health_check() {
            match groups.last_mut() {
                Some((_, members)) => members.push(i),
                None => leading_checks.push(i),
            }
        } else {
            groups.push((step.action.traffic_weight(target_env), vec![i]));
        }
    }

    if groups.is_empty() {
        return Err(Error::validation(format!(
            "{strategy} needs at least one weighted step"
        )));
    }
    groups[0].1.extend(leading_checks);

    let declared = groups.iter().filter(|(w, _)| w.is_some()).count();
    let count = groups.len();
    let mut weighted: Vec<(u8, Vec<usize>)> = if declared == count {
        groups
            .into_iter()
            .map(|(w, members)| (w.unwrap_or_default(), members))
            .collect()
    } else if declared == 0 {
        let inferred: Vec<(u8, Vec<usize>)> = groups
            .into_iter()
            .enumerate()
            .map(|(k, (_, members))| (((k + 1) * 100 / count) as u8, members))
            .collect();
        // The weighted step leads each group
        for (weight, members) in &inferred {
            steps[members[0]]
                .action
                .set_traffic_weight(&request.source_env, target_env, *weight);
        }
        inferred
    } else {
        return Err(Error::validation(format!(
            "{strategy}: either every weighted step declares a percentage for '{target_env}' or none does"
        )));
    };

    weighted.sort_by_key(|(w, _)| *w);
    if let Some(pair) = weighted.windows(2).find(|pair| pair[0].0 == pair[1].0) {
        return Err(Error::validation(format!(
            "{strategy}: two phases both send {}% of traffic",
            pair[0].0
        )));
    }

    if strategy == Strategy::Canary {
        check_canary(&weighted, options.canary_ceiling)?;
    }

    Ok(weighted
        .into_iter()
        .enumerate()
        .map(|(index, (weight, members))| Phase {
            index,
            steps: members,
            concurrency: None,
            traffic_percent: Some(weight),
        })
        .collect())
}

fn check_canary(weighted: &[(u8, Vec<usize>)], ceiling: u8) -> Result<()> {
    if weighted.len() < 2 {
        return Err(Error::validation(
            "canary needs a canary phase and a final 100% phase",
        ));
    }
    let first = weighted[0].0;
    if first > ceiling {
        return Err(Error::validation(format!(
            "canary phase sends {first}% of traffic, above the {ceiling}% ceiling"
        )));
    }
    let last = weighted[weighted.len() - 1].0;
    if last != 100 {
        return Err(Error::validation(format!(
            "canary must finish at 100%, last phase sends {last}%"
        )));
    }
    Ok(())
}

/// `plan-` plus 12 hex chars of a hash over the request and submission time
fn plan_id(request: &CutoverRequest, submitted_at: DateTime<Utc>) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&serde_json::to_vec(request).unwrap_or_default());
    hasher.update(
        &submitted_at
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .to_le_bytes(),
    );
    let hex = hasher.finalize().to_hex();
    format!("plan-{}", &hex.as_str()[..12])
}
