use anyhow::{Context as _, Result, anyhow, bail};
use dialoguer::Confirm;
use orchestrator::{ActionKind, CutoverEngine, PlanReport, PlanState, ResourceKind};
use std::sync::Arc;
use std::thread;

use crate::Context;
use crate::cli::ExecuteArgs;
use crate::progress::TerminalProgress;
use crate::{provider, ui};

use super::{load_request, load_settings, open_ledger, print_report};

pub fn run(ctx: &Context, args: ExecuteArgs) -> Result<()> {
    let (_, settings) = load_settings(ctx)?;
    let mut request = load_request(&args.request)?;
    if args.dry_run {
        request.dry_run = true;
    }

    if !request.dry_run {
        let mut kinds: Vec<ResourceKind> = Vec::new();
        for kind in request
            .steps
            .iter()
            .filter_map(|s| s.action.parse::<ActionKind>().ok())
            .map(|k| k.resource_kind())
        {
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        let missing = provider::missing_endpoints(&settings, &kinds);
        if !missing.is_empty() {
            let names: Vec<String> = missing.iter().map(ToString::to_string).collect();
            bail!(
                "No provider endpoint configured for: {} (set [providers] in the config, or use --dry-run)",
                names.join(", ")
            );
        }
    }

    let ledger = Arc::new(open_ledger(&settings)?);
    let engine = CutoverEngine::new(settings.engine_config(), provider::adapters(&settings))
        .with_ledger(ledger);

    let plan = engine.submit(&request)?;
    let plan_id = plan.id.clone();
    let gated = plan.requires_approval;
    if !args.json && !ctx.quiet {
        super::print_plan(&plan);
        println!();
    }

    let mut progress = TerminalProgress::new(ctx.quiet || args.json);
    let report = thread::scope(|s| {
        let worker = s.spawn(|| engine.run(plan, &mut progress));

        if gated && let Err(e) = decide(&engine, &plan_id, &args) {
            // Unblock the worker before surfacing the error
            if let Err(cancel_err) = engine.cancel(&plan_id) {
                log::warn!("Could not cancel {plan_id}: {cancel_err}");
            }
            log::warn!("{}", abandoned_run_note(&plan_id, worker.join()));
            return Err(e);
        }

        worker
            .join()
            .map_err(|_| anyhow!("plan worker panicked"))?
            .map_err(anyhow::Error::from)
    })?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !ctx.quiet {
        print_report(&report, ctx.verbose > 0);
    }

    match report.status() {
        PlanState::Succeeded => {
            if !args.json {
                ui::success(&format!("Cutover {plan_id} succeeded"));
            }
            Ok(())
        }
        status => bail!("Cutover {plan_id} ended {status}"),
    }
}

/// How a worker ended after its approval step failed
fn abandoned_run_note(
    plan_id: &str,
    joined: thread::Result<orchestrator::Result<PlanReport>>,
) -> String {
    match joined {
        Ok(Ok(report)) => format!("Plan {plan_id} stopped {}", report.status()),
        Ok(Err(e)) => format!("Plan {plan_id} worker failed: {e}"),
        Err(_) => format!("Plan {plan_id} worker panicked"),
    }
}

/// Approve or reject a gated plan, asking unless `--yes` was given
fn decide(engine: &CutoverEngine, plan_id: &str, args: &ExecuteArgs) -> Result<()> {
    let approved = if args.yes {
        true
    } else {
        Confirm::new()
            .with_prompt(format!("Plan {plan_id} requires approval. Approve as {}?", args.approver))
            .default(false)
            .interact()
            .context("Approval prompt failed; pass --yes to approve non-interactively")?
    };

    if approved {
        engine.approve(plan_id, &args.approver)?;
    } else {
        engine.reject(plan_id, &args.approver)?;
        ui::warn(&format!("Plan {plan_id} rejected"));
    }
    Ok(())
}
