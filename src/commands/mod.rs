pub mod config;
pub mod execute;
pub mod list;
pub mod plan;
pub mod show;

use anyhow::{Context as _, Result};
use colored::Colorize;
use orchestrator::{CutoverPlan, CutoverRequest, Ledger, PlanReport};
use std::fs;
use std::path::{Path, PathBuf};

use crate::Context;
use crate::config::Settings;
use crate::{paths, ui};

// ============================================================================
// Shared Loading
// ============================================================================

/// Effective settings and the path they were read from
pub fn load_settings(ctx: &Context) -> Result<(PathBuf, Settings)> {
    let path = paths::config_file(ctx.config.as_deref())?;
    let settings = Settings::load(&path)?;
    Ok((path, settings))
}

pub fn load_request(path: &Path) -> Result<CutoverRequest> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Could not read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid cutover request in {}", path.display()))
}

/// Ledger backed by the journal directory from `settings`
pub fn open_ledger(settings: &Settings) -> Result<Ledger> {
    let dir = settings.ledger_dir()?;
    Ledger::with_journal(&dir)
        .with_context(|| format!("Could not open ledger journal at {}", dir.display()))
}

// ============================================================================
// Rendering
// ============================================================================

pub fn print_plan(plan: &CutoverPlan) {
    ui::header(&format!("Plan {}", plan.id));
    ui::kv("Name", &plan.name);
    if let Some(tenant) = &plan.tenant_id {
        ui::kv("Tenant", tenant);
    }
    ui::kv("Strategy", plan.strategy.as_str());
    ui::kv(
        "Traffic",
        &format!("{} → {}", plan.source_env, plan.target_env),
    );
    if plan.requires_approval {
        ui::kv("Approval", "required");
    }
    if plan.dry_run {
        ui::kv("Mode", "dry run");
    }

    ui::section("Phases");
    for phase in &plan.phases {
        let workers = phase
            .concurrency
            .map_or_else(|| "all".to_string(), |c| c.to_string());
        println!(
            "  {} traffic {}, concurrency {}",
            format!("[{}]", phase.index + 1).blue().bold(),
            ui::percent(phase.traffic_percent),
            workers
        );
        for step in plan.phase_steps(phase) {
            let health = step
                .health_check_url
                .as_deref()
                .map(|u| format!("  health {u}"))
                .unwrap_or_default();
            println!(
                "      {} {} on {}{}",
                step.name.bold(),
                step.kind().as_str().dimmed(),
                step.resource_id,
                health.dimmed()
            );
        }
    }
}

/// Print a full report; `detailed` adds every attempt
pub fn print_report(report: &PlanReport, detailed: bool) {
    let plan = &report.plan;
    print_plan(plan);

    ui::section("Steps");
    if report.records.is_empty() {
        ui::dim("no steps were issued");
    }
    for record in &report.records {
        let polls = report.polls_for(&record.step_name).len();
        println!(
            "  {} {} {}{}",
            ui::final_state(record.final_state),
            record.step_name.bold(),
            format!(
                "{} forward, {} inverse",
                record.forward_results().count(),
                record.inverse_results().count()
            )
            .dimmed(),
            if polls > 0 {
                format!(", {polls} health poll(s)").dimmed().to_string()
            } else {
                String::new()
            }
        );
        if !detailed {
            continue;
        }
        for result in &record.action_results {
            let kind = if result.inverse { "inverse" } else { "attempt" };
            println!(
                "      {} {kind} {} {}",
                ui::outcome_mark(result.outcome),
                result.attempt,
                ui::truncate(&result.detail, 72).dimmed()
            );
        }
    }

    ui::section("Transitions");
    for t in &report.transitions {
        let reason = t
            .reason
            .as_deref()
            .map(|r| format!("  ({r})"))
            .unwrap_or_default();
        println!(
            "  {} {} → {}{}",
            t.at.format("%H:%M:%S").to_string().dimmed(),
            ui::plan_state(t.from),
            ui::plan_state(t.to),
            reason.dimmed()
        );
    }

    if !report.approvals.is_empty() {
        ui::section("Approvals");
        for approval in &report.approvals {
            let verdict = if approval.approved {
                "approved".green()
            } else {
                "rejected".red()
            };
            println!(
                "  {} {verdict} by {}",
                approval.decided_at.format("%H:%M:%S").to_string().dimmed(),
                approval.approver.bold()
            );
        }
    }

    println!();
    ui::kv("Status", &ui::plan_state(plan.status).to_string());
    if plan.rollback_partial {
        ui::warn("Rollback was partial: some steps are still applied");
    }
}
