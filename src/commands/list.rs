use anyhow::Result;
use colored::Colorize;

use crate::Context;
use crate::ui;

use super::{load_settings, open_ledger};

pub fn run(ctx: &Context) -> Result<()> {
    let (_, settings) = load_settings(ctx)?;
    let ledger = open_ledger(&settings)?;
    let ids = ledger.journaled_plan_ids()?;

    if ids.is_empty() {
        ui::info("No plans in the ledger journal");
        return Ok(());
    }

    ui::header("Plans");
    for id in &ids {
        if let Err(e) = ledger.load(id) {
            log::warn!("Skipping unreadable journal for {id}: {e}");
            println!("  {} {}", id, "unreadable".red());
            continue;
        }
        let Ok(report) = ledger.report(id) else {
            continue;
        };
        let plan = &report.plan;
        println!(
            "  {}  {}  {:<10}  {:<32}  {}",
            id.bold(),
            plan.submitted_at
                .format("%Y-%m-%d %H:%M")
                .to_string()
                .dimmed(),
            plan.strategy.as_str(),
            ui::truncate(&plan.name, 32),
            ui::plan_state(plan.status)
        );
    }

    if !ctx.quiet
        && let Some(dir) = ledger.journal_dir()
    {
        println!();
        ui::dim(&format!("{} plan(s) in {}", ids.len(), dir.display()));
    }
    Ok(())
}
