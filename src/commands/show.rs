use anyhow::{Context as _, Result};

use crate::Context;

use super::{load_settings, open_ledger, print_report};

/// Rebuild a plan's report from its journal
pub fn run(ctx: &Context, plan_id: &str, json: bool) -> Result<()> {
    let (_, settings) = load_settings(ctx)?;
    let ledger = open_ledger(&settings)?;
    ledger
        .load(plan_id)
        .with_context(|| format!("Could not load plan {plan_id}"))?;
    let report = ledger.report(plan_id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, true);
    }
    Ok(())
}
