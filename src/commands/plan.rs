use anyhow::Result;
use orchestrator::compile;
use std::path::Path;

use crate::Context;
use crate::ui;

use super::{load_request, load_settings, print_plan};

/// Compile a request and show its phases. Nothing is registered or applied.
pub fn run(ctx: &Context, request_path: &Path) -> Result<()> {
    let (_, settings) = load_settings(ctx)?;
    let request = load_request(request_path)?;
    let plan = compile(&request, &settings.engine_config().compiler)?;

    print_plan(&plan);
    println!();
    ui::success(&format!(
        "{} step(s) in {} phase(s)",
        plan.steps.len(),
        plan.phases.len()
    ));
    Ok(())
}
