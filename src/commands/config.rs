use anyhow::Result;

use crate::Context;
use crate::cli::ConfigCommand;
use crate::ui;

use super::load_settings;

pub fn run(ctx: &Context, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show => show(ctx),
        ConfigCommand::Path => {
            let (path, _) = load_settings(ctx)?;
            println!("{}", path.display());
            Ok(())
        }
    }
}

fn show(ctx: &Context) -> Result<()> {
    let (path, settings) = load_settings(ctx)?;

    ui::header("Configuration");
    println!();
    if path.exists() {
        ui::kv("Config file", &path.display().to_string());
    } else {
        ui::kv("Config file", &format!("{} (not found, using defaults)", path.display()));
    }
    ui::kv("Ledger journal", &settings.ledger_dir()?.display().to_string());
    if let Some(var) = &settings.providers.token_env {
        let state = if settings.provider_token().is_some() {
            "set"
        } else {
            "not set"
        };
        ui::kv("Provider token", &format!("${var} ({state})"));
    }

    ui::section("Effective settings");
    println!();
    for line in settings.to_toml()?.lines() {
        println!("  {line}");
    }
    Ok(())
}
