//! Terminal progress for a running plan.
//!
//! Prints one line per phase, step and rollback step, and keeps a spinner
//! up while a phase is held at the health gate.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use orchestrator::{ExecutionRecord, HealthPoll, Phase, PlanState, ProgressCallback};
use std::time::Duration;

use crate::ui;

pub struct TerminalProgress {
    quiet: bool,
    spinner: Option<ProgressBar>,
}

impl TerminalProgress {
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            spinner: None,
        }
    }

    fn print(&self, line: &str) {
        if self.quiet {
            return;
        }
        match &self.spinner {
            Some(pb) => pb.suspend(|| println!("{line}")),
            None => println!("{line}"),
        }
    }

    fn start_spinner(&mut self) {
        if self.quiet {
            return;
        }
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("  {spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message("waiting for health endpoints");
        pb.enable_steady_tick(Duration::from_millis(100));
        self.spinner = Some(pb);
    }

    fn stop_spinner(&mut self) {
        if let Some(pb) = self.spinner.take() {
            pb.finish_and_clear();
        }
    }
}

impl ProgressCallback for TerminalProgress {
    fn on_state_change(&mut self, _plan_id: &str, from: PlanState, to: PlanState) {
        if from == PlanState::HealthChecking {
            self.stop_spinner();
        }

        match to {
            PlanState::HealthChecking => self.start_spinner(),
            // Phase lines already show forward progress
            PlanState::Running if from == PlanState::HealthChecking => {}
            _ => self.print(&format!(
                "{} {} {} {}",
                "→".dimmed(),
                ui::plan_state(from),
                "→".dimmed(),
                ui::plan_state(to)
            )),
        }
    }

    fn on_phase_start(&mut self, phase: &Phase, total_phases: usize) {
        if self.quiet {
            return;
        }
        let traffic = phase
            .traffic_percent
            .map(|p| format!(", traffic {p}%"))
            .unwrap_or_default();
        println!();
        ui::step(
            phase.index + 1,
            total_phases,
            &format!("{} step(s){traffic}", phase.steps.len()),
        );
    }

    fn on_step_complete(&mut self, record: &ExecutionRecord) {
        let attempts = record.forward_results().count();
        let mark = record
            .action_results
            .last()
            .map_or_else(|| "·".dimmed(), |r| ui::outcome_mark(r.outcome));
        self.print(&format!(
            "    {mark} {} {} {} ({} attempt{})",
            record.step_name.bold(),
            record.action.as_str().dimmed(),
            ui::final_state(record.final_state),
            attempts,
            if attempts == 1 { "" } else { "s" }
        ));
    }

    fn on_health_poll(&mut self, poll: &HealthPoll) {
        if let Some(pb) = &self.spinner {
            let status = poll.status.map(|s| format!(" ({s})")).unwrap_or_default();
            pb.set_message(format!(
                "{}: poll #{} {}{status}",
                poll.step_name,
                poll.poll,
                if poll.healthy { "healthy" } else { "unhealthy" }
            ));
        }
    }

    fn on_rollback_step(&mut self, step_name: &str, reverted: bool) {
        let line = if reverted {
            format!("    {} reverted {}", "↺".yellow(), step_name.bold())
        } else {
            format!("    {} could not revert {}", "✗".red(), step_name.bold())
        };
        self.print(&line);
    }
}

impl Drop for TerminalProgress {
    fn drop(&mut self) {
        self.stop_spinner();
    }
}
