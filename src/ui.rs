use colored::{ColoredString, Colorize};
use orchestrator::{FinalState, Outcome, PlanState};

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Print a step indicator
pub fn step(num: usize, total: usize, msg: &str) {
    println!("{} {}", format!("[{num}/{total}]").blue().bold(), msg);
}

// ============================================================================
// State Styling
// ============================================================================

pub fn plan_state(state: PlanState) -> ColoredString {
    let label = state.as_str();
    match state {
        PlanState::Succeeded => label.green().bold(),
        PlanState::RolledBack => label.yellow().bold(),
        PlanState::Failed => label.red().bold(),
        PlanState::Cancelled => label.dimmed(),
        PlanState::RollingBack => label.yellow(),
        _ => label.cyan(),
    }
}

pub fn final_state(state: FinalState) -> ColoredString {
    match state {
        FinalState::Pending => "pending".dimmed(),
        FinalState::Applied => "applied".green(),
        FinalState::RolledBack => "rolled_back".yellow(),
        FinalState::Failed => "failed".red(),
    }
}

/// Symbol for a single attempt outcome
pub fn outcome_mark(outcome: Outcome) -> ColoredString {
    match outcome {
        Outcome::Ok => "✓".green(),
        Outcome::ProviderError => "✗".red(),
        Outcome::Timeout => "⏱".yellow(),
    }
}

/// Format a traffic weight for display
pub fn percent(weight: Option<u8>) -> String {
    weight.map_or_else(|| "-".to_string(), |w| format!("{w}%"))
}

/// Truncate a string for display, keeping the start
pub fn truncate(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else if max_len <= 3 {
        "...".to_string()
    } else {
        let kept: String = text.chars().take(max_len - 3).collect();
        format!("{kept}...")
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent() {
        assert_eq!(percent(Some(10)), "10%");
        assert_eq!(percent(None), "-");
    }

    #[test]
    fn test_truncate_short() {
        assert_eq!(truncate("ok", 10), "ok");
        assert_eq!(truncate("exact", 5), "exact");
    }

    #[test]
    fn test_truncate_long() {
        assert_eq!(
            truncate("provider error on lb-1: 503 service unavailable", 20),
            "provider error on..."
        );
    }

    #[test]
    fn test_truncate_edge_cases() {
        assert_eq!(truncate("test", 3), "...");
        assert_eq!(truncate("", 10), "");
    }
}
