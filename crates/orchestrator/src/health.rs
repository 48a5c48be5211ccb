//! Health check gate
//!
//! Polls every health URL of a phase at a fixed interval until all of
//! them report healthy or the shared window closes. An unhealthy poll is
//! not an error; only expiry of the window is.

use crate::adapter::TargetAdapter;
use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::types::{CutoverStep, HealthPoll};
use chrono::Utc;
use std::thread;
use std::time::{Duration, Instant};

/// Polling cadence and window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(60),
        }
    }
}

struct Pending<'s> {
    step_name: &'s str,
    url: &'s str,
    polls: u32,
}

/// Health gate for one plan
pub struct HealthGate<'a> {
    pub config: &'a HealthConfig,
    pub prober: &'a dyn TargetAdapter,
    pub ledger: &'a Ledger,
    pub plan_id: &'a str,
}

impl HealthGate<'_> {
    /// Wait until every step of a phase that has a health URL is healthy.
    ///
    /// Steps without a URL count as healthy. Every poll is written to the
    /// ledger and handed to `on_poll`. Returns `HealthCheckTimeout` when
    /// the window closes and `Cancelled` when `is_cancelled` turns true
    /// between poll rounds.
    pub fn verify_phase(
        &self,
        phase_index: usize,
        steps: &[&CutoverStep],
        is_cancelled: &dyn Fn() -> bool,
        on_poll: &mut dyn FnMut(&HealthPoll),
    ) -> Result<()> {
        let mut pending: Vec<Pending<'_>> = steps
            .iter()
            .filter_map(|step| {
                step.health_check_url.as_deref().map(|url| Pending {
                    step_name: step.name.as_str(),
                    url,
                    polls: 0,
                })
            })
            .collect();

        if pending.is_empty() {
            log::debug!("Phase {phase_index} has no health URLs, treating as healthy");
            return Ok(());
        }

        let started = Instant::now();
        let deadline = started + self.config.timeout;
        let simulated = self.prober.is_simulated();

        loop {
            let mut still_pending = Vec::with_capacity(pending.len());
            for mut target in pending {
                target.polls += 1;
                let (healthy, status, detail) = match self.prober.probe(target.url) {
                    Ok(result) => (result.healthy, result.status, result.detail),
                    Err(e) => (false, None, e.to_string()),
                };

                let poll = HealthPoll {
                    plan_id: self.plan_id.to_string(),
                    phase_index,
                    step_name: target.step_name.to_string(),
                    url: target.url.to_string(),
                    poll: target.polls,
                    healthy,
                    status,
                    detail,
                    polled_at: Utc::now(),
                    simulated,
                };
                log::debug!(
                    "Health poll #{} for {} ({}): {}",
                    poll.poll,
                    poll.step_name,
                    poll.url,
                    if healthy { "healthy" } else { "unhealthy" }
                );
                self.ledger.record_poll(poll.clone())?;
                on_poll(&poll);

                if !healthy {
                    still_pending.push(target);
                }
            }
            pending = still_pending;

            if pending.is_empty() {
                return Ok(());
            }
            if is_cancelled() {
                return Err(Error::Cancelled {
                    plan_id: self.plan_id.to_string(),
                });
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::HealthCheckTimeout {
                    phase_index,
                    elapsed_ms: now.duration_since(started).as_millis() as u64,
                    unhealthy: pending.iter().map(|p| p.step_name.to_string()).collect(),
                });
            }
            thread::sleep(self.config.interval.min(deadline - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedAdapter, plan_fixture, step};

    const URL_A: &str = "https://a.example.com/healthz";
    const URL_B: &str = "https://b.example.com/healthz";

    fn config(timeout_ms: u64) -> HealthConfig {
        HealthConfig {
            interval: Duration::from_millis(5),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    fn with_url(name: &str, url: &str) -> CutoverStep {
        CutoverStep {
            health_check_url: Some(url.to_string()),
            ..step(name, 10)
        }
    }

    #[test]
    fn test_steps_without_urls_are_healthy() {
        let adapter = ScriptedAdapter::new();
        let ledger = Ledger::new();
        let plan = plan_fixture(vec![step("a", 10)]);
        ledger.register_plan(&plan).unwrap();
        let gate = HealthGate {
            config: &config(50),
            prober: &adapter,
            ledger: &ledger,
            plan_id: &plan.id,
        };

        let steps: Vec<&CutoverStep> = plan.steps.iter().collect();
        gate.verify_phase(0, &steps, &|| false, &mut |_| {}).unwrap();
        assert!(ledger.report(&plan.id).unwrap().health_polls.is_empty());
    }

    #[test]
    fn test_polls_until_healthy() {
        let adapter = ScriptedAdapter::new();
        adapter.health_sequence(URL_A, &[false, false, true]);
        let ledger = Ledger::new();
        let plan = plan_fixture(vec![with_url("a", URL_A)]);
        ledger.register_plan(&plan).unwrap();
        let gate = HealthGate {
            config: &config(500),
            prober: &adapter,
            ledger: &ledger,
            plan_id: &plan.id,
        };

        let mut seen = 0;
        let steps: Vec<&CutoverStep> = plan.steps.iter().collect();
        gate.verify_phase(0, &steps, &|| false, &mut |_| seen += 1).unwrap();

        assert_eq!(seen, 3);
        let polls = ledger.report(&plan.id).unwrap().health_polls;
        assert_eq!(polls.iter().map(|p| p.poll).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(polls[2].healthy);
    }

    #[test]
    fn test_every_step_must_be_healthy() {
        let adapter = ScriptedAdapter::new();
        adapter.health_sequence(URL_A, &[true]);
        adapter.health_sequence(URL_B, &[false]);
        let ledger = Ledger::new();
        let plan = plan_fixture(vec![with_url("a", URL_A), with_url("b", URL_B)]);
        ledger.register_plan(&plan).unwrap();
        let gate = HealthGate {
            config: &config(40),
            prober: &adapter,
            ledger: &ledger,
            plan_id: &plan.id,
        };

        let steps: Vec<&CutoverStep> = plan.steps.iter().collect();
        let err = gate.verify_phase(0, &steps, &|| false, &mut |_| {}).unwrap_err();
        match err {
            Error::HealthCheckTimeout { unhealthy, .. } => assert_eq!(unhealthy, vec!["b"]),
            other => panic!("unexpected error: {other}"),
        }
        // Healthy endpoints are not polled again
        assert_eq!(adapter.probe_count(URL_A), 1);
        assert!(adapter.probe_count(URL_B) > 1);
    }

    #[test]
    fn test_cancellation_stops_polling() {
        let adapter = ScriptedAdapter::new();
        adapter.health_sequence(URL_A, &[false]);
        let ledger = Ledger::new();
        let plan = plan_fixture(vec![with_url("a", URL_A)]);
        ledger.register_plan(&plan).unwrap();
        let gate = HealthGate {
            config: &config(5_000),
            prober: &adapter,
            ledger: &ledger,
            plan_id: &plan.id,
        };

        let steps: Vec<&CutoverStep> = plan.steps.iter().collect();
        let err = gate.verify_phase(0, &steps, &|| true, &mut |_| {}).unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
        assert_eq!(adapter.probe_count(URL_A), 1);
    }
}
