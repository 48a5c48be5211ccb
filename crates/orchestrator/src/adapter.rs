//! Target adapter capability
//!
//! The engine never talks to a DNS registrar or load balancer directly.
//! It goes through [`TargetAdapter`], implemented once per resource kind,
//! so real provider clients, dry-run stubs and test doubles are
//! interchangeable.

use crate::error::Result;
use crate::params::{ResourceKind, StepAction, TrafficSnapshot};
use std::fmt;
use std::sync::Arc;

/// What a provider reports after a successful apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub detail: String,
}

impl ApplyOutcome {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

/// Result of one health endpoint probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthResult {
    pub healthy: bool,
    pub status: Option<u16>,
    pub detail: String,
}

impl HealthResult {
    pub fn healthy(status: Option<u16>) -> Self {
        Self {
            healthy: true,
            status,
            detail: "healthy".to_string(),
        }
    }

    pub fn unhealthy(status: Option<u16>, detail: impl Into<String>) -> Self {
        Self {
            healthy: false,
            status,
            detail: detail.into(),
        }
    }
}

/// Uniform capability over one kind of traffic resource
///
/// Implementations must be idempotent for identical `(resource_id, action)`
/// pairs: the executor re-sends the same call after a transient failure.
pub trait TargetAdapter: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Apply an action to a resource
    ///
    /// Return `Error::Provider` or `Error::Timeout` for transient failures
    /// (they are retried) and `Error::ProviderRejected` for permanent ones.
    fn apply(&self, resource_id: &str, action: &StepAction) -> Result<ApplyOutcome>;

    /// Capture the resource's current traffic weights before a weighted
    /// action runs, so rollback can restore them.
    fn snapshot(&self, _resource_id: &str, _action: &StepAction) -> Result<Option<TrafficSnapshot>> {
        Ok(None)
    }

    /// Probe a health endpoint
    fn probe(&self, url: &str) -> Result<HealthResult>;

    /// Whether results from this adapter are simulated
    fn is_simulated(&self) -> bool {
        false
    }
}

/// Dry-run adapter: every call succeeds and nothing is touched
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAdapter;

impl TargetAdapter for NoopAdapter {
    fn name(&self) -> &str {
        "noop"
    }

    fn apply(&self, resource_id: &str, action: &StepAction) -> Result<ApplyOutcome> {
        Ok(ApplyOutcome::new(format!(
            "simulated {} on {resource_id}",
            action.kind()
        )))
    }

    fn probe(&self, _url: &str) -> Result<HealthResult> {
        Ok(HealthResult {
            healthy: true,
            status: None,
            detail: "simulated".to_string(),
        })
    }

    fn is_simulated(&self) -> bool {
        true
    }
}

/// Adapters keyed by resource kind, plus the one used for health probes
#[derive(Clone)]
pub struct AdapterSet {
    dns: Arc<dyn TargetAdapter>,
    load_balancer: Arc<dyn TargetAdapter>,
    prober: Arc<dyn TargetAdapter>,
}

impl AdapterSet {
    /// DNS and load-balancer adapters; probes go through the load balancer one
    pub fn new(dns: Arc<dyn TargetAdapter>, load_balancer: Arc<dyn TargetAdapter>) -> Self {
        Self {
            dns,
            prober: Arc::clone(&load_balancer),
            load_balancer,
        }
    }

    /// One adapter for every resource kind
    pub fn uniform(adapter: Arc<dyn TargetAdapter>) -> Self {
        Self {
            dns: Arc::clone(&adapter),
            load_balancer: Arc::clone(&adapter),
            prober: adapter,
        }
    }

    /// The dry-run set
    pub fn simulated() -> Self {
        Self::uniform(Arc::new(NoopAdapter))
    }

    /// Use a dedicated adapter for health probes
    pub fn with_prober(mut self, prober: Arc<dyn TargetAdapter>) -> Self {
        self.prober = prober;
        self
    }

    pub fn for_kind(&self, kind: ResourceKind) -> &dyn TargetAdapter {
        match kind {
            ResourceKind::Dns => self.dns.as_ref(),
            ResourceKind::LoadBalancer => self.load_balancer.as_ref(),
        }
    }

    pub fn for_action(&self, action: &StepAction) -> &dyn TargetAdapter {
        self.for_kind(action.kind().resource_kind())
    }

    pub fn prober(&self) -> &dyn TargetAdapter {
        self.prober.as_ref()
    }
}

impl fmt::Debug for AdapterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterSet")
            .field("dns", &self.dns.name())
            .field("load_balancer", &self.load_balancer.name())
            .field("prober", &self.prober.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{LbHealthCheck, WeightTrafficShift};

    #[test]
    fn test_noop_adapter_simulates() {
        let adapter = NoopAdapter;
        let action = StepAction::WeightTrafficShift(WeightTrafficShift {
            percentage: 10,
            target_group: None,
        });
        let outcome = adapter.apply("lb-1", &action).unwrap();
        assert!(outcome.detail.contains("simulated weight_traffic_shift"));
        assert!(adapter.probe("https://example.com/healthz").unwrap().healthy);
        assert!(adapter.is_simulated());
    }

    #[test]
    fn test_routing_by_resource_kind() {
        struct Named(&'static str);
        impl TargetAdapter for Named {
            fn name(&self) -> &str {
                self.0
            }
            fn apply(&self, _: &str, _: &StepAction) -> Result<ApplyOutcome> {
                Ok(ApplyOutcome::new(self.0))
            }
            fn probe(&self, _: &str) -> Result<HealthResult> {
                Ok(HealthResult::healthy(Some(200)))
            }
        }

        let set = AdapterSet::new(Arc::new(Named("dns")), Arc::new(Named("lb")));
        let shift = StepAction::WeightTrafficShift(WeightTrafficShift {
            percentage: 10,
            target_group: None,
        });
        let check = StepAction::LbHealthCheck(LbHealthCheck { target_group: None });

        assert_eq!(set.for_action(&shift).name(), "lb");
        assert_eq!(set.for_action(&check).name(), "lb");
        assert_eq!(set.for_kind(ResourceKind::Dns).name(), "dns");
        assert_eq!(set.prober().name(), "lb");

        let set = set.with_prober(Arc::new(Named("health")));
        assert_eq!(set.prober().name(), "health");
        assert_eq!(set.for_action(&shift).name(), "lb");
    }
}
