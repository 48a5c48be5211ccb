//! HTTP provider adapter.
//!
//! Talks to a DNS or load-balancer control API:
//!
//! - `POST {endpoint}/resources/{id}/actions` with `{"action", "parameters"}`
//! - `GET {endpoint}/resources/{id}/weights` for pre-change snapshots
//! - `GET {health_check_url}` for probes; any 2xx is healthy

use orchestrator::{
    AdapterSet, ApplyOutcome, Error, HealthResult, ResourceKind, Result, StepAction,
    TargetAdapter, TrafficSnapshot,
};
use serde::Serialize;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Settings;

#[derive(Serialize)]
struct ActionBody<'a> {
    action: &'a str,
    parameters: serde_json::Value,
}

pub struct HttpProviderAdapter {
    name: String,
    agent: ureq::Agent,
    endpoint: Option<String>,
    token: Option<String>,
}

impl HttpProviderAdapter {
    pub fn new(
        name: impl Into<String>,
        endpoint: Option<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self {
            name: name.into(),
            agent,
            endpoint: endpoint.map(|e| e.trim_end_matches('/').to_string()),
            token,
        }
    }

    fn resource_url(&self, resource_id: &str, path: &str) -> Result<String> {
        let endpoint = self.endpoint.as_deref().ok_or_else(|| Error::ProviderRejected {
            resource_id: resource_id.to_string(),
            message: format!("no endpoint configured for {} provider", self.name),
        })?;
        Ok(format!("{endpoint}/resources/{resource_id}/{path}"))
    }

    fn authorization(&self) -> Option<String> {
        self.token.as_ref().map(|t| format!("Bearer {t}"))
    }
}

impl TargetAdapter for HttpProviderAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, resource_id: &str, action: &StepAction) -> Result<ApplyOutcome> {
        let url = self.resource_url(resource_id, "actions")?;
        let body = ActionBody {
            action: action.kind().as_str(),
            parameters: action.parameters(),
        };

        let mut request = self.agent.post(&url).header("User-Agent", "cutover");
        if let Some(auth) = self.authorization() {
            request = request.header("Authorization", &auth);
        }
        let response = request
            .send_json(&body)
            .map_err(|e| classify(resource_id, e))?;

        Ok(ApplyOutcome::new(format!(
            "{} accepted by {} (HTTP {})",
            action.kind(),
            self.name,
            response.status().as_u16()
        )))
    }

    fn snapshot(&self, resource_id: &str, _action: &StepAction) -> Result<Option<TrafficSnapshot>> {
        let url = self.resource_url(resource_id, "weights")?;

        let mut request = self.agent.get(&url).header("User-Agent", "cutover");
        if let Some(auth) = self.authorization() {
            request = request.header("Authorization", &auth);
        }

        match request.call() {
            Ok(mut response) => {
                let snapshot: TrafficSnapshot = response
                    .body_mut()
                    .read_json()
                    .map_err(|e| Error::provider(resource_id, format!("bad weights body: {e}")))?;
                Ok(Some(snapshot))
            }
            Err(ureq::Error::StatusCode(404)) => Ok(None),
            Err(e) => Err(classify(resource_id, e)),
        }
    }

    fn probe(&self, url: &str) -> Result<HealthResult> {
        match self.agent.get(url).header("User-Agent", "cutover").call() {
            Ok(response) => Ok(HealthResult::healthy(Some(response.status().as_u16()))),
            Err(ureq::Error::StatusCode(code)) => Ok(HealthResult::unhealthy(
                Some(code),
                format!("HTTP {code} from {url}"),
            )),
            Err(e) => Ok(HealthResult::unhealthy(None, e.to_string())),
        }
    }
}

/// Map a transport or status error onto the retry taxonomy.
///
/// 5xx, 429 and transport failures are transient; other 4xx are permanent.
pub fn classify(resource_id: &str, err: ureq::Error) -> Error {
    match err {
        ureq::Error::StatusCode(code) if code >= 500 || code == 429 => {
            Error::provider(resource_id, format!("HTTP {code}"))
        }
        ureq::Error::StatusCode(code) => Error::ProviderRejected {
            resource_id: resource_id.to_string(),
            message: format!("HTTP {code}"),
        },
        ureq::Error::Timeout(_) => Error::Timeout {
            resource_id: resource_id.to_string(),
        },
        ureq::Error::Io(e) if e.kind() == io::ErrorKind::TimedOut => Error::Timeout {
            resource_id: resource_id.to_string(),
        },
        other => Error::provider(resource_id, other.to_string()),
    }
}

/// DNS and load-balancer adapters from the `[providers]` section.
///
/// Health URLs are probed by a separate adapter that never carries the
/// provider token.
pub fn adapters(settings: &Settings) -> AdapterSet {
    let providers = &settings.providers;
    let timeout = Duration::from_secs(providers.request_timeout_secs);
    let token = settings.provider_token();

    let dns = HttpProviderAdapter::new("dns", providers.dns_endpoint.clone(), token.clone(), timeout);
    let lb = HttpProviderAdapter::new("load-balancer", providers.lb_endpoint.clone(), token, timeout);
    let health = HttpProviderAdapter::new("health", None, None, timeout);
    AdapterSet::new(Arc::new(dns), Arc::new(lb)).with_prober(Arc::new(health))
}

/// Resource kinds that have no endpoint configured
pub fn missing_endpoints(settings: &Settings, kinds: &[ResourceKind]) -> Vec<ResourceKind> {
    kinds
        .iter()
        .copied()
        .filter(|kind| match kind {
            ResourceKind::Dns => settings.providers.dns_endpoint.is_none(),
            ResourceKind::LoadBalancer => settings.providers.lb_endpoint.is_none(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator::ErrorCategory;

    #[test]
    fn test_server_errors_are_retryable() {
        assert!(classify("lb-1", ureq::Error::StatusCode(503)).is_retryable());
        assert!(classify("lb-1", ureq::Error::StatusCode(429)).is_retryable());
    }

    #[test]
    fn test_client_errors_are_permanent() {
        let err = classify("lb-1", ureq::Error::StatusCode(400));
        assert_eq!(err.category(), ErrorCategory::Rejected);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_io_timeout_is_timeout() {
        let err = classify(
            "lb-1",
            ureq::Error::Io(io::Error::new(io::ErrorKind::TimedOut, "timed out")),
        );
        assert_eq!(err.category(), ErrorCategory::Timeout);
    }

    #[test]
    fn test_resource_url_trims_trailing_slash() {
        let adapter = HttpProviderAdapter::new(
            "load-balancer",
            Some("https://lb.internal/api/".to_string()),
            None,
            Duration::from_secs(1),
        );
        assert_eq!(
            adapter.resource_url("lb-1", "actions").unwrap(),
            "https://lb.internal/api/resources/lb-1/actions"
        );
    }

    #[test]
    fn test_missing_endpoint_is_rejected() {
        let adapter = HttpProviderAdapter::new("dns", None, None, Duration::from_secs(1));
        let err = adapter.resource_url("zone-1", "actions").unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Rejected);
    }

    #[test]
    fn test_missing_endpoints_by_kind() {
        let mut settings = Settings::default();
        settings.providers.lb_endpoint = Some("https://lb.internal".to_string());
        let missing = missing_endpoints(&settings, &[ResourceKind::Dns, ResourceKind::LoadBalancer]);
        assert_eq!(missing, vec![ResourceKind::Dns]);
    }

    #[test]
    fn test_health_checks_use_their_own_adapter() {
        let mut settings = Settings::default();
        settings.providers.lb_endpoint = Some("https://lb.internal".to_string());
        let set = adapters(&settings);
        assert_eq!(set.prober().name(), "health");
        assert_eq!(set.for_kind(ResourceKind::LoadBalancer).name(), "load-balancer");
    }
}
