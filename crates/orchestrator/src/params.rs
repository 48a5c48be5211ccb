//! Typed step actions
//!
//! Requests carry an `action` name plus an untyped JSON `parameters`
//! object. The compiler turns that pair into a [`StepAction`] so a
//! malformed parameter block is rejected before anything runs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// The fixed action vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    DnsWeightedUpdate,
    DnsBatchUpdate,
    DnsHealthCheck,
    LbWeightedUpdate,
    LbBatchUpdate,
    LbHealthCheck,
    WeightTrafficShift,
    BatchTargetUpdate,
}

impl ActionKind {
    pub const ALL: [ActionKind; 8] = [
        Self::DnsWeightedUpdate,
        Self::DnsBatchUpdate,
        Self::DnsHealthCheck,
        Self::LbWeightedUpdate,
        Self::LbBatchUpdate,
        Self::LbHealthCheck,
        Self::WeightTrafficShift,
        Self::BatchTargetUpdate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DnsWeightedUpdate => "dns_weighted_update",
            Self::DnsBatchUpdate => "dns_batch_update",
            Self::DnsHealthCheck => "dns_health_check",
            Self::LbWeightedUpdate => "lb_weighted_update",
            Self::LbBatchUpdate => "lb_batch_update",
            Self::LbHealthCheck => "lb_health_check",
            Self::WeightTrafficShift => "weight_traffic_shift",
            Self::BatchTargetUpdate => "batch_target_update",
        }
    }

    /// Which adapter handles this action
    pub fn resource_kind(&self) -> ResourceKind {
        match self {
            Self::DnsWeightedUpdate | Self::DnsBatchUpdate | Self::DnsHealthCheck => {
                ResourceKind::Dns
            }
            _ => ResourceKind::LoadBalancer,
        }
    }

    /// Read-only verification actions; they have nothing to revert
    pub fn is_health_check(&self) -> bool {
        matches!(self, Self::DnsHealthCheck | Self::LbHealthCheck)
    }

    /// Actions that move a traffic percentage
    pub fn is_weighted(&self) -> bool {
        matches!(
            self,
            Self::DnsWeightedUpdate | Self::LbWeightedUpdate | Self::WeightTrafficShift
        )
    }

    /// Actions that re-point a set of records or targets at once
    pub fn is_batch(&self) -> bool {
        matches!(
            self,
            Self::DnsBatchUpdate | Self::LbBatchUpdate | Self::BatchTargetUpdate
        )
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown action '{s}'"))
    }
}

/// Resource families a target adapter can serve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Dns,
    LoadBalancer,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dns => f.write_str("dns"),
            Self::LoadBalancer => f.write_str("load_balancer"),
        }
    }
}

/// Share of traffic routed to one environment or target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetWeight {
    pub target: String,
    pub weight: u8,
}

impl TargetWeight {
    pub fn new(target: impl Into<String>, weight: u8) -> Self {
        Self {
            target: target.into(),
            weight,
        }
    }
}

/// A DNS record as submitted by the plan author
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    pub name: String,
    #[serde(rename = "type", default = "default_record_type")]
    pub record_type: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
}

fn default_record_type() -> String {
    "CNAME".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsWeightedUpdate {
    pub domain: String,
    #[serde(default)]
    pub records: Vec<DnsRecord>,
    #[serde(default)]
    pub weights: Vec<TargetWeight>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsBatchUpdate {
    pub domain: String,
    #[serde(default)]
    pub records: Vec<DnsRecord>,
    /// Environment the records should resolve to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsHealthCheck {
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbWeightedUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listener: Option<String>,
    pub weights: Vec<TargetWeight>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbBatchUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listener: Option<String>,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbHealthCheck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_group: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightTrafficShift {
    /// Absolute percentage of traffic sent to the target environment
    pub percentage: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_group: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchTargetUpdate {
    pub targets: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

/// An action together with its strongly-typed parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "parameters", rename_all = "snake_case")]
pub enum StepAction {
    DnsWeightedUpdate(DnsWeightedUpdate),
    DnsBatchUpdate(DnsBatchUpdate),
    DnsHealthCheck(DnsHealthCheck),
    LbWeightedUpdate(LbWeightedUpdate),
    LbBatchUpdate(LbBatchUpdate),
    LbHealthCheck(LbHealthCheck),
    WeightTrafficShift(WeightTrafficShift),
    BatchTargetUpdate(BatchTargetUpdate),
}

/// Traffic weights captured from a resource before a weighted step runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficSnapshot {
    pub weights: Vec<TargetWeight>,
}

impl TrafficSnapshot {
    pub fn weight_of(&self, target: &str) -> Option<u8> {
        self.weights
            .iter()
            .find(|w| w.target == target)
            .map(|w| w.weight)
    }
}

impl StepAction {
    /// Parse an untyped parameter object for the given action.
    ///
    /// Returns a human-readable reason on failure; the compiler wraps it
    /// into a validation error with the step name.
    pub fn parse(kind: ActionKind, parameters: &Value) -> Result<Self, String> {
        if !parameters.is_object() {
            return Err(format!(
                "parameters for {kind} must be a JSON object, got {}",
                json_type(parameters)
            ));
        }

        fn typed<T: serde::de::DeserializeOwned>(value: &Value) -> Result<T, String> {
            serde_json::from_value(value.clone()).map_err(|e| e.to_string())
        }

        let action = match kind {
            ActionKind::DnsWeightedUpdate => Self::DnsWeightedUpdate(typed(parameters)?),
            ActionKind::DnsBatchUpdate => Self::DnsBatchUpdate(typed(parameters)?),
            ActionKind::DnsHealthCheck => Self::DnsHealthCheck(typed(parameters)?),
            ActionKind::LbWeightedUpdate => Self::LbWeightedUpdate(typed(parameters)?),
            ActionKind::LbBatchUpdate => Self::LbBatchUpdate(typed(parameters)?),
            ActionKind::LbHealthCheck => Self::LbHealthCheck(typed(parameters)?),
            ActionKind::WeightTrafficShift => Self::WeightTrafficShift(typed(parameters)?),
            ActionKind::BatchTargetUpdate => Self::BatchTargetUpdate(typed(parameters)?),
        };
        action.check()?;
        Ok(action)
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Self::DnsWeightedUpdate(_) => ActionKind::DnsWeightedUpdate,
            Self::DnsBatchUpdate(_) => ActionKind::DnsBatchUpdate,
            Self::DnsHealthCheck(_) => ActionKind::DnsHealthCheck,
            Self::LbWeightedUpdate(_) => ActionKind::LbWeightedUpdate,
            Self::LbBatchUpdate(_) => ActionKind::LbBatchUpdate,
            Self::LbHealthCheck(_) => ActionKind::LbHealthCheck,
            Self::WeightTrafficShift(_) => ActionKind::WeightTrafficShift,
            Self::BatchTargetUpdate(_) => ActionKind::BatchTargetUpdate,
        }
    }

    /// The parameter block alone, as it travels to a provider
    pub fn parameters(&self) -> Value {
        let encoded = match self {
            Self::DnsWeightedUpdate(p) => serde_json::to_value(p),
            Self::DnsBatchUpdate(p) => serde_json::to_value(p),
            Self::DnsHealthCheck(p) => serde_json::to_value(p),
            Self::LbWeightedUpdate(p) => serde_json::to_value(p),
            Self::LbBatchUpdate(p) => serde_json::to_value(p),
            Self::LbHealthCheck(p) => serde_json::to_value(p),
            Self::WeightTrafficShift(p) => serde_json::to_value(p),
            Self::BatchTargetUpdate(p) => serde_json::to_value(p),
        };
        encoded.unwrap_or(Value::Null)
    }

    /// Percentage of traffic this action sends to `target_env`, if it
    /// declares one.
    pub fn traffic_weight(&self, target_env: &str) -> Option<u8> {
        match self {
            Self::WeightTrafficShift(p) => Some(p.percentage),
            Self::DnsWeightedUpdate(DnsWeightedUpdate { weights, .. })
            | Self::LbWeightedUpdate(LbWeightedUpdate { weights, .. }) => weights
                .iter()
                .find(|w| w.target == target_env)
                .map(|w| w.weight),
            _ => None,
        }
    }

    /// Send `weight` percent to `target_env` and the rest to `source_env`.
    ///
    /// No-op for actions that carry no traffic split.
    pub fn set_traffic_weight(&mut self, source_env: &str, target_env: &str, weight: u8) {
        let split = || {
            vec![
                TargetWeight::new(source_env, 100u8.saturating_sub(weight)),
                TargetWeight::new(target_env, weight),
            ]
        };
        match self {
            Self::WeightTrafficShift(p) => p.percentage = weight,
            Self::DnsWeightedUpdate(p) => p.weights = split(),
            Self::LbWeightedUpdate(p) => p.weights = split(),
            _ => {}
        }
    }

    /// Compute the action that reverses this one.
    ///
    /// Weighted actions restore `snapshot` when one was captured, else
    /// they send all traffic back to `source_env`. Batch actions re-point
    /// at `source_env`. Health checks have no inverse.
    pub fn inverse(
        &self,
        source_env: &str,
        target_env: &str,
        snapshot: Option<&TrafficSnapshot>,
    ) -> Option<StepAction> {
        let restored_weights = || match snapshot {
            Some(s) if !s.weights.is_empty() => s.weights.clone(),
            _ => vec![
                TargetWeight::new(source_env, 100),
                TargetWeight::new(target_env, 0),
            ],
        };

        match self {
            Self::DnsHealthCheck(_) | Self::LbHealthCheck(_) => None,
            Self::DnsWeightedUpdate(p) => Some(Self::DnsWeightedUpdate(DnsWeightedUpdate {
                weights: restored_weights(),
                ..p.clone()
            })),
            Self::LbWeightedUpdate(p) => Some(Self::LbWeightedUpdate(LbWeightedUpdate {
                weights: restored_weights(),
                ..p.clone()
            })),
            Self::WeightTrafficShift(p) => Some(Self::WeightTrafficShift(WeightTrafficShift {
                percentage: snapshot.and_then(|s| s.weight_of(target_env)).unwrap_or(0),
                ..p.clone()
            })),
            Self::DnsBatchUpdate(p) => Some(Self::DnsBatchUpdate(DnsBatchUpdate {
                environment: Some(source_env.to_string()),
                ..p.clone()
            })),
            Self::LbBatchUpdate(p) => Some(Self::LbBatchUpdate(LbBatchUpdate {
                environment: Some(source_env.to_string()),
                ..p.clone()
            })),
            Self::BatchTargetUpdate(p) => Some(Self::BatchTargetUpdate(BatchTargetUpdate {
                environment: Some(source_env.to_string()),
                ..p.clone()
            })),
        }
    }

    /// Semantic checks serde cannot express
    fn check(&self) -> Result<(), String> {
        match self {
            Self::DnsWeightedUpdate(DnsWeightedUpdate { domain, weights, .. }) => {
                require_domain(domain)?;
                check_weights(weights)
            }
            Self::DnsBatchUpdate(DnsBatchUpdate { domain, .. })
            | Self::DnsHealthCheck(DnsHealthCheck { domain, .. }) => require_domain(domain),
            Self::LbWeightedUpdate(LbWeightedUpdate { weights, .. }) => {
                if weights.is_empty() {
                    return Err("lb_weighted_update needs at least one weight".into());
                }
                check_weights(weights)
            }
            Self::WeightTrafficShift(WeightTrafficShift { percentage, .. }) => {
                if *percentage > 100 {
                    return Err(format!("percentage {percentage} exceeds 100"));
                }
                Ok(())
            }
            Self::BatchTargetUpdate(BatchTargetUpdate { targets, .. }) => {
                if targets.is_empty() {
                    return Err("batch_target_update needs at least one target".into());
                }
                Ok(())
            }
            Self::LbBatchUpdate(_) | Self::LbHealthCheck(_) => Ok(()),
        }
    }
}

fn require_domain(domain: &str) -> Result<(), String> {
    if domain.trim().is_empty() {
        return Err("domain must not be empty".into());
    }
    Ok(())
}

fn check_weights(weights: &[TargetWeight]) -> Result<(), String> {
    if weights.is_empty() {
        return Ok(());
    }
    if let Some(w) = weights.iter().find(|w| w.weight > 100) {
        return Err(format!("weight {} for '{}' exceeds 100", w.weight, w.target));
    }
    let total: u32 = weights.iter().map(|w| u32::from(w.weight)).sum();
    if total != 100 {
        return Err(format!("weights must sum to 100, got {total}"));
    }
    Ok(())
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
