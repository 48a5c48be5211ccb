use anyhow::{Context, Result, bail};
use orchestrator::{CompilerOptions, EngineConfig, HealthConfig, RetryConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths;

// ============================================================================
// Settings File
// ============================================================================

/// Contents of `config.toml`. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub retry: RetrySection,
    pub health: HealthSection,
    pub strategy: StrategySection,
    pub ledger: LedgerSection,
    pub providers: ProvidersSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            backoff_factor: 2.0,
            max_delay_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthSection {
    pub interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            interval_secs: 2,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StrategySection {
    /// Highest traffic percentage a canary's first phase may carry
    pub canary_ceiling: u8,
    pub default_batch_size: usize,
    /// Reject actions that make no sense for the chosen strategy
    pub strict_compatibility: bool,
}

impl Default for StrategySection {
    fn default() -> Self {
        Self {
            canary_ceiling: 10,
            default_batch_size: 1,
            strict_compatibility: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LedgerSection {
    /// Journal directory; `~` and `$VARS` are expanded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProvidersSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lb_endpoint: Option<String>,
    /// Name of the environment variable holding the bearer token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for ProvidersSection {
    fn default() -> Self {
        Self {
            dns_endpoint: None,
            lb_endpoint: None,
            token_env: None,
            request_timeout_secs: 10,
        }
    }
}

impl Settings {
    /// Load settings from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let settings: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid config format in {}", path.display()))?;
        settings
            .validate()
            .with_context(|| format!("Invalid config in {}", path.display()))?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if self.retry.backoff_factor < 1.0 {
            bail!("retry.backoff_factor must be at least 1.0");
        }
        if self.health.interval_secs == 0 {
            bail!("health.interval_secs must be at least 1");
        }
        if self.strategy.canary_ceiling == 0 || self.strategy.canary_ceiling > 100 {
            bail!("strategy.canary_ceiling must be between 1 and 100");
        }
        if self.strategy.default_batch_size == 0 {
            bail!("strategy.default_batch_size must be at least 1");
        }
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            retry: RetryConfig {
                max_attempts: self.retry.max_attempts,
                base_delay: Duration::from_millis(self.retry.base_delay_ms),
                backoff_factor: self.retry.backoff_factor,
                max_delay: Duration::from_millis(self.retry.max_delay_ms),
            },
            health: HealthConfig {
                interval: Duration::from_secs(self.health.interval_secs),
                timeout: Duration::from_secs(self.health.timeout_secs),
            },
            compiler: CompilerOptions {
                canary_ceiling: self.strategy.canary_ceiling,
                default_batch_size: self.strategy.default_batch_size,
                strict_compatibility: self.strategy.strict_compatibility,
            },
        }
    }

    /// Journal directory, falling back to the state directory
    pub fn ledger_dir(&self) -> Result<PathBuf> {
        match &self.ledger.dir {
            Some(dir) => Ok(paths::expand(dir)),
            None => paths::state_dir(),
        }
    }

    /// Bearer token read from the configured environment variable
    pub fn provider_token(&self) -> Option<String> {
        let var = self.providers.token_env.as_deref()?;
        match std::env::var(var) {
            Ok(token) if !token.is_empty() => Some(token),
            _ => {
                log::warn!("Provider token variable {var} is not set");
                None
            }
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Could not serialize config")
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(settings, Settings::default());

        let engine = settings.engine_config();
        assert_eq!(engine.retry.max_attempts, 3);
        assert_eq!(engine.health.timeout, Duration::from_secs(60));
        assert_eq!(engine.compiler.canary_ceiling, 10);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[retry]
max_attempts = 5

[strategy]
canary_ceiling = 5

[providers]
lb_endpoint = "https://lb.internal"
"#,
        )
        .unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.retry.base_delay_ms, 500);
        assert_eq!(settings.strategy.canary_ceiling, 5);
        assert_eq!(settings.health, HealthSection::default());
        assert_eq!(
            settings.providers.lb_endpoint.as_deref(),
            Some("https://lb.internal")
        );
        assert_eq!(settings.providers.request_timeout_secs, 10);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[retry]\nmax_attempts = 0\n").unwrap();
        assert!(Settings::load(&path).is_err());

        fs::write(&path, "[strategy]\ncanary_ceiling = 120\n").unwrap();
        assert!(Settings::load(&path).is_err());
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[health]\ninterval = 3\n").unwrap();
        assert!(Settings::load(&path).is_err());
    }

    #[test]
    fn test_ledger_dir_is_expanded() {
        let settings = Settings {
            ledger: LedgerSection {
                dir: Some("~/cutover-journal".to_string()),
            },
            ..Settings::default()
        };
        let home = dirs::home_dir().unwrap();
        assert_eq!(settings.ledger_dir().unwrap(), home.join("cutover-journal"));
    }

    #[test]
    fn test_round_trips_through_toml() {
        let settings = Settings::default();
        let text = settings.to_toml().unwrap();
        assert!(text.contains("[retry]"));
        let parsed: Settings = toml::from_str(&text).unwrap();
        assert_eq!(parsed, settings);
    }
}
