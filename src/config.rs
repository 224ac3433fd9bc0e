//! TOML configuration for vigil.
//!
//! One [`VigilConfig`] is built at process start and passed by reference into
//! every run. Secrets never live in the file: it only names the environment
//! variables that hold them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::detect::action::ActionRules;
use crate::detect::{Priority, Severity};
use crate::domains::DomainKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing credential: environment variable {env} ({purpose}) is not set")]
    MissingCredential { env: String, purpose: &'static str },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid cron expression '{expr}' for {domain}: {reason}")]
    InvalidCron {
        domain: DomainKind,
        expr: String,
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VigilConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub cost: CostConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub integrity: IntegrityConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl VigilConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load from, in order:
    /// 1. `explicit` (the `--config` flag or `VIGIL_CONFIG`), which must exist.
    /// 2. `./vigil.toml` when present.
    /// 3. Compiled-in defaults.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let local = Path::new("vigil.toml");
        if local.exists() {
            return Self::load(local);
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }

    /// Database the integrity checks run against.
    pub fn integrity_database(&self) -> &str {
        self.integrity.database.as_deref().unwrap_or(&self.database.path)
    }
}

// ---------------------------------------------------------------------------
// Storage and sources
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/vigil.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// Upper bound on any single source call; a slower source yields no data.
    pub timeout_secs: u64,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

// ---------------------------------------------------------------------------
// Cost
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    pub budget: f64,
    pub deviation_threshold_pct: f64,
    pub critical_deviation_pct: f64,
    pub trend_alert_deviation_pct: f64,
    pub history_days: u32,
    pub high_usage_magnitude: f64,
    pub high_usage_budget_share: f64,
    pub hosting_url: String,
    pub hosting_token_env: String,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            budget: 500.0,
            deviation_threshold_pct: 20.0,
            critical_deviation_pct: 50.0,
            trend_alert_deviation_pct: 10.0,
            history_days: 30,
            high_usage_magnitude: 1000.0,
            high_usage_budget_share: 0.3,
            hosting_url: "https://api.hosting.example/v1".to_string(),
            hosting_token_env: "VIGIL_HOSTING_TOKEN".to_string(),
        }
    }
}

impl CostConfig {
    pub fn action_rules(&self) -> ActionRules {
        ActionRules {
            deviation_threshold_pct: self.deviation_threshold_pct,
            critical_deviation_pct: self.critical_deviation_pct,
            trend_alert_deviation_pct: self.trend_alert_deviation_pct,
            high_usage_magnitude: self.high_usage_magnitude,
            high_usage_budget_share: self.high_usage_budget_share,
        }
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub window_minutes: u32,
    pub deploy_failure_threshold: usize,
    pub deploy_failure_critical: usize,
    pub latency_spike_pct: f64,
    pub default_baseline_p95_ms: f64,
    pub error_rate_threshold: f64,
    pub error_rate_critical: f64,
    /// Earlier runs' metrics inside this many minutes count toward patterns.
    /// Zero limits patterns to the current run.
    pub pattern_lookback_minutes: u32,
    pub ci_url: String,
    pub ci_token_env: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            window_minutes: 60,
            deploy_failure_threshold: 3,
            deploy_failure_critical: 5,
            latency_spike_pct: 20.0,
            default_baseline_p95_ms: 500.0,
            error_rate_threshold: 0.05,
            error_rate_critical: 0.10,
            pattern_lookback_minutes: 60,
            ci_url: "https://ci.example/api".to_string(),
            ci_token_env: "VIGIL_CI_TOKEN".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Integrity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityCheck {
    pub name: String,
    /// Must return a single integer column: the number of offending rows.
    pub sql: String,
    #[serde(default = "default_check_severity")]
    pub severity: Severity,
}

fn default_check_severity() -> Severity {
    Severity::High
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrityConfig {
    /// Defaults to `database.path`.
    pub database: Option<String>,
    pub checks: Vec<IntegrityCheck>,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            database: None,
            checks: default_checks(),
        }
    }
}

fn default_checks() -> Vec<IntegrityCheck> {
    let check = |name: &str, sql: &str| IntegrityCheck {
        name: name.to_string(),
        sql: sql.to_string(),
        severity: Severity::High,
    };
    vec![
        check(
            "duplicate_emails",
            "SELECT COUNT(*) FROM (SELECT lower(email) FROM users GROUP BY lower(email) HAVING COUNT(*) > 1)",
        ),
        check("negative_prices", "SELECT COUNT(*) FROM products WHERE price < 0"),
        check(
            "missing_product_refs",
            "SELECT COUNT(*) FROM orders o LEFT JOIN products p ON p.id = o.product_id WHERE p.id IS NULL",
        ),
        check(
            "orphaned_sessions",
            "SELECT COUNT(*) FROM sessions s LEFT JOIN users u ON u.id = s.user_id WHERE u.id IS NULL",
        ),
    ]
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub issue_url: Option<String>,
    pub alert_url: Option<String>,
    pub scale_url: Option<String>,
    pub token_env: String,
    pub timeout_secs: u64,
    /// A fingerprint that fired within this many hours is not fired again.
    pub cooldown_hours: u32,
    /// Actions below this priority are reported but not dispatched.
    pub min_priority: Priority,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            issue_url: None,
            alert_url: None,
            scale_url: None,
            token_env: "VIGIL_DISPATCH_TOKEN".to_string(),
            timeout_secs: 10,
            cooldown_hours: 24,
            min_priority: Priority::Low,
        }
    }
}

// ---------------------------------------------------------------------------
// Schedule & logging
// ---------------------------------------------------------------------------

/// Six-field cron expressions (with seconds) for `vigil watch`. A missing
/// entry disables that domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub cost: Option<String>,
    pub health: Option<String>,
    pub integrity: Option<String>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cost: Some("0 0 6 * * *".to_string()),
            health: Some("0 */5 * * * *".to_string()),
            integrity: Some("0 30 3 * * *".to_string()),
        }
    }
}

impl ScheduleConfig {
    pub fn expression(&self, domain: DomainKind) -> Option<&str> {
        match domain {
            DomainKind::Cost => self.cost.as_deref(),
            DomainKind::Health => self.health.as_deref(),
            DomainKind::Integrity => self.integrity.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Secrets resolved from the environment for one domain run.
#[derive(Clone, Default)]
pub struct Credentials {
    pub hosting_token: Option<String>,
    pub ci_token: Option<String>,
    pub dispatch_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("hosting_token", &self.hosting_token.as_ref().map(|_| "<redacted>"))
            .field("ci_token", &self.ci_token.as_ref().map(|_| "<redacted>"))
            .field("dispatch_token", &self.dispatch_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credentials {
    pub fn resolve(config: &VigilConfig, domain: DomainKind, dry_run: bool) -> Result<Self, ConfigError> {
        Self::resolve_with(config, domain, dry_run, |name| std::env::var(name).ok())
    }

    /// Like [`Credentials::resolve`] with an injectable variable lookup.
    pub fn resolve_with<F>(config: &VigilConfig, domain: DomainKind, dry_run: bool, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |env: &str, purpose: &'static str| -> Result<String, ConfigError> {
            lookup(env)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingCredential {
                    env: env.to_string(),
                    purpose,
                })
        };

        let mut creds = Credentials::default();
        match domain {
            DomainKind::Cost => {
                creds.hosting_token = Some(require(&config.cost.hosting_token_env, "hosting usage API token")?);
            }
            DomainKind::Health => {
                creds.ci_token = Some(require(&config.health.ci_token_env, "CI API token")?);
            }
            DomainKind::Integrity => {}
        }
        if !dry_run {
            creds.dispatch_token = Some(require(&config.dispatch.token_env, "dispatch token")?);
        }
        Ok(creds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_documented_thresholds() {
        let cfg = VigilConfig::default();
        assert_eq!(cfg.cost.budget, 500.0);
        assert_eq!(cfg.health.deploy_failure_threshold, 3);
        assert_eq!(cfg.health.error_rate_threshold, 0.05);
        assert_eq!(cfg.integrity.checks.len(), 4);
        assert_eq!(cfg.dispatch.cooldown_hours, 24);
        assert_eq!(cfg.integrity_database(), "data/vigil.db");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg = VigilConfig::from_toml(
            r#"
            [cost]
            budget = 1200.0

            [dispatch]
            min_priority = "high"

            [integrity]
            database = "/srv/shop.db"
            checks = [{ name = "stale_carts", sql = "SELECT 0", severity = "medium" }]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.cost.budget, 1200.0);
        assert_eq!(cfg.cost.deviation_threshold_pct, 20.0);
        assert_eq!(cfg.dispatch.min_priority, Priority::High);
        assert_eq!(cfg.integrity_database(), "/srv/shop.db");
        assert_eq!(cfg.integrity.checks[0].severity, Severity::Medium);
        assert_eq!(cfg.health.window_minutes, 60);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = VigilConfig::load_or_default(Some(Path::new("/nonexistent/vigil.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_credentials_required_per_domain() {
        let cfg = VigilConfig::default();
        let env: HashMap<&str, &str> = [("VIGIL_CI_TOKEN", "ci"), ("VIGIL_DISPATCH_TOKEN", "")].into();
        let lookup = |k: &str| env.get(k).map(|v| v.to_string());

        let err = Credentials::resolve_with(&cfg, DomainKind::Cost, true, lookup).unwrap_err();
        assert!(err.to_string().contains("VIGIL_HOSTING_TOKEN"));

        let creds = Credentials::resolve_with(&cfg, DomainKind::Health, true, lookup).unwrap();
        assert_eq!(creds.ci_token.as_deref(), Some("ci"));
        assert!(creds.dispatch_token.is_none());

        // empty values count as missing
        let err = Credentials::resolve_with(&cfg, DomainKind::Integrity, false, lookup).unwrap_err();
        assert!(err.to_string().contains("VIGIL_DISPATCH_TOKEN"));
    }

    #[test]
    fn test_credentials_debug_redacts() {
        let creds = Credentials {
            ci_token: Some("secret".to_string()),
            ..Default::default()
        };
        assert!(!format!("{:?}", creds).contains("secret"));
    }
}
