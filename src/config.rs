use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::duration::{
    deserialize_duration, deserialize_durations, serialize_duration, serialize_durations,
};
use crate::plaid::PlaidEnvironment;

const ENV_CLIENT_ID: &str = "SPENDSYNC_PLAID_CLIENT_ID";
const ENV_SECRET: &str = "SPENDSYNC_PLAID_SECRET";
const ENV_ENVIRONMENT: &str = "SPENDSYNC_PLAID_ENVIRONMENT";
const ENV_DATA_DIR: &str = "SPENDSYNC_DATA_DIR";

/// Provider API settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaidConfig {
    pub client_id: Option<String>,
    pub secret: Option<String>,
    pub environment: PlaidEnvironment,
    /// Overrides the environment's base URL (useful for tests and proxies).
    pub base_url: Option<String>,
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub request_timeout: Duration,
}

impl Default for PlaidConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            secret: None,
            environment: PlaidEnvironment::Sandbox,
            base_url: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl fmt::Debug for PlaidConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaidConfig")
            .field("client_id", &self.client_id.as_ref().map(|_| "<redacted>"))
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("environment", &self.environment)
            .field("base_url", &self.base_url)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Spending aggregation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Transactions at or below this amount are treated as noise.
    pub noise_threshold: Decimal,
    /// Number of complete months before the current one that feed the
    /// historical figures.
    pub lookback_months: u32,
    /// Category terms that never count as spending. A term matches when its
    /// words appear, case-insensitively and on word boundaries, in any entry
    /// of a transaction's category list.
    pub excluded_categories: Vec<String>,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            noise_threshold: Decimal::ONE,
            lookback_months: 6,
            excluded_categories: ["transfer", "deposit", "credit card", "payroll"]
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

/// Webhook verification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Maximum distance between a token's issue time and now, in either
    /// direction.
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub max_token_age: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            max_token_age: Duration::from_secs(5 * 60),
        }
    }
}

/// Retry controller settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    /// Delay before each retry; the last entry is reused once exhausted.
    #[serde(
        deserialize_with = "deserialize_durations",
        serialize_with = "serialize_durations"
    )]
    pub delays: Vec<Duration>,
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub store_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
            ],
            store_timeout: Duration::from_secs(10),
        }
    }
}

/// Reconciliation scanner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    /// How long after linking a connection may go without statistics before
    /// the scanner picks it up.
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub grace_period: Duration,
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub scan_interval: Duration,
    /// Random jitter in the range [-jitter, +jitter] added to each interval.
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub jitter: Duration,
    /// Number of candidates processed concurrently; 1 means sequential.
    pub concurrency: usize,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(5 * 60),
            scan_interval: Duration::from_secs(5 * 60),
            jitter: Duration::ZERO,
            concurrency: 1,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to data directory. If relative, resolved from config file location.
    /// If not specified, defaults to the config file's directory.
    pub data_dir: Option<PathBuf>,
    pub plaid: PlaidConfig,
    pub aggregation: AggregationConfig,
    pub webhook: WebhookConfig,
    pub retry: RetryConfig,
    pub reconciliation: ReconciliationConfig,
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load config from a file, or return default config if file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Resolve the data directory path.
    ///
    /// If `data_dir` is set and relative, it's resolved relative to `config_dir`.
    /// If `data_dir` is not set, returns `config_dir`.
    pub fn resolve_data_dir(&self, config_dir: &Path) -> PathBuf {
        match &self.data_dir {
            Some(data_dir) if data_dir.is_absolute() => data_dir.clone(),
            Some(data_dir) => config_dir.join(data_dir),
            None => config_dir.to_path_buf(),
        }
    }

    /// Apply environment overrides using `lookup` (normally `std::env::var`).
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(client_id) = lookup(ENV_CLIENT_ID) {
            self.plaid.client_id = Some(client_id);
        }
        if let Some(secret) = lookup(ENV_SECRET) {
            self.plaid.secret = Some(secret);
        }
        if let Some(environment) = lookup(ENV_ENVIRONMENT) {
            self.plaid.environment = PlaidEnvironment::parse(&environment)?;
        }
        if let Some(data_dir) = lookup(ENV_DATA_DIR) {
            self.data_dir = Some(PathBuf::from(data_dir));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        if self.reconciliation.concurrency == 0 {
            anyhow::bail!("reconciliation.concurrency must be at least 1");
        }
        if self.aggregation.noise_threshold.is_sign_negative() {
            anyhow::bail!("aggregation.noise_threshold must not be negative");
        }
        Ok(())
    }
}

/// Loaded configuration with resolved paths and environment overrides.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub data_dir: PathBuf,
    pub plaid: PlaidConfig,
    pub aggregation: AggregationConfig,
    pub webhook: WebhookConfig,
    pub retry: RetryConfig,
    pub reconciliation: ReconciliationConfig,
}

/// Returns the default config file path.
///
/// Resolution order:
/// 1. `./spendsync.toml` if it exists in current directory
/// 2. `<config dir>/spendsync/spendsync.toml`
pub fn default_config_path() -> PathBuf {
    let local_config = PathBuf::from("spendsync.toml");
    if local_config.exists() {
        return local_config;
    }

    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("spendsync").join("spendsync.toml");
    }

    local_config
}

impl ResolvedConfig {
    /// Load config (or defaults when the file is missing), apply environment
    /// overrides and resolve the data directory against the config's parent.
    pub fn load_or_default(config_path: &Path) -> Result<Self> {
        Self::load_with_env(config_path, |key| std::env::var(key).ok())
    }

    pub fn load_with_env<F>(config_path: &Path, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config_path = if config_path.is_relative() {
            std::env::current_dir()
                .context("Failed to get current directory")?
                .join(config_path)
        } else {
            config_path.to_path_buf()
        };
        let config_dir = config_path
            .parent()
            .context("Config path has no parent directory")?;

        let mut config = Config::load_or_default(&config_path)?;
        config.apply_env_overrides(lookup)?;
        config.validate()?;

        Ok(Self {
            data_dir: config.resolve_data_dir(config_dir),
            plaid: config.plaid,
            aggregation: config.aggregation,
            webhook: config.webhook,
            retry: config.retry,
            reconciliation: config.reconciliation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_relative_data_dir() {
        let config = Config {
            data_dir: Some(PathBuf::from("data")),
            ..Default::default()
        };
        let config_dir = Path::new("/srv/spendsync");
        assert_eq!(
            config.resolve_data_dir(config_dir),
            PathBuf::from("/srv/spendsync/data")
        );
    }

    #[test]
    fn test_defaults_match_pipeline_constants() {
        let config = Config::default();
        assert_eq!(config.aggregation.noise_threshold, Decimal::ONE);
        assert_eq!(config.aggregation.lookback_months, 6);
        assert_eq!(config.webhook.max_token_age, Duration::from_secs(300));
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.reconciliation.grace_period, Duration::from_secs(300));
        assert_eq!(config.reconciliation.concurrency, 1);
    }

    #[test]
    fn test_load_sections() -> Result<()> {
        let dir = TempDir::new()?;
        let config_path = dir.path().join("spendsync.toml");

        let mut file = std::fs::File::create(&config_path)?;
        writeln!(file, "data_dir = \"./data\"")?;
        writeln!(file, "[plaid]")?;
        writeln!(file, "environment = \"production\"")?;
        writeln!(file, "request_timeout = \"3s\"")?;
        writeln!(file, "[aggregation]")?;
        writeln!(file, "noise_threshold = \"2.50\"")?;
        writeln!(file, "[retry]")?;
        writeln!(file, "max_attempts = 2")?;
        writeln!(file, "delays = [\"250ms\"]")?;
        writeln!(file, "[reconciliation]")?;
        writeln!(file, "grace_period = \"10m\"")?;
        writeln!(file, "concurrency = 4")?;

        let resolved = ResolvedConfig::load_with_env(&config_path, |_| None)?;
        assert_eq!(resolved.data_dir, dir.path().join("./data"));
        assert_eq!(resolved.plaid.environment, PlaidEnvironment::Production);
        assert_eq!(resolved.plaid.request_timeout, Duration::from_secs(3));
        assert_eq!(resolved.aggregation.noise_threshold, Decimal::new(250, 2));
        assert_eq!(resolved.retry.max_attempts, 2);
        assert_eq!(resolved.retry.delays, vec![Duration::from_millis(250)]);
        assert_eq!(
            resolved.reconciliation.grace_period,
            Duration::from_secs(600)
        );
        assert_eq!(resolved.reconciliation.concurrency, 4);
        Ok(())
    }

    #[test]
    fn test_env_overrides_win() -> Result<()> {
        let dir = TempDir::new()?;
        let config_path = dir.path().join("spendsync.toml");
        std::fs::write(&config_path, "[plaid]\nclient_id = \"from-file\"\n")?;

        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_CLIENT_ID, "from-env"),
            (ENV_SECRET, "shh"),
            (ENV_ENVIRONMENT, "development"),
        ]);
        let resolved = ResolvedConfig::load_with_env(&config_path, |key| {
            env.get(key).map(|v| v.to_string())
        })?;

        assert_eq!(resolved.plaid.client_id.as_deref(), Some("from-env"));
        assert_eq!(resolved.plaid.secret.as_deref(), Some("shh"));
        assert_eq!(resolved.plaid.environment, PlaidEnvironment::Development);
        Ok(())
    }

    #[test]
    fn test_missing_file_uses_config_dir() -> Result<()> {
        let dir = TempDir::new()?;
        let config_path = dir.path().join("spendsync.toml");

        let resolved = ResolvedConfig::load_with_env(&config_path, |_| None)?;
        assert_eq!(resolved.data_dir, dir.path());
        Ok(())
    }

    #[test]
    fn test_rejects_zero_attempts() -> Result<()> {
        let dir = TempDir::new()?;
        let config_path = dir.path().join("spendsync.toml");
        std::fs::write(&config_path, "[retry]\nmax_attempts = 0\n")?;

        let err = ResolvedConfig::load_with_env(&config_path, |_| None).unwrap_err();
        assert!(err.to_string().contains("max_attempts"));
        Ok(())
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = PlaidConfig {
            client_id: Some("client-123".to_string()),
            secret: Some("super-secret".to_string()),
            ..Default::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(!rendered.contains("client-123"));
    }
}
