//! Configuration loading and validation.
//!
//! Loads `./ecr-admission.toml` (or `$ECR_ADMISSION_CONFIG`). Every section
//! is optional. Environment variables override file values; file values
//! override defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use url::Url;

use crate::compliance::batch::DEFAULT_MAX_IN_FLIGHT;
use crate::registry::ecr::{EcrClientConfig, MAX_PAGE_SIZE};

/// Default config file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "ecr-admission.toml";

/// Env var naming an alternative config file.
pub const CONFIG_PATH_ENV: &str = "ECR_ADMISSION_CONFIG";

// ── Top-level config ────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Managed registry connection and selection.
    pub registry: RegistryConfig,
    /// Batch evaluation limits.
    pub evaluation: EvaluationConfig,
    /// Admission behaviour.
    pub admission: AdmissionConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// `path` overrides `$ECR_ADMISSION_CONFIG` and the default file name.
    /// A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or the result
    /// fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env = |key: &str| std::env::var(key).ok();
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path_with(env),
        };
        let mut config = Self::load_from_file(&path)?;
        config.apply_overrides(env);
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file only, no env overrides.
    fn load_from_file(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                tracing::debug!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
                    .with_context(|| format!("failed to parse {}", path.display()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "failed to read config file {}: {e}",
                path.display()
            )),
        }
    }

    /// Resolve the config path using a custom env resolver.
    fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        env(CONFIG_PATH_ENV).map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from)
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function so tests need not touch process env.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        // Region: the registry's own region wins over the ambient one.
        if let Some(v) = env("REGISTRY_REGION").or_else(|| env("AWS_REGION")) {
            self.registry.region = v;
        }
        if let Some(v) = env("ECR_ADMISSION_ENDPOINT") {
            self.registry.endpoint = Some(v);
        }

        if let Some(v) = env("ECR_ADMISSION_MAX_CONCURRENCY") {
            match v.parse() {
                Ok(n) => self.evaluation.max_concurrent_evaluations = n,
                Err(_) => tracing::warn!(
                    var = "ECR_ADMISSION_MAX_CONCURRENCY",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("ECR_ADMISSION_TIMEOUT_SECS") {
            match v.parse() {
                Ok(n) => self.evaluation.timeout_secs = n,
                Err(_) => tracing::warn!(
                    var = "ECR_ADMISSION_TIMEOUT_SECS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }

        if let Some(v) = env("LOG_LEVEL") {
            self.logging.level = v.to_ascii_lowercase();
        }
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.evaluation.max_concurrent_evaluations == 0 {
            anyhow::bail!("evaluation.max_concurrent_evaluations must be at least 1");
        }
        if self.evaluation.timeout_secs == 0 {
            anyhow::bail!("evaluation.timeout_secs must be at least 1");
        }
        if self.registry.request_timeout_secs == 0 {
            anyhow::bail!("registry.request_timeout_secs must be at least 1");
        }
        if !(1..=MAX_PAGE_SIZE).contains(&self.registry.page_size) {
            anyhow::bail!("registry.page_size must be between 1 and {MAX_PAGE_SIZE}");
        }
        if let Some(endpoint) = &self.registry.endpoint {
            Url::parse(endpoint)
                .with_context(|| format!("invalid registry endpoint '{endpoint}'"))?;
        }
        Ok(())
    }

    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or has wrongly typed fields.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }
}

// ── Registry config ─────────────────────────────────────────────

/// Managed registry settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Region of the managed registry.
    pub region: String,
    /// API endpoint; defaults to the regional ECR endpoint.
    ///
    /// Requests are unsigned, so against real ECR this must name a signing
    /// proxy. See [`EcrClientConfig::endpoint`].
    pub endpoint: Option<String>,
    /// Registry (account) id passed to API calls.
    pub registry_id: Option<String>,
    /// Accounts whose images are managed; empty accepts all.
    pub allowed_accounts: Vec<String>,
    /// Per-request HTTP timeout in seconds.
    pub request_timeout_secs: u64,
    /// Scan findings requested per page.
    pub page_size: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            region: String::new(),
            endpoint: None,
            registry_id: None,
            allowed_accounts: Vec::new(),
            request_timeout_secs: 10,
            page_size: 100,
        }
    }
}

impl RegistryConfig {
    /// Resolve the API endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not a valid URL, or if neither an
    /// endpoint nor a region is configured.
    pub fn endpoint_url(&self) -> Result<Url> {
        let raw = match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None if self.region.is_empty() => {
                anyhow::bail!("registry.region (or REGISTRY_REGION / AWS_REGION) is required")
            }
            None => format!("https://api.ecr.{}.amazonaws.com", self.region),
        };
        Url::parse(&raw).with_context(|| format!("invalid registry endpoint '{raw}'"))
    }

    /// Client settings for [`crate::registry::ecr::EcrClient`].
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint cannot be resolved.
    pub fn client_config(&self) -> Result<EcrClientConfig> {
        Ok(EcrClientConfig {
            endpoint: self.endpoint_url()?,
            registry_id: self.registry_id.clone(),
            page_size: self.page_size,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        })
    }
}

// ── Evaluation config ───────────────────────────────────────────

/// Batch evaluation limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Maximum image evaluations in flight per request.
    pub max_concurrent_evaluations: usize,
    /// Deadline for a whole request's evaluation, in seconds.
    pub timeout_secs: u64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            max_concurrent_evaluations: DEFAULT_MAX_IN_FLIGHT,
            timeout_secs: 25,
        }
    }
}

// ── Admission config ────────────────────────────────────────────

/// Admission behaviour.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Namespaces whose workloads are always allowed.
    pub critical_namespaces: Vec<String>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            critical_namespaces: vec!["kube-system".to_owned()],
        }
    }
}

// ── Logging config ──────────────────────────────────────────────

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line on stderr.
    #[default]
    Json,
    /// Human-readable lines on stderr.
    Pretty,
}

/// Log output settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: LogFormat::Json,
        }
    }
}
