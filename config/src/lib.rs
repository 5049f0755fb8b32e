//! gradevault Configuration
//!
//! Shared configuration crate for all gradevault components.
//!
//! Handles loading configuration from:
//! 1. GV_CONFIG env var (explicit path)
//! 2. ./gradevault.toml (current directory)
//! 3. ~/.gradevault/config.toml (user home)
//!
//! Environment variables take precedence over TOML config.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, OnceLock};
use std::time::Duration;
use std::{env, fs};

/// Global config instance for convenience access
pub static GLOBAL_CONFIG: OnceLock<VaultConfig> = OnceLock::new();

const LOCAL_CONFIG_FILE: &str = "gradevault.toml";
const CONFIG_FILE_NAME: &str = "config.toml";
const CONFIG_DIR_NAME: &str = ".gradevault";

// ============================================================================
// Default Constants
// ============================================================================

const DEFAULT_FETCH_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_REVEAL_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_PERMIT_VALIDITY_SECS: u64 = 86_400;
const DEFAULT_DEV_LATENCY_MS: u64 = 0;

// ============================================================================
// Config Structs
// ============================================================================

/// Root configuration structure (matches TOML layout)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaultConfig {
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub features: FeatureFlags,
}

/// Which records the store asks the ledger for
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Every owner's records (needed for the global average)
    #[default]
    All,
    /// Only the caller's own records
    Owner,
}

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            visibility: Visibility::All,
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
        }
    }
}

fn default_fetch_timeout() -> u64 {
    DEFAULT_FETCH_TIMEOUT_MS
}

/// Reveal oracle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    #[serde(default = "default_reveal_timeout")]
    pub reveal_timeout_ms: u64,
    #[serde(default = "default_permit_validity")]
    pub permit_validity_secs: u64,
    /// Simulated latency of the development oracle
    #[serde(default = "default_dev_latency")]
    pub dev_latency_ms: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            reveal_timeout_ms: DEFAULT_REVEAL_TIMEOUT_MS,
            permit_validity_secs: DEFAULT_PERMIT_VALIDITY_SECS,
            dev_latency_ms: DEFAULT_DEV_LATENCY_MS,
        }
    }
}

fn default_reveal_timeout() -> u64 {
    DEFAULT_REVEAL_TIMEOUT_MS
}
fn default_permit_validity() -> u64 {
    DEFAULT_PERMIT_VALIDITY_SECS
}
fn default_dev_latency() -> u64 {
    DEFAULT_DEV_LATENCY_MS
}

/// Caller identity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// File holding a hex-encoded 32-byte signing seed
    #[serde(default)]
    pub key_path: Option<String>,
}

/// Feature flags
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Allow commands backed by the in-memory ledger and dev oracle
    #[serde(default)]
    pub dev_mode: bool,
}

// ============================================================================
// Environment Variable Helpers
// ============================================================================

/// Set Option<String> from env var if present
fn env_option_string(key: &str, field: &mut Option<String>) {
    if let Ok(v) = env::var(key) {
        *field = Some(v);
    }
}

/// Set field from env var if present and parseable
fn env_parse<T: std::str::FromStr>(key: &str, field: &mut T) {
    if let Ok(v) = env::var(key) {
        match v.parse() {
            Ok(parsed) => *field = parsed,
            Err(_) => log::warn!("Ignoring unparseable {}={}", key, v),
        }
    }
}

/// Check if env var is set to a truthy value ("1" or "true")
fn env_bool(key: &str) -> Option<bool> {
    env::var(key)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

// ============================================================================
// Implementation
// ============================================================================

impl VaultConfig {
    /// Load configuration from config file with env var overrides
    pub fn load() -> Result<Self> {
        let mut config = match Self::find_config_file() {
            Some(path) => {
                log::info!("Loading config from: {}", path.display());
                Self::parse_file(&path)?
            }
            None => {
                log::info!("No config file found, using defaults and environment variables");
                Self::default()
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::parse_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn parse_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Find the config file path
    fn find_config_file() -> Option<PathBuf> {
        if let Ok(path) = env::var("GV_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
            log::warn!("GV_CONFIG points at missing file: {}", path.display());
        }

        let local_path = PathBuf::from(LOCAL_CONFIG_FILE);
        if local_path.exists() {
            return Some(local_path);
        }

        Self::default_config_path().filter(|p| p.exists())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // Ledger
        if let Ok(v) = env::var("GV_LEDGER_VISIBILITY") {
            self.ledger.visibility = match v.to_ascii_lowercase().as_str() {
                "owner" => Visibility::Owner,
                _ => Visibility::All,
            };
        }
        env_parse("GV_LEDGER_FETCH_TIMEOUT_MS", &mut self.ledger.fetch_timeout_ms);

        // Oracle
        env_parse("GV_REVEAL_TIMEOUT_MS", &mut self.oracle.reveal_timeout_ms);
        env_parse(
            "GV_PERMIT_VALIDITY_SECS",
            &mut self.oracle.permit_validity_secs,
        );
        env_parse("GV_DEV_LATENCY_MS", &mut self.oracle.dev_latency_ms);

        // Identity
        env_option_string("GV_KEY_PATH", &mut self.identity.key_path);

        // Features
        if let Some(v) = env_bool("GV_DEV_MODE") {
            self.features.dev_mode = v;
        }
    }

    /// Get the default config file path
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Generate a sample config file
    pub fn generate_sample() -> String {
        let mut sample = Self::default();
        sample.features.dev_mode = true;
        sample.identity.key_path = Some("identity.key".into());
        toml::to_string_pretty(&sample).unwrap_or_default()
    }

    /// Get the global config instance, initializing it if necessary.
    ///
    /// Falls back to defaults if loading fails.
    pub fn global() -> &'static VaultConfig {
        GLOBAL_CONFIG.get_or_init(|| {
            Self::load().unwrap_or_else(|e| {
                log::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            })
        })
    }

    /// Try to get the global config instance.
    ///
    /// Returns `None` if config hasn't been initialized yet.
    pub fn try_global() -> Option<&'static VaultConfig> {
        GLOBAL_CONFIG.get()
    }

    /// Initialize the global config with a specific instance.
    ///
    /// Returns `Err(config)` if already initialized.
    pub fn set_global(config: VaultConfig) -> Result<(), VaultConfig> {
        GLOBAL_CONFIG.set(config)
    }

    /// Fail unless `[features] dev_mode` is on; `what` names the dev-only action
    pub fn require_dev_mode(&self, what: &str) -> Result<()> {
        if !self.features.dev_mode {
            anyhow::bail!(
                "{} runs against in-memory dev collaborators; set [features] dev_mode = true or GV_DEV_MODE=1",
                what
            );
        }
        Ok(())
    }
}

/// Shorthand for `VaultConfig::global()`.
#[inline]
pub fn global_config() -> &'static VaultConfig {
    VaultConfig::global()
}

// ============================================================================
// Parsed Config (lazy-initialized constants)
// ============================================================================

/// Pre-parsed oracle timings.
///
/// # Example
/// ```ignore
/// use gradevault_config::ORACLE;
///
/// let timeout = ORACLE.reveal_timeout; // Duration
/// ```
pub static ORACLE: LazyLock<OracleRuntime> = LazyLock::new(|| {
    let cfg = VaultConfig::global();
    OracleRuntime::from(&cfg.oracle)
});

/// Oracle configuration with `Duration` fields.
#[derive(Debug, Clone, Copy)]
pub struct OracleRuntime {
    pub reveal_timeout: Duration,
    pub permit_validity_secs: u64,
    pub dev_latency: Duration,
}

impl From<&OracleConfig> for OracleRuntime {
    fn from(cfg: &OracleConfig) -> Self {
        Self {
            reveal_timeout: Duration::from_millis(cfg.reveal_timeout_ms),
            permit_validity_secs: cfg.permit_validity_secs,
            dev_latency: Duration::from_millis(cfg.dev_latency_ms),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
