use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

fn default_min_pool_size() -> usize {
    2
}
fn default_max_pool_size() -> usize {
    10
}
fn default_warmup_delay_ms() -> u64 {
    250
}
fn default_recycle_timeout_ms() -> u64 {
    5_000
}
fn default_health_check_interval_ms() -> u64 {
    30_000
}
fn default_max_idle_ms() -> u64 {
    300_000
}

/// Window Pool sizing, matching the enumerated fields of component B.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub min_pool_size: usize,
    pub max_pool_size: usize,
    pub warmup_delay_ms: u64,
    pub recycle_timeout_ms: u64,
    pub health_check_interval_ms: u64,
    pub max_idle_ms: u64,
    pub max_health_failures: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_pool_size: default_min_pool_size(),
            max_pool_size: default_max_pool_size(),
            warmup_delay_ms: default_warmup_delay_ms(),
            recycle_timeout_ms: default_recycle_timeout_ms(),
            health_check_interval_ms: default_health_check_interval_ms(),
            max_idle_ms: default_max_idle_ms(),
            max_health_failures: 3,
        }
    }
}

fn default_profile_name() -> String {
    "balanced".to_string()
}

/// Multi-Page Manager defaults; the active profile is resolved at startup
/// from `default_profile` unless overridden per-session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PagesConfig {
    pub default_profile: String,
    pub max_memory_mb_override: Option<u64>,
    pub max_cpu_percent_override: Option<f64>,
}

impl Default for PagesConfig {
    fn default() -> Self {
        Self {
            default_profile: default_profile_name(),
            max_memory_mb_override: None,
            max_cpu_percent_override: None,
        }
    }
}

fn default_proxy_strategy() -> String {
    "round-robin".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub default_strategy: String,
    pub auto_blacklist: bool,
    pub auto_blacklist_threshold: u32,
    pub auto_blacklist_duration_ms: u64,
    pub response_time_history_len: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            default_strategy: default_proxy_strategy(),
            auto_blacklist: true,
            auto_blacklist_threshold: 5,
            auto_blacklist_duration_ms: 15 * 60 * 1000,
            response_time_history_len: 100,
        }
    }
}

fn default_max_history() -> usize {
    500
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CookiesConfig {
    pub max_history_size: usize,
}

impl Default for CookiesConfig {
    fn default() -> Self {
        Self {
            max_history_size: default_max_history(),
        }
    }
}

fn default_vault_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("revenant")
        .join("evidence")
}

fn default_recordings_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("revenant")
        .join("recordings")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub evidence_dir: PathBuf,
    pub recordings_dir: PathBuf,
    pub auto_verify: bool,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            evidence_dir: default_vault_dir(),
            recordings_dir: default_recordings_dir(),
            auto_verify: true,
        }
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8765
}
fn default_min_tls_version() -> String {
    "TLSv1.2".to_string()
}

fn default_certs_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("revenant")
        .join("certs")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub bind_addr: String,
    pub port: u16,
    pub tls_enabled: bool,
    pub min_tls_version: String,
    pub certs_dir: PathBuf,
    pub cert_validity_days: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            tls_enabled: false,
            min_tls_version: default_min_tls_version(),
            certs_dir: default_certs_dir(),
            cert_validity_days: 365,
        }
    }
}

fn default_identity_store_base() -> String {
    "http://127.0.0.1:4280".to_string()
}
fn default_cache_timeout_ms() -> u64 {
    60_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub base_url: String,
    pub cache_timeout_ms: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            base_url: default_identity_store_base(),
            cache_timeout_ms: default_cache_timeout_ms(),
        }
    }
}

/// Root configuration, one sub-struct per concern. Every field is
/// `#[serde(default)]` so partial config files are valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pool: PoolConfig,
    pub pages: PagesConfig,
    pub proxy: ProxyConfig,
    pub cookies: CookiesConfig,
    pub vault: VaultConfig,
    pub transport: TransportConfig,
    pub identity: IdentityConfig,
}

impl Config {
    /// Loads from `~/.config/revenant/revenant.toml`, falling back to
    /// defaults if the file does not exist.
    pub fn load() -> Result<Self> {
        let path = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("revenant")
            .join("revenant.toml");
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let cfg: Config = toml::from_str(&text)?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.pool.min_pool_size, 2);
        assert_eq!(cfg.pool.max_pool_size, 10);
        assert_eq!(cfg.transport.port, 8765);
        assert_eq!(cfg.transport.min_tls_version, "TLSv1.2");
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("revenant.toml");
        std::fs::write(&path, "[pool]\nmin_pool_size = 4\n").unwrap();
        let cfg = Config::load_from(&path).unwrap();
        assert_eq!(cfg.pool.min_pool_size, 4);
        assert_eq!(cfg.pool.max_pool_size, 10);
    }
}
