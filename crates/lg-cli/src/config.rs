//! `linkguard.toml` configuration
//!
//! Every section and key is optional. Environment variables with the
//! `LINKGUARD_` prefix override the server URL and data paths.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use lg_client::{Backoff, EngineConfig};
use lg_core::{Canonicalizer, HeuristicPolicy, HeuristicScorer, PolicyError, PslError, SuffixList};
use lg_ledger::LedgerConfig;
use serde::{Deserialize, Serialize};

/// File read when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "linkguard.toml";

const WEEK_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read '{path}': {message}")]
    Io { path: String, message: String },
    #[error("Invalid config '{path}': {message}")]
    Parse { path: String, message: String },
    #[error("Invalid heuristic policy: {0}")]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Psl(#[from] PslError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub policy: HeuristicPolicy,
    pub resolver: ResolverConfig,
    pub client: ClientConfig,
    pub ledger: LedgerSection,
    pub canon: CanonConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub max_hops: u32,
    pub hop_timeout_ms: u64,
    pub total_budget_ms: u64,
    pub user_agent: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_hops: 5,
            hop_timeout_ms: 4000,
            total_budget_ms: 6000,
            user_agent: concat!("linkguard/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_url: String,
    pub state_path: PathBuf,
    pub request_timeout_secs: u64,
    pub cache_ttl_secs: u64,
    pub cache_outcomes: bool,
    pub sync_interval_secs: u64,
    pub retry_base_secs: u64,
    pub retry_max_secs: u64,
    /// Remote analyzer endpoint; remote analysis is off when unset
    pub remote_url: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8787".to_string(),
            state_path: PathBuf::from("linkguard-state.json"),
            request_timeout_secs: 10,
            cache_ttl_secs: WEEK_SECS,
            cache_outcomes: false,
            sync_interval_secs: WEEK_SECS,
            retry_base_secs: 30,
            retry_max_secs: 60 * 60,
            remote_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSection {
    pub max_white: usize,
    pub max_black: usize,
    pub max_versions: usize,
    pub storage_path: PathBuf,
    /// Ranked domain source (`.json` rows or a plain text list)
    pub domains_path: PathBuf,
    pub bind: String,
    /// 0 disables scheduled publishing
    pub publish_interval_secs: u64,
}

impl Default for LedgerSection {
    fn default() -> Self {
        let limits = LedgerConfig::default();
        Self {
            max_white: limits.max_white,
            max_black: limits.max_black,
            max_versions: limits.max_versions,
            storage_path: PathBuf::from("ledger.json"),
            domains_path: PathBuf::from("domains.txt"),
            bind: "127.0.0.1:8787".to_string(),
            publish_interval_secs: WEEK_SECS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanonConfig {
    /// Full Public Suffix List file used instead of the embedded list
    pub psl_path: Option<PathBuf>,
}

impl Config {
    /// Load `path`, or `linkguard.toml` when present, then apply the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let config = Self::from_toml(&text).map_err(|message| ConfigError::Parse {
            path: path.display().to_string(),
            message,
        })?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| e.to_string())
    }

    /// Apply `LINKGUARD_*` overrides read through `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("LINKGUARD_SERVER_URL") {
            self.client.server_url = url;
        }
        if let Some(path) = var("LINKGUARD_STATE_PATH") {
            self.client.state_path = PathBuf::from(path);
        }
        if let Some(url) = var("LINKGUARD_REMOTE_URL") {
            self.client.remote_url = Some(url).filter(|u| !u.trim().is_empty());
        }
        if let Some(path) = var("LINKGUARD_LEDGER_PATH") {
            self.ledger.storage_path = PathBuf::from(path);
        }
        if let Some(path) = var("LINKGUARD_DOMAINS_PATH") {
            self.ledger.domains_path = PathBuf::from(path);
        }
        if let Some(bind) = var("LINKGUARD_BIND") {
            self.ledger.bind = bind;
        }
    }

    pub fn canonicalizer(&self) -> Result<Canonicalizer, ConfigError> {
        let list = match &self.canon.psl_path {
            Some(path) => SuffixList::from_path(path)?,
            None => SuffixList::embedded()?,
        };
        Ok(Canonicalizer::new(Arc::new(list)))
    }

    pub fn scorer(&self) -> Result<HeuristicScorer, ConfigError> {
        Ok(HeuristicScorer::new(self.policy.clone())?)
    }

    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            max_white: self.ledger.max_white,
            max_black: self.ledger.max_black,
            max_versions: self.ledger.max_versions,
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            total_budget: Duration::from_millis(self.resolver.total_budget_ms),
            cache_outcomes: self.client.cache_outcomes,
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            base: Duration::from_secs(self.client.retry_base_secs.max(1)),
            max: Duration::from_secs(self.client.retry_max_secs.max(self.client.retry_base_secs).max(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lg_core::Combiner;

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(Config::from_toml("").unwrap(), Config::default());
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::from_toml(
            r#"
            [policy]
            block_threshold = 0.8
            combiner = "soft_or"

            [resolver]
            max_hops = 3

            [ledger]
            max_versions = 10
            bind = "0.0.0.0:9000"
            "#,
        )
        .unwrap();
        assert_eq!(config.policy.block_threshold, 0.8);
        assert_eq!(config.policy.combiner, Combiner::SoftOr);
        assert_eq!(config.policy.weights, HeuristicPolicy::default().weights);
        assert_eq!(config.resolver.max_hops, 3);
        assert_eq!(config.resolver.hop_timeout_ms, 4000);
        assert_eq!(config.ledger_config().max_versions, 10);
        assert_eq!(config.ledger_config().max_white, 1000);
        assert_eq!(config.ledger.bind, "0.0.0.0:9000");
        assert!(config.scorer().is_ok());
    }

    #[test]
    fn test_unknown_value_type_is_rejected() {
        assert!(Config::from_toml("[resolver]\nmax_hops = \"five\"").is_err());
    }

    #[test]
    fn test_invalid_policy_is_rejected() {
        let config = Config::from_toml("[policy]\nblock_threshold = 0.0").unwrap();
        assert!(matches!(config.scorer(), Err(ConfigError::Policy(_))));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(|key| match key {
            "LINKGUARD_SERVER_URL" => Some("https://hotset.example.com".to_string()),
            "LINKGUARD_STATE_PATH" => Some("/tmp/state.json".to_string()),
            "LINKGUARD_REMOTE_URL" => Some(" ".to_string()),
            _ => None,
        });
        assert_eq!(config.client.server_url, "https://hotset.example.com");
        assert_eq!(config.client.state_path, PathBuf::from("/tmp/state.json"));
        assert_eq!(config.client.remote_url, None);
        assert_eq!(config.ledger.bind, LedgerSection::default().bind);
    }

    #[test]
    fn test_missing_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("linkguard.toml");
        let mut config = Config::default();
        config.client.cache_outcomes = true;
        config.canon.psl_path = Some(PathBuf::from("psl.dat"));
        std::fs::write(&path, toml::to_string(&config).unwrap()).unwrap();
        assert_eq!(Config::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_backoff_is_sane() {
        let mut config = Config::default();
        config.client.retry_base_secs = 0;
        config.client.retry_max_secs = 0;
        let backoff = config.backoff();
        assert_eq!(backoff.base, Duration::from_secs(1));
        assert!(backoff.max >= backoff.base);
    }
}
