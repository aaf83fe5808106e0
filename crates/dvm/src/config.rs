//! DVM and client configuration
//!
//! Both configs load from an optional TOML file, then environment
//! variables override the file. The binaries apply their CLI flags last.

use crate::error::{DvmError, Result};
use nostr::Keys;
use nostr_client::{DEFAULT_RELAYS, RelayConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Comma-separated relay URLs
pub const ENV_RELAYS: &str = "DVM_RELAYS";
/// Hex secret key
pub const ENV_SECRET_KEY: &str = "NOSTR_SECRET_KEY";

fn default_relays() -> Vec<String> {
    DEFAULT_RELAYS.iter().map(|r| r.to_string()).collect()
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DvmConfig {
    /// Name shown in the NIP-89 announcement
    pub name: String,
    /// Description shown in the NIP-89 announcement
    pub about: String,
    /// Nostr relays to connect to
    pub relays: Vec<String>,
    /// Hex secret key; an ephemeral key is generated when unset
    pub secret_key: Option<String>,
    /// Maximum job ids remembered for de-duplication
    pub processed_capacity: usize,
    /// How long a job id blocks redelivery
    pub processed_ttl_secs: u64,
    /// Interval between stats log lines
    pub status_interval_secs: u64,
    /// Publish a NIP-89 announcement on start
    pub announce: bool,
    pub connect_timeout_secs: u64,
    /// Price attached to results as an `amount` tag
    pub result_amount_msats: Option<u64>,
}

impl Default for DvmConfig {
    fn default() -> Self {
        Self {
            name: "Memory Curator".to_string(),
            about: "Analyzes daily logs and suggests additions to long-term memory".to_string(),
            relays: default_relays(),
            secret_key: None,
            processed_capacity: crate::dedup::DEFAULT_CAPACITY,
            processed_ttl_secs: crate::dedup::DEFAULT_TTL.as_secs(),
            status_interval_secs: 60,
            announce: false,
            connect_timeout_secs: 10,
            result_amount_msats: None,
        }
    }
}

impl DvmConfig {
    /// Load from `path` when given, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config: Self = read_toml(path)?;
        config.apply_env_from(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply overrides from a variable lookup.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(relays) = lookup(ENV_RELAYS).and_then(|v| parse_relay_list(&v)) {
            self.relays = relays;
        }
        if let Some(secret) = lookup(ENV_SECRET_KEY).filter(|s| !s.trim().is_empty()) {
            self.secret_key = Some(secret);
        }
    }

    pub fn keys(&self) -> Result<Keys> {
        load_keys(self.secret_key.as_deref())
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            ..RelayConfig::default()
        }
    }

    pub fn processed_ttl(&self) -> Duration {
        Duration::from_secs(self.processed_ttl_secs)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs.max(1))
    }
}

/// Requester configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub relays: Vec<String>,
    pub secret_key: Option<String>,
    /// Seconds between polls for responses
    pub poll_interval_secs: u64,
    /// Overall wait for a result
    pub timeout_secs: u64,
    /// Per-poll query window
    pub query_timeout_secs: u64,
    /// Default `style` param for curation requests
    pub style: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relays: default_relays(),
            secret_key: None,
            poll_interval_secs: 3,
            timeout_secs: 30,
            query_timeout_secs: 5,
            style: "concise".to_string(),
        }
    }
}

impl ClientConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config: Self = read_toml(path)?;
        config.apply_env_from(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(relays) = lookup(ENV_RELAYS).and_then(|v| parse_relay_list(&v)) {
            self.relays = relays;
        }
        if let Some(secret) = lookup(ENV_SECRET_KEY).filter(|s| !s.trim().is_empty()) {
            self.secret_key = Some(secret);
        }
    }

    pub fn keys(&self) -> Result<Keys> {
        load_keys(self.secret_key.as_deref())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs.max(1))
    }
}

fn read_toml<T: Default + for<'de> Deserialize<'de>>(path: Option<&Path>) -> Result<T> {
    let Some(path) = path else {
        return Ok(T::default());
    };
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content)
        .map_err(|e| DvmError::Config(format!("{}: {}", path.display(), e)))
}

/// Split a comma list of relay URLs, ignoring blanks. `None` when empty.
pub fn parse_relay_list(value: &str) -> Option<Vec<String>> {
    let relays: Vec<String> = value
        .split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect();
    (!relays.is_empty()).then_some(relays)
}

fn load_keys(secret_hex: Option<&str>) -> Result<Keys> {
    match secret_hex {
        Some(secret) => Ok(Keys::from_secret_hex(secret)?),
        None => {
            let keys = Keys::generate();
            warn!(
                pubkey = %keys.public_key(),
                "no secret key configured, using an ephemeral identity"
            );
            Ok(keys)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    const SECRET: &str = "0000000000000000000000000000000000000000000000000000000000000001";

    #[test]
    fn test_default_config() {
        let config = DvmConfig::default();
        assert_eq!(config.relays.len(), 3);
        assert_eq!(config.processed_capacity, 10_000);
        assert_eq!(config.processed_ttl_secs, 86_400);
        assert_eq!(config.status_interval_secs, 60);
        assert!(!config.announce);

        let client = ClientConfig::default();
        assert_eq!(client.poll_interval(), Duration::from_secs(3));
        assert_eq!(client.timeout(), Duration::from_secs(30));
        assert_eq!(client.style, "concise");
    }

    #[test]
    fn test_load_partial_toml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "relays = [\"ws://localhost:7000\"]").unwrap();
        writeln!(file, "announce = true").unwrap();
        writeln!(file, "result_amount_msats = 2000").unwrap();

        let config: DvmConfig = read_toml(Some(file.path())).unwrap();
        assert_eq!(config.relays, vec!["ws://localhost:7000"]);
        assert!(config.announce);
        assert_eq!(config.result_amount_msats, Some(2000));
        assert_eq!(config.name, "Memory Curator");
        assert_eq!(config.connect_timeout_secs, 10);
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "relays = 7").unwrap();
        let result: Result<DvmConfig> = read_toml(Some(file.path()));
        assert!(matches!(result, Err(DvmError::Config(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result: Result<ClientConfig> =
            read_toml(Some(Path::new("/nonexistent/dvm-client.toml")));
        assert!(matches!(result, Err(DvmError::Io(_))));
    }

    #[test]
    fn test_env_overrides_file() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_RELAYS, " wss://a.example , ,wss://b.example"),
            (ENV_SECRET_KEY, SECRET),
        ]);
        let mut config = ClientConfig::default();
        config.apply_env_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.relays, vec!["wss://a.example", "wss://b.example"]);
        assert_eq!(config.secret_key.as_deref(), Some(SECRET));
    }

    #[test]
    fn test_blank_env_is_ignored() {
        let mut config = DvmConfig::default();
        config.apply_env_from(|key| match key {
            ENV_RELAYS => Some(" , ".to_string()),
            ENV_SECRET_KEY => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(config.relays, default_relays());
        assert!(config.secret_key.is_none());
    }

    #[test]
    fn test_keys_from_config() {
        let config = DvmConfig {
            secret_key: Some(SECRET.to_string()),
            ..DvmConfig::default()
        };
        let a = config.keys().unwrap();
        let b = config.keys().unwrap();
        assert_eq!(a.public_key(), b.public_key());

        let bad = DvmConfig {
            secret_key: Some("not-hex".to_string()),
            ..DvmConfig::default()
        };
        assert!(matches!(bad.keys(), Err(DvmError::Event(_))));
    }

    #[test]
    fn test_ephemeral_keys_differ() {
        let config = ClientConfig::default();
        assert_ne!(
            config.keys().unwrap().public_key(),
            config.keys().unwrap().public_key()
        );
    }
}
