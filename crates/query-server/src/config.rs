use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_query_endpoint")]
    pub query_endpoint: String,
    #[serde(default = "default_heartbeat_endpoint")]
    pub heartbeat_endpoint: String,
    #[serde(default = "default_block_publish_endpoint")]
    pub block_publish_endpoint: String,
    #[serde(default = "default_transaction_publish_endpoint")]
    pub transaction_publish_endpoint: String,
    #[serde(default = "default_polling_interval_seconds")]
    pub polling_interval_seconds: u64,
    #[serde(default = "default_heartbeat_interval_seconds")]
    pub heartbeat_interval_seconds: u64,
    #[serde(default = "default_subscription_limit")]
    pub subscription_limit: usize,
    /// How long a subscription lives without a `renew` (§4.6). Accepts a
    /// humantime string ("10m", "90s"); absent means the default below.
    #[serde(default, deserialize_with = "query_helpers::de::deserialize_optional_duration")]
    pub subscription_expiration: Option<Duration>,
    #[serde(default = "default_send_queue_high_water_mark")]
    pub send_queue_high_water_mark: i32,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = parse_config_path_arg(env::args().skip(1))?
            .or_else(resolve_server_config_path)
            .context(
                "server config path not found (QUERY_SERVER_CONFIG_PATH or query-server.yaml/yml)",
            )?;

        let mut config = load_config_yaml(&config_path)?;
        config.normalize()?;
        config.validate()?;
        Ok(config)
    }

    fn normalize(&mut self) -> Result<()> {
        self.query_endpoint = trim_owned(self.query_endpoint.clone());
        self.heartbeat_endpoint = trim_owned(self.heartbeat_endpoint.clone());
        self.block_publish_endpoint = trim_owned(self.block_publish_endpoint.clone());
        self.transaction_publish_endpoint =
            trim_owned(self.transaction_publish_endpoint.clone());

        if self.query_endpoint.is_empty() {
            self.query_endpoint = default_query_endpoint();
        }
        if self.heartbeat_endpoint.is_empty() {
            self.heartbeat_endpoint = default_heartbeat_endpoint();
        }
        if self.block_publish_endpoint.is_empty() {
            self.block_publish_endpoint = default_block_publish_endpoint();
        }
        if self.transaction_publish_endpoint.is_empty() {
            self.transaction_publish_endpoint = default_transaction_publish_endpoint();
        }

        self.polling_interval_seconds = self.polling_interval_seconds.max(1);
        self.heartbeat_interval_seconds = self.heartbeat_interval_seconds.max(1);
        self.subscription_limit = self.subscription_limit.max(1);
        self.auth.normalize();

        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.auth.validate()
    }

    /// Resolves the configured subscription TTL, falling back to the
    /// default when the field was absent from the YAML document.
    pub fn subscription_expiration(&self) -> Duration {
        self.subscription_expiration.unwrap_or_else(default_subscription_expiration)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    #[serde(default)]
    pub server_certificate_path: Option<PathBuf>,
    #[serde(default)]
    pub client_certificates_dir: Option<PathBuf>,
    #[serde(default)]
    pub whitelisted_ips: Vec<String>,
}

impl AuthConfig {
    fn normalize(&mut self) {
        self.whitelisted_ips = self
            .whitelisted_ips
            .iter()
            .map(|ip| ip.trim().to_string())
            .filter(|ip| !ip.is_empty())
            .collect();
    }

    fn validate(&self) -> Result<()> {
        if self.client_certificates_dir.is_some() && self.server_certificate_path.is_none() {
            bail!(
                "auth.client_certificates_dir is set but auth.server_certificate_path is missing \
                 (curve cannot be enabled without a server certificate)"
            );
        }
        Ok(())
    }

    /// Curve is enabled only when both a server cert and a client-cert
    /// directory are present (§4.4: "if no client-certificates directory
    /// is given, curve is disabled even if the server key is present").
    pub fn curve_enabled(&self) -> bool {
        self.server_certificate_path.is_some() && self.client_certificates_dir.is_some()
    }
}

fn parse_config_path_arg<I>(mut args: I) -> Result<Option<PathBuf>>
where
    I: Iterator<Item = String>,
{
    let first = args.next();
    let second = args.next();

    if let Some(arg) = second {
        bail!("too many arguments: {arg} (usage: query-server [config-path])");
    }

    if matches!(first.as_deref(), Some("-h" | "--help")) {
        bail!("usage: query-server [config-path]");
    }

    Ok(first.map(PathBuf::from))
}

fn load_config_yaml(path: &Path) -> Result<Config> {
    let raw = std::fs::read(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    serde_yaml::from_slice(&raw)
        .with_context(|| format!("failed to parse YAML config {}", path.display()))
}

fn resolve_server_config_path() -> Option<PathBuf> {
    if let Some(path) = non_empty_env("QUERY_SERVER_CONFIG_PATH") {
        return Some(PathBuf::from(path));
    }

    if let Some(home) = non_empty_env("HOME") {
        let home_yaml = PathBuf::from(&home).join("query-server.yaml");
        if home_yaml.exists() {
            return Some(home_yaml);
        }

        let home_yml = PathBuf::from(home).join("query-server.yml");
        if home_yml.exists() {
            return Some(home_yml);
        }
    }

    let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let cwd_yaml = cwd.join("query-server.yaml");
    if cwd_yaml.exists() {
        return Some(cwd_yaml);
    }

    let cwd_yml = cwd.join("query-server.yml");
    if cwd_yml.exists() {
        return Some(cwd_yml);
    }

    None
}

fn default_query_endpoint() -> String {
    "tcp://*:9091".to_string()
}

fn default_heartbeat_endpoint() -> String {
    "tcp://*:9092".to_string()
}

fn default_block_publish_endpoint() -> String {
    "tcp://*:9093".to_string()
}

fn default_transaction_publish_endpoint() -> String {
    "tcp://*:9094".to_string()
}

fn default_polling_interval_seconds() -> u64 {
    1
}

fn default_heartbeat_interval_seconds() -> u64 {
    5
}

fn default_subscription_limit() -> usize {
    100_000
}

fn default_subscription_expiration() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_send_queue_high_water_mark() -> i32 {
    10_000
}

fn trim_owned(value: String) -> String {
    value.trim().to_string()
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() { None } else { Some(trimmed.to_string()) }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_endpoints() {
        assert_eq!(default_query_endpoint(), "tcp://*:9091");
        assert_eq!(default_heartbeat_endpoint(), "tcp://*:9092");
        assert_eq!(default_block_publish_endpoint(), "tcp://*:9093");
        assert_eq!(default_transaction_publish_endpoint(), "tcp://*:9094");
    }

    #[test]
    fn curve_requires_both_cert_and_client_dir() {
        let mut auth = AuthConfig {
            server_certificate_path: Some(PathBuf::from("server.cert")),
            client_certificates_dir: None,
            whitelisted_ips: vec![],
        };
        assert!(!auth.curve_enabled());

        auth.client_certificates_dir = Some(PathBuf::from("clients/"));
        assert!(auth.curve_enabled());
    }

    #[test]
    fn validate_rejects_client_dir_without_server_cert() {
        let auth = AuthConfig {
            server_certificate_path: None,
            client_certificates_dir: Some(PathBuf::from("clients/")),
            whitelisted_ips: vec![],
        };
        assert!(auth.validate().is_err());
    }

    #[test]
    fn subscription_expiration_falls_back_to_default_when_absent() {
        let config = Config {
            query_endpoint: default_query_endpoint(),
            heartbeat_endpoint: default_heartbeat_endpoint(),
            block_publish_endpoint: default_block_publish_endpoint(),
            transaction_publish_endpoint: default_transaction_publish_endpoint(),
            polling_interval_seconds: 1,
            heartbeat_interval_seconds: 5,
            subscription_limit: 100_000,
            subscription_expiration: None,
            send_queue_high_water_mark: 10_000,
            auth: AuthConfig::default(),
        };
        assert_eq!(config.subscription_expiration(), Duration::from_secs(600));
    }

    #[test]
    fn subscription_expiration_parses_humantime_string_from_yaml() {
        let config: Config = serde_yaml::from_str("subscription_expiration: \"90s\"\n").unwrap();
        assert_eq!(config.subscription_expiration(), Duration::from_secs(90));
    }
}
