//! Configuration management for Warden.
//!
//! Configuration is layered: built-in defaults, then an optional YAML file,
//! then `WARDEN__`-prefixed environment variables
//! (e.g. `WARDEN__SERVER__LISTEN_ADDR=0.0.0.0:9000`).

use http::HeaderName;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::{Result, WardenError};
use crate::ratelimit::{LimitRule, RateLimitRules, RedisStoreConfig};

/// Prefix for environment variable overrides.
const ENV_PREFIX: &str = "WARDEN";
/// Separator between the prefix and nested keys in environment variables.
const ENV_SEPARATOR: &str = "__";

/// Main configuration for the Warden service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Inline rate limit rules
    #[serde(default)]
    pub limits: RateLimitRules,

    /// Standalone rules file; replaces `limits` when set
    #[serde(default)]
    pub rules_path: Option<PathBuf>,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address of the protected HTTP service
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Address of the admin API; `None` disables it
    #[serde(default = "default_admin_addr")]
    pub admin_addr: Option<SocketAddr>,

    /// Request header carrying the API credential
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            admin_addr: default_admin_addr(),
            api_key_header: default_api_key_header(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_admin_addr() -> Option<SocketAddr> {
    Some(SocketAddr::from(([127, 0, 0, 1], 9091)))
}

fn default_api_key_header() -> String {
    "API_KEY".to_string()
}

impl ServerConfig {
    /// Parse the credential header name.
    pub fn api_key_header_name(&self) -> Result<HeaderName> {
        HeaderName::from_bytes(self.api_key_header.as_bytes()).map_err(|e| {
            WardenError::Config(format!(
                "Invalid api_key_header {:?}: {}",
                self.api_key_header, e
            ))
        })
    }
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Redis URL for the primary store; memory-only when unset
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Redis connection timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Redis command timeout in milliseconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,

    /// Interval between sweeps of expired in-memory counters
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            connect_timeout_ms: default_connect_timeout(),
            command_timeout_ms: default_command_timeout(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_connect_timeout() -> u64 {
    500
}

fn default_command_timeout() -> u64 {
    200
}

fn default_sweep_interval() -> u64 {
    30
}

impl StoreConfig {
    /// Build the Redis store settings, if a Redis URL is configured.
    pub fn redis(&self) -> Option<RedisStoreConfig> {
        self.redis_url.as_ref().map(|url| RedisStoreConfig {
            url: url.clone(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            command_timeout: Duration::from_millis(self.command_timeout_ms),
        })
    }

    /// Get the sweep interval as a duration.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// The `limits.tokens` section exactly as written in the file.
#[derive(Debug, Default, Deserialize)]
struct RawLimits {
    #[serde(default)]
    limits: RawTokens,
}

#[derive(Debug, Default, Deserialize)]
struct RawTokens {
    #[serde(default)]
    tokens: HashMap<String, LimitRule>,
}

/// Re-key layered token rules with the credential spelling from the file.
///
/// Layered values win, so an environment override of a file credential is
/// kept under the file's spelling. Rules that only exist in the layered map
/// stay as they are.
fn restore_token_case(
    layered: &mut HashMap<String, LimitRule>,
    from_file: HashMap<String, LimitRule>,
) {
    for (token, file_rule) in from_file {
        let rule = layered.remove(&token.to_lowercase()).unwrap_or(file_rule);
        layered.insert(token, rule);
    }
}

impl WardenConfig {
    /// Load configuration from defaults, an optional file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_SEPARATOR)
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        );

        let mut config: WardenConfig = builder.build()?.try_deserialize()?;

        // Credentials are case-sensitive but config lowercases keys; restore
        // the file's spelling and keep whatever the environment layered on top
        if let Some(path) = path {
            let contents = std::fs::read_to_string(path)?;
            let raw: RawLimits = serde_yaml::from_str(&contents)
                .map_err(|e| WardenError::Config(e.to_string()))?;
            restore_token_case(&mut config.limits.tokens, raw.limits.tokens);
        }

        config.finish()
    }

    /// Load configuration from a YAML string, without environment overrides.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: WardenConfig =
            serde_yaml::from_str(yaml).map_err(|e| WardenError::Config(e.to_string()))?;
        config.finish()
    }

    /// Resolve the rules file and validate.
    fn finish(mut self) -> Result<Self> {
        if let Some(rules_path) = &self.rules_path {
            self.limits = RateLimitRules::from_file(rules_path)?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Check the configuration for values the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.limits.validate()?;
        self.server.api_key_header_name()?;

        if self.store.connect_timeout_ms == 0 {
            return Err(WardenError::Config(
                "store.connect_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.store.command_timeout_ms == 0 {
            return Err(WardenError::Config(
                "store.command_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.store.sweep_interval_secs == 0 {
            return Err(WardenError::Config(
                "store.sweep_interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
