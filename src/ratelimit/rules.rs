//! Rate limit rules configuration.
//!
//! Rules pair a request limit with a fixed window. There is one default rule
//! for address-based scopes and an optional rule per API credential.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, WardenError};

/// Default number of requests per window for address-based scopes.
const DEFAULT_IP_LIMIT: u64 = 100;
/// Default window length in seconds.
const DEFAULT_WINDOW_SECS: u64 = 60;
/// Longest accepted window: one year.
const MAX_WINDOW_SECS: u64 = 365 * 24 * 60 * 60;

/// A limit and the fixed window it applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitRule {
    /// Number of requests allowed per window
    pub limit: u64,
    /// Window length in seconds
    pub window_secs: u64,
}

impl LimitRule {
    /// Create a new rule.
    pub fn new(limit: u64, window_secs: u64) -> Self {
        Self { limit, window_secs }
    }

    /// Get the window as a duration.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.limit == 0 {
            return Err(WardenError::Config(format!(
                "{}: limit must be greater than zero",
                name
            )));
        }
        if self.window_secs == 0 {
            return Err(WardenError::Config(format!(
                "{}: window_secs must be greater than zero",
                name
            )));
        }
        if self.window_secs > MAX_WINDOW_SECS {
            return Err(WardenError::Config(format!(
                "{}: window_secs must be at most {}",
                name, MAX_WINDOW_SECS
            )));
        }
        Ok(())
    }
}

impl Default for LimitRule {
    fn default() -> Self {
        Self {
            limit: DEFAULT_IP_LIMIT,
            window_secs: DEFAULT_WINDOW_SECS,
        }
    }
}

/// The complete set of rate limit rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRules {
    /// Rule for requests scoped by remote address
    #[serde(default)]
    pub ip: LimitRule,
    /// Rules for requests presenting a known API credential
    #[serde(default)]
    pub tokens: HashMap<String, LimitRule>,
    /// Rule for credentials without an entry in `tokens`; when unset they
    /// are scoped by address instead
    #[serde(default)]
    pub token_default: Option<LimitRule>,
}

impl RateLimitRules {
    /// Create rules with the given address rule and no credential rules.
    pub fn new(ip: LimitRule) -> Self {
        Self {
            ip,
            tokens: HashMap::new(),
            token_default: None,
        }
    }

    /// Add or replace the rule for a credential.
    pub fn with_token(mut self, token: impl Into<String>, rule: LimitRule) -> Self {
        self.tokens.insert(token.into(), rule);
        self
    }

    /// Set the rule applied to credentials not listed in `tokens`.
    pub fn with_token_default(mut self, rule: LimitRule) -> Self {
        self.token_default = Some(rule);
        self
    }

    /// Load rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load rules from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let rules: RateLimitRules = serde_yaml::from_str(yaml)
            .map_err(|e| WardenError::Config(format!("Failed to parse rate limit rules: {}", e)))?;
        rules.validate()?;
        Ok(rules)
    }

    /// Find the rule for a credential, if one is configured.
    pub fn find_token(&self, token: &str) -> Option<&LimitRule> {
        self.tokens.get(token)
    }

    /// Find the rule for a credential, falling back to `token_default`.
    pub fn resolve_token(&self, token: &str) -> Option<&LimitRule> {
        self.find_token(token).or(self.token_default.as_ref())
    }

    /// Check that every rule has a positive limit and window.
    pub fn validate(&self) -> Result<()> {
        self.ip.validate("ip")?;
        if let Some(rule) = &self.token_default {
            rule.validate("token_default")?;
        }
        for (token, rule) in &self.tokens {
            if token.trim().is_empty() {
                return Err(WardenError::Config(
                    "tokens: credential must not be empty".to_string(),
                ));
            }
            rule.validate(&format!("tokens.{}", token))?;
        }
        Ok(())
    }
}
