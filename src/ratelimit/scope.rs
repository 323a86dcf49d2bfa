//! Scope selection: which counter, limit and window govern a request.

use std::time::Duration;

use super::rules::RateLimitRules;

/// Key prefix for scopes derived from the remote address.
const IP_PREFIX: &str = "ip:";
/// Key prefix for scopes derived from an API credential.
const TOKEN_PREFIX: &str = "token_";

/// The counter key, limit and window that govern one class of requests.
///
/// Keys are namespaced so that an address and a credential with the same
/// text never share a counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    /// The counter key
    pub key: String,
    /// Requests allowed per window
    pub limit: u64,
    /// Length of the fixed window
    pub window: Duration,
}

impl Scope {
    /// Build the scope for a remote address.
    pub fn for_address(address: &str, limit: u64, window: Duration) -> Self {
        Self {
            key: format!("{}{}", IP_PREFIX, address),
            limit,
            window,
        }
    }

    /// Build the scope for an API credential.
    pub fn for_token(token: &str, limit: u64, window: Duration) -> Self {
        Self {
            key: format!("{}{}", TOKEN_PREFIX, token),
            limit,
            window,
        }
    }

    /// Whether this scope is keyed by a credential.
    pub fn is_token(&self) -> bool {
        self.key.starts_with(TOKEN_PREFIX)
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}/{:?})", self.key, self.limit, self.window)
    }
}

/// Derives the [`Scope`] for a request from its identity.
///
/// A credential with its own rule takes priority, then any credential when
/// a `token_default` rule is configured. Everything else is scoped by
/// remote address.
#[derive(Debug, Clone)]
pub struct ScopeSelector {
    rules: RateLimitRules,
}

impl ScopeSelector {
    /// Create a selector over the given rules.
    pub fn new(rules: RateLimitRules) -> Self {
        Self { rules }
    }

    /// Select the scope for a request.
    ///
    /// `address` is used as an opaque string; it only has to be stable per
    /// client for the duration of a window.
    pub fn select(&self, credential: Option<&str>, address: &str) -> Scope {
        let token = credential.map(str::trim).filter(|t| !t.is_empty());

        if let Some(token) = token {
            if let Some(rule) = self.rules.resolve_token(token) {
                return Scope::for_token(token, rule.limit, rule.window());
            }
        }

        let rule = &self.rules.ip;
        Scope::for_address(address, rule.limit, rule.window())
    }
}
